use serde::Serialize;

/// Position in template source. Both fields are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

/// Attribute value: an expression source, or a bare boolean attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Expression(String),
    True,
}

impl Serialize for AttributeValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AttributeValue::Expression(src) => serializer.serialize_str(src),
            AttributeValue::True => serializer.serialize_bool(true),
        }
    }
}

impl AttributeValue {
    /// JavaScript source of the value.
    pub fn as_js(&self) -> &str {
        match self {
            AttributeValue::Expression(src) => src,
            AttributeValue::True => "true",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    Replace,
    Prepend,
    Append,
}

impl BlockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockMode::Replace => "replace",
            BlockMode::Prepend => "prepend",
            BlockMode::Append => "append",
        }
    }
}

/// Token kinds produced by the lexer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TokenKind {
    // === Structure ===
    Indent { val: usize },
    Outdent,
    Newline,
    Eos,

    // === Elements ===
    Tag { val: String },
    Id { val: String },
    Class { val: String },
    /// `#{expr}` tag name
    Interpolation { val: String },
    StartAttributes,
    Attribute { name: String, val: AttributeValue, must_escape: bool },
    EndAttributes,
    #[serde(rename = "&attributes")]
    AndAttributes { val: String },
    Dot,
    Slash,
    #[serde(rename = ":")]
    Colon,

    // === Text ===
    Text { val: String },
    TextHtml { val: String },
    InterpolatedCode { val: String, must_escape: bool, buffer: bool },
    StartPipelessText,
    EndPipelessText,
    StartPugInterpolation,
    EndPugInterpolation,
    Comment { val: String, buffer: bool },
    Doctype { val: String },

    // === Code ===
    Code { val: String, must_escape: bool, buffer: bool },
    Blockcode,
    If { val: String },
    ElseIf { val: String },
    Else { val: String },
    Case { val: String },
    When { val: String },
    Default,
    Each { val: String, key: Option<String>, code: String },
    While { val: String },

    // === Mixins ===
    Mixin { val: String, args: Option<String> },
    Call { val: String, args: Option<String> },
    MixinBlock,
    Yield,

    // === Composition ===
    Extends,
    Include,
    Path { val: String },
    Block { val: String, mode: BlockMode },
    Filter { val: String },
}

impl TokenKind {
    /// Kind name as it appears in diagnostics and plugin registrations.
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Indent { .. } => "indent",
            TokenKind::Outdent => "outdent",
            TokenKind::Newline => "newline",
            TokenKind::Eos => "eos",
            TokenKind::Tag { .. } => "tag",
            TokenKind::Id { .. } => "id",
            TokenKind::Class { .. } => "class",
            TokenKind::Interpolation { .. } => "interpolation",
            TokenKind::StartAttributes => "start-attributes",
            TokenKind::Attribute { .. } => "attribute",
            TokenKind::EndAttributes => "end-attributes",
            TokenKind::AndAttributes { .. } => "&attributes",
            TokenKind::Dot => "dot",
            TokenKind::Slash => "slash",
            TokenKind::Colon => ":",
            TokenKind::Text { .. } => "text",
            TokenKind::TextHtml { .. } => "text-html",
            TokenKind::InterpolatedCode { .. } => "interpolated-code",
            TokenKind::StartPipelessText => "start-pipeless-text",
            TokenKind::EndPipelessText => "end-pipeless-text",
            TokenKind::StartPugInterpolation => "start-pug-interpolation",
            TokenKind::EndPugInterpolation => "end-pug-interpolation",
            TokenKind::Comment { .. } => "comment",
            TokenKind::Doctype { .. } => "doctype",
            TokenKind::Code { .. } => "code",
            TokenKind::Blockcode => "blockcode",
            TokenKind::If { .. } => "if",
            TokenKind::ElseIf { .. } => "else-if",
            TokenKind::Else { .. } => "else",
            TokenKind::Case { .. } => "case",
            TokenKind::When { .. } => "when",
            TokenKind::Default => "default",
            TokenKind::Each { .. } => "each",
            TokenKind::While { .. } => "while",
            TokenKind::Mixin { .. } => "mixin",
            TokenKind::Call { .. } => "call",
            TokenKind::MixinBlock => "mixin-block",
            TokenKind::Yield => "yield",
            TokenKind::Extends => "extends",
            TokenKind::Include => "include",
            TokenKind::Path { .. } => "path",
            TokenKind::Block { .. } => "block",
            TokenKind::Filter { .. } => "filter",
        }
    }
}

/// A lexed token with the position where it starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    #[serde(flatten)]
    pub kind: TokenKind,
    #[serde(flatten)]
    pub pos: Position,
}

impl Token {
    pub fn new(kind: TokenKind, pos: Position) -> Self {
        Self { kind, pos }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Textual payload for kinds that carry one.
    pub fn val(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Tag { val }
            | TokenKind::Id { val }
            | TokenKind::Class { val }
            | TokenKind::Interpolation { val }
            | TokenKind::AndAttributes { val }
            | TokenKind::Text { val }
            | TokenKind::TextHtml { val }
            | TokenKind::InterpolatedCode { val, .. }
            | TokenKind::Comment { val, .. }
            | TokenKind::Doctype { val }
            | TokenKind::Code { val, .. }
            | TokenKind::If { val }
            | TokenKind::ElseIf { val }
            | TokenKind::Else { val }
            | TokenKind::Case { val }
            | TokenKind::When { val }
            | TokenKind::Each { val, .. }
            | TokenKind::While { val }
            | TokenKind::Mixin { val, .. }
            | TokenKind::Call { val, .. }
            | TokenKind::Path { val }
            | TokenKind::Block { val, .. }
            | TokenKind::Filter { val } => Some(val.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_serializes_with_kebab_type() {
        let token = Token::new(TokenKind::StartPipelessText, Position::new(2, 3));
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["type"], "start-pipeless-text");
        assert_eq!(json["line"], 2);
        assert_eq!(json["column"], 3);
    }

    #[test]
    fn test_attribute_value_true_is_js_literal() {
        assert_eq!(AttributeValue::True.as_js(), "true");
        assert_eq!(AttributeValue::Expression("a + b".into()).as_js(), "a + b");
    }

    #[test]
    fn test_names_match_serialized_types() {
        let kinds = [
            TokenKind::AndAttributes { val: "x".into() },
            TokenKind::Colon,
            TokenKind::ElseIf { val: "a".into() },
            TokenKind::InterpolatedCode { val: "a".into(), must_escape: true, buffer: true },
        ];
        for kind in kinds {
            let json = serde_json::to_value(&kind).unwrap();
            assert_eq!(json["type"], kind.name());
        }
    }
}
