use std::fmt;

/// Stable error classification shared by every compilation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Lexical
    AssertFailed,
    SyntaxError,
    IncorrectNesting,
    NoEndBracket,
    BracketMismatch,
    InvalidId,
    InvalidClassName,
    NoExtendsPath,
    MalformedExtends,
    NoIncludePath,
    MalformedInclude,
    NoCaseExpression,
    NoWhenExpression,
    DefaultWithExpression,
    ElseCondition,
    NoWhileExpression,
    MalformedEach,
    InvalidKeyCharacter,
    InvalidIndentation,
    InconsistentIndentation,
    UnexpectedText,
    InterpolationTooDeep,
    // Syntactic
    InvalidToken,
    EndOfStream,
    BlockInBufferedCode,
    BlockOutsideMixin,
    MixinWithoutBody,
    RawIncludeBlock,
    PluginConflict,
    // Semantic
    DuplicateId,
    DuplicateAttribute,
    SelfClosingContent,
    UnsupportedNodeType,
}

impl ErrorKind {
    /// Machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::AssertFailed => "ASSERT_FAILED",
            ErrorKind::SyntaxError => "SYNTAX_ERROR",
            ErrorKind::IncorrectNesting => "INCORRECT_NESTING",
            ErrorKind::NoEndBracket => "NO_END_BRACKET",
            ErrorKind::BracketMismatch => "BRACKET_MISMATCH",
            ErrorKind::InvalidId => "INVALID_ID",
            ErrorKind::InvalidClassName => "INVALID_CLASS_NAME",
            ErrorKind::NoExtendsPath => "NO_EXTENDS_PATH",
            ErrorKind::MalformedExtends => "MALFORMED_EXTENDS",
            ErrorKind::NoIncludePath => "NO_INCLUDE_PATH",
            ErrorKind::MalformedInclude => "MALFORMED_INCLUDE",
            ErrorKind::NoCaseExpression => "NO_CASE_EXPRESSION",
            ErrorKind::NoWhenExpression => "NO_WHEN_EXPRESSION",
            ErrorKind::DefaultWithExpression => "DEFAULT_WITH_EXPRESSION",
            ErrorKind::ElseCondition => "ELSE_CONDITION",
            ErrorKind::NoWhileExpression => "NO_WHILE_EXPRESSION",
            ErrorKind::MalformedEach => "MALFORMED_EACH",
            ErrorKind::InvalidKeyCharacter => "INVALID_KEY_CHARACTER",
            ErrorKind::InvalidIndentation => "INVALID_INDENTATION",
            ErrorKind::InconsistentIndentation => "INCONSISTENT_INDENTATION",
            ErrorKind::UnexpectedText => "UNEXPECTED_TEXT",
            ErrorKind::InterpolationTooDeep => "INTERPOLATION_TOO_DEEP",
            ErrorKind::InvalidToken => "INVALID_TOKEN",
            ErrorKind::EndOfStream => "END_OF_STREAM",
            ErrorKind::BlockInBufferedCode => "BLOCK_IN_BUFFERED_CODE",
            ErrorKind::BlockOutsideMixin => "BLOCK_OUTSIDE_MIXIN",
            ErrorKind::MixinWithoutBody => "MIXIN_WITHOUT_BODY",
            ErrorKind::RawIncludeBlock => "RAW_INCLUDE_BLOCK",
            ErrorKind::PluginConflict => "PLUGIN_CONFLICT",
            ErrorKind::DuplicateId => "DUPLICATE_ID",
            ErrorKind::DuplicateAttribute => "DUPLICATE_ATTRIBUTE",
            ErrorKind::SelfClosingContent => "SELF_CLOSING_CONTENT",
            ErrorKind::UnsupportedNodeType => "UNSUPPORTED_NODE_TYPE",
        }
    }

    /// Human-readable label used in rendered diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AssertFailed => "Assertion failed",
            ErrorKind::SyntaxError => "Invalid expression",
            ErrorKind::IncorrectNesting => "Incorrect nesting",
            ErrorKind::NoEndBracket => "Missing end bracket",
            ErrorKind::BracketMismatch => "Mismatched bracket",
            ErrorKind::InvalidId => "Invalid id",
            ErrorKind::InvalidClassName => "Invalid class name",
            ErrorKind::NoExtendsPath => "Missing extends path",
            ErrorKind::MalformedExtends => "Malformed extends",
            ErrorKind::NoIncludePath => "Missing include path",
            ErrorKind::MalformedInclude => "Malformed include",
            ErrorKind::NoCaseExpression => "Missing case expression",
            ErrorKind::NoWhenExpression => "Missing when expression",
            ErrorKind::DefaultWithExpression => "Default with expression",
            ErrorKind::ElseCondition => "Else with condition",
            ErrorKind::NoWhileExpression => "Missing while expression",
            ErrorKind::MalformedEach => "Malformed each",
            ErrorKind::InvalidKeyCharacter => "Invalid attribute key",
            ErrorKind::InvalidIndentation => "Invalid indentation",
            ErrorKind::InconsistentIndentation => "Inconsistent indentation",
            ErrorKind::UnexpectedText => "Unexpected text",
            ErrorKind::InterpolationTooDeep => "Interpolation nested too deeply",
            ErrorKind::InvalidToken => "Unexpected token",
            ErrorKind::EndOfStream => "Unexpected end of input",
            ErrorKind::BlockInBufferedCode => "Block in buffered code",
            ErrorKind::BlockOutsideMixin => "Block outside mixin",
            ErrorKind::MixinWithoutBody => "Mixin without body",
            ErrorKind::RawIncludeBlock => "Block under raw include",
            ErrorKind::PluginConflict => "Plugin conflict",
            ErrorKind::DuplicateId => "Duplicate id",
            ErrorKind::DuplicateAttribute => "Duplicate attribute",
            ErrorKind::SelfClosingContent => "Self-closing tag with content",
            ErrorKind::UnsupportedNodeType => "Unsupported node type",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A located compilation failure.
///
/// `line` and `column` are 1-based. A zero line means the failure has no
/// meaningful source position (e.g. plugin registration).
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub filename: Option<String>,
    pub help: Option<String>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
            column,
            filename: None,
            help: None,
        }
    }

    /// Error without a source position.
    pub fn unlocated(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, 0, 0)
    }

    pub fn with_filename(mut self, filename: Option<&str>) -> Self {
        self.filename = filename.map(str::to_string);
        self
    }

    /// Add help text
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Render the error with source context
    pub fn render(&self, source: &str) -> String {
        self.render_inner(source, false)
    }

    /// Render the error with ANSI color codes
    pub fn render_color(&self, source: &str) -> String {
        self.render_inner(source, true)
    }

    fn render_inner(&self, source: &str, color: bool) -> String {
        let red = if color { "\x1b[1;31m" } else { "" };
        let dim = if color { "\x1b[2m" } else { "" };
        let cyan = if color { "\x1b[1;38;5;73m" } else { "" };
        let reset = if color { "\x1b[0m" } else { "" };

        let mut output = String::new();
        output.push('\n');

        let filename = self.filename.as_deref().unwrap_or("Pug");
        output.push_str(&format!(" {}file:{} {}:{}:{}\n", dim, reset, filename, self.line, self.column));
        output.push_str(&format!(
            "{}error[{}]:{} {}\n",
            red,
            self.kind.code(),
            reset,
            self.message
        ));

        if self.line > 0 {
            let lines: Vec<&str> = source.lines().collect();
            let width = format!("{}", (self.line + 1).min(lines.len())).len().max(2);
            let first = self.line.saturating_sub(2).max(1);
            let last = (self.line + 1).min(lines.len());

            output.push_str(&format!("{}{:>width$} |{}\n", dim, "", reset, width = width));
            for number in first..=last {
                let Some(text) = lines.get(number - 1) else {
                    continue;
                };
                let marker = if number == self.line { ">" } else { " " };
                output.push_str(&format!(
                    "{}{}{:>width$} |{} {}\n",
                    dim,
                    marker,
                    number,
                    reset,
                    text,
                    width = width - 1
                ));
                if number == self.line {
                    let spaces = " ".repeat(self.column.saturating_sub(1));
                    output.push_str(&format!(
                        "{}{:>width$} |{} {}{}^{}\n",
                        dim, "", reset, spaces, red, reset,
                        width = width
                    ));
                }
            }
        }

        if let Some(ref help) = self.help {
            output.push('\n');
            for (i, help_line) in help.lines().enumerate() {
                if i == 0 {
                    output.push_str(&format!(" {}help:{} {}\n", cyan, reset, help_line));
                } else {
                    output.push_str(&format!("       {}\n", help_line));
                }
            }
        }

        output.push('\n');
        output
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filename = self.filename.as_deref().unwrap_or("Pug");
        if self.line > 0 {
            write!(f, "{}:{}:{}: {}", filename, self.line, self.column, self.message)
        } else {
            write!(f, "{}: {}", filename, self.message)
        }
    }
}

impl std::error::Error for CompileError {}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_location() {
        let err = CompileError::new(ErrorKind::InvalidToken, "Unexpected token", 3, 5)
            .with_filename(Some("index.pug"));
        assert_eq!(err.to_string(), "index.pug:3:5: Unexpected token");
        assert_eq!(err.code(), "INVALID_TOKEN");
    }

    #[test]
    fn test_render_points_at_column() {
        let source = "div\n  p(\n  span";
        let err = CompileError::new(ErrorKind::NoEndBracket, "The end of the string reached", 2, 4);
        let rendered = err.render(source);
        assert!(rendered.contains("error[NO_END_BRACKET]"));
        assert!(rendered.contains(">2 |   p("));
        assert!(rendered.contains("   |    ^"));
    }

    #[test]
    fn test_unlocated_render_has_no_context() {
        let err = CompileError::unlocated(ErrorKind::PluginConflict, "two handlers");
        let rendered = err.render("div");
        assert!(!rendered.contains('|'));
        assert_eq!(err.to_string(), "Pug: two handlers");
    }
}
