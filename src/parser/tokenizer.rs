//! Indentation-aware lexer.
//!
//! Rules are tried in a fixed priority order at every position; the first
//! one that consumes input wins. Embedded JavaScript is delimited with the
//! character scanner so brackets inside strings, comments and regular
//! expressions never end an expression early.

use super::scanner::{self, Delimiter, Range, ScanError, UntilOptions};
use super::token::{AttributeValue, BlockMode, Position, Token, TokenKind};
use crate::error::{CompileError, ErrorKind, Result};
use crate::expr::ExpressionValidator;
use crate::plugin::LexerHook;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

/// Nested `#[...]` interpolations deeper than this are rejected.
pub const MAX_INTERPOLATION_DEPTH: usize = 64;

lazy_static! {
    static ref BLANK: Regex = Regex::new(r"^\n[ \t]*\n").unwrap();
    static ref YIELD: Regex = Regex::new(r"^yield").unwrap();
    static ref DOCTYPE: Regex = Regex::new(r"^doctype *([^\n]*)").unwrap();
    static ref CASE: Regex = Regex::new(r"^case +([^\n]+)").unwrap();
    static ref CASE_WORD: Regex = Regex::new(r"^case\b").unwrap();
    static ref WHEN: Regex = Regex::new(r"^when +([^:\n]+)").unwrap();
    static ref WHEN_CONTINUATION: Regex = Regex::new(r"^:([^:\n]+)").unwrap();
    static ref WHEN_WORD: Regex = Regex::new(r"^when\b").unwrap();
    static ref DEFAULT: Regex = Regex::new(r"^default").unwrap();
    static ref DEFAULT_WORD: Regex = Regex::new(r"^default\b").unwrap();
    static ref EXTENDS: Regex = Regex::new(r"^extends?").unwrap();
    static ref EXTENDS_WORD: Regex = Regex::new(r"^extends?\b").unwrap();
    static ref APPEND: Regex = Regex::new(r"^(?:block +)?append +([^\n]+)").unwrap();
    static ref PREPEND: Regex = Regex::new(r"^(?:block +)?prepend +([^\n]+)").unwrap();
    static ref BLOCK: Regex = Regex::new(r"^block +([^\n]+)").unwrap();
    static ref MIXIN_BLOCK: Regex = Regex::new(r"^block").unwrap();
    static ref INCLUDE_WORD: Regex = Regex::new(r"^include\b").unwrap();
    static ref NOT_A_PATH: Regex = Regex::new(r"^[^ \n]+").unwrap();
    static ref PATH: Regex = Regex::new(r"^ ([^\n]+)").unwrap();
    static ref MIXIN: Regex = Regex::new(r"^mixin +([-0-9A-Za-z_]+)(?: *\((.*)\))? *").unwrap();
    static ref CALL: Regex = Regex::new(r"^\+(\s*)(?:([-0-9A-Za-z_]+)|(#\{))").unwrap();
    static ref CALL_ARGS: Regex = Regex::new(r"^ *\(").unwrap();
    static ref CALL_ATTRS: Regex = Regex::new(r"^\s*[-0-9A-Za-z_]+ *=").unwrap();
    static ref CONDITIONAL: Regex = Regex::new(r"^(if|unless|else if|else)\b([^\n]*)").unwrap();
    static ref WHILE: Regex = Regex::new(r"^while +([^\n]+)").unwrap();
    static ref WHILE_WORD: Regex = Regex::new(r"^while\b").unwrap();
    static ref EACH: Regex = Regex::new(
        r"^(?:each|for) +([a-zA-Z_$][0-9A-Za-z_$]*)(?: *, *([a-zA-Z_$][0-9A-Za-z_$]*))? * in *([^\n]+)"
    )
    .unwrap();
    static ref EACH_WORD: Regex = Regex::new(r"^(?:each|for)\b").unwrap();
    static ref DASHED_EACH: Regex = Regex::new(
        r"^- *(?:each|for) +([a-zA-Z_$][0-9A-Za-z_$]*)(?: *, *([a-zA-Z_$][0-9A-Za-z_$]*))? +in +([^\n]+)"
    )
    .unwrap();
    static ref TAG: Regex = Regex::new(r"^([0-9A-Za-z_](?:[-:0-9A-Za-z_]*[0-9A-Za-z_])?)").unwrap();
    static ref FILTER: Regex = Regex::new(r"^:([-0-9A-Za-z_]+)").unwrap();
    static ref BLOCK_CODE: Regex = Regex::new(r"^-").unwrap();
    static ref CODE: Regex = Regex::new(r"^(!?=|-)[ \t]*([^\n]+)").unwrap();
    static ref ID: Regex = Regex::new(r"^#([-0-9A-Za-z_]+)").unwrap();
    static ref BAD_NAME: Regex = Regex::new(r"^.[^ \t(#.:]*").unwrap();
    static ref DOT: Regex = Regex::new(r"^\.").unwrap();
    static ref CLASS: Regex = Regex::new(r"(?i)^\.(-?-?[_a-z][_a-z0-9\-]*)").unwrap();
    static ref ATTRIBUTES_BLOCK: Regex = Regex::new(r"^&attributes\b").unwrap();
    static ref TABS: Regex = Regex::new(r"^\n(\t*) *").unwrap();
    static ref SPACES: Regex = Regex::new(r"^\n( *)").unwrap();
    static ref TEXT: Regex = Regex::new(r"^(?:\| ?| )([^\n]+)").unwrap();
    static ref TEXT_SPACE: Regex = Regex::new(r"^( )").unwrap();
    static ref TEXT_PIPE: Regex = Regex::new(r"^\|( ?)").unwrap();
    static ref TEXT_HTML: Regex = Regex::new(r"^(<[^\n]*)").unwrap();
    static ref COMMENT: Regex = Regex::new(r"^//(-)?([^\n]*)").unwrap();
    static ref SLASH: Regex = Regex::new(r"^/").unwrap();
    static ref COLON: Regex = Regex::new(r"^: +").unwrap();
    static ref STRING_INTERPOLATION: Regex = Regex::new(r"(?s)(\\)?([#!])\{(.*)$").unwrap();
}

/// A lexer rule, as offered to [`LexerHook`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Advance,
    Blank,
    Eos,
    EndInterpolation,
    Yield,
    Doctype,
    Interpolation,
    Case,
    When,
    Default,
    Extends,
    Append,
    Prepend,
    Block,
    MixinBlock,
    Include,
    Mixin,
    Call,
    Conditional,
    Each,
    While,
    Tag,
    Filter { in_include: bool },
    BlockCode,
    Code,
    Id,
    Dot,
    ClassName,
    Attrs,
    AttributesBlock,
    Indent,
    Text,
    TextHtml,
    Comment,
    Slash,
    Colon,
    Path,
    PipelessText { indents: Option<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndentStyle {
    Tabs,
    Spaces,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextKind {
    Plain,
    Html,
}

impl TextKind {
    fn token(self, val: String) -> TokenKind {
        match self {
            TextKind::Plain => TokenKind::Text { val },
            TextKind::Html => TokenKind::TextHtml { val },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrLoc {
    Key,
    KeyChar,
    Value,
}

/// Lexer over one template (or one `#[...]` interpolation).
pub struct Lexer<'p> {
    input: String,
    pos: usize,
    filename: Option<Arc<str>>,
    interpolated: bool,
    lineno: usize,
    colno: usize,
    plugins: &'p [Box<dyn LexerHook>],
    validator: &'p dyn ExpressionValidator,
    /// Indentation widths; the innermost level is last and the base is 0.
    indent_stack: Vec<usize>,
    indent_style: Option<IndentStyle>,
    /// Whether `#{}`, `!{}` and `#[]` are recognised in text.
    interpolation_allowed: bool,
    tokens: Vec<Token>,
    ended: bool,
    depth: usize,
}

impl<'p> Lexer<'p> {
    pub fn new(source: &str, filename: Option<Arc<str>>, validator: &'p dyn ExpressionValidator) -> Self {
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);
        let input = source.replace("\r\n", "\n").replace('\r', "\n");
        Self {
            input,
            pos: 0,
            filename,
            interpolated: false,
            lineno: 1,
            colno: 1,
            plugins: &[],
            validator,
            indent_stack: vec![0],
            indent_style: None,
            interpolation_allowed: true,
            tokens: Vec::new(),
            ended: false,
            depth: 0,
        }
    }

    pub fn with_plugins(mut self, plugins: &'p [Box<dyn LexerHook>]) -> Self {
        self.plugins = plugins;
        self
    }

    /// Lexer for the body of a `#[...]` interpolation starting at the
    /// current position.
    fn child(&self, input: &str) -> Result<Lexer<'p>> {
        if self.depth + 1 > MAX_INTERPOLATION_DEPTH {
            return Err(self.error(
                ErrorKind::InterpolationTooDeep,
                format!("Tag interpolation is nested more than {} levels deep", MAX_INTERPOLATION_DEPTH),
            ));
        }
        Ok(Lexer {
            input: input.to_string(),
            pos: 0,
            filename: self.filename.clone(),
            interpolated: true,
            lineno: self.lineno,
            colno: self.colno,
            plugins: self.plugins,
            validator: self.validator,
            indent_stack: vec![0],
            indent_style: None,
            interpolation_allowed: true,
            tokens: Vec::new(),
            ended: false,
            depth: self.depth + 1,
        })
    }

    /// Lex until end of source.
    pub fn get_tokens(mut self) -> Result<Vec<Token>> {
        while !self.ended {
            self.call(Rule::Advance)?;
        }
        Ok(self.tokens)
    }

    // === Cursor ===

    /// Unconsumed input.
    pub fn rest(&self) -> &str {
        &self.input[self.pos..]
    }

    /// Drop `len` bytes of input. Positions are not updated.
    pub fn consume(&mut self, len: usize) {
        self.pos = (self.pos + len).min(self.input.len());
    }

    pub fn position(&self) -> Position {
        Position::new(self.lineno, self.colno)
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn increment_line(&mut self, increment: usize) {
        self.lineno += increment;
        if increment > 0 {
            self.colno = 1;
        }
    }

    pub fn increment_column(&mut self, increment: usize) {
        self.colno += increment;
    }

    /// Emit a token at the current position.
    pub fn push(&mut self, kind: TokenKind) {
        let token = self.tok(kind);
        self.tokens.push(token);
    }

    fn tok(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.position())
    }

    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) -> CompileError {
        self.error_at(kind, message, self.position())
    }

    fn error_at(&self, kind: ErrorKind, message: impl Into<String>, pos: Position) -> CompileError {
        CompileError::new(kind, message, pos.line, pos.column).with_filename(self.filename())
    }

    // === Assertions ===

    /// Validate `src` as a JavaScript expression that starts at `base`.
    fn assert_expression(&self, src: &str, base: Position) -> Result<()> {
        match self.validator.validate(src) {
            Ok(()) => Ok(()),
            Err(err) => {
                let pos = if err.line == 0 {
                    Position::new(base.line, base.column + err.column)
                } else {
                    Position::new(base.line + err.line, 1 + err.column)
                };
                Err(self.error_at(ErrorKind::SyntaxError, format!("Syntax Error: {}", err.message), pos))
            }
        }
    }

    fn is_expression(&self, src: &str) -> bool {
        self.validator.is_expression(src)
    }

    /// Brackets must balance, but the contents need not be valid JavaScript.
    fn assert_nesting_correct(&self, src: &str) -> Result<()> {
        let state = scanner::parse(src, None, 0, None).map_err(|e| self.scan_error(e, None))?;
        if state.is_nesting(false) {
            return Err(self.error(
                ErrorKind::IncorrectNesting,
                format!("Nesting must match on expression `{}`", src),
            ));
        }
        Ok(())
    }

    fn scan_error(&self, err: ScanError, missing: Option<&str>) -> CompileError {
        match err {
            ScanError::EndOfStringReached { .. } => self.error(
                ErrorKind::NoEndBracket,
                missing.unwrap_or("End of line was reached with no closing bracket for interpolation."),
            ),
            ScanError::MismatchedBracket { .. } => self.error(ErrorKind::BracketMismatch, err.to_string()),
        }
    }

    /// Advance the position over `text`, which may span lines.
    fn skip_over(&mut self, text: &str) {
        match text.rfind('\n') {
            Some(last) => {
                self.increment_line(text.matches('\n').count());
                self.increment_column(text[last + 1..].chars().count());
            }
            None => self.increment_column(text.chars().count()),
        }
    }

    // === Scanning helpers ===

    /// Consume a match of `re`. Returns the start position and the first
    /// capture; the column moves past everything before the capture.
    fn scan(&mut self, re: &Regex) -> Option<(Position, Option<String>)> {
        let caps = re.captures(self.rest())?;
        let whole = caps.get(0)?.as_str();
        let len = whole.len();
        let val = caps.get(1).map(|m| m.as_str().to_string());
        let diff = whole.chars().count() - val.as_deref().map_or(0, |v| v.chars().count());
        let pos = self.position();
        self.consume(len);
        self.increment_column(diff);
        Some((pos, val))
    }

    /// Like [`scan`](Self::scan) but only matches when the construct ends
    /// the line or is followed by `:`.
    fn scan_end_of_line(&mut self, re: &Regex) -> Option<(Position, Option<String>)> {
        let caps = re.captures(self.rest())?;
        let whole = caps.get(0)?.as_str();
        let val = caps.get(1).map(|m| m.as_str().to_string());
        let whitespace = whole.len() - whole.trim_start_matches(' ').len();
        let after = &self.rest()[whole.len()..];
        let consumed = if after.starts_with(':') {
            whole.len()
        } else {
            let trimmed = after.trim_start_matches([' ', '\t']);
            if !(trimmed.is_empty() || trimmed.starts_with('\n')) {
                return None;
            }
            whole.len() + (after.len() - trimmed.len())
        };
        let width = whole.chars().count();
        self.increment_column(whitespace);
        let pos = self.position();
        self.consume(consumed);
        self.increment_column(width - whitespace);
        Some((pos, val))
    }

    /// Find the bracket closing the one at `skip`.
    ///
    /// The column must be at `rest()[0]` when this is called.
    fn bracket_expression(&mut self, skip: usize) -> Result<Range> {
        let rest = self.rest();
        let closer = match rest[skip..].chars().next() {
            Some('(') => ")",
            Some('{') => "}",
            Some('[') => "]",
            _ => {
                return Err(self.error(
                    ErrorKind::AssertFailed,
                    "The start character should be \"(\", \"{\" or \"[\"",
                ));
            }
        };
        let options = UntilOptions {
            start: skip + 1,
            ..UntilOptions::default()
        };
        match scanner::parse_until(rest, Delimiter::Literal(closer), options) {
            Ok(range) => Ok(range),
            Err(err @ ScanError::MismatchedBracket { .. }) => {
                let before = rest[..err.index()].to_string();
                self.skip_over(&before);
                Err(self.error(ErrorKind::BracketMismatch, err.to_string()))
            }
            Err(ScanError::EndOfStringReached { .. }) => {
                // reported at the unclosed bracket
                let before = rest[..skip].chars().count();
                self.increment_column(before);
                Err(self.error(
                    ErrorKind::NoEndBracket,
                    format!("The end of the string reached with no closing bracket {} found.", closer),
                ))
            }
        }
    }

    /// Width of the indentation after the next newline, fixing the file's
    /// indentation style on the first indented line.
    fn scan_indentation(&mut self) -> Option<usize> {
        let rest = self.rest();
        match self.indent_style {
            Some(IndentStyle::Tabs) => TABS.captures(rest).map(|c| c[1].len()),
            Some(IndentStyle::Spaces) => SPACES.captures(rest).map(|c| c[1].len()),
            None => {
                let mut style = IndentStyle::Tabs;
                let mut indents = TABS.captures(rest).map(|c| c[1].len());
                if indents == Some(0) {
                    style = IndentStyle::Spaces;
                    indents = SPACES.captures(rest).map(|c| c[1].len());
                }
                if indents.is_some_and(|n| n > 0) {
                    self.indent_style = Some(style);
                }
                indents
            }
        }
    }

    fn line_indentation(&self, line: &str) -> usize {
        let indent = match self.indent_style {
            Some(IndentStyle::Tabs) => '\t',
            _ => ' ',
        };
        line.chars().take_while(|c| *c == indent).count()
    }

    // === Dispatch ===

    /// Offer `rule` to the plugins, then run the built-in version.
    pub fn call(&mut self, rule: Rule) -> Result<bool> {
        let plugins = self.plugins;
        for plugin in plugins {
            if plugin.rule(rule, self)? {
                return Ok(true);
            }
        }
        match rule {
            Rule::Advance => self.advance(),
            Rule::Blank => Ok(self.blank()),
            Rule::Eos => self.eos(),
            Rule::EndInterpolation => Ok(self.end_interpolation()),
            Rule::Yield => Ok(self.keyword_line(&YIELD, TokenKind::Yield)),
            Rule::Doctype => Ok(self.doctype()),
            Rule::Interpolation => self.interpolation(),
            Rule::Case => self.case(),
            Rule::When => self.when(),
            Rule::Default => self.default(),
            Rule::Extends => self.extends(),
            Rule::Append => Ok(self.named_block(&APPEND, BlockMode::Append)),
            Rule::Prepend => Ok(self.named_block(&PREPEND, BlockMode::Prepend)),
            Rule::Block => Ok(self.named_block(&BLOCK, BlockMode::Replace)),
            Rule::MixinBlock => Ok(self.keyword_line(&MIXIN_BLOCK, TokenKind::MixinBlock)),
            Rule::Include => self.include(),
            Rule::Mixin => Ok(self.mixin()),
            Rule::Call => self.mixin_call(),
            Rule::Conditional => self.conditional(),
            Rule::Each => self.each(),
            Rule::While => self.while_loop(),
            Rule::Tag => Ok(self.tag()),
            Rule::Filter { in_include } => self.filter(in_include),
            Rule::BlockCode => self.block_code(),
            Rule::Code => self.code(),
            Rule::Id => self.id(),
            Rule::Dot => self.dot(),
            Rule::ClassName => self.class_name(),
            Rule::Attrs => self.attrs(),
            Rule::AttributesBlock => self.attributes_block(),
            Rule::Indent => self.indent(),
            Rule::Text => self.text(),
            Rule::TextHtml => self.text_html(),
            Rule::Comment => self.comment(),
            Rule::Slash => Ok(self.punctuation(&SLASH, TokenKind::Slash)),
            Rule::Colon => Ok(self.punctuation(&COLON, TokenKind::Colon)),
            Rule::Path => Ok(self.path()),
            Rule::PipelessText { indents } => self.pipeless_text(indents),
        }
    }

    fn advance(&mut self) -> Result<bool> {
        const ORDER: [Rule; 35] = [
            Rule::Blank,
            Rule::Eos,
            Rule::EndInterpolation,
            Rule::Yield,
            Rule::Doctype,
            Rule::Interpolation,
            Rule::Case,
            Rule::When,
            Rule::Default,
            Rule::Extends,
            Rule::Append,
            Rule::Prepend,
            Rule::Block,
            Rule::MixinBlock,
            Rule::Include,
            Rule::Mixin,
            Rule::Call,
            Rule::Conditional,
            Rule::Each,
            Rule::While,
            Rule::Tag,
            Rule::Filter { in_include: false },
            Rule::BlockCode,
            Rule::Code,
            Rule::Id,
            Rule::Dot,
            Rule::ClassName,
            Rule::Attrs,
            Rule::AttributesBlock,
            Rule::Indent,
            Rule::Text,
            Rule::TextHtml,
            Rule::Comment,
            Rule::Slash,
            Rule::Colon,
        ];
        for rule in ORDER {
            if self.call(rule)? {
                return Ok(true);
            }
        }
        Err(self.fail())
    }

    fn fail(&self) -> CompileError {
        let preview: String = self.rest().chars().take(5).collect();
        self.error(ErrorKind::UnexpectedText, format!("unexpected text \"{}\"", preview))
    }

    // === Rules ===

    fn blank(&mut self) -> bool {
        let Some(m) = BLANK.find(self.rest()) else {
            return false;
        };
        let len = m.len();
        self.consume(len - 1);
        self.increment_line(1);
        true
    }

    fn eos(&mut self) -> Result<bool> {
        if !self.rest().is_empty() {
            return Ok(false);
        }
        if self.interpolated {
            return Err(self.error(
                ErrorKind::NoEndBracket,
                "End of line was reached with no closing bracket for interpolation.",
            ));
        }
        let pos = self.position();
        let open = self.indent_stack.iter().filter(|width| **width > 0).count();
        for _ in 0..open {
            self.tokens.push(Token::new(TokenKind::Outdent, pos));
        }
        self.push(TokenKind::Eos);
        self.ended = true;
        Ok(true)
    }

    fn end_interpolation(&mut self) -> bool {
        if self.interpolated && self.rest().starts_with(']') {
            self.consume(1);
            self.ended = true;
            return true;
        }
        false
    }

    /// Keywords that must stand alone on their line.
    fn keyword_line(&mut self, re: &Regex, kind: TokenKind) -> bool {
        match self.scan_end_of_line(re) {
            Some((pos, _)) => {
                self.tokens.push(Token::new(kind, pos));
                true
            }
            None => false,
        }
    }

    fn punctuation(&mut self, re: &Regex, kind: TokenKind) -> bool {
        match self.scan(re) {
            Some((pos, _)) => {
                self.tokens.push(Token::new(kind, pos));
                true
            }
            None => false,
        }
    }

    fn doctype(&mut self) -> bool {
        match self.scan_end_of_line(&DOCTYPE) {
            Some((pos, val)) => {
                let val = val.unwrap_or_default();
                self.tokens.push(Token::new(TokenKind::Doctype { val }, pos));
                true
            }
            None => false,
        }
    }

    fn interpolation(&mut self) -> Result<bool> {
        if !self.rest().starts_with("#{") {
            return Ok(false);
        }
        let range = self.bracket_expression(1)?;
        self.consume(range.end + 1);
        self.push(TokenKind::Interpolation { val: range.src.clone() });
        self.increment_column(2);
        self.assert_expression(&range.src, self.position())?;
        self.skip_over(&range.src);
        self.increment_column(1);
        Ok(true)
    }

    fn case(&mut self) -> Result<bool> {
        if let Some((pos, val)) = self.scan_end_of_line(&CASE) {
            let val = val.unwrap_or_default();
            let base = Position::new(self.lineno, self.colno - val.chars().count());
            self.assert_expression(&val, base)?;
            self.tokens.push(Token::new(TokenKind::Case { val }, pos));
            return Ok(true);
        }
        if CASE_WORD.is_match(self.rest()) {
            return Err(self.error(ErrorKind::NoCaseExpression, "missing expression for case"));
        }
        Ok(false)
    }

    fn when(&mut self) -> Result<bool> {
        if let Some((pos, val)) = self.scan_end_of_line(&WHEN) {
            let mut val = val.unwrap_or_default();
            // `when 'a:b'` stops at the colon; pull the rest back in while
            // the expression is still open
            loop {
                let state = scanner::parse(&val, None, 0, None).map_err(|e| self.scan_error(e, None))?;
                if !(state.is_nesting(false) || state.is_string()) {
                    break;
                }
                let Some(m) = WHEN_CONTINUATION.find(self.rest()) else {
                    break;
                };
                let continuation = m.as_str().to_string();
                self.consume(continuation.len());
                self.increment_column(continuation.chars().count());
                val.push_str(&continuation);
            }
            let base = Position::new(self.lineno, self.colno - val.chars().count());
            self.assert_expression(&val, base)?;
            self.tokens.push(Token::new(TokenKind::When { val }, pos));
            return Ok(true);
        }
        if WHEN_WORD.is_match(self.rest()) {
            return Err(self.error(ErrorKind::NoWhenExpression, "missing expression for when"));
        }
        Ok(false)
    }

    fn default(&mut self) -> Result<bool> {
        if self.keyword_line(&DEFAULT, TokenKind::Default) {
            return Ok(true);
        }
        if DEFAULT_WORD.is_match(self.rest()) {
            return Err(self.error(ErrorKind::DefaultWithExpression, "default should not have an expression"));
        }
        Ok(false)
    }

    fn extends(&mut self) -> Result<bool> {
        if let Some(m) = EXTENDS.find(self.rest()) {
            let len = m.len();
            let next = self.rest()[len..].chars().next();
            if matches!(next, None | Some(' ') | Some('\n')) {
                let pos = self.position();
                self.consume(len);
                self.increment_column(len);
                self.tokens.push(Token::new(TokenKind::Extends, pos));
                if !self.call(Rule::Path)? {
                    return Err(self.error(ErrorKind::NoExtendsPath, "missing path for extends"));
                }
                return Ok(true);
            }
        }
        if EXTENDS_WORD.is_match(self.rest()) {
            return Err(self.error(ErrorKind::MalformedExtends, "malformed extends"));
        }
        Ok(false)
    }

    /// `block name`, `append name` and `prepend name`. A trailing `//`
    /// comment is left in the input for the comment rule.
    fn named_block(&mut self, re: &Regex, mode: BlockMode) -> bool {
        let Some(caps) = re.captures(self.rest()) else {
            return false;
        };
        let (Some(whole), Some(raw)) = (caps.get(0), caps.get(1)) else {
            return false;
        };
        let (name, consumed) = match raw.as_str().find("//") {
            Some(idx) => (raw.as_str()[..idx].trim().to_string(), raw.start() + idx),
            None => (raw.as_str().trim().to_string(), whole.end()),
        };
        if name.is_empty() {
            return false;
        }
        let width = self.rest()[..consumed].chars().count();
        let pos = self.position();
        self.consume(consumed);
        self.increment_column(width);
        self.tokens.push(Token::new(TokenKind::Block { val: name, mode }, pos));
        true
    }

    fn include(&mut self) -> Result<bool> {
        let rest = self.rest();
        if rest.starts_with("include") && matches!(rest[7..].chars().next(), None | Some(':' | ' ' | '\n')) {
            let pos = self.position();
            self.consume(7);
            self.increment_column(7);
            self.tokens.push(Token::new(TokenKind::Include, pos));
            while self.call(Rule::Filter { in_include: true })? {}
            if !self.call(Rule::Path)? {
                if NOT_A_PATH.is_match(self.rest()) {
                    return Err(self.fail());
                }
                return Err(self.error(ErrorKind::NoIncludePath, "missing path for include"));
            }
            return Ok(true);
        }
        if INCLUDE_WORD.is_match(rest) {
            return Err(self.error(ErrorKind::MalformedInclude, "malformed include"));
        }
        Ok(false)
    }

    fn path(&mut self) -> bool {
        match self.scan_end_of_line(&PATH) {
            Some((pos, Some(val))) if !val.trim().is_empty() => {
                let val = val.trim().to_string();
                self.tokens.push(Token::new(TokenKind::Path { val }, pos));
                true
            }
            _ => false,
        }
    }

    fn mixin(&mut self) -> bool {
        let Some(caps) = MIXIN.captures(self.rest()) else {
            return false;
        };
        let whole = caps[0].to_string();
        let val = caps[1].to_string();
        let args = caps.get(2).map(|m| m.as_str().to_string()).filter(|a| !a.is_empty());
        let pos = self.position();
        self.consume(whole.len());
        self.increment_column(whole.chars().count());
        self.tokens.push(Token::new(TokenKind::Mixin { val, args }, pos));
        true
    }

    fn mixin_call(&mut self) -> Result<bool> {
        let Some(caps) = CALL.captures(self.rest()) else {
            return Ok(false);
        };
        let whole = caps[0].to_string();
        let spacing = caps[1].to_string();
        let simple = caps.get(2).map(|m| m.as_str().to_string());
        let pos = self.position();

        let val = match simple {
            Some(name) => {
                self.consume(whole.len());
                self.increment_column(whole.chars().count());
                name
            }
            None => {
                let range = self.bracket_expression(2 + spacing.len())?;
                let consumed = self.rest()[..range.end + 1].to_string();
                self.consume(consumed.len());
                let base = Position::new(self.lineno, self.colno + 2 + spacing.chars().count());
                self.assert_expression(&range.src, base)?;
                self.skip_over(&consumed);
                format!("#{{{}}}", range.src)
            }
        };

        let mut args = None;
        if let Some(m) = CALL_ARGS.find(self.rest()) {
            let open = m.len() - 1;
            let range = self.bracket_expression(open)?;
            // `+foo(class="x")` is an attribute list, not arguments
            if !CALL_ATTRS.is_match(&range.src) {
                self.consume(range.end + 1);
                self.increment_column(open + 1);
                let base = Position::new(self.lineno, self.colno - 1);
                self.assert_expression(&format!("[{}]", range.src), base)?;
                self.skip_over(&range.src);
                self.increment_column(1);
                args = Some(range.src);
            }
        }

        self.tokens.push(Token::new(TokenKind::Call { val, args }, pos));
        Ok(true)
    }

    fn conditional(&mut self) -> Result<bool> {
        let Some(caps) = CONDITIONAL.captures(self.rest()) else {
            return Ok(false);
        };
        let whole = caps[0].to_string();
        let keyword = caps[1].to_string();
        let tail = caps[2].to_string();
        let js = tail.trim().to_string();
        let pos = self.position();
        let base = Position::new(
            self.lineno,
            self.colno + keyword.chars().count() + (tail.chars().count() - tail.trim_start().chars().count()),
        );
        self.consume(whole.len());
        self.increment_column(whole.chars().count());

        let kind = match keyword.as_str() {
            "if" => {
                self.assert_expression(&js, base)?;
                TokenKind::If { val: js }
            }
            "unless" => {
                self.assert_expression(&js, base)?;
                TokenKind::If { val: format!("!({})", js) }
            }
            "else if" => {
                self.assert_expression(&js, base)?;
                TokenKind::ElseIf { val: js }
            }
            _ => {
                if !js.is_empty() {
                    return Err(self.error_at(
                        ErrorKind::ElseCondition,
                        "`else` cannot have a condition, perhaps you meant `else if`",
                        pos,
                    ));
                }
                TokenKind::Else { val: js }
            }
        };
        self.tokens.push(Token::new(kind, pos));
        Ok(true)
    }

    fn while_loop(&mut self) -> Result<bool> {
        if let Some(caps) = WHILE.captures(self.rest()) {
            let whole = caps[0].to_string();
            let val = caps[1].to_string();
            let pos = self.position();
            let base = Position::new(self.lineno, self.colno + whole.chars().count() - val.chars().count());
            self.consume(whole.len());
            self.assert_expression(&val, base)?;
            self.increment_column(whole.chars().count());
            self.tokens.push(Token::new(TokenKind::While { val }, pos));
            return Ok(true);
        }
        if WHILE_WORD.is_match(self.rest()) {
            return Err(self.error(ErrorKind::NoWhileExpression, "missing expression for while"));
        }
        Ok(false)
    }

    fn each(&mut self) -> Result<bool> {
        if let Some(caps) = EACH.captures(self.rest()) {
            let whole = caps[0].to_string();
            let val = caps[1].to_string();
            let key = caps.get(2).map(|m| m.as_str().to_string());
            let code = caps[3].to_string();
            let pos = self.position();
            self.consume(whole.len());
            self.increment_column(whole.chars().count() - code.chars().count());
            self.assert_expression(&code, self.position())?;
            self.increment_column(code.chars().count());
            self.tokens.push(Token::new(TokenKind::Each { val, key, code }, pos));
            return Ok(true);
        }
        if EACH_WORD.is_match(self.rest()) {
            return Err(self.error(ErrorKind::MalformedEach, "malformed each"));
        }
        if DASHED_EACH.is_match(self.rest()) {
            return Err(self.error(
                ErrorKind::MalformedEach,
                "Pug each and for should no longer be prefixed with a dash (\"-\"). They are pug keywords and not part of JavaScript.",
            ));
        }
        Ok(false)
    }

    fn tag(&mut self) -> bool {
        let Some(m) = TAG.find(self.rest()) else {
            return false;
        };
        let val = m.as_str().to_string();
        let pos = self.position();
        self.consume(val.len());
        self.increment_column(val.chars().count());
        self.tokens.push(Token::new(TokenKind::Tag { val }, pos));
        true
    }

    fn filter(&mut self, in_include: bool) -> Result<bool> {
        let Some((pos, Some(val))) = self.scan(&FILTER) else {
            return Ok(false);
        };
        self.increment_column(val.chars().count());
        self.tokens.push(Token::new(TokenKind::Filter { val }, pos));
        self.call(Rule::Attrs)?;
        if !in_include {
            self.interpolation_allowed = false;
            self.call(Rule::PipelessText { indents: None })?;
        }
        Ok(true)
    }

    fn block_code(&mut self) -> Result<bool> {
        if !self.keyword_line(&BLOCK_CODE, TokenKind::Blockcode) {
            return Ok(false);
        }
        self.interpolation_allowed = false;
        self.call(Rule::PipelessText { indents: None })?;
        Ok(true)
    }

    fn code(&mut self) -> Result<bool> {
        let Some(caps) = CODE.captures(self.rest()) else {
            return Ok(false);
        };
        let whole = caps[0].to_string();
        let flags = caps[1].to_string();
        let mut code = caps[2].to_string();
        let prefix_width = whole.chars().count() - code.chars().count();
        let mut shortened = 0;
        if self.interpolated {
            // inside `#[...]` the code ends at the closing bracket
            match scanner::parse_until(&code, Delimiter::Literal("]"), UntilOptions::default()) {
                Ok(range) => {
                    shortened = code.len() - range.end;
                    code = range.src;
                }
                Err(err) => {
                    let before = code[..err.index().min(code.len())].chars().count();
                    self.increment_column(prefix_width + before);
                    return Err(self.scan_error(err, None));
                }
            }
        }
        self.consume(whole.len() - shortened);
        let must_escape = flags.starts_with('=');
        let buffer = must_escape || flags[1..].starts_with('=');
        let pos = self.position();
        self.increment_column(prefix_width);
        if buffer {
            self.assert_expression(&code, self.position())?;
        }
        self.increment_column(code.chars().count());
        self.tokens.push(Token::new(TokenKind::Code { val: code, must_escape, buffer }, pos));
        Ok(true)
    }

    fn id(&mut self) -> Result<bool> {
        if let Some((pos, Some(val))) = self.scan(&ID) {
            self.increment_column(val.chars().count());
            self.tokens.push(Token::new(TokenKind::Id { val }, pos));
            return Ok(true);
        }
        if self.rest().starts_with('#') {
            let name = BAD_NAME.find(&self.rest()[1..]).map(|m| m.as_str()).unwrap_or("");
            return Err(self.error(ErrorKind::InvalidId, format!("\"{}\" is not a valid ID.", name)));
        }
        Ok(false)
    }

    fn dot(&mut self) -> Result<bool> {
        if !self.keyword_line(&DOT, TokenKind::Dot) {
            return Ok(false);
        }
        self.call(Rule::PipelessText { indents: None })?;
        Ok(true)
    }

    fn class_name(&mut self) -> Result<bool> {
        if let Some((pos, Some(val))) = self.scan(&CLASS) {
            self.increment_column(val.chars().count());
            self.tokens.push(Token::new(TokenKind::Class { val }, pos));
            return Ok(true);
        }
        let Some(after) = self.rest().strip_prefix('.') else {
            return Ok(false);
        };
        if after.starts_with('-') {
            return Err(self.error(
                ErrorKind::InvalidClassName,
                "If a class name begins with a \"-\" or \"--\", it must be followed by a letter or underscore.",
            ));
        }
        if after.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(self.error(
                ErrorKind::InvalidClassName,
                "Class names must begin with \"-\", \"_\" or a letter.",
            ));
        }
        let name = BAD_NAME.find(after).map(|m| m.as_str()).unwrap_or("");
        Err(self.error(
            ErrorKind::InvalidClassName,
            format!(
                "\"{}\" is not a valid class name.  Class names must begin with \"-\", \"_\" or a letter and can only contain \"_\", \"-\", a-z and 0-9.",
                name
            ),
        ))
    }

    fn attrs(&mut self) -> Result<bool> {
        if !self.rest().starts_with('(') {
            return Ok(false);
        }
        let starting_line = self.lineno;
        self.push(TokenKind::StartAttributes);
        let index = self.bracket_expression(0)?.end;
        let body = self.rest()[1..index].to_string();
        self.increment_column(1);
        self.assert_nesting_correct(&body)?;
        self.consume(index + 1);

        let chars: Vec<char> = body.chars().collect();
        let len = chars.len();
        let is_whitespace = |c: char| matches!(c, ' ' | '\n' | '\t');

        let mut quote = '"';
        let mut escaped_attr = true;
        let mut key = String::new();
        let mut val = String::new();
        let mut state = scanner::State::new();
        let mut lineno = starting_line;
        let mut colno_begin_attr = self.colno;
        let mut colno_begin_val = self.colno;
        let mut loc = AttrLoc::Key;

        let mut i = 0;
        while i <= len {
            // does the attribute end at `i`?
            let ends = if key.trim().is_empty() {
                colno_begin_attr = self.colno;
                false
            } else if i == len {
                true
            } else {
                match loc {
                    AttrLoc::Key => {
                        let next = chars[i..].iter().copied().find(|c| !is_whitespace(*c));
                        if is_whitespace(chars[i]) && next.is_some() {
                            !matches!(next, Some('=' | '!' | ','))
                        } else {
                            chars[i] == ','
                        }
                    }
                    AttrLoc::Value if state.is_nesting(false) || state.is_string() => false,
                    AttrLoc::Value => {
                        let next = chars[i..].iter().copied().find(|c| !is_whitespace(*c));
                        match next {
                            Some(next) if is_whitespace(chars[i]) => {
                                (!scanner::is_punctuator(Some(next)) || next == '"' || next == '\'' || next == ':')
                                    && self.is_expression(&val)
                            }
                            _ => chars[i] == ',' && self.is_expression(&val),
                        }
                    }
                    AttrLoc::KeyChar => false,
                }
            };

            if ends {
                if !val.trim().is_empty() {
                    self.assert_expression(&val, Position::new(self.lineno, colno_begin_val))?;
                }
                let name = strip_quotes(key.trim()).to_string();
                let value = val.trim();
                let value = if value.is_empty() {
                    AttributeValue::True
                } else {
                    AttributeValue::Expression(value.to_string())
                };
                self.tokens.push(Token::new(
                    TokenKind::Attribute { name, val: value, must_escape: escaped_attr },
                    Position::new(self.lineno, colno_begin_attr),
                ));
                key.clear();
                val.clear();
                loc = AttrLoc::Key;
                escaped_attr = false;
                self.lineno = lineno;
            } else if i < len {
                let ch = chars[i];
                match loc {
                    AttrLoc::KeyChar => {
                        if ch == quote {
                            loc = AttrLoc::Key;
                            if let Some(next) = chars.get(i + 1)
                                && !matches!(next, ' ' | ',' | '!' | '=' | '\n' | '\t')
                            {
                                return Err(self.error(
                                    ErrorKind::InvalidKeyCharacter,
                                    format!(
                                        "Unexpected character \"{}\" expected ` `, `\\n`, `\\t`, `,`, `!` or `=`",
                                        next
                                    ),
                                ));
                            }
                        } else {
                            key.push(ch);
                        }
                    }
                    AttrLoc::Key => {
                        if key.is_empty() && (ch == '"' || ch == '\'') {
                            loc = AttrLoc::KeyChar;
                            quote = ch;
                        } else if ch == '!' || ch == '=' {
                            escaped_attr = ch != '!';
                            if ch == '!' {
                                self.increment_column(1);
                                i += 1;
                            }
                            if chars.get(i) != Some(&'=') {
                                let found = chars.get(i).map(|c| c.to_string()).unwrap_or_default();
                                return Err(self.error(
                                    ErrorKind::InvalidKeyCharacter,
                                    format!("Unexpected character {} expected `=`", found),
                                ));
                            }
                            loc = AttrLoc::Value;
                            colno_begin_val = self.colno + 1;
                            state = scanner::State::new();
                        } else {
                            key.push(ch);
                        }
                    }
                    AttrLoc::Value => {
                        state.push_char(ch).map_err(|e| self.scan_error(e, None))?;
                        val.push(ch);
                    }
                }
            }

            match chars.get(i) {
                Some('\n') => {
                    // the attribute keeps the line it started on
                    lineno += 1;
                    self.colno = 1;
                    if key.trim().is_empty() {
                        self.lineno = lineno;
                    }
                }
                Some(_) => self.increment_column(1),
                None => {}
            }
            i += 1;
        }

        self.lineno = starting_line + body.matches('\n').count();
        self.push(TokenKind::EndAttributes);
        self.increment_column(1);
        Ok(true)
    }

    fn attributes_block(&mut self) -> Result<bool> {
        if !ATTRIBUTES_BLOCK.is_match(self.rest()) {
            return Ok(false);
        }
        const KEYWORD: usize = "&attributes".len();
        self.consume(KEYWORD);
        let pos = self.position();
        self.increment_column(KEYWORD);
        let range = self.bracket_expression(0)?;
        let consumed = self.rest()[..range.end + 1].to_string();
        self.consume(consumed.len());
        self.tokens.push(Token::new(TokenKind::AndAttributes { val: range.src }, pos));
        self.skip_over(&consumed);
        Ok(true)
    }

    fn indent(&mut self) -> Result<bool> {
        let Some(indents) = self.scan_indentation() else {
            return Ok(false);
        };
        self.increment_line(1);
        self.consume(indents + 1);

        if self.rest().starts_with([' ', '\t']) {
            return Err(self.error(
                ErrorKind::InvalidIndentation,
                "Invalid indentation, you can use tabs or spaces but not both",
            ));
        }

        // blank line
        if self.rest().starts_with('\n') {
            self.interpolation_allowed = true;
            return Ok(true);
        }

        let top = self.current_indent();
        if indents < top {
            while self.current_indent() > indents {
                let outer = self.indent_stack[self.indent_stack.len() - 2];
                if outer < indents {
                    return Err(self.error(
                        ErrorKind::InconsistentIndentation,
                        format!(
                            "Inconsistent indentation. Expecting either {} or {} spaces/tabs.",
                            outer,
                            self.current_indent()
                        ),
                    ));
                }
                self.colno = outer + 1;
                self.push(TokenKind::Outdent);
                self.indent_stack.pop();
            }
        } else if indents > 0 && indents != top {
            self.push(TokenKind::Indent { val: indents });
            self.colno = 1 + indents;
            self.indent_stack.push(indents);
        } else {
            self.push(TokenKind::Newline);
            self.colno = 1 + top;
        }

        self.interpolation_allowed = true;
        Ok(true)
    }

    fn current_indent(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    /// Text block after `.`, a comment, `-` or a filter: every following
    /// line indented deeper than the current level.
    fn pipeless_text(&mut self, indents: Option<usize>) -> Result<bool> {
        while self.call(Rule::Blank)? {}

        let captured = self.scan_indentation();
        let Some(indents) = indents.filter(|n| *n > 0).or(captured) else {
            return Ok(false);
        };
        if indents <= self.current_indent() {
            return Ok(false);
        }

        self.push(TokenKind::StartPipelessText);
        let mut lines: Vec<String> = Vec::new();
        // offset into rest(); consumption waits until the block is known
        let mut ptr = 0;
        loop {
            let rest = self.rest();
            let body = &rest[ptr + 1..];
            let line = &body[..body.find('\n').unwrap_or(body.len())];
            let line_indents = self.line_indentation(line);
            let is_match = line_indents >= indents || line.trim().is_empty();
            if is_match {
                lines.push(line.get(indents..).unwrap_or("").to_string());
                ptr += line.len() + 1;
            } else if line_indents > self.current_indent() {
                // less indented than the first line but still inside the
                // block: lex again with the shallower width
                self.tokens.pop();
                return self.pipeless_text(Some(line_indents));
            }
            if !(is_match && rest.len() > ptr) {
                break;
            }
        }
        self.consume(ptr);
        while self.rest().is_empty() && lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        for (i, line) in lines.into_iter().enumerate() {
            self.increment_line(1);
            if i != 0 {
                self.push(TokenKind::Newline);
            }
            self.increment_column(indents);
            self.add_text(TextKind::Plain, &line, "", false)?;
        }
        self.push(TokenKind::EndPipelessText);
        Ok(true)
    }

    fn text(&mut self) -> Result<bool> {
        let scanned = self
            .scan(&TEXT)
            .or_else(|| self.scan(&TEXT_SPACE))
            .or_else(|| self.scan(&TEXT_PIPE));
        let Some((_, val)) = scanned else {
            return Ok(false);
        };
        self.add_text(TextKind::Plain, &val.unwrap_or_default(), "", false)?;
        Ok(true)
    }

    fn text_html(&mut self) -> Result<bool> {
        let Some((_, val)) = self.scan(&TEXT_HTML) else {
            return Ok(false);
        };
        self.add_text(TextKind::Html, &val.unwrap_or_default(), "", false)?;
        Ok(true)
    }

    fn comment(&mut self) -> Result<bool> {
        let Some(caps) = COMMENT.captures(self.rest()) else {
            return Ok(false);
        };
        let whole = caps[0].to_string();
        let buffer = caps.get(1).is_none();
        let val = caps[2].to_string();
        self.consume(whole.len());
        self.push(TokenKind::Comment { val, buffer });
        self.interpolation_allowed = buffer;
        self.increment_column(whole.chars().count());
        self.call(Rule::PipelessText { indents: None })?;
        Ok(true)
    }

    // === Text ===

    /// Emit text, splitting out `#[...]` tag interpolation and `#{}`/`!{}`
    /// code interpolation. `prefix` is already-unescaped text that belongs
    /// in front of `value`.
    fn add_text(&mut self, kind: TextKind, value: &str, prefix: &str, escaped: bool) -> Result<()> {
        if value.is_empty() && prefix.is_empty() {
            return Ok(());
        }
        const NONE: usize = usize::MAX;
        let index_of_end = if self.interpolated { value.find(']') } else { None }.unwrap_or(NONE);
        let index_of_start = if self.interpolation_allowed { value.find("#[") } else { None }.unwrap_or(NONE);
        let index_of_escaped = if self.interpolation_allowed { value.find("\\#[") } else { None }.unwrap_or(NONE);
        let string_interp = if self.interpolation_allowed {
            STRING_INTERPOLATION.captures(value)
        } else {
            None
        };
        let index_of_string_interp = string_interp.as_ref().and_then(|c| c.get(0)).map_or(NONE, |m| m.start());

        if index_of_escaped != NONE
            && index_of_escaped < index_of_end
            && index_of_escaped < index_of_start
            && index_of_escaped < index_of_string_interp
        {
            let prefix = format!("{}{}#[", prefix, &value[..index_of_escaped]);
            return self.add_text(kind, &value[index_of_escaped + 3..], &prefix, true);
        }

        if index_of_start != NONE
            && index_of_start < index_of_end
            && index_of_start < index_of_escaped
            && index_of_start < index_of_string_interp
        {
            let before = format!("{}{}", prefix, &value[..index_of_start]);
            let width = before.chars().count();
            self.push(kind.token(before));
            self.increment_column(width);
            if escaped {
                self.increment_column(1);
            }
            self.push(TokenKind::StartPugInterpolation);
            self.increment_column(2);

            let mut child = self.child(&value[index_of_start + 2..])?;
            while !child.ended {
                child.call(Rule::Advance)?;
            }
            self.colno = child.colno;
            let remainder = child.rest().to_string();
            self.tokens.append(&mut child.tokens);
            self.push(TokenKind::EndPugInterpolation);
            self.increment_column(1);
            return self.add_text(kind, &remainder, "", false);
        }

        if index_of_end != NONE
            && index_of_end < index_of_start
            && index_of_end < index_of_escaped
            && index_of_end < index_of_string_interp
        {
            if !prefix.is_empty() || index_of_end > 0 {
                self.add_text(kind, &value[..index_of_end], prefix, false)?;
            }
            // hand the rest of the line back for the parent lexer
            self.ended = true;
            self.input = format!("{}{}", &value[index_of_end + 1..], self.rest());
            self.pos = 0;
            return Ok(());
        }

        if let Some(caps) = string_interp {
            let start = index_of_string_interp;
            let sigil = &caps[2];
            let body = caps.get(3).map_or("", |m| m.as_str());
            if caps.get(1).is_some() {
                // `\#{` and `\!{` are literal
                let prefix = format!("{}{}{}{{", prefix, &value[..start], sigil);
                return self.add_text(kind, &value[start + 3..], &prefix, false);
            }

            let before = format!("{}{}", prefix, &value[..start]);
            if !before.is_empty() {
                let width = before.chars().count();
                self.push(kind.token(before));
                self.increment_column(width);
            }

            let pos = self.position();
            self.increment_column(2);
            let range = match scanner::parse_until(body, Delimiter::Literal("}"), UntilOptions::default()) {
                Ok(range) => range,
                Err(ScanError::EndOfStringReached { .. }) => {
                    return Err(self.error_at(
                        ErrorKind::NoEndBracket,
                        "End of line was reached with no closing bracket for interpolation.",
                        pos,
                    ));
                }
                Err(err) => {
                    self.increment_column(body[..err.index()].chars().count());
                    return Err(self.scan_error(err, None));
                }
            };
            self.assert_expression(&range.src, self.position())?;
            self.tokens.push(Token::new(
                TokenKind::InterpolatedCode {
                    val: range.src.clone(),
                    must_escape: sigil == "#",
                    buffer: true,
                },
                pos,
            ));

            if range.end + 1 < body.len() {
                self.increment_column(body[..range.end + 1].chars().count());
                let rest = body[range.end + 1..].to_string();
                return self.add_text(kind, &rest, "", false);
            }
            self.increment_column(body.chars().count());
            return Ok(());
        }

        let value = format!("{}{}", prefix, value);
        let width = value.chars().count();
        self.push(kind.token(value));
        self.increment_column(width);
        Ok(())
    }
}

fn strip_quotes(key: &str) -> &str {
    let key = key.strip_prefix(['"', '\'']).unwrap_or(key);
    key.strip_suffix(['"', '\'']).unwrap_or(key)
}

/// Lex a complete template.
pub fn lex(source: &str, filename: Option<Arc<str>>, validator: &dyn ExpressionValidator) -> Result<Vec<Token>> {
    Lexer::new(source, filename, validator).get_tokens()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{AcceptAll, JavaScript};

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source, None, &AcceptAll).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn names(source: &str) -> Vec<&'static str> {
        lex(source, None, &AcceptAll).unwrap().iter().map(|t| t.name()).collect()
    }

    fn error(source: &str) -> CompileError {
        lex(source, None, &JavaScript::new()).unwrap_err()
    }

    #[test]
    fn test_nested_tags() {
        assert_eq!(
            kinds("div\n  p Hello"),
            vec![
                TokenKind::Tag { val: "div".into() },
                TokenKind::Indent { val: 2 },
                TokenKind::Tag { val: "p".into() },
                TokenKind::Text { val: "Hello".into() },
                TokenKind::Outdent,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn test_positions_are_one_based() {
        let tokens = lex("div\n  p Hello", None, &AcceptAll).unwrap();
        assert_eq!(tokens[0].pos, Position::new(1, 1));
        assert_eq!(tokens[2].pos, Position::new(2, 3));
        assert_eq!(tokens[3].pos, Position::new(2, 5));
    }

    #[test]
    fn test_selectors_and_attributes() {
        assert_eq!(
            names("a.btn#go(href='/x', disabled)"),
            vec!["tag", "class", "id", "start-attributes", "attribute", "attribute", "end-attributes", "eos"]
        );
        let tokens = kinds("a(href='/x' title=\"a,b\" data-x=f(a, b))");
        let attrs: Vec<_> = tokens
            .iter()
            .filter_map(|k| match k {
                TokenKind::Attribute { name, val, .. } => Some((name.as_str(), val.as_js())),
                _ => None,
            })
            .collect();
        assert_eq!(attrs, vec![("href", "'/x'"), ("title", "\"a,b\""), ("data-x", "f(a, b)")]);
    }

    #[test]
    fn test_attribute_escaping_flags() {
        let tokens = kinds("p(a!='<b>' b c='x')");
        let flags: Vec<_> = tokens
            .iter()
            .filter_map(|k| match k {
                TokenKind::Attribute { name, must_escape, .. } => Some((name.as_str(), *must_escape)),
                _ => None,
            })
            .collect();
        assert_eq!(flags, vec![("a", false), ("b", false), ("c", true)]);
    }

    #[test]
    fn test_text_interpolation() {
        assert_eq!(
            kinds("p Hi #{name}!"),
            vec![
                TokenKind::Tag { val: "p".into() },
                TokenKind::Text { val: "Hi ".into() },
                TokenKind::InterpolatedCode { val: "name".into(), must_escape: true, buffer: true },
                TokenKind::Text { val: "!".into() },
                TokenKind::Eos,
            ]
        );
        assert_eq!(
            kinds("p \\#{a} \\!{b}"),
            vec![TokenKind::Tag { val: "p".into() }, TokenKind::Text { val: "#{a} !{b}".into() }, TokenKind::Eos]
        );
    }

    #[test]
    fn test_tag_interpolation_splices_child_tokens() {
        assert_eq!(
            names("p a #[b c] d"),
            vec![
                "tag",
                "text",
                "start-pug-interpolation",
                "tag",
                "text",
                "end-pug-interpolation",
                "text",
                "eos"
            ]
        );
    }

    #[test]
    fn test_empty_text_makes_no_token() {
        assert_eq!(names("|"), vec!["eos"]);
        assert_eq!(
            names("p #[b]"),
            vec!["tag", "text", "start-pug-interpolation", "tag", "end-pug-interpolation", "eos"]
        );
        assert_eq!(
            kinds("p\n  |\n  | a"),
            vec![
                TokenKind::Tag { val: "p".into() },
                TokenKind::Indent { val: 2 },
                TokenKind::Newline,
                TokenKind::Text { val: "a".into() },
                TokenKind::Outdent,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn test_interpolation_depth_is_capped() {
        let mut source = String::from("p ");
        for _ in 0..(MAX_INTERPOLATION_DEPTH + 1) {
            source.push_str("#[b ");
        }
        for _ in 0..(MAX_INTERPOLATION_DEPTH + 1) {
            source.push(']');
        }
        let err = lex(&source, None, &AcceptAll).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InterpolationTooDeep);
    }

    #[test]
    fn test_pipeless_text() {
        assert_eq!(
            kinds("p.\n  one\n    two\nhr"),
            vec![
                TokenKind::Tag { val: "p".into() },
                TokenKind::Dot,
                TokenKind::StartPipelessText,
                TokenKind::Text { val: "one".into() },
                TokenKind::Newline,
                TokenKind::Text { val: "  two".into() },
                TokenKind::EndPipelessText,
                TokenKind::Newline,
                TokenKind::Tag { val: "hr".into() },
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("unless a\n  p\nelse\n  i"),
            vec![
                TokenKind::If { val: "!(a)".into() },
                TokenKind::Indent { val: 2 },
                TokenKind::Tag { val: "p".into() },
                TokenKind::Outdent,
                TokenKind::Else { val: String::new() },
                TokenKind::Indent { val: 2 },
                TokenKind::Tag { val: "i".into() },
                TokenKind::Outdent,
                TokenKind::Eos,
            ]
        );
        assert_eq!(
            kinds("each v, k in list")[0],
            TokenKind::Each { val: "v".into(), key: Some("k".into()), code: "list".into() }
        );
        assert_eq!(
            kinds("append scripts // trailing")[..2],
            [
                TokenKind::Block { val: "scripts".into(), mode: BlockMode::Append },
                TokenKind::Comment { val: " trailing".into(), buffer: true },
            ]
        );
        assert_eq!(kinds("+item(1, 2)")[0], TokenKind::Call { val: "item".into(), args: Some("1, 2".into()) });
    }

    #[test]
    fn test_when_reabsorbs_colons_inside_strings() {
        assert_eq!(kinds("case x\n  when 'a:b'\n    p")[2], TokenKind::When { val: "'a:b'".into() });
    }

    #[test]
    fn test_code() {
        assert_eq!(
            kinds("!= raw\n- var a = 1")[..3],
            [
                TokenKind::Code { val: "raw".into(), must_escape: false, buffer: true },
                TokenKind::Newline,
                TokenKind::Code { val: "var a = 1".into(), must_escape: false, buffer: false },
            ]
        );
    }

    #[test]
    fn test_crlf_and_bom() {
        assert_eq!(names("\u{feff}div\r\n  p\r\n"), vec!["tag", "indent", "tag", "outdent", "eos"]);
    }

    #[test]
    fn test_indentation_errors() {
        assert_eq!(error("div\n    p\n  span").kind, ErrorKind::InconsistentIndentation);
        assert_eq!(error("div\n  p\n\t span").kind, ErrorKind::InvalidIndentation);
    }

    #[test]
    fn test_unterminated_attributes_point_at_bracket() {
        let err = error("div(class=\"a");
        assert_eq!(err.kind, ErrorKind::NoEndBracket);
        assert_eq!((err.line, err.column), (1, 4));
    }

    #[test]
    fn test_lexical_errors() {
        assert_eq!(error("#!x").kind, ErrorKind::InvalidId);
        assert_eq!(error(".1a").kind, ErrorKind::InvalidClassName);
        assert_eq!(error("- each a in b").kind, ErrorKind::MalformedEach);
        assert_eq!(error("else foo").kind, ErrorKind::ElseCondition);
        assert_eq!(error("p= a +").kind, ErrorKind::SyntaxError);
        assert_eq!(error("p #{a").kind, ErrorKind::NoEndBracket);
        assert_eq!(error("case").kind, ErrorKind::NoCaseExpression);
        assert_eq!(error("div(a=[)]").kind, ErrorKind::BracketMismatch);
    }

    #[test]
    fn test_syntax_error_is_remapped() {
        let err = error("p\n  = a +* b");
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert_eq!(err.line, 2);
        assert!(err.column >= 5);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// A tag with optional classes, attributes and inline text.
        fn line() -> impl Strategy<Value = String> {
            let tag = prop::sample::select(vec!["div", "p", "span", "ul", "li", "a", "em"]);
            let classes = prop::collection::vec("[a-z]{1,6}", 0..3);
            let attrs = prop::collection::vec(("[a-z]{1,5}", "[a-z0-9 ]{0,5}"), 0..3);
            let text = prop::option::of("[A-Za-z0-9?,]{1,8}( [A-Za-z0-9]{1,6}){0,3}");
            (tag, classes, attrs, text).prop_map(|(tag, classes, attrs, text)| {
                let mut line = tag.to_string();
                for class in classes {
                    line.push('.');
                    line.push_str(&class);
                }
                if !attrs.is_empty() {
                    let attrs: Vec<String> = attrs.iter().map(|(k, v)| format!("{}='{}'", k, v)).collect();
                    line.push_str(&format!("({})", attrs.join(" ")));
                }
                if let Some(text) = text {
                    line.push(' ');
                    line.push_str(&text);
                }
                line
            })
        }

        /// Lines indented two spaces per level, never deeper than one level
        /// below the previous line.
        fn template() -> impl Strategy<Value = Vec<String>> {
            prop::collection::vec((0..3usize, line()), 1..6).prop_map(|lines| {
                let mut depth = 0;
                lines
                    .into_iter()
                    .enumerate()
                    .map(|(i, (target, line))| {
                        depth = if i == 0 { 0 } else { target.min(depth + 1) };
                        format!("{}{}", "  ".repeat(depth), line)
                    })
                    .collect()
            })
        }

        proptest! {
            #[test]
            fn prop_token_spans_rebuild_lines(lines in template()) {
                let tokens = lex(&lines.join("\n"), None, &JavaScript::new()).unwrap();
                for (i, original) in lines.iter().enumerate() {
                    let mut rebuilt: Vec<char> = Vec::new();
                    for token in tokens.iter().filter(|t| t.pos.line == i + 1) {
                        let text = match &token.kind {
                            TokenKind::Tag { val } | TokenKind::Text { val } => val.clone(),
                            TokenKind::Class { val } => format!(".{}", val),
                            TokenKind::StartAttributes => "(".to_string(),
                            TokenKind::EndAttributes => ")".to_string(),
                            TokenKind::Attribute { name, val, .. } => format!("{}={}", name, val.as_js()),
                            _ => continue,
                        };
                        let start = token.pos.column - 1;
                        let end = start + text.chars().count();
                        if rebuilt.len() < end {
                            rebuilt.resize(end, ' ');
                        }
                        for (offset, ch) in text.chars().enumerate() {
                            rebuilt[start + offset] = ch;
                        }
                    }
                    let rebuilt: String = rebuilt.into_iter().collect();
                    prop_assert_eq!(rebuilt.trim(), original.trim());
                }
            }
        }
    }
}
