//! Incremental classifier for embedded JavaScript.
//!
//! Tracks whether a position is inside a string, comment, regular
//! expression or bracket so the lexer can find the end of an embedded
//! expression without a full JavaScript parser.

use regex::Regex;
use std::fmt;

/// One level of the nesting stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    LineComment,
    BlockComment,
    SingleQuote,
    DoubleQuote,
    TemplateQuote,
    Regexp,
    /// Open bracket, stored as the closer it expects.
    Bracket(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// A closing bracket did not match the innermost open one.
    MismatchedBracket { found: char, index: usize },
    /// Input ended before the delimiter was found outside any nesting.
    EndOfStringReached { index: usize },
}

impl ScanError {
    /// Byte offset of the failing character.
    pub fn index(&self) -> usize {
        match self {
            ScanError::MismatchedBracket { index, .. } => *index,
            ScanError::EndOfStringReached { index } => *index,
        }
    }

    fn at(self, index: usize) -> Self {
        match self {
            ScanError::MismatchedBracket { found, .. } => ScanError::MismatchedBracket { found, index },
            ScanError::EndOfStringReached { .. } => ScanError::EndOfStringReached { index },
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::MismatchedBracket { found, .. } => write!(f, "Mismatched Bracket: {}", found),
            ScanError::EndOfStringReached { .. } => {
                f.write_str("The end of the string was reached with no closing bracket found.")
            }
        }
    }
}

impl std::error::Error for ScanError {}

/// Scanner state after consuming a prefix of some source.
#[derive(Debug, Clone, Default)]
pub struct State {
    stack: Vec<Context>,
    regexp_start: bool,
    escaped: bool,
    has_dollar: bool,
    src: String,
    /// Non-comment characters seen so far; the most recent one is last.
    history: Vec<char>,
    last_char: Option<char>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Context> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Everything consumed so far.
    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn is_string(&self) -> bool {
        matches!(
            self.current(),
            Some(Context::SingleQuote | Context::DoubleQuote | Context::TemplateQuote)
        )
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.current(), Some(Context::LineComment | Context::BlockComment))
    }

    /// True while anything is open. A lone line comment can be ignored.
    pub fn is_nesting(&self, ignore_line_comment: bool) -> bool {
        if ignore_line_comment && self.stack == [Context::LineComment] {
            return false;
        }
        !self.stack.is_empty()
    }

    /// Feed one character.
    pub fn push_char(&mut self, ch: char) -> Result<(), ScanError> {
        self.src.push(ch);
        let was_comment = self.is_comment();
        let last_seen = self.history.last().copied();

        if self.regexp_start {
            if ch == '/' || ch == '*' {
                self.stack.pop();
            }
            self.regexp_start = false;
        }

        match self.current() {
            Some(Context::LineComment) => {
                if ch == '\n' {
                    self.stack.pop();
                }
            }
            Some(Context::BlockComment) => {
                if self.last_char == Some('*') && ch == '/' {
                    self.stack.pop();
                }
            }
            Some(Context::SingleQuote) => self.quoted(ch, '\''),
            Some(Context::DoubleQuote) => self.quoted(ch, '"'),
            Some(Context::Regexp) => self.quoted(ch, '/'),
            Some(Context::TemplateQuote) => {
                if ch == '`' && !self.escaped {
                    self.stack.pop();
                    self.has_dollar = false;
                } else if ch == '\\' && !self.escaped {
                    self.escaped = true;
                    self.has_dollar = false;
                } else if ch == '$' && !self.escaped {
                    self.has_dollar = true;
                } else if ch == '{' && self.has_dollar {
                    self.stack.push(Context::Bracket('}'));
                } else {
                    self.escaped = false;
                    self.has_dollar = false;
                }
            }
            Some(Context::Bracket(_)) | None => self.code_char(ch, last_seen)?,
        }

        if !self.is_comment() && !was_comment {
            self.history.push(ch);
        }
        self.last_char = Some(ch);
        Ok(())
    }

    fn quoted(&mut self, ch: char, terminator: char) {
        if ch == terminator && !self.escaped {
            self.stack.pop();
        } else if ch == '\\' && !self.escaped {
            self.escaped = true;
        } else {
            self.escaped = false;
        }
    }

    fn code_char(&mut self, ch: char, last_seen: Option<char>) -> Result<(), ScanError> {
        match ch {
            '(' => self.stack.push(Context::Bracket(')')),
            '[' => self.stack.push(Context::Bracket(']')),
            '{' => self.stack.push(Context::Bracket('}')),
            ')' | ']' | '}' => {
                if self.current() != Some(Context::Bracket(ch)) {
                    return Err(ScanError::MismatchedBracket { found: ch, index: 0 });
                }
                self.stack.pop();
            }
            '/' if last_seen == Some('/') => {
                self.history.pop();
                self.stack.push(Context::LineComment);
            }
            '*' if last_seen == Some('/') => {
                self.history.pop();
                self.stack.push(Context::BlockComment);
            }
            '/' if is_regex_start(&self.history) => {
                self.stack.push(Context::Regexp);
                // a following `/` or `*` turns this into a comment instead
                self.regexp_start = true;
            }
            '\'' => self.stack.push(Context::SingleQuote),
            '"' => self.stack.push(Context::DoubleQuote),
            '`' => self.stack.push(Context::TemplateQuote),
            _ => {}
        }
        Ok(())
    }
}

/// Feed a single character into `state`.
pub fn parse_char(ch: char, state: &mut State) -> Result<(), ScanError> {
    state.push_char(ch)
}

/// Scan `src[start..end]` into a fresh state (or a supplied one).
pub fn parse(src: &str, state: Option<State>, start: usize, end: Option<usize>) -> Result<State, ScanError> {
    let mut state = state.unwrap_or_default();
    let end = end.unwrap_or(src.len());
    for (offset, ch) in src[start..end].char_indices() {
        state.push_char(ch).map_err(|e| e.at(start + offset))?;
    }
    Ok(state)
}

/// Where `parse_until` stops.
#[derive(Debug, Clone, Copy)]
pub enum Delimiter<'a> {
    Literal(&'a str),
    Pattern(&'a Regex),
}

impl Delimiter<'_> {
    fn matches(&self, rest: &str) -> bool {
        match self {
            Delimiter::Literal(literal) => rest.starts_with(literal),
            Delimiter::Pattern(re) => re.is_match(rest),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UntilOptions {
    pub start: usize,
    pub ignore_nesting: bool,
    pub ignore_line_comment: bool,
}

/// A byte range of the scanned source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub start: usize,
    pub end: usize,
    pub src: String,
}

/// Find the first occurrence of `delimiter` that is not nested.
pub fn parse_until(src: &str, delimiter: Delimiter<'_>, options: UntilOptions) -> Result<Range, ScanError> {
    let mut state = State::new();
    let mut index = options.start;
    while index < src.len() {
        let rest = &src[index..];
        if (options.ignore_nesting || !state.is_nesting(options.ignore_line_comment)) && delimiter.matches(rest) {
            return Ok(Range {
                start: options.start,
                end: index,
                src: src[options.start..index].to_string(),
            });
        }
        let Some(ch) = rest.chars().next() else {
            break;
        };
        state.push_char(ch).map_err(|e| e.at(index))?;
        index += ch.len_utf8();
    }
    Err(ScanError::EndOfStringReached { index })
}

pub fn is_punctuator(ch: Option<char>) -> bool {
    match ch {
        None => true,
        Some(c) => matches!(
            c,
            '.' | '(' | ')' | ';' | ',' | '{' | '}' | '[' | ']' | ':' | '?' | '~' | '%' | '&'
                | '*' | '+' | '-' | '/' | '<' | '>' | '^' | '|' | '!' | '='
        ),
    }
}

pub fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "if" | "in" | "do" | "var" | "for" | "new" | "try" | "let" | "this" | "else" | "case"
            | "void" | "with" | "enum" | "while" | "break" | "catch" | "throw" | "const"
            | "yield" | "class" | "super" | "return" | "typeof" | "delete" | "switch"
            | "export" | "import" | "default" | "finally" | "extends" | "function"
            | "continue" | "debugger" | "package" | "private" | "interface" | "instanceof"
            | "implements" | "protected" | "public" | "static"
    )
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Decide whether a `/` following `history` opens a regular expression
/// rather than a division. `history` is in source order.
pub fn is_regex_start(history: &[char]) -> bool {
    let mut recent = history.iter().rev().copied().skip_while(|c| c.is_whitespace()).peekable();
    let first = recent.peek().copied();
    match first {
        Some(')') => false,
        Some('}') => true,
        c if is_punctuator(c) => true,
        Some(c) if is_word_char(c) => {
            let mut word: Vec<char> = recent.take_while(|c| is_word_char(*c)).collect();
            word.reverse();
            is_keyword(&word.into_iter().collect::<String>())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn history(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_balanced_expression_leaves_empty_stack() {
        let state = parse("foo(bar, [1, 2], {a: 'b)'})", None, 0, None).unwrap();
        assert!(!state.is_nesting(false));
    }

    #[test]
    fn test_open_string_is_nesting() {
        let state = parse("foo('bar", None, 0, None).unwrap();
        assert!(state.is_string());
        assert_eq!(state.depth(), 2);
    }

    #[test]
    fn test_mismatched_bracket_reports_index() {
        let err = parse("foo(]", None, 0, None).unwrap_err();
        assert!(matches!(err, ScanError::MismatchedBracket { found: ']', index: 4 }));
    }

    #[test]
    fn test_parse_until_skips_nested_delimiter() {
        let range = parse_until("foo(')'), bar)", Delimiter::Literal(")"), UntilOptions::default()).unwrap();
        assert_eq!(range.src, "foo(')'), bar");
        assert_eq!(range.end, 13);
    }

    #[test]
    fn test_parse_until_with_start() {
        let src = "(a + (b))rest";
        let options = UntilOptions { start: 1, ..Default::default() };
        let range = parse_until(src, Delimiter::Literal(")"), options).unwrap();
        assert_eq!(range.start, 1);
        assert_eq!(range.src, "a + (b)");
    }

    #[test]
    fn test_parse_until_pattern() {
        let re = Regex::new(r"^\s*\]").unwrap();
        let range = parse_until("a[0] ]", Delimiter::Pattern(&re), UntilOptions::default()).unwrap();
        assert_eq!(range.src, "a[0]");
    }

    #[test]
    fn test_parse_until_end_of_string() {
        let err = parse_until("foo(bar", Delimiter::Literal(")"), UntilOptions::default()).unwrap_err();
        assert_eq!(err, ScanError::EndOfStringReached { index: 7 });
    }

    #[test]
    fn test_line_comment_is_not_history() {
        let state = parse("a // )", None, 0, None).unwrap();
        assert_eq!(state.current(), Some(Context::LineComment));
        assert!(!state.is_nesting(true));
        assert!(state.is_nesting(false));
    }

    #[test]
    fn test_block_comment_closes() {
        let state = parse("a /* ) */ + b", None, 0, None).unwrap();
        assert!(!state.is_nesting(false));
    }

    #[test]
    fn test_regex_with_bracket() {
        let state = parse("x = /[)]/.test(y)", None, 0, None).unwrap();
        assert!(!state.is_nesting(false));
    }

    #[test]
    fn test_division_is_not_regex() {
        let state = parse("(a) / 2", None, 0, None).unwrap();
        assert!(!state.is_nesting(false));
    }

    #[test]
    fn test_template_literal_substitution() {
        let state = parse("`a ${ b }`", None, 0, None).unwrap();
        assert!(!state.is_nesting(false));
        let open = parse("`a ${ b", None, 0, None).unwrap();
        assert_eq!(open.current(), Some(Context::Bracket('}')));
    }

    #[test]
    fn test_is_regex_start() {
        assert!(is_regex_start(&history("")));
        assert!(is_regex_start(&history("x = ")));
        assert!(is_regex_start(&history("return ")));
        assert!(is_regex_start(&history("{}")));
        assert!(!is_regex_start(&history("(a)")));
        assert!(!is_regex_start(&history("foo ")));
        assert!(!is_regex_start(&history("returned")));
    }

    fn balanced() -> impl Strategy<Value = String> {
        let leaf = "[a-z0-9 +.,]{0,6}";
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                inner.clone().prop_map(|s| format!("({})", s)),
                inner.clone().prop_map(|s| format!("[{}]", s)),
                inner.clone().prop_map(|s| format!("{{{}}}", s)),
                (inner.clone(), inner).prop_map(|(a, b)| format!("{}{}", a, b)),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_balanced_inputs_close(src in balanced()) {
            let state = parse(&src, None, 0, None).unwrap();
            prop_assert!(!state.is_nesting(false));
        }

        #[test]
        fn prop_unclosed_opener_reaches_end(src in balanced()) {
            let input = format!("({}", src);
            let result = parse_until(&input, Delimiter::Literal(")"), UntilOptions { start: 1, ..Default::default() });
            prop_assert_eq!(result, Err(ScanError::EndOfStringReached { index: input.len() }));
        }
    }
}
