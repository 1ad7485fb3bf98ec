use super::token::Token;
use std::collections::VecDeque;
use std::fmt;

/// Raised when reading past the last token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfStream;

impl fmt::Display for EndOfStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cannot read past the end of a stream")
    }
}

impl std::error::Error for EndOfStream {}

/// Token queue with lookahead and push-back.
#[derive(Debug, Clone, Default)]
pub struct TokenStream {
    tokens: VecDeque<Token>,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens: tokens.into() }
    }

    pub fn lookahead(&self, index: usize) -> Result<&Token, EndOfStream> {
        self.tokens.get(index).ok_or(EndOfStream)
    }

    pub fn peek(&self) -> Result<&Token, EndOfStream> {
        self.lookahead(0)
    }

    pub fn advance(&mut self) -> Result<Token, EndOfStream> {
        self.tokens.pop_front().ok_or(EndOfStream)
    }

    /// Push a token back so it is the next one read.
    pub fn defer(&mut self, token: Token) {
        self.tokens.push_front(token);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::token::{Position, TokenKind};
    use proptest::prelude::*;

    fn tag(name: &str) -> Token {
        Token::new(TokenKind::Tag { val: name.to_string() }, Position::default())
    }

    #[test]
    fn test_lookahead_and_advance() {
        let mut stream = TokenStream::new(vec![tag("a"), tag("b")]);
        assert_eq!(stream.lookahead(1).unwrap().val(), Some("b"));
        assert_eq!(stream.advance().unwrap().val(), Some("a"));
        assert_eq!(stream.peek().unwrap().val(), Some("b"));
        assert_eq!(stream.lookahead(1), Err(EndOfStream));
    }

    #[test]
    fn test_empty_stream_fails() {
        let mut stream = TokenStream::default();
        assert_eq!(stream.peek(), Err(EndOfStream));
        assert_eq!(stream.advance(), Err(EndOfStream));
    }

    proptest! {
        #[test]
        fn prop_defer_after_advance_restores(names in proptest::collection::vec("[a-z]{1,4}", 1..8)) {
            let tokens: Vec<Token> = names.iter().map(|n| tag(n)).collect();
            let mut stream = TokenStream::new(tokens.clone());
            let first = stream.advance().unwrap();
            stream.defer(first);
            prop_assert_eq!(stream.len(), tokens.len());
            for expected in &tokens {
                prop_assert_eq!(&stream.advance().unwrap(), expected);
            }
        }
    }
}
