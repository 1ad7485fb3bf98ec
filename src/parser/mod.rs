pub mod scanner;
pub mod token;
pub mod token_stream;
pub mod tokenizer;
pub mod tree_builder;

pub use token::{Position, Token, TokenKind};
pub use tokenizer::{Lexer, Rule, lex};
pub use tree_builder::TreeBuilder;

use crate::ast::Ast;
use crate::error::Result;
use crate::expr::ExpressionValidator;
use crate::plugin::Plugins;
use std::sync::Arc;

/// Parser trait - converts source code to AST
pub trait Parser {
    fn parse(&self, source: &str) -> Result<Ast>;
}

/// Pug template parser
pub struct PugParser<'a> {
    validator: &'a dyn ExpressionValidator,
    plugins: &'a Plugins,
    filename: Option<Arc<str>>,
}

impl<'a> PugParser<'a> {
    pub fn new(validator: &'a dyn ExpressionValidator, plugins: &'a Plugins) -> Self {
        Self {
            validator,
            plugins,
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: Option<&str>) -> Self {
        self.filename = filename.map(Arc::from);
        self
    }

    pub fn tokenize(&self, source: &str) -> Result<Vec<Token>> {
        Lexer::new(source, self.filename.clone(), self.validator)
            .with_plugins(self.plugins.lexer_hooks())
            .get_tokens()
    }
}

impl Parser for PugParser<'_> {
    fn parse(&self, source: &str) -> Result<Ast> {
        // Tokenize
        let tokens = self.tokenize(source)?;
        tracing::debug!(tokens = tokens.len(), "lexed template");

        // Build AST
        let root = TreeBuilder::new(tokens, self.filename.clone(), self.plugins).build()?;
        Ok(Ast::new(root, Arc::from(source)))
    }
}
