//! Extension points for the lexer and the tree builder.
//!
//! Lexer hooks are offered every rule before the built-in one runs. Parser
//! hooks are only consulted when the tree builder meets a token it has no
//! production for, and each (context, token kind) pair can be claimed by at
//! most one hook.

use crate::ast::{Block, Node, TagLike};
use crate::error::{CompileError, ErrorKind, Result};
use crate::parser::token::Token;
use crate::parser::tokenizer::{Lexer, Rule};
use crate::parser::tree_builder::TreeBuilder;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Offered each lexer rule before the built-in implementation.
pub trait LexerHook: Send + Sync {
    /// Return `Ok(true)` after consuming input to claim the rule.
    fn rule(&self, rule: Rule, lexer: &mut Lexer<'_>) -> Result<bool>;
}

/// Produces a node for a token `parse_expr` does not recognise.
pub trait ExpressionHook: Send + Sync {
    fn parse(&self, parser: &mut TreeBuilder<'_>) -> Result<Node>;
}

/// Appends nodes to a text run, a text block or a case body.
pub trait NodesHook: Send + Sync {
    /// Return `Ok(false)` to decline, leaving the token unconsumed.
    fn extend(&self, parser: &mut TreeBuilder<'_>, nodes: &mut Block) -> Result<bool>;
}

/// Turns an unexpected token inside `- ` block code into source text.
pub trait BlockCodeHook: Send + Sync {
    fn text(&self, parser: &mut TreeBuilder<'_>, token: &Token) -> Result<Option<String>>;
}

/// Handles an unexpected token while a tag-like node is being built.
pub trait TagHook: Send + Sync {
    fn handle(&self, parser: &mut TreeBuilder<'_>, tag: &mut dyn TagLike) -> Result<bool>;
}

/// Where in the grammar a parser hook applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserContext {
    Expression,
    Text,
    TextBlock,
    Case,
    BlockCode,
    TagAttribute,
    Tag,
}

impl ParserContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserContext::Expression => "expression",
            ParserContext::Text => "text",
            ParserContext::TextBlock => "text-block",
            ParserContext::Case => "case",
            ParserContext::BlockCode => "block-code",
            ParserContext::TagAttribute => "tag-attribute",
            ParserContext::Tag => "tag",
        }
    }
}

impl fmt::Display for ParserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frozen set of hooks shared by every compilation of a pipeline.
#[derive(Default)]
pub struct Plugins {
    lexer: Vec<Box<dyn LexerHook>>,
    expression: HashMap<String, Box<dyn ExpressionHook>>,
    nodes: HashMap<(ParserContext, String), Box<dyn NodesHook>>,
    block_code: HashMap<String, Box<dyn BlockCodeHook>>,
    tags: HashMap<(ParserContext, String), Box<dyn TagHook>>,
    claimed: HashSet<(ParserContext, String)>,
}

impl Plugins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.lexer.is_empty() && self.claimed.is_empty()
    }

    pub fn add_lexer(&mut self, hook: impl LexerHook + 'static) -> &mut Self {
        self.lexer.push(Box::new(hook));
        self
    }

    pub fn add_expression(&mut self, kind: &str, hook: impl ExpressionHook + 'static) -> Result<&mut Self> {
        self.claim(ParserContext::Expression, kind)?;
        self.expression.insert(kind.to_string(), Box::new(hook));
        Ok(self)
    }

    /// `context` must be one of `Text`, `TextBlock` or `Case`.
    pub fn add_nodes(&mut self, context: ParserContext, kind: &str, hook: impl NodesHook + 'static) -> Result<&mut Self> {
        if !matches!(context, ParserContext::Text | ParserContext::TextBlock | ParserContext::Case) {
            return Err(CompileError::unlocated(
                ErrorKind::PluginConflict,
                format!("Context {} does not accept node hooks", context),
            ));
        }
        self.claim(context, kind)?;
        self.nodes.insert((context, kind.to_string()), Box::new(hook));
        Ok(self)
    }

    pub fn add_block_code(&mut self, kind: &str, hook: impl BlockCodeHook + 'static) -> Result<&mut Self> {
        self.claim(ParserContext::BlockCode, kind)?;
        self.block_code.insert(kind.to_string(), Box::new(hook));
        Ok(self)
    }

    /// `context` must be `TagAttribute` or `Tag`.
    pub fn add_tag(&mut self, context: ParserContext, kind: &str, hook: impl TagHook + 'static) -> Result<&mut Self> {
        if !matches!(context, ParserContext::TagAttribute | ParserContext::Tag) {
            return Err(CompileError::unlocated(
                ErrorKind::PluginConflict,
                format!("Context {} does not accept tag hooks", context),
            ));
        }
        self.claim(context, kind)?;
        self.tags.insert((context, kind.to_string()), Box::new(hook));
        Ok(self)
    }

    fn claim(&mut self, context: ParserContext, kind: &str) -> Result<()> {
        if !self.claimed.insert((context, kind.to_string())) {
            return Err(CompileError::unlocated(
                ErrorKind::PluginConflict,
                format!("Multiple plugin handlers found for context \"{}\", token type \"{}\"", context, kind),
            ));
        }
        Ok(())
    }

    pub fn lexer_hooks(&self) -> &[Box<dyn LexerHook>] {
        &self.lexer
    }

    pub fn expression(&self, kind: &str) -> Option<&dyn ExpressionHook> {
        self.expression.get(kind).map(|hook| hook.as_ref())
    }

    pub fn nodes(&self, context: ParserContext, kind: &str) -> Option<&dyn NodesHook> {
        self.nodes.get(&(context, kind.to_string())).map(|hook| hook.as_ref())
    }

    pub fn block_code(&self, kind: &str) -> Option<&dyn BlockCodeHook> {
        self.block_code.get(kind).map(|hook| hook.as_ref())
    }

    pub fn tag(&self, context: ParserContext, kind: &str) -> Option<&dyn TagHook> {
        self.tags.get(&(context, kind.to_string())).map(|hook| hook.as_ref())
    }
}

impl fmt::Debug for Plugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugins")
            .field("lexer", &self.lexer.len())
            .field("claimed", &self.claimed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Skip;

    impl BlockCodeHook for Skip {
        fn text(&self, _parser: &mut TreeBuilder<'_>, _token: &Token) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn test_second_claim_is_a_conflict() {
        let mut plugins = Plugins::new();
        plugins.add_block_code("tag", Skip).unwrap();
        let err = plugins.add_block_code("tag", Skip).err().unwrap();
        assert_eq!(err.kind, ErrorKind::PluginConflict);
        assert!(plugins.add_block_code("class", Skip).is_ok());
    }

    #[test]
    fn test_contexts_are_checked() {
        struct Decline;
        impl NodesHook for Decline {
            fn extend(&self, _parser: &mut TreeBuilder<'_>, _nodes: &mut Block) -> Result<bool> {
                Ok(false)
            }
        }
        let mut plugins = Plugins::new();
        assert!(plugins.add_nodes(ParserContext::Tag, "id", Decline).is_err());
        assert!(plugins.add_nodes(ParserContext::Case, "id", Decline).is_ok());
        assert!(plugins.nodes(ParserContext::Case, "id").is_some());
        assert!(plugins.nodes(ParserContext::Text, "id").is_none());
    }
}
