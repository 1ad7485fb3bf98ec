//! JavaScript expression collaborators.
//!
//! The lexer asks an [`ExpressionValidator`] whether embedded snippets are
//! well-formed, and the code generator asks a [`ConstantEvaluator`] whether
//! an expression can be folded at compile time. [`JavaScript`] implements
//! both on top of tree-sitter.

mod constant;
mod validate;
pub mod value;

use std::fmt;
use std::sync::Mutex;
use tree_sitter::{Parser, Tree};

pub use serde_json::Value;

/// Failure reported by an [`ExpressionValidator`].
///
/// `line` and `column` are 0-based offsets into the validated snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.message, self.line + 1, self.column + 1)
    }
}

impl std::error::Error for ExpressionError {}

pub trait ExpressionValidator: Send + Sync {
    /// Check that `source` is a single JavaScript expression.
    fn validate(&self, source: &str) -> Result<(), ExpressionError>;

    fn is_expression(&self, source: &str) -> bool {
        self.validate(source).is_ok()
    }
}

pub trait ConstantEvaluator: Send + Sync {
    /// Value of `source` when it is a compile-time constant.
    fn evaluate(&self, source: &str) -> Option<Value>;

    fn is_constant(&self, source: &str) -> bool {
        self.evaluate(source).is_some()
    }
}

/// Validator that accepts everything. Useful when expressions are checked
/// elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ExpressionValidator for AcceptAll {
    fn validate(&self, _source: &str) -> Result<(), ExpressionError> {
        Ok(())
    }
}

/// Evaluator that folds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFolding;

impl ConstantEvaluator for NoFolding {
    fn evaluate(&self, _source: &str) -> Option<Value> {
        None
    }
}

/// tree-sitter backed JavaScript expression support.
pub struct JavaScript {
    parser: Mutex<Parser>,
}

impl JavaScript {
    /// # Panics
    ///
    /// If the linked tree-sitter runtime cannot load the JavaScript grammar.
    /// Both come from this crate's lockfile, so a mismatch is a build error
    /// rather than something callers can recover from.
    pub fn new() -> Self {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_javascript::LANGUAGE.into())
            .expect("Failed to load JavaScript grammar");
        Self {
            parser: Mutex::new(parser),
        }
    }

    /// Parse `source` as the body of a parenthesised expression.
    ///
    /// The returned text is the wrapper that was parsed; snippet offsets are
    /// shifted by one column on the first line.
    fn parse_wrapped(&self, source: &str) -> Option<(Tree, String)> {
        let text = format!("({}\n)", source);
        let mut parser = self.parser.lock().ok()?;
        let tree = parser.parse(&text, None)?;
        Some((tree, text))
    }
}

impl Default for JavaScript {
    fn default() -> Self {
        Self::new()
    }
}

/// The expression node a wrapped snippet parsed to, if the wrapper holds
/// exactly one parenthesised expression covering the whole text.
fn wrapped_expression<'t>(tree: &'t Tree, text: &str) -> Option<tree_sitter::Node<'t>> {
    let root = tree.root_node();
    let statements: Vec<_> = named_children(root).collect();
    if statements.len() != 1 {
        return None;
    }
    let statement = statements[0];
    if statement.kind() != "expression_statement" {
        return None;
    }
    let inner = named_children(statement).next()?;
    if inner.kind() != "parenthesized_expression" || inner.start_byte() != 0 || inner.end_byte() != text.len() {
        return None;
    }
    named_children(inner).next()
}

/// Named children, skipping comments.
fn named_children<'t>(node: tree_sitter::Node<'t>) -> impl Iterator<Item = tree_sitter::Node<'t>> {
    (0..node.named_child_count())
        .filter_map(move |i| node.named_child(i))
        .filter(|child| child.kind() != "comment")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grammar_loads() {
        let js = JavaScript::new();
        assert!(js.is_expression("a + b"));
        assert!(!js.is_expression("a +"));
        assert_eq!(js.evaluate("1 + 1"), Some(serde_json::json!(2)));
    }
}
