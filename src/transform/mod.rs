mod metadata;
mod mixin_usage;

pub use metadata::TransformMetadata;
pub use mixin_usage::MixinUsagePlugin;

use crate::ast::{Alternate, Ast, Block, ConditionalNode, Node};

/// Visitor trait for AST transformations
pub trait Visitor {
    /// Called before visiting children. Return `false` to skip children.
    fn enter(&mut self, _node: &mut Node, _metadata: &mut TransformMetadata) -> bool {
        true
    }

    /// Called after visiting children.
    fn exit(&mut self, _node: &mut Node, _metadata: &mut TransformMetadata) {}
}

/// Transformer that applies a series of plugins to an AST
pub struct Transformer {
    plugins: Vec<Box<dyn Visitor>>,
    pub metadata: TransformMetadata,
}

impl Transformer {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            metadata: TransformMetadata::new(),
        }
    }

    pub fn add<V: Visitor + 'static>(mut self, visitor: V) -> Self {
        self.plugins.push(Box::new(visitor));
        self
    }

    pub fn transform(&mut self, ast: &mut Ast) -> &TransformMetadata {
        for plugin in &mut self.plugins {
            Self::visit_block(&mut ast.root, plugin.as_mut(), &mut self.metadata);
        }

        &self.metadata
    }

    fn visit_block(block: &mut Block, visitor: &mut dyn Visitor, metadata: &mut TransformMetadata) {
        for node in &mut block.nodes {
            Self::visit_node(node, visitor, metadata);
        }
    }

    fn visit_optional(block: &mut Option<Block>, visitor: &mut dyn Visitor, metadata: &mut TransformMetadata) {
        if let Some(block) = block {
            Self::visit_block(block, visitor, metadata);
        }
    }

    fn visit_node(node: &mut Node, visitor: &mut dyn Visitor, metadata: &mut TransformMetadata) {
        if visitor.enter(node, metadata) {
            // Visit children based on node type
            match node {
                Node::Block(block) => Self::visit_block(block, visitor, metadata),
                Node::NamedBlock(named) => Self::visit_block(&mut named.block, visitor, metadata),
                Node::Tag(tag) => Self::visit_block(&mut tag.block, visitor, metadata),
                Node::InterpolatedTag(tag) => Self::visit_block(&mut tag.block, visitor, metadata),
                Node::Code(code) => Self::visit_optional(&mut code.block, visitor, metadata),
                Node::BlockComment(comment) => Self::visit_block(&mut comment.block, visitor, metadata),
                Node::Each(each) => {
                    Self::visit_block(&mut each.block, visitor, metadata);
                    Self::visit_optional(&mut each.alternate, visitor, metadata);
                }
                Node::While(while_node) => Self::visit_block(&mut while_node.block, visitor, metadata),
                Node::Conditional(conditional) => Self::visit_conditional(conditional, visitor, metadata),
                Node::Case(case) => Self::visit_block(&mut case.block, visitor, metadata),
                Node::When(when) => Self::visit_optional(&mut when.block, visitor, metadata),
                Node::Mixin(mixin) => Self::visit_optional(&mut mixin.block, visitor, metadata),
                Node::Filter(filter) => Self::visit_block(&mut filter.block, visitor, metadata),
                Node::Include(include) => Self::visit_block(&mut include.block, visitor, metadata),
                // Leaf nodes
                Node::Text(_)
                | Node::Comment(_)
                | Node::Doctype(_)
                | Node::MixinBlock(_)
                | Node::YieldBlock(_)
                | Node::IncludeFilter(_)
                | Node::RawInclude(_)
                | Node::Extends(_) => {}
            }
        }
        visitor.exit(node, metadata);
    }

    /// `else if` branches are part of their chain, not separate nodes.
    fn visit_conditional(conditional: &mut ConditionalNode, visitor: &mut dyn Visitor, metadata: &mut TransformMetadata) {
        Self::visit_block(&mut conditional.consequent, visitor, metadata);
        match &mut conditional.alternate {
            Some(Alternate::Conditional(next)) => Self::visit_conditional(next, visitor, metadata),
            Some(Alternate::Block(block)) => Self::visit_block(block, visitor, metadata),
            None => {}
        }
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a transformer with the standard plugins
pub fn standard_plugins() -> Transformer {
    Transformer::new().add(MixinUsagePlugin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Loc, TextNode};

    struct TextCounter(usize);

    impl Visitor for TextCounter {
        fn enter(&mut self, node: &mut Node, _metadata: &mut TransformMetadata) -> bool {
            if let Node::Text(text) = node {
                self.0 += 1;
                text.val = text.val.to_uppercase();
            }
            true
        }
    }

    fn text(val: &str) -> Node {
        Node::Text(TextNode {
            val: val.to_string(),
            is_html: false,
            loc: Loc::default(),
        })
    }

    #[test]
    fn test_visits_else_if_chains() {
        let mut innermost = Block::default();
        innermost.nodes.push(text("c"));
        let mut second = Block::default();
        second.nodes.push(text("b"));
        let mut first = Block::default();
        first.nodes.push(text("a"));
        let chain = ConditionalNode {
            test: "x".to_string(),
            consequent: first,
            alternate: Some(Alternate::Conditional(Box::new(ConditionalNode {
                test: "y".to_string(),
                consequent: second,
                alternate: Some(Alternate::Block(innermost)),
                loc: Loc::default(),
            }))),
            loc: Loc::default(),
        };
        let mut root = Block::default();
        root.nodes.push(Node::Conditional(chain));

        let mut counter = TextCounter(0);
        let mut metadata = TransformMetadata::new();
        Transformer::visit_block(&mut root, &mut counter, &mut metadata);
        assert_eq!(counter.0, 3);
        let Node::Conditional(chain) = &root.nodes[0] else {
            panic!("expected conditional");
        };
        assert!(matches!(&chain.consequent.nodes[0], Node::Text(t) if t.val == "A"));
    }
}
