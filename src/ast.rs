use crate::parser::token::{AttributeValue, BlockMode, Position};
use serde::Serialize;
use std::sync::Arc;

/// Source location carried by every node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Loc {
    pub line: usize,
    pub column: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<Arc<str>>,
}

impl Loc {
    pub fn new(pos: Position, filename: Option<Arc<str>>) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
            filename,
        }
    }
}

/// Ordered sequence of child nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Block {
    pub nodes: Vec<Node>,
    #[serde(flatten)]
    pub loc: Loc,
}

impl Block {
    pub fn new(loc: Loc) -> Self {
        Self { nodes: Vec::new(), loc }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    pub name: String,
    pub val: AttributeValue,
    pub must_escape: bool,
    #[serde(flatten)]
    pub loc: Loc,
}

/// `&attributes(expr)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeBlock {
    pub val: String,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagNode {
    pub name: String,
    pub self_closing: bool,
    pub block: Block,
    pub attrs: Vec<Attribute>,
    pub attribute_blocks: Vec<AttributeBlock>,
    pub is_inline: bool,
    pub text_only: bool,
    #[serde(flatten)]
    pub loc: Loc,
}

/// Tag whose name is computed at render time: `#{expr}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterpolatedTagNode {
    pub expr: String,
    pub self_closing: bool,
    pub block: Block,
    pub attrs: Vec<Attribute>,
    pub attribute_blocks: Vec<AttributeBlock>,
    pub text_only: bool,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextNode {
    pub val: String,
    pub is_html: bool,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeNode {
    pub val: String,
    pub buffer: bool,
    pub must_escape: bool,
    pub is_inline: bool,
    pub block: Option<Block>,
    /// Cleared for `else` continuations so no debug marker splits the chain.
    pub debug: bool,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentNode {
    pub val: String,
    pub buffer: bool,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockCommentNode {
    pub val: String,
    pub block: Block,
    pub buffer: bool,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoctypeNode {
    pub val: String,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EachNode {
    pub obj: String,
    pub val: String,
    pub key: Option<String>,
    pub block: Block,
    pub alternate: Option<Block>,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhileNode {
    pub test: String,
    pub block: Block,
    #[serde(flatten)]
    pub loc: Loc,
}

/// `else if` chains nest through `alternate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionalNode {
    pub test: String,
    pub consequent: Block,
    pub alternate: Option<Alternate>,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Alternate {
    Conditional(Box<ConditionalNode>),
    Block(Block),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseNode {
    pub expr: String,
    pub block: Block,
    #[serde(flatten)]
    pub loc: Loc,
}

/// A `when` branch. `default` is represented by the expression `default`;
/// a missing block falls through to the next branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhenNode {
    pub expr: String,
    pub block: Option<Block>,
    #[serde(flatten)]
    pub loc: Loc,
}

impl WhenNode {
    pub fn is_default(&self) -> bool {
        self.expr == "default"
    }
}

/// Mixin definition (`call == false`) or invocation (`call == true`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixinNode {
    pub name: String,
    pub args: Option<String>,
    pub block: Option<Block>,
    pub call: bool,
    pub attrs: Vec<Attribute>,
    pub attribute_blocks: Vec<AttributeBlock>,
    #[serde(flatten)]
    pub loc: Loc,
}

impl MixinNode {
    /// Invocations like `+#{name}` whose target is computed at render time.
    pub fn is_dynamic(&self) -> bool {
        self.name.starts_with("#{")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterNode {
    pub name: String,
    pub block: Block,
    pub attrs: Vec<Attribute>,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncludeFilterNode {
    pub name: String,
    pub attrs: Vec<Attribute>,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReference {
    pub path: String,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncludeNode {
    pub file: FileReference,
    pub block: Block,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawIncludeNode {
    pub file: FileReference,
    pub filters: Vec<IncludeFilterNode>,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtendsNode {
    pub file: FileReference,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedBlockNode {
    pub name: String,
    pub mode: BlockMode,
    pub block: Block,
    #[serde(flatten)]
    pub loc: Loc,
}

/// Template AST node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Node {
    Block(Block),
    NamedBlock(NamedBlockNode),
    Tag(TagNode),
    InterpolatedTag(InterpolatedTagNode),
    Text(TextNode),
    Code(CodeNode),
    Comment(CommentNode),
    BlockComment(BlockCommentNode),
    Doctype(DoctypeNode),
    Each(EachNode),
    While(WhileNode),
    Conditional(ConditionalNode),
    Case(CaseNode),
    When(WhenNode),
    Mixin(MixinNode),
    MixinBlock(Loc),
    YieldBlock(Loc),
    Filter(FilterNode),
    IncludeFilter(IncludeFilterNode),
    Include(IncludeNode),
    RawInclude(RawIncludeNode),
    Extends(ExtendsNode),
}

impl Node {
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Block(_) => "Block",
            Node::NamedBlock(_) => "NamedBlock",
            Node::Tag(_) => "Tag",
            Node::InterpolatedTag(_) => "InterpolatedTag",
            Node::Text(_) => "Text",
            Node::Code(_) => "Code",
            Node::Comment(_) => "Comment",
            Node::BlockComment(_) => "BlockComment",
            Node::Doctype(_) => "Doctype",
            Node::Each(_) => "Each",
            Node::While(_) => "While",
            Node::Conditional(_) => "Conditional",
            Node::Case(_) => "Case",
            Node::When(_) => "When",
            Node::Mixin(_) => "Mixin",
            Node::MixinBlock(_) => "MixinBlock",
            Node::YieldBlock(_) => "YieldBlock",
            Node::Filter(_) => "Filter",
            Node::IncludeFilter(_) => "IncludeFilter",
            Node::Include(_) => "Include",
            Node::RawInclude(_) => "RawInclude",
            Node::Extends(_) => "Extends",
        }
    }

    pub fn loc(&self) -> &Loc {
        match self {
            Node::Block(n) => &n.loc,
            Node::NamedBlock(n) => &n.loc,
            Node::Tag(n) => &n.loc,
            Node::InterpolatedTag(n) => &n.loc,
            Node::Text(n) => &n.loc,
            Node::Code(n) => &n.loc,
            Node::Comment(n) => &n.loc,
            Node::BlockComment(n) => &n.loc,
            Node::Doctype(n) => &n.loc,
            Node::Each(n) => &n.loc,
            Node::While(n) => &n.loc,
            Node::Conditional(n) => &n.loc,
            Node::Case(n) => &n.loc,
            Node::When(n) => &n.loc,
            Node::Mixin(n) => &n.loc,
            Node::MixinBlock(loc) | Node::YieldBlock(loc) => loc,
            Node::Filter(n) => &n.loc,
            Node::IncludeFilter(n) => &n.loc,
            Node::Include(n) => &n.loc,
            Node::RawInclude(n) => &n.loc,
            Node::Extends(n) => &n.loc,
        }
    }

    /// Whether pretty output may keep this node on its parent's line.
    pub fn is_inline(&self) -> bool {
        match self {
            Node::Tag(tag) => tag.is_inline,
            Node::Code(code) => code.is_inline,
            _ => false,
        }
    }
}

/// Nodes that accept the tag grammar: `name#id.class(attrs)&attributes(x)`.
pub trait TagLike {
    fn loc(&self) -> &Loc;
    fn attrs_mut(&mut self) -> &mut Vec<Attribute>;
    fn attribute_blocks_mut(&mut self) -> &mut Vec<AttributeBlock>;
    fn block_mut(&mut self) -> &mut Block;
    fn set_block(&mut self, block: Block);
    fn set_self_closing(&mut self);
    fn set_text_only(&mut self);
}

impl TagLike for TagNode {
    fn loc(&self) -> &Loc {
        &self.loc
    }
    fn attrs_mut(&mut self) -> &mut Vec<Attribute> {
        &mut self.attrs
    }
    fn attribute_blocks_mut(&mut self) -> &mut Vec<AttributeBlock> {
        &mut self.attribute_blocks
    }
    fn block_mut(&mut self) -> &mut Block {
        &mut self.block
    }
    fn set_block(&mut self, block: Block) {
        self.block = block;
    }
    fn set_self_closing(&mut self) {
        self.self_closing = true;
    }
    fn set_text_only(&mut self) {
        self.text_only = true;
    }
}

impl TagLike for InterpolatedTagNode {
    fn loc(&self) -> &Loc {
        &self.loc
    }
    fn attrs_mut(&mut self) -> &mut Vec<Attribute> {
        &mut self.attrs
    }
    fn attribute_blocks_mut(&mut self) -> &mut Vec<AttributeBlock> {
        &mut self.attribute_blocks
    }
    fn block_mut(&mut self) -> &mut Block {
        &mut self.block
    }
    fn set_block(&mut self, block: Block) {
        self.block = block;
    }
    fn set_self_closing(&mut self) {
        self.self_closing = true;
    }
    fn set_text_only(&mut self) {
        self.text_only = true;
    }
}

// Mixin calls own an optional block; it is created on first use.
impl TagLike for MixinNode {
    fn loc(&self) -> &Loc {
        &self.loc
    }
    fn attrs_mut(&mut self) -> &mut Vec<Attribute> {
        &mut self.attrs
    }
    fn attribute_blocks_mut(&mut self) -> &mut Vec<AttributeBlock> {
        &mut self.attribute_blocks
    }
    fn block_mut(&mut self) -> &mut Block {
        self.block.get_or_insert_with(|| Block::new(self.loc.clone()))
    }
    fn set_block(&mut self, block: Block) {
        self.block = Some(block);
    }
    fn set_self_closing(&mut self) {}
    fn set_text_only(&mut self) {}
}

/// Parsed template with the source it came from.
#[derive(Debug, Clone)]
pub struct Ast {
    pub root: Block,
    pub source: Arc<str>,
}

impl Ast {
    pub fn new(root: Block, source: Arc<str>) -> Self {
        Self { root, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_serializes_with_type_tag() {
        let node = Node::Text(TextNode {
            val: "hi".into(),
            is_html: false,
            loc: Loc { line: 2, column: 3, filename: None },
        });
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "Text");
        assert_eq!(json["val"], "hi");
        assert_eq!(json["line"], 2);
        assert!(json.get("filename").is_none());
    }

    #[test]
    fn test_dynamic_mixin_detection() {
        let mixin = MixinNode {
            name: "#{name}".into(),
            args: None,
            block: None,
            call: true,
            attrs: vec![],
            attribute_blocks: vec![],
            loc: Loc::default(),
        };
        assert!(mixin.is_dynamic());
    }
}
