use super::token::{AttributeValue, Position, Token, TokenKind};
use super::token_stream::TokenStream;
use crate::ast::*;
use crate::error::{CompileError, ErrorKind, Result};
use crate::html;
use crate::plugin::{ParserContext, Plugins};
use std::sync::Arc;
use tracing::warn;

/// Builds an AST from a token stream
pub struct TreeBuilder<'p> {
    tokens: TokenStream,
    filename: Option<Arc<str>>,
    plugins: &'p Plugins,
    /// Depth of mixin definitions being parsed; `block` is only legal inside one.
    in_mixin: usize,
}

impl<'p> TreeBuilder<'p> {
    pub fn new(tokens: Vec<Token>, filename: Option<Arc<str>>, plugins: &'p Plugins) -> Self {
        Self {
            tokens: TokenStream::new(tokens),
            filename,
            plugins,
            in_mixin: 0,
        }
    }

    /// Parse the whole stream into the root block.
    pub fn build(&mut self) -> Result<Block> {
        let mut block = Block::new(Loc {
            line: 0,
            column: 0,
            filename: self.filename.clone(),
        });

        loop {
            match self.peek()?.name() {
                "eos" => break,
                "newline" => {
                    self.advance()?;
                }
                "text-html" => {
                    let nodes = self.parse_text_html()?;
                    block.nodes.extend(nodes);
                }
                _ => {
                    let expr = self.parse_expr()?;
                    splice(&mut block, expr);
                }
            }
        }

        Ok(block)
    }

    // === Token access ===

    pub fn peek(&self) -> Result<&Token> {
        self.tokens.peek().map_err(|_| self.end_of_stream())
    }

    pub fn lookahead(&self, index: usize) -> Result<&Token> {
        self.tokens.lookahead(index).map_err(|_| self.end_of_stream())
    }

    pub fn advance(&mut self) -> Result<Token> {
        self.tokens.advance().map_err(|_| self.end_of_stream())
    }

    pub fn defer(&mut self, token: Token) {
        self.tokens.defer(token);
    }

    /// Consume the next token, which must be of kind `name`.
    pub fn expect(&mut self, name: &str) -> Result<Token> {
        let next = self.peek()?;
        if next.name() == name {
            return self.advance();
        }
        Err(self.error(
            ErrorKind::InvalidToken,
            format!("expected \"{}\", but got \"{}\"", name, next.name()),
            next.pos,
        ))
    }

    /// Consume the next token if it is of kind `name`.
    pub fn accept(&mut self, name: &str) -> Result<Option<Token>> {
        if self.peek()?.name() == name {
            return self.advance().map(Some);
        }
        Ok(None)
    }

    fn peek_name(&self) -> Result<&'static str> {
        Ok(self.peek()?.name())
    }

    pub fn loc(&self, pos: Position) -> Loc {
        Loc::new(pos, self.filename.clone())
    }

    pub fn error(&self, kind: ErrorKind, message: impl Into<String>, pos: Position) -> CompileError {
        CompileError::new(kind, message, pos.line, pos.column).with_filename(self.filename.as_deref())
    }

    fn end_of_stream(&self) -> CompileError {
        CompileError::unlocated(ErrorKind::EndOfStream, "Cannot read past the end of a stream")
            .with_filename(self.filename.as_deref())
    }

    fn unexpected(&self, token: &Token) -> CompileError {
        self.error(
            ErrorKind::InvalidToken,
            format!("Unexpected token type: {}", token.name()),
            token.pos,
        )
    }

    // === Productions ===

    pub fn parse_expr(&mut self) -> Result<Node> {
        match self.peek_name()? {
            "tag" => self.parse_tag(),
            "mixin" => self.parse_mixin(),
            "block" => self.parse_block(),
            "mixin-block" => self.parse_mixin_block(),
            "case" => self.parse_case(),
            "extends" => self.parse_extends(),
            "include" => self.parse_include(),
            "doctype" => self.parse_doctype(),
            "filter" => self.parse_filter(),
            "comment" => self.parse_comment(),
            "text" | "interpolated-code" | "start-pug-interpolation" => self.parse_text(true),
            "text-html" => {
                let loc = self.loc(self.peek()?.pos);
                let nodes = self.parse_text_html()?;
                Ok(Node::Block(Block { nodes, loc }))
            }
            "dot" => self.parse_dot(),
            "each" => self.parse_each(),
            "code" => self.parse_code(false),
            "blockcode" => self.parse_block_code(),
            "if" => self.parse_conditional(),
            "while" => self.parse_while(),
            "call" => self.parse_call(),
            "interpolation" => self.parse_interpolation(),
            "yield" => self.parse_yield(),
            "id" | "class" => {
                // `.foo` and `#bar` on their own are shorthand for a div
                let pos = self.peek()?.pos;
                self.defer(Token::new(TokenKind::Tag { val: "div".to_string() }, pos));
                self.parse_expr()
            }
            name => {
                let plugins = self.plugins;
                if let Some(hook) = plugins.expression(name) {
                    return hook.parse(self);
                }
                let pos = self.peek()?.pos;
                Err(self.error(ErrorKind::InvalidToken, format!("unexpected token \"{}\"", name), pos))
            }
        }
    }

    fn parse_dot(&mut self) -> Result<Node> {
        let tok = self.advance()?;
        let block = self.parse_text_block()?;
        Ok(Node::Block(block.unwrap_or_else(|| Block::new(self.loc(tok.pos)))))
    }

    /// A run of text, inline code and `#[...]` tags. With `multiline`,
    /// newlines between text tokens become `\n` text.
    fn parse_text(&mut self, multiline: bool) -> Result<Node> {
        let mut block = Block::new(self.loc(self.peek()?.pos));
        loop {
            match self.peek_name()? {
                "text" => {
                    let tok = self.advance()?;
                    let node = self.text_node(&tok);
                    block.nodes.push(node);
                }
                "interpolated-code" => {
                    let tok = self.advance()?;
                    let node = self.inline_code(tok);
                    block.nodes.push(node);
                }
                "newline" => {
                    if !multiline {
                        break;
                    }
                    let tok = self.advance()?;
                    if matches!(self.peek_name()?, "text" | "interpolated-code") {
                        block.nodes.push(self.newline_text(tok.pos));
                    }
                }
                "start-pug-interpolation" => {
                    self.advance()?;
                    let expr = self.parse_expr()?;
                    block.nodes.push(expr);
                    self.expect("end-pug-interpolation")?;
                }
                name => {
                    let plugins = self.plugins;
                    match plugins.nodes(ParserContext::Text, name) {
                        Some(hook) if hook.extend(self, &mut block)? => {}
                        _ => break,
                    }
                }
            }
        }
        if block.nodes.len() == 1
            && let Some(node) = block.nodes.pop()
        {
            return Ok(node);
        }
        Ok(Node::Block(block))
    }

    /// Consecutive raw HTML lines merge into a single text node.
    fn parse_text_html(&mut self) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = Vec::new();
        let mut current: Option<usize> = None;
        loop {
            match self.peek_name()? {
                "text-html" => {
                    let tok = self.advance()?;
                    match current {
                        Some(index) => append_html(&mut nodes[index], tok.val().unwrap_or_default()),
                        None => {
                            nodes.push(Node::Text(TextNode {
                                val: tok.val().unwrap_or_default().to_string(),
                                is_html: true,
                                loc: self.loc(tok.pos),
                            }));
                            current = Some(nodes.len() - 1);
                        }
                    }
                }
                "indent" => {
                    let block = self.block()?;
                    for node in block.nodes {
                        match node {
                            Node::Text(text) if text.is_html => match current {
                                Some(index) => append_html(&mut nodes[index], &text.val),
                                None => {
                                    nodes.push(Node::Text(text));
                                    current = Some(nodes.len() - 1);
                                }
                            },
                            node => {
                                current = None;
                                nodes.push(node);
                            }
                        }
                    }
                }
                "code" => {
                    current = None;
                    let code = self.parse_code(true)?;
                    nodes.push(code);
                }
                "newline" => {
                    self.advance()?;
                }
                _ => break,
            }
        }
        Ok(nodes)
    }

    /// `: expr` or an indented block.
    fn parse_block_expansion(&mut self) -> Result<Block> {
        match self.accept(":")? {
            Some(tok) => {
                let expr = self.parse_expr()?;
                Ok(match expr {
                    Node::Block(block) => block,
                    node => Block {
                        nodes: vec![node],
                        loc: self.loc(tok.pos),
                    },
                })
            }
            None => self.block(),
        }
    }

    fn parse_case(&mut self) -> Result<Node> {
        let tok = self.expect("case")?;
        let mut block = Block::new(self.loc(Position::new(tok.pos.line + 1, tok.pos.column)));
        self.expect("indent")?;
        loop {
            match self.peek_name()? {
                "outdent" => break,
                "comment" | "newline" => {
                    self.advance()?;
                }
                "when" => {
                    let node = self.parse_when()?;
                    block.nodes.push(node);
                }
                "default" => {
                    let node = self.parse_default()?;
                    block.nodes.push(node);
                }
                name => {
                    let plugins = self.plugins;
                    if let Some(hook) = plugins.nodes(ParserContext::Case, name)
                        && hook.extend(self, &mut block)?
                    {
                        continue;
                    }
                    let pos = self.peek()?.pos;
                    return Err(self.error(
                        ErrorKind::InvalidToken,
                        format!("Unexpected token \"{}\", expected \"when\", \"default\" or \"newline\"", name),
                        pos,
                    ));
                }
            }
        }
        self.expect("outdent")?;

        Ok(Node::Case(CaseNode {
            expr: tok.val().unwrap_or_default().to_string(),
            block,
            loc: self.loc(tok.pos),
        }))
    }

    fn parse_when(&mut self) -> Result<Node> {
        let tok = self.expect("when")?;
        // no block means fall through to the next branch
        let block = match self.peek_name()? {
            "newline" | "outdent" => None,
            _ => Some(self.parse_block_expansion()?),
        };
        Ok(Node::When(WhenNode {
            expr: tok.val().unwrap_or_default().to_string(),
            block,
            loc: self.loc(tok.pos),
        }))
    }

    fn parse_default(&mut self) -> Result<Node> {
        let tok = self.expect("default")?;
        let block = self.parse_block_expansion()?;
        Ok(Node::When(WhenNode {
            expr: "default".to_string(),
            block: Some(block),
            loc: self.loc(tok.pos),
        }))
    }

    /// `inline` code is part of a text run or tag line and cannot own a block.
    fn parse_code(&mut self, inline: bool) -> Result<Node> {
        let tok = self.expect("code")?;
        let loc = self.loc(tok.pos);
        let TokenKind::Code { val, must_escape, buffer } = tok.kind else {
            return Err(self.error(ErrorKind::InvalidToken, "expected \"code\"", tok.pos));
        };
        let debug = !val.trim_start_matches(' ').starts_with("else");

        let mut block = None;
        if !inline && self.peek_name()? == "indent" {
            if buffer {
                let pos = self.peek()?.pos;
                return Err(self.error(
                    ErrorKind::BlockInBufferedCode,
                    "Buffered code cannot have a block attached to it",
                    pos,
                ));
            }
            block = Some(self.block()?);
        }

        Ok(Node::Code(CodeNode {
            val,
            buffer,
            must_escape,
            is_inline: inline,
            block,
            debug,
            loc,
        }))
    }

    fn parse_conditional(&mut self) -> Result<Node> {
        let tok = self.expect("if")?;
        let head = self.branch(tok)?;

        let mut branches = Vec::new();
        let mut otherwise = None;
        loop {
            match self.peek_name()? {
                "newline" => {
                    self.advance()?;
                }
                "else-if" => {
                    let tok = self.advance()?;
                    branches.push(self.branch(tok)?);
                }
                "else" => {
                    self.advance()?;
                    if self.peek_name()? == "indent" {
                        otherwise = Some(self.block()?);
                    }
                    break;
                }
                _ => break,
            }
        }

        // chain from the innermost `else if` outwards
        let mut alternate = otherwise.map(Alternate::Block);
        for mut branch in branches.into_iter().rev() {
            branch.alternate = alternate;
            alternate = Some(Alternate::Conditional(Box::new(branch)));
        }
        Ok(Node::Conditional(ConditionalNode { alternate, ..head }))
    }

    fn branch(&mut self, tok: Token) -> Result<ConditionalNode> {
        let loc = self.loc(tok.pos);
        let consequent = if self.peek_name()? == "indent" {
            self.block()?
        } else {
            Block::new(loc.clone())
        };
        Ok(ConditionalNode {
            test: tok.val().unwrap_or_default().to_string(),
            consequent,
            alternate: None,
            loc,
        })
    }

    fn parse_while(&mut self) -> Result<Node> {
        let tok = self.expect("while")?;
        let loc = self.loc(tok.pos);
        let block = if self.peek_name()? == "indent" {
            self.block()?
        } else {
            Block::new(loc.clone())
        };
        Ok(Node::While(WhileNode {
            test: tok.val().unwrap_or_default().to_string(),
            block,
            loc,
        }))
    }

    /// `-` followed by an indented block of raw JavaScript.
    fn parse_block_code(&mut self) -> Result<Node> {
        let tok = self.expect("blockcode")?;
        let mut text = String::new();
        if self.accept("start-pipeless-text")?.is_some() {
            while self.peek_name()? != "end-pipeless-text" {
                let tok = self.advance()?;
                match &tok.kind {
                    TokenKind::Text { val } => text.push_str(val),
                    TokenKind::Newline => text.push('\n'),
                    _ => {
                        let plugins = self.plugins;
                        match plugins.block_code(tok.name()) {
                            Some(hook) => match hook.text(self, &tok)? {
                                Some(code) => text.push_str(&code),
                                None => return Err(self.unexpected(&tok)),
                            },
                            None => return Err(self.unexpected(&tok)),
                        }
                    }
                }
            }
            self.advance()?;
        }
        Ok(Node::Code(CodeNode {
            val: text,
            buffer: false,
            must_escape: false,
            is_inline: false,
            block: None,
            debug: true,
            loc: self.loc(tok.pos),
        }))
    }

    fn parse_comment(&mut self) -> Result<Node> {
        let tok = self.expect("comment")?;
        let loc = self.loc(tok.pos);
        let TokenKind::Comment { val, buffer } = tok.kind else {
            return Err(self.error(ErrorKind::InvalidToken, "expected \"comment\"", tok.pos));
        };
        Ok(match self.parse_text_block()? {
            Some(block) => Node::BlockComment(BlockCommentNode { val, block, buffer, loc }),
            None => Node::Comment(CommentNode { val, buffer, loc }),
        })
    }

    fn parse_doctype(&mut self) -> Result<Node> {
        let tok = self.expect("doctype")?;
        Ok(Node::Doctype(DoctypeNode {
            val: tok.val().unwrap_or_default().to_string(),
            loc: self.loc(tok.pos),
        }))
    }

    fn parse_include_filter(&mut self) -> Result<IncludeFilterNode> {
        let tok = self.expect("filter")?;
        let attrs = if self.peek_name()? == "start-attributes" {
            self.attrs(None)?
        } else {
            Vec::new()
        };
        Ok(IncludeFilterNode {
            name: tok.val().unwrap_or_default().to_string(),
            attrs,
            loc: self.loc(tok.pos),
        })
    }

    fn parse_filter(&mut self) -> Result<Node> {
        let tok = self.expect("filter")?;
        let loc = self.loc(tok.pos);
        let attrs = if self.peek_name()? == "start-attributes" {
            self.attrs(None)?
        } else {
            Vec::new()
        };

        let block = match self.peek_name()? {
            "text" => {
                let text = self.advance()?;
                Block {
                    nodes: vec![self.text_node(&text)],
                    loc: self.loc(text.pos),
                }
            }
            "filter" => Block {
                nodes: vec![self.parse_filter()?],
                loc: loc.clone(),
            },
            _ => self.parse_text_block()?.unwrap_or_else(|| Block::new(loc.clone())),
        };

        Ok(Node::Filter(FilterNode {
            name: tok.val().unwrap_or_default().to_string(),
            block,
            attrs,
            loc,
        }))
    }

    fn parse_each(&mut self) -> Result<Node> {
        let tok = self.expect("each")?;
        let loc = self.loc(tok.pos);
        let TokenKind::Each { val, key, code } = tok.kind else {
            return Err(self.error(ErrorKind::InvalidToken, "expected \"each\"", tok.pos));
        };
        let block = self.block()?;
        let alternate = match self.accept("else")? {
            Some(_) => Some(self.block()?),
            None => None,
        };
        Ok(Node::Each(EachNode {
            obj: code,
            val,
            key,
            block,
            alternate,
            loc,
        }))
    }

    fn file_reference(&mut self) -> Result<FileReference> {
        let path = self.expect("path")?;
        Ok(FileReference {
            path: path.val().unwrap_or_default().trim().to_string(),
            loc: self.loc(path.pos),
        })
    }

    fn parse_extends(&mut self) -> Result<Node> {
        let tok = self.expect("extends")?;
        let file = self.file_reference()?;
        Ok(Node::Extends(ExtendsNode {
            file,
            loc: self.loc(tok.pos),
        }))
    }

    fn parse_block(&mut self) -> Result<Node> {
        let tok = self.expect("block")?;
        let loc = self.loc(tok.pos);
        let TokenKind::Block { val, mode } = tok.kind else {
            return Err(self.error(ErrorKind::InvalidToken, "expected \"block\"", tok.pos));
        };
        let block = if self.peek_name()? == "indent" {
            self.block()?
        } else {
            Block::new(loc.clone())
        };
        Ok(Node::NamedBlock(NamedBlockNode {
            name: val.trim().to_string(),
            mode,
            block,
            loc,
        }))
    }

    fn parse_mixin_block(&mut self) -> Result<Node> {
        let tok = self.expect("mixin-block")?;
        if self.in_mixin == 0 {
            return Err(self.error(
                ErrorKind::BlockOutsideMixin,
                "Anonymous blocks are not allowed unless they are part of a mixin.",
                tok.pos,
            ));
        }
        Ok(Node::MixinBlock(self.loc(tok.pos)))
    }

    fn parse_yield(&mut self) -> Result<Node> {
        let tok = self.expect("yield")?;
        Ok(Node::YieldBlock(self.loc(tok.pos)))
    }

    fn parse_include(&mut self) -> Result<Node> {
        let tok = self.expect("include")?;
        let loc = self.loc(tok.pos);
        let mut filters = Vec::new();
        while self.peek_name()? == "filter" {
            filters.push(self.parse_include_filter()?);
        }
        let file = self.file_reference()?;

        let is_jade = file.path.ends_with(".jade");
        if (is_jade || file.path.ends_with(".pug")) && filters.is_empty() {
            let block = if self.peek_name()? == "indent" {
                self.block()?
            } else {
                Block::new(loc.clone())
            };
            if is_jade {
                warn!(
                    "{}, line {}: The .jade extension is deprecated, use .pug for \"{}\".",
                    self.filename.as_deref().unwrap_or("Pug"),
                    tok.pos.line,
                    file.path
                );
            }
            return Ok(Node::Include(IncludeNode { file, block, loc }));
        }

        if self.peek_name()? == "indent" {
            let pos = self.peek()?.pos;
            return Err(self.error(ErrorKind::RawIncludeBlock, "Raw inclusion cannot contain a block", pos));
        }
        Ok(Node::RawInclude(RawIncludeNode { file, filters, loc }))
    }

    fn parse_call(&mut self) -> Result<Node> {
        let tok = self.expect("call")?;
        let loc = self.loc(tok.pos);
        let TokenKind::Call { val, args } = tok.kind else {
            return Err(self.error(ErrorKind::InvalidToken, "expected \"call\"", tok.pos));
        };
        let mut mixin = MixinNode {
            name: val,
            args,
            block: Some(Block::new(loc.clone())),
            call: true,
            attrs: Vec::new(),
            attribute_blocks: Vec::new(),
            loc,
        };
        self.tag(&mut mixin, false)?;
        if mixin.block.as_ref().is_some_and(Block::is_empty) {
            mixin.block = None;
        }
        Ok(Node::Mixin(mixin))
    }

    fn parse_mixin(&mut self) -> Result<Node> {
        let tok = self.expect("mixin")?;
        let loc = self.loc(tok.pos);
        let TokenKind::Mixin { val, args } = tok.kind else {
            return Err(self.error(ErrorKind::InvalidToken, "expected \"mixin\"", tok.pos));
        };
        if self.peek_name()? != "indent" {
            return Err(self.error(
                ErrorKind::MixinWithoutBody,
                format!("Mixin {} declared without body", val),
                tok.pos,
            ));
        }

        self.in_mixin += 1;
        let block = self.block();
        self.in_mixin -= 1;

        Ok(Node::Mixin(MixinNode {
            name: val,
            args,
            block: Some(block?),
            call: false,
            attrs: Vec::new(),
            attribute_blocks: Vec::new(),
            loc,
        }))
    }

    /// Pipeless text produced by `.`, comments, filters and block code.
    pub fn parse_text_block(&mut self) -> Result<Option<Block>> {
        let Some(start) = self.accept("start-pipeless-text")? else {
            return Ok(None);
        };
        let mut block = Block::new(self.loc(start.pos));
        while self.peek_name()? != "end-pipeless-text" {
            let tok = self.advance()?;
            match tok.kind {
                TokenKind::Text { .. } => {
                    let node = self.text_node(&tok);
                    block.nodes.push(node);
                }
                TokenKind::Newline => block.nodes.push(self.newline_text(tok.pos)),
                TokenKind::StartPugInterpolation => {
                    let expr = self.parse_expr()?;
                    block.nodes.push(expr);
                    self.expect("end-pug-interpolation")?;
                }
                TokenKind::InterpolatedCode { .. } => {
                    let node = self.inline_code(tok);
                    block.nodes.push(node);
                }
                _ => {
                    let plugins = self.plugins;
                    let Some(hook) = plugins.nodes(ParserContext::TextBlock, tok.name()) else {
                        return Err(self.unexpected(&tok));
                    };
                    let name = tok.name();
                    let pos = tok.pos;
                    self.defer(tok);
                    if !hook.extend(self, &mut block)? {
                        return Err(self.error(
                            ErrorKind::InvalidToken,
                            format!("Unexpected token type: {}", name),
                            pos,
                        ));
                    }
                }
            }
        }
        self.advance()?;
        Ok(Some(block))
    }

    /// `indent expr* outdent`
    pub fn block(&mut self) -> Result<Block> {
        let tok = self.expect("indent")?;
        let mut block = Block::new(self.loc(tok.pos));
        loop {
            match self.peek_name()? {
                "outdent" => break,
                "newline" => {
                    self.advance()?;
                }
                "text-html" => {
                    let nodes = self.parse_text_html()?;
                    block.nodes.extend(nodes);
                }
                _ => {
                    let expr = self.parse_expr()?;
                    splice(&mut block, expr);
                }
            }
        }
        self.expect("outdent")?;
        Ok(block)
    }

    fn parse_interpolation(&mut self) -> Result<Node> {
        let tok = self.advance()?;
        let loc = self.loc(tok.pos);
        let mut tag = InterpolatedTagNode {
            expr: tok.val().unwrap_or_default().to_string(),
            self_closing: false,
            block: Block::new(loc.clone()),
            attrs: Vec::new(),
            attribute_blocks: Vec::new(),
            text_only: false,
            loc,
        };
        self.tag(&mut tag, true)?;
        Ok(Node::InterpolatedTag(tag))
    }

    fn parse_tag(&mut self) -> Result<Node> {
        let tok = self.advance()?;
        let loc = self.loc(tok.pos);
        let name = tok.val().unwrap_or_default().to_string();
        let mut tag = TagNode {
            is_inline: html::is_inline_tag(&name),
            name,
            self_closing: false,
            block: Block::new(loc.clone()),
            attrs: Vec::new(),
            attribute_blocks: Vec::new(),
            text_only: false,
            loc,
        };
        self.tag(&mut tag, true)?;
        Ok(Node::Tag(tag))
    }

    /// `(attrs | class | id | &attributes)* '.'? (text | code | ':' | '/')? newline* block?`
    fn tag(&mut self, tag: &mut dyn TagLike, self_closing_allowed: bool) -> Result<()> {
        let mut seen_attrs = false;
        let mut attribute_names: Vec<String> = Vec::new();
        let plugins = self.plugins;

        loop {
            match self.peek_name()? {
                "id" | "class" => {
                    let tok = self.advance()?;
                    let name = tok.name();
                    if name == "id" {
                        if attribute_names.iter().any(|n| n == "id") {
                            return Err(self.error(
                                ErrorKind::DuplicateId,
                                "Duplicate attribute \"id\" is not allowed.",
                                tok.pos,
                            ));
                        }
                        attribute_names.push("id".to_string());
                    }
                    tag.attrs_mut().push(Attribute {
                        name: name.to_string(),
                        val: AttributeValue::Expression(format!("'{}'", tok.val().unwrap_or_default())),
                        must_escape: false,
                        loc: self.loc(tok.pos),
                    });
                }
                "start-attributes" => {
                    if seen_attrs {
                        warn!(
                            "{}, line {}: You should not have pug tags with multiple attributes.",
                            self.filename.as_deref().unwrap_or("Pug"),
                            self.peek()?.pos.line
                        );
                    }
                    seen_attrs = true;
                    let attrs = self.attrs(Some(&mut attribute_names))?;
                    tag.attrs_mut().extend(attrs);
                }
                "&attributes" => {
                    let tok = self.advance()?;
                    tag.attribute_blocks_mut().push(AttributeBlock {
                        val: tok.val().unwrap_or_default().to_string(),
                        loc: self.loc(tok.pos),
                    });
                }
                name => match plugins.tag(ParserContext::TagAttribute, name) {
                    Some(hook) if hook.handle(self, tag)? => {}
                    _ => break,
                },
            }
        }

        let text_only = self.accept("dot")?.is_some();
        if text_only {
            tag.set_text_only();
        }

        match self.peek_name()? {
            "text" | "interpolated-code" => match self.parse_text(false)? {
                Node::Block(text) => tag.block_mut().nodes.extend(text.nodes),
                node => tag.block_mut().nodes.push(node),
            },
            "code" => {
                let code = self.parse_code(true)?;
                tag.block_mut().nodes.push(code);
            }
            ":" => {
                self.advance()?;
                let block = match self.parse_expr()? {
                    Node::Block(block) => block,
                    node => Block {
                        nodes: vec![node],
                        loc: tag.loc().clone(),
                    },
                };
                tag.set_block(block);
            }
            "newline" | "indent" | "outdent" | "eos" | "start-pipeless-text" | "end-pug-interpolation" => {}
            "slash" if self_closing_allowed => {
                self.advance()?;
                tag.set_self_closing();
            }
            name => {
                let handled = match plugins.tag(ParserContext::Tag, name) {
                    Some(hook) => hook.handle(self, tag)?,
                    None => false,
                };
                if !handled {
                    let pos = self.peek()?.pos;
                    return Err(self.error(
                        ErrorKind::InvalidToken,
                        format!(
                            "Unexpected token `{}` expected `text`, `interpolated-code`, `code`, `:`{}, `newline` or `eos`",
                            name,
                            if self_closing_allowed { ", `slash`" } else { "" }
                        ),
                        pos,
                    ));
                }
            }
        }

        while self.accept("newline")?.is_some() {}

        if text_only {
            let block = match self.parse_text_block()? {
                Some(block) => block,
                None => Block::new(tag.loc().clone()),
            };
            tag.set_block(block);
        } else if self.peek_name()? == "indent" {
            let block = self.block()?;
            tag.block_mut().nodes.extend(block.nodes);
        }

        Ok(())
    }

    /// `start-attributes attribute* end-attributes`. Names other than
    /// `class` are recorded in `names` and may not repeat.
    pub fn attrs(&mut self, mut names: Option<&mut Vec<String>>) -> Result<Vec<Attribute>> {
        self.expect("start-attributes")?;

        let mut attrs = Vec::new();
        loop {
            let Token { kind, pos } = self.advance()?;
            let TokenKind::Attribute { name, val, must_escape } = kind else {
                self.defer(Token { kind, pos });
                break;
            };
            if name != "class"
                && let Some(names) = names.as_deref_mut()
            {
                if names.contains(&name) {
                    return Err(self.error(
                        ErrorKind::DuplicateAttribute,
                        format!("Duplicate attribute \"{}\" is not allowed.", name),
                        pos,
                    ));
                }
                names.push(name.clone());
            }
            attrs.push(Attribute {
                name,
                val,
                must_escape,
                loc: self.loc(pos),
            });
        }
        self.expect("end-attributes")?;
        Ok(attrs)
    }

    // === Node helpers ===

    fn text_node(&self, tok: &Token) -> Node {
        Node::Text(TextNode {
            val: tok.val().unwrap_or_default().to_string(),
            is_html: false,
            loc: self.loc(tok.pos),
        })
    }

    fn newline_text(&self, pos: Position) -> Node {
        Node::Text(TextNode {
            val: "\n".to_string(),
            is_html: false,
            loc: self.loc(pos),
        })
    }

    fn inline_code(&self, tok: Token) -> Node {
        let loc = self.loc(tok.pos);
        let (val, must_escape, buffer) = match tok.kind {
            TokenKind::InterpolatedCode { val, must_escape, buffer } => (val, must_escape, buffer),
            _ => (String::new(), true, true),
        };
        Node::Code(CodeNode {
            val,
            buffer,
            must_escape,
            is_inline: true,
            block: None,
            debug: true,
            loc,
        })
    }
}

/// Blocks returned from `parse_expr` are flattened into their parent.
fn splice(block: &mut Block, node: Node) {
    match node {
        Node::Block(inner) => block.nodes.extend(inner.nodes),
        node => block.nodes.push(node),
    }
}

fn append_html(node: &mut Node, line: &str) {
    if let Node::Text(text) = node {
        text.val.push('\n');
        text.val.push_str(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::AcceptAll;
    use crate::parser::tokenizer::lex;

    fn parse(source: &str) -> Result<Block> {
        let tokens = lex(source, None, &AcceptAll)?;
        let plugins = Plugins::default();
        TreeBuilder::new(tokens, None, &plugins).build()
    }

    fn tag(node: &Node) -> &TagNode {
        match node {
            Node::Tag(tag) => tag,
            other => panic!("expected tag, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_nested_tag_with_text() {
        let root = parse("div\n  p Hello").unwrap();
        assert_eq!(root.nodes.len(), 1);
        let div = tag(&root.nodes[0]);
        assert_eq!(div.name, "div");
        let p = tag(&div.block.nodes[0]);
        assert_eq!(p.name, "p");
        assert!(matches!(&p.block.nodes[0], Node::Text(t) if t.val == "Hello"));
    }

    #[test]
    fn test_attribute_order() {
        let root = parse("a.one.two#main(href=\"v\")").unwrap();
        let a = tag(&root.nodes[0]);
        let names: Vec<_> = a.attrs.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["class", "class", "id", "href"]);
        assert_eq!(a.attrs[0].val.as_js(), "'one'");
    }

    #[test]
    fn test_bare_class_becomes_div() {
        let root = parse(".box text").unwrap();
        let div = tag(&root.nodes[0]);
        assert_eq!(div.name, "div");
        assert_eq!(div.attrs.len(), 1);
    }

    #[test]
    fn test_duplicate_attributes() {
        assert_eq!(parse("a#x(id='y')").unwrap_err().kind, ErrorKind::DuplicateAttribute);
        assert_eq!(parse("a#x#y").unwrap_err().kind, ErrorKind::DuplicateId);
        assert_eq!(parse("a(title='1' title='2')").unwrap_err().kind, ErrorKind::DuplicateAttribute);
        assert!(parse("a.b(class='c' class='d')").is_ok());
    }

    #[test]
    fn test_conditional_chain() {
        let root = parse("if a\n  p\nelse if b\n  i\nelse\n  b").unwrap();
        let Node::Conditional(cond) = &root.nodes[0] else {
            panic!("expected conditional");
        };
        assert_eq!(cond.test, "a");
        let Some(Alternate::Conditional(second)) = &cond.alternate else {
            panic!("expected else if");
        };
        assert_eq!(second.test, "b");
        assert!(matches!(&second.alternate, Some(Alternate::Block(b)) if b.nodes.len() == 1));
    }

    #[test]
    fn test_each_with_else() {
        let root = parse("each item, i in list\n  li= item\nelse\n  li none").unwrap();
        let Node::Each(each) = &root.nodes[0] else {
            panic!("expected each");
        };
        assert_eq!(each.obj, "list");
        assert_eq!(each.key.as_deref(), Some("i"));
        assert!(each.alternate.is_some());
    }

    #[test]
    fn test_case_fall_through() {
        let root = parse("case x\n  when 1\n  when 2\n    p two\n  default\n    p other").unwrap();
        let Node::Case(case) = &root.nodes[0] else {
            panic!("expected case");
        };
        let whens: Vec<_> = case
            .block
            .nodes
            .iter()
            .map(|n| match n {
                Node::When(w) => (w.expr.as_str(), w.block.is_some()),
                _ => ("?", false),
            })
            .collect();
        assert_eq!(whens, vec![("1", false), ("2", true), ("default", true)]);
    }

    #[test]
    fn test_mixin_rules() {
        assert_eq!(parse("mixin foo").unwrap_err().kind, ErrorKind::MixinWithoutBody);
        assert_eq!(parse("div\n  block").unwrap_err().kind, ErrorKind::BlockOutsideMixin);
        let root = parse("mixin foo(a)\n  p= a\n  block\n+foo(1)(class='x')").unwrap();
        let Node::Mixin(call) = &root.nodes[1] else {
            panic!("expected call");
        };
        assert!(call.call);
        assert_eq!(call.args.as_deref(), Some("1"));
        assert_eq!(call.attrs[0].name, "class");
        assert!(call.block.is_none());
    }

    #[test]
    fn test_include_classification() {
        let root = parse("include a.pug\ninclude:markdown b.md").unwrap();
        assert!(matches!(root.nodes[0], Node::Include(_)));
        assert!(matches!(&root.nodes[1], Node::RawInclude(r) if r.filters.len() == 1));
        assert_eq!(
            parse("include style.css\n  p").unwrap_err().kind,
            ErrorKind::RawIncludeBlock
        );
    }

    #[test]
    fn test_named_block_strips_comment() {
        let root = parse("block content // main area\n  p").unwrap();
        assert!(matches!(&root.nodes[0], Node::NamedBlock(b) if b.name == "content"));
    }

    #[test]
    fn test_buffered_code_cannot_own_block() {
        assert_eq!(parse("= a\n  p").unwrap_err().kind, ErrorKind::BlockInBufferedCode);
        let root = parse("- if (a)\n  p").unwrap();
        assert!(matches!(&root.nodes[0], Node::Code(c) if c.block.is_some()));
    }

    #[test]
    fn test_html_lines_merge() {
        let root = parse("<div>\n  <span>\n</div>").unwrap();
        assert_eq!(root.nodes.len(), 1);
        assert!(matches!(&root.nodes[0], Node::Text(t) if t.is_html && t.val == "<div>\n<span>\n</div>"));
    }

    #[test]
    fn test_tag_interpolation_in_text() {
        let root = parse("p a #[em b] c").unwrap();
        let p = tag(&root.nodes[0]);
        let kinds: Vec<_> = p.block.nodes.iter().map(Node::type_name).collect();
        assert_eq!(kinds, vec!["Text", "Tag", "Text"]);
    }

    #[test]
    fn test_block_expansion_and_self_closing() {
        let root = parse("ul: li a\nfoo/").unwrap();
        let ul = tag(&root.nodes[0]);
        assert_eq!(tag(&ul.block.nodes[0]).name, "li");
        assert!(tag(&root.nodes[1]).self_closing);
    }
}
