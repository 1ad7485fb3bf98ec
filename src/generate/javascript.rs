use super::attrs::{AttrFormat, AttrsCompiler};
use super::output::Output;
use super::{GenerateOptions, GenerateResult, Generator, LocalsMode, locals, runtime};
use crate::ast::*;
use crate::error::{CompileError, ErrorKind, Result};
use crate::expr::value::{stringify, stringify_str, to_js_string};
use crate::expr::{ConstantEvaluator, Value};
use crate::html;
use crate::transform::TransformMetadata;
use std::collections::BTreeSet;

/// Compiles a template AST into a JavaScript render function.
pub struct JavaScriptGenerator<'a> {
    evaluator: &'a dyn ConstantEvaluator,
}

impl<'a> JavaScriptGenerator<'a> {
    pub fn new(evaluator: &'a dyn ConstantEvaluator) -> Self {
        Self { evaluator }
    }
}

impl Generator for JavaScriptGenerator<'_> {
    fn generate(&self, ast: &Ast, metadata: &TransformMetadata, options: &GenerateOptions) -> Result<GenerateResult> {
        let mut compiler = Compiler::new(self.evaluator, metadata, options);
        compiler.visit_block(&ast.root)?;
        Ok(compiler.finish())
    }
}

// === Tag views ===

enum TagName<'n> {
    Static(&'n str),
    Interpolated(&'n str),
}

/// The parts of `Tag` and `InterpolatedTag` the generator reads.
struct TagView<'n> {
    name: TagName<'n>,
    self_closing: bool,
    block: &'n Block,
    attrs: &'n [Attribute],
    attribute_blocks: &'n [AttributeBlock],
    is_inline: bool,
    loc: &'n Loc,
}

impl<'n> From<&'n TagNode> for TagView<'n> {
    fn from(tag: &'n TagNode) -> Self {
        Self {
            name: TagName::Static(&tag.name),
            self_closing: tag.self_closing,
            block: &tag.block,
            attrs: &tag.attrs,
            attribute_blocks: &tag.attribute_blocks,
            is_inline: tag.is_inline,
            loc: &tag.loc,
        }
    }
}

impl<'n> From<&'n InterpolatedTagNode> for TagView<'n> {
    fn from(tag: &'n InterpolatedTagNode) -> Self {
        Self {
            name: TagName::Interpolated(&tag.expr),
            self_closing: tag.self_closing,
            block: &tag.block,
            attrs: &tag.attrs,
            attribute_blocks: &tag.attribute_blocks,
            is_inline: false,
            loc: &tag.loc,
        }
    }
}

impl TagView<'_> {
    fn static_name(&self) -> Option<&str> {
        match self.name {
            TagName::Static(name) => Some(name),
            TagName::Interpolated(_) => None,
        }
    }

    fn display_name(&self) -> String {
        match self.name {
            TagName::Static(name) => name.to_string(),
            TagName::Interpolated(expr) => format!("#{{{}}}", expr),
        }
    }
}

// === Compiler ===

struct Compiler<'a> {
    evaluator: &'a dyn ConstantEvaluator,
    metadata: &'a TransformMetadata,
    options: &'a GenerateOptions,
    out: Output,
    pp: Option<&'a str>,
    indents: usize,
    /// Mixin bodies nest inside their caller's indentation at render time.
    parent_indents: usize,
    escape_pretty_mode: bool,
    doctype: Option<String>,
    terse: bool,
    xml: bool,
    has_compiled_doctype: bool,
    has_compiled_tag: bool,
    each_count: usize,
    runtime_used: BTreeSet<&'static str>,
}

impl<'a> Compiler<'a> {
    fn new(evaluator: &'a dyn ConstantEvaluator, metadata: &'a TransformMetadata, options: &'a GenerateOptions) -> Self {
        let mut compiler = Self {
            evaluator,
            metadata,
            options,
            out: Output::new(),
            pp: options.pretty.as_deref(),
            indents: 0,
            parent_indents: 0,
            escape_pretty_mode: false,
            doctype: None,
            terse: false,
            xml: false,
            has_compiled_doctype: false,
            has_compiled_tag: false,
            each_count: 0,
            runtime_used: BTreeSet::new(),
        };
        if compiler.pp.is_some() {
            compiler.out.push("var pug_indent = [];");
        }
        if let Some(doctype) = &options.doctype {
            compiler.set_doctype(doctype);
        }
        if options.compile_debug && options.inline_runtime_functions {
            compiler.runtime_used.insert("rethrow");
        }
        compiler
    }

    /// Code that reaches runtime helper `name`.
    fn runtime(&mut self, name: &'static str) -> String {
        if self.options.inline_runtime_functions {
            self.runtime_used.insert(name);
            format!("pug_{}", name)
        } else {
            format!("pug.{}", name)
        }
    }

    /// Selecting HTML5 switches to terse output.
    fn set_doctype(&mut self, name: &str) {
        let doctype = html::doctype(name);
        self.terse = doctype.to_lowercase() == "<!doctype html>";
        self.xml = doctype.starts_with("<?xml");
        self.doctype = Some(doctype);
    }

    fn finish(self) -> GenerateResult {
        let options = self.options;
        let mut js = self.out.finish();

        match options.locals {
            LocalsMode::SelfObject => js = format!("var self = locals || {{}};{}", js),
            LocalsMode::With => {
                let exclude: Vec<String> = self.runtime_used.iter().map(|name| format!("pug_{}", name)).collect();
                js = locals::wrap(&js, &exclude);
            }
            LocalsMode::Bare => {}
        }

        if options.compile_debug {
            if let Some(sources) = &options.include_sources {
                let sources: serde_json::Map<String, Value> = sources
                    .iter()
                    .map(|(file, source)| (file.clone(), Value::String(source.clone())))
                    .collect();
                js = format!("var pug_debug_sources = {};\n{}", stringify(&Value::Object(sources)), js);
            }
            let rethrow = if options.inline_runtime_functions { "pug_rethrow" } else { "pug.rethrow" };
            let source_arg = if options.include_sources.is_some() {
                ", pug_debug_sources[pug_debug_filename]"
            } else {
                ""
            };
            js = format!(
                "var pug_debug_filename, pug_debug_line;try {{{}}} catch (err) {{{}(err, pug_debug_filename, pug_debug_line{});}}",
                js, rethrow, source_arg
            );
        }

        let mut bundle = runtime::build(self.runtime_used.iter().copied());
        if !bundle.is_empty() {
            bundle.push('\n');
        }
        let code = format!(
            "{}function {}(locals) {{var pug_html = \"\", pug_mixins = {{}}, pug_interp;{};return pug_html;}}",
            bundle, options.template_name, js
        );
        GenerateResult {
            code,
            runtime_functions: self.runtime_used.iter().map(|name| name.to_string()).collect(),
        }
    }

    // === Buffering ===

    /// Buffer `src`, folding it when its value is known now.
    fn buffer_expression(&mut self, src: &str) {
        match self.evaluator.evaluate(src) {
            Some(value) => self.out.buffer(&to_js_string(&value)),
            None => self.out.buffer_expression(src),
        }
    }

    fn pretty_indent(&mut self, offset: usize, newline: bool) {
        let pp = self.pp.unwrap_or_default();
        let mut text = String::from(if newline { "\n" } else { "" });
        text.push_str(&pp.repeat((self.indents + offset).saturating_sub(1)));
        self.out.buffer(&text);
        if self.parent_indents > 0 {
            self.out.push("pug_html = pug_html + pug_indent.join(\"\");");
        }
    }

    fn attrs(&mut self, attrs: &[Attribute], format: AttrFormat) -> String {
        let compiler = AttrsCompiler::new(self.evaluator, self.terse, format);
        compiler.compile(attrs, &mut |name: &'static str| self.runtime(name))
    }

    // === Visitors ===

    fn visit(&mut self, node: &Node) -> Result<()> {
        if let Node::Mixin(mixin) = node
            && !mixin.call
            && !self.metadata.keeps_mixin(&mixin.name)
        {
            return Ok(());
        }

        if self.options.compile_debug && !matches!(node, Node::Block(_) | Node::Code(CodeNode { debug: false, .. })) {
            let loc = node.loc();
            if loc.line > 0 {
                let mut js = format!(";pug_debug_line = {}", loc.line);
                if let Some(filename) = &loc.filename {
                    js.push_str(&format!(";pug_debug_filename = {}", stringify_str(filename)));
                }
                js.push(';');
                self.out.push(js);
            }
        }

        match node {
            Node::Block(block) => self.visit_block(block),
            Node::NamedBlock(named) => self.visit_block(&named.block),
            Node::Tag(tag) => self.visit_tag(TagView::from(tag)),
            Node::InterpolatedTag(tag) => self.visit_tag(TagView::from(tag)),
            Node::Text(text) => {
                self.out.buffer(&text.val);
                Ok(())
            }
            Node::Code(code) => self.visit_code(code),
            Node::Comment(comment) => {
                if comment.buffer {
                    if self.pp.is_some() {
                        self.pretty_indent(1, true);
                    }
                    self.out.buffer(&format!("<!--{}-->", comment.val));
                }
                Ok(())
            }
            Node::BlockComment(comment) => self.visit_block_comment(comment),
            Node::Doctype(doctype) => {
                self.visit_doctype(Some(doctype));
                Ok(())
            }
            Node::Each(each) => self.visit_each(each),
            Node::While(while_node) => {
                self.out.push(format!("while ({}) {{", while_node.test));
                self.visit_block(&while_node.block)?;
                self.out.push("}");
                Ok(())
            }
            Node::Conditional(conditional) => self.visit_conditional(conditional),
            Node::Case(case) => {
                self.out.push(format!("switch ({}){{", case.expr));
                self.visit_block(&case.block)?;
                self.out.push("}");
                Ok(())
            }
            Node::When(when) => self.visit_when(when),
            Node::Mixin(mixin) if mixin.call => self.visit_mixin_call(mixin),
            Node::Mixin(mixin) => self.visit_mixin_definition(mixin),
            Node::MixinBlock(_) => {
                self.visit_mixin_block();
                Ok(())
            }
            // Only meaningful once the template is included somewhere
            Node::YieldBlock(_) => Ok(()),
            Node::Filter(_) | Node::IncludeFilter(_) | Node::Include(_) | Node::RawInclude(_) | Node::Extends(_) => {
                Err(unsupported(node))
            }
        }
    }

    fn visit_block(&mut self, block: &Block) -> Result<()> {
        let pretty = self.pp.is_some() && !self.escape_pretty_mode;
        let nodes = &block.nodes;

        // Pretty print multi-line text
        if pretty && nodes.len() > 1 && matches!(nodes[0], Node::Text(_)) && matches!(nodes[1], Node::Text(_)) {
            self.pretty_indent(1, true);
        }
        for (i, node) in nodes.iter().enumerate() {
            if pretty
                && i > 0
                && matches!(node, Node::Text(_))
                && matches!(&nodes[i - 1], Node::Text(prev) if prev.val.ends_with('\n'))
            {
                self.pretty_indent(1, false);
            }
            self.visit(node)?;
        }
        Ok(())
    }

    fn visit_doctype(&mut self, doctype: Option<&DoctypeNode>) {
        if let Some(doctype) = doctype
            && (!doctype.val.is_empty() || self.doctype.is_none())
        {
            let name = if doctype.val.is_empty() { "html" } else { doctype.val.as_str() };
            self.set_doctype(name);
        }
        if let Some(doctype) = self.doctype.clone() {
            self.out.buffer(&doctype);
        }
        self.has_compiled_doctype = true;
    }

    fn visit_tag(&mut self, tag: TagView<'_>) -> Result<()> {
        self.indents += 1;
        let name = tag.static_name();
        let whitespace_sensitive = name.is_some_and(html::is_whitespace_sensitive);
        if whitespace_sensitive {
            self.escape_pretty_mode = true;
        }

        if !self.has_compiled_tag {
            if !self.has_compiled_doctype && name == Some("html") {
                self.visit_doctype(None);
            }
            self.has_compiled_tag = true;
        }

        if self.pp.is_some() && !tag.is_inline {
            self.pretty_indent(0, true);
        }

        self.out.buffer("<");
        self.buffer_tag_name(&tag);
        self.visit_attributes(tag.attrs, tag.attribute_blocks);

        if tag.self_closing || (!self.xml && name.is_some_and(html::is_void_element)) {
            if self.terse && !tag.self_closing {
                self.out.buffer(">");
            } else {
                self.out.buffer("/>");
            }
            let has_content = tag
                .block
                .nodes
                .iter()
                .any(|node| !matches!(node, Node::Text(text) if text.val.trim().is_empty()));
            if has_content {
                let display = tag.display_name();
                return Err(CompileError::new(
                    ErrorKind::SelfClosingContent,
                    format!("{} is a self closing element: <{}/> but contains nested content.", display, display),
                    tag.loc.line,
                    tag.loc.column,
                )
                .with_filename(tag.loc.filename.as_deref()));
            }
        } else {
            self.out.buffer(">");
            self.visit_block(tag.block)?;

            if self.pp.is_some() && !tag.is_inline && !whitespace_sensitive && !can_inline(tag.block) {
                self.pretty_indent(0, true);
            }

            self.out.buffer("</");
            self.buffer_tag_name(&tag);
            self.out.buffer(">");
        }

        if whitespace_sensitive {
            self.escape_pretty_mode = false;
        }
        self.indents -= 1;
        Ok(())
    }

    fn buffer_tag_name(&mut self, tag: &TagView<'_>) {
        match tag.name {
            TagName::Static(name) => self.out.buffer(name),
            TagName::Interpolated(expr) => self.buffer_expression(expr),
        }
    }

    fn visit_attributes(&mut self, attrs: &[Attribute], attribute_blocks: &[AttributeBlock]) {
        if !attribute_blocks.is_empty() {
            let spread = self.spread_attributes(attrs, attribute_blocks);
            let attrs_fn = self.runtime("attrs");
            let src = format!("{}({}, {})", attrs_fn, spread, self.terse);
            self.buffer_expression(&src);
        } else if !attrs.is_empty() {
            let html = self.attrs(attrs, AttrFormat::Html);
            self.buffer_expression(&html);
        }
    }

    /// One attributes object: the literal list first, then every
    /// `&attributes` argument, merged left to right.
    fn spread_attributes(&mut self, attrs: &[Attribute], attribute_blocks: &[AttributeBlock]) -> String {
        let mut items = Vec::with_capacity(attribute_blocks.len() + 1);
        if !attrs.is_empty() {
            items.push(self.attrs(attrs, AttrFormat::Object));
        }
        items.extend(attribute_blocks.iter().map(|block| block.val.clone()));
        match items.as_slice() {
            [single] => single.clone(),
            _ => format!("{}([{}])", self.runtime("merge"), items.join(",")),
        }
    }

    fn visit_code(&mut self, code: &CodeNode) -> Result<()> {
        if code.buffer {
            let val = code.val.trim();
            match self.evaluator.evaluate(val) {
                Some(value) => {
                    let text = if value.is_null() { String::new() } else { to_js_string(&value) };
                    let text = if code.must_escape { runtime::escape(&text) } else { text };
                    self.out.buffer(&text);
                }
                None => {
                    let mut src = format!("null == (pug_interp = {}) ? \"\" : pug_interp", val);
                    if code.must_escape {
                        src = format!("{}({})", self.runtime("escape"), src);
                    }
                    self.out.buffer_expression(&src);
                }
            }
        } else {
            self.out.push(code.val.clone());
        }

        if let Some(block) = &code.block {
            if !code.buffer {
                self.out.push("{");
            }
            self.visit_block(block)?;
            if !code.buffer {
                self.out.push("}");
            }
        }
        Ok(())
    }

    fn visit_block_comment(&mut self, comment: &BlockCommentNode) -> Result<()> {
        if !comment.buffer {
            return Ok(());
        }
        if self.pp.is_some() {
            self.pretty_indent(1, true);
        }
        self.out.buffer(&format!("<!--{}", comment.val));
        self.visit_block(&comment.block)?;
        if self.pp.is_some() {
            self.pretty_indent(1, true);
        }
        self.out.buffer("-->");
        Ok(())
    }

    fn visit_conditional(&mut self, conditional: &ConditionalNode) -> Result<()> {
        self.out.push(format!("if ({}) {{", conditional.test));
        self.visit_block(&conditional.consequent)?;
        self.out.push("}");
        match &conditional.alternate {
            Some(Alternate::Conditional(next)) => {
                self.out.push("else");
                self.visit_conditional(next)?;
            }
            Some(Alternate::Block(block)) => {
                self.out.push("else {");
                self.visit_block(block)?;
                self.out.push("}");
            }
            None => {}
        }
        Ok(())
    }

    fn visit_when(&mut self, when: &WhenNode) -> Result<()> {
        if when.is_default() {
            self.out.push("default:");
        } else {
            self.out.push(format!("case {}:", when.expr));
        }
        // without a block the branch falls through
        if let Some(block) = &when.block {
            self.visit_block(block)?;
            self.out.push("  break;");
        }
        Ok(())
    }

    fn visit_each(&mut self, each: &EachNode) -> Result<()> {
        let index = match &each.key {
            Some(key) => key.clone(),
            None => format!("pug_index{}", self.each_count),
        };
        self.each_count += 1;

        self.out.push(format!(
            "// iterate {}\n;(function(){{\n  var $$obj = {};\n  if ('number' == typeof $$obj.length) {{",
            each.obj, each.obj
        ));
        if each.alternate.is_some() {
            self.out.push("    if ($$obj.length) {");
        }
        self.out.push(format!(
            "      for (var {index} = 0, $$l = $$obj.length; {index} < $$l; {index}++) {{\n        var {} = $$obj[{index}];",
            each.val
        ));
        self.visit_block(&each.block)?;
        self.out.push("      }");
        if let Some(alternate) = &each.alternate {
            self.out.push("    } else {");
            self.visit_block(alternate)?;
            self.out.push("    }");
        }

        self.out.push(format!(
            "  }} else {{\n    var $$l = 0;\n    for (var {index} in $$obj) {{\n      $$l++;\n      var {} = $$obj[{index}];",
            each.val
        ));
        self.visit_block(&each.block)?;
        self.out.push("    }");
        if let Some(alternate) = &each.alternate {
            self.out.push("    if ($$l === 0) {");
            self.visit_block(alternate)?;
            self.out.push("    }");
        }
        self.out.push("  }\n}).call(this);\n");
        Ok(())
    }

    // === Mixins ===

    fn mixin_target(mixin: &MixinNode) -> String {
        if mixin.is_dynamic() {
            let expr = &mixin.name[2..mixin.name.len() - 1];
            format!("pug_mixins[{}]", expr)
        } else {
            format!("pug_mixins[{}]", stringify_str(&mixin.name))
        }
    }

    fn push_indent_frame(&mut self) {
        if let Some(pp) = self.pp {
            self.out.push(format!("pug_indent.push({});", stringify_str(&pp.repeat(self.indents))));
        }
    }

    fn pop_indent_frame(&mut self) {
        if self.pp.is_some() {
            self.out.push("pug_indent.pop();");
        }
    }

    fn visit_mixin_block(&mut self) {
        self.push_indent_frame();
        self.out.push("block && block();");
        self.pop_indent_frame();
    }

    fn visit_mixin_call(&mut self, mixin: &MixinNode) -> Result<()> {
        let target = Self::mixin_target(mixin);
        let args = mixin.args.as_deref().unwrap_or("");
        let has_attrs = !mixin.attrs.is_empty() || !mixin.attribute_blocks.is_empty();

        self.push_indent_frame();
        if mixin.block.is_none() && !has_attrs {
            self.out.push(format!("{}({});", target, args));
            self.pop_indent_frame();
            return Ok(());
        }

        self.out.push(format!("{}.call({{", target));
        if let Some(block) = &mixin.block {
            self.out.push("block: function(){");
            // rendered with no indentation of its own, the caller's is added at render time
            self.parent_indents += 1;
            let indents = std::mem::replace(&mut self.indents, 0);
            self.visit_block(block)?;
            self.indents = indents;
            self.parent_indents -= 1;
            self.out.push(if has_attrs { "}," } else { "}" });
        }

        if !mixin.attribute_blocks.is_empty() {
            let spread = self.spread_attributes(&mixin.attrs, &mixin.attribute_blocks);
            self.out.push(format!("attributes: {}", spread));
        } else if !mixin.attrs.is_empty() {
            let attributes = self.attrs(&mixin.attrs, AttrFormat::Object);
            self.out.push(format!("attributes: {}", attributes));
        }

        if args.is_empty() {
            self.out.push("});");
        } else {
            self.out.push(format!("}}, {});", args));
        }
        self.pop_indent_frame();
        Ok(())
    }

    fn visit_mixin_definition(&mut self, mixin: &MixinNode) -> Result<()> {
        let target = Self::mixin_target(mixin);
        let mut params: Vec<&str> = match mixin.args.as_deref() {
            Some(args) if !args.is_empty() => args.split(',').collect(),
            _ => Vec::new(),
        };
        let rest = match params.last() {
            Some(last) if last.trim().starts_with("...") => {
                let name = last.trim()[3..].to_string();
                params.pop();
                Some(name)
            }
            _ => None,
        };

        self.out.push(format!("{} = pug_interp = function({}){{", target, params.join(",")));
        self.out
            .push("var block = (this && this.block), attributes = (this && this.attributes) || {};");
        if let Some(rest) = rest {
            self.out.push(format!("var {} = [];", rest));
            self.out.push(format!(
                "for (pug_interp = {}; pug_interp < arguments.length; pug_interp++) {{",
                params.len()
            ));
            self.out.push(format!("  {}.push(arguments[pug_interp]);", rest));
            self.out.push("}");
        }
        self.parent_indents += 1;
        if let Some(block) = &mixin.block {
            self.visit_block(block)?;
        }
        self.parent_indents -= 1;
        self.out.push("};");
        Ok(())
    }
}

/// Whether pretty output can keep all of `block` on the tag's line.
fn can_inline(block: &Block) -> bool {
    block.nodes.iter().all(|node| match node {
        Node::Block(inner) => can_inline(inner),
        Node::YieldBlock(_) => true,
        Node::Text(text) => !text.val.contains('\n'),
        other => other.is_inline(),
    })
}

/// Nodes an earlier stage should have resolved.
fn unsupported(node: &Node) -> CompileError {
    let loc = node.loc();
    let message = format!(
        "A child of Block ({}:{}) is of type {}, which is not supported by the code generator.",
        loc.filename.as_deref().unwrap_or("Pug"),
        loc.line,
        node.type_name()
    );
    let help = match node {
        Node::Filter(_) | Node::IncludeFilter(_) => "Apply filters to the AST before generating code.",
        _ => "Resolve includes and template inheritance with a linker before generating code.",
    };
    CompileError::new(ErrorKind::UnsupportedNodeType, message, loc.line, loc.column)
        .with_filename(loc.filename.as_deref())
        .with_help(help)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::JavaScript;
    use crate::parser::{Parser, PugParser};
    use crate::plugin::Plugins;
    use crate::transform::standard_plugins;

    fn plain() -> GenerateOptions {
        GenerateOptions {
            compile_debug: false,
            locals: LocalsMode::Bare,
            ..GenerateOptions::default()
        }
    }

    fn generate(source: &str, options: &GenerateOptions) -> Result<String> {
        let js = JavaScript::new();
        let plugins = Plugins::default();
        let mut ast = PugParser::new(&js, &plugins).with_filename(Some("t.pug")).parse(source)?;
        let mut transformer = standard_plugins();
        let metadata = transformer.transform(&mut ast).clone();
        let result = JavaScriptGenerator::new(&js).generate(&ast, &metadata, options)?;
        Ok(readable(&result.code))
    }

    /// Undo the script-safe escapes so assertions can use plain markup.
    fn readable(code: &str) -> String {
        code.replace("\\u003C", "<")
            .replace("\\u003E", ">")
            .replace("\\u002F", "/")
    }

    /// The statements between the prologue and `return`.
    fn body(source: &str) -> String {
        let code = generate(source, &plain()).unwrap();
        let start = code.find("pug_interp;").unwrap() + "pug_interp;".len();
        let end = code.rfind(";return pug_html;}").unwrap();
        code[start..end].to_string()
    }

    #[test]
    fn test_static_markup_is_one_statement() {
        assert_eq!(
            body("div\n  p Hello"),
            r#"pug_html = pug_html + "<div><p>Hello</p></div>";"#
        );
    }

    #[test]
    fn test_function_wrapper() {
        let code = generate("p", &plain()).unwrap();
        assert!(code.starts_with("function template(locals) {var pug_html = \"\", pug_mixins = {}, pug_interp;"));
        assert!(code.ends_with(";return pug_html;}"));
    }

    #[test]
    fn test_escaped_code() {
        assert_eq!(
            body("p= name"),
            r#"pug_html = pug_html + "<p>" + (pug.escape(null == (pug_interp = name) ? "" : pug_interp)) + "</p>";"#
        );
    }

    #[test]
    fn test_constant_code_is_folded() {
        assert_eq!(body("p= '<b>'"), r#"pug_html = pug_html + "<p>&lt;b&gt;</p>";"#);
        assert_eq!(body("p!= 1 + 1"), r#"pug_html = pug_html + "<p>2</p>";"#);
    }

    #[test]
    fn test_attributes_are_folded() {
        assert_eq!(
            body("a(href='#top' class='x')"),
            r##"pug_html = pug_html + "<a class=\"x\" href=\"#top\"></a>";"##
        );
    }

    #[test]
    fn test_conditional_chain() {
        let out = body("if a\n  p a\nelse if b\n  p b\nelse\n  p c");
        assert!(out.starts_with("if (a) {\n"));
        assert!(out.contains("}\nelse\nif (b) {\n"));
        assert!(out.contains("}\nelse {\n"));
    }

    #[test]
    fn test_each_lowering() {
        let out = body("each item, i in items\n  li= item\nelse\n  li none");
        assert!(out.contains("// iterate items\n;(function(){\n  var $$obj = items;"));
        assert!(out.contains("for (var i = 0, $$l = $$obj.length; i < $$l; i++) {\n        var item = $$obj[i];"));
        assert!(out.contains("    if ($$obj.length) {"));
        assert!(out.contains("    if ($$l === 0) {"));
        assert!(out.ends_with("  }\n}).call(this);\n"));
    }

    #[test]
    fn test_each_index_names_are_unique() {
        let out = body("each a in x\n  each b in a\n    p= b");
        assert!(out.contains("var pug_index0"));
        assert!(out.contains("var pug_index1"));
    }

    #[test]
    fn test_case_when() {
        let out = body("case n\n  when 1\n  when 2\n    p few\n  default\n    p many");
        assert!(out.starts_with("switch (n){\ncase 1:\ncase 2:\n"));
        assert!(out.contains("  break;\ndefault:\n"));
        assert!(out.ends_with("}"));
    }

    #[test]
    fn test_unused_mixins_are_elided() {
        let out = body("mixin used\n  p used\nmixin unused\n  p unused\n+used");
        assert!(out.contains("pug_mixins[\"used\"] = pug_interp = function(){"));
        assert!(!out.contains("unused"));
        assert!(out.ends_with("pug_mixins[\"used\"]();"));
    }

    #[test]
    fn test_dynamic_call_keeps_definitions() {
        let out = body("mixin a\n  p a\n+#{name}(1)");
        assert!(out.contains("pug_mixins[\"a\"] = pug_interp"));
        assert!(out.contains("pug_mixins[name](1);"));
    }

    #[test]
    fn test_mixin_rest_arguments() {
        let out = body("mixin list(title, ...items)\n  p= title\n+list('a', 1, 2)");
        assert!(out.contains("pug_mixins[\"list\"] = pug_interp = function(title){"));
        assert!(out.contains("var items = [];\nfor (pug_interp = 1; pug_interp < arguments.length; pug_interp++) {"));
    }

    #[test]
    fn test_mixin_call_with_block_and_attributes() {
        let out = body("mixin m\n  div(class=attributes.class)\n    block\n+m.big\n  p inner");
        assert!(out.contains("pug_mixins[\"m\"].call({\nblock: function(){\n"));
        assert!(out.contains("},\nattributes: {\"class\": \"big\"}\n});"));
        assert!(out.contains("block && block();"));
    }

    #[test]
    fn test_attribute_spread_merges() {
        let out = body("div(id='a')&attributes(extra)");
        assert!(out.contains(r#"pug.attrs(pug.merge([{"id": "a"},extra]), false)"#));
    }

    #[test]
    fn test_doctype_makes_output_terse() {
        let out = body("doctype html\ninput(checked)");
        assert!(out.contains(r#"<!DOCTYPE html><input checked>"#));
        let out = body("doctype xml\nfoo(bar)");
        assert!(out.contains(r#"<foo bar=\"bar\"></foo>"#));
    }

    #[test]
    fn test_configured_doctype_applies_to_html_tag() {
        let options = GenerateOptions {
            doctype: Some("html".to_string()),
            ..plain()
        };
        let code = generate("html\n  br", &options).unwrap();
        assert!(code.contains(r#"<!DOCTYPE html><html><br>"#));
    }

    #[test]
    fn test_void_element_with_content_fails() {
        let err = generate("br\n  p oops", &plain()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SelfClosingContent);
        assert_eq!(err.message, "br is a self closing element: <br/> but contains nested content.");
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    fn test_include_is_unsupported() {
        let err = generate("include foo.pug", &plain()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedNodeType);
        assert!(err.message.contains("(t.pug:1) is of type Include"));
        assert!(err.help.is_some());
    }

    #[test]
    fn test_debug_markers_and_rethrow() {
        let options = GenerateOptions {
            locals: LocalsMode::Bare,
            ..GenerateOptions::default()
        };
        let code = generate("p\n  | hi", &options).unwrap();
        assert!(code.contains(";pug_debug_line = 1;pug_debug_filename = \"t.pug\";"));
        assert!(code.contains(";pug_debug_line = 2;pug_debug_filename = \"t.pug\";"));
        assert!(code.contains("var pug_debug_filename, pug_debug_line;try {"));
        assert!(code.contains("} catch (err) {pug.rethrow(err, pug_debug_filename, pug_debug_line);}"));
    }

    #[test]
    fn test_inline_runtime_bundles_helpers() {
        let options = GenerateOptions {
            inline_runtime_functions: true,
            locals: LocalsMode::Bare,
            ..GenerateOptions::default()
        };
        let code = generate("p= name", &options).unwrap();
        assert!(code.starts_with("function pug_escape("));
        assert!(code.contains("pug_escape(null == (pug_interp = name)"));
        assert!(code.contains("pug_rethrow(err, pug_debug_filename, pug_debug_line);"));
    }

    #[test]
    fn test_locals_modes() {
        let with = generate("p= name", &GenerateOptions { compile_debug: false, ..GenerateOptions::default() }).unwrap();
        assert!(with.contains("(function (name) {"));
        assert!(with.contains("\"name\" in locals_for_with ? locals_for_with.name"));

        let self_mode = GenerateOptions {
            compile_debug: false,
            locals: LocalsMode::SelfObject,
            ..GenerateOptions::default()
        };
        let code = generate("p= self.name", &self_mode).unwrap();
        assert!(code.contains("pug_interp;var self = locals || {};pug_html"));
    }

    #[test]
    fn test_pretty_output() {
        let options = GenerateOptions {
            pretty: Some("  ".to_string()),
            ..plain()
        };
        let code = generate("div\n  p hi\n  pre\n    | a", &options).unwrap();
        assert!(code.contains("var pug_indent = [];"));
        assert!(code.contains(r#""\n<div>\n  <p>hi</p>\n  <pre>a</pre>\n</div>""#));
    }

    #[test]
    fn test_pretty_ignores_empty_pipe_lines() {
        let options = GenerateOptions {
            pretty: Some("  ".to_string()),
            ..plain()
        };
        let code = generate("p\n  |\n  | a", &options).unwrap();
        assert!(code.contains(r#""\n<p>a</p>""#));
    }

    #[test]
    fn test_pretty_indent_is_quoted() {
        let options = GenerateOptions {
            pretty: Some("'\\".to_string()),
            ..plain()
        };
        let code = generate("mixin m\n  block\ndiv\n  +m\n    p", &options).unwrap();
        assert!(code.contains(r#"pug_indent.push("'\\");"#));
    }
}
