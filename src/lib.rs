//! Pug template compiler.
//!
//! Source text goes through four stages: the [`parser::Lexer`] turns it
//! into tokens, the [`parser::TreeBuilder`] into an [`ast::Ast`], the
//! [`transform`] passes collect what the generator needs to know up front,
//! and the [`generate::JavaScriptGenerator`] writes a JavaScript function
//! `template(locals)` returning the rendered HTML.
//!
//! ```no_run
//! let result = pug_compiler::compile("p Hello #{name}").unwrap();
//! assert!(result.code.starts_with("function template(locals)"));
//! ```

pub mod ast;
pub mod error;
pub mod expr;
pub mod generate;
pub mod html;
pub mod parser;
pub mod plugin;
pub mod transform;

pub use error::{CompileError, ErrorKind, Result};
pub use generate::LocalsMode;

use ast::Ast;
use expr::{ConstantEvaluator, ExpressionValidator, JavaScript};
use generate::{GenerateOptions, Generator, JavaScriptGenerator};
use parser::{Parser, PugParser, Token};
use plugin::Plugins;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `pretty` accepts `true` for two-space indentation or the indent itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Pretty {
    Enabled(bool),
    Indent(String),
}

impl Pretty {
    pub fn indent(&self) -> Option<String> {
        match self {
            Pretty::Enabled(true) => Some("  ".to_string()),
            Pretty::Enabled(false) => None,
            Pretty::Indent(indent) if indent.is_empty() => None,
            Pretty::Indent(indent) => Some(indent.clone()),
        }
    }
}

impl Default for Pretty {
    fn default() -> Self {
        Pretty::Enabled(false)
    }
}

/// Configuration for compilation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Reported in errors and debug markers
    pub filename: Option<String>,
    pub doctype: Option<String>,
    pub pretty: Pretty,
    pub compile_debug: bool,
    pub inline_runtime_functions: bool,
    /// Name of the generated function (default: "template")
    pub template_name: String,
    pub locals: LocalsMode,
    pub include_sources: Option<BTreeMap<String, String>>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            filename: None,
            doctype: None,
            pretty: Pretty::default(),
            compile_debug: true,
            inline_runtime_functions: false,
            template_name: "template".to_string(),
            locals: LocalsMode::default(),
            include_sources: None,
        }
    }
}

impl CompileOptions {
    pub fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            doctype: self.doctype.clone(),
            pretty: self.pretty.indent(),
            compile_debug: self.compile_debug,
            inline_runtime_functions: self.inline_runtime_functions,
            template_name: self.template_name.clone(),
            locals: self.locals,
            include_sources: self.include_sources.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompileResult {
    pub code: String,
    /// Runtime helpers inlined into `code`
    pub runtime_functions: Vec<String>,
}

/// Compiler front to back, with its collaborators and plugins.
///
/// A pipeline holds no per-template state, so one instance can compile any
/// number of templates.
pub struct Pipeline {
    validator: Box<dyn ExpressionValidator>,
    evaluator: Box<dyn ConstantEvaluator>,
    plugins: Plugins,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            validator: Box::new(JavaScript::new()),
            evaluator: Box::new(JavaScript::new()),
            plugins: Plugins::default(),
        }
    }

    pub fn with_validator(mut self, validator: impl ExpressionValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn with_evaluator(mut self, evaluator: impl ConstantEvaluator + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    pub fn with_plugins(mut self, plugins: Plugins) -> Self {
        self.plugins = plugins;
        self
    }

    fn parser(&self, filename: Option<&str>) -> PugParser<'_> {
        PugParser::new(self.validator.as_ref(), &self.plugins).with_filename(filename)
    }

    pub fn lex(&self, source: &str, filename: Option<&str>) -> Result<Vec<Token>> {
        self.parser(filename).tokenize(source)
    }

    pub fn parse(&self, source: &str, filename: Option<&str>) -> Result<Ast> {
        self.parser(filename).parse(source)
    }

    pub fn compile(&self, source: &str, options: &CompileOptions) -> Result<CompileResult> {
        let filename = options.filename.as_deref();
        let mut ast = self.parse(source, filename)?;

        let mut transformer = transform::standard_plugins();
        let metadata = transformer.transform(&mut ast);
        tracing::debug!(
            mixins_called = metadata.mixins_called.len(),
            dynamic_mixins = metadata.dynamic_mixins,
            "analysed template"
        );

        let generator = JavaScriptGenerator::new(self.evaluator.as_ref());
        let result = generator.generate(&ast, metadata, &options.generate_options())?;
        tracing::debug!(bytes = result.code.len(), filename, "generated template");

        Ok(CompileResult {
            code: result.code,
            runtime_functions: result.runtime_functions,
        })
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile with default options.
pub fn compile(source: &str) -> Result<CompileResult> {
    compile_with(source, &CompileOptions::default())
}

pub fn compile_with(source: &str, options: &CompileOptions) -> Result<CompileResult> {
    Pipeline::new().compile(source, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_json() {
        let options: CompileOptions = serde_json::from_str(
            r#"{"pretty": "\t", "locals": "self", "compile_debug": false, "template_name": "render"}"#,
        )
        .unwrap();
        assert_eq!(options.pretty.indent().as_deref(), Some("\t"));
        assert_eq!(options.locals, LocalsMode::SelfObject);
        assert!(!options.compile_debug);
        assert_eq!(options.template_name, "render");
        assert!(!options.inline_runtime_functions);
    }

    #[test]
    fn test_pretty_flag() {
        let options: CompileOptions = serde_json::from_str(r#"{"pretty": true}"#).unwrap();
        assert_eq!(options.generate_options().pretty.as_deref(), Some("  "));
        assert!(options.compile_debug);
        assert_eq!(options.locals, LocalsMode::With);
    }

    #[test]
    fn test_compile_names_the_function() {
        let options = CompileOptions {
            template_name: "page".to_string(),
            ..CompileOptions::default()
        };
        let result = compile_with("p hi", &options).unwrap();
        assert!(result.code.starts_with("function page(locals) {"));
        assert!(result.runtime_functions.is_empty());
    }

    #[test]
    fn test_errors_carry_the_filename() {
        let options = CompileOptions {
            filename: Some("views/index.pug".to_string()),
            ..CompileOptions::default()
        };
        let err = compile_with("div(class='a'", &options).unwrap_err();
        assert_eq!(err.code(), "NO_END_BRACKET");
        assert_eq!(err.filename.as_deref(), Some("views/index.pug"));
    }
}
