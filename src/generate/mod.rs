mod attrs;
mod javascript;
mod locals;
mod output;
pub mod runtime;

pub use attrs::{AttrFormat, AttrsCompiler};
pub use javascript::JavaScriptGenerator;
pub use locals::{INTERNAL_VARIABLES, free_variables};
pub use output::{MAX_CONCATENATIONS, Output};

use crate::ast::Ast;
use crate::error::Result;
use crate::transform::TransformMetadata;
use serde::Deserialize;
use std::collections::BTreeMap;

/// How template locals are exposed to template code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalsMode {
    /// Free variables are read from `locals`, falling back to globals.
    #[default]
    With,
    /// Locals are only reachable as `self.name`.
    #[serde(rename = "self")]
    SelfObject,
    /// Template code refers to `locals` directly.
    Bare,
}

/// Generator options
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Doctype shorthand applied before the first `html` tag.
    pub doctype: Option<String>,
    /// Indentation unit; `None` disables pretty output.
    pub pretty: Option<String>,
    pub compile_debug: bool,
    pub inline_runtime_functions: bool,
    pub template_name: String,
    pub locals: LocalsMode,
    /// Template sources handed to `rethrow` for error context.
    pub include_sources: Option<BTreeMap<String, String>>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            doctype: None,
            pretty: None,
            compile_debug: true,
            inline_runtime_functions: false,
            template_name: "template".to_string(),
            locals: LocalsMode::default(),
            include_sources: None,
        }
    }
}

/// Generation result
#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub code: String,
    /// Runtime helpers bundled into `code`, by name.
    pub runtime_functions: Vec<String>,
}

/// Generator trait - converts AST to code
pub trait Generator {
    /// `metadata` must come from running the standard transform plugins
    /// over `ast`; mixins it does not record as called are not emitted.
    fn generate(&self, ast: &Ast, metadata: &TransformMetadata, options: &GenerateOptions) -> Result<GenerateResult>;
}
