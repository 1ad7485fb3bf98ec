//! Attribute list compilation.
//!
//! Attributes become either a JavaScript expression evaluating to the
//! attribute HTML (`AttrFormat::Html`) or an object literal passed to a
//! mixin as `attributes` (`AttrFormat::Object`). Values the evaluator can
//! fold are rendered at compile time.

use super::runtime;
use crate::ast::Attribute;
use crate::expr::value::stringify;
use crate::expr::{ConstantEvaluator, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrFormat {
    Html,
    Object,
}

enum Folded {
    Constant(Value),
    Dynamic(String),
}

pub struct AttrsCompiler<'a> {
    evaluator: &'a dyn ConstantEvaluator,
    terse: bool,
    format: AttrFormat,
}

impl<'a> AttrsCompiler<'a> {
    pub fn new(evaluator: &'a dyn ConstantEvaluator, terse: bool, format: AttrFormat) -> Self {
        Self {
            evaluator,
            terse,
            format,
        }
    }

    /// `runtime` maps a helper name to the code that reaches it at render
    /// time, recording the use.
    pub fn compile(&self, attrs: &[Attribute], runtime: &mut dyn FnMut(&'static str) -> String) -> String {
        let mut buf = Vec::new();
        let mut classes = Vec::new();
        let mut class_escaping = Vec::new();

        for attr in attrs {
            let src = attr.val.as_js();
            if attr.name == "class" {
                classes.push(src);
                class_escaping.push(attr.must_escape);
                continue;
            }
            let val = if attr.name == "style" {
                match self.evaluator.evaluate(src) {
                    Some(value) => Folded::Constant(Value::String(runtime::style(&value))),
                    None => Folded::Dynamic(format!("{}({})", runtime("style"), src)),
                }
            } else {
                self.fold(src)
            };
            self.add_attribute(&attr.name, val, attr.must_escape, &mut buf, runtime);
        }

        let mut classes_buf = Vec::new();
        if !classes.is_empty() {
            let folded: Vec<Option<Value>> = classes.iter().map(|src| self.evaluator.evaluate(src)).collect();
            if folded.iter().all(Option::is_some) {
                let values = Value::Array(folded.into_iter().flatten().collect());
                let class = runtime::classes(&values, Some(&class_escaping));
                self.add_attribute("class", Folded::Constant(Value::String(class)), false, &mut classes_buf, runtime);
            } else {
                let mut items = Vec::with_capacity(classes.len());
                for (i, (src, value)) in classes.iter().zip(folded).enumerate() {
                    match value {
                        Some(value) => {
                            let value = if class_escaping[i] { runtime::escape_value(&value) } else { value };
                            items.push(stringify(&value));
                            class_escaping[i] = false;
                        }
                        None => items.push(src.to_string()),
                    }
                }
                let escaping = Value::Array(class_escaping.iter().map(|&b| Value::Bool(b)).collect());
                let call = format!("{}([{}], {})", runtime("classes"), items.join(","), stringify(&escaping));
                self.add_attribute("class", Folded::Dynamic(call), false, &mut classes_buf, runtime);
            }
        }
        classes_buf.append(&mut buf);

        match self.format {
            AttrFormat::Html if classes_buf.is_empty() => "\"\"".to_string(),
            AttrFormat::Html => classes_buf.join("+"),
            AttrFormat::Object => format!("{{{}}}", classes_buf.join(",")),
        }
    }

    fn fold(&self, src: &str) -> Folded {
        match self.evaluator.evaluate(src) {
            Some(value) => Folded::Constant(value),
            None => Folded::Dynamic(src.to_string()),
        }
    }

    fn add_attribute(
        &self,
        key: &str,
        val: Folded,
        must_escape: bool,
        buf: &mut Vec<String>,
        runtime: &mut dyn FnMut(&'static str) -> String,
    ) {
        let key_js = stringify(&Value::String(key.to_string()));
        match (val, self.format) {
            (Folded::Constant(value), AttrFormat::Html) => {
                let html = stringify(&Value::String(runtime::attr(key, &value, must_escape, self.terse)));
                // adjacent literals are joined into one
                if let Some(last) = buf.last_mut()
                    && last.ends_with('"')
                {
                    last.pop();
                    last.push_str(&html[1..]);
                } else {
                    buf.push(html);
                }
            }
            (Folded::Constant(value), AttrFormat::Object) => {
                let value = if must_escape { runtime::escape_value(&value) } else { value };
                buf.push(format!("{}: {}", key_js, stringify(&value)));
            }
            (Folded::Dynamic(src), AttrFormat::Html) => {
                buf.push(format!(
                    "{}({}, {}, {}, {})",
                    runtime("attr"),
                    key_js,
                    src,
                    must_escape,
                    self.terse
                ));
            }
            (Folded::Dynamic(src), AttrFormat::Object) => {
                let src = if must_escape { format!("{}({})", runtime("escape"), src) } else { src };
                buf.push(format!("{}: {}", key_js, src));
            }
        }
    }
}
