//! Exposing `locals` properties as plain variables.
//!
//! Every identifier the template body reads without declaring it is turned
//! into a parameter of a wrapper function, bound to `locals.name` when the
//! property exists and to the global of the same name otherwise.

use std::collections::HashSet;
use tree_sitter::{Node, Parser};

/// Names the generated code declares itself.
pub const INTERNAL_VARIABLES: &[&str] = &[
    "pug",
    "pug_mixins",
    "pug_interp",
    "pug_debug_filename",
    "pug_debug_line",
    "pug_debug_sources",
    "pug_html",
];

const LOCALS: &str = "locals_for_with";

/// Wrap `body` so its free variables resolve against `locals`.
pub fn wrap(body: &str, exclude: &[String]) -> String {
    let vars: Vec<String> = free_variables(body)
        .into_iter()
        .filter(|name| !INTERNAL_VARIABLES.contains(&name.as_str()))
        .filter(|name| !exclude.contains(name))
        .filter(|name| !matches!(name.as_str(), "locals" | "undefined" | "arguments" | "eval"))
        .collect();
    if vars.is_empty() {
        return body.to_string();
    }

    let mut local = LOCALS.to_string();
    while body.contains(&local) {
        local.push('_');
    }
    let args: String = vars
        .iter()
        .map(|name| {
            format!(
                ",\"{name}\" in {local} ? {local}.{name} : typeof {name} !== \"undefined\" ? {name} : undefined"
            )
        })
        .collect();
    format!(
        ";var {local} = (locals || {{}});(function ({}) {{{body}}}.call(this{args}));",
        vars.join(", ")
    )
}

/// Identifiers read by `source` that no enclosing scope declares, in order
/// of first use.
pub fn free_variables(source: &str) -> Vec<String> {
    let mut parser = Parser::new();
    if parser.set_language(&tree_sitter_javascript::LANGUAGE.into()).is_err() {
        return Vec::new();
    }
    let Some(tree) = parser.parse(source, None) else {
        return Vec::new();
    };
    let root = tree.root_node();

    let mut scope = HashSet::new();
    hoist(root, source, &mut scope);
    let mut walker = ScopeWalker {
        source,
        scopes: vec![scope],
        seen: HashSet::new(),
        found: Vec::new(),
    };
    walker.visit(root);
    walker.found
}

struct ScopeWalker<'s> {
    source: &'s str,
    scopes: Vec<HashSet<String>>,
    seen: HashSet<String>,
    found: Vec<String>,
}

impl ScopeWalker<'_> {
    fn visit(&mut self, node: Node<'_>) {
        match node.kind() {
            kind if is_function(kind) => {
                let mut scope = HashSet::new();
                if kind != "function_declaration"
                    && let Some(name) = node.child_by_field_name("name")
                {
                    bind(name, self.source, &mut scope);
                }
                for field in ["parameters", "parameter"] {
                    if let Some(params) = node.child_by_field_name(field) {
                        bind(params, self.source, &mut scope);
                    }
                }
                if let Some(body) = node.child_by_field_name("body") {
                    hoist(body, self.source, &mut scope);
                    self.scopes.push(scope);
                    self.visit(body);
                    self.scopes.pop();
                }
            }
            "identifier" | "shorthand_property_identifier" => {
                let name = &self.source[node.byte_range()];
                if !self.scopes.iter().any(|scope| scope.contains(name)) && self.seen.insert(name.to_string()) {
                    self.found.push(name.to_string());
                }
            }
            _ => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit(child);
                }
            }
        }
    }
}

fn is_function(kind: &str) -> bool {
    matches!(
        kind,
        "function_declaration"
            | "function_expression"
            | "function"
            | "generator_function"
            | "generator_function_declaration"
            | "arrow_function"
            | "method_definition"
    )
}

/// Collect the names declared directly in `node`'s function scope.
fn hoist(node: Node<'_>, source: &str, scope: &mut HashSet<String>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "function_declaration" | "generator_function_declaration" | "class_declaration" => {
                if let Some(name) = child.child_by_field_name("name") {
                    bind(name, source, scope);
                }
                continue;
            }
            kind if is_function(kind) => continue,
            "variable_declarator" => {
                if let Some(name) = child.child_by_field_name("name") {
                    bind(name, source, scope);
                }
            }
            "for_in_statement" => {
                let declares = child
                    .child_by_field_name("kind")
                    .is_some_and(|kind| matches!(kind.kind(), "var" | "let" | "const"));
                if declares && let Some(left) = child.child_by_field_name("left") {
                    bind(left, source, scope);
                }
            }
            "catch_clause" => {
                if let Some(param) = child.child_by_field_name("parameter") {
                    bind(param, source, scope);
                }
            }
            _ => {}
        }
        hoist(child, source, scope);
    }
}

/// Record every name a binding pattern introduces.
fn bind(pattern: Node<'_>, source: &str, scope: &mut HashSet<String>) {
    match pattern.kind() {
        "identifier" | "shorthand_property_identifier_pattern" => {
            scope.insert(source[pattern.byte_range()].to_string());
        }
        "assignment_pattern" | "object_assignment_pattern" => {
            if let Some(left) = pattern.child_by_field_name("left") {
                bind(left, source, scope);
            }
        }
        "pair_pattern" => {
            if let Some(value) = pattern.child_by_field_name("value") {
                bind(value, source, scope);
            }
        }
        _ => {
            let mut cursor = pattern.walk();
            for child in pattern.named_children(&mut cursor) {
                bind(child, source, scope);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_variables_in_order() {
        let vars = free_variables("pug_html = pug_html + (name) + (user.age) + (name);");
        assert_eq!(vars, vec!["pug_html", "name", "user"]);
    }

    #[test]
    fn test_declarations_are_not_free() {
        let vars = free_variables("var a = 1; for (var k in obj) { a += k; } function f(x) { return x + y; }");
        assert_eq!(vars, vec!["obj", "y"]);
    }

    #[test]
    fn test_parameters_are_scoped_to_their_function() {
        let vars = free_variables("pug_mixins[\"m\"] = function(title){ pug_html = title; };\npug_html = title;");
        assert_eq!(vars, vec!["pug_mixins", "pug_html", "title"]);
    }

    #[test]
    fn test_properties_are_not_variables() {
        let vars = free_variables("a.b.c; ({d: e});");
        assert_eq!(vars, vec!["a", "e"]);
    }

    #[test]
    fn test_wrap_binds_locals() {
        let out = wrap("pug_html = pug_html + (name);", &[]);
        assert_eq!(
            out,
            ";var locals_for_with = (locals || {});(function (name) {pug_html = pug_html + (name);}.call(this,\"name\" in locals_for_with ? locals_for_with.name : typeof name !== \"undefined\" ? name : undefined));"
        );
    }

    #[test]
    fn test_wrap_without_free_variables_is_identity() {
        let body = "pug_html = pug_html + \"hi\";";
        assert_eq!(wrap(body, &[]), body);
    }

    #[test]
    fn test_wrap_respects_exclusions() {
        assert_eq!(wrap("pug_escape(x);", &["pug_escape".to_string(), "x".to_string()]), "pug_escape(x);");
    }
}
