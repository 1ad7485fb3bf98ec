use super::value::{as_number, number, to_js_string, truthy};
use super::{named_children, wrapped_expression, ConstantEvaluator, JavaScript, Value};
use serde_json::Map;
use tree_sitter::Node;

impl ConstantEvaluator for JavaScript {
    fn evaluate(&self, source: &str) -> Option<Value> {
        let (tree, text) = self.parse_wrapped(source)?;
        if tree.root_node().has_error() {
            return None;
        }
        let expression = wrapped_expression(&tree, &text)?;
        eval(expression, &text)
    }
}

fn eval(node: Node<'_>, text: &str) -> Option<Value> {
    let src = &text[node.byte_range()];
    match node.kind() {
        "parenthesized_expression" => eval(named_children(node).next()?, text),
        "string" => Some(Value::String(unescape(&src[1..src.len() - 1])?)),
        "template_string" => {
            if named_children(node).any(|c| c.kind() == "template_substitution") {
                return None;
            }
            Some(Value::String(unescape(&src[1..src.len() - 1])?))
        }
        "number" => number(parse_number(src)?),
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        "array" => {
            let mut items = Vec::new();
            let mut after_separator = true;
            for i in 0..node.child_count() {
                let Some(child) = node.child(i) else { continue };
                match child.kind() {
                    "[" | "]" | "comment" => {}
                    "," => {
                        // holes such as `[1,,2]` have no constant JSON form
                        if after_separator {
                            return None;
                        }
                        after_separator = true;
                    }
                    _ => {
                        items.push(eval(child, text)?);
                        after_separator = false;
                    }
                }
            }
            Some(Value::Array(items))
        }
        "object" => {
            let mut map = Map::new();
            for pair in named_children(node) {
                if pair.kind() != "pair" {
                    return None;
                }
                let key = pair.child_by_field_name("key")?;
                let key = match key.kind() {
                    "property_identifier" => text[key.byte_range()].to_string(),
                    "string" => {
                        let raw = &text[key.byte_range()];
                        unescape(&raw[1..raw.len() - 1])?
                    }
                    "number" => to_js_string(&number(parse_number(&text[key.byte_range()])?)?),
                    _ => return None,
                };
                let value = eval(pair.child_by_field_name("value")?, text)?;
                map.insert(key, value);
            }
            Some(Value::Object(map))
        }
        "unary_expression" => {
            let operator = node.child_by_field_name("operator")?;
            let argument = eval(node.child_by_field_name("argument")?, text)?;
            match operator.kind() {
                "!" => Some(Value::Bool(!truthy(&argument))),
                "-" => number(-as_number(&argument)?),
                "+" => number(as_number(&argument)?),
                "typeof" => Some(Value::String(type_of(&argument).to_string())),
                _ => None,
            }
        }
        "binary_expression" => {
            let operator = node.child_by_field_name("operator")?;
            let left = eval(node.child_by_field_name("left")?, text)?;
            match operator.kind() {
                "&&" => {
                    return if truthy(&left) { eval(node.child_by_field_name("right")?, text) } else { Some(left) };
                }
                "||" => {
                    return if truthy(&left) { Some(left) } else { eval(node.child_by_field_name("right")?, text) };
                }
                "??" => {
                    return if left.is_null() { eval(node.child_by_field_name("right")?, text) } else { Some(left) };
                }
                _ => {}
            }
            let right = eval(node.child_by_field_name("right")?, text)?;
            binary(operator.kind(), &left, &right)
        }
        "ternary_expression" => {
            let condition = eval(node.child_by_field_name("condition")?, text)?;
            let branch = if truthy(&condition) { "consequence" } else { "alternative" };
            eval(node.child_by_field_name(branch)?, text)
        }
        _ => None,
    }
}

fn binary(operator: &str, left: &Value, right: &Value) -> Option<Value> {
    let is_stringish = |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
    match operator {
        "+" if is_stringish(left) || is_stringish(right) => {
            Some(Value::String(to_js_string(left) + &to_js_string(right)))
        }
        "+" => number(as_number(left)? + as_number(right)?),
        "-" => number(as_number(left)? - as_number(right)?),
        "*" => number(as_number(left)? * as_number(right)?),
        "/" => number(as_number(left)? / as_number(right)?),
        "%" => number(as_number(left)? % as_number(right)?),
        _ => None,
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Null | Value::Array(_) | Value::Object(_) => "object",
    }
}

fn parse_number(src: &str) -> Option<f64> {
    let cleaned: String = src.chars().filter(|c| *c != '_').collect::<String>().to_ascii_lowercase();
    if cleaned.ends_with('n') {
        return None;
    }
    let radix = |prefix: &str, radix: u32| -> Option<f64> {
        cleaned.strip_prefix(prefix).and_then(|digits| i64::from_str_radix(digits, radix).ok()).map(|n| n as f64)
    };
    if cleaned.starts_with("0x") {
        return radix("0x", 16);
    }
    if cleaned.starts_with("0o") {
        return radix("0o", 8);
    }
    if cleaned.starts_with("0b") {
        return radix("0b", 2);
    }
    // legacy octal literals
    if cleaned.len() > 1 && cleaned.starts_with('0') && cleaned.as_bytes()[1].is_ascii_digit() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Decode the escapes of a JavaScript string body.
fn unescape(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let escaped = chars.next()?;
        match escaped {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' if !chars.peek().is_some_and(|c| c.is_ascii_digit()) => out.push('\0'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
            }
            'u' => {
                let code = if chars.peek() == Some(&'{') {
                    chars.next();
                    let hex: String = chars.by_ref().take_while(|c| *c != '}').collect();
                    u32::from_str_radix(&hex, 16).ok()?
                } else {
                    let hex: String = chars.by_ref().take(4).collect();
                    u32::from_str_radix(&hex, 16).ok()?
                };
                // lone surrogates cannot be represented
                out.push(char::from_u32(code)?);
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\n' | '\u{2028}' | '\u{2029}' => {}
            c if c.is_ascii_digit() => return None,
            other => out.push(other),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literals() {
        let js = JavaScript::new();
        assert_eq!(js.evaluate("'a\\'b'"), Some(json!("a'b")));
        assert_eq!(js.evaluate("\"x\\u0041\""), Some(json!("xA")));
        assert_eq!(js.evaluate("`plain`"), Some(json!("plain")));
        assert_eq!(js.evaluate("0x10"), Some(json!(16)));
        assert_eq!(js.evaluate("1_000"), Some(json!(1000)));
        assert_eq!(js.evaluate("1.5"), Some(json!(1.5)));
        assert_eq!(js.evaluate("null"), Some(json!(null)));
    }

    #[test]
    fn test_structures() {
        let js = JavaScript::new();
        assert_eq!(js.evaluate("['a', 'b']"), Some(json!(["a", "b"])));
        assert_eq!(js.evaluate("{foo: true, 'bar-baz': 1}"), Some(json!({"foo": true, "bar-baz": 1})));
        assert_eq!(js.evaluate("[1,,2]"), None);
        assert_eq!(js.evaluate("{a}"), None);
    }

    #[test]
    fn test_operators() {
        let js = JavaScript::new();
        assert_eq!(js.evaluate("'a' + 1"), Some(json!("a1")));
        assert_eq!(js.evaluate("-(2 * 3)"), Some(json!(-6)));
        assert_eq!(js.evaluate("!0"), Some(json!(true)));
        assert_eq!(js.evaluate("true ? 'y' : 'n'"), Some(json!("y")));
        assert_eq!(js.evaluate("'' || 'fallback'"), Some(json!("fallback")));
    }

    #[test]
    fn test_non_constants() {
        let js = JavaScript::new();
        for src in ["foo", "`a ${b}`", "a + 1", "f()", "undefined", "null == (pug_interp = 1) ? '' : pug_interp"] {
            assert!(!js.is_constant(src), "{src}");
        }
    }
}
