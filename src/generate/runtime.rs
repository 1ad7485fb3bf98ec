//! Render-time helper library.
//!
//! Generated templates call these helpers either through a `pug` object or,
//! when inlined, through `pug_`-prefixed copies bundled into the output. The
//! Rust ports at the bottom are used to fold constant attributes at compile
//! time and must agree with the JavaScript versions.

use crate::expr::value::{to_js_string, truthy};
use serde_json::Value;
use std::collections::BTreeSet;

struct RuntimeFunction {
    name: &'static str,
    dependencies: &'static [&'static str],
    internal: bool,
    source: &'static str,
}

const FUNCTIONS: &[RuntimeFunction] = &[
    RuntimeFunction {
        name: "has_own_property",
        dependencies: &[],
        internal: true,
        source: "var pug_has_own_property = Object.prototype.hasOwnProperty;",
    },
    RuntimeFunction {
        name: "merge",
        dependencies: &["style"],
        internal: false,
        source: r#"function pug_merge(a, b) {
  if (arguments.length === 1) {
    var attrs = a[0];
    for (var i = 1; i < a.length; i++) attrs = pug_merge(attrs, a[i]);
    return attrs;
  }
  for (var key in b) {
    if (key === "class") {
      var valA = a[key] || [];
      a[key] = (Array.isArray(valA) ? valA : [valA]).concat(b[key] || []);
    } else if (key === "style") {
      a[key] = pug_style(a[key]) + pug_style(b[key]);
    } else {
      a[key] = b[key];
    }
  }
  return a;
}"#,
    },
    RuntimeFunction {
        name: "classes_array",
        dependencies: &["classes", "escape"],
        internal: true,
        source: r#"function pug_classes_array(val, escaping) {
  var classString = "", className, padding = "", escapeEnabled = Array.isArray(escaping);
  for (var i = 0; i < val.length; i++) {
    className = pug_classes(val[i]);
    if (!className) continue;
    escapeEnabled && escaping[i] && (className = pug_escape(className));
    classString = classString + padding + className;
    padding = " ";
  }
  return classString;
}"#,
    },
    RuntimeFunction {
        name: "classes_object",
        dependencies: &["has_own_property"],
        internal: true,
        source: r#"function pug_classes_object(val) {
  var classString = "", padding = "";
  for (var key in val) {
    if (key && val[key] && pug_has_own_property.call(val, key)) {
      classString = classString + padding + key;
      padding = " ";
    }
  }
  return classString;
}"#,
    },
    RuntimeFunction {
        name: "classes",
        dependencies: &["classes_array", "classes_object"],
        internal: false,
        source: r#"function pug_classes(val, escaping) {
  if (Array.isArray(val)) return pug_classes_array(val, escaping);
  if (val && typeof val === "object") return pug_classes_object(val);
  return val || "";
}"#,
    },
    RuntimeFunction {
        name: "style",
        dependencies: &["has_own_property"],
        internal: false,
        source: r#"function pug_style(val) {
  if (!val) return "";
  if (typeof val === "object") {
    var out = "";
    for (var style in val) {
      if (pug_has_own_property.call(val, style)) out = out + style + ":" + val[style] + ";";
    }
    return out;
  }
  val += "";
  return val[val.length - 1] !== ";" ? val + ";" : val;
}"#,
    },
    RuntimeFunction {
        name: "attr",
        dependencies: &["escape"],
        internal: false,
        source: r#"function pug_attr(key, val, escaped, terse) {
  if (val === false || val == null || !val && (key === "class" || key === "style")) return "";
  if (val === true) return " " + (terse ? key : key + '="' + key + '"');
  if (typeof val.toJSON === "function") val = val.toJSON();
  if (typeof val !== "string") {
    val = JSON.stringify(val);
    if (!escaped && val.indexOf('"') !== -1) return " " + key + "='" + val.replace(/'/g, "&#39;") + "'";
  }
  if (escaped) val = pug_escape(val);
  return " " + key + '="' + val + '"';
}"#,
    },
    RuntimeFunction {
        name: "attrs",
        dependencies: &["attr", "classes", "has_own_property", "style"],
        internal: false,
        source: r#"function pug_attrs(obj, terse) {
  var attrs = "";
  for (var key in obj) {
    if (pug_has_own_property.call(obj, key)) {
      var val = obj[key];
      if (key === "class") {
        attrs = pug_attr(key, pug_classes(val), false, terse) + attrs;
        continue;
      }
      if (key === "style") val = pug_style(val);
      attrs += pug_attr(key, val, false, terse);
    }
  }
  return attrs;
}"#,
    },
    RuntimeFunction {
        name: "match_html",
        dependencies: &[],
        internal: true,
        source: r#"var pug_match_html = /["&<>]/;"#,
    },
    RuntimeFunction {
        name: "escape",
        dependencies: &["match_html"],
        internal: false,
        source: r#"function pug_escape(_html) {
  var html = "" + _html;
  var regexResult = pug_match_html.exec(html);
  if (!regexResult) return _html;
  var result = "", i, lastIndex, escape;
  for (i = regexResult.index, lastIndex = 0; i < html.length; i++) {
    switch (html.charCodeAt(i)) {
      case 34: escape = "&quot;"; break;
      case 38: escape = "&amp;"; break;
      case 60: escape = "&lt;"; break;
      case 62: escape = "&gt;"; break;
      default: continue;
    }
    if (lastIndex !== i) result += html.substring(lastIndex, i);
    lastIndex = i + 1;
    result += escape;
  }
  return lastIndex !== i ? result + html.substring(lastIndex, i) : result;
}"#,
    },
    RuntimeFunction {
        name: "rethrow",
        dependencies: &[],
        internal: false,
        source: r#"function pug_rethrow(err, filename, lineno, str) {
  if (!(err instanceof Error)) throw err;
  if (!str) {
    err.message += " on line " + lineno;
    throw err;
  }
  var context = 3, lines = str.split("\n"),
    start = Math.max(lineno - context, 0),
    end = Math.min(lines.length, lineno + context);
  var excerpt = lines.slice(start, end).map(function (line, i) {
    var curr = i + start + 1;
    return (curr == lineno ? "  > " : "    ") + curr + "| " + line;
  }).join("\n");
  err.path = filename;
  err.message = (filename || "Pug") + ":" + lineno + "\n" + excerpt + "\n\n" + err.message;
  throw err;
}"#,
    },
];

fn lookup(name: &str) -> Option<&'static RuntimeFunction> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

/// Source for the requested helpers plus everything they depend on,
/// ordered by name.
pub fn build<'a>(requested: impl IntoIterator<Item = &'a str>) -> String {
    let mut pending: Vec<&'static str> = requested
        .into_iter()
        .filter_map(lookup)
        .filter(|f| !f.internal)
        .map(|f| f.name)
        .collect();
    let mut included = BTreeSet::new();
    while let Some(name) = pending.pop() {
        if included.insert(name) {
            if let Some(function) = lookup(name) {
                pending.extend(function.dependencies.iter().copied());
            }
        }
    }
    included
        .into_iter()
        .filter_map(lookup)
        .map(|f| f.source)
        .collect::<Vec<_>>()
        .join("\n")
}

/// HTML-escape `"`, `&`, `<` and `>`.
pub fn escape(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    for ch in html.chars() {
        match ch {
            '"' => out.push_str("&quot;"),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// `escape` over an arbitrary value: values without special characters
/// are returned unchanged.
pub fn escape_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(escape(s)),
        other => {
            let text = to_js_string(other);
            if text.contains(['"', '&', '<', '>']) {
                Value::String(escape(&text))
            } else {
                other.clone()
            }
        }
    }
}

/// Render one attribute, or nothing for absent values.
pub fn attr(key: &str, val: &Value, escaped: bool, terse: bool) -> String {
    let absent = match val {
        Value::Bool(false) | Value::Null => true,
        other => !truthy(other) && (key == "class" || key == "style"),
    };
    if absent {
        return String::new();
    }
    if *val == Value::Bool(true) {
        return if terse { format!(" {}", key) } else { format!(" {}=\"{}\"", key, key) };
    }
    let text = match val {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => to_js_string(val),
        other => {
            let json = serde_json::to_string(other).unwrap_or_default();
            if !escaped && json.contains('"') {
                return format!(" {}='{}'", key, json.replace('\'', "&#39;"));
            }
            json
        }
    };
    let text = if escaped { escape(&text) } else { text };
    format!(" {}=\"{}\"", key, text)
}

/// Space-separated class list from strings, arrays and `{name: bool}` maps.
pub fn classes(val: &Value, escaping: Option<&[bool]>) -> String {
    match val {
        Value::Array(items) => {
            let mut names = Vec::new();
            for (i, item) in items.iter().enumerate() {
                let name = classes(item, None);
                if name.is_empty() {
                    continue;
                }
                if escaping.and_then(|e| e.get(i)).copied().unwrap_or(false) {
                    names.push(escape(&name));
                } else {
                    names.push(name);
                }
            }
            names.join(" ")
        }
        Value::Object(map) => map
            .iter()
            .filter(|(key, value)| !key.is_empty() && truthy(value))
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>()
            .join(" "),
        other if truthy(other) => to_js_string(other),
        _ => String::new(),
    }
}

/// CSS declaration list from a string or a `{property: value}` map.
pub fn style(val: &Value) -> String {
    if !truthy(val) {
        return String::new();
    }
    match val {
        Value::Object(map) => map
            .iter()
            .map(|(property, value)| format!("{}:{};", property, to_js_string(value)))
            .collect(),
        // arrays are objects to `typeof`; their indices become properties
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, value)| format!("{}:{};", i, to_js_string(value)))
            .collect(),
        other => {
            let text = to_js_string(other);
            if text.ends_with(';') { text } else { format!("{};", text) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_includes_dependencies_sorted() {
        let bundle = build(["attr"]);
        let escape_at = bundle.find("function pug_escape").unwrap();
        let attr_at = bundle.find("function pug_attr").unwrap();
        assert!(attr_at < escape_at);
        assert!(bundle.contains("var pug_match_html"));
    }

    #[test]
    fn test_build_ignores_internal_requests() {
        assert_eq!(build(["has_own_property", "match_html"]), "");
        assert!(build(["classes"]).contains("pug_has_own_property"));
    }

    #[test]
    fn test_attr_rendering() {
        assert_eq!(attr("href", &json!("/a?b&c"), true, true), " href=\"/a?b&amp;c\"");
        assert_eq!(attr("checked", &json!(true), true, true), " checked");
        assert_eq!(attr("checked", &json!(true), true, false), " checked=\"checked\"");
        assert_eq!(attr("class", &json!(""), true, true), "");
        assert_eq!(attr("data-n", &json!(0), true, true), " data-n=\"0\"");
        assert_eq!(attr("data-o", &json!({"a": "b"}), false, true), " data-o='{\"a\":\"b\"}'");
    }

    #[test]
    fn test_classes() {
        let val = json!(["a", {"b": true, "c": false}, ["d", "e"], "<f>"]);
        assert_eq!(classes(&val, Some(&[false, false, false, true])), "a b d e &lt;f&gt;");
        assert_eq!(classes(&json!(null), None), "");
    }

    #[test]
    fn test_style() {
        assert_eq!(style(&json!({"color": "red", "width": 10})), "color:red;width:10;");
        assert_eq!(style(&json!("color: red")), "color: red;");
        assert_eq!(style(&json!("")), "");
    }
}
