/// HTML element classification used while compiling tags.

/// Void elements: rendered without a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input",
    "keygen", "link", "menuitem", "meta", "param", "source", "track", "wbr",
];

/// Phrasing elements that keep pretty output on one line.
const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "b", "br", "code", "em", "font", "i", "img",
    "ins", "kbd", "map", "samp", "small", "span", "strong", "sub", "sup",
];

/// Elements whose text content must not be re-indented.
const WHITESPACE_SENSITIVE: &[&str] = &["pre", "textarea"];

const DOCTYPES: &[(&str, &str)] = &[
    ("html", "<!DOCTYPE html>"),
    ("xml", r#"<?xml version="1.0" encoding="utf-8" ?>"#),
    ("transitional", r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">"#),
    ("strict", r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">"#),
    ("frameset", r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Frameset//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-frameset.dtd">"#),
    ("1.1", r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#),
    ("basic", r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML Basic 1.1//EN" "http://www.w3.org/TR/xhtml-basic/xhtml-basic11.dtd">"#),
    ("mobile", r#"<!DOCTYPE html PUBLIC "-//WAPFORUM//DTD XHTML Mobile 1.2//EN" "http://www.openmobilealliance.org/tech/DTD/xhtml-mobile12.dtd">"#),
    ("plist", r#"<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">"#),
];

pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

pub fn is_inline_tag(tag: &str) -> bool {
    INLINE_TAGS.contains(&tag)
}

pub fn is_whitespace_sensitive(tag: &str) -> bool {
    WHITESPACE_SENSITIVE.contains(&tag)
}

/// Expand a doctype shorthand. Unknown names become `<!DOCTYPE name>`.
pub fn doctype(name: &str) -> String {
    let lowered = name.to_lowercase();
    DOCTYPES
        .iter()
        .find(|(key, _)| *key == lowered)
        .map(|(_, value)| value.to_string())
        .unwrap_or_else(|| format!("<!DOCTYPE {}>", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doctype_lookup_is_case_insensitive() {
        assert_eq!(doctype("HTML"), "<!DOCTYPE html>");
        assert!(doctype("strict").contains("XHTML 1.0 Strict"));
    }

    #[test]
    fn test_unknown_doctype_passes_through() {
        assert_eq!(doctype("custom thing"), "<!DOCTYPE custom thing>");
    }

    #[test]
    fn test_element_tables() {
        assert!(is_void_element("img"));
        assert!(!is_void_element("div"));
        assert!(is_inline_tag("strong"));
        assert!(is_whitespace_sensitive("pre"));
    }
}
