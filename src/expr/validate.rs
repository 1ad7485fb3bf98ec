use super::{wrapped_expression, ExpressionError, ExpressionValidator, JavaScript};

impl ExpressionValidator for JavaScript {
    fn validate(&self, source: &str) -> Result<(), ExpressionError> {
        let Some((tree, text)) = self.parse_wrapped(source) else {
            return Err(ExpressionError {
                message: "Unable to parse expression".to_string(),
                line: 0,
                column: 0,
            });
        };

        let root = tree.root_node();
        if root.has_error() {
            let node = first_error(root).unwrap_or(root);
            let point = node.start_position();
            let message = if node.is_missing() {
                format!("Missing `{}`", node.kind())
            } else {
                "Unexpected token".to_string()
            };
            return Err(locate(source, &text, point.row, point.column, message));
        }

        if wrapped_expression(&tree, &text).is_none() {
            return Err(ExpressionError {
                message: "Expected a single expression".to_string(),
                line: 0,
                column: 0,
            });
        }

        Ok(())
    }
}

fn first_error(node: tree_sitter::Node<'_>) -> Option<tree_sitter::Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if let Some(found) = first_error(child) {
                return Some(found);
            }
        }
    }
    None
}

/// Map a wrapper row/byte-column back to a snippet line/char-column.
fn locate(source: &str, text: &str, row: usize, byte_column: usize, message: String) -> ExpressionError {
    let line_text = text.lines().nth(row).unwrap_or("");
    let prefix = line_text.get(..byte_column.min(line_text.len())).unwrap_or(line_text);
    let mut column = prefix.chars().count();
    if row == 0 {
        column = column.saturating_sub(1);
    }
    let line_count = source.lines().count().max(1);
    ExpressionError {
        message,
        line: row.min(line_count - 1),
        column,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_expressions() {
        let js = JavaScript::new();
        for src in ["a", "a + b", "foo(bar, [1, 2])", "{a: 1, 'b': [2]}", "x ? y : z", "a, b", "`t ${x}`", "a // trailing"] {
            assert!(js.is_expression(src), "{src}");
        }
    }

    #[test]
    fn test_rejects_statements_and_garbage() {
        let js = JavaScript::new();
        for src in ["", "var a = 1", "a b", "a +", "a) + (b", "if (a) b"] {
            assert!(!js.is_expression(src), "{src}");
        }
    }

    #[test]
    fn test_error_position_is_snippet_relative() {
        let js = JavaScript::new();
        let err = js.validate("a +\n  ) b").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
