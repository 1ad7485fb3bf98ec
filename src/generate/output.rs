use crate::expr::value::stringify_str;

/// Concatenations merged into one statement before a new one is started.
pub const MAX_CONCATENATIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Buffered {
    Text,
    Code,
}

/// Statement buffer for a template body.
///
/// Consecutive writes to `pug_html` share one assignment: static text
/// extends the current string literal and expressions are joined with
/// `+`, until [`MAX_CONCATENATIONS`] is reached or a raw statement
/// intervenes.
pub struct Output {
    statements: Vec<String>,
    /// Length of `statements` right after the last buffered write.
    last_buffered_idx: Option<usize>,
    last_buffered: String,
    last_kind: Buffered,
    /// `"` when the open concatenation started with text.
    start: &'static str,
    concatenations: usize,
}

impl Output {
    pub fn new() -> Self {
        Self {
            statements: Vec::new(),
            last_buffered_idx: None,
            last_buffered: String::new(),
            last_kind: Buffered::Text,
            start: "",
            concatenations: 0,
        }
    }

    /// Add a raw statement
    pub fn push(&mut self, statement: impl Into<String>) {
        self.statements.push(statement.into());
    }

    /// Append static HTML to the output
    pub fn buffer(&mut self, text: &str) {
        let quoted = stringify_str(text);
        let inner = &quoted[1..quoted.len() - 1];

        if self.can_merge() {
            if self.last_kind == Buffered::Code {
                self.last_buffered.push_str(" + \"");
                self.concatenations += 1;
            }
            self.last_kind = Buffered::Text;
            self.last_buffered.push_str(inner);
            let statement = format!("pug_html = pug_html + {}{}\";", self.start, self.last_buffered);
            self.replace_last(statement);
        } else {
            self.concatenations = 0;
            self.statements.push(format!("pug_html = pug_html + \"{}\";", inner));
            self.last_kind = Buffered::Text;
            self.start = "\"";
            self.last_buffered = inner.to_string();
            self.last_buffered_idx = Some(self.statements.len());
        }
    }

    /// Append the runtime value of a JavaScript expression
    pub fn buffer_expression(&mut self, src: &str) {
        if self.can_merge() {
            self.concatenations += 1;
            if self.last_kind == Buffered::Text {
                self.last_buffered.push('"');
            }
            self.last_kind = Buffered::Code;
            self.last_buffered.push_str(&format!(" + ({})", src));
            let statement = format!("pug_html = pug_html + ({}{});", self.start, self.last_buffered);
            self.replace_last(statement);
        } else {
            self.concatenations = 0;
            self.statements.push(format!("pug_html = pug_html + ({});", src));
            self.last_kind = Buffered::Code;
            self.start = "";
            self.last_buffered = format!("({})", src);
            self.last_buffered_idx = Some(self.statements.len());
        }
    }

    fn can_merge(&self) -> bool {
        self.last_buffered_idx == Some(self.statements.len()) && self.concatenations < MAX_CONCATENATIONS
    }

    fn replace_last(&mut self, statement: String) {
        if let Some(last) = self.statements.last_mut() {
            *last = statement;
        }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Finish and return the statements, one per line
    pub fn finish(self) -> String {
        self.statements.join("\n")
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_runs_share_a_statement() {
        let mut out = Output::new();
        out.buffer("<p>");
        out.buffer("hi");
        out.buffer("</p>");
        assert_eq!(out.finish(), r#"pug_html = pug_html + "\u003Cp\u003Ehi\u003C\u002Fp\u003E";"#);
    }

    #[test]
    fn test_text_and_expressions_merge() {
        let mut out = Output::new();
        out.buffer("Hello ");
        out.buffer_expression("name");
        assert_eq!(out.len(), 1);
        out.buffer("!");
        assert_eq!(out.finish(), r#"pug_html = pug_html + "Hello " + (name) + "!";"#);
    }

    #[test]
    fn test_expression_first() {
        let mut out = Output::new();
        out.buffer_expression("a");
        out.buffer_expression("b");
        assert_eq!(out.finish(), "pug_html = pug_html + ((a) + (b));");
    }

    #[test]
    fn test_raw_statement_breaks_the_run() {
        let mut out = Output::new();
        out.buffer("a");
        out.push("if (x) {");
        out.buffer("b");
        assert_eq!(
            out.finish(),
            "pug_html = pug_html + \"a\";\nif (x) {\npug_html = pug_html + \"b\";"
        );
    }

    #[test]
    fn test_concatenation_cap_starts_a_new_statement() {
        let mut out = Output::new();
        for _ in 0..=MAX_CONCATENATIONS {
            out.buffer_expression("x");
        }
        assert_eq!(out.len(), 1);
        out.buffer_expression("x");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_text_is_quoted() {
        let mut out = Output::new();
        out.buffer("say \"hi\"\n");
        assert_eq!(out.finish(), r#"pug_html = pug_html + "say \"hi\"\n";"#);
    }
}
