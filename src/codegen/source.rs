//! A small TPL source builder: indented line emission used by the operator
//! translators. The emitted text is ordinary TPL that passes through the
//! normal parse/sema/bytecode path, so it can be dumped and inspected.

#[derive(Debug, Default)]
pub struct SourceBuilder {
    lines: Vec<String>,
}

impl SourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line at the given indent depth (two spaces per level).
    pub fn line(&mut self, indent: usize, text: impl AsRef<str>) {
        self.lines.push(format!(
            "{}{}",
            "  ".repeat(indent),
            text.as_ref()
        ));
    }

    pub fn blank(&mut self) {
        self.lines.push(String::new());
    }

    /// Append pre-rendered lines at an additional indent.
    pub fn extend(&mut self, indent: usize, lines: &[String]) {
        for line in lines {
            if line.is_empty() {
                self.lines.push(String::new());
            } else {
                self.lines.push(format!("{}{}", "  ".repeat(indent), line));
            }
        }
    }

    pub fn finish(self) -> String {
        self.lines.join("\n")
    }
}

/// Collects the body of one emitted function.
#[derive(Debug, Default)]
pub struct BodyBuilder {
    pub lines: Vec<String>,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, indent: usize, text: impl AsRef<str>) {
        self.lines.push(format!("{}{}", "  ".repeat(indent), text.as_ref()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indentation() {
        let mut src = SourceBuilder::new();
        src.line(0, "fun f() -> nil {");
        src.line(1, "var x: int32 = 1");
        src.line(0, "}");
        assert_eq!(src.finish(), "fun f() -> nil {\n  var x: int32 = 1\n}");
    }
}
