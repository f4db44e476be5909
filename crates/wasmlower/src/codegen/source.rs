//! Indentation-aware source text accumulator.

const INDENT: &str = "    ";

#[derive(Debug, Clone, Default)]
pub struct Source {
    buf: String,
    indent: usize,
}

impl Source {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at a given indentation level, for fragments spliced into an
    /// enclosing item.
    pub fn with_indent(indent: usize) -> Self {
        Self {
            buf: String::new(),
            indent,
        }
    }

    pub fn indent_level(&self) -> usize {
        self.indent
    }

    /// Append one line at the current indentation.
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.indent {
                self.buf.push_str(INDENT);
            }
            self.buf.push_str(text);
        }
        self.buf.push('\n');
    }

    pub fn blank(&mut self) {
        self.buf.push('\n');
    }

    /// Append a line, then indent what follows.
    pub fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.indent += 1;
    }

    /// Dedent, then append a line.
    pub fn close(&mut self, text: impl AsRef<str>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(text);
    }

    /// Dedent for one line, as in `} else {`.
    pub fn reopen(&mut self, text: impl AsRef<str>) {
        self.close(text);
        self.indent += 1;
    }

    /// Append pre-rendered text verbatim.
    pub fn append(&mut self, text: &str) {
        self.buf.push_str(text);
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn finish(self) -> String {
        self.buf
    }
}
