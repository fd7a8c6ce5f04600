//! Offset to line/column mapping, used only to render diagnostics.

use std::fmt::Write;

use crate::diagnostic::Diagnostic;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineAndColumn {
    pub line: usize,
    pub column: usize,
}

impl LineAndColumn {
    pub fn new(line: usize, column: usize) -> Self {
        LineAndColumn { line, column }
    }
}

impl std::fmt::Display for LineAndColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.line, self.column)
    }
}

#[derive(Clone, Debug)]
pub struct LineMap {
    // Each line keeps its terminator, so the lengths add up to the text length.
    lines: Vec<String>,
}

impl LineMap {
    pub fn new(text: &str) -> Self {
        let mut lines = Vec::new();
        let mut line_start = 0;
        let bytes = text.as_bytes();

        let mut index = 0;
        while index < bytes.len() {
            let terminator_len = match bytes[index] {
                b'\r' if bytes.get(index + 1) == Some(&b'\n') => 2,
                b'\r' | b'\n' => 1,
                _ => {
                    index += 1;
                    continue;
                }
            };

            index += terminator_len;
            lines.push(text[line_start..index].to_string());
            line_start = index;
        }
        lines.push(text[line_start..].to_string());

        LineMap { lines }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Maps a byte offset to a zero-based line and column. Offsets past the
    /// last character clamp to the end of the final line.
    pub fn map_position_to_line_and_column(&self, position: usize) -> LineAndColumn {
        let mut line_start = 0;
        for (line, text) in self.lines.iter().enumerate() {
            if position < line_start + text.len() {
                return LineAndColumn::new(line, position - line_start);
            }
            line_start += text.len();
        }

        let last = self.lines.len() - 1;
        LineAndColumn::new(last, self.lines[last].len())
    }

    pub fn line_start(&self, line: usize) -> usize {
        self.lines.iter().take(line).map(String::len).sum()
    }

    pub fn line_text(&self, line: usize) -> Option<&str> {
        self.lines
            .get(line)
            .map(|text| text.trim_end_matches(['\r', '\n']))
    }
}

/// Renders one diagnostic as an `error:` line followed by each covered source
/// line underlined with carets.
pub fn render_diagnostic(map: &LineMap, diagnostic: &Diagnostic) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "error: {}", diagnostic.message);

    let start = map.map_position_to_line_and_column(diagnostic.start);
    let end = map.map_position_to_line_and_column(diagnostic.start + diagnostic.length);

    for line in start.line..=end.line {
        let text = map.line_text(line).unwrap_or("");
        let from = if line == start.line { start.column } else { 0 };
        let to = if line == end.line {
            end.column.min(text.len())
        } else {
            text.len()
        };
        // A span that ends at the very start of a line covers nothing there.
        if line != start.line && to == 0 {
            continue;
        }

        // Columns are byte offsets; the underline is laid out in characters.
        let chars = |range: std::ops::Range<usize>| {
            text.get(range.clone())
                .map_or(range.len(), |slice| slice.chars().count())
        };
        let padding = chars(0..from);
        let width = chars(from..to.max(from)).max(1);
        let _ = writeln!(out, "    {}", text);
        let _ = writeln!(out, "    {}{}", " ".repeat(padding), "^".repeat(width));
    }

    out
}
