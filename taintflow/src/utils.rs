//! Shared utilities.

use ruff_text_size::{TextRange, TextSize};
use serde::{Deserialize, Serialize};

/// Precomputed index for converting byte offsets to line numbers.
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Stores the byte index of the start of each line.
    line_starts: Vec<usize>,
}

impl LineIndex {
    /// Creates a new `LineIndex` by scanning the source code for newlines.
    /// Uses byte iteration for performance since '\n' is always a single byte in UTF-8.
    #[must_use]
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, byte) in source.as_bytes().iter().enumerate() {
            if *byte == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    /// Converts a `TextSize` (byte offset) to a 1-indexed line number.
    #[must_use]
    pub fn line_index(&self, offset: TextSize) -> usize {
        let offset = offset.to_usize();
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line + 1,
            Err(line) => line,
        }
    }

    /// Converts an offset to a 0-indexed column on its line.
    #[must_use]
    pub fn column_index(&self, offset: TextSize) -> usize {
        let offset = offset.to_usize();
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line - 1,
        };
        offset - self.line_starts[line]
    }
}

/// A resolved source position: 1-indexed line, 0-indexed columns.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Location {
    /// 1-indexed line of the range start.
    pub line: u32,
    /// 0-indexed column of the range start.
    pub start: u32,
    /// 0-indexed column of the range end.
    pub end: u32,
}

impl Location {
    /// Resolves a text range against a line index.
    #[must_use]
    pub fn from_range(range: TextRange, line_index: &LineIndex) -> Self {
        Self {
            line: line_index.line_index(range.start()) as u32,
            start: line_index.column_index(range.start()) as u32,
            end: line_index.column_index(range.end()) as u32,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.line, self.start, self.end)
    }
}
