//! Position and range primitives shared by every front-end and check.
//!
//! - `Location` - a byte offset and length inside one text blob
//! - `TextPointer` - 1-based line, 0-based column (in characters)
//! - `TextRange` - half-open `[start, end)` pair of pointers
//! - `LineIndex` - precomputed line starts for repeated conversions
//!
//! A `Location` only means something together with the text it was computed
//! against. Converting it to a `TextRange` needs that exact text; moving a
//! location between blobs (rendered output and template source, for instance)
//! must go through an explicit shift or a correlator.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

const BOM: char = '\u{FEFF}';

/// An offset/length pair into a single text blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Location {
    position: usize,
    length: usize,
}

impl Location {
    pub fn new(position: usize, length: usize) -> Self {
        Self { position, length }
    }

    /// Location covering `[start, end)`.
    pub fn between(start: usize, end: usize) -> Self {
        assert!(start <= end, "location start {start} is after end {end}");
        Self::new(start, end - start)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn end(&self) -> usize {
        self.position + self.length
    }

    /// Returns a new location moved by `position_delta` and resized by `length_delta`.
    ///
    /// Used when a token's lexical prefix (quote, comment marker, BOM) is
    /// stripped and the inner value must keep pointing at the source.
    ///
    /// # Panics
    /// If either component would become negative.
    pub fn shift(&self, position_delta: isize, length_delta: isize) -> Self {
        let position = self
            .position
            .checked_add_signed(position_delta)
            .unwrap_or_else(|| panic!("shifted position of {self} by {position_delta} is negative"));
        let length = self
            .length
            .checked_add_signed(length_delta)
            .unwrap_or_else(|| panic!("shifted length of {self} by {length_delta} is negative"));
        Self { position, length }
    }

    /// Convert to line/column coordinates against `text`.
    ///
    /// # Panics
    /// If the location does not fit inside `text` or does not fall on
    /// character boundaries. That is a caller error, never a data error.
    pub fn to_text_range(&self, text: &str) -> TextRange {
        self.try_to_text_range(text).unwrap_or_else(|| {
            panic!(
                "{self} is outside of a text of {} bytes or splits a character",
                text.len()
            )
        })
    }

    /// Checked variant of [`Location::to_text_range`].
    pub fn try_to_text_range(&self, text: &str) -> Option<TextRange> {
        LineIndex::new(text).range(*self)
    }

    /// Inverse of [`Location::to_text_range`].
    pub fn from_text_range(range: &TextRange, text: &str) -> Option<Self> {
        LineIndex::new(text).location(range)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, +{}]", self.position, self.length)
    }
}

/// A line/column position. Lines start at 1, columns at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TextPointer {
    pub line: usize,
    #[serde(rename = "column")]
    pub line_offset: usize,
}

impl TextPointer {
    pub fn new(line: usize, line_offset: usize) -> Self {
        Self { line, line_offset }
    }
}

impl Ord for TextPointer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.line
            .cmp(&other.line)
            .then(self.line_offset.cmp(&other.line_offset))
    }
}

impl PartialOrd for TextPointer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TextPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.line_offset)
    }
}

/// A half-open range of text pointers, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TextRange {
    pub start: TextPointer,
    pub end: TextPointer,
}

impl TextRange {
    pub fn new(start: TextPointer, end: TextPointer) -> Self {
        assert!(start <= end, "text range start {start} is after end {end}");
        Self { start, end }
    }

    /// Shorthand for `TextRange::new(TextPointer::new(..), TextPointer::new(..))`.
    pub fn of(start_line: usize, start_col: usize, end_line: usize, end_col: usize) -> Self {
        Self::new(
            TextPointer::new(start_line, start_col),
            TextPointer::new(end_line, end_col),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, other: &TextRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn contains_pointer(&self, pointer: TextPointer) -> bool {
        self.start <= pointer && pointer < self.end
    }

    pub fn overlaps(&self, other: &TextRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Smallest range covering both.
    pub fn merge(&self, other: &TextRange) -> TextRange {
        TextRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl Ord for TextRange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start.cmp(&other.start).then(self.end.cmp(&other.end))
    }
}

impl PartialOrd for TextRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TextRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Anything an issue can be anchored on.
pub trait HasTextRange {
    fn text_range(&self) -> TextRange;
}

impl HasTextRange for TextRange {
    fn text_range(&self) -> TextRange {
        *self
    }
}

/// Line starts of a text, computed once.
///
/// Recognized terminators: `\n`, `\r\n`, `\r`, U+2028 and U+2029.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    text: &'a str,
    /// Byte offset where each line's content starts.
    starts: Vec<usize>,
    /// Byte offset where each line's content ends (terminator excluded).
    ends: Vec<usize>,
    bom: bool,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        let mut ends = Vec::new();
        let mut chars = text.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match c {
                '\r' => {
                    ends.push(i);
                    if let Some((_, '\n')) = chars.peek() {
                        chars.next();
                        starts.push(i + 2);
                    } else {
                        starts.push(i + 1);
                    }
                }
                '\n' => {
                    ends.push(i);
                    starts.push(i + 1);
                }
                '\u{2028}' | '\u{2029}' => {
                    ends.push(i);
                    starts.push(i + c.len_utf8());
                }
                _ => {}
            }
        }
        ends.push(text.len());
        Self {
            text,
            starts,
            ends,
            bom: text.starts_with(BOM),
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Content of a 1-based line, terminator excluded.
    pub fn line(&self, line: usize) -> Option<&'a str> {
        let idx = line.checked_sub(1)?;
        Some(&self.text[*self.starts.get(idx)?..*self.ends.get(idx)?])
    }

    /// Pointer for a byte offset. The end of the text is a valid offset.
    pub fn pointer(&self, offset: usize) -> Option<TextPointer> {
        if offset > self.text.len() || !self.text.is_char_boundary(offset) {
            return None;
        }
        let idx = match self.starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        // An offset inside a terminator sticks to the end of its line.
        let upto = offset.min(self.ends[idx]);
        let mut column = self.text[self.starts[idx]..upto].chars().count();
        if idx == 0 && self.bom && upto > 0 {
            column -= 1;
        }
        Some(TextPointer::new(idx + 1, column))
    }

    /// Byte offset for a pointer. A column may point at the end of its line.
    pub fn offset(&self, pointer: TextPointer) -> Option<usize> {
        let idx = pointer.line.checked_sub(1)?;
        let start = *self.starts.get(idx)?;
        let end = self.ends[idx];
        let mut column = pointer.line_offset;
        if idx == 0 && self.bom {
            column += 1;
        }
        let content = &self.text[start..end];
        if column == 0 {
            return Some(start);
        }
        match content.char_indices().nth(column) {
            Some((i, _)) => Some(start + i),
            None if content.chars().count() == column => Some(end),
            None => None,
        }
    }

    pub fn range(&self, location: Location) -> Option<TextRange> {
        let start = self.pointer(location.position())?;
        let end = self.pointer(location.end())?;
        Some(TextRange::new(start, end))
    }

    pub fn location(&self, range: &TextRange) -> Option<Location> {
        let start = self.offset(range.start)?;
        let end = self.offset(range.end)?;
        (start <= end).then(|| Location::between(start, end))
    }
}
