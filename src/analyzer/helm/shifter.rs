//! Line-level mapping from cleaned rendered output back to template lines.
//!
//! Used when the engine cannot provide a syntax tree: each rendered line
//! carries the number (or range) of the template line it came from, and
//! ranges are widened to whole template lines.

use std::collections::HashMap;

use crate::analyzer::location::{LineIndex, TextPointer, TextRange};

#[derive(Debug, Clone, Default)]
pub struct LocationShifter {
    /// Length in characters of each template line.
    line_sizes: Vec<usize>,
    /// Rendered line -> first and last template line.
    shifted: HashMap<usize, (usize, usize)>,
}

impl LocationShifter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shifter with the line sizes of `source`.
    pub fn for_source(source: &str) -> Self {
        let index = LineIndex::new(source);
        let mut shifter = Self::new();
        for line in 1..=index.line_count() {
            shifter.add_line_size(index.line(line).map_or(0, |l| l.chars().count()));
        }
        shifter
    }

    pub fn add_line_size(&mut self, size: usize) {
        self.line_sizes.push(size);
    }

    /// Rendered `line` came from template line `target`.
    pub fn add_shifted_line(&mut self, line: usize, target: usize) {
        self.add_shifted_range(line, target, target);
    }

    /// Rendered `line` came from template lines `first..=last`. A later call
    /// for the same line replaces the earlier one.
    pub fn add_shifted_range(&mut self, line: usize, first: usize, last: usize) {
        self.shifted.insert(line, (first, last.max(first)));
    }

    pub fn is_empty(&self) -> bool {
        self.shifted.is_empty()
    }

    pub fn clear(&mut self) {
        self.shifted.clear();
        self.line_sizes.clear();
    }

    /// Map a rendered range to template lines.
    ///
    /// A shifted start moves to column 0 of its first template line, a
    /// shifted end to the end of its last template line. Lines without a
    /// recorded shift keep their coordinates.
    pub fn compute_shifted_location(&self, range: &TextRange) -> TextRange {
        let start = match self.shifted.get(&range.start.line) {
            Some(&(first, _)) => TextPointer::new(first, 0),
            None => range.start,
        };
        let end = match self.shifted.get(&range.end.line) {
            Some(&(_, last)) => TextPointer::new(last, self.line_size(last)),
            None => range.end,
        };
        if end < start {
            TextRange::new(start, start)
        } else {
            TextRange::new(start, end)
        }
    }

    fn line_size(&self, line: usize) -> usize {
        line.checked_sub(1)
            .and_then(|idx| self.line_sizes.get(idx))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn shifter(sizes: &[usize]) -> LocationShifter {
        let mut shifter = LocationShifter::new();
        for &size in sizes {
            shifter.add_line_size(size);
        }
        shifter
    }

    #[test]
    fn test_compute_shifted_location() {
        let mut s = shifter(&[5, 10]);
        s.add_shifted_line(1, 2);
        assert_eq!(s.compute_shifted_location(&TextRange::of(1, 1, 1, 3)), TextRange::of(2, 0, 2, 10));
    }

    #[test]
    fn test_no_shift_keeps_range() {
        let s = LocationShifter::new();
        let range = TextRange::of(1, 1, 1, 3);
        assert_eq!(s.compute_shifted_location(&range), range);
    }

    #[test]
    fn test_cleared_shift_keeps_range() {
        let mut s = shifter(&[5, 10]);
        s.add_shifted_line(1, 5);
        s.clear();
        let range = TextRange::of(1, 1, 1, 3);
        assert_eq!(s.compute_shifted_location(&range), range);
    }

    #[test]
    fn test_later_shift_overrides() {
        let mut s = shifter(&[5, 10]);
        s.add_shifted_line(1, 5);
        s.add_shifted_line(1, 2);
        assert_eq!(s.compute_shifted_location(&TextRange::of(1, 1, 1, 3)), TextRange::of(2, 0, 2, 10));
    }

    #[test]
    fn test_same_target_line() {
        let mut s = shifter(&[5, 10, 15]);
        s.add_shifted_line(1, 3);
        s.add_shifted_line(2, 3);
        assert_eq!(s.compute_shifted_location(&TextRange::of(1, 1, 1, 3)), TextRange::of(3, 0, 3, 15));
        assert_eq!(s.compute_shifted_location(&TextRange::of(2, 1, 2, 3)), TextRange::of(3, 0, 3, 15));
    }

    #[test]
    fn test_only_registered_ends_move() {
        let mut s = shifter(&[5, 10, 15]);
        s.add_shifted_line(1, 2);
        assert_eq!(s.compute_shifted_location(&TextRange::of(1, 1, 3, 3)), TextRange::of(2, 0, 3, 3));

        let mut s = shifter(&[5, 10, 15]);
        s.add_shifted_line(2, 3);
        assert_eq!(s.compute_shifted_location(&TextRange::of(1, 1, 2, 3)), TextRange::of(1, 1, 3, 15));
    }

    #[test]
    fn test_multi_line_targets() {
        let mut s = shifter(&[5, 10, 15, 20]);
        s.add_shifted_line(1, 3);
        s.add_shifted_range(2, 2, 4);
        assert_eq!(s.compute_shifted_location(&TextRange::of(1, 1, 2, 3)), TextRange::of(3, 0, 4, 20));
    }

    #[test]
    fn test_for_source_counts_characters() {
        let mut s = LocationShifter::for_source("ab\nnaïve\n");
        s.add_shifted_line(1, 2);
        assert_eq!(s.compute_shifted_location(&TextRange::of(1, 0, 1, 1)), TextRange::of(2, 0, 2, 5));
    }

    proptest! {
        #[test]
        fn shifted_ranges_are_ordered_whole_lines(
            sizes in prop::collection::vec(0usize..80, 1..20),
            shifts in prop::collection::vec((1usize..20, 1usize..20, 0usize..3), 0..10),
            start in (1usize..20, 0usize..80),
            len in (0usize..5, 0usize..80),
        ) {
            let mut s = shifter(&sizes);
            for &(line, first, extra) in &shifts {
                s.add_shifted_range(line, first, first + extra);
            }
            let end_col = if len.0 == 0 { start.1 + len.1 } else { len.1 };
            let range = TextRange::of(start.0, start.1, start.0 + len.0, end_col);
            let shifted = s.compute_shifted_location(&range);
            prop_assert!(shifted.start <= shifted.end);
            if let Some(&(first, _)) = s.shifted.get(&range.start.line) {
                prop_assert_eq!(shifted.start, TextPointer::new(first, 0));
            } else {
                prop_assert_eq!(shifted.start, range.start);
            }
        }
    }
}
