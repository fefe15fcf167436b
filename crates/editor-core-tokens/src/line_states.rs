//! Sparse per-line storage.
//!
//! [`SparseLines`] is a growable vector of optional entries, one per document line. Reads past
//! the known extent return `None` instead of failing, and structural edits splice absent entries
//! in and out so indices keep following the document.

use crate::array_edit::{CompositeArrayEdit, SpliceTarget};

/// A growable, random-access sequence with one optional entry per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseLines<T> {
    entries: Vec<Option<T>>,
}

/// The per-line end-of-line tokenizer states of a document.
pub type LineStates<S> = SparseLines<S>;

impl<T> SparseLines<T> {
    /// Create an empty sequence.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Create a sequence of `len` absent entries.
    pub fn with_len(len: usize) -> Self {
        let mut entries = Vec::with_capacity(len);
        entries.resize_with(len, || None);
        Self { entries }
    }

    /// Number of addressable entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no addressable entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`, or `None` when absent or past the extent.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    /// Store (or clear) the entry at `index`, growing the sequence if needed.
    pub fn set(&mut self, index: usize, value: Option<T>) {
        if index >= self.entries.len() {
            if value.is_none() {
                return;
            }
            self.entries.resize_with(index + 1, || None);
        }
        self.entries[index] = value;
    }

    /// Make every entry absent without changing the length.
    pub fn clear_entries(&mut self) {
        self.entries.iter_mut().for_each(|entry| *entry = None);
    }

    /// Grow or shrink to exactly `len` entries.
    pub fn resize(&mut self, len: usize) {
        self.entries.resize_with(len, || None);
    }

    /// Apply a structural edit.
    pub fn apply_edit(&mut self, edit: &CompositeArrayEdit) {
        edit.apply_to(self);
    }

    /// Index of the first absent entry at or after `from`, within the extent.
    pub fn first_absent_from(&self, from: usize) -> Option<usize> {
        self.entries
            .get(from..)?
            .iter()
            .position(Option::is_none)
            .map(|offset| from + offset)
    }

    /// Iterate over `(index, entry)` pairs of present entries.
    pub fn iter_present(&self) -> impl Iterator<Item = (usize, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_ref().map(|value| (index, value)))
    }
}

impl<T> Default for SparseLines<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SpliceTarget for SparseLines<T> {
    fn splice_absent(&mut self, start: usize, delete_count: usize, insert_count: usize) {
        self.entries.splice_absent(start, delete_count, insert_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array_edit::ArrayEdit;

    #[test]
    fn test_reads_past_extent_are_absent() {
        let mut lines = SparseLines::with_len(2);
        lines.set(1, Some("b"));
        assert_eq!(lines.get(0), None);
        assert_eq!(lines.get(1), Some(&"b"));
        assert_eq!(lines.get(100), None);
    }

    #[test]
    fn test_set_grows() {
        let mut lines = SparseLines::new();
        lines.set(3, Some(7u32));
        assert_eq!(lines.len(), 4);
        assert_eq!(lines.get(3), Some(&7));

        // Clearing past the extent does not grow.
        lines.set(10, None);
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_apply_edit_shifts_and_invalidates() {
        let mut lines = SparseLines::with_len(4);
        for i in 0..4 {
            lines.set(i, Some(i));
        }
        lines.apply_edit(&CompositeArrayEdit::single(ArrayEdit::new(1, 2, 3)));
        assert_eq!(lines.len(), 5);
        let present: Vec<_> = lines.iter_present().collect();
        assert_eq!(present, vec![(0, &0), (4, &3)]);
        assert_eq!(lines.first_absent_from(0), Some(1));
        assert_eq!(lines.first_absent_from(4), None);
    }

    #[test]
    fn test_insert_beyond_extent_keeps_length_in_step() {
        let mut lines: SparseLines<u8> = SparseLines::with_len(2);
        lines.apply_edit(&CompositeArrayEdit::single(ArrayEdit::insert(2, 3)));
        assert_eq!(lines.len(), 5);
    }
}
