//! Splice descriptions over per-line sequences.
//!
//! An [`ArrayEdit`] replaces a half-open range of entries with a number of fresh (absent)
//! entries. A [`CompositeArrayEdit`] groups the splices produced by one document change.
//!
//! Semantics:
//! - Edits inside a composite are applied **in order**, left to right.
//! - Each edit's `start` is expressed in the sequence **after** the earlier edits of the same
//!   composite were applied.
//! - Ranges never overlap and never go backwards: `next.start >= prev.start + prev.insert_count`.

use thiserror::Error;

/// A single splice: replace `[start, start + delete_count)` with `insert_count` absent entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayEdit {
    /// First affected index.
    pub start: usize,
    /// Number of entries removed at `start`.
    pub delete_count: usize,
    /// Number of fresh entries inserted at `start`.
    pub insert_count: usize,
}

impl ArrayEdit {
    /// Create a new splice.
    pub fn new(start: usize, delete_count: usize, insert_count: usize) -> Self {
        Self {
            start,
            delete_count,
            insert_count,
        }
    }

    /// Pure insertion of `count` entries before `start`.
    pub fn insert(start: usize, count: usize) -> Self {
        Self::new(start, 0, count)
    }

    /// Pure deletion of `count` entries at `start`.
    pub fn delete(start: usize, count: usize) -> Self {
        Self::new(start, count, 0)
    }

    /// Returns `true` if this edit changes nothing.
    pub fn is_noop(&self) -> bool {
        self.delete_count == 0 && self.insert_count == 0
    }

    /// Exclusive end of the deleted range.
    pub fn delete_end(&self) -> usize {
        self.start + self.delete_count
    }

    /// Exclusive end of the inserted range (in post-edit coordinates).
    pub fn insert_end(&self) -> usize {
        self.start + self.insert_count
    }

    /// Signed length change caused by this edit.
    pub fn shift(&self) -> isize {
        self.insert_count as isize - self.delete_count as isize
    }

    /// Map a pre-edit index to its post-edit index.
    ///
    /// Returns `None` if `index` lies inside the deleted range.
    pub fn apply_to_offset(&self, index: usize) -> Option<usize> {
        if index < self.start {
            Some(index)
        } else if index >= self.delete_end() {
            Some(index - self.delete_count + self.insert_count)
        } else {
            None
        }
    }

    /// Apply this splice to a sequence.
    pub fn apply_to<T: SpliceTarget + ?Sized>(&self, target: &mut T) {
        if !self.is_noop() {
            target.splice_absent(self.start, self.delete_count, self.insert_count);
        }
    }
}

/// Errors produced while building a [`CompositeArrayEdit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArrayEditError {
    /// An edit started before the edit preceding it.
    #[error("array edit at {start} goes backwards (previous edit starts at {previous_start})")]
    OutOfOrder {
        /// Start of the rejected edit.
        start: usize,
        /// Start of the last accepted edit.
        previous_start: usize,
    },
}

/// A sequence that can replace a range of entries with absent ones.
pub trait SpliceTarget {
    /// Remove `delete_count` entries at `start`, then insert `insert_count` absent entries there.
    fn splice_absent(&mut self, start: usize, delete_count: usize, insert_count: usize);
}

impl<T> SpliceTarget for Vec<Option<T>> {
    fn splice_absent(&mut self, start: usize, delete_count: usize, insert_count: usize) {
        if start > self.len() {
            self.resize_with(start, || None);
        }
        let end = start.saturating_add(delete_count).min(self.len());
        self.splice(start..end, std::iter::repeat_with(|| None).take(insert_count))
            .for_each(drop);
    }
}

/// Ordered, non-overlapping splices describing one change event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CompositeArrayEdit {
    edits: Vec<ArrayEdit>,
}

impl CompositeArrayEdit {
    /// Create an empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Composite made of a single edit.
    pub fn single(edit: ArrayEdit) -> Self {
        let mut composite = Self::new();
        if !edit.is_noop() {
            composite.edits.push(edit);
        }
        composite
    }

    /// Build a composite from edits in application order.
    pub fn try_from_edits(
        edits: impl IntoIterator<Item = ArrayEdit>,
    ) -> Result<Self, ArrayEditError> {
        let mut composite = Self::new();
        for edit in edits {
            composite.try_push(edit)?;
        }
        Ok(composite)
    }

    /// Append an edit expressed in the coordinates after all edits already in `self`.
    ///
    /// No-op edits are skipped. An edit starting inside the block inserted by the previous
    /// edit is merged into it. An edit starting before the previous edit is rejected.
    pub fn try_push(&mut self, edit: ArrayEdit) -> Result<(), ArrayEditError> {
        if edit.is_noop() {
            return Ok(());
        }
        let Some(prev) = self.edits.last_mut() else {
            self.edits.push(edit);
            return Ok(());
        };

        if edit.start < prev.start {
            return Err(ArrayEditError::OutOfOrder {
                start: edit.start,
                previous_start: prev.start,
            });
        }

        if edit.start < prev.insert_end() {
            // Part of `edit`'s deletion eats into the block `prev` inserted; anything past
            // that block reaches into entries `prev` left untouched.
            let overlap = edit.delete_end().min(prev.insert_end()) - edit.start;
            let beyond = edit.delete_end().saturating_sub(prev.insert_end());
            prev.delete_count += beyond;
            prev.insert_count = prev.insert_count - overlap + edit.insert_count;
            if prev.is_noop() {
                self.edits.pop();
            }
            return Ok(());
        }

        self.edits.push(edit);
        Ok(())
    }

    /// The splices in application order.
    pub fn edits(&self) -> &[ArrayEdit] {
        &self.edits
    }

    /// Returns `true` if this composite changes nothing.
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Net length change of the whole composite.
    pub fn shift(&self) -> isize {
        self.edits.iter().map(ArrayEdit::shift).sum()
    }

    /// Map a pre-edit index through every splice in order.
    ///
    /// Returns `None` if any splice removes the index.
    pub fn apply_to_offset(&self, index: usize) -> Option<usize> {
        self.edits
            .iter()
            .try_fold(index, |index, edit| edit.apply_to_offset(index))
    }

    /// Apply every splice, in order, to a sequence.
    pub fn apply_to<T: SpliceTarget + ?Sized>(&self, target: &mut T) {
        for edit in &self.edits {
            edit.apply_to(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(len: usize) -> Vec<Option<usize>> {
        (0..len).map(Some).collect()
    }

    #[test]
    fn test_offset_rule() {
        let edit = ArrayEdit::new(2, 3, 1);
        assert_eq!(edit.apply_to_offset(0), Some(0));
        assert_eq!(edit.apply_to_offset(1), Some(1));
        assert_eq!(edit.apply_to_offset(2), None);
        assert_eq!(edit.apply_to_offset(4), None);
        assert_eq!(edit.apply_to_offset(5), Some(3));
        assert_eq!(edit.apply_to_offset(9), Some(7));
    }

    #[test]
    fn test_pure_insert_keeps_index_at_start() {
        let edit = ArrayEdit::insert(3, 2);
        assert_eq!(edit.apply_to_offset(2), Some(2));
        assert_eq!(edit.apply_to_offset(3), Some(5));
    }

    #[test]
    fn test_noop_edits_are_skipped() {
        let mut composite = CompositeArrayEdit::new();
        composite.try_push(ArrayEdit::new(4, 0, 0)).unwrap();
        assert!(composite.is_empty());
        assert!(CompositeArrayEdit::single(ArrayEdit::new(1, 0, 0)).is_empty());
    }

    #[test]
    fn test_apply_to_vec_splices_in_order() {
        let mut seq = tagged(6);
        let composite =
            CompositeArrayEdit::try_from_edits([ArrayEdit::new(1, 1, 2), ArrayEdit::delete(4, 2)])
                .unwrap();
        composite.apply_to(&mut seq);
        assert_eq!(seq, vec![Some(0), None, None, Some(2), Some(5)]);
    }

    #[test]
    fn test_apply_past_extent_grows() {
        let mut seq = tagged(2);
        ArrayEdit::insert(4, 1).apply_to(&mut seq);
        assert_eq!(seq, vec![Some(0), Some(1), None, None, None]);
    }

    #[test]
    fn test_delete_clamps_to_extent() {
        let mut seq = tagged(3);
        ArrayEdit::delete(1, 10).apply_to(&mut seq);
        assert_eq!(seq, vec![Some(0)]);
    }

    #[test]
    fn test_out_of_order_is_rejected() {
        let err = CompositeArrayEdit::try_from_edits([
            ArrayEdit::new(5, 1, 1),
            ArrayEdit::new(2, 1, 1),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ArrayEditError::OutOfOrder {
                start: 2,
                previous_start: 5
            }
        );
    }

    #[test]
    fn test_overlapping_edit_merges_like_sequential_application() {
        let cases = [
            (ArrayEdit::new(3, 1, 1), ArrayEdit::new(3, 1, 1)),
            (ArrayEdit::insert(2, 3), ArrayEdit::delete(3, 2)),
            (ArrayEdit::insert(2, 3), ArrayEdit::new(4, 3, 1)),
            (ArrayEdit::new(1, 2, 2), ArrayEdit::new(2, 1, 3)),
            (ArrayEdit::insert(0, 1), ArrayEdit::delete(0, 1)),
        ];

        for (first, second) in cases {
            let mut expected = tagged(10);
            first.apply_to(&mut expected);
            second.apply_to(&mut expected);

            let composite = CompositeArrayEdit::try_from_edits([first, second]).unwrap();
            assert!(composite.edits().len() <= 1, "{first:?} + {second:?} should merge");
            let mut actual = tagged(10);
            composite.apply_to(&mut actual);
            assert_eq!(actual, expected, "{first:?} + {second:?}");
        }
    }

    #[test]
    fn test_composite_offset_matches_splice() {
        let composite = CompositeArrayEdit::try_from_edits([
            ArrayEdit::new(0, 1, 1),
            ArrayEdit::insert(3, 2),
            ArrayEdit::delete(7, 1),
        ])
        .unwrap();
        let mut seq = tagged(9);
        composite.apply_to(&mut seq);
        for i in 0..9 {
            let position = seq.iter().position(|entry| *entry == Some(i));
            assert_eq!(composite.apply_to_offset(i), position, "index {i}");
        }
        assert_eq!(composite.shift(), 1);
    }
}
