//! Index transformation through a chain of array edits.
//!
//! The reconciler builds one [`IndexTransformer`] per worker result from the changes the worker
//! has not seen yet, then queries it once per candidate line. Construction normalizes every
//! composite edit into base-coordinate ranges with cumulative shifts, so a query costs one
//! binary search per composite and queries may arrive in any order.

use crate::array_edit::CompositeArrayEdit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NormalizedEdit {
    /// Start of the deleted range in pre-composite coordinates.
    base_start: usize,
    /// Exclusive end of the deleted range in pre-composite coordinates.
    base_end: usize,
    /// Total shift of this edit and every edit before it in the composite.
    shift_through: isize,
}

#[derive(Debug, Clone, Default)]
struct Layer {
    edits: Vec<NormalizedEdit>,
}

impl Layer {
    fn new(composite: &CompositeArrayEdit) -> Self {
        let mut edits = Vec::with_capacity(composite.edits().len());
        let mut shift: isize = 0;
        for edit in composite.edits() {
            let base_start = (edit.start as isize - shift) as usize;
            shift += edit.shift();
            edits.push(NormalizedEdit {
                base_start,
                base_end: base_start + edit.delete_count,
                shift_through: shift,
            });
        }
        Self { edits }
    }

    fn transform(&self, index: usize) -> Option<usize> {
        // Every edit whose deleted range ends at or before `index` shifts it.
        let passed = self.edits.partition_point(|edit| edit.base_end <= index);
        if let Some(next) = self.edits.get(passed)
            && next.base_start <= index
        {
            return None;
        }
        let shift = passed
            .checked_sub(1)
            .map_or(0, |last| self.edits[last].shift_through);
        Some((index as isize + shift) as usize)
    }
}

/// Maps indices of a sequence through a chain of [`CompositeArrayEdit`]s.
///
/// Transformation is monotonous: surviving indices keep their relative order.
#[derive(Debug, Clone, Default)]
pub struct IndexTransformer {
    layers: Vec<Layer>,
}

impl IndexTransformer {
    /// The identity transformer.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Transformer for a single composite edit.
    pub fn new(edit: &CompositeArrayEdit) -> Self {
        Self::from_many([edit])
    }

    /// Compose the transformers of `edits`, applied in iteration order.
    pub fn from_many<'a>(edits: impl IntoIterator<Item = &'a CompositeArrayEdit>) -> Self {
        let layers = edits
            .into_iter()
            .filter(|edit| !edit.is_empty())
            .map(Layer::new)
            .collect();
        Self { layers }
    }

    /// Returns `true` if every index maps to itself.
    pub fn is_identity(&self) -> bool {
        self.layers.is_empty()
    }

    /// Map an index from before all edits to after all edits.
    ///
    /// Returns `None` if any edit in the chain deleted the index.
    pub fn transform(&self, index: usize) -> Option<usize> {
        self.layers
            .iter()
            .try_fold(index, |index, layer| layer.transform(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array_edit::ArrayEdit;

    fn composite(edits: &[ArrayEdit]) -> CompositeArrayEdit {
        CompositeArrayEdit::try_from_edits(edits.iter().copied()).unwrap()
    }

    #[test]
    fn test_identity() {
        let transformer = IndexTransformer::from_many([]);
        assert!(transformer.is_identity());
        for i in [0, 1, 7, 10_000] {
            assert_eq!(transformer.transform(i), Some(i));
        }
    }

    #[test]
    fn test_insert_then_delete_chain() {
        let insert = composite(&[ArrayEdit::insert(1, 1)]);
        let delete = composite(&[ArrayEdit::delete(3, 1)]);
        let transformer = IndexTransformer::from_many([&insert, &delete]);

        assert_eq!(transformer.transform(0), Some(0));
        assert_eq!(transformer.transform(1), Some(2));
        // Index 2 moved to 3 and was deleted by the second edit.
        assert_eq!(transformer.transform(2), None);
        assert_eq!(transformer.transform(3), Some(3));
    }

    #[test]
    fn test_removed_index_stays_removed() {
        let replace = composite(&[ArrayEdit::new(2, 1, 1)]);
        let insert = composite(&[ArrayEdit::insert(0, 5)]);
        let transformer = IndexTransformer::from_many([&replace, &insert]);
        assert_eq!(transformer.transform(2), None);
        assert_eq!(transformer.transform(3), Some(8));
    }

    #[test]
    fn test_multi_region_composite_matches_sequential_rule() {
        let edit = composite(&[
            ArrayEdit::new(1, 2, 0),
            ArrayEdit::insert(3, 4),
            ArrayEdit::new(9, 1, 3),
        ]);
        let transformer = IndexTransformer::new(&edit);
        for i in 0..20 {
            assert_eq!(transformer.transform(i), edit.apply_to_offset(i), "index {i}");
        }
    }

    #[test]
    fn test_queries_in_any_order() {
        let edit = composite(&[ArrayEdit::delete(2, 2), ArrayEdit::insert(4, 1)]);
        let transformer = IndexTransformer::new(&edit);
        let forward: Vec<_> = (0..8).map(|i| transformer.transform(i)).collect();
        let backward: Vec<_> = (0..8).rev().map(|i| transformer.transform(i)).collect();
        assert_eq!(forward, backward.into_iter().rev().collect::<Vec<_>>());
    }
}
