//! Consumers of reconciled tokens and states.

use crate::array_edit::CompositeArrayEdit;
use crate::line_states::SparseLines;
use crate::tokens::{ContiguousLineTokens, LineTokens};

/// Receives finalized tokens and end-of-line states in current document coordinates.
pub trait TokenSink<S> {
    /// A finalized batch of line tokens.
    fn set_tokens(&mut self, batch: Vec<ContiguousLineTokens>);

    /// The current end-of-line state of `line`.
    fn set_end_state(&mut self, line: usize, state: &S);

    /// Background tokenization caught up with the end of the document.
    fn background_tokenization_finished(&mut self);

    /// The document changed structurally; line-indexed data must follow `edit`.
    fn on_structure_changed(&mut self, _edit: &CompositeArrayEdit) {}
}

/// In-memory token store fed by background tokenization.
///
/// Lines rewritten by an edit lose their tokens and state until the worker delivers fresh
/// ones, so stale tokens are never shown for changed text.
#[derive(Debug, Clone)]
pub struct BackgroundTokenStore<S> {
    tokens: SparseLines<LineTokens>,
    end_states: SparseLines<S>,
    finished: bool,
    batches: usize,
}

impl<S> BackgroundTokenStore<S> {
    /// Create a store for a document of `line_count` lines.
    pub fn new(line_count: usize) -> Self {
        Self {
            tokens: SparseLines::with_len(line_count),
            end_states: SparseLines::with_len(line_count),
            finished: false,
            batches: 0,
        }
    }

    /// Tokens of `line`, if known.
    pub fn line_tokens(&self, line: usize) -> Option<&LineTokens> {
        self.tokens.get(line)
    }

    /// End state of `line`, if known.
    pub fn end_state(&self, line: usize) -> Option<&S> {
        self.end_states.get(line)
    }

    /// Number of lines the store tracks.
    pub fn line_count(&self) -> usize {
        self.tokens.len()
    }

    /// Whether background tokenization reported completion.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of token batches received.
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Lines that currently have no tokens.
    pub fn missing_lines(&self) -> Vec<usize> {
        (0..self.tokens.len())
            .filter(|line| self.tokens.get(*line).is_none())
            .collect()
    }
}

impl<S: Clone> TokenSink<S> for BackgroundTokenStore<S> {
    fn set_tokens(&mut self, batch: Vec<ContiguousLineTokens>) {
        self.batches += 1;
        for block in batch {
            for (line, tokens) in block.into_lines() {
                self.tokens.set(line, Some(tokens));
            }
        }
    }

    fn set_end_state(&mut self, line: usize, state: &S) {
        self.end_states.set(line, Some(state.clone()));
    }

    fn background_tokenization_finished(&mut self) {
        self.finished = true;
    }

    fn on_structure_changed(&mut self, edit: &CompositeArrayEdit) {
        self.tokens.apply_edit(edit);
        self.end_states.apply_edit(edit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array_edit::ArrayEdit;
    use crate::tokens::Token;

    #[test]
    fn test_store_follows_structure() {
        let mut store = BackgroundTokenStore::<u8>::new(3);
        store.set_tokens(vec![ContiguousLineTokens {
            start_line: 0,
            lines: vec![
                LineTokens(vec![Token::new(0, 1)]),
                LineTokens(vec![Token::new(0, 2)]),
                LineTokens(vec![Token::new(0, 3)]),
            ],
        }]);
        store.set_end_state(2, &9);

        store.on_structure_changed(&CompositeArrayEdit::single(ArrayEdit::new(1, 1, 2)));

        assert_eq!(store.line_count(), 4);
        assert_eq!(store.missing_lines(), vec![1, 2]);
        assert_eq!(store.line_tokens(3), Some(&LineTokens(vec![Token::new(0, 3)])));
        assert_eq!(store.end_state(3), Some(&9));
        assert_eq!(store.batches(), 1);
        assert!(!store.is_finished());
    }
}
