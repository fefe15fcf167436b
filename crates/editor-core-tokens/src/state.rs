//! End-of-line tokenizer states and their deltas.
//!
//! A worker does not ship full states. For each line it ships how the line's end state differs
//! from the previous line's end state; the receiver rebuilds states by applying deltas in order,
//! starting from a state it already knows.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced while applying a state delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateDeltaError {
    /// A delta popped more frames than the base state has.
    #[error("state delta pops {pop} frames from a stack of depth {depth}")]
    PopUnderflow {
        /// Frames the delta pops.
        pop: usize,
        /// Depth of the base state.
        depth: usize,
    },
}

/// An opaque tokenizer state valid at the end of a line.
pub trait EndState: Clone + PartialEq + fmt::Debug + Send + 'static {
    /// Compact description of how one state differs from another.
    type Delta: Clone + fmt::Debug + Send + 'static;

    /// Delta turning `base` into `next`, or `None` if they are equal.
    ///
    /// A `None` base stands for the empty/initial state of the delta encoding.
    fn diff(base: Option<&Self>, next: &Self) -> Option<Self::Delta>;

    /// Rebuild the state described by `delta` on top of `base`.
    ///
    /// Must be a pure function of its inputs.
    fn apply_delta(base: Option<&Self>, delta: &Self::Delta) -> Result<Self, StateDeltaError>;
}

/// Successive end-of-line state deltas starting at `start_line`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDeltaRun<D> {
    /// First line the run describes (0-based).
    pub start_line: usize,
    /// One entry per line; `None` means "same end state as the previous line".
    pub deltas: Vec<Option<D>>,
}

impl<D> StateDeltaRun<D> {
    /// Exclusive end line of the run, or `None` if it does not fit in `usize`.
    pub fn end_line(&self) -> Option<usize> {
        self.start_line.checked_add(self.deltas.len())
    }
}

/// A stack of scope ids, e.g. nested block comments or string regions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeStack {
    frames: Vec<u32>,
}

impl ScopeStack {
    /// The empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Innermost scope.
    pub fn top(&self) -> Option<u32> {
        self.frames.last().copied()
    }

    /// Number of frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Frames, outermost first.
    pub fn frames(&self) -> &[u32] {
        &self.frames
    }

    /// Push a scope.
    pub fn push(&mut self, scope: u32) {
        self.frames.push(scope);
    }

    /// Pop the innermost scope.
    pub fn pop(&mut self) -> Option<u32> {
        self.frames.pop()
    }
}

impl From<Vec<u32>> for ScopeStack {
    fn from(frames: Vec<u32>) -> Self {
        Self { frames }
    }
}

/// Delta between two [`ScopeStack`]s: pop `pop` frames, then push `push`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackDelta {
    /// Frames removed from the top of the base.
    pub pop: usize,
    /// Frames pushed afterwards, outermost first.
    pub push: Vec<u32>,
}

impl EndState for ScopeStack {
    type Delta = StackDelta;

    fn diff(base: Option<&Self>, next: &Self) -> Option<StackDelta> {
        let base = base.map_or(&[][..], |base| base.frames());
        let common = base
            .iter()
            .zip(next.frames())
            .take_while(|(a, b)| a == b)
            .count();
        if common == base.len() && common == next.depth() {
            return None;
        }
        Some(StackDelta {
            pop: base.len() - common,
            push: next.frames[common..].to_vec(),
        })
    }

    fn apply_delta(base: Option<&Self>, delta: &StackDelta) -> Result<Self, StateDeltaError> {
        let base = base.map_or(&[][..], |base| base.frames());
        let keep = base
            .len()
            .checked_sub(delta.pop)
            .ok_or(StateDeltaError::PopUnderflow {
                pop: delta.pop,
                depth: base.len(),
            })?;
        let mut frames = Vec::with_capacity(keep + delta.push.len());
        frames.extend_from_slice(&base[..keep]);
        frames.extend_from_slice(&delta.push);
        Ok(Self { frames })
    }
}
