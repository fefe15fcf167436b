//! Worker result reconciliation.
//!
//! A worker result is computed against the document version the worker last saw. By the time it
//! arrives, more changes may sit in the ledger. [`Reconciler::set_tokens_and_states`] brings the
//! line-state array up to the worker's version, maps the result through the changes the worker
//! has not seen yet, and forwards whatever survived to a [`TokenSink`].

use crate::index_transform::IndexTransformer;
use crate::ledger::{ChangeLedger, PendingChange};
use crate::line_states::LineStates;
use crate::sink::TokenSink;
use crate::state::{EndState, StateDeltaError, StateDeltaRun};
use crate::tokens::{PayloadError, TokenBatchBuilder, decode_token_blocks};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Tokens and state deltas computed by a worker, in the worker's line coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResult<D> {
    /// Document version the worker had last observed.
    pub version: u64,
    /// Encoded token blocks (see [`crate::tokens`]).
    pub payload: Vec<u32>,
    /// End-of-line state deltas.
    pub state_deltas: Vec<StateDeltaRun<D>>,
}

/// Errors that abort a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The token payload or a delta run was malformed.
    #[error("malformed worker payload: {0}")]
    Payload(#[from] PayloadError),
    /// A state delta could not be applied.
    #[error("malformed state delta for line {line}: {source}")]
    StateDelta {
        /// Worker-time line of the delta.
        line: usize,
        /// Underlying failure.
        #[source]
        source: StateDeltaError,
    },
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Version the result was computed against.
    pub version: u64,
    /// Ledger changes retired by this pass.
    pub retired: usize,
    /// Token lines forwarded to the sink.
    pub lines_kept: usize,
    /// Token lines dropped because later changes touched them.
    pub lines_dropped: usize,
    /// States written into the line-state array.
    pub states_written: usize,
    /// States forwarded to the sink.
    pub states_forwarded: usize,
    /// Whether this pass signalled completion to the sink.
    pub finished: bool,
}

/// Keeps per-line tokenizer states in step with a lagging worker.
#[derive(Debug, Clone)]
pub struct Reconciler<S: EndState> {
    ledger: ChangeLedger,
    states: LineStates<S>,
    initial_state: S,
    finished: bool,
    last_version: Option<u64>,
}

impl<S: EndState> Reconciler<S> {
    /// Create a reconciler for a document of `line_count` lines.
    ///
    /// `initial_state` is the tokenizer state at the start of the document.
    pub fn new(line_count: usize, initial_state: S) -> Self {
        Self {
            ledger: ChangeLedger::new(),
            states: LineStates::with_len(line_count),
            initial_state,
            finished: false,
            last_version: None,
        }
    }

    /// Record a document change the worker has not reported on yet.
    pub fn push_change(&mut self, change: PendingChange) {
        self.ledger.push(change);
    }

    /// The pending change ledger.
    pub fn ledger(&self) -> &ChangeLedger {
        &self.ledger
    }

    /// The line-state array, shaped like the last document version a worker reported on.
    pub fn states(&self) -> &LineStates<S> {
        &self.states
    }

    /// State at the start of the document.
    pub fn initial_state(&self) -> &S {
        &self.initial_state
    }

    /// Whether completion was already signalled.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fold every pending change into the line-state array.
    ///
    /// Afterwards the array is shaped like the latest document version.
    pub fn retire_all(&mut self) -> usize {
        let retired = self.ledger.retire_up_to(u64::MAX);
        for change in &retired {
            self.replay(change);
        }
        retired.len()
    }

    fn replay(&mut self, change: &PendingChange) {
        for edit in &change.line_edits {
            self.states.apply_edit(edit);
        }
    }

    fn seed_state(&self, staged: &[(usize, Option<S>)], start_line: usize) -> Option<S> {
        let Some(prev_line) = start_line.checked_sub(1) else {
            return Some(self.initial_state.clone());
        };
        match staged.iter().rev().find(|(line, _)| *line == prev_line) {
            Some((_, state)) => state.clone(),
            None => self.states.get(prev_line).cloned(),
        }
    }

    /// Apply a worker result and forward what is still valid to `sink`.
    ///
    /// On error nothing reaches the sink and no state is written; changes the result proves
    /// the worker has seen are still retired.
    pub fn set_tokens_and_states<K: TokenSink<S>>(
        &mut self,
        result: WorkerResult<S::Delta>,
        sink: &mut K,
    ) -> Result<ReconcileReport, ReconcileError> {
        debug_assert!(
            self.last_version.is_none_or(|last| last <= result.version),
            "worker results must not go back in time: {:?} then {}",
            self.last_version,
            result.version
        );
        self.last_version = Some(result.version);

        let blocks = decode_token_blocks(&result.payload)?;
        let mut report = ReconcileReport {
            version: result.version,
            ..ReconcileReport::default()
        };

        // Bring the array to the shape the worker saw.
        let retired = self.ledger.retire_up_to(result.version);
        for change in &retired {
            self.replay(change);
        }
        report.retired = retired.len();

        let line_count = self.states.len();
        let spans = blocks
            .iter()
            .map(|block| (block.start_line, block.end_line()))
            .chain(
                result
                    .state_deltas
                    .iter()
                    .map(|run| (run.start_line, run.end_line())),
            );
        for (start, end) in spans {
            let line = match end {
                Some(end) if end <= line_count => continue,
                Some(end) => end - 1,
                None => start,
            };
            return Err(PayloadError::LineOutOfRange { line, line_count }.into());
        }

        let future = IndexTransformer::from_many(self.ledger.line_edits());

        let mut batch = TokenBatchBuilder::new();
        for block in blocks {
            for (line, tokens) in block.into_lines() {
                match future.transform(line) {
                    Some(current) => {
                        batch.add(current, tokens);
                        report.lines_kept += 1;
                    }
                    None => {
                        trace!(line, "dropping tokens of a line changed since the snapshot");
                        report.lines_dropped += 1;
                    }
                }
            }
        }

        let last_line = line_count.saturating_sub(1);
        let mut reached_end = false;
        let mut staged: Vec<(usize, Option<S>)> = Vec::new();
        for run in &result.state_deltas {
            let mut prev = self.seed_state(&staged, run.start_line);
            for (offset, delta) in run.deltas.iter().enumerate() {
                let line = run.start_line + offset;
                let state = match delta {
                    Some(delta) => Some(
                        S::apply_delta(prev.as_ref(), delta)
                            .map_err(|source| ReconcileError::StateDelta { line, source })?,
                    ),
                    None => prev.clone(),
                };
                if line >= last_line {
                    reached_end = true;
                }
                staged.push((line, state.clone()));
                prev = state;
            }
        }

        let mut end_states = Vec::new();
        for (line, state) in staged {
            if let Some(state) = &state
                && let Some(current) = future.transform(line)
            {
                end_states.push((current, state.clone()));
            }
            self.states.set(line, state);
            report.states_written += 1;
        }
        report.states_forwarded = end_states.len();

        if !batch.is_empty() {
            sink.set_tokens(batch.finalize());
        }
        for (line, state) in &end_states {
            sink.set_end_state(*line, state);
        }
        if reached_end && !self.finished {
            self.finished = true;
            report.finished = true;
            sink.background_tokenization_finished();
        }

        debug!(
            version = report.version,
            retired = report.retired,
            kept = report.lines_kept,
            dropped = report.lines_dropped,
            states = report.states_written,
            forwarded = report.states_forwarded,
            finished = report.finished,
            pending = self.ledger.len(),
            "reconciled worker result"
        );
        Ok(report)
    }

    /// Like [`Self::set_tokens_and_states`], but logs and swallows malformed results.
    pub fn accept<K: TokenSink<S>>(
        &mut self,
        result: WorkerResult<S::Delta>,
        sink: &mut K,
    ) -> Option<ReconcileReport> {
        let version = result.version;
        match self.set_tokens_and_states(result, sink) {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(version, error = %err, "discarding malformed worker result");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array_edit::{ArrayEdit, CompositeArrayEdit};
    use crate::sink::BackgroundTokenStore;
    use crate::state::{ScopeStack, StackDelta};
    use crate::tokens::{ContiguousLineTokens, LineTokens, Token, encode_token_blocks};

    fn tokens_for(start_line: usize, count: usize) -> Vec<u32> {
        let lines = (0..count)
            .map(|i| LineTokens(vec![Token::new(0, (start_line + i) as u32 + 100)]))
            .collect();
        encode_token_blocks(&[ContiguousLineTokens { start_line, lines }])
    }

    fn push(frames: &[u32]) -> Option<StackDelta> {
        Some(StackDelta {
            pop: 0,
            push: frames.to_vec(),
        })
    }

    fn change(version: u64, edit: ArrayEdit) -> PendingChange {
        PendingChange::new(version, vec![CompositeArrayEdit::single(edit)])
    }

    #[test]
    fn test_result_without_pending_changes_passes_through() {
        let mut reconciler = Reconciler::new(3, ScopeStack::new());
        let mut store = BackgroundTokenStore::<ScopeStack>::new(3);
        let report = reconciler
            .set_tokens_and_states(
                WorkerResult {
                    version: 1,
                    payload: tokens_for(0, 3),
                    state_deltas: vec![StateDeltaRun {
                        start_line: 0,
                        deltas: vec![None, push(&[7]), None],
                    }],
                },
                &mut store,
            )
            .unwrap();

        assert_eq!(report.lines_kept, 3);
        assert_eq!(report.states_forwarded, 3);
        assert!(report.finished);
        assert!(store.is_finished());
        assert_eq!(store.end_state(0), Some(&ScopeStack::new()));
        assert_eq!(store.end_state(1), Some(&ScopeStack::from(vec![7])));
        assert_eq!(store.end_state(2), Some(&ScopeStack::from(vec![7])));
        assert_eq!(reconciler.states().get(2), Some(&ScopeStack::from(vec![7])));
    }

    #[test]
    fn test_pure_insertion_shifts_tokens_down() {
        // Worker saw version 1 (3 lines). The user then inserted a line at position 2.
        let mut reconciler = Reconciler::new(3, ScopeStack::new());
        let mut store = BackgroundTokenStore::<ScopeStack>::new(3);
        let insert = change(2, ArrayEdit::insert(1, 1));
        store.on_structure_changed(&insert.line_edits[0]);
        reconciler.push_change(insert);

        let report = reconciler
            .set_tokens_and_states(
                WorkerResult {
                    version: 1,
                    payload: tokens_for(0, 3),
                    state_deltas: Vec::new(),
                },
                &mut store,
            )
            .unwrap();

        assert_eq!(report.lines_kept, 3);
        assert_eq!(report.lines_dropped, 0);
        assert_eq!(store.line_tokens(0).unwrap().style_at(0), Some(100));
        assert_eq!(store.line_tokens(1), None);
        assert_eq!(store.line_tokens(2).unwrap().style_at(0), Some(101));
        assert_eq!(store.line_tokens(3).unwrap().style_at(0), Some(102));
    }

    #[test]
    fn test_lines_edited_after_snapshot_never_reach_sink() {
        let mut reconciler = Reconciler::new(4, ScopeStack::new());
        let mut store = BackgroundTokenStore::<ScopeStack>::new(4);
        reconciler.push_change(change(2, ArrayEdit::new(1, 1, 1)));
        reconciler.push_change(change(3, ArrayEdit::delete(3, 1)));

        let report = reconciler
            .set_tokens_and_states(
                WorkerResult {
                    version: 1,
                    payload: tokens_for(0, 4),
                    state_deltas: vec![StateDeltaRun {
                        start_line: 0,
                        deltas: vec![None, None, None, None],
                    }],
                },
                &mut store,
            )
            .unwrap();

        assert_eq!(report.lines_kept, 2);
        assert_eq!(report.lines_dropped, 2);
        assert_eq!(store.line_tokens(1), None);
        assert_eq!(store.line_tokens(2).unwrap().style_at(0), Some(102));
        // States are written at worker coordinates even for dropped lines...
        assert_eq!(report.states_written, 4);
        assert_eq!(reconciler.states().len(), 4);
        // ...but only surviving lines are forwarded.
        assert_eq!(report.states_forwarded, 2);
        assert_eq!(store.end_state(1), None);
    }

    #[test]
    fn test_retires_past_changes_in_order() {
        let mut reconciler = Reconciler::new(2, ScopeStack::new());
        let mut store = BackgroundTokenStore::<ScopeStack>::new(2);
        reconciler.push_change(change(2, ArrayEdit::insert(2, 3)));
        reconciler.push_change(change(3, ArrayEdit::delete(0, 1)));
        reconciler.push_change(change(4, ArrayEdit::insert(0, 1)));

        let report = reconciler
            .set_tokens_and_states(
                WorkerResult {
                    version: 3,
                    payload: Vec::new(),
                    state_deltas: Vec::new(),
                },
                &mut store,
            )
            .unwrap();
        assert_eq!(report.retired, 2);
        assert_eq!(reconciler.states().len(), 4);
        assert_eq!(reconciler.ledger().len(), 1);
        assert_eq!(reconciler.retire_all(), 1);
        assert_eq!(reconciler.states().len(), 5);
    }

    #[test]
    fn test_seed_comes_from_previous_line() {
        let mut reconciler = Reconciler::new(4, ScopeStack::new());
        let mut store = BackgroundTokenStore::<ScopeStack>::new(4);
        reconciler
            .set_tokens_and_states(
                WorkerResult {
                    version: 1,
                    payload: Vec::new(),
                    state_deltas: vec![StateDeltaRun {
                        start_line: 0,
                        deltas: vec![push(&[1]), push(&[2])],
                    }],
                },
                &mut store,
            )
            .unwrap();

        let report = reconciler
            .set_tokens_and_states(
                WorkerResult {
                    version: 1,
                    payload: Vec::new(),
                    state_deltas: vec![StateDeltaRun {
                        start_line: 2,
                        deltas: vec![
                            Some(StackDelta {
                                pop: 1,
                                push: vec![3],
                            }),
                            None,
                        ],
                    }],
                },
                &mut store,
            )
            .unwrap();
        assert!(report.finished);
        assert_eq!(reconciler.states().get(2), Some(&ScopeStack::from(vec![1, 3])));
        assert_eq!(store.end_state(3), Some(&ScopeStack::from(vec![1, 3])));
    }

    #[test]
    fn test_truncated_payload_aborts_before_any_write() {
        let mut reconciler = Reconciler::new(3, ScopeStack::new());
        let mut store = BackgroundTokenStore::<ScopeStack>::new(3);
        let err = reconciler
            .set_tokens_and_states(
                WorkerResult {
                    version: 1,
                    payload: vec![0, 3, 0, 0],
                    state_deltas: vec![StateDeltaRun {
                        start_line: 0,
                        deltas: vec![push(&[1])],
                    }],
                },
                &mut store,
            )
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Payload(PayloadError::Truncated { .. })));
        assert_eq!(reconciler.states().get(0), None);
        assert_eq!(store.batches(), 0);
        assert_eq!(store.end_state(0), None);
    }

    #[test]
    fn test_bad_delta_aborts_without_partial_writes() {
        let mut reconciler = Reconciler::new(3, ScopeStack::new());
        let mut store = BackgroundTokenStore::<ScopeStack>::new(3);
        let result = WorkerResult {
            version: 1,
            payload: tokens_for(0, 3),
            state_deltas: vec![StateDeltaRun {
                start_line: 0,
                deltas: vec![
                    push(&[1]),
                    Some(StackDelta {
                        pop: 4,
                        push: Vec::new(),
                    }),
                ],
            }],
        };
        assert!(reconciler.accept(result, &mut store).is_none());
        assert_eq!(reconciler.states().get(0), None);
        assert_eq!(store.batches(), 0);
        assert!(!store.is_finished());
    }

    #[test]
    fn test_lines_beyond_worker_document_are_malformed() {
        let mut reconciler = Reconciler::new(2, ScopeStack::new());
        let mut store = BackgroundTokenStore::<ScopeStack>::new(2);
        let err = reconciler
            .set_tokens_and_states(
                WorkerResult {
                    version: 1,
                    payload: tokens_for(1, 2),
                    state_deltas: Vec::new(),
                },
                &mut store,
            )
            .unwrap_err();
        assert_eq!(
            err,
            ReconcileError::Payload(PayloadError::LineOutOfRange {
                line: 2,
                line_count: 2
            })
        );
    }

    #[test]
    fn test_delta_runs_beyond_worker_document_are_malformed() {
        let mut reconciler = Reconciler::new(3, ScopeStack::new());
        let mut store = BackgroundTokenStore::<ScopeStack>::new(3);
        reconciler
            .set_tokens_and_states(
                WorkerResult {
                    version: 1,
                    payload: Vec::new(),
                    state_deltas: vec![StateDeltaRun {
                        start_line: 0,
                        deltas: vec![push(&[1]), None, None],
                    }],
                },
                &mut store,
            )
            .unwrap();

        for start_line in [2, usize::MAX] {
            let err = reconciler
                .set_tokens_and_states(
                    WorkerResult {
                        version: 1,
                        payload: Vec::new(),
                        state_deltas: vec![StateDeltaRun {
                            start_line,
                            deltas: vec![None, push(&[2])],
                        }],
                    },
                    &mut store,
                )
                .unwrap_err();
            assert!(matches!(
                err,
                ReconcileError::Payload(PayloadError::LineOutOfRange { line_count: 3, .. })
            ));
            assert_eq!(reconciler.states().len(), 3);
            assert_eq!(reconciler.states().get(2), Some(&ScopeStack::from(vec![1])));
        }
    }

    #[test]
    fn test_completion_fires_once() {
        let mut reconciler = Reconciler::new(1, ScopeStack::new());
        let mut store = BackgroundTokenStore::<ScopeStack>::new(1);
        let result = WorkerResult {
            version: 1,
            payload: Vec::new(),
            state_deltas: vec![StateDeltaRun {
                start_line: 0,
                deltas: vec![None],
            }],
        };
        assert!(
            reconciler
                .set_tokens_and_states(result.clone(), &mut store)
                .unwrap()
                .finished
        );
        assert!(
            !reconciler
                .set_tokens_and_states(result, &mut store)
                .unwrap()
                .finished
        );
        assert!(reconciler.is_finished());
    }
}
