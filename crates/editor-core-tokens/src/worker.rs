//! Out-of-line tokenization worker.
//!
//! The worker runs a [`LineTokenizer`] on a background thread and talks to its owner over
//! `std::sync::mpsc` channels only, so the same request/response types could cross a process
//! boundary (they all derive `serde` traits).
//!
//! The worker keeps its own replica of the document and its own line-state array. Lines whose
//! state is absent need tokenizing. Before every batch it drains all queued requests, so each
//! result is tagged with the newest version it has applied; results still lag behind the
//! document, which is what [`crate::reconcile`] is for.

use crate::document::{DocumentChange, DocumentError, LanguageChange, OpenDocument, TextDocument};
use crate::line_states::LineStates;
use crate::reconcile::WorkerResult;
use crate::state::{EndState, StateDeltaRun};
use crate::tokens::{
    DEFAULT_STYLE_ID, LineTokens, Token, TokenBatchBuilder, encode_token_blocks,
};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Output of tokenizing one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTokenization<S> {
    /// Tokens of the line.
    pub tokens: LineTokens,
    /// Tokenizer state at the end of the line.
    pub end_state: S,
}

/// A tokenization engine that works line by line.
pub trait LineTokenizer: Send + 'static {
    /// State carried from one line to the next.
    type State: EndState;

    /// State at the start of a document.
    fn initial_state(&self) -> Self::State;

    /// The document switched language.
    fn set_language(&mut self, _language_id: &str) {}

    /// Tokenize `line` (without its line break), starting in `state`.
    fn tokenize_line(&self, line: &str, state: &Self::State) -> LineTokenization<Self::State>;
}

/// Worker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Lines tokenized before the worker reports and checks for new requests.
    pub batch_lines: usize,
    /// Lines longer than this (in chars) are not tokenized; they get one default token and
    /// pass their start state through unchanged.
    pub max_line_chars: usize,
    /// Name of the worker thread.
    pub thread_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_lines: 200,
            max_line_chars: 20_000,
            thread_name: "editor-core-tokens".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Set [`Self::batch_lines`] (at least 1).
    pub fn with_batch_lines(mut self, batch_lines: usize) -> Self {
        self.batch_lines = batch_lines.max(1);
        self
    }

    /// Set [`Self::max_line_chars`].
    pub fn with_max_line_chars(mut self, max_line_chars: usize) -> Self {
        self.max_line_chars = max_line_chars;
        self
    }

    /// Set [`Self::thread_name`].
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

/// Messages sent to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerRequest {
    /// Start tracking a document.
    Open(OpenDocument),
    /// The document changed.
    Change(DocumentChange),
    /// The document switched language.
    LanguageChanged(LanguageChange),
    /// Stop the worker.
    Close,
}

/// Messages sent by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerResponse<D> {
    /// A batch of tokens and state deltas.
    Tokens(WorkerResult<D>),
    /// Every line of `version` is tokenized.
    Idle {
        /// Version the worker is up to date with.
        version: u64,
        /// Requests handled so far, `Open` included.
        requests: u64,
    },
    /// A request could not be applied.
    Failed {
        /// Version the worker was at.
        version: u64,
        /// Description of the failure.
        message: String,
    },
}

/// Errors produced at the worker boundary.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker thread could not be started.
    #[error("failed to spawn tokenization worker: {0}")]
    Spawn(#[from] io::Error),
    /// The worker thread is gone.
    #[error("tokenization worker disconnected")]
    Disconnected,
    /// No response arrived in time.
    #[error("timed out after {0:?} waiting for the tokenization worker")]
    Timeout(Duration),
    /// The worker rejected a request.
    #[error("tokenization worker failed at version {version}: {message}")]
    Failed {
        /// Version the worker was at.
        version: u64,
        /// Description of the failure.
        message: String,
    },
}

/// Owner side of a running worker. Dropping it stops the worker.
pub struct WorkerHandle<S: EndState> {
    tx: mpsc::Sender<WorkerRequest>,
    rx: mpsc::Receiver<WorkerResponse<S::Delta>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: EndState> WorkerHandle<S> {
    /// Send a request. Never waits for the worker.
    pub fn send(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.tx.send(request).map_err(|_| WorkerError::Disconnected)
    }

    /// Next response, if one is ready.
    pub fn try_recv(&self) -> Result<Option<WorkerResponse<S::Delta>>, WorkerError> {
        match self.rx.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    /// Wait up to `timeout` for the next response.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<WorkerResponse<S::Delta>, WorkerError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => WorkerError::Timeout(timeout),
            RecvTimeoutError::Disconnected => WorkerError::Disconnected,
        })
    }

    /// Stop the worker and wait for its thread.
    pub fn close(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // The worker may already be gone; joining still reaps it.
        let _ = self.tx.send(WorkerRequest::Close);
        if thread.join().is_err() {
            warn!("tokenization worker panicked");
        }
    }
}

impl<S: EndState> Drop for WorkerHandle<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Start a worker thread running `tokenizer`.
pub fn spawn_worker<T: LineTokenizer>(
    tokenizer: T,
    config: WorkerConfig,
) -> Result<WorkerHandle<T::State>, WorkerError> {
    let (tx_req, rx_req) = mpsc::channel::<WorkerRequest>();
    let (tx_res, rx_res) = mpsc::channel::<WorkerResponse<<T::State as EndState>::Delta>>();

    let thread = thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || {
            WorkerLoop {
                tokenizer,
                config,
                model: None,
                handled: 0,
                rx: rx_req,
                tx: tx_res,
            }
            .run()
        })?;

    Ok(WorkerHandle {
        tx: tx_req,
        rx: rx_res,
        thread: Some(thread),
    })
}

struct WorkerModel<S> {
    document: TextDocument,
    states: LineStates<S>,
    /// Every line before this one has a valid state.
    dirty_from: usize,
}

impl<S: EndState> WorkerModel<S> {
    fn open(snapshot: &OpenDocument) -> Self {
        let document = TextDocument::from_snapshot(snapshot);
        let states = LineStates::with_len(document.line_count());
        Self {
            document,
            states,
            dirty_from: 0,
        }
    }

    fn has_work(&self) -> bool {
        self.states.first_absent_from(self.dirty_from).is_some()
    }

    fn apply_change(&mut self, change: &DocumentChange) -> Result<(), DocumentError> {
        self.document.apply_change(change)?;
        for edit in change.line_edits() {
            if let Some(first) = edit.edits().first() {
                self.dirty_from = self.dirty_from.min(first.start);
            }
            self.states.apply_edit(&edit);
        }
        self.states.resize(self.document.line_count());
        Ok(())
    }

    fn invalidate_all(&mut self) {
        self.states.clear_entries();
        self.dirty_from = 0;
    }

    fn tokenize_batch<T: LineTokenizer<State = S>>(
        &mut self,
        tokenizer: &T,
        config: &WorkerConfig,
    ) -> WorkerResult<S::Delta> {
        let line_count = self.document.line_count();
        let mut remaining = config.batch_lines.max(1);
        let mut batch = TokenBatchBuilder::new();
        let mut runs = Vec::new();
        let mut next = self.states.first_absent_from(self.dirty_from);

        while let Some(start) = next {
            if remaining == 0 {
                break;
            }
            let mut state = match start.checked_sub(1) {
                Some(prev) => self
                    .states
                    .get(prev)
                    .cloned()
                    .unwrap_or_else(|| tokenizer.initial_state()),
                None => tokenizer.initial_state(),
            };
            let mut deltas = Vec::new();
            let mut line = start;
            next = None;

            loop {
                let text = self.document.line_text(line).unwrap_or_default();
                let LineTokenization { tokens, end_state } =
                    if text.chars().count() > config.max_line_chars {
                        LineTokenization {
                            tokens: LineTokens(vec![Token::new(0, DEFAULT_STYLE_ID)]),
                            end_state: state.clone(),
                        }
                    } else {
                        tokenizer.tokenize_line(&text, &state)
                    };

                deltas.push(S::diff(Some(&state), &end_state));
                let converged = self.states.get(line) == Some(&end_state);
                self.states.set(line, Some(end_state.clone()));
                batch.add(line, tokens);
                remaining -= 1;
                state = end_state;
                line += 1;

                if line >= line_count {
                    break;
                }
                if converged && self.states.get(line).is_some() {
                    // Later lines start from the same state as before.
                    next = self.states.first_absent_from(line);
                    break;
                }
                if remaining == 0 {
                    // The next line's start state changed; its stored state is stale.
                    self.states.set(line, None);
                    next = Some(line);
                    break;
                }
            }

            runs.push(StateDeltaRun {
                start_line: start,
                deltas,
            });
        }

        self.dirty_from = next.unwrap_or(line_count);
        WorkerResult {
            version: self.document.version(),
            payload: encode_token_blocks(&batch.finalize()),
            state_deltas: runs,
        }
    }
}

struct WorkerLoop<T: LineTokenizer> {
    tokenizer: T,
    config: WorkerConfig,
    model: Option<WorkerModel<T::State>>,
    handled: u64,
    rx: mpsc::Receiver<WorkerRequest>,
    tx: mpsc::Sender<WorkerResponse<<T::State as EndState>::Delta>>,
}

impl<T: LineTokenizer> WorkerLoop<T> {
    fn run(mut self) {
        loop {
            let busy = self.model.as_ref().is_some_and(WorkerModel::has_work);
            let request = if busy {
                match self.rx.try_recv() {
                    Ok(request) => Some(request),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match self.rx.recv() {
                    Ok(request) => Some(request),
                    Err(_) => break,
                }
            };

            match request {
                Some(WorkerRequest::Close) => break,
                Some(request) => {
                    if !self.handle(request) {
                        break;
                    }
                    continue;
                }
                None => {}
            }

            let Some(model) = self.model.as_mut() else {
                continue;
            };
            let result = model.tokenize_batch(&self.tokenizer, &self.config);
            let version = result.version;
            if self.tx.send(WorkerResponse::Tokens(result)).is_err() {
                break;
            }
            let idle = WorkerResponse::Idle {
                version,
                requests: self.handled,
            };
            if !model.has_work() && self.tx.send(idle).is_err() {
                break;
            }
        }
        debug!("tokenization worker stopped");
    }

    /// Returns `false` once the owner is gone.
    fn handle(&mut self, request: WorkerRequest) -> bool {
        self.handled += 1;
        match request {
            WorkerRequest::Open(snapshot) => {
                debug!(
                    uri = %snapshot.uri,
                    version = snapshot.version,
                    lines = snapshot.lines.len(),
                    language = %snapshot.language_id,
                    "worker opened document"
                );
                self.tokenizer.set_language(&snapshot.language_id);
                self.model = Some(WorkerModel::open(&snapshot));
                true
            }
            WorkerRequest::Change(change) => {
                let Some(model) = self.model.as_mut() else {
                    return self.fail(change.version, "change received before open".to_string());
                };
                match model.apply_change(&change) {
                    Ok(()) => true,
                    Err(err) => {
                        let version = model.document.version();
                        self.fail(version, err.to_string())
                    }
                }
            }
            WorkerRequest::LanguageChanged(change) => {
                self.tokenizer.set_language(&change.language_id);
                if let Some(model) = self.model.as_mut() {
                    model.invalidate_all();
                }
                true
            }
            WorkerRequest::Close => false,
        }
    }

    fn fail(&self, version: u64, message: String) -> bool {
        warn!(version, %message, "tokenization worker rejected a request");
        self.tx
            .send(WorkerResponse::Failed { version, message })
            .is_ok()
    }
}
