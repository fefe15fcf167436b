//! Owner-side orchestration of background tokenization.
//!
//! [`TokenizationController`] owns the authoritative [`TextDocument`], the [`Reconciler`], the
//! [`TokenSink`] and the [`WorkerHandle`]. Everything lives behind one mutex: a change is
//! recorded in the ledger, announced to the sink and sent to the worker without releasing it,
//! so no result for that version can be reconciled before the ledger knows the change.

use crate::document::{ContentChange, DocumentError, TextDocument};
use crate::reconcile::{ReconcileError, ReconcileReport, Reconciler};
use crate::sink::TokenSink;
use crate::state::EndState;
use crate::worker::{
    LineTokenizer, WorkerConfig, WorkerError, WorkerHandle, WorkerRequest, WorkerResponse,
    spawn_worker,
};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Longest single wait on the worker channel while the lock is held.
const RECV_SLICE: Duration = Duration::from_millis(5);

/// Errors surfaced by [`TokenizationController`].
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A content change was rejected by the document.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// The worker failed or went away.
    #[error(transparent)]
    Worker(#[from] WorkerError),
    /// A worker result was malformed. Nothing from it was applied.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

struct Inner<S: EndState, K> {
    document: TextDocument,
    reconciler: Reconciler<S>,
    sink: K,
    worker: WorkerHandle<S>,
    requests_sent: u64,
    idle: bool,
}

impl<S: EndState, K: TokenSink<S>> Inner<S, K> {
    fn send(&mut self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.worker.send(request)?;
        self.requests_sent += 1;
        self.idle = false;
        Ok(())
    }

    fn handle_response(
        &mut self,
        response: WorkerResponse<S::Delta>,
    ) -> Result<Option<ReconcileReport>, ControllerError> {
        match response {
            WorkerResponse::Tokens(result) => {
                let report = self.reconciler.set_tokens_and_states(result, &mut self.sink);
                if let Err(err) = &report {
                    warn!(error = %err, "discarding malformed worker result");
                }
                Ok(Some(report?))
            }
            WorkerResponse::Idle { version, requests } => {
                if requests == self.requests_sent {
                    debug!(version, "background tokenization idle");
                    self.idle = true;
                }
                Ok(None)
            }
            WorkerResponse::Failed { version, message } => {
                Err(WorkerError::Failed { version, message }.into())
            }
        }
    }
}

/// Drives one document's background tokenization.
pub struct TokenizationController<S: EndState, K> {
    inner: Mutex<Inner<S, K>>,
}

impl<S: EndState, K: TokenSink<S>> TokenizationController<S, K> {
    /// Start a worker running `tokenizer` and register `document` with it.
    ///
    /// `sink` should start out sized for `document` (see
    /// [`crate::BackgroundTokenStore::new`]).
    pub fn open<T: LineTokenizer<State = S>>(
        document: TextDocument,
        tokenizer: T,
        sink: K,
        config: WorkerConfig,
    ) -> Result<Self, ControllerError> {
        let reconciler = Reconciler::new(document.line_count(), tokenizer.initial_state());
        let worker = spawn_worker(tokenizer, config)?;
        debug!(
            uri = document.uri(),
            version = document.version(),
            lines = document.line_count(),
            "opening background tokenization"
        );
        let mut inner = Inner {
            document,
            reconciler,
            sink,
            worker,
            requests_sent: 0,
            idle: false,
        };
        let snapshot = inner.document.snapshot();
        inner.send(WorkerRequest::Open(snapshot))?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Apply `changes` to the document and forward them to the worker.
    ///
    /// Returns the new document version.
    pub fn handle_document_change(
        &self,
        changes: Vec<ContentChange>,
    ) -> Result<u64, ControllerError> {
        let mut inner = self.inner.lock();
        let change = inner.document.apply_changes(changes)?;
        let pending = change.to_pending();
        for edit in &pending.line_edits {
            inner.sink.on_structure_changed(edit);
        }
        inner.reconciler.push_change(pending);
        let version = change.version;
        inner.send(WorkerRequest::Change(change))?;
        Ok(version)
    }

    /// Switch the document language; the worker retokenizes everything.
    pub fn handle_language_change(
        &self,
        language_id: impl Into<String>,
    ) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock();
        let change = inner.document.set_language(language_id);
        debug!(language = %change.language_id, "language changed");
        inner.send(WorkerRequest::LanguageChanged(change))?;
        Ok(())
    }

    /// Reconcile every worker response that is already available.
    ///
    /// Returns the number of results applied.
    pub fn poll(&self) -> Result<usize, ControllerError> {
        let mut inner = self.inner.lock();
        let mut applied = 0;
        while let Some(response) = inner.worker.try_recv()? {
            if inner.handle_response(response)?.is_some() {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Reconcile worker responses until the worker reports it has caught up with every request.
    pub fn wait_until_idle(&self, timeout: Duration) -> Result<(), ControllerError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Released between slices so other threads can keep editing.
            let mut inner = self.inner.lock();
            if inner.idle {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WorkerError::Timeout(timeout).into());
            }
            match inner.worker.recv_timeout(RECV_SLICE.min(deadline - now)) {
                Ok(response) => {
                    inner.handle_response(response)?;
                }
                Err(WorkerError::Timeout(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Whether the worker has caught up with every request sent so far.
    pub fn is_idle(&self) -> bool {
        self.inner.lock().idle
    }

    /// Current document version.
    pub fn version(&self) -> u64 {
        self.inner.lock().document.version()
    }

    /// Current document text.
    pub fn text(&self) -> String {
        self.inner.lock().document.text()
    }

    /// Run `f` against the document.
    pub fn with_document<R>(&self, f: impl FnOnce(&TextDocument) -> R) -> R {
        f(&self.inner.lock().document)
    }

    /// Run `f` against the sink.
    pub fn with_sink<R>(&self, f: impl FnOnce(&K) -> R) -> R {
        f(&self.inner.lock().sink)
    }

    /// Number of changes the worker has not reported on yet.
    pub fn pending_changes(&self) -> usize {
        self.inner.lock().reconciler.ledger().len()
    }

    /// Stop the worker and hand back the sink.
    pub fn dispose(self) -> K {
        let Inner {
            mut worker, sink, ..
        } = self.inner.into_inner();
        worker.close();
        debug!("background tokenization disposed");
        sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{TextPosition, TextRange};
    use crate::sink::BackgroundTokenStore;
    use crate::state::ScopeStack;
    use crate::tokens::{LineTokens, Token};
    use crate::worker::LineTokenization;

    /// Every line gets one token whose style is the line length.
    struct LengthTokenizer;

    impl LineTokenizer for LengthTokenizer {
        type State = ScopeStack;

        fn initial_state(&self) -> ScopeStack {
            ScopeStack::new()
        }

        fn tokenize_line(&self, line: &str, state: &ScopeStack) -> LineTokenization<ScopeStack> {
            LineTokenization {
                tokens: LineTokens(vec![Token::new(0, line.chars().count() as u32)]),
                end_state: state.clone(),
            }
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn open(text: &str) -> TokenizationController<ScopeStack, BackgroundTokenStore<ScopeStack>> {
        let document = TextDocument::new("mem://c", text, "plain");
        let store = BackgroundTokenStore::new(document.line_count());
        TokenizationController::open(document, LengthTokenizer, store, WorkerConfig::default())
            .unwrap()
    }

    #[test]
    fn test_initial_tokenization_completes() {
        let controller = open("a\nbb\nccc");
        controller.wait_until_idle(TIMEOUT).unwrap();
        assert!(controller.is_idle());
        assert_eq!(controller.pending_changes(), 0);
        controller.with_sink(|store| {
            assert!(store.is_finished());
            assert!(store.missing_lines().is_empty());
            assert_eq!(store.line_tokens(2).unwrap().style_at(0), Some(3));
        });
    }

    #[test]
    fn test_edits_are_reflected_after_idle() {
        let controller = open("a\nbb\nccc");
        controller.wait_until_idle(TIMEOUT).unwrap();
        let version = controller
            .handle_document_change(vec![ContentChange::insert(
                TextPosition::new(1, 2),
                "xx\nyyyy",
            )])
            .unwrap();
        assert_eq!(version, 2);
        assert!(!controller.is_idle());

        controller.wait_until_idle(TIMEOUT).unwrap();
        let store = controller.dispose();
        assert_eq!(store.line_count(), 4);
        assert!(store.missing_lines().is_empty());
        let styles: Vec<_> = (0..4)
            .map(|line| store.line_tokens(line).unwrap().style_at(0))
            .collect();
        assert_eq!(styles, vec![Some(1), Some(4), Some(4), Some(3)]);
    }

    #[test]
    fn test_rejected_change_leaves_everything_untouched() {
        let controller = open("a");
        let err = controller
            .handle_document_change(vec![ContentChange::delete(TextRange::new(
                TextPosition::new(0, 0),
                TextPosition::new(3, 0),
            ))])
            .unwrap_err();
        assert!(matches!(err, ControllerError::Document(_)));
        assert_eq!(controller.version(), 1);
        assert_eq!(controller.pending_changes(), 0);
    }

    #[test]
    fn test_language_change_waits_for_fresh_idle() {
        let controller = open("a\nb");
        controller.wait_until_idle(TIMEOUT).unwrap();
        controller.handle_language_change("other").unwrap();
        assert!(!controller.is_idle());
        controller.wait_until_idle(TIMEOUT).unwrap();
        assert_eq!(controller.with_document(|doc| doc.language_id().to_string()), "other");
    }
}
