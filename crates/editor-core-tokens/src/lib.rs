#![warn(missing_docs)]
//! Editor Core Tokens - background tokenization state sync
//!
//! # Overview
//!
//! `editor-core-tokens` keeps syntax tokens and per-line tokenizer states correct while a
//! background worker tokenizes a document that keeps changing underneath it.
//!
//! The worker always lags behind: its results describe the document version it last saw.
//! The owner records every change the worker has not reported on yet, and when a result
//! arrives it maps each line of the result through those later changes. Lines that were
//! touched after the worker's snapshot are dropped, so stale tokens never flicker on screen.
//!
//! # Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  TokenizationController (one mutex)         │  ← Public API
//! ├──────────────────────┬──────────────────────┤
//! │  Reconciler          │  Worker thread       │  ← mpsc boundary
//! │  (ledger + states)   │  (replica document)  │
//! ├──────────────────────┴──────────────────────┤
//! │  IndexTransformer / CompositeArrayEdit      │  ← Index mapping
//! ├─────────────────────────────────────────────┤
//! │  SparseLines / TextDocument (Rope-based)    │  ← Storage
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use editor_core_tokens::{
//!     ArrayEdit, BackgroundTokenStore, CompositeArrayEdit, ContiguousLineTokens, LineTokens,
//!     PendingChange, Reconciler, ScopeStack, Token, TokenSink, WorkerResult,
//!     encode_token_blocks,
//! };
//!
//! // The worker tokenized a 3-line document at version 1...
//! let payload = encode_token_blocks(&[ContiguousLineTokens {
//!     start_line: 0,
//!     lines: (0..3).map(|i| LineTokens(vec![Token::new(0, i)])).collect(),
//! }]);
//!
//! // ...while the user inserted a line after the first one (version 2).
//! let mut reconciler = Reconciler::new(3, ScopeStack::new());
//! let mut store = BackgroundTokenStore::<ScopeStack>::new(3);
//! let insert = CompositeArrayEdit::single(ArrayEdit::insert(1, 1));
//! store.on_structure_changed(&insert);
//! reconciler.push_change(PendingChange::new(2, vec![insert]));
//!
//! let result = WorkerResult { version: 1, payload, state_deltas: Vec::new() };
//! reconciler.set_tokens_and_states(result, &mut store).unwrap();
//!
//! assert_eq!(store.line_tokens(0).unwrap().style_at(0), Some(0));
//! assert!(store.line_tokens(1).is_none());
//! assert_eq!(store.line_tokens(2).unwrap().style_at(0), Some(1));
//! assert_eq!(store.line_tokens(3).unwrap().style_at(0), Some(2));
//! ```
//!
//! # Module Description
//!
//! - [`array_edit`] - line splices and ordered composites of them
//! - [`index_transform`] - maps old line indices through composite edits
//! - [`line_states`] - sparse per-line arrays
//! - [`ledger`] - changes the worker has not reported on yet
//! - [`tokens`] - line tokens and the flat token payload
//! - [`state`] - tokenizer end states and their deltas
//! - [`reconcile`] - applies lagging worker results
//! - [`document`] - versioned text document and change events
//! - [`worker`] - the background tokenization thread
//! - [`sink`] - consumers of reconciled tokens
//! - [`controller`] - ties everything together

pub mod array_edit;
pub mod controller;
pub mod document;
pub mod index_transform;
pub mod ledger;
pub mod line_ending;
pub mod line_states;
pub mod reconcile;
pub mod sink;
pub mod state;
pub mod tokens;
pub mod worker;

pub use array_edit::{ArrayEdit, ArrayEditError, CompositeArrayEdit, SpliceTarget};
pub use controller::{ControllerError, TokenizationController};
pub use document::{
    ContentChange, DocumentChange, DocumentError, LanguageChange, OpenDocument, TextDocument,
    TextPosition, TextRange,
};
pub use index_transform::IndexTransformer;
pub use ledger::{ChangeLedger, PendingChange};
pub use line_ending::LineEnding;
pub use line_states::{LineStates, SparseLines};
pub use reconcile::{ReconcileError, ReconcileReport, Reconciler, WorkerResult};
pub use sink::{BackgroundTokenStore, TokenSink};
pub use state::{EndState, ScopeStack, StackDelta, StateDeltaError, StateDeltaRun};
pub use tokens::{
    ContiguousLineTokens, DEFAULT_STYLE_ID, LineTokens, PayloadError, StyleId, Token,
    TokenBatchBuilder, decode_token_blocks, encode_token_blocks,
};
pub use worker::{
    LineTokenization, LineTokenizer, WorkerConfig, WorkerError, WorkerHandle, WorkerRequest,
    WorkerResponse, spawn_worker,
};
