//! A versioned text document and the change events it emits.
//!
//! [`TextDocument`] is deliberately small: a [`Rope`] with LF-only line breaks, a version
//! counter, the detected [`LineEnding`] and a language id. Every successful edit bumps the
//! version and returns a [`DocumentChange`], which is both forwarded to the worker (textual
//! form) and recorded in the change ledger (structural form, see
//! [`DocumentChange::line_edits`]).

use crate::array_edit::{ArrayEdit, CompositeArrayEdit};
use crate::ledger::PendingChange;
use crate::line_ending::LineEnding;
use ropey::Rope;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A position in a document: 0-based line and char column.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TextPosition {
    /// Line (0-based).
    pub line: usize,
    /// Column in chars (0-based).
    pub column: usize,
}

impl TextPosition {
    /// Create a new position.
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A half-open range between two positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    /// Start position (inclusive).
    pub start: TextPosition,
    /// End position (exclusive).
    pub end: TextPosition,
}

impl TextRange {
    /// Create a new range.
    pub fn new(start: TextPosition, end: TextPosition) -> Self {
        Self { start, end }
    }

    /// An empty range at `position`.
    pub fn empty(position: TextPosition) -> Self {
        Self::new(position, position)
    }
}

/// Replace the text in `range` with `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChange {
    /// Replaced range, in the document as it is when this change applies.
    pub range: TextRange,
    /// Inserted text (may be empty).
    pub text: String,
}

impl ContentChange {
    /// Replace `range` with `text`.
    pub fn replace(range: TextRange, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }

    /// Insert `text` at `position`.
    pub fn insert(position: TextPosition, text: impl Into<String>) -> Self {
        Self::replace(TextRange::empty(position), text)
    }

    /// Delete `range`.
    pub fn delete(range: TextRange) -> Self {
        Self::replace(range, String::new())
    }

    /// The line splice this change performs.
    ///
    /// Every touched line counts as rewritten: lines `start.line..=end.line` are replaced by
    /// one line per line of the inserted text.
    pub fn line_edit(&self) -> ArrayEdit {
        let touched = self.range.end.line.saturating_sub(self.range.start.line) + 1;
        ArrayEdit::new(
            self.range.start.line,
            touched,
            LineEnding::count_breaks(&self.text) + 1,
        )
    }
}

/// One document change event: the document became `version` after applying `changes` in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChange {
    /// Version produced by this change.
    pub version: u64,
    /// Textual changes, applied sequentially.
    pub changes: Vec<ContentChange>,
}

impl DocumentChange {
    /// Structural form of this change, as line splices.
    ///
    /// Consecutive changes are packed into one [`CompositeArrayEdit`] while they move forward
    /// through the document; a change that goes backwards starts a new composite.
    pub fn line_edits(&self) -> Vec<CompositeArrayEdit> {
        let mut composites = Vec::new();
        let mut current = CompositeArrayEdit::new();
        for change in &self.changes {
            let edit = change.line_edit();
            if current.try_push(edit).is_err() {
                composites.push(std::mem::take(&mut current));
                current = CompositeArrayEdit::single(edit);
            }
        }
        if !current.is_empty() {
            composites.push(current);
        }
        composites
    }

    /// The ledger entry for this change.
    pub fn to_pending(&self) -> PendingChange {
        PendingChange::new(self.version, self.line_edits())
    }
}

/// The document switched language. Carries no structural change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageChange {
    /// New language id.
    pub language_id: String,
}

/// Everything a worker needs to start tracking a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDocument {
    /// Document identifier.
    pub uri: String,
    /// Current version.
    pub version: u64,
    /// Line contents, without line breaks.
    pub lines: Vec<String>,
    /// EOL convention of the document.
    pub eol: LineEnding,
    /// Language id.
    pub language_id: String,
}

/// Errors produced while applying content changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// A position referenced a line past the end of the document.
    #[error("line {line} is out of range (document has {line_count} lines)")]
    LineOutOfRange {
        /// Requested line.
        line: usize,
        /// Document line count.
        line_count: usize,
    },
    /// A position referenced a column past the end of its line.
    #[error("column {column} is out of range for line {line} (length {line_len})")]
    ColumnOutOfRange {
        /// Line of the position.
        line: usize,
        /// Requested column.
        column: usize,
        /// Line length in chars.
        line_len: usize,
    },
    /// A range ends before it starts.
    #[error("range end {end:?} is before its start {start:?}")]
    InvertedRange {
        /// Range start.
        start: TextPosition,
        /// Range end.
        end: TextPosition,
    },
}

/// A versioned, LF-normalized text document.
#[derive(Debug, Clone)]
pub struct TextDocument {
    uri: String,
    rope: Rope,
    version: u64,
    eol: LineEnding,
    language_id: String,
}

impl TextDocument {
    /// Create a document at version 1.
    pub fn new(uri: impl Into<String>, text: &str, language_id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            rope: Rope::from_str(&LineEnding::normalize(text)),
            version: 1,
            eol: LineEnding::detect_in_text(text),
            language_id: language_id.into(),
        }
    }

    /// Rebuild a document from a snapshot.
    pub fn from_snapshot(snapshot: &OpenDocument) -> Self {
        Self {
            uri: snapshot.uri.clone(),
            rope: Rope::from_str(&snapshot.lines.join("\n")),
            version: snapshot.version,
            eol: snapshot.eol,
            language_id: snapshot.language_id.clone(),
        }
    }

    /// Document identifier.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// EOL convention the document was loaded with.
    pub fn eol(&self) -> LineEnding {
        self.eol
    }

    /// Language id.
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    /// Number of lines (N line breaks make N + 1 lines).
    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    /// Length of `line` in chars, without its line break.
    pub fn line_len(&self, line: usize) -> Option<usize> {
        (line < self.line_count()).then(|| line_len(&self.rope, line))
    }

    /// Text of `line`, without its line break.
    pub fn line_text(&self, line: usize) -> Option<String> {
        if line >= self.line_count() {
            return None;
        }
        let mut text = self.rope.line(line).to_string();
        if text.ends_with('\n') {
            text.pop();
        }
        Some(text)
    }

    /// All lines, without line breaks.
    pub fn lines(&self) -> Vec<String> {
        (0..self.line_count())
            .filter_map(|line| self.line_text(line))
            .collect()
    }

    /// Full text with LF line breaks.
    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    /// Switch language.
    pub fn set_language(&mut self, language_id: impl Into<String>) -> LanguageChange {
        self.language_id = language_id.into();
        LanguageChange {
            language_id: self.language_id.clone(),
        }
    }

    /// Snapshot used to register the document with a worker.
    pub fn snapshot(&self) -> OpenDocument {
        OpenDocument {
            uri: self.uri.clone(),
            version: self.version,
            lines: self.lines(),
            eol: self.eol,
            language_id: self.language_id.clone(),
        }
    }

    /// Apply `changes` in order, bump the version and return the change event.
    ///
    /// Either every change applies or the document is left untouched.
    pub fn apply_changes(
        &mut self,
        changes: Vec<ContentChange>,
    ) -> Result<DocumentChange, DocumentError> {
        let changes: Vec<_> = changes
            .into_iter()
            .map(|change| ContentChange {
                text: LineEnding::normalize(&change.text),
                ..change
            })
            .collect();
        self.rope = apply_to_rope(&self.rope, &changes)?;
        self.version += 1;
        Ok(DocumentChange {
            version: self.version,
            changes,
        })
    }

    /// Replace `range` with `text` as a single-change event.
    pub fn edit(
        &mut self,
        range: TextRange,
        text: impl Into<String>,
    ) -> Result<DocumentChange, DocumentError> {
        self.apply_changes(vec![ContentChange::replace(range, text)])
    }

    /// Replay a change event produced by another copy of this document.
    pub fn apply_change(&mut self, change: &DocumentChange) -> Result<(), DocumentError> {
        self.rope = apply_to_rope(&self.rope, &change.changes)?;
        self.version = change.version;
        Ok(())
    }
}

fn line_len(rope: &Rope, line: usize) -> usize {
    let slice = rope.line(line);
    let len = slice.len_chars();
    if len > 0 && slice.char(len - 1) == '\n' {
        len - 1
    } else {
        len
    }
}

fn char_index(rope: &Rope, position: TextPosition) -> Result<usize, DocumentError> {
    let line_count = rope.len_lines();
    if position.line >= line_count {
        return Err(DocumentError::LineOutOfRange {
            line: position.line,
            line_count,
        });
    }
    let len = line_len(rope, position.line);
    if position.column > len {
        return Err(DocumentError::ColumnOutOfRange {
            line: position.line,
            column: position.column,
            line_len: len,
        });
    }
    Ok(rope.line_to_char(position.line) + position.column)
}

fn apply_to_rope(rope: &Rope, changes: &[ContentChange]) -> Result<Rope, DocumentError> {
    let mut rope = rope.clone();
    for change in changes {
        let TextRange { start, end } = change.range;
        if end < start {
            return Err(DocumentError::InvertedRange { start, end });
        }
        let start_char = char_index(&rope, start)?;
        let end_char = char_index(&rope, end)?;
        rope.remove(start_char..end_char);
        rope.insert(start_char, &change.text);
    }
    Ok(rope)
}
