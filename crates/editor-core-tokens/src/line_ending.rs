//! End-of-line conventions.
//!
//! Documents store text with LF (`'\n'`) line breaks only. The convention found on load is kept
//! so the worker can be told which EOL the document uses.

use serde::{Deserialize, Serialize};

/// The newline sequence a document was loaded with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineEnding {
    /// Unix-style LF (`'\n'`).
    #[default]
    Lf,
    /// Windows-style CRLF (`"\r\n"`).
    Crlf,
}

impl LineEnding {
    /// Detect the line ending of a source text: any CRLF wins, otherwise LF.
    pub fn detect_in_text(text: &str) -> Self {
        if text.contains("\r\n") {
            Self::Crlf
        } else {
            Self::Lf
        }
    }

    /// The newline sequence.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
        }
    }

    /// Convert a text to LF-only line breaks.
    ///
    /// Lone `'\r'` characters are kept as ordinary characters.
    pub fn normalize(text: &str) -> String {
        if text.contains("\r\n") {
            text.replace("\r\n", "\n")
        } else {
            text.to_string()
        }
    }

    /// Number of line breaks in `text`, counting CRLF once.
    pub fn count_breaks(text: &str) -> usize {
        text.bytes().filter(|b| *b == b'\n').count()
    }
}
