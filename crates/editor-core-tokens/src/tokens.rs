//! Line tokens and their wire encoding.
//!
//! Tokens travel from the worker as a flat `u32` buffer, in the spirit of LSP semantic token
//! data. The layout is:
//!
//! ```text
//! block := start_line line_count line*
//! line  := token_count (start style)*
//! ```
//!
//! `start` is a char column within the line. Decoding validates every declared length, so a
//! truncated buffer is rejected instead of producing partial blocks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Style identifier attached to a token.
///
/// Only an identifier: the UI/theme layer maps it to colors.
pub type StyleId = u32;

/// Style used for text no rule matched.
pub const DEFAULT_STYLE_ID: StyleId = 0;

/// A token: the style that applies from `start` up to the next token (or the line end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    /// Start column, in chars.
    pub start: u32,
    /// Style of the token.
    pub style: StyleId,
}

impl Token {
    /// Create a new token.
    pub fn new(start: u32, style: StyleId) -> Self {
        Self { start, style }
    }
}

/// The tokens of one line, ordered by start column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineTokens(pub Vec<Token>);

impl LineTokens {
    /// Tokens of an empty or unstyled line.
    pub fn new() -> Self {
        Self::default()
    }

    /// The tokens.
    pub fn tokens(&self) -> &[Token] {
        &self.0
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the line has no tokens.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Style in effect at `column`, if any token covers it.
    pub fn style_at(&self, column: u32) -> Option<StyleId> {
        let idx = self.0.partition_point(|token| token.start <= column);
        idx.checked_sub(1).map(|idx| self.0[idx].style)
    }

    /// Append a token, merging it with the previous one when the style does not change.
    pub fn push(&mut self, token: Token) {
        match self.0.last_mut() {
            Some(last) if last.start == token.start => *last = token,
            Some(last) if last.style == token.style => {}
            _ => self.0.push(token),
        }
    }
}

impl From<Vec<Token>> for LineTokens {
    fn from(tokens: Vec<Token>) -> Self {
        Self(tokens)
    }
}

/// Tokens for a run of consecutive lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContiguousLineTokens {
    /// First line of the block (0-based).
    pub start_line: usize,
    /// Tokens of `start_line`, `start_line + 1`, ...
    pub lines: Vec<LineTokens>,
}

impl ContiguousLineTokens {
    /// Exclusive end line of the block, or `None` if it does not fit in `usize`.
    pub fn end_line(&self) -> Option<usize> {
        self.start_line.checked_add(self.lines.len())
    }

    /// Tokens of `line`, if the block covers it.
    pub fn line(&self, line: usize) -> Option<&LineTokens> {
        line.checked_sub(self.start_line)
            .and_then(|offset| self.lines.get(offset))
    }

    /// Iterate over `(line, tokens)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &LineTokens)> {
        self.lines
            .iter()
            .enumerate()
            .map(|(offset, tokens)| (self.start_line + offset, tokens))
    }

    /// Consume the block into `(line, tokens)` pairs.
    pub fn into_lines(self) -> impl Iterator<Item = (usize, LineTokens)> {
        let start_line = self.start_line;
        self.lines
            .into_iter()
            .enumerate()
            .map(move |(offset, tokens)| (start_line + offset, tokens))
    }
}

/// Collects per-line tokens into [`ContiguousLineTokens`] blocks.
///
/// Lines added in increasing order with no gap extend the current block; anything else starts
/// a new block.
#[derive(Debug, Default)]
pub struct TokenBatchBuilder {
    blocks: Vec<ContiguousLineTokens>,
}

impl TokenBatchBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the tokens of one line.
    pub fn add(&mut self, line: usize, tokens: LineTokens) {
        if let Some(block) = self.blocks.last_mut()
            && block.end_line() == Some(line)
        {
            block.lines.push(tokens);
            return;
        }
        self.blocks.push(ContiguousLineTokens {
            start_line: line,
            lines: vec![tokens],
        });
    }

    /// Returns `true` if no line was added.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The finalized batch.
    pub fn finalize(self) -> Vec<ContiguousLineTokens> {
        self.blocks
    }
}

/// Errors produced while decoding a token payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// The buffer ended before a declared field.
    #[error("token payload truncated: needed {needed} words at offset {offset}, buffer has {len}")]
    Truncated {
        /// Offset of the field being read.
        offset: usize,
        /// Words required from `offset`.
        needed: usize,
        /// Total buffer length.
        len: usize,
    },
    /// A token line or state delta addresses a line the worker could not have seen.
    #[error("payload addresses line {line}, but the worker's document has {line_count} lines")]
    LineOutOfRange {
        /// Offending line.
        line: usize,
        /// Line count of the worker's document version.
        line_count: usize,
    },
}

/// Encode token blocks into the flat wire format.
pub fn encode_token_blocks(blocks: &[ContiguousLineTokens]) -> Vec<u32> {
    let mut out = Vec::new();
    for block in blocks {
        out.push(block.start_line as u32);
        out.push(block.lines.len() as u32);
        for line in &block.lines {
            out.push(line.len() as u32);
            for token in line.tokens() {
                out.push(token.start);
                out.push(token.style);
            }
        }
    }
    out
}

struct WordReader<'a> {
    data: &'a [u32],
    offset: usize,
}

impl<'a> WordReader<'a> {
    fn take(&mut self, needed: usize) -> Result<&'a [u32], PayloadError> {
        let end = self
            .offset
            .checked_add(needed)
            .filter(|end| *end <= self.data.len())
            .ok_or(PayloadError::Truncated {
                offset: self.offset,
                needed,
                len: self.data.len(),
            })?;
        let words = &self.data[self.offset..end];
        self.offset = end;
        Ok(words)
    }

    fn next(&mut self) -> Result<u32, PayloadError> {
        Ok(self.take(1)?[0])
    }

    fn is_done(&self) -> bool {
        self.offset >= self.data.len()
    }
}

/// Decode the flat wire format into token blocks.
pub fn decode_token_blocks(data: &[u32]) -> Result<Vec<ContiguousLineTokens>, PayloadError> {
    let mut reader = WordReader { data, offset: 0 };
    let mut blocks = Vec::new();

    while !reader.is_done() {
        let start_line = reader.next()? as usize;
        let line_count = reader.next()? as usize;
        let mut lines = Vec::with_capacity(line_count.min(data.len()));
        for _ in 0..line_count {
            let token_count = reader.next()? as usize;
            let words = reader.take(token_count.saturating_mul(2))?;
            let tokens = words
                .chunks_exact(2)
                .map(|pair| Token::new(pair[0], pair[1]))
                .collect();
            lines.push(LineTokens(tokens));
        }
        blocks.push(ContiguousLineTokens { start_line, lines });
    }

    Ok(blocks)
}
