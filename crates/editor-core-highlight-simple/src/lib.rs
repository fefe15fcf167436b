//! `editor-core-highlight-simple` - Simple (regex-based) line tokenizers for `editor-core-tokens`.
//!
//! This crate is intended for lightweight formats (JSON/INI/C-like sources) where a full
//! grammar engine is unnecessary. A [`RegexGrammar`] is a list of single-line [`RegexRule`]s
//! plus [`RegionRule`]s that may span lines (block comments, strings). Open regions are
//! carried from line to line in a [`ScopeStack`], which is what the background worker syncs.

use editor_core_tokens::{
    DEFAULT_STYLE_ID, LineTokenization, LineTokenizer, LineTokens, ScopeStack, StyleId, Token,
};
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// A single regex highlighting rule, matched within one line.
#[derive(Debug, Clone)]
pub struct RegexRule {
    regex: Regex,
    style_id: StyleId,
    capture_group: Option<usize>,
}

impl RegexRule {
    pub fn new(pattern: &str, style_id: StyleId) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            style_id,
            capture_group: None,
        })
    }

    /// Highlight only a capture group of each match.
    ///
    /// Example (INI key):
    /// - pattern: `^\\s*([^=\\s]+)\\s*=`
    /// - capture_group: `1` (the key)
    pub fn with_capture_group(mut self, group: usize) -> Self {
        self.capture_group = Some(group);
        self
    }

    pub fn style_id(&self) -> StyleId {
        self.style_id
    }

    /// Byte spans of this rule's matches that lie inside `from..to`.
    fn spans(&self, line: &str, from: usize, to: usize) -> Vec<(usize, usize)> {
        let in_segment = |start: usize, end: usize| start >= from && end <= to && start < end;
        match self.capture_group {
            Some(group) => self
                .regex
                .captures_iter(line)
                .filter_map(|caps| caps.get(group))
                .map(|m| (m.start(), m.end()))
                .filter(|(start, end)| in_segment(*start, *end))
                .collect(),
            None => self
                .regex
                .find_iter(line)
                .map(|m| (m.start(), m.end()))
                .filter(|(start, end)| in_segment(*start, *end))
                .collect(),
        }
    }
}

/// A region between a `begin` and an `end` match, possibly spanning lines.
///
/// `end` is matched against the rest of the line after the current position, so `^` anchors
/// it right after `begin` and `$` closes the region at the end of the line.
#[derive(Debug, Clone)]
pub struct RegionRule {
    begin: Regex,
    end: Regex,
    style_id: StyleId,
}

impl RegionRule {
    pub fn new(begin: &str, end: &str, style_id: StyleId) -> Result<Self, regex::Error> {
        Ok(Self {
            begin: Regex::new(begin)?,
            end: Regex::new(end)?,
            style_id,
        })
    }

    pub fn style_id(&self) -> StyleId {
        self.style_id
    }
}

/// Rules for one language.
///
/// Regions are identified in the [`ScopeStack`] by their position in [`Self::regions`] plus
/// one, so a grammar must not be reordered while states computed with it are alive.
#[derive(Debug, Clone, Default)]
pub struct RegexGrammar {
    rules: Vec<RegexRule>,
    regions: Vec<RegionRule>,
}

impl RegexGrammar {
    pub fn new(rules: Vec<RegexRule>, regions: Vec<RegionRule>) -> Self {
        Self { rules, regions }
    }

    pub fn rules(&self) -> &[RegexRule] {
        &self.rules
    }

    pub fn regions(&self) -> &[RegionRule] {
        &self.regions
    }

    fn region(&self, scope: u32) -> Option<&RegionRule> {
        (scope as usize)
            .checked_sub(1)
            .and_then(|index| self.regions.get(index))
    }

    /// A small default JSON grammar (strings, numbers, booleans, null).
    pub fn json_default(styles: SimpleJsonStyles) -> Result<Self, regex::Error> {
        Ok(Self::new(
            vec![
                // JSON string (single-line, handles escapes)
                RegexRule::new(r#""(?:\\.|[^"\\])*""#, styles.string)?,
                // JSON number
                RegexRule::new(
                    r#"-?(?:0|[1-9]\d*)(?:\.\d+)?(?:[eE][+-]?\d+)?"#,
                    styles.number,
                )?,
                // JSON boolean / null
                RegexRule::new(r#"\b(?:true|false)\b"#, styles.boolean)?,
                RegexRule::new(r#"\bnull\b"#, styles.null)?,
            ],
            Vec::new(),
        ))
    }

    /// A small default INI grammar (section, key, comment).
    pub fn ini_default(styles: SimpleIniStyles) -> Result<Self, regex::Error> {
        Ok(Self::new(
            vec![
                // Section header: [section]
                RegexRule::new(r#"^\s*\[([^\]]+)\]\s*$"#, styles.section)?.with_capture_group(1),
                // Key: key = value
                RegexRule::new(r#"^\s*([^=\s]+)\s*="#, styles.key)?.with_capture_group(1),
                // Comment: ;... or #...
                RegexRule::new(r#"^\s*[;#].*$"#, styles.comment)?,
            ],
            Vec::new(),
        ))
    }

    /// A C-like grammar: keywords, numbers, strings, line and block comments.
    pub fn c_like_default(styles: SimpleCLikeStyles) -> Result<Self, regex::Error> {
        Ok(Self::new(
            vec![
                RegexRule::new(
                    r#"\b(?:if|else|for|while|do|return|break|continue|switch|case|struct|enum|const|static|void|int|char|float|double|fn|let|mut|pub|impl|use|match)\b"#,
                    styles.keyword,
                )?,
                RegexRule::new(r#"\b\d+(?:\.\d+)?\b"#, styles.number)?,
            ],
            vec![
                RegionRule::new(r#"/\*"#, r#"\*/"#, styles.comment)?,
                RegionRule::new(r#"//"#, r#"$"#, styles.comment)?,
                RegionRule::new(r#"""#, r#"^(?:[^"\\]|\\.)*""#, styles.string)?,
            ],
        ))
    }

    /// Tokenize one line starting inside the regions on `state`.
    pub fn tokenize_line(&self, line: &str, state: &ScopeStack) -> LineTokenization<ScopeStack> {
        let mut stack = state.clone();
        let mut tokens = LineTokens::new();
        let mut pos = 0;

        loop {
            if let Some(scope) = stack.top() {
                let Some(region) = self.region(scope) else {
                    // Left over from another grammar.
                    stack.pop();
                    continue;
                };
                tokens.push(Token::new(char_column(line, pos), region.style_id));
                match region.end.find(&line[pos..]) {
                    Some(m) => {
                        pos += m.end();
                        stack.pop();
                    }
                    None => break,
                }
                if pos >= line.len() {
                    break;
                }
            } else {
                let begin = self.next_region(line, pos);
                let segment_end = begin.map_or(line.len(), |(start, _, _)| start);
                self.tokenize_segment(line, pos, segment_end, &mut tokens);
                let Some((start, end, index)) = begin else {
                    break;
                };
                tokens.push(Token::new(char_column(line, start), self.regions[index].style_id));
                stack.push(index as u32 + 1);
                pos = end;
            }
        }

        if tokens.is_empty() {
            tokens.push(Token::new(0, DEFAULT_STYLE_ID));
        }
        LineTokenization {
            tokens,
            end_state: stack,
        }
    }

    /// Earliest non-empty region start at or after `from`: `(start, end, region index)`.
    fn next_region(&self, line: &str, from: usize) -> Option<(usize, usize, usize)> {
        self.regions
            .iter()
            .enumerate()
            .filter_map(|(index, region)| {
                region
                    .begin
                    .find_at(line, from)
                    .filter(|m| !m.is_empty())
                    .map(|m| (m.start(), m.end(), index))
            })
            .min_by_key(|(start, _, index)| (*start, *index))
    }

    /// Single-line rules over `from..to`. Earlier matches win; ties go to the earlier rule.
    fn tokenize_segment(&self, line: &str, from: usize, to: usize, tokens: &mut LineTokens) {
        if from >= to {
            return;
        }
        let mut spans: Vec<(usize, usize, usize)> = self
            .rules
            .iter()
            .enumerate()
            .flat_map(|(index, rule)| {
                rule.spans(line, from, to)
                    .into_iter()
                    .map(move |(start, end)| (start, end, index))
            })
            .collect();
        spans.sort_by_key(|(start, _, index)| (*start, *index));

        tokens.push(Token::new(char_column(line, from), DEFAULT_STYLE_ID));
        let mut covered = from;
        for (start, end, index) in spans {
            if start < covered {
                continue;
            }
            tokens.push(Token::new(char_column(line, start), self.rules[index].style_id));
            if end < line.len() {
                tokens.push(Token::new(char_column(line, end), DEFAULT_STYLE_ID));
            }
            covered = end;
        }
    }
}

/// A [`LineTokenizer`] that picks a [`RegexGrammar`] by language id.
///
/// Unknown languages tokenize as plain text.
#[derive(Debug, Clone, Default)]
pub struct RegexLineTokenizer {
    grammars: HashMap<String, RegexGrammar>,
    language_id: String,
    plain: RegexGrammar,
}

impl RegexLineTokenizer {
    pub fn new(language_id: impl Into<String>) -> Self {
        Self {
            language_id: language_id.into(),
            ..Self::default()
        }
    }

    /// Tokenizer with the JSON (`"json"`), INI (`"ini"`) and C-like (`"c"`) defaults.
    pub fn with_defaults(language_id: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self::new(language_id)
            .with_grammar("json", RegexGrammar::json_default(SimpleJsonStyles::default())?)
            .with_grammar("ini", RegexGrammar::ini_default(SimpleIniStyles::default())?)
            .with_grammar("c", RegexGrammar::c_like_default(SimpleCLikeStyles::default())?))
    }

    pub fn with_grammar(mut self, language_id: impl Into<String>, grammar: RegexGrammar) -> Self {
        self.grammars.insert(language_id.into(), grammar);
        self
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn grammar(&self) -> &RegexGrammar {
        self.grammars.get(&self.language_id).unwrap_or(&self.plain)
    }
}

impl LineTokenizer for RegexLineTokenizer {
    type State = ScopeStack;

    fn initial_state(&self) -> ScopeStack {
        ScopeStack::new()
    }

    fn set_language(&mut self, language_id: &str) {
        if !self.grammars.contains_key(language_id) {
            debug!(language = language_id, "no regex grammar, tokenizing as plain text");
        }
        self.language_id = language_id.to_string();
    }

    fn tokenize_line(&self, line: &str, state: &ScopeStack) -> LineTokenization<ScopeStack> {
        self.grammar().tokenize_line(line, state)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SimpleJsonStyles {
    pub string: StyleId,
    pub number: StyleId,
    pub boolean: StyleId,
    pub null: StyleId,
}

impl Default for SimpleJsonStyles {
    fn default() -> Self {
        Self {
            string: SIMPLE_STYLE_STRING,
            number: SIMPLE_STYLE_NUMBER,
            boolean: SIMPLE_STYLE_BOOLEAN,
            null: SIMPLE_STYLE_NULL,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SimpleIniStyles {
    pub section: StyleId,
    pub key: StyleId,
    pub comment: StyleId,
}

impl Default for SimpleIniStyles {
    fn default() -> Self {
        Self {
            section: SIMPLE_STYLE_SECTION,
            key: SIMPLE_STYLE_KEY,
            comment: SIMPLE_STYLE_COMMENT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SimpleCLikeStyles {
    pub keyword: StyleId,
    pub number: StyleId,
    pub string: StyleId,
    pub comment: StyleId,
}

impl Default for SimpleCLikeStyles {
    fn default() -> Self {
        Self {
            keyword: SIMPLE_STYLE_KEYWORD,
            number: SIMPLE_STYLE_NUMBER,
            string: SIMPLE_STYLE_STRING,
            comment: SIMPLE_STYLE_COMMENT,
        }
    }
}

/// Default `StyleId` constants for `RegexGrammar`-based tokenizers.
///
/// These are only identifiers. UI/theme layer is expected to map them to actual colors.
pub const SIMPLE_STYLE_STRING: StyleId = 0x0200_0001;
pub const SIMPLE_STYLE_NUMBER: StyleId = 0x0200_0002;
pub const SIMPLE_STYLE_BOOLEAN: StyleId = 0x0200_0003;
pub const SIMPLE_STYLE_NULL: StyleId = 0x0200_0004;
pub const SIMPLE_STYLE_SECTION: StyleId = 0x0200_0010;
pub const SIMPLE_STYLE_KEY: StyleId = 0x0200_0011;
pub const SIMPLE_STYLE_COMMENT: StyleId = 0x0200_0012;
pub const SIMPLE_STYLE_KEYWORD: StyleId = 0x0200_0020;

fn char_column(line: &str, byte: usize) -> u32 {
    line.get(..byte).map_or(0, |prefix| prefix.chars().count()) as u32
}
