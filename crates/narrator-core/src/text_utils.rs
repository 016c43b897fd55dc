//! Text indexing helpers for speech alignment.
//!
//! Chapter text arrives with light structural markup left over from chapter
//! detection: heading lines start with `#`, quotes with `>`, list items with
//! `•`, and sidebars are fenced by `---` lines. Speech and highlighting both
//! work on the *plain* form of that text, where markup is gone and every word
//! is separated by exactly one space. Offsets are counted in `char`s so they
//! line up with the chunk-local indices reported by speech backends.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static RE_MARKUP_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:(?:#+|>|•)\s*)+").unwrap());
static RE_SIDEBAR_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*-{3,}\s*$").unwrap());

/// Word sequence of a document plus the char offset of every word inside
/// `plain_text`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextIndex {
    pub plain_text: String,
    pub words: Vec<String>,
    pub offsets: Vec<usize>,
}

impl TextIndex {
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn word(&self, idx: usize) -> Option<&str> {
        self.words.get(idx).map(String::as_str)
    }

    /// Char length of the plain text.
    pub fn char_len(&self) -> usize {
        match (self.offsets.last(), self.words.last()) {
            (Some(offset), Some(word)) => offset + word.chars().count(),
            _ => 0,
        }
    }
}

/// Build the word sequence and offset index for raw document text.
pub fn index_text(text: &str) -> TextIndex {
    let plain_text = strip_markup(text);
    let mut words = Vec::new();
    let mut offsets = Vec::new();
    let mut cursor = 0usize;

    for word in plain_text.split(' ').filter(|word| !word.is_empty()) {
        offsets.push(cursor);
        cursor += word.chars().count() + 1;
        words.push(word.to_string());
    }

    TextIndex {
        plain_text,
        words,
        offsets,
    }
}

/// Remove markup line prefixes and sidebar fences, then collapse all
/// whitespace (blank lines included) to single spaces.
///
/// Applying this to its own output returns the output unchanged.
pub fn strip_markup(text: &str) -> String {
    let normalized: String = text.nfc().collect();
    let mut plain = String::with_capacity(normalized.len());

    for line in normalized.lines() {
        let content = match RE_MARKUP_PREFIX.find(line) {
            Some(prefix) => &line[prefix.end()..],
            None => line,
        };
        if RE_SIDEBAR_FENCE.is_match(content) {
            continue;
        }
        for word in content.split_whitespace() {
            if !plain.is_empty() {
                plain.push(' ');
            }
            plain.push_str(word);
        }
    }

    plain
}

/// Byte position of the `char_idx`-th char in `text`, or `text.len()` when
/// the index runs past the end.
pub fn byte_offset_for_char(text: &str, char_idx: usize) -> usize {
    text.char_indices()
        .nth(char_idx)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}
