//! Token-aware recursive text splitter.
//!
//! Splits source text into overlapping chunks whose size is measured with
//! [`token_count`](crate::tokens::token_count), the same function used for
//! context budgets. Splitting tries separators in priority order (paragraph,
//! line, sentence, comma, space, CJK punctuation, then single characters)
//! and only descends to a finer separator for pieces that are still too big.
//!
//! # Algorithm
//!
//! 1. Pick the first separator present in the text.
//! 2. Split on it, keeping each separator attached to the piece after it.
//! 3. Pieces under `chunk_size` are greedily merged into chunks; when a chunk
//!    is full it is emitted and pieces are dropped from its front until at
//!    most `chunk_overlap` tokens remain, which seed the next chunk.
//! 4. Pieces at or over `chunk_size` are split recursively with the
//!    remaining separators.
//!
//! Overlap is fixed at 15% of `chunk_size`.
//!
//! ```rust
//! use notebook_rag_core::chunk::split_text;
//!
//! let chunks = split_text("Hello world.\n\nSecond paragraph.", 500);
//! assert_eq!(chunks.len(), 1);
//! assert!(split_text("", 500).is_empty());
//! ```

use std::collections::VecDeque;

use crate::tokens::token_count;

pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Share of `chunk_size` carried over between consecutive chunks.
pub const OVERLAP_PERCENT: usize = 15;

/// Separators in priority order. The trailing `""` means "split into chars".
pub const SEPARATORS: &[&str] = &[
    "\n\n",
    "\n",
    ".",
    ",",
    " ",
    "\u{200b}", // zero-width space
    "\u{ff0c}", // fullwidth comma
    "\u{3001}", // ideographic comma
    "\u{ff0e}", // fullwidth full stop
    "\u{3002}", // ideographic full stop
    "",
];

/// Split `text` into chunks of at most roughly `chunk_size` tokens.
pub fn split_text(text: &str, chunk_size: usize) -> Vec<String> {
    TextSplitter::new(chunk_size).split(text)
}

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    length: fn(&str) -> usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_size * OVERLAP_PERCENT / 100,
            length: token_count,
        }
    }

    /// Replace the length function (tests use plain character counts).
    pub fn with_length_fn(mut self, length: fn(&str) -> usize) -> Self {
        self.length = length;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        self.split_recursive(text, SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if (self.length)(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting));
                fitting.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = (self.length)(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                if total > self.chunk_size {
                    tracing::debug!(
                        total,
                        chunk_size = self.chunk_size,
                        "created a chunk larger than the configured size"
                    );
                }
                if let Some(doc) = join_trimmed(&current) {
                    docs.push(doc);
                }
                // Keep a tail of at most `chunk_overlap` tokens that still
                // leaves room for the incoming piece.
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some((_, first_len)) => total = total.saturating_sub(first_len),
                        None => break,
                    }
                }
            }
            current.push_back((piece, len));
            total += len;
        }

        if let Some(doc) = join_trimmed(&current) {
            docs.push(doc);
        }
        docs
    }
}

fn join_trimmed(parts: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = parts.iter().map(|(p, _)| *p).collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split on `sep`, attaching each separator to the start of the following
/// piece. An empty separator splits into individual characters.
fn split_keeping_separator<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    if sep.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(sep) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> usize {
        s.chars().count()
    }

    fn char_splitter(size: usize) -> TextSplitter {
        TextSplitter::new(size).with_length_fn(chars)
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_text("", 500).is_empty());
    }

    #[test]
    fn small_text_is_a_single_chunk() {
        assert_eq!(split_text("Hello, world!", 500), vec!["Hello, world!"]);
    }

    #[test]
    fn overlap_is_fifteen_percent() {
        assert_eq!(TextSplitter::new(500).chunk_overlap(), 75);
        assert_eq!(TextSplitter::new(40).chunk_overlap(), 6);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let chunks = char_splitter(12).split("para one.\n\npara two.");
        assert_eq!(chunks, vec!["para one.", "para two."]);
    }

    #[test]
    fn separator_stays_with_following_piece() {
        assert_eq!(split_keeping_separator("a.b.c", "."), vec!["a", ".b", ".c"]);
        assert_eq!(split_keeping_separator(".a", "."), vec![".a"]);
        assert_eq!(split_keeping_separator("ab", ""), vec!["a", "b"]);
    }

    #[test]
    fn chunks_respect_size_for_short_words() {
        let text = (1..=60).map(|i| format!("w{:02}", i)).collect::<Vec<_>>().join(" ");
        let chunks = char_splitter(40).split(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(chars(c) <= 40, "chunk too long: {:?}", c);
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = (1..=30).map(|i| format!("w{:02}", i)).collect::<Vec<_>>().join(" ");
        let chunks = char_splitter(40).split(&text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(
                pair[1].starts_with(last_word),
                "{:?} does not continue from {:?}",
                pair[1],
                pair[0]
            );
        }
    }

    #[test]
    fn oversized_word_is_hard_split() {
        let text = "x".repeat(25);
        let chunks = char_splitter(10).split(&text);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| chars(c) <= 10));
    }

    #[test]
    fn cjk_punctuation_is_a_boundary() {
        let text = "第一句话很长很长很长。第二句话也很长很长。第三句话同样很长。";
        let chunks = char_splitter(12).split(text);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| chars(c) <= 12));
    }

    #[test]
    fn every_word_is_covered_with_real_tokenizer() {
        let text = (0..400)
            .map(|i| format!("Sentence number {} talks about topic{}.", i, i % 17))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_text(&text, 50);
        assert!(chunks.len() > 1);
        for word in text.split_whitespace() {
            let word = word.trim_end_matches('.');
            assert!(
                chunks.iter().any(|c| c.contains(word)),
                "word {:?} missing from every chunk",
                word
            );
        }
    }

    #[test]
    fn deterministic() {
        let text = "Alpha beta.\n\nGamma delta, epsilon.\nZeta eta theta.";
        assert_eq!(char_splitter(10).split(text), char_splitter(10).split(text));
    }
}
