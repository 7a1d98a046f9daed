//! Token counting shared by the chunk splitter and the context budget.
//!
//! Uses the `o200k_base` BPE so chunk boundaries and context ceilings line
//! up with what the language model actually bills. If the encoder cannot be
//! loaded, falls back to `words × 1.3`.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn encoder() -> Option<&'static CoreBPE> {
    ENCODER
        .get_or_init(|| match tiktoken_rs::o200k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                tracing::warn!(error = %e, "o200k_base tokenizer unavailable, estimating from word count");
                None
            }
        })
        .as_ref()
}

/// Number of tokens in `text`.
pub fn token_count(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => estimate_tokens(text),
    }
}

/// Word-count estimate used when no tokenizer is available.
pub fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f64 * 1.3) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_has_no_tokens() {
        assert_eq!(token_count(""), 0);
    }

    #[test]
    fn longer_text_costs_more() {
        let short = token_count("hello world");
        let long = token_count("hello world, this sentence carries a few more words");
        assert!(short > 0);
        assert!(long > short);
    }

    #[test]
    fn estimate_scales_word_count() {
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
    }
}
