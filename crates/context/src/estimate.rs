//! Length-based token estimation.
//!
//! Deliberately an approximation, not a tokenizer: the estimate only gates an
//! advisory budget, so bounded inaccuracy is accepted in exchange for zero
//! latency and zero cost.

/// Rough average of characters per token for English-ish chat text.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token cost of `text`.
///
/// Deterministic and monotonic in text length; never zero for non-empty text.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_costs_nothing() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn non_empty_text_costs_at_least_one() {
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn monotonic_in_length() {
        let mut text = String::new();
        let mut last = 0;
        for _ in 0..64 {
            text.push_str("word ");
            let est = estimate_tokens(&text);
            assert!(est >= last);
            last = est;
        }
    }

    #[test]
    fn counts_chars_not_bytes() {
        // 4 multi-byte chars should cost the same as 4 ASCII chars.
        assert_eq!(estimate_tokens("日本語だ"), estimate_tokens("abcd"));
    }
}
