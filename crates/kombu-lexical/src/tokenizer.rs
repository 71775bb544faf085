//! Tokenization.
//!
//! One rule, versioned by identifier: Unicode-aware lowercasing, then a
//! split on every non-alphanumeric scalar. The identifier is persisted in
//! the index manifest; an index built with a different rule refuses hybrid
//! queries rather than silently scoring against mismatched postings.

/// Identifier of the tokenization rule implemented here.
pub const TOKENIZER_ID: &str = "unicode-lower-v1";

/// Split `text` into lowercase alphanumeric terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_split() {
        assert_eq!(
            tokenize("The cat sits on the mat"),
            vec!["the", "cat", "sits", "on", "the", "mat"]
        );
    }

    #[test]
    fn test_punctuation_and_numbers() {
        assert_eq!(
            tokenize("hello, world! v2.0 (beta)"),
            vec!["hello", "world", "v2", "0", "beta"]
        );
    }

    #[test]
    fn test_unicode_lowercase() {
        assert_eq!(tokenize("Grüße aus Köln"), vec!["grüße", "aus", "köln"]);
    }

    #[test]
    fn test_empty_and_symbols_only() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("!!! --- ...").is_empty());
    }
}
