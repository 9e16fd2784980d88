//! # Text normalization
//!
//! Every piece of text goes through [`normalize`] before it reaches the
//! classifier or the embedding model. The function is pure and total: it never
//! fails and the empty string maps to the empty string.
//!
//! Steps, in order:
//! 1. lower-case;
//! 2. drop every character that is not a letter, a number, `_`, whitespace,
//!    or one of `. , ! ? -` (combining marks such as stress accents go too);
//! 3. collapse whitespace runs to a single space and trim both ends.
//!
//! Lower-casing can emit combining marks (`İ` becomes `i` plus U+0307), so it
//! runs before stripping. Stripping runs before collapsing so that removing a
//! symbol between two spaces cannot leave a double space behind. Both keep
//! `normalize` idempotent.
//!
//! ```rust
//! use tagvault::normalize::normalize;
//!
//! assert_eq!(normalize("  Встреча   с КОЛЛЕГАМИ!!! 🎉 "), "встреча с коллегами!!!");
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}_\s.,!?-]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalize free text for classification and embedding.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = DISALLOWED.replace_all(&lowered, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \t\n "), "");
    }

    #[test]
    fn test_collapses_whitespace_and_lowercases() {
        assert_eq!(normalize("  Hello\t\tWORLD \n again "), "hello world again");
    }

    #[test]
    fn test_keeps_basic_punctuation() {
        assert_eq!(normalize("Wait, what?! Yes - no."), "wait, what?! yes - no.");
    }

    #[test]
    fn test_strips_symbols() {
        assert_eq!(normalize("price: $100 (approx) #deal"), "price 100 approx deal");
        assert_eq!(normalize("оплата счетов 💸"), "оплата счетов");
    }

    #[test]
    fn test_strips_combining_marks() {
        // Stress accent U+0301 after "е".
        assert_eq!(normalize("Встре\u{301}ча с коллегами"), "встреча с коллегами");
        assert_eq!(normalize("İstanbul"), "istanbul");
        assert_eq!(normalize("café"), "café");
    }

    #[test]
    fn test_symbol_between_spaces_leaves_single_space() {
        assert_eq!(normalize("a ☺ b"), "a b");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "",
            "Встреча с коллегами",
            "  ПРЕЗЕНТАЦИЯ   завтра!!! ",
            "a ☺ b @@ c",
            "snake_case and CamelCase",
            "İstanbul trip",
            "Встре\u{301}ча",
            "e\u{301} \u{301} x",
            "tabs\tand\nnewlines\r\n",
            "--- ... ,,, ???",
            "日本語のテキスト、テスト。",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {sample:?}");
        }
    }
}
