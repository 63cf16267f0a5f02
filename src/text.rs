//! Text helpers shared by indexing, search, and timeline previews.

use unicode_segmentation::UnicodeSegmentation;

/// Lowercased word tokens for indexing and queries.
///
/// Splits on unicode word boundaries and keeps alphanumeric tokens only, so
/// query punctuation (`+`, `@`, `/`, …) degrades to its surrounding literal
/// terms instead of failing the index.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words()
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .map(str::to_lowercase)
        .collect()
}

/// Truncate `text` to at most `max_graphemes` grapheme clusters.
#[must_use]
pub fn truncate_at_grapheme_boundary(text: &str, max_graphemes: usize) -> String {
    let mut end = text.len();
    for (count, (offset, _)) in text.grapheme_indices(true).enumerate() {
        if count == max_graphemes {
            end = offset;
            break;
        }
    }
    text[..end].to_string()
}

/// Collapse runs of whitespace into single spaces and trim.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_punctuation() {
        let tokens = tokenize("C++/rust, WAL@commit!");
        assert_eq!(tokens, vec!["c", "rust", "wal", "commit"]);
    }

    #[test]
    fn tokenize_lowercases() {
        assert_eq!(tokenize("Deterministic WAL"), vec!["deterministic", "wal"]);
    }

    #[test]
    fn truncation_respects_graphemes() {
        let text = "héllo wörld";
        let cut = truncate_at_grapheme_boundary(text, 5);
        assert_eq!(cut, "héllo");
    }

    #[test]
    fn whitespace_normalization() {
        assert_eq!(normalize_whitespace("  a \n\t b  "), "a b");
    }
}
