//! Text normalisation and similarity primitives
//!
//! Shared by the utterance matcher and the enumerated slot validator so that
//! both see the same token boundaries.

use similar::TextDiff;
use std::collections::HashSet;

/// Case-fold, strip punctuation and collapse whitespace.
///
/// Apostrophes are dropped rather than split on so "I'd" becomes "id".
/// Characters inside `{...}` placeholders are kept verbatim.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut in_placeholder = false;

    for c in text.chars() {
        if in_placeholder {
            out.push(c);
            if c == '}' {
                in_placeholder = false;
            }
            continue;
        }
        if c == '{' {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            in_placeholder = true;
            out.push(c);
        } else if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else if c != '\'' && c != '\u{2019}' {
            pending_space = true;
        }
    }
    out
}

/// Byte ranges of the words in `text`, split like [`normalize`].
///
/// Apostrophes inside a word stay inside its range.
pub fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for (i, c) in text.char_indices() {
        if c.is_alphanumeric() {
            let end = i + c.len_utf8();
            current = Some(current.map_or((i, end), |(start, _)| (start, end)));
        } else if c != '\'' && c != '\u{2019}' {
            out.extend(current.take());
        }
    }
    out.extend(current);
    out
}

/// Words of `text` with their original casing, split like [`normalize`]
pub fn surface_tokens(text: &str) -> Vec<String> {
    token_spans(text)
        .into_iter()
        .filter_map(|(start, end)| text.get(start..end))
        .map(|word| word.chars().filter(|c| c.is_alphanumeric()).collect())
        .collect()
}

/// Normalised tokens of `text`
pub fn tokens(text: &str) -> Vec<String> {
    surface_tokens(text).iter().map(|t| t.to_lowercase()).collect()
}

/// Token-set Jaccard overlap in `[0, 1]`
#[allow(clippy::cast_precision_loss)]
pub fn jaccard<S: AsRef<str>>(a: &[S], b: &[S]) -> f64 {
    let a: HashSet<&str> = a.iter().map(AsRef::as_ref).collect();
    let b: HashSet<&str> = b.iter().map(AsRef::as_ref).collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

/// Character edit ratio in `[0, 1]` (1.0 means identical)
pub fn edit_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    f64::from(TextDiff::from_chars(a, b).ratio())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Book   a FLIGHT!! "), "book a flight");
        assert_eq!(normalize("I'd like, please..."), "id like please");
        assert_eq!(normalize("from {Origin} to {Destination}"), "from {Origin} to {Destination}");
        assert_eq!(normalize("?!"), "");
    }

    #[test]
    fn test_tokens() {
        assert_eq!(tokens("New-York city"), vec!["new", "york", "city"]);
        assert_eq!(surface_tokens("Flight ABC123, please"), vec!["Flight", "ABC123", "please"]);
        assert_eq!(tokens("O'Hare"), vec!["ohare"]);
        assert!(tokens("   ").is_empty());
        assert_eq!(tokens("rock 'n' roll"), vec!["rock", "n", "roll"]);
    }

    #[test]
    fn test_token_spans_keep_apostrophes() {
        let text = "Jane O'Brien, New-York";
        let words: Vec<&str> = token_spans(text)
            .into_iter()
            .map(|(start, end)| text.get(start..end).unwrap())
            .collect();
        assert_eq!(words, vec!["Jane", "O'Brien", "New", "York"]);
    }

    #[test]
    fn test_jaccard() {
        let a = ["book", "a", "flight"];
        let b = ["book", "flight"];
        assert!((jaccard(&a, &b) - 2.0 / 3.0).abs() < 1e-9);
        assert!((jaccard::<&str>(&[], &[]) - 1.0).abs() < 1e-9);
        assert!(jaccard(&["x"], &["y"]).abs() < 1e-9);
    }

    #[test]
    fn test_edit_ratio() {
        assert!((edit_ratio("kennedy", "kennedy") - 1.0).abs() < 1e-9);
        assert!(edit_ratio("kenedy", "kennedy") > 0.8);
        assert!(edit_ratio("asdkjh", "book a flight") < 0.4);
    }
}
