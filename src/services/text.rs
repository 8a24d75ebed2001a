// src/services/text.rs

//! Text comparison helpers used by the scoring engine.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{L}\p{N}']+").expect("word pattern is valid")
});

/// Trims the answer and folds case unless the question is case sensitive.
pub fn normalize(input: &str, case_sensitive: bool) -> String {
    let trimmed = input.trim();
    if case_sensitive {
        trimmed.to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// Classic Levenshtein distance over Unicode scalar values.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two rolling rows are enough.
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// `(len(longer) - distance) / len(longer)`, in `[0, 1]`.
/// Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (longer, shorter) = if a.chars().count() >= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };

    let longer_len = longer.chars().count();
    if longer_len == 0 {
        return 1.0;
    }

    let distance = edit_distance(longer, shorter);
    (longer_len - distance) as f64 / longer_len as f64
}

/// Fraction of `keywords` that appear (case-insensitively) as substrings of
/// `response`. Blank keywords are ignored; no keywords scores 0.
pub fn keyword_score(response: &str, keywords: &[String]) -> f64 {
    let haystack = response.to_lowercase();
    let keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();

    if keywords.is_empty() {
        return 0.0;
    }

    let found = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
    found as f64 / keywords.len() as f64
}

/// Lower-cased words of `text` longer than `min_len` characters.
pub fn content_words(text: &str, min_len: usize) -> HashSet<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| w.chars().count() > min_len)
        .collect()
}

/// Fraction of the sample answer's content words that also occur in the
/// response. `None` when the sample has no content words to compare.
pub fn semantic_score(response: &str, sample: &str, min_len: usize) -> Option<f64> {
    let expected = content_words(sample, min_len);
    if expected.is_empty() {
        return None;
    }

    let present: HashSet<String> = WORD
        .find_iter(&response.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect();

    let shared = expected.iter().filter(|w| present.contains(*w)).count();
    Some(shared as f64 / expected.len() as f64)
}

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
