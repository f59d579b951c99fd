//! Search representation of a revision.
//!
//! Mirrors what `to_tsvector('english', ...)` does closely enough for the
//! in-memory store: lowercase, split on non-alphanumerics, drop stop words,
//! strip common English suffixes. The Postgres store derives its own vector
//! with a trigger and does not call this.

use std::collections::BTreeSet;

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between",
    "both", "but", "by", "can", "did", "do", "does", "doing", "down", "during", "each",
    "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here",
    "hers", "him", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself",
    "just", "me", "more", "most", "my", "no", "nor", "not", "now", "of", "off", "on",
    "once", "only", "or", "other", "our", "ours", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "then", "there", "these", "they", "this", "those", "through", "to", "too", "under",
    "until", "up", "very", "was", "we", "were", "what", "when", "where", "which", "while",
    "who", "whom", "why", "will", "with", "you", "your", "yours",
];

/// Text the search representation is derived from.
pub fn search_document(blob_key: &str, summary: Option<&str>) -> String {
    match summary {
        Some(summary) => format!("{blob_key} {summary}"),
        None => blob_key.to_string(),
    }
}

/// Sorted, deduplicated stemmed terms of `text`.
pub fn search_terms(text: &str) -> Vec<String> {
    tokens(text).collect::<BTreeSet<_>>().into_iter().collect()
}

/// Score a query against a term list: fraction of query terms present.
pub fn score(terms: &[String], query: &str) -> f32 {
    let wanted: BTreeSet<String> = tokens(query).collect();
    if wanted.is_empty() {
        return 0.0;
    }
    let hits = wanted
        .iter()
        .filter(|w| terms.binary_search(w).is_ok())
        .count();
    hits as f32 / wanted.len() as f32
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .map(|w| stem(&w))
}

/// Light suffix stripping; keeps at least three characters of stem.
fn stem(word: &str) -> String {
    if word.chars().any(|c| c.is_ascii_digit()) {
        return word.to_string();
    }
    for (suffix, replacement) in [
        ("ational", "ate"),
        ("ization", "ize"),
        ("sses", "ss"),
        ("ies", "y"),
        ("xes", "x"),
        ("ches", "ch"),
        ("shes", "sh"),
        ("ing", ""),
        ("edly", ""),
        ("ed", ""),
        ("ly", ""),
        ("s", ""),
    ] {
        if let Some(base) = word.strip_suffix(suffix) {
            if suffix == "s" && (base.ends_with('s') || base.ends_with('u')) {
                continue;
            }
            let stemmed = format!("{base}{replacement}");
            if stemmed.chars().count() >= 3 {
                return stemmed;
            }
        }
    }
    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terms_drop_stop_words_and_stem() {
        let terms = search_terms("The rates are changing for taxes");
        assert_eq!(terms, vec!["chang", "rate", "tax"]);
    }

    #[test]
    fn test_blob_key_is_tokenized() {
        let doc = search_document("raw/acme/rates-page/20250101T000000.000000Z", Some("Rate increased"));
        let terms = search_terms(&doc);
        assert!(terms.contains(&"raw".to_string()));
        assert!(terms.contains(&"acme".to_string()));
        assert!(terms.contains(&"increas".to_string()));
    }

    #[test]
    fn test_score() {
        let terms = search_terms("sales tax rate increased");
        assert_eq!(score(&terms, "tax rates"), 1.0);
        assert_eq!(score(&terms, "tax penalties"), 0.5);
        assert_eq!(score(&terms, "the"), 0.0);
    }

    #[test]
    fn test_stem_keeps_short_words() {
        assert_eq!(stem("bus"), "bus");
        assert_eq!(stem("class"), "class");
        assert_eq!(stem("2025s"), "2025s");
    }
}
