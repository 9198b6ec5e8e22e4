//! Network-free similarity from token set statistics.

use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

use super::{SimilarityAnalysis, SimilarityMethod, SimilarityWeights};
use crate::text::{decode_html_entities, round2, strip_tags};

pub const COVERAGE_WEIGHT: f64 = 0.7;
pub const JACCARD_WEIGHT: f64 = 0.3;
pub const MIN_TOKEN_LENGTH: usize = 3;

static STOP_WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();

fn stop_words() -> &'static HashSet<&'static str> {
    STOP_WORDS.get_or_init(|| {
        [
            "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into",
            "is", "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then",
            "there", "these", "they", "this", "to", "was", "will", "with",
        ]
        .iter()
        .copied()
        .collect()
    })
}

/// Decode entities, strip markup, lower-case, and turn every run of
/// characters outside `[a-z0-9]` into a single space.
pub fn normalize(text: &str) -> String {
    let plain = strip_tags(&decode_html_entities(text)).to_ascii_lowercase();
    let spaced: String = plain
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sorted set of content terms: at least three characters, not a stop word.
/// Text made only of stop words keeps them, so it still matches itself.
pub fn term_set(text: &str) -> BTreeSet<String> {
    let stop_words = stop_words();
    let terms: BTreeSet<String> = normalize(text)
        .split(' ')
        .filter(|t| t.len() >= MIN_TOKEN_LENGTH)
        .map(str::to_string)
        .collect();

    let content: BTreeSet<String> = terms
        .iter()
        .filter(|t| !stop_words.contains(t.as_str()))
        .cloned()
        .collect();
    if content.is_empty() {
        terms
    } else {
        content
    }
}

/// Weighted blend of key-term coverage and Jaccard overlap.
pub fn analyze_overlap(key: &str, student: &str) -> SimilarityAnalysis {
    let key_set = term_set(key);
    let student_set = term_set(student);

    let matched: Vec<String> = key_set.intersection(&student_set).cloned().collect();
    let missing: Vec<String> = key_set.difference(&student_set).cloned().collect();

    let key_count = key_set.len();
    let student_count = student_set.len();
    let match_count = matched.len();
    let union_count = key_count + student_count - match_count;

    let coverage = percent(match_count, key_count);
    let jaccard = percent(match_count, union_count);
    let final_percent = round2(coverage * COVERAGE_WEIGHT + jaccard * JACCARD_WEIGHT);

    let coverage = round2(coverage);
    let jaccard = round2(jaccard);

    let reasoning = [
        format!(
            "Key terms matched: {} of {} ({:.2}%).",
            match_count, key_count, coverage
        ),
        format!(
            "Overall term overlap (Jaccard): {:.2}% (matched {} of {} unique terms).",
            jaccard, match_count, union_count
        ),
        format!(
            "Final similarity = ({}% x {:.2}%) + ({}% x {:.2}%) = {:.2}%.",
            (COVERAGE_WEIGHT * 100.0).round() as i64,
            coverage,
            (JACCARD_WEIGHT * 100.0).round() as i64,
            jaccard,
            final_percent
        ),
        format!(
            "Short words under {} characters and common stop words are ignored.",
            MIN_TOKEN_LENGTH
        ),
    ]
    .join("\n");

    SimilarityAnalysis {
        method: SimilarityMethod::Overlap,
        key_terms_count: key_count,
        student_terms_count: Some(student_count),
        matched_terms_count: match_count,
        partial_terms_count: None,
        union_terms_count: Some(union_count),
        matched_terms: matched,
        partial_terms: Vec::new(),
        missing_terms: missing,
        coverage_percent: Some(coverage),
        jaccard_percent: Some(jaccard),
        final_percent,
        breakdown: None,
        weights: Some(SimilarityWeights {
            coverage: COVERAGE_WEIGHT,
            jaccard: JACCARD_WEIGHT,
        }),
        reasoning,
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
