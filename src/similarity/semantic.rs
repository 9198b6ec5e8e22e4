//! Concept-level similarity scored by the gateway.

use log::debug;
use serde_json::{json, Map, Value};

use super::{SimilarityAnalysis, SimilarityBreakdown, SimilarityMethod};
use crate::gateway::{GradingGateway, Quality};
use crate::text::{round2, value_as_f64, value_as_text};

pub const SEMANTIC_OPERATION: &str = "semantic_similarity";

const DEFAULT_REASONING: &str = "Similarity based on alignment of meaning and reasoning between the key answer and the student response.";

/// Ask the gateway for a concept breakdown. `None` means the gateway was not
/// ready, the call failed, or the reply held no JSON object.
pub fn analyze_semantic(
    gateway: &dyn GradingGateway,
    key: &str,
    student: &str,
    quality: Quality,
) -> Option<SimilarityAnalysis> {
    if !gateway.is_ready() {
        return None;
    }

    let payload = json!({
        "answer_key": key,
        "student_answer": student,
    });
    let response = match gateway.grade(SEMANTIC_OPERATION, payload, quality) {
        Ok(response) => response,
        Err(e) => {
            debug!("Semantic similarity unavailable, using overlap: {}", e);
            return None;
        }
    };

    let Some(document) = response.document else {
        debug!("Semantic similarity reply held no JSON object, using overlap");
        return None;
    };
    Some(analysis_from_document(&document))
}

/// Score a decoded concept breakdown.
pub fn analysis_from_document(document: &Map<String, Value>) -> SimilarityAnalysis {
    let matched = string_list(document.get("matched_concepts"));
    let partial = string_list(
        document
            .get("partially_matched_concepts")
            .filter(|v| !v.is_null())
            .or_else(|| document.get("partial_concepts")),
    );
    let missing = string_list(document.get("missing_concepts"));

    let mut reasoning = document
        .get("reasoning")
        .and_then(value_as_text)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_REASONING.to_string());

    let total = matched.len() + partial.len() + missing.len();
    let key_count = total.max(1);

    let similarity = if total > 0 {
        let points = matched.len() as f64 + 0.5 * partial.len() as f64;
        let similarity = points / total as f64 * 100.0;
        reasoning.push_str(&format!(
            "\nSimilarity: ({} full + {} partial x 0.5) / {} = {:.2}%.",
            matched.len(),
            partial.len(),
            total,
            similarity
        ));
        similarity
    } else {
        document
            .get("similarity_percent")
            .and_then(value_as_f64)
            .unwrap_or(0.0)
    };

    SimilarityAnalysis {
        method: SimilarityMethod::Semantic,
        key_terms_count: key_count,
        student_terms_count: None,
        matched_terms_count: matched.len(),
        partial_terms_count: Some(partial.len()),
        union_terms_count: None,
        coverage_percent: None,
        jaccard_percent: None,
        final_percent: round2(similarity.clamp(0.0, 100.0)),
        breakdown: Some(SimilarityBreakdown {
            full: matched.len(),
            partial: partial.len(),
            missing: missing.len(),
            total: key_count,
        }),
        weights: None,
        matched_terms: matched,
        partial_terms: partial,
        missing_terms: missing,
        reasoning,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(value_as_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
