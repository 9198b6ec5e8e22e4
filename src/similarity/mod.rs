//! Alignment between a reference answer and a student answer.
//!
//! Semantic scoring through the gateway is tried first; local token overlap is
//! the deterministic fallback and never fails.

pub mod overlap;
pub mod semantic;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::gateway::{GradingGateway, Quality};

/// Default number of terms shown by [`format_term_list`].
pub const DEFAULT_TERM_LIST_LIMIT: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMethod {
    Semantic,
    Overlap,
}

impl std::fmt::Display for SimilarityMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Semantic => write!(f, "semantic"),
            Self::Overlap => write!(f, "overlap"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    pub coverage: f64,
    pub jaccard: f64,
}

/// Concept counts behind a semantic score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarityBreakdown {
    pub full: usize,
    pub partial: usize,
    pub missing: usize,
    pub total: usize,
}

/// Result of comparing a reference text with a student text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityAnalysis {
    pub method: SimilarityMethod,
    pub key_terms_count: usize,
    pub student_terms_count: Option<usize>,
    pub matched_terms_count: usize,
    pub partial_terms_count: Option<usize>,
    pub union_terms_count: Option<usize>,
    pub matched_terms: Vec<String>,
    #[serde(default)]
    pub partial_terms: Vec<String>,
    pub missing_terms: Vec<String>,
    pub coverage_percent: Option<f64>,
    pub jaccard_percent: Option<f64>,
    /// Final score in `[0, 100]`, two decimals.
    pub final_percent: f64,
    #[serde(rename = "similarity_breakdown", default)]
    pub breakdown: Option<SimilarityBreakdown>,
    pub weights: Option<SimilarityWeights>,
    pub reasoning: String,
}

/// Similarity scorer with an optional gateway for semantic mode.
pub struct SimilarityAnalyzer {
    gateway: Option<Arc<dyn GradingGateway>>,
    quality: Quality,
}

impl SimilarityAnalyzer {
    pub fn new(gateway: Arc<dyn GradingGateway>) -> Self {
        Self {
            gateway: Some(gateway),
            quality: Quality::Balanced,
        }
    }

    /// Analyzer that only ever uses overlap mode.
    pub fn offline() -> Self {
        Self {
            gateway: None,
            quality: Quality::Balanced,
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn analyze(&self, key: &str, student: &str) -> SimilarityAnalysis {
        self.gateway
            .as_deref()
            .and_then(|gateway| semantic::analyze_semantic(gateway, key, student, self.quality))
            .unwrap_or_else(|| overlap::analyze_overlap(key, student))
    }
}

/// Prefix each of the first `limit` terms for display.
pub fn format_term_list(terms: &[String], prefix: &str, limit: usize) -> Vec<String> {
    terms
        .iter()
        .take(limit)
        .map(|term| format!("{} {}", prefix, term).trim().to_string())
        .collect()
}
