//! Free-text grading against an optional rubric.

mod response;

pub use response::{AiCriterion, AiResponse};

use std::sync::Arc;

use log::debug;
use serde_json::{json, Map, Value};

use crate::gateway::{GatewayError, GradingGateway, Quality};

/// Gateway operation used for grading.
pub const GRADE_TEXT_OPERATION: &str = "grade_text";

/// A decoded grade document plus the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TextGrade {
    pub provider: String,
    pub document: Map<String, Value>,
}

impl TextGrade {
    /// Typed view over the document.
    pub fn response(&self) -> AiResponse {
        AiResponse::from_document(&self.document)
    }
}

/// Thin orchestration over the gateway for `grade_text`.
pub struct Grader {
    gateway: Arc<dyn GradingGateway>,
}

impl Grader {
    pub fn new(gateway: Arc<dyn GradingGateway>) -> Self {
        Self { gateway }
    }

    pub fn is_ready(&self) -> bool {
        self.gateway.is_ready()
    }

    /// Grade `student_text` as an answer to `question`.
    ///
    /// Fails with [`GraderError::InvalidAiGrade`] when the gateway content does
    /// not decode to a non-empty JSON object; such output must never be stored
    /// as a grade.
    pub fn grade_text(
        &self,
        question: &str,
        student_text: &str,
        rubric_json: Option<&str>,
        quality: Quality,
    ) -> Result<TextGrade, GraderError> {
        if !self.gateway.is_ready() {
            return Err(GraderError::NotReady);
        }

        let payload = json!({
            "question": question,
            "submission": student_text,
            "rubric_json": rubric_json,
        });
        let response = self.gateway.grade(GRADE_TEXT_OPERATION, payload, quality)?;

        let document = response
            .document
            .filter(|doc| !doc.is_empty())
            .ok_or_else(|| {
                GraderError::InvalidAiGrade("Gateway returned empty/invalid JSON".to_string())
            })?;

        debug!(
            "Graded submission via {} ({} fields)",
            response.provider,
            document.len()
        );

        Ok(TextGrade {
            provider: response.provider,
            document,
        })
    }
}

/// Errors from grading.
#[derive(Debug, thiserror::Error)]
pub enum GraderError {
    #[error("AI grading is unavailable: gateway is not configured")]
    NotReady,

    #[error(transparent)]
    Gateway(GatewayError),

    #[error("AI returned an unusable grade: {0}")]
    InvalidAiGrade(String),
}

impl From<GatewayError> for GraderError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotReady => Self::NotReady,
            other => Self::Gateway(other),
        }
    }
}

impl GraderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway(e) if e.is_retryable())
    }
}
