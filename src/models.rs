//! Records that flow between the processor, the queue, the worker and review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityKind;
use crate::gateway::Quality;
use crate::rubric::{MappedResult, RubricSnapshot};
use crate::similarity::SimilarityAnalysis;

/// Per-activity grading settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub custom_instructions: String,
    #[serde(default)]
    pub auto_release: bool,
    #[serde(default)]
    pub rubric_id: Option<i64>,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            quality: Quality::Balanced,
            custom_instructions: String::new(),
            auto_release: false,
            rubric_id: None,
        }
    }
}

/// Everything the worker needs to grade one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePayload {
    pub module_kind: ActivityKind,
    pub instance_id: i64,
    /// Prompt or question text shown to the learner.
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub activity_name: String,
    pub submission_text: String,
    /// File names (with extraction errors) that contributed to the submission.
    #[serde(default)]
    pub submission_files: Vec<String>,
    /// Reference answer or grading instructions.
    #[serde(default)]
    pub key_text: String,
    #[serde(default)]
    pub submission_id: Option<i64>,
    #[serde(default)]
    pub attempt_id: Option<i64>,
    #[serde(default)]
    pub question_id: Option<i64>,
    #[serde(default)]
    pub slot: Option<u32>,
    #[serde(default)]
    pub max_mark: Option<f64>,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub rubric_snapshot: Option<RubricSnapshot>,
    #[serde(default)]
    pub rubric_json: Option<String>,
}

/// A work item before the queue assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    pub user_id: i64,
    pub course_id: i64,
    pub cm_id: i64,
    pub event_name: String,
    pub payload: QueuePayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: u64,
    pub user_id: i64,
    pub course_id: i64,
    pub cm_id: i64,
    pub event_name: String,
    pub payload: QueuePayload,
    pub status: QueueStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Earliest time a retried item may be claimed again.
    #[serde(default)]
    pub available_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.available_at.map_or(true, |at| at <= now)
    }
}

/// Queue counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Pending,
    Draft,
    Released,
    Rejected,
    Failed,
}

impl ResultStatus {
    /// Whether a teacher can still release or reject the result.
    pub fn is_reviewable(&self) -> bool {
        matches!(self, Self::Pending | Self::Draft)
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Draft => write!(f, "draft"),
            Self::Released => write!(f, "released"),
            Self::Rejected => write!(f, "rejected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Persisted outcome of grading one queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub id: u64,
    pub queue_id: u64,
    pub user_id: i64,
    pub course_id: i64,
    pub cm_id: i64,
    pub module_kind: ActivityKind,
    pub instance_id: i64,
    pub status: ResultStatus,
    #[serde(default)]
    pub reviewed: bool,
    pub grade: Option<f64>,
    pub max_grade: Option<f64>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Provider reported by the gateway.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub rubric_analysis: Option<MappedResult>,
    #[serde(default)]
    pub similarity: Option<SimilarityAnalysis>,
    #[serde(default)]
    pub rubric_hash: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
}

/// A grade result before the store assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGradeResult {
    pub queue_id: u64,
    pub user_id: i64,
    pub course_id: i64,
    pub cm_id: i64,
    pub module_kind: ActivityKind,
    pub instance_id: i64,
    pub status: ResultStatus,
    pub grade: Option<f64>,
    pub max_grade: Option<f64>,
    pub reasoning: String,
    pub confidence: Option<f64>,
    pub model: Option<String>,
    pub rubric_analysis: Option<MappedResult>,
    pub similarity: Option<SimilarityAnalysis>,
    pub rubric_hash: Option<String>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl NewGradeResult {
    /// A `failed` record for `item` carrying `error`.
    pub fn failed(item: &QueueItem, error: impl Into<String>) -> Self {
        Self {
            queue_id: item.id,
            user_id: item.user_id,
            course_id: item.course_id,
            cm_id: item.cm_id,
            module_kind: item.payload.module_kind,
            instance_id: item.payload.instance_id,
            status: ResultStatus::Failed,
            grade: None,
            max_grade: None,
            reasoning: String::new(),
            confidence: None,
            model: None,
            rubric_analysis: None,
            similarity: None,
            rubric_hash: None,
            warnings: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn into_result(self, id: u64, now: DateTime<Utc>) -> GradeResult {
        GradeResult {
            id,
            queue_id: self.queue_id,
            user_id: self.user_id,
            course_id: self.course_id,
            cm_id: self.cm_id,
            module_kind: self.module_kind,
            instance_id: self.instance_id,
            released_at: (self.status == ResultStatus::Released).then_some(now),
            status: self.status,
            reviewed: false,
            grade: self.grade,
            max_grade: self.max_grade,
            reasoning: self.reasoning,
            confidence: self.confidence,
            model: self.model,
            rubric_analysis: self.rubric_analysis,
            similarity: self.similarity,
            rubric_hash: self.rubric_hash,
            warnings: self.warnings,
            error: self.error,
            reject_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
