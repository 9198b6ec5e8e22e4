//! Storage seams for queue items, grade results, settings and rubrics.

mod file;

pub use file::{DataDir, FileResultStore, FileRubricSource, FileSettingsStore, FileWorkQueue};

use std::time::Duration;

use crate::activity::ActivityKind;
use crate::models::{
    ActivitySettings, GradeResult, NewGradeResult, NewQueueItem, QueueItem, QueueStats,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(String),
    #[error("{0} not found")]
    NotFound(String),
}

/// Durable queue of grading work.
pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, item: NewQueueItem) -> Result<QueueItem, StoreError>;

    /// Move the oldest claimable pending item to `processing` and count the
    /// attempt.
    fn claim_next(&self) -> Result<Option<QueueItem>, StoreError>;

    fn complete(&self, id: u64) -> Result<(), StoreError>;

    /// Put a claimed item back to `pending`, recording why it failed. It
    /// becomes claimable again after `delay`.
    fn retry(&self, id: u64, error: &str, delay: Duration) -> Result<(), StoreError>;

    fn fail(&self, id: u64, error: &str) -> Result<(), StoreError>;

    fn get(&self, id: u64) -> Result<QueueItem, StoreError>;

    fn stats(&self) -> Result<QueueStats, StoreError>;
}

/// Persisted grade results.
pub trait ResultStore: Send + Sync {
    fn insert(&self, result: NewGradeResult) -> Result<GradeResult, StoreError>;
    fn get(&self, id: u64) -> Result<GradeResult, StoreError>;
    fn update(&self, result: &GradeResult) -> Result<(), StoreError>;
    fn list(&self) -> Result<Vec<GradeResult>, StoreError>;
}

/// Per-activity settings. Activities without stored settings are disabled.
pub trait SettingsStore: Send + Sync {
    fn settings(&self, kind: ActivityKind, instance_id: i64)
        -> Result<ActivitySettings, StoreError>;

    fn save_settings(
        &self,
        kind: ActivityKind,
        instance_id: i64,
        settings: &ActivitySettings,
    ) -> Result<(), StoreError>;
}
