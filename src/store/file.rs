//! JSON-file backed stores under a single data directory.
//!
//! Layout:
//! - `queue/<id>.json` - queue items
//! - `results/<id>.json` - grade results
//! - `settings/<kind>-<instance>.json` - activity settings
//! - `rubrics/<kind>-<instance>.json`, `rubrics/shared-<id>.json` - rubric definitions

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{ResultStore, SettingsStore, StoreError, WorkQueue};
use crate::activity::ActivityKind;
use crate::models::{
    ActivitySettings, GradeResult, NewGradeResult, NewQueueItem, QueueItem, QueueStats,
    QueueStatus,
};
use crate::rubric::{RubricDefinition, RubricSource, RubricSourceError};

pub const DEFAULT_DATA_DIR: &str = ".rubric-grader";

/// Root of the on-disk state.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `RUBRIC_GRADER_DATA_DIR`, else `.rubric-grader` in the working directory.
    pub fn from_env() -> Self {
        match env::var("RUBRIC_GRADER_DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => Self::new(dir),
            _ => Self::new(DEFAULT_DATA_DIR),
        }
    }

    /// CLI value takes precedence.
    pub fn with_override(self, dir: Option<PathBuf>) -> Self {
        match dir {
            Some(dir) => Self::new(dir),
            None => self,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn queue(&self) -> FileWorkQueue {
        FileWorkQueue::new(self.root.join("queue"))
    }

    pub fn results(&self) -> FileResultStore {
        FileResultStore::new(self.root.join("results"))
    }

    pub fn settings(&self) -> FileSettingsStore {
        FileSettingsStore::new(self.root.join("settings"))
    }

    pub fn rubrics(&self) -> FileRubricSource {
        FileRubricSource::new(self.root.join("rubrics"))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path)?;
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| StoreError::Json(format!("{}: {}", path.display(), e)))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| StoreError::Json(e.to_string()))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Numeric ids of `<id>.json` files in `dir`, ascending.
fn list_ids(dir: &Path) -> Result<Vec<u64>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

fn locked(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

/// Queue with one JSON file per item.
pub struct FileWorkQueue {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileWorkQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn load(&self, id: u64) -> Result<QueueItem, StoreError> {
        read_json(&self.path(id))?.ok_or_else(|| StoreError::NotFound(format!("Queue item {}", id)))
    }

    fn load_all(&self) -> Result<Vec<QueueItem>, StoreError> {
        list_ids(&self.dir)?
            .into_iter()
            .map(|id| self.load(id))
            .collect()
    }

    fn update<F: FnOnce(&mut QueueItem)>(&self, id: u64, change: F) -> Result<(), StoreError> {
        let _guard = locked(&self.lock);
        let mut item = self.load(id)?;
        change(&mut item);
        item.updated_at = Utc::now();
        write_json(&self.path(id), &item)
    }
}

impl WorkQueue for FileWorkQueue {
    fn enqueue(&self, new: NewQueueItem) -> Result<QueueItem, StoreError> {
        let _guard = locked(&self.lock);
        let id = list_ids(&self.dir)?.last().copied().unwrap_or(0) + 1;
        let now = Utc::now();
        let item = QueueItem {
            id,
            user_id: new.user_id,
            course_id: new.course_id,
            cm_id: new.cm_id,
            event_name: new.event_name,
            payload: new.payload,
            status: QueueStatus::Pending,
            attempts: 0,
            last_error: None,
            available_at: None,
            created_at: now,
            updated_at: now,
        };
        write_json(&self.path(id), &item)?;
        Ok(item)
    }

    fn claim_next(&self) -> Result<Option<QueueItem>, StoreError> {
        let _guard = locked(&self.lock);
        let now = Utc::now();
        let next = self
            .load_all()?
            .into_iter()
            .filter(|item| item.is_claimable(now))
            .min_by_key(|item| (item.created_at, item.id));

        let Some(mut item) = next else {
            return Ok(None);
        };
        item.status = QueueStatus::Processing;
        item.attempts += 1;
        item.available_at = None;
        item.updated_at = now;
        write_json(&self.path(item.id), &item)?;
        Ok(Some(item))
    }

    fn complete(&self, id: u64) -> Result<(), StoreError> {
        self.update(id, |item| item.status = QueueStatus::Completed)
    }

    fn retry(&self, id: u64, error: &str, delay: Duration) -> Result<(), StoreError> {
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.update(id, |item| {
            item.status = QueueStatus::Pending;
            item.last_error = Some(error.to_string());
            item.available_at = Some(Utc::now() + delay);
        })
    }

    fn fail(&self, id: u64, error: &str) -> Result<(), StoreError> {
        self.update(id, |item| {
            item.status = QueueStatus::Failed;
            item.last_error = Some(error.to_string());
        })
    }

    fn get(&self, id: u64) -> Result<QueueItem, StoreError> {
        self.load(id)
    }

    fn stats(&self) -> Result<QueueStats, StoreError> {
        let mut stats = QueueStats::default();
        for item in self.load_all()? {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

/// Results with one JSON file per record.
pub struct FileResultStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl ResultStore for FileResultStore {
    fn insert(&self, result: NewGradeResult) -> Result<GradeResult, StoreError> {
        let _guard = locked(&self.lock);
        let id = list_ids(&self.dir)?.last().copied().unwrap_or(0) + 1;
        let record = result.into_result(id, Utc::now());
        write_json(&self.path(id), &record)?;
        Ok(record)
    }

    fn get(&self, id: u64) -> Result<GradeResult, StoreError> {
        read_json(&self.path(id))?.ok_or_else(|| StoreError::NotFound(format!("Result {}", id)))
    }

    fn update(&self, result: &GradeResult) -> Result<(), StoreError> {
        let _guard = locked(&self.lock);
        if !self.path(result.id).exists() {
            return Err(StoreError::NotFound(format!("Result {}", result.id)));
        }
        write_json(&self.path(result.id), result)
    }

    fn list(&self) -> Result<Vec<GradeResult>, StoreError> {
        list_ids(&self.dir)?
            .into_iter()
            .map(|id| self.get(id))
            .collect()
    }
}

/// Settings files named `<kind>-<instance>.json`.
pub struct FileSettingsStore {
    dir: PathBuf,
}

impl FileSettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, kind: ActivityKind, instance_id: i64) -> PathBuf {
        self.dir.join(format!("{}-{}.json", kind, instance_id))
    }
}

impl SettingsStore for FileSettingsStore {
    fn settings(
        &self,
        kind: ActivityKind,
        instance_id: i64,
    ) -> Result<ActivitySettings, StoreError> {
        Ok(read_json(&self.path(kind, instance_id))?.unwrap_or_default())
    }

    fn save_settings(
        &self,
        kind: ActivityKind,
        instance_id: i64,
        settings: &ActivitySettings,
    ) -> Result<(), StoreError> {
        write_json(&self.path(kind, instance_id), settings)
    }
}

/// Rubric definitions stored as JSON files.
pub struct FileRubricSource {
    dir: PathBuf,
}

impl FileRubricSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn load(&self, file_name: &str) -> Result<Option<RubricDefinition>, RubricSourceError> {
        let path = self.dir.join(file_name);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| RubricSourceError::Invalid(format!("{}: {}", path.display(), e)))
    }
}

impl RubricSource for FileRubricSource {
    fn activity_definition(
        &self,
        kind: ActivityKind,
        instance_id: i64,
        _cm_id: Option<i64>,
    ) -> Result<Option<RubricDefinition>, RubricSourceError> {
        self.load(&format!("{}-{}.json", kind, instance_id))
    }

    fn shared_definition(
        &self,
        rubric_id: i64,
    ) -> Result<Option<RubricDefinition>, RubricSourceError> {
        self.load(&format!("shared-{}.json", rubric_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Quality;
    use crate::models::{QueuePayload, ResultStatus};
    use tempfile::TempDir;

    fn payload(text: &str) -> QueuePayload {
        QueuePayload {
            module_kind: ActivityKind::Assign,
            instance_id: 4,
            question: "Explain".to_string(),
            activity_name: String::new(),
            submission_text: text.to_string(),
            submission_files: Vec::new(),
            key_text: String::new(),
            submission_id: None,
            attempt_id: None,
            question_id: None,
            slot: None,
            max_mark: None,
            quality: Quality::Balanced,
            rubric_snapshot: None,
            rubric_json: None,
        }
    }

    fn new_item(text: &str) -> NewQueueItem {
        NewQueueItem {
            user_id: 1,
            course_id: 2,
            cm_id: 3,
            event_name: "submission_created".to_string(),
            payload: payload(text),
        }
    }

    #[test]
    fn queue_claims_oldest_pending_first() {
        let dir = TempDir::new().unwrap();
        let queue = DataDir::new(dir.path()).queue();

        let first = queue.enqueue(new_item("one")).unwrap();
        let second = queue.enqueue(new_item("two")).unwrap();
        assert_eq!((first.id, second.id), (1, 2));

        let claimed = queue.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, 1);
        assert_eq!(claimed.status, QueueStatus::Processing);
        assert_eq!(claimed.attempts, 1);

        assert_eq!(queue.claim_next().unwrap().unwrap().id, 2);
        assert!(queue.claim_next().unwrap().is_none());
    }

    #[test]
    fn queue_transitions_and_stats() {
        let dir = TempDir::new().unwrap();
        let queue = FileWorkQueue::new(dir.path().join("queue"));
        for text in ["a", "b", "c"] {
            queue.enqueue(new_item(text)).unwrap();
        }

        queue.claim_next().unwrap();
        queue.complete(1).unwrap();
        queue.claim_next().unwrap();
        queue.retry(2, "timeout", Duration::ZERO).unwrap();
        queue.fail(3, "bad grade").unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(
            stats,
            QueueStats {
                pending: 1,
                processing: 0,
                completed: 1,
                failed: 1
            }
        );
        assert_eq!(stats.total(), 3);

        let retried = queue.get(2).unwrap();
        assert_eq!(retried.last_error.as_deref(), Some("timeout"));
        assert_eq!(retried.attempts, 1);
        assert!(matches!(queue.complete(9), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn retried_items_wait_for_their_delay() {
        let dir = TempDir::new().unwrap();
        let queue = FileWorkQueue::new(dir.path().join("queue"));
        queue.enqueue(new_item("a")).unwrap();
        queue.enqueue(new_item("b")).unwrap();

        let first = queue.claim_next().unwrap().unwrap();
        queue
            .retry(first.id, "timeout", Duration::from_secs(3600))
            .unwrap();

        assert_eq!(queue.claim_next().unwrap().unwrap().id, 2);
        assert!(queue.claim_next().unwrap().is_none());
        assert_eq!(queue.stats().unwrap().pending, 1);
    }

    #[test]
    fn results_insert_get_update() {
        let dir = TempDir::new().unwrap();
        let queue = FileWorkQueue::new(dir.path().join("queue"));
        let results = FileResultStore::new(dir.path().join("results"));
        let item = queue.enqueue(new_item("x")).unwrap();

        let mut stored = results
            .insert(NewGradeResult::failed(&item, "boom"))
            .unwrap();
        assert_eq!(stored.id, 1);
        assert_eq!(stored.status, ResultStatus::Failed);
        assert_eq!(stored.released_at, None);

        stored.reviewed = true;
        results.update(&stored).unwrap();
        assert!(results.get(1).unwrap().reviewed);
        assert_eq!(results.list().unwrap().len(), 1);
        assert!(matches!(results.get(2), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn missing_settings_mean_disabled() {
        let dir = TempDir::new().unwrap();
        let store = DataDir::new(dir.path()).settings();

        assert!(!store.settings(ActivityKind::Quiz, 5).unwrap().enabled);

        let settings = ActivitySettings {
            enabled: true,
            quality: Quality::Best,
            rubric_id: Some(9),
            ..Default::default()
        };
        store.save_settings(ActivityKind::Quiz, 5, &settings).unwrap();
        assert_eq!(store.settings(ActivityKind::Quiz, 5).unwrap(), settings);
        assert!(dir.path().join("settings/quiz-5.json").exists());
    }

    #[test]
    fn rubric_files_load_and_report_bad_json() {
        let dir = TempDir::new().unwrap();
        let rubrics = dir.path().join("rubrics");
        fs::create_dir_all(&rubrics).unwrap();
        fs::write(
            rubrics.join("assign-4.json"),
            r#"{"id": 1, "method": "rubric", "criteria": [{"id": 2, "description": "Clarity", "levels": [{"id": 3, "definition": "Clear", "score": 5}]}]}"#,
        )
        .unwrap();
        fs::write(rubrics.join("shared-8.json"), "{not json").unwrap();

        let source = FileRubricSource::new(&rubrics);
        let definition = source
            .activity_definition(ActivityKind::Assign, 4, None)
            .unwrap()
            .unwrap();
        assert_eq!(definition.criteria[0].levels[0].score, 5.0);
        assert!(source
            .activity_definition(ActivityKind::Assign, 5, None)
            .unwrap()
            .is_none());
        assert!(matches!(
            source.shared_definition(8),
            Err(RubricSourceError::Invalid(_))
        ));
    }
}
