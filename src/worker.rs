//! Queue worker: one claimed item in, one stored result out.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::cancel;
use crate::grader::{Grader, GraderError};
use crate::models::{GradeResult, NewGradeResult, QueueItem, QueuePayload, ResultStatus};
use crate::rubric::map_scores_to_rubric;
use crate::similarity::SimilarityAnalyzer;
use crate::store::{ResultStore, SettingsStore, StoreError, WorkQueue};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

const DEFAULT_MAX_GRADE: f64 = 100.0;
const GENERIC_QUESTION: &str = "Grade the following student submission.";

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Cancelled by user")]
    Cancelled,
}

/// What happened to one claimed item.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Graded(GradeResult),
    /// Transient failure; the item is pending again.
    Retrying { queue_id: u64, attempts: u32, error: String },
    /// Permanent failure, recorded as a `failed` result.
    Failed(GradeResult),
}

/// Counts from a queue drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub graded: usize,
    pub retried: usize,
    pub failed: usize,
}

pub struct GradingWorker {
    grader: Grader,
    similarity: SimilarityAnalyzer,
    settings: Arc<dyn SettingsStore>,
    queue: Arc<dyn WorkQueue>,
    results: Arc<dyn ResultStore>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl GradingWorker {
    pub fn new(
        grader: Grader,
        similarity: SimilarityAnalyzer,
        settings: Arc<dyn SettingsStore>,
        queue: Arc<dyn WorkQueue>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            grader,
            similarity,
            settings,
            queue,
            results,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// How long a retried item waits before it can be claimed again.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Claim and process the oldest pending item, if any.
    pub fn process_next(&self) -> Result<Option<JobOutcome>, WorkerError> {
        match self.queue.claim_next()? {
            Some(item) => self.process_item(&item).map(Some),
            None => Ok(None),
        }
    }

    /// Process claimable items until none are left, `limit` items were
    /// handled, or Ctrl+C was pressed.
    pub fn drain(&self, limit: Option<usize>) -> Result<DrainSummary, WorkerError> {
        let mut summary = DrainSummary::default();

        while limit.map_or(true, |max| summary.graded + summary.retried + summary.failed < max) {
            if cancel::is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
            let Some(item) = self.queue.claim_next()? else {
                break;
            };
            match self.process_item(&item)? {
                JobOutcome::Graded(_) => summary.graded += 1,
                JobOutcome::Failed(_) => summary.failed += 1,
                JobOutcome::Retrying { .. } => summary.retried += 1,
            }
        }
        Ok(summary)
    }

    /// Grade a claimed item and record the outcome. A storage error never
    /// leaves the item in `processing`: it goes back to the queue, or fails
    /// once its attempts are used up.
    pub fn process_item(&self, item: &QueueItem) -> Result<JobOutcome, WorkerError> {
        self.grade_item(item).map_err(|err| {
            if let WorkerError::Store(e) = &err {
                self.release_claim(item, &e.to_string());
            }
            err
        })
    }

    fn release_claim(&self, item: &QueueItem, message: &str) {
        let released = if item.attempts < self.max_attempts {
            warn!(
                "Queue item {} hit a storage error (attempt {}/{}), will retry: {}",
                item.id, item.attempts, self.max_attempts, message
            );
            self.queue.retry(item.id, message, self.retry_delay)
        } else {
            error!("Queue item {} failed: {}", item.id, message);
            if let Err(e) = self.results.insert(NewGradeResult::failed(item, message)) {
                error!("Could not record the failure of queue item {}: {}", item.id, e);
            }
            self.queue.fail(item.id, message)
        };
        if let Err(e) = released {
            error!("Queue item {} is stuck in processing: {}", item.id, e);
        }
    }

    fn grade_item(&self, item: &QueueItem) -> Result<JobOutcome, WorkerError> {
        let payload = &item.payload;
        let settings = self
            .settings
            .settings(payload.module_kind, payload.instance_id)?;

        let question = compose_question(payload);
        let graded = self.grader.grade_text(
            &question,
            &payload.submission_text,
            payload.rubric_json.as_deref(),
            payload.quality,
        );

        let grade = match graded {
            Ok(grade) => grade,
            Err(e) => return self.handle_failure(item, e),
        };

        let response = grade.response();
        let mapped = payload
            .rubric_snapshot
            .as_ref()
            .map(|snapshot| map_scores_to_rubric(&response, snapshot));
        let similarity = (!payload.key_text.trim().is_empty())
            .then(|| self.similarity.analyze(&payload.key_text, &payload.submission_text));

        let (grade_value, max_grade) = match &mapped {
            Some(mapped) => (mapped.score, mapped.max_score),
            None => (
                response.score.unwrap_or(0.0),
                response
                    .reported_max_score()
                    .or(payload.max_mark)
                    .unwrap_or(DEFAULT_MAX_GRADE),
            ),
        };

        let status = if settings.auto_release {
            ResultStatus::Released
        } else {
            ResultStatus::Draft
        };

        let record = self.results.insert(NewGradeResult {
            queue_id: item.id,
            user_id: item.user_id,
            course_id: item.course_id,
            cm_id: item.cm_id,
            module_kind: payload.module_kind,
            instance_id: payload.instance_id,
            status,
            grade: Some(grade_value),
            max_grade: Some(max_grade),
            reasoning: response.reasoning.clone(),
            confidence: response.confidence,
            model: Some(grade.provider.clone()),
            warnings: mapped
                .as_ref()
                .map(|m| m.warning_messages())
                .unwrap_or_default(),
            rubric_hash: payload.rubric_snapshot.as_ref().map(|s| s.hash.clone()),
            rubric_analysis: mapped,
            similarity,
            error: None,
        })?;
        self.queue.complete(item.id)?;

        info!(
            "Graded queue item {} as {}/{} ({})",
            item.id, grade_value, max_grade, record.status
        );
        Ok(JobOutcome::Graded(record))
    }

    fn handle_failure(&self, item: &QueueItem, err: GraderError) -> Result<JobOutcome, WorkerError> {
        let message = err.to_string();

        if err.is_retryable() && item.attempts < self.max_attempts {
            warn!(
                "Queue item {} failed (attempt {}/{}), will retry: {}",
                item.id, item.attempts, self.max_attempts, message
            );
            self.queue.retry(item.id, &message, self.retry_delay)?;
            return Ok(JobOutcome::Retrying {
                queue_id: item.id,
                attempts: item.attempts,
                error: message,
            });
        }

        error!("Queue item {} failed: {}", item.id, message);
        let record = self.results.insert(NewGradeResult::failed(item, &message))?;
        self.queue.fail(item.id, &message)?;
        Ok(JobOutcome::Failed(record))
    }
}

/// Question text sent to the grader, with the reference answer appended.
pub fn compose_question(payload: &QueuePayload) -> String {
    let base = [payload.question.trim(), payload.activity_name.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or(GENERIC_QUESTION);

    let key = payload.key_text.trim();
    if key.is_empty() {
        base.to_string()
    } else {
        format!("{}\n\nReference answer:\n{}", base, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityKind;
    use crate::gateway::test_support::MockGateway;
    use crate::gateway::{GatewayError, GatewayResponse, Quality};
    use crate::models::{ActivitySettings, NewQueueItem, QueueStatus};
    use crate::rubric::test_support::snapshot;
    use crate::rubric::rubric_to_json;
    use crate::similarity::SimilarityMethod;
    use crate::store::DataDir;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        queue: Arc<dyn WorkQueue>,
        results: Arc<dyn ResultStore>,
        settings: Arc<dyn SettingsStore>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        Fixture {
            queue: Arc::new(data.queue()),
            results: Arc::new(data.results()),
            settings: Arc::new(data.settings()),
            dir,
        }
    }

    fn reply(content: Value) -> Result<GatewayResponse, GatewayError> {
        Ok(GatewayResponse {
            provider: "mock-model".to_string(),
            document: crate::gateway::decode_document(&content),
            content,
        })
    }

    fn worker(f: &Fixture, gateway: MockGateway) -> GradingWorker {
        GradingWorker::new(
            Grader::new(Arc::new(gateway)),
            SimilarityAnalyzer::offline(),
            f.settings.clone(),
            f.queue.clone(),
            f.results.clone(),
        )
    }

    fn payload() -> QueuePayload {
        const LEVELS: &[f64] = &[0.0, 10.0];
        let rubric = snapshot(&[("Clarity", LEVELS), ("Accuracy", LEVELS), ("Depth", LEVELS)]);
        QueuePayload {
            module_kind: ActivityKind::Assign,
            instance_id: 4,
            question: "Explain the role of mitochondria.".to_string(),
            activity_name: "Cells".to_string(),
            submission_text: "Mitochondria produce energy for the cell".to_string(),
            submission_files: Vec::new(),
            key_text: "The mitochondria is the powerhouse of the cell".to_string(),
            submission_id: Some(1),
            attempt_id: None,
            question_id: None,
            slot: None,
            max_mark: None,
            quality: Quality::Balanced,
            rubric_json: rubric_to_json(&rubric),
            rubric_snapshot: Some(rubric),
        }
    }

    fn enqueue(f: &Fixture, payload: QueuePayload) -> u64 {
        f.queue
            .enqueue(NewQueueItem {
                user_id: 5,
                course_id: 6,
                cm_id: 7,
                event_name: "submission_created".to_string(),
                payload,
            })
            .unwrap()
            .id
    }

    #[test]
    fn grades_maps_and_stores_draft() {
        let f = fixture();
        let queue_id = enqueue(&f, payload());
        let gateway = MockGateway::new(vec![reply(json!({
            "score": 0,
            "reasoning": "Partly correct.",
            "confidence": 0.7,
            "criteria": [
                {"name": "Clarity", "score": 8, "feedback": "Clear"},
                {"name": "Accuracy", "score": 9}
            ]
        }))]);

        let outcome = worker(&f, gateway).process_next().unwrap().unwrap();

        let JobOutcome::Graded(result) = outcome else {
            panic!("expected graded outcome");
        };
        assert_eq!(result.status, ResultStatus::Draft);
        assert_eq!(result.grade, Some(17.0));
        assert_eq!(result.max_grade, Some(30.0));
        assert_eq!(result.model.as_deref(), Some("mock-model"));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("Depth"));
        let similarity = result.similarity.as_ref().unwrap();
        assert_eq!(similarity.method, SimilarityMethod::Overlap);
        assert_eq!(similarity.final_percent, 58.67);
        assert_eq!(f.queue.get(queue_id).unwrap().status, QueueStatus::Completed);
    }

    #[test]
    fn auto_release_publishes_immediately() {
        let f = fixture();
        f.settings
            .save_settings(
                ActivityKind::Assign,
                4,
                &ActivitySettings {
                    enabled: true,
                    auto_release: true,
                    ..Default::default()
                },
            )
            .unwrap();
        enqueue(&f, payload());
        let gateway = MockGateway::new(vec![reply(json!({"score": 20, "criteria": []}))]);

        let Some(JobOutcome::Graded(result)) = worker(&f, gateway).process_next().unwrap() else {
            panic!("expected graded outcome");
        };
        assert_eq!(result.status, ResultStatus::Released);
        assert!(result.released_at.is_some());
        assert_eq!(result.grade, Some(20.0));
    }

    #[test]
    fn without_rubric_uses_reported_or_max_mark() {
        let f = fixture();
        let mut payload = payload();
        payload.rubric_snapshot = None;
        payload.rubric_json = None;
        payload.max_mark = Some(5.0);
        enqueue(&f, payload);
        let gateway = MockGateway::new(vec![reply(json!({"score": 4}))]);

        let Some(JobOutcome::Graded(result)) = worker(&f, gateway).process_next().unwrap() else {
            panic!("expected graded outcome");
        };
        assert_eq!(result.grade, Some(4.0));
        assert_eq!(result.max_grade, Some(5.0));
        assert!(result.rubric_analysis.is_none());
        assert!(result.rubric_hash.is_none());
    }

    #[test]
    fn transport_errors_retry_then_fail() {
        let f = fixture();
        let queue_id = enqueue(&f, payload());
        let timeouts = (0..3)
            .map(|_| Err(GatewayError::Transport("timed out".to_string())))
            .collect();
        let worker = worker(&f, MockGateway::new(timeouts))
            .with_max_attempts(2)
            .with_retry_delay(Duration::ZERO);

        assert!(matches!(
            worker.process_next().unwrap(),
            Some(JobOutcome::Retrying { attempts: 1, .. })
        ));
        assert_eq!(f.queue.get(queue_id).unwrap().status, QueueStatus::Pending);

        let Some(JobOutcome::Failed(result)) = worker.process_next().unwrap() else {
            panic!("expected failure on the last attempt");
        };
        assert_eq!(result.status, ResultStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(f.queue.get(queue_id).unwrap().status, QueueStatus::Failed);
        assert!(worker.process_next().unwrap().is_none());
    }

    #[test]
    fn storage_error_after_claim_requeues_item() {
        let f = fixture();
        let queue_id = enqueue(&f, payload());
        let settings_file = f.dir.path().join("settings/assign-4.json");
        std::fs::create_dir_all(settings_file.parent().unwrap()).unwrap();
        std::fs::write(&settings_file, "{ not json").unwrap();
        let gateway = MockGateway::new(vec![reply(json!({"score": 3}))]);
        let worker = worker(&f, gateway).with_retry_delay(Duration::ZERO);

        assert!(matches!(worker.process_next(), Err(WorkerError::Store(_))));
        let item = f.queue.get(queue_id).unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert!(item.last_error.is_some());

        std::fs::remove_file(&settings_file).unwrap();
        let Some(JobOutcome::Graded(result)) = worker.process_next().unwrap() else {
            panic!("expected the requeued item to be graded");
        };
        assert_eq!(result.queue_id, queue_id);
        assert_eq!(f.queue.get(queue_id).unwrap().status, QueueStatus::Completed);
    }

    #[test]
    fn storage_error_on_last_attempt_fails_item() {
        let f = fixture();
        let queue_id = enqueue(&f, payload());
        let settings_file = f.dir.path().join("settings/assign-4.json");
        std::fs::create_dir_all(settings_file.parent().unwrap()).unwrap();
        std::fs::write(&settings_file, "{ not json").unwrap();
        let worker = worker(&f, MockGateway::new(Vec::new())).with_max_attempts(1);

        assert!(worker.process_next().is_err());
        assert_eq!(f.queue.get(queue_id).unwrap().status, QueueStatus::Failed);
        let results = f.results.list().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ResultStatus::Failed);
        assert!(worker.process_next().unwrap().is_none());
    }

    #[test]
    fn unusable_grade_fails_without_retry() {
        let f = fixture();
        enqueue(&f, payload());
        let gateway = MockGateway::new(vec![reply(json!("no json here"))]);

        let Some(JobOutcome::Failed(result)) = worker(&f, gateway).process_next().unwrap() else {
            panic!("expected failure");
        };
        assert!(result.grade.is_none());
        assert_eq!(f.queue.stats().unwrap().failed, 1);
    }

    #[test]
    fn drain_defers_retries_to_next_run() {
        let f = fixture();
        enqueue(&f, payload());
        enqueue(&f, payload());
        let gateway = MockGateway::new(vec![
            Err(GatewayError::Transport("refused".to_string())),
            reply(json!({"score": 3})),
        ]);

        let summary = worker(&f, gateway).drain(None).unwrap();

        assert_eq!(
            summary,
            DrainSummary {
                graded: 1,
                retried: 1,
                failed: 0
            }
        );
        let stats = f.queue.stats().unwrap();
        assert_eq!((stats.pending, stats.completed), (1, 1));
    }

    #[test]
    fn question_falls_back_and_appends_reference() {
        let mut payload = payload();
        assert_eq!(
            compose_question(&payload),
            "Explain the role of mitochondria.\n\nReference answer:\nThe mitochondria is the powerhouse of the cell"
        );

        payload.question.clear();
        payload.key_text.clear();
        assert_eq!(compose_question(&payload), "Cells");

        payload.activity_name.clear();
        assert_eq!(compose_question(&payload), GENERIC_QUESTION);
    }
}
