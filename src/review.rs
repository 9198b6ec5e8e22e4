//! Teacher review of draft grades.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use crate::models::{GradeResult, ResultStatus};
use crate::rubric::RubricAnalyzer;
use crate::store::{ResultStore, SettingsStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Result {id} is {status} and can no longer be reviewed")]
    NotReviewable { id: u64, status: ResultStatus },
    #[error("Result {0} failed to grade and cannot be released")]
    FailedResult(u64),
}

/// A released result and whether its rubric changed since grading.
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub result: GradeResult,
    pub rubric_drifted: bool,
}

pub struct ReviewService {
    results: Arc<dyn ResultStore>,
    rubrics: Arc<RubricAnalyzer>,
    settings: Arc<dyn SettingsStore>,
}

impl ReviewService {
    pub fn new(
        results: Arc<dyn ResultStore>,
        rubrics: Arc<RubricAnalyzer>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            results,
            rubrics,
            settings,
        }
    }

    /// Results still waiting for a teacher decision, oldest first.
    pub fn reviewable(&self) -> Result<Vec<GradeResult>, ReviewError> {
        Ok(self
            .results
            .list()?
            .into_iter()
            .filter(|result| result.status.is_reviewable())
            .collect())
    }

    /// Publish a pending or draft grade.
    pub fn release(&self, result_id: u64) -> Result<Release, ReviewError> {
        let mut result = self.results.get(result_id)?;
        if result.status == ResultStatus::Failed {
            return Err(ReviewError::FailedResult(result_id));
        }
        ensure_reviewable(&result)?;

        let rubric_drifted = self.rubric_drifted(&result)?;
        if rubric_drifted {
            warn!(
                "Rubric for {} {} changed since result {} was graded",
                result.module_kind, result.instance_id, result.id
            );
        }

        let now = Utc::now();
        result.status = ResultStatus::Released;
        result.reviewed = true;
        result.released_at = Some(now);
        result.updated_at = now;
        self.results.update(&result)?;

        info!("Released result {} ({:?}/{:?})", result.id, result.grade, result.max_grade);
        Ok(Release {
            result,
            rubric_drifted,
        })
    }

    /// Discard a pending or draft grade. A blank reason is not stored.
    pub fn reject(&self, result_id: u64, reason: &str) -> Result<GradeResult, ReviewError> {
        let mut result = self.results.get(result_id)?;
        ensure_reviewable(&result)?;

        let reason = reason.trim();
        result.status = ResultStatus::Rejected;
        result.reviewed = true;
        result.reject_reason = (!reason.is_empty()).then(|| reason.to_string());
        result.updated_at = Utc::now();
        self.results.update(&result)?;

        info!("Rejected result {}", result.id);
        Ok(result)
    }

    /// A graded rubric counts as drifted when the current snapshot hashes
    /// differently or the rubric is gone.
    fn rubric_drifted(&self, result: &GradeResult) -> Result<bool, ReviewError> {
        let Some(stored_hash) = result.rubric_hash.as_deref() else {
            return Ok(false);
        };
        let settings = self
            .settings
            .settings(result.module_kind, result.instance_id)?;
        let current = self.rubrics.resolve(
            result.module_kind,
            result.instance_id,
            Some(result.cm_id),
            settings.rubric_id,
        );
        Ok(current.map_or(true, |snapshot| snapshot.has_drifted_from(stored_hash)))
    }
}

fn ensure_reviewable(result: &GradeResult) -> Result<(), ReviewError> {
    if result.status.is_reviewable() {
        Ok(())
    } else {
        Err(ReviewError::NotReviewable {
            id: result.id,
            status: result.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityKind;
    use crate::models::NewGradeResult;
    use crate::rubric::test_support::{definition, MemoryRubricSource};
    use crate::rubric::RubricSnapshot;
    use crate::store::DataDir;
    use tempfile::TempDir;

    const LEVELS: &[f64] = &[0.0, 10.0];

    struct Fixture {
        _dir: TempDir,
        results: Arc<dyn ResultStore>,
        service: ReviewService,
    }

    fn fixture(source: MemoryRubricSource) -> Fixture {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        let results: Arc<dyn ResultStore> = Arc::new(data.results());
        let service = ReviewService::new(
            results.clone(),
            Arc::new(RubricAnalyzer::new(Arc::new(source))),
            Arc::new(data.settings()),
        );
        Fixture {
            _dir: dir,
            results,
            service,
        }
    }

    fn source_with(criteria: &[(&str, &[f64])]) -> MemoryRubricSource {
        let mut source = MemoryRubricSource::default();
        source
            .activity
            .insert((ActivityKind::Assign, 7), definition(criteria));
        source
    }

    fn graded(f: &Fixture, status: ResultStatus, rubric_hash: Option<String>) -> u64 {
        f.results
            .insert(NewGradeResult {
                queue_id: 1,
                user_id: 5,
                course_id: 6,
                cm_id: 70,
                module_kind: ActivityKind::Assign,
                instance_id: 7,
                status,
                grade: Some(8.0),
                max_grade: Some(10.0),
                reasoning: "Solid.".to_string(),
                confidence: None,
                model: Some("mock-model".to_string()),
                rubric_analysis: None,
                similarity: None,
                rubric_hash,
                warnings: Vec::new(),
                error: None,
            })
            .unwrap()
            .id
    }

    fn current_hash(criteria: &[(&str, &[f64])]) -> String {
        RubricSnapshot::from_definition(ActivityKind::Assign, 7, Some(70), &definition(criteria))
            .unwrap()
            .hash
    }

    #[test]
    fn release_publishes_draft_without_drift() {
        let criteria: &[(&str, &[f64])] = &[("Clarity", LEVELS)];
        let f = fixture(source_with(criteria));
        let id = graded(&f, ResultStatus::Draft, Some(current_hash(criteria)));

        let release = f.service.release(id).unwrap();

        assert!(!release.rubric_drifted);
        assert_eq!(release.result.status, ResultStatus::Released);
        assert!(release.result.reviewed);
        assert!(release.result.released_at.is_some());
        assert_eq!(f.results.get(id).unwrap().status, ResultStatus::Released);
    }

    #[test]
    fn release_reports_changed_rubric() {
        let f = fixture(source_with(&[("Clarity", &[0.0, 20.0])]));
        let id = graded(&f, ResultStatus::Pending, Some(current_hash(&[("Clarity", LEVELS)])));

        assert!(f.service.release(id).unwrap().rubric_drifted);
    }

    #[test]
    fn release_reports_removed_rubric() {
        let f = fixture(MemoryRubricSource::default());
        let id = graded(&f, ResultStatus::Draft, Some(current_hash(&[("Clarity", LEVELS)])));

        assert!(f.service.release(id).unwrap().rubric_drifted);
    }

    #[test]
    fn failed_results_cannot_be_released() {
        let f = fixture(MemoryRubricSource::default());
        let id = graded(&f, ResultStatus::Failed, None);

        assert!(matches!(
            f.service.release(id),
            Err(ReviewError::FailedResult(found)) if found == id
        ));
    }

    #[test]
    fn reviewed_results_are_final() {
        let f = fixture(MemoryRubricSource::default());
        let id = graded(&f, ResultStatus::Draft, None);

        let rejected = f.service.reject(id, "  Off topic ").unwrap();
        assert_eq!(rejected.status, ResultStatus::Rejected);
        assert_eq!(rejected.reject_reason.as_deref(), Some("Off topic"));
        assert!(rejected.reviewed);

        assert!(matches!(
            f.service.release(id),
            Err(ReviewError::NotReviewable {
                status: ResultStatus::Rejected,
                ..
            })
        ));
        assert!(f.service.reject(id, "again").is_err());
    }

    #[test]
    fn reviewable_lists_pending_and_draft() {
        let f = fixture(MemoryRubricSource::default());
        graded(&f, ResultStatus::Draft, None);
        graded(&f, ResultStatus::Released, None);
        graded(&f, ResultStatus::Pending, None);
        graded(&f, ResultStatus::Failed, None);

        let statuses: Vec<_> = f
            .service
            .reviewable()
            .unwrap()
            .into_iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(statuses, vec![ResultStatus::Draft, ResultStatus::Pending]);
    }

    #[test]
    fn missing_result_is_a_store_error() {
        let f = fixture(MemoryRubricSource::default());
        assert!(matches!(
            f.service.reject(99, ""),
            Err(ReviewError::Store(StoreError::NotFound(_)))
        ));
    }
}
