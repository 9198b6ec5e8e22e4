//! Rubric snapshots and score reconciliation.
//!
//! A [`RubricSnapshot`] is the canonical, hashable form of an activity's rubric
//! at grading time. [`prompt::rubric_to_json`] projects it for the model and
//! [`mapping::map_scores_to_rubric`] folds the model's per-criterion scores
//! back onto it.

pub mod mapping;
pub mod prompt;

pub use mapping::{map_scores_to_rubric, MappedCriterion, MappedResult, MappingWarning};
pub use prompt::rubric_to_json;

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::activity::{ActivityKind, RubricStrategy};
use crate::text::{clean_label, normalize_name, strip_tags};

const DEFAULT_CRITERION_NAME: &str = "Criterion";
const DEFAULT_LEVEL_LABEL: &str = "Level";

/// Active grading method of a rubric definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingMethod {
    Rubric,
    RubricRanges,
}

impl std::str::FromStr for GradingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rubric" => Ok(Self::Rubric),
            "rubric_ranges" => Ok(Self::RubricRanges),
            _ => Err(format!("Not a rubric grading method: {}", s)),
        }
    }
}

/// Rubric definition as stored by the host platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RubricDefinition {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: i64,
    /// Active grading method; anything but `rubric`/`rubric_ranges` means the
    /// activity is not rubric-graded.
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub cm_id: Option<i64>,
    #[serde(default)]
    pub criteria: Vec<CriterionDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriterionDefinition {
    pub id: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub levels: Vec<LevelDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelDefinition {
    pub id: i64,
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub score: f64,
}

/// One achievement tier of a criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub id: i64,
    pub label: String,
    pub description: String,
    pub score: f64,
}

/// One rubric row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: i64,
    pub name: String,
    /// Highest level score, never below zero.
    pub max_score: f64,
    pub levels: Vec<Level>,
    /// Lower-cased alphanumeric form of `name`, used for matching.
    pub normalized: String,
}

/// Canonical rubric at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricSnapshot {
    pub module_kind: ActivityKind,
    pub instance_id: i64,
    pub cm_id: Option<i64>,
    pub definition_id: i64,
    pub method: GradingMethod,
    pub name: String,
    pub version: i64,
    /// Criteria in definition order.
    pub criteria: Vec<Criterion>,
    pub max_score: f64,
    /// SHA-1 hex digest over `criteria`.
    pub hash: String,
}

impl RubricSnapshot {
    /// Build a snapshot from a definition.
    ///
    /// Returns `None` when the definition is not rubric-graded or has no
    /// criteria.
    pub fn from_definition(
        kind: ActivityKind,
        instance_id: i64,
        cm_id: Option<i64>,
        definition: &RubricDefinition,
    ) -> Option<Self> {
        let method = definition.method.parse::<GradingMethod>().ok()?;
        if definition.criteria.is_empty() {
            return None;
        }

        let criteria: Vec<Criterion> = definition.criteria.iter().map(build_criterion).collect();
        let max_score = criteria.iter().map(|c| c.max_score).sum();
        let hash = criteria_hash(&criteria);

        Some(Self {
            module_kind: kind,
            instance_id,
            cm_id: definition.cm_id.or(cm_id),
            definition_id: definition.id,
            method,
            name: definition.name.trim().to_string(),
            version: definition.version,
            criteria,
            max_score,
            hash,
        })
    }

    pub fn criterion(&self, id: i64) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.id == id)
    }

    /// Whether `stored_hash` was taken from a different version of this rubric.
    pub fn has_drifted_from(&self, stored_hash: &str) -> bool {
        self.hash != stored_hash
    }
}

fn build_criterion(definition: &CriterionDefinition) -> Criterion {
    let mut name = clean_label(&definition.description);
    if name.is_empty() {
        name = DEFAULT_CRITERION_NAME.to_string();
    }

    let mut max_score = 0.0_f64;
    let levels = definition
        .levels
        .iter()
        .map(|level| {
            max_score = max_score.max(level.score);
            let label = clean_label(&level.definition);
            Level {
                id: level.id,
                label: if label.is_empty() {
                    DEFAULT_LEVEL_LABEL.to_string()
                } else {
                    label
                },
                description: strip_tags(&level.definition).trim().to_string(),
                score: level.score,
            }
        })
        .collect();

    Criterion {
        id: definition.id,
        normalized: normalize_name(&name),
        name,
        max_score,
        levels,
    }
}

/// Deterministic digest of the criteria structure.
pub fn criteria_hash(criteria: &[Criterion]) -> String {
    let encoded = serde_json::to_vec(criteria).unwrap_or_default();
    hex::encode(Sha1::digest(&encoded))
}

/// Errors loading rubric definitions. The analyzer treats all of them as
/// "no rubric".
#[derive(Debug, thiserror::Error)]
pub enum RubricSourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid rubric definition: {0}")]
    Invalid(String),
}

/// Where rubric definitions come from.
pub trait RubricSource: Send + Sync {
    /// The activity's own grading definition, `None` if it has none.
    fn activity_definition(
        &self,
        kind: ActivityKind,
        instance_id: i64,
        cm_id: Option<i64>,
    ) -> Result<Option<RubricDefinition>, RubricSourceError>;

    /// A shared rubric referenced by id.
    fn shared_definition(&self, rubric_id: i64)
        -> Result<Option<RubricDefinition>, RubricSourceError>;
}

/// Resolves rubric snapshots for activities.
pub struct RubricAnalyzer {
    source: Arc<dyn RubricSource>,
}

impl RubricAnalyzer {
    pub fn new(source: Arc<dyn RubricSource>) -> Self {
        Self { source }
    }

    /// Snapshot of the activity's rubric.
    ///
    /// `None` when the activity kind has no grading definition of its own, the
    /// method is not rubric-based, the definition cannot be loaded, or it has
    /// no criteria.
    pub fn get_rubric(
        &self,
        kind: ActivityKind,
        instance_id: i64,
        cm_id: Option<i64>,
    ) -> Option<RubricSnapshot> {
        if kind.profile().rubric != RubricStrategy::GradingDefinition {
            return None;
        }

        match self.source.activity_definition(kind, instance_id, cm_id) {
            Ok(Some(definition)) => {
                RubricSnapshot::from_definition(kind, instance_id, cm_id, &definition)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(
                    "Failed to load rubric for {} {}: {}",
                    kind, instance_id, e
                );
                None
            }
        }
    }

    /// Snapshot of a shared rubric, attributed to the given activity.
    pub fn get_shared_rubric(
        &self,
        rubric_id: i64,
        kind: ActivityKind,
        instance_id: i64,
        cm_id: Option<i64>,
    ) -> Option<RubricSnapshot> {
        match self.source.shared_definition(rubric_id) {
            Ok(Some(definition)) => {
                RubricSnapshot::from_definition(kind, instance_id, cm_id, &definition)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Failed to load shared rubric {}: {}", rubric_id, e);
                None
            }
        }
    }

    /// Rubric for the activity according to its kind: its own grading
    /// definition, or the shared rubric selected in its settings.
    pub fn resolve(
        &self,
        kind: ActivityKind,
        instance_id: i64,
        cm_id: Option<i64>,
        shared_rubric_id: Option<i64>,
    ) -> Option<RubricSnapshot> {
        match kind.profile().rubric {
            RubricStrategy::GradingDefinition => self.get_rubric(kind, instance_id, cm_id),
            RubricStrategy::SharedRubric => shared_rubric_id
                .and_then(|id| self.get_shared_rubric(id, kind, instance_id, cm_id)),
        }
    }

    pub fn has_rubric(&self, kind: ActivityKind, instance_id: i64, cm_id: Option<i64>) -> bool {
        self.get_rubric(kind, instance_id, cm_id).is_some()
    }
}
