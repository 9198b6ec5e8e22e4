//! Activity kinds the pipeline can grade.

use serde::{Deserialize, Serialize};

/// A gradable activity type. Adding a kind means adding a variant and a
/// profile row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Assign,
    Quiz,
}

/// How submission content is turned into queue items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// One item for the whole submission (online text plus files).
    WholeSubmission,
    /// One item per non-empty essay response.
    PerEssayResponse,
}

/// Where the rubric for an activity comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RubricStrategy {
    /// The activity's own advanced-grading definition.
    GradingDefinition,
    /// A shared rubric referenced by the activity settings' `rubric_id`.
    SharedRubric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityProfile {
    pub extraction: ExtractionStrategy,
    pub rubric: RubricStrategy,
}

impl ActivityKind {
    pub fn all() -> &'static [ActivityKind] {
        &[ActivityKind::Assign, ActivityKind::Quiz]
    }

    pub fn profile(&self) -> ActivityProfile {
        match self {
            Self::Assign => ActivityProfile {
                extraction: ExtractionStrategy::WholeSubmission,
                rubric: RubricStrategy::GradingDefinition,
            },
            Self::Quiz => ActivityProfile {
                extraction: ExtractionStrategy::PerEssayResponse,
                rubric: RubricStrategy::SharedRubric,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Quiz => "quiz",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "assign" | "assignment" => Ok(Self::Assign),
            "quiz" => Ok(Self::Quiz),
            _ => Err(format!("Unknown activity kind: '{}'. Valid options: assign, quiz", s)),
        }
    }
}
