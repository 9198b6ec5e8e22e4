//! Prompt-facing projection of a rubric snapshot.

use serde::Serialize;

use super::RubricSnapshot;

const DEFAULT_RUBRIC_NAME: &str = "Assignment Rubric";

#[derive(Serialize)]
struct PromptRubric<'a> {
    name: &'a str,
    max_score: f64,
    criteria: Vec<PromptCriterion<'a>>,
}

#[derive(Serialize)]
struct PromptCriterion<'a> {
    name: &'a str,
    max_score: f64,
    levels: Vec<PromptLevel<'a>>,
}

#[derive(Serialize)]
struct PromptLevel<'a> {
    label: &'a str,
    score: f64,
    description: &'a str,
}

/// Pretty-printed JSON with names, maxima and levels only. Ids and the
/// content hash are left out.
pub fn rubric_to_json(snapshot: &RubricSnapshot) -> Option<String> {
    if snapshot.criteria.is_empty() {
        return None;
    }

    let name = if snapshot.name.trim().is_empty() {
        DEFAULT_RUBRIC_NAME
    } else {
        snapshot.name.as_str()
    };

    let export = PromptRubric {
        name,
        max_score: snapshot.max_score,
        criteria: snapshot
            .criteria
            .iter()
            .map(|criterion| PromptCriterion {
                name: &criterion.name,
                max_score: criterion.max_score,
                levels: criterion
                    .levels
                    .iter()
                    .map(|level| PromptLevel {
                        label: &level.label,
                        score: level.score,
                        description: &level.description,
                    })
                    .collect(),
            })
            .collect(),
    };

    serde_json::to_string_pretty(&export).ok()
}
