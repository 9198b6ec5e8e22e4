//! Fold a model's per-criterion scores onto rubric criteria.

use std::collections::HashSet;
use std::fmt;

use log::info;
use serde::{Deserialize, Serialize};

use super::{Criterion, RubricSnapshot};
use crate::grader::{AiCriterion, AiResponse};
use crate::text::{clean_label, normalize_name};

/// One rubric criterion with the score assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedCriterion {
    #[serde(rename = "criterionid")]
    pub criterion_id: i64,
    pub name: String,
    pub score: f64,
    pub max_score: f64,
    pub feedback: String,
}

/// Non-fatal discrepancy found while mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MappingWarning {
    /// The response had no entry for this rubric criterion.
    MissingCriterion { name: String },
    /// The response scored above the criterion maximum.
    ScoreClamped {
        name: String,
        reported: f64,
        max_score: f64,
    },
    /// A response entry matched no rubric criterion.
    UnmatchedCriterion { label: String },
}

impl MappingWarning {
    /// Stable message key for the warning kind.
    pub fn key(&self) -> &'static str {
        match self {
            Self::MissingCriterion { .. } => "error_rubric_missing_criteria",
            Self::ScoreClamped { .. } | Self::UnmatchedCriterion { .. } => "warning_rubric_changed",
        }
    }
}

impl fmt::Display for MappingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCriterion { name } => {
                write!(f, "AI response is missing rubric criterion: {}", name)
            }
            Self::ScoreClamped {
                name,
                reported,
                max_score,
            } => write!(
                f,
                "The rubric may have changed since grading: {} scored {} (max {})",
                name, reported, max_score
            ),
            Self::UnmatchedCriterion { label } => {
                write!(f, "The rubric may have changed since grading: {}", label)
            }
        }
    }
}

/// An AI response reconciled against a rubric snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedResult {
    /// One entry per rubric criterion, in rubric order.
    pub criteria: Vec<MappedCriterion>,
    pub warnings: Vec<MappingWarning>,
    /// Authoritative total: the self-reported score when non-zero, else
    /// `calculated_score`.
    pub score: f64,
    pub max_score: f64,
    /// Sum of mapped per-criterion scores.
    pub calculated_score: f64,
}

impl MappedResult {
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}

/// Map `response` onto `snapshot`. Never fails; mismatches become warnings.
pub fn map_scores_to_rubric(response: &AiResponse, snapshot: &RubricSnapshot) -> MappedResult {
    let mut claimed = HashSet::new();
    let mut warnings = Vec::new();
    let mut criteria = Vec::with_capacity(snapshot.criteria.len());

    for criterion in &snapshot.criteria {
        let (reported, feedback) =
            match find_matching_criterion(criterion, &response.criteria, &claimed) {
                Some(index) => {
                    claimed.insert(index);
                    let entry = &response.criteria[index];
                    (entry.score.unwrap_or(0.0), entry.feedback.trim().to_string())
                }
                None => {
                    warnings.push(MappingWarning::MissingCriterion {
                        name: criterion.name.clone(),
                    });
                    (0.0, String::new())
                }
            };

        let mut score = reported.max(0.0);
        if score > criterion.max_score {
            warnings.push(MappingWarning::ScoreClamped {
                name: criterion.name.clone(),
                reported,
                max_score: criterion.max_score,
            });
            score = criterion.max_score;
        }

        criteria.push(MappedCriterion {
            criterion_id: criterion.id,
            name: criterion.name.clone(),
            score,
            max_score: criterion.max_score,
            feedback,
        });
    }

    for (index, entry) in response.criteria.iter().enumerate() {
        if claimed.contains(&index) {
            continue;
        }
        let label = entry.name.trim();
        warnings.push(MappingWarning::UnmatchedCriterion {
            label: if label.is_empty() {
                format!("criterion #{}", index + 1)
            } else {
                label.to_string()
            },
        });
    }

    let calculated_score: f64 = criteria.iter().map(|c| c.score).sum();

    if !warnings.is_empty() {
        let joined: Vec<String> = warnings.iter().map(ToString::to_string).collect();
        info!("Rubric mapping: {}", joined.join(" | "));
    }

    MappedResult {
        criteria,
        warnings,
        score: response.reported_score().unwrap_or(calculated_score),
        max_score: response.reported_max_score().unwrap_or(snapshot.max_score),
        calculated_score,
    }
}

/// Pick the response entry for `criterion` among unclaimed `candidates`.
///
/// An exact normalized-name match anywhere wins over a fuzzy match, where the
/// candidate's cleaned name appears (case-insensitively) inside the
/// criterion's name. Within each tier the lowest index wins.
pub fn find_matching_criterion(
    criterion: &Criterion,
    candidates: &[AiCriterion],
    claimed: &HashSet<usize>,
) -> Option<usize> {
    let target = if criterion.normalized.is_empty() {
        normalize_name(&criterion.name)
    } else {
        criterion.normalized.clone()
    };

    let open = || {
        candidates
            .iter()
            .enumerate()
            .filter(|(index, _)| !claimed.contains(index))
    };

    let exact = open().find(|(_, candidate)| {
        let name = normalize_name(&candidate.name);
        !name.is_empty() && name == target
    });
    if let Some((index, _)) = exact {
        return Some(index);
    }

    let haystack = criterion.name.to_lowercase();
    open()
        .find(|(_, candidate)| {
            let name = clean_label(&candidate.name).to_lowercase();
            !name.is_empty() && haystack.contains(&name)
        })
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::snapshot;
    use super::*;

    fn entry(name: &str, score: f64) -> AiCriterion {
        AiCriterion {
            name: name.to_string(),
            score: Some(score),
            feedback: String::new(),
        }
    }

    const LEVELS: &[f64] = &[0.0, 5.0, 10.0];

    fn ten_point(names: &[&str]) -> RubricSnapshot {
        let criteria: Vec<(&str, &[f64])> = names.iter().map(|name| (*name, LEVELS)).collect();
        snapshot(&criteria)
    }

    #[test]
    fn missing_criterion_scores_zero_and_total_falls_back() {
        let rubric = ten_point(&["Clarity", "Accuracy", "Depth"]);
        let response = AiResponse {
            score: Some(0.0),
            criteria: vec![entry("Clarity", 8.0), entry("Accuracy", 9.0)],
            ..Default::default()
        };

        let mapped = map_scores_to_rubric(&response, &rubric);

        let scores: Vec<f64> = mapped.criteria.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![8.0, 9.0, 0.0]);
        assert_eq!(
            mapped.warnings,
            vec![MappingWarning::MissingCriterion {
                name: "Depth".to_string()
            }]
        );
        assert_eq!(mapped.calculated_score, 17.0);
        assert_eq!(mapped.score, 17.0);
        assert_eq!(mapped.max_score, 30.0);
    }

    #[test]
    fn over_max_score_is_clamped_with_warning() {
        let rubric = ten_point(&["Clarity"]);
        let response = AiResponse {
            criteria: vec![entry("Clarity", 15.0)],
            ..Default::default()
        };

        let mapped = map_scores_to_rubric(&response, &rubric);

        assert_eq!(mapped.criteria[0].score, 10.0);
        assert_eq!(mapped.calculated_score, 10.0);
        assert!(matches!(
            mapped.warnings[..],
            [MappingWarning::ScoreClamped { reported, .. }] if reported == 15.0
        ));
        assert_eq!(mapped.warnings[0].key(), "warning_rubric_changed");
    }

    #[test]
    fn negative_scores_clamp_to_zero() {
        let rubric = ten_point(&["Clarity"]);
        let response = AiResponse {
            criteria: vec![entry("Clarity", -3.0)],
            ..Default::default()
        };

        let mapped = map_scores_to_rubric(&response, &rubric);
        assert_eq!(mapped.criteria[0].score, 0.0);
        assert!(mapped.warnings.is_empty());
    }

    #[test]
    fn self_reported_total_wins_when_present() {
        let rubric = ten_point(&["Clarity", "Depth"]);
        let response = AiResponse {
            score: Some(12.0),
            max_score: Some(25.0),
            criteria: vec![entry("Depth", 4.0), entry("Clarity", 7.0)],
            ..Default::default()
        };

        let mapped = map_scores_to_rubric(&response, &rubric);

        assert_eq!(mapped.criteria[0].score, 7.0);
        assert_eq!(mapped.criteria[1].score, 4.0);
        assert_eq!(mapped.calculated_score, 11.0);
        assert_eq!(mapped.score, 12.0);
        assert_eq!(mapped.max_score, 25.0);
    }

    #[test]
    fn omitted_score_equals_calculated() {
        let rubric = ten_point(&["Clarity", "Depth"]);
        let response = AiResponse {
            criteria: vec![entry("Clarity", 6.0), entry("Depth", 3.5)],
            ..Default::default()
        };

        let mapped = map_scores_to_rubric(&response, &rubric);
        assert_eq!(mapped.score, mapped.calculated_score);
    }

    #[test]
    fn extra_entries_are_reported_by_name_or_position() {
        let rubric = ten_point(&["Clarity"]);
        let response = AiResponse {
            criteria: vec![entry("Clarity", 5.0), entry("", 2.0), entry("Style", 1.0)],
            ..Default::default()
        };

        let mapped = map_scores_to_rubric(&response, &rubric);

        assert_eq!(
            mapped.warnings,
            vec![
                MappingWarning::UnmatchedCriterion {
                    label: "criterion #2".to_string()
                },
                MappingWarning::UnmatchedCriterion {
                    label: "Style".to_string()
                },
            ]
        );
        assert_eq!(
            mapped.warning_messages()[1],
            "The rubric may have changed since grading: Style"
        );
    }

    #[test]
    fn output_always_matches_rubric_shape() {
        let rubric = ten_point(&["Clarity", "Accuracy", "Depth", "Organisation"]);
        let responses = [
            AiResponse::default(),
            AiResponse {
                criteria: vec![
                    entry("depth", 99.0),
                    entry("ACCURACY!", -1.0),
                    entry("Org", 7.5),
                    entry("Clarity", 10.0),
                    entry("Clarity", 4.0),
                ],
                ..Default::default()
            },
        ];

        for response in &responses {
            let mapped = map_scores_to_rubric(response, &rubric);
            assert_eq!(mapped.criteria.len(), rubric.criteria.len());
            for (mapped, criterion) in mapped.criteria.iter().zip(&rubric.criteria) {
                assert_eq!(mapped.criterion_id, criterion.id);
                assert!(mapped.score >= 0.0 && mapped.score <= criterion.max_score);
            }
        }
    }

    #[test]
    fn exact_match_beats_earlier_fuzzy_match() {
        let rubric = ten_point(&["Depth of analysis"]);
        let candidates = vec![entry("Depth", 3.0), entry("Depth of Analysis", 8.0)];

        let index = find_matching_criterion(&rubric.criteria[0], &candidates, &HashSet::new());
        assert_eq!(index, Some(1));
    }

    #[test]
    fn fuzzy_match_is_case_insensitive_substring() {
        let rubric = ten_point(&["Depth of analysis"]);
        let candidates = vec![entry("Clarity", 3.0), entry("<i>DEPTH</i>", 8.0)];

        assert_eq!(
            find_matching_criterion(&rubric.criteria[0], &candidates, &HashSet::new()),
            Some(1)
        );

        let claimed: HashSet<usize> = [1].into_iter().collect();
        assert_eq!(
            find_matching_criterion(&rubric.criteria[0], &candidates, &claimed),
            None
        );
    }
}
