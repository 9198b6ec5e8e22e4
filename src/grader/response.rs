//! Typed view over a decoded grade document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::text::{value_as_f64, value_as_text};

/// One per-criterion entry, in the order the model produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiCriterion {
    pub name: String,
    pub score: Option<f64>,
    pub feedback: String,
}

/// Overall grade as reported by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub score: Option<f64>,
    pub max_score: Option<f64>,
    pub reasoning: String,
    pub confidence: Option<f64>,
    pub criteria: Vec<AiCriterion>,
}

impl AiResponse {
    /// Read the known fields, tolerating numeric strings and missing keys.
    /// Non-object `criteria` entries become unnamed, unscored entries.
    pub fn from_document(document: &Map<String, Value>) -> Self {
        let number = |key: &str| document.get(key).and_then(value_as_f64);

        let criteria = match document.get("criteria") {
            Some(Value::Array(items)) => items.iter().map(criterion_from_value).collect(),
            _ => Vec::new(),
        };

        Self {
            score: number("score"),
            max_score: number("max_score"),
            reasoning: text_field(document, "reasoning"),
            confidence: number("confidence"),
            criteria,
        }
    }

    /// The self-reported total, unless it is missing or zero.
    pub fn reported_score(&self) -> Option<f64> {
        self.score.filter(|s| *s != 0.0)
    }

    /// The self-reported maximum, unless it is missing or zero.
    pub fn reported_max_score(&self) -> Option<f64> {
        self.max_score.filter(|s| *s != 0.0)
    }
}

fn criterion_from_value(value: &Value) -> AiCriterion {
    match value {
        Value::Object(map) => AiCriterion {
            name: text_field(map, "name"),
            score: map.get("score").and_then(value_as_f64),
            feedback: text_field(map, "feedback"),
        },
        _ => AiCriterion::default(),
    }
}

fn text_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(value_as_text)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}
