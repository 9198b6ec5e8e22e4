//! Submission events to queue items.
//!
//! The processor extracts content, resolves the reference text and rubric, and
//! enqueues one item per gradable unit: the whole submission for assignments,
//! each non-empty essay response for quizzes.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::activity::{ActivityKind, ExtractionStrategy};
use crate::extract::{html_to_text, ContentExtractor, ExtractedFile, RawSubmission};
use crate::models::{ActivitySettings, NewQueueItem, QueueItem, QueuePayload};
use crate::rubric::{rubric_to_json, RubricAnalyzer, RubricSnapshot};
use crate::store::{SettingsStore, StoreError, WorkQueue};
use crate::text::strip_tags;

/// A learner submitted work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionEvent {
    pub event_name: String,
    pub user_id: i64,
    pub course_id: i64,
    pub cm_id: i64,
    pub kind: ActivityKind,
    pub instance_id: i64,
    #[serde(default)]
    pub activity_name: String,
    /// Activity description shown to learners (HTML).
    #[serde(default)]
    pub intro: String,
    /// Teacher-only grading instructions (HTML), used as the reference answer.
    #[serde(default)]
    pub grading_instructions: String,
    #[serde(default)]
    pub submission_id: Option<i64>,
    #[serde(default)]
    pub attempt_id: Option<i64>,
    /// Assignment content.
    #[serde(default)]
    pub submission: RawSubmission,
    /// Quiz essay responses.
    #[serde(default)]
    pub responses: Vec<EssayResponse>,
}

/// One essay slot of a quiz attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EssayResponse {
    pub slot: u32,
    pub question_id: i64,
    #[serde(default)]
    pub question_name: String,
    #[serde(default)]
    pub question_text: String,
    #[serde(default)]
    pub grader_info: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub attachments: Vec<PathBuf>,
    #[serde(default)]
    pub max_mark: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct SubmissionProcessor {
    extractor: Arc<dyn ContentExtractor>,
    rubrics: Arc<RubricAnalyzer>,
    settings: Arc<dyn SettingsStore>,
    queue: Arc<dyn WorkQueue>,
}

impl SubmissionProcessor {
    pub fn new(
        extractor: Arc<dyn ContentExtractor>,
        rubrics: Arc<RubricAnalyzer>,
        settings: Arc<dyn SettingsStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            extractor,
            rubrics,
            settings,
            queue,
        }
    }

    /// Enqueue grading work for `event`. Disabled activities enqueue nothing.
    pub fn process(&self, event: &SubmissionEvent) -> Result<Vec<QueueItem>, ProcessError> {
        let settings = self.settings.settings(event.kind, event.instance_id)?;
        if !settings.enabled {
            debug!(
                "AI grading not enabled for {} {}, skipping",
                event.kind, event.instance_id
            );
            return Ok(Vec::new());
        }

        let rubric = self.resolve_rubric(event, &settings);
        let rubric_json = rubric.as_ref().and_then(rubric_to_json);

        let payloads = match event.kind.profile().extraction {
            ExtractionStrategy::WholeSubmission => vec![self.whole_submission(event, &settings)],
            ExtractionStrategy::PerEssayResponse => event
                .responses
                .iter()
                .filter_map(|response| self.essay_response(event, &settings, response))
                .collect(),
        };

        let mut queued = Vec::with_capacity(payloads.len());
        for mut payload in payloads {
            payload.rubric_snapshot = rubric.clone();
            payload.rubric_json = rubric_json.clone();
            queued.push(self.queue.enqueue(NewQueueItem {
                user_id: event.user_id,
                course_id: event.course_id,
                cm_id: event.cm_id,
                event_name: event.event_name.clone(),
                payload,
            })?);
        }

        info!(
            "Queued {} item(s) for {} {} (user {})",
            queued.len(),
            event.kind,
            event.instance_id,
            event.user_id
        );
        Ok(queued)
    }

    fn resolve_rubric(
        &self,
        event: &SubmissionEvent,
        settings: &ActivitySettings,
    ) -> Option<RubricSnapshot> {
        self.rubrics.resolve(
            event.kind,
            event.instance_id,
            Some(event.cm_id),
            settings.rubric_id,
        )
    }

    fn whole_submission(&self, event: &SubmissionEvent, settings: &ActivitySettings) -> QueuePayload {
        let extracted = self.extractor.extract(&event.submission);

        QueuePayload {
            question: html_to_text(&event.intro),
            submission_text: extracted.text,
            submission_files: extracted.files.iter().map(ExtractedFile::summary).collect(),
            key_text: key_text(&event.grading_instructions, settings),
            submission_id: event.submission_id,
            ..base_payload(event, settings)
        }
    }

    fn essay_response(
        &self,
        event: &SubmissionEvent,
        settings: &ActivitySettings,
        response: &EssayResponse,
    ) -> Option<QueuePayload> {
        let mut answer = html_to_text(&response.answer);
        let mut files = Vec::new();

        if answer.is_empty() && !response.attachments.is_empty() {
            let extracted: Vec<ExtractedFile> = response
                .attachments
                .iter()
                .map(|path| self.extractor.extract_file(path))
                .collect();
            let texts: Vec<&str> = extracted
                .iter()
                .filter(|f| !f.text.is_empty())
                .map(|f| f.text.as_str())
                .collect();
            files = extracted.iter().map(ExtractedFile::summary).collect();

            answer = if !texts.is_empty() {
                texts.join("\n\n").trim().to_string()
            } else {
                unreadable_files_note(&files)
            };
        }

        if answer.is_empty() {
            debug!("Skipping empty response in slot {}", response.slot);
            return None;
        }

        let question = html_to_text(&response.question_text);
        Some(QueuePayload {
            question: if question.is_empty() {
                response.question_name.clone()
            } else {
                question
            },
            submission_text: answer,
            submission_files: files,
            key_text: key_text(&response.grader_info, settings),
            attempt_id: event.attempt_id,
            question_id: Some(response.question_id),
            slot: Some(response.slot),
            max_mark: response.max_mark,
            ..base_payload(event, settings)
        })
    }
}

fn base_payload(event: &SubmissionEvent, settings: &ActivitySettings) -> QueuePayload {
    QueuePayload {
        module_kind: event.kind,
        instance_id: event.instance_id,
        question: String::new(),
        activity_name: event.activity_name.clone(),
        submission_text: String::new(),
        submission_files: Vec::new(),
        key_text: String::new(),
        submission_id: None,
        attempt_id: None,
        question_id: None,
        slot: None,
        max_mark: None,
        quality: settings.quality,
        rubric_snapshot: None,
        rubric_json: None,
    }
}

/// Tag-stripped grading instructions, else the activity's custom instructions.
fn key_text(instructions: &str, settings: &ActivitySettings) -> String {
    let key = strip_tags(instructions).trim().to_string();
    if key.is_empty() {
        settings.custom_instructions.trim().to_string()
    } else {
        key
    }
}

fn unreadable_files_note(files: &[String]) -> String {
    if files.is_empty() {
        return String::new();
    }
    format!(
        "Student submitted the following files: {}. The system could not automatically extract full text. Please review them manually.",
        files.join(", ")
    )
}
