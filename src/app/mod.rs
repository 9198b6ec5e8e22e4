mod report;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::activity::ActivityKind;
use crate::cancel;
use crate::cli::{
    Command, ConfigureArgs, GradeArgs, RejectArgs, ReleaseArgs, RubricArgs, ShowArgs,
    SimilarityArgs, SubmitArgs, WorkArgs,
};
use crate::extract::{html_to_text, PlainTextExtractor};
use crate::gateway::{GatewayConfig, GatewayError, GradingGateway};
use crate::grader::{Grader, GraderError};
use crate::models::QueuePayload;
use crate::processor::{ProcessError, SubmissionEvent, SubmissionProcessor};
use crate::review::{ReviewError, ReviewService};
use crate::rubric::{
    map_scores_to_rubric, rubric_to_json, RubricAnalyzer, RubricDefinition, RubricSnapshot,
};
use crate::similarity::SimilarityAnalyzer;
use crate::store::{DataDir, ResultStore, SettingsStore, StoreError, WorkQueue};
use crate::worker::{compose_question, GradingWorker, WorkerError};

pub use report::{GradeReport, ResultCounts};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Grader(#[from] GraderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error("{0}")]
    User(String),
}

/// Wires the file stores, the gateway and the services behind each command.
pub struct App {
    data: DataDir,
    gateway_config: GatewayConfig,
    gateway: Option<Arc<dyn GradingGateway>>,
}

impl App {
    pub fn new(data: DataDir, gateway_config: GatewayConfig) -> Self {
        Self {
            data,
            gateway_config,
            gateway: None,
        }
    }

    /// Use `gateway` instead of an HTTP client built from the config.
    pub fn with_gateway(mut self, gateway: Arc<dyn GradingGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn run(&self, command: Command) -> Result<(), AppError> {
        match command {
            Command::Similarity(args) => self.handle_similarity(args),
            Command::Grade(args) => self.handle_grade(args),
            Command::Rubric(args) => self.handle_rubric(args),
            Command::Submit(args) => self.handle_submit(args),
            Command::Work(args) => self.handle_work(args),
            Command::Release(args) => self.handle_release(args),
            Command::Reject(args) => self.handle_reject(args),
            Command::Stats => self.handle_stats(),
            Command::Show(args) => self.handle_show(args),
            Command::Configure(args) => self.handle_configure(args),
        }
    }

    fn gateway(&self) -> Result<Arc<dyn GradingGateway>, AppError> {
        match &self.gateway {
            Some(gateway) => Ok(gateway.clone()),
            None => Ok(self.gateway_config.create_client()?),
        }
    }

    fn rubric_analyzer(&self) -> Arc<RubricAnalyzer> {
        Arc::new(RubricAnalyzer::new(Arc::new(self.data.rubrics())))
    }

    fn settings(&self) -> Arc<dyn SettingsStore> {
        Arc::new(self.data.settings())
    }

    fn handle_similarity(&self, args: SimilarityArgs) -> Result<(), AppError> {
        let key = read_text(&args.key)?;
        let student = read_text(&args.student)?;

        let analyzer = if args.offline {
            SimilarityAnalyzer::offline()
        } else {
            SimilarityAnalyzer::new(self.gateway()?).with_quality(args.quality)
        };
        let analysis = analyzer.analyze(&key, &student);
        println!("{}", report::format_similarity(&analysis, args.format));
        Ok(())
    }

    fn handle_grade(&self, args: GradeArgs) -> Result<(), AppError> {
        let submission = html_to_text(&read_text(&args.submission)?);
        let key_text = match &args.key {
            Some(path) => html_to_text(&read_text(path)?),
            None => String::new(),
        };
        let rubric = match &args.rubric {
            Some(path) => Some(load_rubric(path)?),
            None => None,
        };

        let payload = QueuePayload {
            module_kind: ActivityKind::Assign,
            instance_id: 0,
            question: args.question.unwrap_or_default(),
            activity_name: String::new(),
            submission_text: submission,
            submission_files: Vec::new(),
            key_text,
            submission_id: None,
            attempt_id: None,
            question_id: None,
            slot: None,
            max_mark: None,
            quality: args.quality,
            rubric_json: rubric.as_ref().and_then(rubric_to_json),
            rubric_snapshot: rubric,
        };

        let gateway = self.gateway()?;
        let grader = Grader::new(gateway.clone());
        let grade = grader.grade_text(
            &compose_question(&payload),
            &payload.submission_text,
            payload.rubric_json.as_deref(),
            payload.quality,
        )?;

        let response = grade.response();
        let report = GradeReport {
            rubric: payload
                .rubric_snapshot
                .as_ref()
                .map(|snapshot| map_scores_to_rubric(&response, snapshot)),
            similarity: (!payload.key_text.is_empty()).then(|| {
                SimilarityAnalyzer::new(gateway)
                    .with_quality(payload.quality)
                    .analyze(&payload.key_text, &payload.submission_text)
            }),
            provider: grade.provider,
            response,
        };
        println!("{}", report::format_grade(&report, args.format));
        Ok(())
    }

    fn handle_rubric(&self, args: RubricArgs) -> Result<(), AppError> {
        let shared = match args.shared {
            Some(id) => Some(id),
            None => self.settings().settings(args.kind, args.instance)?.rubric_id,
        };
        let snapshot = self
            .rubric_analyzer()
            .resolve(args.kind, args.instance, args.cm, shared)
            .ok_or_else(|| {
                AppError::User(format!("No rubric found for {} {}", args.kind, args.instance))
            })?;

        let json = rubric_to_json(&snapshot)
            .ok_or_else(|| AppError::User("Rubric has no criteria".to_string()))?;
        info!(
            "Rubric '{}' ({} criteria, max {}, hash {})",
            snapshot.name,
            snapshot.criteria.len(),
            snapshot.max_score,
            snapshot.hash
        );
        println!("{}", json);
        Ok(())
    }

    fn handle_submit(&self, args: SubmitArgs) -> Result<(), AppError> {
        let raw = read_text(&args.event)?;
        let event: SubmissionEvent = serde_json::from_str(&raw).map_err(|e| {
            AppError::User(format!("Invalid submission event {}: {}", args.event.display(), e))
        })?;

        let processor = SubmissionProcessor::new(
            Arc::new(PlainTextExtractor),
            self.rubric_analyzer(),
            self.settings(),
            Arc::new(self.data.queue()),
        );
        let queued = processor.process(&event)?;
        if queued.is_empty() {
            warn!(
                "Nothing queued: AI grading is disabled for {} {} or there was nothing to grade",
                event.kind, event.instance_id
            );
        }
        for item in &queued {
            println!("Queued item {}", item.id);
        }
        Ok(())
    }

    fn handle_work(&self, args: WorkArgs) -> Result<(), AppError> {
        let gateway = self.gateway()?;
        let grader = Grader::new(gateway.clone());
        if !grader.is_ready() {
            return Err(AppError::User(
                "No gateway key configured. Set RUBRIC_GRADER_GATEWAY_KEY or pass --gateway-key."
                    .to_string(),
            ));
        }

        let worker = GradingWorker::new(
            grader,
            SimilarityAnalyzer::new(gateway),
            self.settings(),
            Arc::new(self.data.queue()),
            Arc::new(self.data.results()),
        )
        .with_max_attempts(args.max_attempts)
        .with_retry_delay(Duration::from_secs(args.retry_delay));

        cancel::reset();
        cancel::register_handler();

        match worker.drain(args.limit) {
            Ok(summary) => {
                info!(
                    "Done: {} graded, {} to retry, {} failed",
                    summary.graded, summary.retried, summary.failed
                );
                Ok(())
            }
            Err(WorkerError::Cancelled) => {
                warn!("Cancelled. Unprocessed items stay queued.");
                Err(AppError::User("Cancelled by user".to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn review_service(&self) -> ReviewService {
        ReviewService::new(
            Arc::new(self.data.results()),
            self.rubric_analyzer(),
            self.settings(),
        )
    }

    fn handle_release(&self, args: ReleaseArgs) -> Result<(), AppError> {
        let release = self.review_service().release(args.id)?;
        if release.rubric_drifted {
            warn!("The rubric changed after this result was graded; review the criterion scores.");
        }
        println!("{}", report::format_result_line(&release.result));
        Ok(())
    }

    fn handle_reject(&self, args: RejectArgs) -> Result<(), AppError> {
        let result = self.review_service().reject(args.id, &args.reason)?;
        println!("{}", report::format_result_line(&result));
        Ok(())
    }

    fn handle_stats(&self) -> Result<(), AppError> {
        let queue = self.data.queue().stats()?;
        let results = ResultCounts::tally(&self.data.results().list()?);
        println!("{}", report::format_stats(&queue, &results));
        Ok(())
    }

    fn handle_show(&self, args: ShowArgs) -> Result<(), AppError> {
        let output = match args.id {
            Some(id) => report::format_result(&self.data.results().get(id)?, args.format),
            None => report::format_results(&self.review_service().reviewable()?, args.format),
        };
        println!("{}", output);
        Ok(())
    }

    fn handle_configure(&self, args: ConfigureArgs) -> Result<(), AppError> {
        let store = self.data.settings();
        let mut settings = store.settings(args.kind, args.instance)?;

        settings.enabled = !args.disable;
        if let Some(quality) = args.quality {
            settings.quality = quality;
        }
        if let Some(auto_release) = args.auto_release {
            settings.auto_release = auto_release;
        }
        if let Some(rubric_id) = args.rubric_id {
            settings.rubric_id = Some(rubric_id);
        }
        if let Some(instructions) = args.instructions {
            settings.custom_instructions = instructions;
        }

        store.save_settings(args.kind, args.instance, &settings)?;
        info!(
            "AI grading {} for {} {} (quality {}, auto-release {})",
            if settings.enabled { "enabled" } else { "disabled" },
            args.kind,
            args.instance,
            settings.quality,
            settings.auto_release
        );
        Ok(())
    }
}

fn read_text(path: &Path) -> Result<String, AppError> {
    fs::read_to_string(path)
        .map_err(|e| AppError::User(format!("Failed to read {}: {}", path.display(), e)))
}

/// Snapshot of a rubric definition file, for ad-hoc grading.
fn load_rubric(path: &Path) -> Result<RubricSnapshot, AppError> {
    let definition: RubricDefinition = serde_json::from_str(&read_text(path)?)
        .map_err(|e| AppError::User(format!("Invalid rubric {}: {}", path.display(), e)))?;
    RubricSnapshot::from_definition(ActivityKind::Assign, 0, None, &definition).ok_or_else(|| {
        AppError::User(format!(
            "Rubric {} is not a rubric-based definition with criteria",
            path.display()
        ))
    })
}
