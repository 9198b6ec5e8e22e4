use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::activity::ActivityKind;
use crate::gateway::Quality;
use crate::worker::DEFAULT_MAX_ATTEMPTS;

/// Command line interface definition for rubric-grader.
#[derive(Parser, Debug)]
#[command(name = "rubric-grader")]
#[command(about = "Grade learner submissions through an AI gateway and reconcile them with rubrics")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory holding the queue, results, settings and rubrics
    /// (default: $RUBRIC_GRADER_DATA_DIR or .rubric-grader)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(flatten)]
    pub gateway: GatewayArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Gateway overrides. Environment values are used when omitted.
#[derive(Args, Debug, Clone, Default)]
pub struct GatewayArgs {
    /// Gateway key (overrides RUBRIC_GRADER_GATEWAY_KEY)
    #[arg(long, global = true)]
    pub gateway_key: Option<String>,

    /// Request timeout in seconds (overrides RUBRIC_GRADER_GATEWAY_TIMEOUT_SECS)
    #[arg(long, global = true, value_name = "SECS")]
    pub gateway_timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compare a student answer with a reference answer
    Similarity(SimilarityArgs),
    /// Grade one submission file right away, without the queue
    Grade(GradeArgs),
    /// Print the rubric sent to the AI for an activity
    Rubric(RubricArgs),
    /// Queue grading work for a submission event (JSON file)
    Submit(SubmitArgs),
    /// Process queued grading work
    Work(WorkArgs),
    /// Release a draft grade to the learner
    Release(ReleaseArgs),
    /// Reject a draft grade
    Reject(RejectArgs),
    /// Show queue and result counts
    Stats,
    /// Show one result, or every result awaiting review
    Show(ShowArgs),
    /// Enable and tune AI grading for an activity
    Configure(ConfigureArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SimilarityArgs {
    /// File with the reference answer
    pub key: PathBuf,

    /// File with the student answer
    pub student: PathBuf,

    /// Skip the gateway and use word overlap only
    #[arg(long)]
    pub offline: bool,

    #[arg(long, value_enum, default_value_t = Quality::Balanced)]
    pub quality: Quality,

    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct GradeArgs {
    /// File with the student submission (text, markdown or HTML)
    pub submission: PathBuf,

    /// Question or prompt the student answered
    #[arg(long)]
    pub question: Option<String>,

    /// File with the reference answer
    #[arg(long, value_name = "FILE")]
    pub key: Option<PathBuf>,

    /// Rubric definition (JSON) to grade against
    #[arg(long, value_name = "FILE")]
    pub rubric: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Quality::Balanced)]
    pub quality: Quality,

    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct RubricArgs {
    #[arg(long, value_enum)]
    pub kind: ActivityKind,

    #[arg(long)]
    pub instance: i64,

    /// Course module id recorded in the snapshot
    #[arg(long)]
    pub cm: Option<i64>,

    /// Shared rubric id (default: the one in the activity settings)
    #[arg(long)]
    pub shared: Option<i64>,
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    /// Submission event as JSON
    pub event: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct WorkArgs {
    /// Stop after this many items
    #[arg(long)]
    pub limit: Option<usize>,

    /// Attempts per item before it is marked failed
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Seconds a failed item waits before it is retried
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    pub retry_delay: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ReleaseArgs {
    pub id: u64,
}

#[derive(Args, Debug, Clone)]
pub struct RejectArgs {
    pub id: u64,

    /// Why the grade was rejected
    #[arg(long, default_value = "")]
    pub reason: String,
}

#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    /// Result id (default: list results awaiting review)
    pub id: Option<u64>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigureArgs {
    #[arg(long, value_enum)]
    pub kind: ActivityKind,

    #[arg(long)]
    pub instance: i64,

    /// Turn AI grading off instead of on
    #[arg(long)]
    pub disable: bool,

    #[arg(long, value_enum)]
    pub quality: Option<Quality>,

    /// Publish grades without teacher review
    #[arg(long)]
    pub auto_release: Option<bool>,

    /// Shared rubric used for quiz essays
    #[arg(long)]
    pub rubric_id: Option<i64>,

    /// Fallback reference text when a submission has no grading instructions
    #[arg(long)]
    pub instructions: Option<String>,
}

/// Output format for reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Pretty,
    /// JSON
    Json,
}
