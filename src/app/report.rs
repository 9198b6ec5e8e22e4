//! Rendering of command output.

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::grader::AiResponse;
use crate::models::{GradeResult, QueueStats};
use crate::rubric::MappedResult;
use crate::similarity::{format_term_list, SimilarityAnalysis, DEFAULT_TERM_LIST_LIMIT};

/// Outcome of the direct `grade` command.
#[derive(Debug, Clone, Serialize)]
pub struct GradeReport {
    pub provider: String,
    pub response: AiResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rubric: Option<MappedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<SimilarityAnalysis>,
}

/// Result counts by status, next to the queue counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultCounts {
    pub pending: usize,
    pub draft: usize,
    pub released: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl ResultCounts {
    pub fn tally(results: &[GradeResult]) -> Self {
        use crate::models::ResultStatus::*;

        let mut counts = Self::default();
        for result in results {
            match result.status {
                Pending => counts.pending += 1,
                Draft => counts.draft += 1,
                Released => counts.released += 1,
                Rejected => counts.rejected += 1,
                Failed => counts.failed += 1,
            }
        }
        counts
    }
}

fn json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("Error: {}", e))
}

pub fn format_similarity(analysis: &SimilarityAnalysis, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json(analysis),
        OutputFormat::Pretty => format_similarity_pretty(analysis),
    }
}

fn format_similarity_pretty(analysis: &SimilarityAnalysis) -> String {
    let mut output = format!(
        "Similarity: {:.2}% ({})\n",
        analysis.final_percent,
        match analysis.method {
            crate::similarity::SimilarityMethod::Semantic => "semantic",
            crate::similarity::SimilarityMethod::Overlap => "overlap",
        }
    );

    let sections = [
        ("Matched", "+", &analysis.matched_terms),
        ("Partial", "~", &analysis.partial_terms),
        ("Missing", "-", &analysis.missing_terms),
    ];
    for (title, prefix, terms) in sections {
        if terms.is_empty() {
            continue;
        }
        output.push_str(&format!("{} ({}):\n", title, terms.len()));
        for line in format_term_list(terms, prefix, DEFAULT_TERM_LIST_LIMIT) {
            output.push_str(&format!("  {}\n", line));
        }
        if terms.len() > DEFAULT_TERM_LIST_LIMIT {
            output.push_str(&format!(
                "  ... and {} more\n",
                terms.len() - DEFAULT_TERM_LIST_LIMIT
            ));
        }
    }

    output.push('\n');
    output.push_str(&analysis.reasoning);
    output
}

pub fn format_grade(report: &GradeReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json(report),
        OutputFormat::Pretty => format_grade_pretty(report),
    }
}

fn format_grade_pretty(report: &GradeReport) -> String {
    let response = &report.response;
    let mut output = String::new();

    match &report.rubric {
        Some(mapped) => {
            output.push_str(&format!(
                "Grade: {} / {} (criteria sum {})\n",
                mapped.score, mapped.max_score, mapped.calculated_score
            ));
            output.push_str(&format_mapped(mapped));
        }
        None => {
            let max = response
                .max_score
                .map(|m| m.to_string())
                .unwrap_or_else(|| "?".to_string());
            output.push_str(&format!(
                "Grade: {} / {}\n",
                response.score.unwrap_or(0.0),
                max
            ));
            for criterion in &response.criteria {
                output.push_str(&format!(
                    "  {}: {}\n",
                    criterion.name,
                    criterion
                        .score
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string())
                ));
            }
        }
    }

    if let Some(confidence) = response.confidence {
        output.push_str(&format!("Confidence: {}\n", confidence));
    }
    output.push_str(&format!("Provider: {}\n", report.provider));
    if !response.reasoning.is_empty() {
        output.push_str(&format!("\n{}\n", response.reasoning));
    }
    if let Some(similarity) = &report.similarity {
        output.push('\n');
        output.push_str(&format_similarity_pretty(similarity));
        output.push('\n');
    }
    output
}

fn format_mapped(mapped: &MappedResult) -> String {
    let mut output = String::new();
    for criterion in &mapped.criteria {
        output.push_str(&format!(
            "  {}: {} / {}\n",
            criterion.name, criterion.score, criterion.max_score
        ));
        if !criterion.feedback.is_empty() {
            output.push_str(&format!("      {}\n", criterion.feedback));
        }
    }
    for warning in &mapped.warnings {
        output.push_str(&format!("  warning: {}\n", warning));
    }
    output
}

pub fn format_result(result: &GradeResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json(result),
        OutputFormat::Pretty => format_result_pretty(result),
    }
}

fn format_result_pretty(result: &GradeResult) -> String {
    let mut output = format!("{}\n", format_result_line(result));
    output.push_str(&format!(
        "  user {} / course {} / cm {} (queue item {})\n",
        result.user_id, result.course_id, result.cm_id, result.queue_id
    ));
    if let Some(model) = &result.model {
        output.push_str(&format!("  provider: {}\n", model));
    }
    if let Some(error) = &result.error {
        output.push_str(&format!("  error: {}\n", error));
    }
    if let Some(reason) = &result.reject_reason {
        output.push_str(&format!("  rejected: {}\n", reason));
    }
    if let Some(mapped) = &result.rubric_analysis {
        output.push_str(&format_mapped(mapped));
    } else {
        for warning in &result.warnings {
            output.push_str(&format!("  warning: {}\n", warning));
        }
    }
    if let Some(similarity) = &result.similarity {
        output.push_str(&format!(
            "  similarity: {:.2}% ({} of {} key terms)\n",
            similarity.final_percent, similarity.matched_terms_count, similarity.key_terms_count
        ));
    }
    if !result.reasoning.is_empty() {
        output.push_str(&format!("\n{}\n", result.reasoning));
    }
    output
}

/// One line per result for listings.
pub fn format_result_line(result: &GradeResult) -> String {
    let grade = match (result.grade, result.max_grade) {
        (Some(grade), Some(max)) => format!("{} / {}", grade, max),
        (Some(grade), None) => grade.to_string(),
        _ => "-".to_string(),
    };
    format!(
        "#{} [{}] {} {}: {}",
        result.id, result.status, result.module_kind, result.instance_id, grade
    )
}

pub fn format_results(results: &[GradeResult], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json(results),
        OutputFormat::Pretty if results.is_empty() => "No results awaiting review".to_string(),
        OutputFormat::Pretty => results
            .iter()
            .map(format_result_line)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

pub fn format_stats(queue: &QueueStats, results: &ResultCounts) -> String {
    format!(
        "Queue: {} pending, {} processing, {} completed, {} failed ({} total)\n\
         Results: {} pending, {} draft, {} released, {} rejected, {} failed",
        queue.pending,
        queue.processing,
        queue.completed,
        queue.failed,
        queue.total(),
        results.pending,
        results.draft,
        results.released,
        results.rejected,
        results.failed
    )
}
