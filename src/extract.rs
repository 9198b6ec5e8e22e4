//! Turning raw submissions into plain text.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::text::{collapse_whitespace, decode_html_entities, strip_tags};

/// A submission as delivered by the host: optional online text and any
/// uploaded files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSubmission {
    #[serde(default)]
    pub online_text: Option<String>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

/// Outcome of reading one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFile {
    pub name: String,
    #[serde(default, skip_serializing)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractedFile {
    /// `name`, or `name (error: ...)` when extraction failed.
    pub fn summary(&self) -> String {
        match &self.error {
            Some(error) => format!("{} (error: {})", self.name, error),
            None => self.name.clone(),
        }
    }
}

/// Combined plain text of a submission plus per-file outcomes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedContent {
    pub text: String,
    pub files: Vec<ExtractedFile>,
}

/// Converts submissions into plain text.
pub trait ContentExtractor: Send + Sync {
    fn extract_file(&self, path: &Path) -> ExtractedFile;

    fn extract(&self, submission: &RawSubmission) -> ExtractedContent {
        let mut sections = Vec::new();
        if let Some(online) = submission.online_text.as_deref() {
            let text = html_to_text(online);
            if !text.is_empty() {
                sections.push(text);
            }
        }

        let files: Vec<ExtractedFile> = submission
            .files
            .iter()
            .map(|path| self.extract_file(path))
            .collect();
        sections.extend(
            files
                .iter()
                .filter(|f| !f.text.is_empty())
                .map(|f| format!("[{}]\n{}", f.name, f.text)),
        );

        ExtractedContent {
            text: sections.join("\n\n"),
            files,
        }
    }
}

/// Reads text-like files from disk; binary formats are reported as errors.
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "text"];
const HTML_EXTENSIONS: &[&str] = &["html", "htm", "xhtml"];

impl ContentExtractor for PlainTextExtractor {
    fn extract_file(&self, path: &Path) -> ExtractedFile {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let is_html = HTML_EXTENSIONS.contains(&extension.as_str());
        if !is_html && !TEXT_EXTENSIONS.contains(&extension.as_str()) {
            return ExtractedFile {
                name,
                text: String::new(),
                error: Some(format!("unsupported file type '{}'", extension)),
            };
        }

        match fs::read_to_string(path) {
            Ok(raw) => {
                let text = if is_html {
                    html_to_text(&raw)
                } else {
                    raw.trim().to_string()
                };
                ExtractedFile {
                    name,
                    text,
                    error: None,
                }
            }
            Err(e) => ExtractedFile {
                name,
                text: String::new(),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Strip markup and entities, keeping paragraph breaks as blank lines.
pub fn html_to_text(html: &str) -> String {
    let with_breaks = html
        .replace("</p>", "</p>\n\n")
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n");
    decode_html_entities(&strip_tags(&with_breaks))
        .split("\n\n")
        .map(collapse_whitespace)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
