//! Result types: per-page extraction results and per-document responses.

use crate::config::OutputFormat;
use crate::error::PageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Extracted content: text for markdown/html, a JSON value for json.
///
/// Serialised as `{"type": "text" | "json", "value": ...}` so a JSON string
/// value reads back as `Json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Content {
    Text(String),
    Json(Value),
}

impl Content {
    /// The text, if this is text content.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            Content::Json(_) => None,
        }
    }

    /// The JSON value, if this is structured content.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Content::Json(v) => Some(v),
            Content::Text(_) => None,
        }
    }

    /// Byte length of the content as it would be written to disk.
    pub fn len(&self) -> usize {
        match self {
            Content::Text(s) => s.len(),
            Content::Json(v) => v.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialise for persistence: text as-is, JSON pretty-printed.
    pub fn render(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Json(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
        }
    }
}

/// Outcome of one page's model call. Produced by the scheduler, consumed by
/// the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Identity of the owning document.
    pub document: String,
    /// 1-based page index.
    pub page_index: usize,
    /// Extracted content (None on failure).
    pub content: Option<Content>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    pub retries: u32,
    /// Set when the page failed.
    pub error: Option<PageError>,
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-page line in a document response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub page_index: usize,
    pub success: bool,
    pub content_len: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    pub retries: u32,
}

/// Counters for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

/// The externally visible result for one input document.
///
/// Exactly one exists per input document, whether extraction succeeded or
/// not. A failed document has `content == None` (unless the partial-page
/// policy keeps succeeded pages) and a non-empty `errors` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlenseResponse {
    /// Identity of the input document (the path or URL as given).
    pub source: String,
    pub format: OutputFormat,
    pub content: Option<Content>,
    /// Per-page summaries in page order.
    pub pages: Vec<PageSummary>,
    pub errors: Vec<PageError>,
    /// Where the response was persisted, when an output directory is set.
    pub output_path: Option<PathBuf>,
    pub stats: DocumentStats,
}

impl VlenseResponse {
    /// A response for a document that never produced pages.
    pub fn failed(source: impl Into<String>, format: OutputFormat, error: PageError) -> Self {
        Self {
            source: source.into(),
            format,
            content: None,
            pages: Vec::new(),
            errors: vec![error],
            output_path: None,
            stats: DocumentStats::default(),
        }
    }

    /// True when every page succeeded and the response was stored.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.content.is_some()
    }

    /// Text content, for markdown/html responses.
    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(Content::as_text)
    }

    /// Structured content, for json responses.
    pub fn json(&self) -> Option<&Value> {
        self.content.as_ref().and_then(Content::as_json)
    }
}

/// Totals across the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_documents: usize,
    pub succeeded_documents: usize,
    pub failed_documents: usize,
    pub total_pages: usize,
    pub failed_pages: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Everything an extraction call returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractOutput {
    /// One response per distinct input document, keyed by identity.
    pub responses: BTreeMap<String, VlenseResponse>,
    /// The working directory, when `clean_temp_files` was false.
    pub retained_temp_dir: Option<PathBuf>,
    pub stats: BatchStats,
}

impl ExtractOutput {
    /// Look up a response by the path or URL it was requested with.
    pub fn get(&self, source: &str) -> Option<&VlenseResponse> {
        self.responses.get(source)
    }

    /// Responses that did not fully succeed.
    pub fn failures(&self) -> impl Iterator<Item = &VlenseResponse> {
        self.responses.values().filter(|r| !r.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_render_pretty_prints_json() {
        let c = Content::Json(json!({"a": 1}));
        assert_eq!(c.render(), "{\n  \"a\": 1\n}");
        assert_eq!(Content::Text("hi".into()).render(), "hi");
    }

    #[test]
    fn failed_response_is_not_success() {
        let r = VlenseResponse::failed(
            "missing.pdf",
            OutputFormat::Markdown,
            PageError::DocumentRead {
                document: "missing.pdf".into(),
                detail: "No such file".into(),
            },
        );
        assert!(!r.is_success());
        assert!(r.text().is_none());
        assert_eq!(r.errors.len(), 1);
    }

    #[test]
    fn content_serialises_tagged() {
        let text = serde_json::to_value(Content::Text("# Title".into())).unwrap();
        assert_eq!(text, json!({"type": "text", "value": "# Title"}));
        let obj = serde_json::to_value(Content::Json(json!({"k": true}))).unwrap();
        assert_eq!(obj, json!({"type": "json", "value": {"k": true}}));
    }

    #[test]
    fn json_string_value_survives_round_trip() {
        let original = Content::Json(json!("just a string"));
        let text = serde_json::to_string(&original).unwrap();
        let back: Content = serde_json::from_str(&text).unwrap();
        assert_eq!(back, original);
        assert_eq!(back.as_json(), Some(&json!("just a string")));
    }
}
