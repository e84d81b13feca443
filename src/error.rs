//! Error types for the vlense library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`VlenseError`] — **Fatal**: the whole call cannot proceed (bad format
//!   name, missing schema, no usable working directory, provider not
//!   configured). Returned as `Err(VlenseError)` from the `extract*`
//!   functions before, or instead of, producing any result map.
//!
//! * [`PageError`] — **Non-fatal**: one document or one page failed
//!   (corrupt PDF, provider timeout, response that does not match the
//!   schema). Stored inside [`crate::output::VlenseResponse`] so one bad file
//!   never sinks the rest of the batch.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the vlense library.
///
/// Document- and page-level failures use [`PageError`] and are recorded in
/// the returned map rather than propagated here.
#[derive(Debug, Error)]
pub enum VlenseError {
    // ── Call contract ─────────────────────────────────────────────────────
    /// The requested output format is not one of markdown, html, json.
    #[error("Invalid format '{format}': expected one of 'markdown', 'html', or 'json'")]
    InvalidFormat { format: String },

    /// `json` output was requested without a schema.
    #[error("A JSON schema must be provided when format is 'json'")]
    MissingSchema,

    /// The supplied schema could not be compiled.
    #[error("Invalid JSON schema: {detail}")]
    InvalidSchema { detail: String },

    // ── Working area ──────────────────────────────────────────────────────
    /// The temporary working directory could not be created or cleared.
    #[error("Temporary storage error at '{path}': {source}\nNo safe working directory is available.")]
    TempStorage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The output directory could not be created.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Provider ──────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config / run ──────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The whole run exceeded `run_timeout_secs`.
    #[error("Extraction run timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error scoped to one document or one of its pages.
///
/// `page` is `None` when the failure concerns the document as a whole
/// (it could not be read, or its output could not be written).
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageError {
    /// The document could not be read, downloaded, or rasterised.
    #[error("Cannot read document '{document}': {detail}")]
    DocumentRead { document: String, detail: String },

    /// The document is neither a PDF nor a recognised image.
    #[error("Unsupported document format for '{document}': {detail}")]
    UnsupportedFormat { document: String, detail: String },

    /// The model provider failed after all retries.
    #[error("Page {page}: provider call failed after {retries} retries: {detail}")]
    Provider {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// The provider answered but the answer does not satisfy the schema.
    #[error("Page {page}: response failed schema validation: {detail}")]
    SchemaValidation { page: usize, detail: String },

    /// Every page validated, but the merged document value does not.
    #[error("Merged result for '{document}' failed schema validation: {detail}")]
    MergedSchemaValidation { document: String, detail: String },

    /// The assembled response could not be persisted.
    #[error("Failed to write output file '{path}': {detail}")]
    OutputWrite { path: PathBuf, detail: String },
}

impl PageError {
    /// The 1-based page this error belongs to, if it is page-scoped.
    pub fn page(&self) -> Option<usize> {
        match self {
            PageError::Provider { page, .. } | PageError::SchemaValidation { page, .. } => {
                Some(*page)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_format_display() {
        let e = VlenseError::InvalidFormat {
            format: "pdf".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("'pdf'"), "got: {msg}");
        assert!(msg.contains("markdown"));
    }

    #[test]
    fn provider_error_display() {
        let e = PageError::Provider {
            page: 3,
            retries: 2,
            detail: "503 Service Unavailable".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 3"));
        assert!(msg.contains("503"));
        assert_eq!(e.page(), Some(3));
    }

    #[test]
    fn document_errors_have_no_page() {
        let e = PageError::DocumentRead {
            document: "scan.pdf".into(),
            detail: "truncated xref".into(),
        };
        assert_eq!(e.page(), None);
        assert!(e.to_string().contains("scan.pdf"));
    }

    #[test]
    fn page_error_serialises_with_kind_tag() {
        let e = PageError::SchemaValidation {
            page: 1,
            detail: "missing field".into(),
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["kind"], "schema_validation");
        assert_eq!(v["page"], 1);
    }
}
