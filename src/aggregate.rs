//! Result aggregation: per-page results in, one response per document out.
//!
//! Pages of one document complete in any order and from many tasks. The
//! aggregator keeps one accumulator per document behind a single mutex;
//! inserting a result and checking "have all pages reported?" happen under
//! the same lock, so exactly one caller sees the document complete and
//! receives the [`CompletedDocument`]. Assembly and persistence then run
//! outside the lock.

use crate::config::{ExtractConfig, OutputFormat, PageSeparator, PartialPagePolicy};
use crate::error::PageError;
use crate::output::{Content, DocumentStats, ExtractionResult, PageSummary, VlenseResponse};
use crate::schema::JsonSchema;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// All page results of one document, in page order.
#[derive(Debug)]
pub struct CompletedDocument {
    pub document: String,
    pub results: Vec<ExtractionResult>,
}

#[derive(Debug)]
struct DocumentAccumulator {
    expected: usize,
    results: BTreeMap<usize, ExtractionResult>,
}

/// Collects page results and turns finished documents into responses.
#[derive(Debug)]
pub struct ResultAggregator {
    format: OutputFormat,
    policy: PartialPagePolicy,
    separator: PageSeparator,
    schema: Option<Arc<JsonSchema>>,
    output_dir: Option<PathBuf>,
    file_names: HashMap<String, String>,
    pending: Mutex<HashMap<String, DocumentAccumulator>>,
}

impl ResultAggregator {
    /// Create an aggregator for the given batch of document identities.
    pub fn new(config: &ExtractConfig, documents: &[String]) -> Self {
        let file_names = match config.output_dir {
            Some(_) => output_file_names(documents, config.format),
            None => HashMap::new(),
        };
        Self {
            format: config.format,
            policy: config.partial_policy,
            separator: config.page_separator.clone(),
            schema: config.schema.clone(),
            output_dir: config.output_dir.clone(),
            file_names,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Announce how many pages `document` will report.
    pub fn register(&self, document: &str, page_count: usize) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.insert(
            document.to_string(),
            DocumentAccumulator {
                expected: page_count,
                results: BTreeMap::new(),
            },
        );
    }

    /// Record one page result.
    ///
    /// Returns the completed document when this was its last outstanding
    /// page, and `None` otherwise (or for an unregistered document).
    pub fn record(&self, result: ExtractionResult) -> Option<CompletedDocument> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let Some(acc) = pending.get_mut(&result.document) else {
            warn!("Dropping result for unregistered document {}", result.document);
            return None;
        };
        let document = result.document.clone();
        acc.results.insert(result.page_index, result);
        if acc.results.len() < acc.expected {
            return None;
        }
        let acc = pending.remove(&document)?;
        Some(CompletedDocument {
            document,
            results: acc.results.into_values().collect(),
        })
    }

    /// Assemble the response for a completed document and persist it when an
    /// output directory is configured.
    ///
    /// Only responses with content are written: complete documents, and
    /// partial ones under [`PartialPagePolicy::KeepSucceededPages`].
    pub async fn finalize(&self, completed: CompletedDocument) -> VlenseResponse {
        let mut response = self.assemble(completed);
        if let (Some(dir), Some(content)) = (&self.output_dir, &response.content) {
            let name = self
                .file_names
                .get(&response.source)
                .cloned()
                .unwrap_or_else(|| file_stem_for(&response.source, self.format));
            let path = dir.join(name);
            match write_atomic(&path, &content.render()).await {
                Ok(()) => {
                    info!("{} → {}", response.source, path.display());
                    response.output_path = Some(path);
                }
                Err(e) => {
                    warn!("{}: failed to write {}: {}", response.source, path.display(), e);
                    response.errors.push(PageError::OutputWrite {
                        path,
                        detail: e.to_string(),
                    });
                }
            }
        }
        response
    }

    /// Build the response without touching the filesystem.
    pub fn assemble(&self, completed: CompletedDocument) -> VlenseResponse {
        let CompletedDocument { document, results } = completed;

        let pages: Vec<PageSummary> = results
            .iter()
            .map(|r| PageSummary {
                page_index: r.page_index,
                success: r.is_success(),
                content_len: r.content.as_ref().map_or(0, Content::len),
                input_tokens: r.input_tokens,
                output_tokens: r.output_tokens,
                duration_ms: r.duration_ms,
                retries: r.retries,
            })
            .collect();

        let mut errors: Vec<PageError> = results.iter().filter_map(|r| r.error.clone()).collect();
        let succeeded: Vec<(usize, &Content)> = results
            .iter()
            .filter(|r| r.is_success())
            .filter_map(|r| r.content.as_ref().map(|c| (r.page_index, c)))
            .collect();

        let stats = DocumentStats {
            total_pages: results.len(),
            processed_pages: succeeded.len(),
            failed_pages: errors.len(),
            total_input_tokens: results.iter().map(|r| r.input_tokens as u64).sum(),
            total_output_tokens: results.iter().map(|r| r.output_tokens as u64).sum(),
        };

        let keep = match self.policy {
            PartialPagePolicy::FailDocument => errors.is_empty(),
            PartialPagePolicy::KeepSucceededPages => !succeeded.is_empty(),
        };
        let content = if keep {
            let merged = self.merge(&succeeded);
            match self.check_merged(&document, &merged) {
                Ok(()) => Some(merged),
                Err(e) => {
                    warn!("{}", e);
                    errors.push(e);
                    None
                }
            }
        } else {
            if !succeeded.is_empty() {
                debug!(
                    "{}: discarding {} succeeded page(s) of a failed document",
                    document,
                    succeeded.len()
                );
            }
            None
        };

        VlenseResponse {
            source: document,
            format: self.format,
            content,
            pages,
            errors,
            output_path: None,
            stats,
        }
    }

    /// A merge of individually valid pages can still break the schema
    /// (`oneOf`, `maxProperties`, `not`), so the merged value is checked too.
    fn check_merged(&self, document: &str, merged: &Content) -> Result<(), PageError> {
        match (self.format, &self.schema, merged) {
            (OutputFormat::Json, Some(schema), Content::Json(value)) => {
                schema
                    .validate(value)
                    .map_err(|detail| PageError::MergedSchemaValidation {
                        document: document.to_string(),
                        detail,
                    })
            }
            _ => Ok(()),
        }
    }

    /// Combine page contents, already in page order.
    fn merge(&self, pages: &[(usize, &Content)]) -> Content {
        match self.format {
            OutputFormat::Markdown | OutputFormat::Html => {
                let mut out = String::new();
                for (i, (page_index, content)) in pages.iter().enumerate() {
                    if i > 0 {
                        out.push_str(&self.separator.render(*page_index));
                    }
                    match content {
                        Content::Text(s) => out.push_str(s),
                        Content::Json(v) => out.push_str(&v.to_string()),
                    }
                }
                Content::Text(out)
            }
            OutputFormat::Json => {
                let values = pages.iter().map(|(_, c)| match c {
                    Content::Json(v) => v.clone(),
                    Content::Text(s) => Value::String(s.clone()),
                });
                Content::Json(merge_json(values))
            }
        }
    }
}

/// Shallow "last page wins" merge: object fields from later pages overwrite
/// earlier ones; a non-object page value replaces the accumulated value.
pub fn merge_json(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, |acc, next| match (acc, next) {
        (Value::Object(mut base), Value::Object(update)) => {
            base.extend(update);
            Value::Object(base)
        }
        (_, next) => next,
    })
}

/// Deterministic output file names for a batch.
///
/// Each identity maps to `<stem>.<ext>`; identities whose stems collide get a
/// short hash of the full identity appended so no two documents share a file.
pub fn output_file_names(documents: &[String], format: OutputFormat) -> HashMap<String, String> {
    let mut stem_counts: HashMap<String, usize> = HashMap::new();
    for doc in documents {
        *stem_counts.entry(stem_of(doc)).or_default() += 1;
    }

    documents
        .iter()
        .map(|doc| {
            let stem = stem_of(doc);
            let name = if stem_counts.get(&stem).copied().unwrap_or(0) > 1 {
                format!("{}-{}.{}", stem, short_hash(doc), format.extension())
            } else {
                format!("{}.{}", stem, format.extension())
            };
            (doc.clone(), name)
        })
        .collect()
}

fn file_stem_for(document: &str, format: OutputFormat) -> String {
    format!("{}.{}", stem_of(document), format.extension())
}

/// File stem of a path or URL, restricted to filesystem-safe characters.
fn stem_of(document: &str) -> String {
    let without_query = document.split(['?', '#']).next().unwrap_or(document);
    let last = without_query
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("");
    let stem = Path::new(last)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let safe: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    if safe.is_empty() {
        "document".to_string()
    } else {
        safe
    }
}

fn short_hash(document: &str) -> String {
    let digest = Sha256::digest(document.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// Write via a temp file + rename so readers never see a partial file.
async fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("vlense.tmp");
    tokio::fs::write(&tmp_path, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(document: &str, index: usize, content: Option<Content>) -> ExtractionResult {
        let error = match content {
            Some(_) => None,
            None => Some(PageError::Provider {
                page: index,
                retries: 3,
                detail: "503".into(),
            }),
        };
        ExtractionResult {
            document: document.to_string(),
            page_index: index,
            content,
            input_tokens: 10,
            output_tokens: 5,
            duration_ms: 1,
            retries: 0,
            error,
        }
    }

    fn text(s: &str) -> Option<Content> {
        Some(Content::Text(s.to_string()))
    }

    fn aggregator(config: &ExtractConfig) -> ResultAggregator {
        ResultAggregator::new(config, &["doc.pdf".to_string()])
    }

    #[test]
    fn completes_only_after_last_page() {
        let agg = aggregator(&ExtractConfig::default());
        agg.register("doc.pdf", 3);
        assert!(agg.record(page("doc.pdf", 3, text("three"))).is_none());
        assert!(agg.record(page("doc.pdf", 1, text("one"))).is_none());
        let done = agg.record(page("doc.pdf", 2, text("two"))).expect("complete");
        let order: Vec<usize> = done.results.iter().map(|r| r.page_index).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn text_pages_join_in_order() {
        let agg = aggregator(&ExtractConfig::default());
        agg.register("doc.pdf", 2);
        agg.record(page("doc.pdf", 2, text("second")));
        let done = agg.record(page("doc.pdf", 1, text("first"))).unwrap();
        let response = agg.assemble(done);
        assert_eq!(response.text(), Some("first\n\nsecond"));
        assert!(response.is_success());
        assert_eq!(response.stats.total_input_tokens, 20);
    }

    #[test]
    fn custom_separator_is_used_between_pages() {
        let config = ExtractConfig::builder()
            .page_separator(PageSeparator::Comment)
            .build()
            .unwrap();
        let agg = aggregator(&config);
        agg.register("doc.pdf", 2);
        agg.record(page("doc.pdf", 1, text("a")));
        let done = agg.record(page("doc.pdf", 2, text("b"))).unwrap();
        assert_eq!(agg.assemble(done).text(), Some("a\n\n<!-- page 2 -->\n\nb"));
    }

    #[test]
    fn failed_page_fails_document_by_default() {
        let agg = aggregator(&ExtractConfig::default());
        agg.register("doc.pdf", 2);
        agg.record(page("doc.pdf", 1, text("fine")));
        let done = agg.record(page("doc.pdf", 2, None)).unwrap();
        let response = agg.assemble(done);
        assert!(response.content.is_none());
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.stats.failed_pages, 1);
        assert_eq!(response.pages.len(), 2);
    }

    #[test]
    fn keep_policy_returns_partial_content() {
        let config = ExtractConfig::builder()
            .partial_policy(PartialPagePolicy::KeepSucceededPages)
            .build()
            .unwrap();
        let agg = aggregator(&config);
        agg.register("doc.pdf", 3);
        agg.record(page("doc.pdf", 1, text("one")));
        agg.record(page("doc.pdf", 2, None));
        let done = agg.record(page("doc.pdf", 3, text("three"))).unwrap();
        let response = agg.assemble(done);
        assert_eq!(response.text(), Some("one\n\nthree"));
        assert!(!response.is_success());
    }

    #[test]
    fn json_merge_last_page_wins() {
        let merged = merge_json(vec![
            json!({"title": "Draft", "author": "A"}),
            json!({"title": "Final", "pages": 2}),
        ]);
        assert_eq!(merged, json!({"title": "Final", "author": "A", "pages": 2}));
        assert_eq!(merge_json(vec![json!({"a": 1}), json!([1])]), json!([1]));
        assert_eq!(merge_json(Vec::new()), Value::Null);
    }

    #[test]
    fn merged_json_must_still_match_schema() {
        let schema = JsonSchema::from_value(json!({
            "type": "object",
            "oneOf": [{ "required": ["a"] }, { "required": ["b"] }]
        }))
        .unwrap();
        assert!(schema.validate(&json!({"a": 1})).is_ok());
        assert!(schema.validate(&json!({"b": 2})).is_ok());

        let config = ExtractConfig::builder()
            .format(OutputFormat::Json)
            .schema(schema)
            .build()
            .unwrap();
        let agg = aggregator(&config);
        agg.register("doc.pdf", 2);
        agg.record(page("doc.pdf", 1, Some(Content::Json(json!({"a": 1})))));
        let done = agg
            .record(page("doc.pdf", 2, Some(Content::Json(json!({"b": 2})))))
            .unwrap();
        let response = agg.assemble(done);

        assert!(!response.is_success());
        assert!(response.content.is_none());
        assert!(matches!(
            response.errors.as_slice(),
            [PageError::MergedSchemaValidation { document, .. }] if document == "doc.pdf"
        ));
        assert_eq!(response.stats.failed_pages, 0);
        assert_eq!(response.stats.processed_pages, 2);
    }

    #[tokio::test]
    async fn merged_json_violating_schema_is_not_written() {
        let out = tempfile::tempdir().unwrap();
        let schema = JsonSchema::from_value(json!({"type": "object", "maxProperties": 1})).unwrap();
        let config = ExtractConfig::builder()
            .format(OutputFormat::Json)
            .schema(schema)
            .output_dir(out.path())
            .build()
            .unwrap();
        let agg = aggregator(&config);
        agg.register("doc.pdf", 2);
        agg.record(page("doc.pdf", 1, Some(Content::Json(json!({"a": 1})))));
        let done = agg
            .record(page("doc.pdf", 2, Some(Content::Json(json!({"b": 2})))))
            .unwrap();
        let response = agg.finalize(done).await;

        assert!(response.output_path.is_none());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn file_names_are_deterministic_and_unique() {
        let docs = vec![
            "a/report.pdf".to_string(),
            "b/report.pdf".to_string(),
            "https://x.org/scan.png?dl=1".to_string(),
        ];
        let names = output_file_names(&docs, OutputFormat::Markdown);
        assert_eq!(names["https://x.org/scan.png?dl=1"], "scan.md");
        let a = &names["a/report.pdf"];
        let b = &names["b/report.pdf"];
        assert!(a.starts_with("report-") && a.ends_with(".md"));
        assert_ne!(a, b);
        assert_eq!(names, output_file_names(&docs, OutputFormat::Markdown));
    }

    #[test]
    fn stems_are_sanitised() {
        assert_eq!(stem_of("/tmp/My Scan (1).jpg"), "My_Scan__1_");
        assert_eq!(stem_of("https://x.org/files/"), "files");
        assert_eq!(stem_of(""), "document");
    }

    #[tokio::test]
    async fn finalize_writes_successful_documents() {
        let out = tempfile::tempdir().unwrap();
        let config = ExtractConfig::builder().output_dir(out.path()).build().unwrap();
        let agg = aggregator(&config);
        agg.register("doc.pdf", 1);
        let done = agg.record(page("doc.pdf", 1, text("# Hello"))).unwrap();
        let response = agg.finalize(done).await;
        let path = response.output_path.expect("persisted");
        assert_eq!(path, out.path().join("doc.md"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# Hello");
    }

    #[tokio::test]
    async fn finalize_writes_partial_documents_when_kept() {
        let out = tempfile::tempdir().unwrap();
        let config = ExtractConfig::builder()
            .output_dir(out.path())
            .partial_policy(PartialPagePolicy::KeepSucceededPages)
            .build()
            .unwrap();
        let agg = aggregator(&config);
        agg.register("doc.pdf", 2);
        agg.record(page("doc.pdf", 1, text("kept")));
        let done = agg.record(page("doc.pdf", 2, None)).unwrap();
        let response = agg.finalize(done).await;
        assert!(!response.is_success());
        let path = response.output_path.expect("partial document persisted");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "kept");
    }

    #[tokio::test]
    async fn finalize_skips_failed_documents() {
        let out = tempfile::tempdir().unwrap();
        let config = ExtractConfig::builder().output_dir(out.path()).build().unwrap();
        let agg = aggregator(&config);
        agg.register("doc.pdf", 1);
        let done = agg.record(page("doc.pdf", 1, None)).unwrap();
        let response = agg.finalize(done).await;
        assert!(response.output_path.is_none());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
