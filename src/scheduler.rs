//! Batch scheduler: drives every document of a run through the pipeline.
//!
//! ```text
//! documents ──buffer_unordered(k)──▶ resolve ──▶ normalize ──▶ pages
//!                                                               │
//!                            Semaphore(k) ◀── one permit per model call
//!                                                               │
//!                                    ResultAggregator ◀── ExtractionResult
//! ```
//!
//! Every model call first takes a permit from one shared semaphore of
//! `batch_size` permits. The semaphore is the only thing bounding provider
//! load: however many documents are open, no more than `batch_size` calls
//! are ever in flight, and pages of different documents share the permits.
//!
//! Separately, at most `batch_size` documents are open at once. That cap
//! bounds how many rasterised documents sit in the working directory; it is
//! not part of the gate. A short document queued behind `batch_size` long
//! ones waits to be opened even while permits are free.
//!
//! A failure while reading or normalising one document is recorded on that
//! document's response and never affects the others.

use crate::aggregate::ResultAggregator;
use crate::client::{ExtractionRequest, ModelClient};
use crate::config::ExtractConfig;
use crate::error::PageError;
use crate::output::{ExtractionResult, VlenseResponse};
use crate::pipeline::input;
use crate::pipeline::normalize::{self, PageUnit};
use crate::pipeline::render::PageRasterizer;
use crate::workspace::TempWorkspace;
use futures::stream::{self, FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Runs one batch against a model backend and a rasteriser.
pub struct BatchScheduler {
    client: Arc<dyn ModelClient>,
    rasterizer: Arc<dyn PageRasterizer>,
    config: ExtractConfig,
    permits: Arc<Semaphore>,
}

impl BatchScheduler {
    pub fn new(
        client: Arc<dyn ModelClient>,
        rasterizer: Arc<dyn PageRasterizer>,
        config: &ExtractConfig,
    ) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            client,
            rasterizer,
            config: config.clone(),
            permits: Arc::new(Semaphore::new(batch_size)),
        }
    }

    /// Process `documents` and return one response per identity.
    ///
    /// `documents` must already be free of duplicates.
    pub async fn run(
        &self,
        documents: &[String],
        workspace: &TempWorkspace,
    ) -> BTreeMap<String, VlenseResponse> {
        let aggregator = ResultAggregator::new(&self.config, documents);
        // Open-document cap (disk usage); provider load is bounded by `permits`.
        let open_documents = self.config.batch_size.max(1);

        stream::iter(documents.iter().enumerate())
            .map(|(ordinal, document)| self.process_document(ordinal, document, workspace, &aggregator))
            .buffer_unordered(open_documents)
            .map(|response| (response.source.clone(), response))
            .collect()
            .await
    }

    async fn process_document(
        &self,
        ordinal: usize,
        document: &str,
        workspace: &TempWorkspace,
        aggregator: &ResultAggregator,
    ) -> VlenseResponse {
        let response = match self.prepare(ordinal, document, workspace).await {
            Ok(pages) => self.extract_pages(document, pages, aggregator).await,
            Err(e) => {
                warn!("{}: {}", document, e);
                VlenseResponse::failed(document, self.config.format, e)
            }
        };

        info!(
            "{}: {}/{} page(s) extracted{}",
            document,
            response.stats.processed_pages,
            response.stats.total_pages,
            if response.is_success() { "" } else { " (failed)" }
        );
        if let Some(cb) = &self.config.progress_callback {
            cb.on_document_complete(document, response.is_success());
        }
        response
    }

    /// Resolve the input and split it into page units inside its own slot.
    async fn prepare(
        &self,
        ordinal: usize,
        document: &str,
        workspace: &TempWorkspace,
    ) -> Result<Vec<PageUnit>, PageError> {
        let slot = workspace.document_slot(ordinal);
        tokio::fs::create_dir_all(&slot)
            .await
            .map_err(|e| PageError::DocumentRead {
                document: document.to_string(),
                detail: format!("cannot create working directory {}: {e}", slot.display()),
            })?;

        let doc = input::resolve_input(document, &slot, self.config.download_timeout_secs).await?;
        debug!("{}: resolved as {:?}", document, doc.kind);
        normalize::normalize(&doc, &slot, Arc::clone(&self.rasterizer)).await
    }

    async fn extract_pages(
        &self,
        document: &str,
        pages: Vec<PageUnit>,
        aggregator: &ResultAggregator,
    ) -> VlenseResponse {
        let total_pages = pages.len();
        aggregator.register(document, total_pages);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_document_start(document, total_pages);
        }

        let mut in_flight: FuturesUnordered<_> = pages
            .into_iter()
            .map(|page| self.extract_page(page, total_pages))
            .collect();

        let mut completed = None;
        while let Some(result) = in_flight.next().await {
            if let Some(done) = aggregator.record(result) {
                completed = Some(done);
            }
        }

        match completed {
            Some(done) => aggregator.finalize(done).await,
            None => VlenseResponse::failed(
                document,
                self.config.format,
                PageError::DocumentRead {
                    document: document.to_string(),
                    detail: "not every page reported a result".into(),
                },
            ),
        }
    }

    async fn extract_page(&self, page: PageUnit, total_pages: usize) -> ExtractionResult {
        let document = page.document.clone();
        let page_index = page.index;

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return ExtractionResult {
                    document,
                    page_index,
                    content: None,
                    input_tokens: 0,
                    output_tokens: 0,
                    duration_ms: 0,
                    retries: 0,
                    error: Some(PageError::Provider {
                        page: page_index,
                        retries: 0,
                        detail: format!("scheduler closed: {e}"),
                    }),
                };
            }
        };

        if let Some(cb) = &self.config.progress_callback {
            cb.on_page_start(&document, page_index, total_pages);
        }

        let request = ExtractionRequest {
            page,
            format: self.config.format,
            schema: self.config.schema.clone(),
        };
        let start = Instant::now();
        let outcome = self.client.extract(&request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(extraction) => {
                debug!(
                    "{} page {}/{} done in {}ms",
                    document, page_index, total_pages, duration_ms
                );
                if let Some(cb) = &self.config.progress_callback {
                    cb.on_page_complete(&document, page_index, total_pages, extraction.content.len());
                }
                ExtractionResult {
                    document,
                    page_index,
                    content: Some(extraction.content),
                    input_tokens: extraction.input_tokens,
                    output_tokens: extraction.output_tokens,
                    duration_ms,
                    retries: extraction.retries,
                    error: None,
                }
            }
            Err(e) => {
                warn!("{} page {}/{} failed: {}", document, page_index, total_pages, e);
                if let Some(cb) = &self.config.progress_callback {
                    cb.on_page_error(&document, page_index, total_pages, &e.to_string());
                }
                let retries = match &e {
                    PageError::Provider { retries, .. } => *retries,
                    _ => 0,
                };
                ExtractionResult {
                    document,
                    page_index,
                    content: None,
                    input_tokens: 0,
                    output_tokens: 0,
                    duration_ms,
                    retries,
                    error: Some(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Extraction;
    use crate::output::Content;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::{sleep, Duration};

    /// Echoes `document#page`, sleeping longer for early pages so they finish last.
    #[derive(Default)]
    struct Echo {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ModelClient for Echo {
        async fn extract(&self, request: &ExtractionRequest) -> Result<Extraction, PageError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(40 / request.page.index as u64)).await;
            self.calls.lock().unwrap().push(request.page.index);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Extraction::new(Content::Text(format!("p{}", request.page.index))))
        }
    }

    struct FourPages;

    impl PageRasterizer for FourPages {
        fn rasterize(&self, _: &str, _: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, PageError> {
            (1..=4)
                .map(|i| -> Result<PathBuf, PageError> {
                    let p = out_dir.join(format!("page_{i:04}.png"));
                    std::fs::write(&p, b"\x89PNG\r\n\x1a\n").map_err(|e| PageError::DocumentRead {
                        document: "x".into(),
                        detail: e.to_string(),
                    })?;
                    Ok(p)
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn pages_assemble_in_order_and_calls_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("doc.pdf");
        std::fs::write(&pdf, b"%PDF-1.7\n").unwrap();
        let identity = pdf.to_string_lossy().into_owned();

        let client = Arc::new(Echo::default());
        let config = ExtractConfig::builder().batch_size(2).build().unwrap();
        let scheduler = BatchScheduler::new(client.clone(), Arc::new(FourPages), &config);
        let workspace = TempWorkspace::acquire(Some(&dir.path().join("work")), true)
            .await
            .unwrap();

        let responses = scheduler.run(&[identity.clone()], &workspace).await;
        let response = &responses[&identity];
        assert_eq!(response.text(), Some("p1\n\np2\n\np3\n\np4"));
        assert!(client.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(client.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn unreadable_document_fails_alone() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pdf").to_string_lossy().into_owned();

        let config = ExtractConfig::default();
        let scheduler = BatchScheduler::new(Arc::new(Echo::default()), Arc::new(FourPages), &config);
        let workspace = TempWorkspace::acquire(None, true).await.unwrap();

        let responses = scheduler.run(&[missing.clone()], &workspace).await;
        let response = &responses[&missing];
        assert!(response.content.is_none());
        assert!(matches!(response.errors[0], PageError::DocumentRead { .. }));
    }
}
