//! Progress-callback trait for batch, document and page events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractConfigBuilder::progress_callback`] to receive
//! events as the scheduler works through the batch.
//!
//! # Example
//!
//! ```rust
//! use vlense::{ExtractionProgressCallback, ExtractConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     pages: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, document: &str, page_num: usize, _total: usize, len: usize) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{document} page {page_num} done ({len} bytes)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { pages: AtomicUsize::new(0) });
//!
//! let config = ExtractConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the scheduler as it processes the batch.
///
/// Pages of different documents complete concurrently, so every method may
/// be called from several tasks at once. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before any document is opened.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document has been split into pages.
    fn on_document_start(&self, document: &str, total_pages: usize) {
        let _ = (document, total_pages);
    }

    /// Called just before the model call for a page.
    fn on_page_start(&self, document: &str, page_num: usize, total_pages: usize) {
        let _ = (document, page_num, total_pages);
    }

    /// Called when a page is extracted successfully.
    ///
    /// `content_len` is the byte length of the page content.
    fn on_page_complete(
        &self,
        document: &str,
        page_num: usize,
        total_pages: usize,
        content_len: usize,
    ) {
        let _ = (document, page_num, total_pages, content_len);
    }

    /// Called when a page fails after all retries.
    fn on_page_error(&self, document: &str, page_num: usize, total_pages: usize, error: &str) {
        let _ = (document, page_num, total_pages, error);
    }

    /// Called once per document when its response is final.
    fn on_document_complete(&self, document: &str, success: bool) {
        let _ = (document, success);
    }

    /// Called once after every document has a response.
    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        documents: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        succeeded: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_batch_start(&self, total_documents: usize) {
            self.documents.store(total_documents, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _d: &str, _p: usize, _t: usize, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _d: &str, _p: usize, _t: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, success_count: usize) {
            self.succeeded.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_start("a.pdf", 3);
        cb.on_page_start("a.pdf", 1, 3);
        cb.on_page_complete("a.pdf", 1, 3, 42);
        cb.on_page_error("a.pdf", 2, 3, "timeout");
        cb.on_document_complete("a.pdf", false);
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_batch_start(2);
        tracker.on_page_complete("a.png", 1, 1, 10);
        tracker.on_page_complete("b.pdf", 1, 2, 20);
        tracker.on_page_error("b.pdf", 2, 2, "503");
        tracker.on_batch_complete(2, 1);

        assert_eq!(tracker.documents.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.succeeded.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(1);
        cb.on_document_complete("x.jpg", true);
    }
}
