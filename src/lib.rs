//! # vlense
//!
//! Batch extraction of Markdown, HTML or schema-constrained JSON from PDFs
//! and images using Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Scans, slides and multi-column reports defeat text-layer extractors. This
//! crate turns every document into page images and lets a VLM read each page
//! as a human would, then stitches the answers back together per document.
//! A whole batch runs concurrently behind one bounded gate, so a large input
//! list never floods the provider.
//!
//! ## Pipeline Overview
//!
//! ```text
//! inputs (paths / URLs)
//!  │
//!  ├─ 1. Resolve    local file or download, sniff PDF vs. image
//!  ├─ 2. Normalise  PDF → page PNGs (pdfium), image → single page
//!  ├─ 3. Schedule   every page call takes one of `batch_size` permits
//!  ├─ 4. Extract    VLM call per page, with retry + cleanup / schema check
//!  ├─ 5. Aggregate  pages back in order, one response per document
//!  └─ 6. Persist    <output_dir>/<stem>.<md|html|json>, temp area released
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vlense::{extract, ExtractConfig, OutputFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractConfig::builder()
//!         .format(OutputFormat::Markdown)
//!         .output_dir("out")
//!         .build()?;
//!     let output = extract(["invoice.pdf", "receipt.jpg"], &config).await?;
//!     for failed in output.failures() {
//!         eprintln!("{}: {:?}", failed.source, failed.errors);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Structured output
//!
//! ```rust,no_run
//! use vlense::{extract_one, ExtractConfig, JsonSchema, OutputFormat};
//!
//! #[derive(schemars::JsonSchema, serde::Deserialize)]
//! struct Invoice {
//!     number: String,
//!     total: f64,
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExtractConfig::builder()
//!     .format(OutputFormat::Json)
//!     .schema(JsonSchema::for_type::<Invoice>()?)
//!     .build()?;
//! let output = extract_one("invoice.pdf", &config).await?;
//! if let Some(value) = output.get("invoice.pdf").and_then(|r| r.json()) {
//!     let invoice: Invoice = serde_json::from_value(value.clone())?;
//!     println!("{} → {}", invoice.number, invoice.total);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `vlense` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `bundled` | off     | Embeds the PDFium library in the binary at build time |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! vlense = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod aggregate;
pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod scheduler;
pub mod schema;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{Extraction, ExtractionRequest, ModelClient, VlmClient, VlmOptions};
pub use config::{ExtractConfig, ExtractConfigBuilder, OutputFormat, PageSeparator, PartialPagePolicy};
pub use error::{PageError, VlenseError};
pub use extract::{extract, extract_one, extract_sync};
pub use output::{
    BatchStats, Content, DocumentStats, ExtractOutput, ExtractionResult, PageSummary, VlenseResponse,
};
pub use pipeline::normalize::PageUnit;
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::JsonSchema;
