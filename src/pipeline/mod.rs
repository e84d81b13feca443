//! Per-document pipeline stages.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable and the rendering backend can be swapped without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ encode ──▶ (model) ──▶ postprocess
//! (URL/path)  (pages)      (base64)               (cleanup)
//!              │
//!              └─ render (pdfium, PDFs only)
//! ```
//!
//! 1. [`input`]     — resolve a path or URL and sniff PDF vs. image
//! 2. [`normalize`] — turn a document into ordered page images inside its
//!    working slot
//! 3. [`render`]    — rasterise PDF pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 4. [`encode`]    — base64-wrap each page image for the multimodal request
//! 5. [`postprocess`] — deterministic cleanup of raw model answers

pub mod encode;
pub mod input;
pub mod normalize;
pub mod postprocess;
pub mod render;
