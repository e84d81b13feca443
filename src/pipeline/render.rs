//! PDF rasterisation: write every page of a PDF to a PNG file.
//!
//! Rasterisation sits behind the [`PageRasterizer`] trait so the rendering
//! backend can be replaced (or faked in tests) without touching the
//! scheduler. The production implementation, [`PdfiumRasterizer`], drives
//! pdfium through `pdfium-render`. pdfium keeps thread-local state and is
//! CPU-bound, so callers run it inside `tokio::task::spawn_blocking`.
//!
//! The longest edge of each page is capped at `max_rendered_pixels`
//! regardless of physical page size, which keeps memory bounded for
//! poster-sized pages.

use crate::config::ExtractConfig;
use crate::error::PageError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Turns a PDF into one image file per page.
pub trait PageRasterizer: Send + Sync {
    /// Render every page of `pdf` into `out_dir`, returning the image paths
    /// in page order. `document` is the identity used in error reports.
    ///
    /// Called from a blocking thread.
    fn rasterize(&self, document: &str, pdf: &Path, out_dir: &Path)
        -> Result<Vec<PathBuf>, PageError>;
}

/// File name of the `index`-th (1-based) page image.
pub fn page_file_name(index: usize, extension: &str) -> String {
    format!("page_{:04}.{}", index, extension)
}

/// pdfium-backed rasteriser.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    max_rendered_pixels: u32,
    password: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(max_rendered_pixels: u32, password: Option<String>) -> Self {
        Self {
            max_rendered_pixels,
            password,
        }
    }

    pub fn from_config(config: &ExtractConfig) -> Self {
        Self::new(config.max_rendered_pixels, config.password.clone())
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        document: &str,
        pdf: &Path,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, PageError> {
        let read_err = |detail: String| PageError::DocumentRead {
            document: document.to_string(),
            detail,
        };

        let pdfium = pdfium_auto::bind_pdfium_silent()
            .map_err(|e| read_err(format!("PDFium is unavailable: {e}")))?;

        let pdf_doc = pdfium
            .load_pdf_from_file(pdf, self.password.as_deref())
            .map_err(|e| {
                let detail = format!("{:?}", e);
                if detail.to_lowercase().contains("password") {
                    if self.password.is_some() {
                        read_err("wrong PDF password".into())
                    } else {
                        read_err("PDF is encrypted and requires a password".into())
                    }
                } else {
                    read_err(format!("corrupt PDF: {detail}"))
                }
            })?;

        let pages = pdf_doc.pages();
        let total_pages = pages.len() as usize;
        if total_pages == 0 {
            return Err(read_err("PDF has no pages".into()));
        }
        info!("PDF loaded: {} pages", total_pages);

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        let mut files = Vec::with_capacity(total_pages);
        for (idx, page) in pages.iter().enumerate() {
            let page_num = idx + 1;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| read_err(format!("rasterisation failed for page {page_num}: {e:?}")))?;

            let image = bitmap.as_image();
            let path = out_dir.join(page_file_name(page_num, "png"));
            image
                .save_with_format(&path, image::ImageFormat::Png)
                .map_err(|e| read_err(format!("failed to write page {page_num}: {e}")))?;

            debug!(
                "Rendered page {} → {}x{} px",
                page_num,
                image.width(),
                image.height()
            );
            files.push(path);
        }

        Ok(files)
    }
}
