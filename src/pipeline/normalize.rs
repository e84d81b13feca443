//! Document normalisation: an [`InputDocument`] becomes an ordered list of
//! [`PageUnit`]s, each one image file inside the document's workspace slot.
//!
//! Images are copied into the slot as their single page so that every page
//! the pipeline touches lives under the workspace and is cleaned with it.
//! PDFs are rasterised page by page.

use crate::error::PageError;
use crate::pipeline::input::{DocumentKind, InputDocument};
use crate::pipeline::render::{page_file_name, PageRasterizer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// One page image ready for the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUnit {
    /// Identity of the owning document.
    pub document: String,
    /// 1-based position in the document.
    pub index: usize,
    pub path: PathBuf,
}

/// Split `doc` into page units written under `slot`.
pub async fn normalize(
    doc: &InputDocument,
    slot: &Path,
    rasterizer: Arc<dyn PageRasterizer>,
) -> Result<Vec<PageUnit>, PageError> {
    let files = match doc.kind {
        DocumentKind::Image(format) => {
            let ext = format.extensions_str().first().copied().unwrap_or("img");
            let target = slot.join(page_file_name(1, ext));
            tokio::fs::copy(&doc.path, &target)
                .await
                .map_err(|e| PageError::DocumentRead {
                    document: doc.identity.clone(),
                    detail: format!("failed to stage image: {e}"),
                })?;
            vec![target]
        }
        DocumentKind::Pdf => {
            let identity = doc.identity.clone();
            let pdf = doc.path.clone();
            let out_dir = slot.to_path_buf();
            tokio::task::spawn_blocking(move || rasterizer.rasterize(&identity, &pdf, &out_dir))
                .await
                .map_err(|e| PageError::DocumentRead {
                    document: doc.identity.clone(),
                    detail: format!("render task panicked: {e}"),
                })??
        }
    };

    if files.is_empty() {
        return Err(PageError::DocumentRead {
            document: doc.identity.clone(),
            detail: "document produced no pages".into(),
        });
    }

    debug!("{}: {} page(s) staged", doc.identity, files.len());
    Ok(files
        .into_iter()
        .enumerate()
        .map(|(i, path)| PageUnit {
            document: doc.identity.clone(),
            index: i + 1,
            path,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    struct ThreePages;

    impl PageRasterizer for ThreePages {
        fn rasterize(
            &self,
            _document: &str,
            _pdf: &Path,
            out_dir: &Path,
        ) -> Result<Vec<PathBuf>, PageError> {
            (1..=3)
                .map(|i| -> Result<PathBuf, PageError> {
                    let p = out_dir.join(page_file_name(i, "png"));
                    std::fs::write(&p, b"png").map_err(|e| PageError::DocumentRead {
                        document: "fake".into(),
                        detail: e.to_string(),
                    })?;
                    Ok(p)
                })
                .collect()
        }
    }

    struct Broken;

    impl PageRasterizer for Broken {
        fn rasterize(&self, document: &str, _: &Path, _: &Path) -> Result<Vec<PathBuf>, PageError> {
            Err(PageError::DocumentRead {
                document: document.to_string(),
                detail: "corrupt PDF: bad xref".into(),
            })
        }
    }

    #[tokio::test]
    async fn image_becomes_single_staged_page() {
        let src = tempfile::tempdir().unwrap();
        let slot = tempfile::tempdir().unwrap();
        let path = src.path().join("scan.jpg");
        std::fs::write(&path, b"jpeg-bytes").unwrap();
        let doc = InputDocument {
            identity: "scan.jpg".into(),
            path: path.clone(),
            kind: DocumentKind::Image(ImageFormat::Jpeg),
        };

        let pages = normalize(&doc, slot.path(), Arc::new(Broken)).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].index, 1);
        assert!(pages[0].path.starts_with(slot.path()));
        assert!(path.exists(), "source file must be left alone");
    }

    #[tokio::test]
    async fn pdf_pages_are_indexed_from_one() {
        let slot = tempfile::tempdir().unwrap();
        let doc = InputDocument {
            identity: "report.pdf".into(),
            path: PathBuf::from("report.pdf"),
            kind: DocumentKind::Pdf,
        };
        let pages = normalize(&doc, slot.path(), Arc::new(ThreePages)).await.unwrap();
        let indices: Vec<usize> = pages.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(pages.iter().all(|p| p.document == "report.pdf"));
    }

    #[tokio::test]
    async fn rasteriser_failure_is_reported() {
        let slot = tempfile::tempdir().unwrap();
        let doc = InputDocument {
            identity: "bad.pdf".into(),
            path: PathBuf::from("bad.pdf"),
            kind: DocumentKind::Pdf,
        };
        let err = normalize(&doc, slot.path(), Arc::new(Broken)).await.unwrap_err();
        assert!(err.to_string().contains("bad xref"));
    }
}
