//! Input resolution: turn a user-supplied path or URL into an
//! [`InputDocument`] with a local file and a detected kind.
//!
//! URLs are downloaded into the document's workspace slot, so the download
//! lives and dies with the run's [`crate::workspace::TempWorkspace`]. Kind
//! detection looks at magic bytes, never at the file extension: a `.pdf`
//! that is really a PNG is treated as a PNG.

use crate::error::PageError;
use image::ImageFormat;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Image formats accepted as single-page documents.
const ACCEPTED_IMAGES: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
];

/// What a document turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image(ImageFormat),
}

/// A caller-supplied document, resolved to a local file.
#[derive(Debug, Clone)]
pub struct InputDocument {
    /// The path or URL exactly as the caller gave it.
    pub identity: String,
    /// Local file holding the document bytes.
    pub path: PathBuf,
    pub kind: DocumentKind,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `identity` to a local, kind-checked document.
///
/// `slot` is the document's private workspace directory; it must exist.
pub async fn resolve_input(
    identity: &str,
    slot: &Path,
    timeout_secs: u64,
) -> Result<InputDocument, PageError> {
    if is_url(identity) {
        download_url(identity, slot, timeout_secs).await
    } else {
        resolve_local(identity)
    }
}

/// Classify a document from its leading bytes.
pub fn detect_kind(document: &str, head: &[u8]) -> Result<DocumentKind, PageError> {
    if head.is_empty() {
        return Err(PageError::DocumentRead {
            document: document.to_string(),
            detail: "file is empty".into(),
        });
    }
    if head.starts_with(b"%PDF") {
        return Ok(DocumentKind::Pdf);
    }
    match image::guess_format(head) {
        Ok(format) if ACCEPTED_IMAGES.contains(&format) => Ok(DocumentKind::Image(format)),
        Ok(format) => Err(PageError::UnsupportedFormat {
            document: document.to_string(),
            detail: format!("image format {format:?} is not accepted"),
        }),
        Err(_) => {
            let n = head.len().min(4);
            Err(PageError::UnsupportedFormat {
                document: document.to_string(),
                detail: format!("neither a PDF nor a recognised image (first bytes: {:?})", &head[..n]),
            })
        }
    }
}

/// Resolve a local file path, validating existence and magic bytes.
fn resolve_local(identity: &str) -> Result<InputDocument, PageError> {
    let path = PathBuf::from(identity);
    let read_err = |detail: String| PageError::DocumentRead {
        document: identity.to_string(),
        detail,
    };

    if !path.is_file() {
        return Err(read_err("file not found".into()));
    }

    let mut head = Vec::with_capacity(32);
    match std::fs::File::open(&path) {
        Ok(f) => {
            f.take(32)
                .read_to_end(&mut head)
                .map_err(|e| read_err(e.to_string()))?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(read_err("permission denied".into()));
        }
        Err(e) => return Err(read_err(e.to_string())),
    }

    let kind = detect_kind(identity, &head)?;
    debug!("Resolved local document {} as {:?}", path.display(), kind);
    Ok(InputDocument {
        identity: identity.to_string(),
        path,
        kind,
    })
}

/// Download a URL into `slot` and classify the bytes.
async fn download_url(
    url: &str,
    slot: &Path,
    timeout_secs: u64,
) -> Result<InputDocument, PageError> {
    info!("Downloading document from: {}", url);
    let read_err = |detail: String| PageError::DocumentRead {
        document: url.to_string(),
        detail,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| read_err(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            read_err(format!("download timed out after {timeout_secs}s"))
        } else {
            read_err(format!("download failed: {e}"))
        }
    })?;

    if !response.status().is_success() {
        return Err(read_err(format!("download failed: HTTP {}", response.status())));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| read_err(format!("download failed: {e}")))?;

    let kind = detect_kind(url, &bytes)?;
    let file_path = slot.join(format!("source-{}", extract_filename(url)));
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| read_err(format!("failed to store download: {e}")))?;

    info!("Downloaded {} bytes to {}", bytes.len(), file_path.display());
    Ok(InputDocument {
        identity: url.to_string(),
        path: file_path,
        kind,
    })
}

/// A filesystem-safe name taken from the last URL path segment.
fn extract_filename(url: &str) -> String {
    let last = reqwest::Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
    });

    let name: String = last
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if name.is_empty() || name.chars().all(|c| c == '.') {
        "download".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn detects_pdf_and_images() {
        assert_eq!(detect_kind("a", b"%PDF-1.7\n").unwrap(), DocumentKind::Pdf);
        assert_eq!(
            detect_kind("b", PNG_MAGIC).unwrap(),
            DocumentKind::Image(ImageFormat::Png)
        );
        assert_eq!(
            detect_kind("c", &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]).unwrap(),
            DocumentKind::Image(ImageFormat::Jpeg)
        );
    }

    #[test]
    fn rejects_unknown_bytes() {
        let err = detect_kind("notes.txt", b"hello world").unwrap_err();
        assert!(matches!(err, PageError::UnsupportedFormat { .. }));
    }

    #[test]
    fn empty_file_is_a_read_error() {
        let err = detect_kind("empty.pdf", b"").unwrap_err();
        assert!(matches!(err, PageError::DocumentRead { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = resolve_local("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, PageError::DocumentRead { ref document, .. } if document == "/definitely/not/here.pdf"));
    }

    #[test]
    fn local_file_kind_ignores_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actually-a-png.pdf");
        std::fs::write(&path, PNG_MAGIC).unwrap();
        let doc = resolve_local(path.to_str().unwrap()).unwrap();
        assert_eq!(doc.kind, DocumentKind::Image(ImageFormat::Png));
        assert_eq!(doc.path, path);
    }

    #[test]
    fn filename_from_url() {
        assert_eq!(extract_filename("https://x.org/papers/a b.pdf"), "a_20b.pdf");
        assert_eq!(extract_filename("https://x.org/"), "download");
        assert_eq!(extract_filename("https://x.org/scan.png?dl=1"), "scan.png");
    }
}
