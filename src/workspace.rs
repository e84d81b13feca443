//! Scoped working directory for one extraction run.
//!
//! [`TempWorkspace`] owns the directory tree that holds rasterised pages and
//! downloaded inputs. Release is tied to `Drop`, so the tree disappears on
//! success, on error, on panic unwinding and when the run future is dropped
//! mid-flight. Callers that opt out of cleanup get the path back from
//! [`TempWorkspace::finish`] and own the directory from then on.
//!
//! Every document gets its own slot (`doc-0001`, `doc-0002`, …) so concurrent
//! tasks never write to the same path.

use crate::error::VlenseError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// The run's working directory.
#[derive(Debug)]
pub struct TempWorkspace {
    root: PathBuf,
    clean: bool,
    /// Present when the directory was created by us under the system temp dir.
    managed: Option<TempDir>,
    released: bool,
}

impl TempWorkspace {
    /// Acquire the working directory.
    ///
    /// With an explicit `temp_dir` that already exists, its contents are
    /// destroyed and the directory recreated empty. Any failure to do so is
    /// fatal: mixing stale files into a run is never acceptable.
    pub async fn acquire(temp_dir: Option<&Path>, clean: bool) -> Result<Self, VlenseError> {
        match temp_dir {
            Some(dir) => {
                let exists = tokio::fs::try_exists(dir)
                    .await
                    .map_err(|source| VlenseError::TempStorage {
                        path: dir.to_path_buf(),
                        source,
                    })?;
                if exists {
                    info!("Clearing existing temp directory {}", dir.display());
                    remove_any(dir)
                        .await
                        .map_err(|source| VlenseError::TempStorage {
                            path: dir.to_path_buf(),
                            source,
                        })?;
                }
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|source| VlenseError::TempStorage {
                        path: dir.to_path_buf(),
                        source,
                    })?;
                debug!("Using explicit temp directory {}", dir.display());
                Ok(Self {
                    root: dir.to_path_buf(),
                    clean,
                    managed: None,
                    released: false,
                })
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("vlense-")
                    .tempdir()
                    .map_err(|source| VlenseError::TempStorage {
                        path: std::env::temp_dir(),
                        source,
                    })?;
                debug!("Created temp directory {}", dir.path().display());
                Ok(Self {
                    root: dir.path().to_path_buf(),
                    clean,
                    managed: Some(dir),
                    released: false,
                })
            }
        }
    }

    /// Root of the working tree.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// The private directory of the `ordinal`-th document (0-based) in the batch.
    pub fn document_slot(&self, ordinal: usize) -> PathBuf {
        self.root.join(format!("doc-{:04}", ordinal + 1))
    }

    /// End the run. Returns the directory path when it is being retained.
    pub fn finish(mut self) -> Option<PathBuf> {
        self.release()
    }

    fn release(&mut self) -> Option<PathBuf> {
        if self.released {
            return None;
        }
        self.released = true;

        if !self.clean {
            if let Some(dir) = self.managed.take() {
                let _ = dir.keep();
            }
            info!("Keeping temp directory {}", self.root.display());
            return Some(self.root.clone());
        }

        let result = match self.managed.take() {
            Some(dir) => dir.close(),
            None => match std::fs::remove_dir_all(&self.root) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        match result {
            Ok(()) => debug!("Removed temp directory {}", self.root.display()),
            Err(e) => warn!(
                "Failed to remove temp directory {}: {}",
                self.root.display(),
                e
            ),
        }
        None
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        self.release();
    }
}

/// Remove a directory tree, or a plain file squatting on the path.
async fn remove_any(path: &Path) -> std::io::Result<()> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}
