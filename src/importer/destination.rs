//! Where an import task's file lands in the library.
//!
//! Naming is owned by the embedding application (library roots, naming
//! templates, media metadata); the import worker only asks a
//! [`DestinationResolver`] for the final path.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::ImportTask;

/// Computes the library path an import task's file is placed at
///
/// Return a permanent error (see [`ResultExt::permanent`](crate::ResultExt::permanent))
/// for tasks that can never be named, such as a deleted library. Other errors
/// are retried with backoff.
#[async_trait]
pub trait DestinationResolver: Send + Sync {
    /// Absolute destination path; the source file's extension is appended when missing
    async fn resolve(&self, task: &ImportTask) -> Result<PathBuf>;
}

/// `dest` with the extension of `source` appended unless it already ends with it
///
/// The comparison ignores case. Nothing is replaced, so dotted names such as
/// `Movie (2024) 1080p.x264` keep every part.
#[must_use]
pub fn with_source_extension(dest: PathBuf, source: &Path) -> PathBuf {
    let Some(ext) = source.extension().and_then(|e| e.to_str()) else {
        return dest;
    };

    let suffix = format!(".{}", ext.to_lowercase());
    if dest.to_string_lossy().to_lowercase().ends_with(&suffix) {
        return dest;
    }

    let mut path = OsString::from(dest);
    path.push(".");
    path.push(ext);
    PathBuf::from(path)
}
