//! File predicates and placement.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{Error, Result};

/// Extensions treated as video, lowercase without the dot
pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "m2ts"];

/// True if the path has a recognized video extension (case-insensitive)
#[must_use]
pub fn is_video_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// True if anywhere in the path contains "sample" (case-insensitive)
#[must_use]
pub fn looks_like_sample(path: &str) -> bool {
    path.to_lowercase().contains("sample")
}

/// How a file ended up at its destination
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMethod {
    /// Hardlink to the source
    Hardlink,
    /// Full copy
    Copy,
}

impl PlacementMethod {
    /// String form stored on import tasks
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementMethod::Hardlink => "hardlink",
            PlacementMethod::Copy => "copy",
        }
    }
}

impl std::fmt::Display for PlacementMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Place `src` at `dst`, hardlinking when possible and copying otherwise
///
/// Parent directories of `dst` are created. A copy is written to a temporary file
/// next to `dst` and renamed into place, so `dst` never exists half-written.
pub async fn hardlink_or_copy(src: &Path, dst: &Path) -> Result<PlacementMethod> {
    if let Some(parent) = dst.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await.map_err(|e| {
            Error::Io(e).context(format!("create destination directory {}", parent.display()))
        })?;
    }

    match fs::hard_link(src, dst).await {
        Ok(()) => {
            tracing::debug!(src = %src.display(), dst = %dst.display(), "hardlinked file");
            return Ok(PlacementMethod::Hardlink);
        }
        Err(e) => {
            tracing::debug!(
                error = %e,
                src = %src.display(),
                dst = %dst.display(),
                "hardlink failed, falling back to copy"
            );
        }
    }

    let tmp = temp_path(dst);
    if let Err(e) = fs::copy(src, &tmp).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(Error::Io(e).context(format!("copy {}", src.display())));
    }
    if let Err(e) = fs::rename(&tmp, dst).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(Error::Io(e).context(format!("move copy into place at {}", dst.display())));
    }

    tracing::debug!(src = %src.display(), dst = %dst.display(), "copied file");
    Ok(PlacementMethod::Copy)
}

/// Hidden, uniquely named sibling of `dst`
fn temp_path(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("import");
    dst.with_file_name(format!(".{name}.{}.partial", uuid::Uuid::new_v4().simple()))
}
