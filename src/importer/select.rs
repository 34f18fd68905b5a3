//! Main file selection for movie downloads.

use super::files::{is_video_path, looks_like_sample};
use crate::downloader::RemoteFile;

/// Pick the file that is the movie
///
/// In order of preference:
/// 1. largest non-sample video file
/// 2. largest non-sample file of any kind
/// 3. largest file
///
/// Tiers 1 and 2 ignore empty files. Returns `None` only for an empty listing.
pub fn pick_main_movie_file(files: &[RemoteFile]) -> Option<&RemoteFile> {
    largest(
        files
            .iter()
            .filter(|f| f.size > 0 && is_video_path(&f.path) && !looks_like_sample(&f.path)),
    )
    .or_else(|| largest(files.iter().filter(|f| f.size > 0 && !looks_like_sample(&f.path))))
    .or_else(|| largest(files.iter()))
}

// First of equally sized files wins
fn largest<'a>(candidates: impl Iterator<Item = &'a RemoteFile>) -> Option<&'a RemoteFile> {
    candidates.fold(None, |best: Option<&'a RemoteFile>, f| match best {
        Some(b) if b.size >= f.size => Some(b),
        _ => Some(f),
    })
}
