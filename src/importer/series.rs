//! Season/episode parsing and file-to-episode matching.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use super::files::{is_video_path, looks_like_sample};
use crate::downloader::RemoteFile;

/// `S01E01`, `S01E01E02`, `S01E01-E02`, `S01E01-02`
#[allow(clippy::expect_used)]
static STANDARD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)s(\d+)e(\d+)(?:-?e?(\d+))?").expect("Invalid standard episode pattern")
});

/// `1x05`
#[allow(clippy::expect_used)]
static ALTERNATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)x(\d+)").expect("Invalid alternate episode pattern"));

/// Episodes farther apart than this are two discrete episodes, not a range
const MAX_RANGE_SPAN: i64 = 10;

/// Season and episodes found in a file name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeriesInfo {
    /// Season number
    pub season: i64,
    /// Episode numbers, in file order
    pub episodes: Vec<i64>,
}

/// Parse season and episode numbers out of a file name
pub fn parse_series_info(filename: &str) -> Option<SeriesInfo> {
    if let Some(caps) = STANDARD_PATTERN.captures(filename) {
        let season = caps.get(1)?.as_str().parse().ok()?;
        let first: i64 = caps.get(2)?.as_str().parse().ok()?;
        let mut episodes = vec![first];

        if let Some(second) = caps.get(3).and_then(|m| m.as_str().parse::<i64>().ok()) {
            if second > first && second - first < MAX_RANGE_SPAN {
                episodes.extend(first + 1..=second);
            } else {
                episodes.push(second);
            }
        }

        return Some(SeriesInfo { season, episodes });
    }

    let caps = ALTERNATE_PATTERN.captures(filename)?;
    Some(SeriesInfo {
        season: caps.get(1)?.as_str().parse().ok()?,
        episodes: vec![caps.get(2)?.as_str().parse().ok()?],
    })
}

/// Map episode numbers to the files that contain them
///
/// Only non-sample video files whose base name parses are considered. With a
/// target season, other seasons are dropped; with a target episode, only files
/// containing it are kept. A multi-episode file maps every episode it holds. When
/// two files claim the same episode the larger one wins.
pub fn match_files_to_episodes(
    files: &[RemoteFile],
    target_season: Option<i64>,
    target_episode: Option<i64>,
) -> BTreeMap<i64, RemoteFile> {
    let mut matched: BTreeMap<i64, RemoteFile> = BTreeMap::new();

    for file in files {
        if !is_video_path(&file.path) || looks_like_sample(&file.path) {
            continue;
        }

        let name = Path::new(&file.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&file.path);
        let Some(info) = parse_series_info(name) else {
            continue;
        };

        if target_season.is_some_and(|s| s != info.season) {
            continue;
        }
        if target_episode.is_some_and(|e| !info.episodes.contains(&e)) {
            continue;
        }

        for episode in info.episodes {
            match matched.get(&episode) {
                Some(existing) if existing.size >= file.size => {}
                _ => {
                    matched.insert(episode, file.clone());
                }
            }
        }
    }

    matched
}
