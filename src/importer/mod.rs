//! Importer: decides which downloaded files become library files and places them
//!
//! - [`select`] - main file of a movie download
//! - [`series`] - season/episode parsing and file-to-episode matching
//! - [`files`] - video/sample predicates and [`hardlink_or_copy`]
//! - [`destination`] - the [`DestinationResolver`] seam for library naming
//!
//! Everything here works on [`RemoteFile`](crate::downloader::RemoteFile) listings
//! and local paths, never on a downloader client. The
//! [`ImportWorker`](crate::worker::ImportWorker) drives placement.

pub mod destination;
pub mod files;
pub mod select;
pub mod series;

pub use destination::{DestinationResolver, with_source_extension};
pub use files::{PlacementMethod, hardlink_or_copy, is_video_path, looks_like_sample};
pub use select::pick_main_movie_file;
pub use series::{SeriesInfo, match_files_to_episodes, parse_series_info};
