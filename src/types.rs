//! Core types for media-dl

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{DownloaderError, Error, ErrorCategory};
pub use crate::state::{DownloadJobStatus, ImportTaskStatus};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                Ok(Self(<i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?))
            }
        }
    };
}

// Stores a string-backed enum as TEXT via its `as_str` / `FromStr` pair
macro_rules! sqlx_text_enum {
    ($name:ty) => {
        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <String as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.as_str().to_string(), buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(s.parse::<$name>()?)
            }
        }
    };
}

id_type!(
    /// Unique identifier for a download job
    DownloadJobId
);

id_type!(
    /// Unique identifier for an import task
    ImportTaskId
);

sqlx_text_enum!(DownloadJobStatus);
sqlx_text_enum!(ImportTaskStatus);
sqlx_text_enum!(MediaType);
sqlx_text_enum!(InstanceId);

impl sqlx::Type<sqlx::Sqlite> for ErrorCategory {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ErrorCategory {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.as_str().to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ErrorCategory {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(ErrorCategory::from_str_lossy(&s))
    }
}

/// Identity of a configured downloader connection (a UUID in canonical form)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Generate a fresh random instance id
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Parse and normalize a UUID string
    pub fn parse(s: &str) -> Result<Self, Error> {
        uuid::Uuid::parse_str(s.trim())
            .map(|u| Self(u.hyphenated().to_string()))
            .map_err(|_| DownloaderError::InvalidInstanceId(s.to_string()).into())
    }

    /// Canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<uuid::Uuid> for InstanceId {
    fn from(u: uuid::Uuid) -> Self {
        Self(u.hyphenated().to_string())
    }
}

/// Transfer protocol of a release link
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Magnet URI or .torrent URL
    Torrent,
    /// NZB URL
    Usenet,
}

impl Protocol {
    /// String form used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Torrent => "torrent",
            Protocol::Usenet => "usenet",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "torrent" => Ok(Protocol::Torrent),
            "usenet" => Ok(Protocol::Usenet),
            other => Err(Error::Other(format!("unknown protocol: {other}"))),
        }
    }
}

/// Kind of media a job downloads
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// A single movie file
    Movie,
    /// One or more episodes of a series
    Series,
}

impl MediaType {
    /// String form used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
        }
    }
}

impl std::str::FromStr for MediaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "series" => Ok(MediaType::Series),
            other => Err(Error::Other(format!("unknown media type: {other}"))),
        }
    }
}

/// Persistent record tracking one release from submission through import
#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct DownloadJob {
    /// Unique database ID
    pub id: DownloadJobId,
    /// Current state-machine status
    pub status: DownloadJobStatus,
    /// "torrent" or "usenet"; kept raw so bad input surfaces as a job failure
    pub protocol: String,
    /// Magnet URI, .torrent URL or NZB URL
    pub candidate_link: String,
    /// Release title, for display
    pub candidate_title: Option<String>,
    /// Configured downloader to use
    pub downloader_id: InstanceId,
    /// Backend-assigned id (infohash); set once enqueued
    pub downloader_external_id: Option<String>,
    /// Backend-native status string from the last poll
    pub downloader_status: Option<String>,
    /// Progress fraction (0.0-1.0) from the last poll
    pub progress: Option<f64>,
    /// Save path reported by the backend
    pub save_path: Option<String>,
    /// Content path reported by the backend
    pub content_path: Option<String>,
    /// Number of failed attempts so far
    pub attempt_count: i64,
    /// Message of the last error
    pub last_error: Option<String>,
    /// Category of the last error
    pub last_error_category: Option<ErrorCategory>,
    /// Unix timestamp before which the job is not picked up
    pub next_run_at: i64,
    /// Movie or series
    pub media_type: MediaType,
    /// Target media item
    pub media_item_id: i64,
    /// Target episode for single-episode series jobs
    pub episode_id: Option<i64>,
    /// Target library
    pub library_id: i64,
    /// Naming template for placed files
    pub name_template_id: i64,
    /// Unix timestamp of creation
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
}

/// New download job to be inserted by the enqueue path
#[derive(Clone, Debug)]
pub struct NewDownloadJob {
    /// "torrent" or "usenet"
    pub protocol: String,
    /// Magnet URI, .torrent URL or NZB URL
    pub candidate_link: String,
    /// Release title
    pub candidate_title: Option<String>,
    /// Configured downloader to use
    pub downloader_id: InstanceId,
    /// Movie or series
    pub media_type: MediaType,
    /// Target media item
    pub media_item_id: i64,
    /// Target episode, if the release covers exactly one
    pub episode_id: Option<i64>,
    /// Target library
    pub library_id: i64,
    /// Naming template
    pub name_template_id: i64,
}

/// Latest backend state copied onto a job after a poll
#[derive(Clone, Debug)]
pub struct JobSnapshot {
    /// Mapped job status
    pub status: DownloadJobStatus,
    /// Backend-native status string
    pub downloader_status: String,
    /// Progress fraction
    pub progress: f64,
    /// Save path
    pub save_path: String,
    /// Content path
    pub content_path: String,
}

/// One file-placement unit spawned from a completed download job
#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct ImportTask {
    /// Unique database ID
    pub id: ImportTaskId,
    /// Originating job
    pub download_job_id: DownloadJobId,
    /// Import status
    pub status: ImportTaskStatus,
    /// File to import
    pub source_path: String,
    /// Where the file was placed
    pub dest_path: Option<String>,
    /// "hardlink" or "copy"
    pub import_method: Option<String>,
    /// Task this one re-imports
    pub previous_task_id: Option<ImportTaskId>,
    /// Movie or series
    pub media_type: MediaType,
    /// Target media item
    pub media_item_id: i64,
    /// Target episode (series only)
    pub episode_id: Option<i64>,
    /// Target library
    pub library_id: i64,
    /// Naming template
    pub name_template_id: i64,
    /// Message of the last error
    pub last_error: Option<String>,
    /// Failed attempts so far
    pub attempt_count: i64,
    /// Category of the last error
    pub last_error_category: Option<ErrorCategory>,
    /// Unix timestamp before which the task is not claimed
    pub next_run_at: i64,
    /// Unix timestamp of creation
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
}

/// New import task
#[derive(Clone, Debug)]
pub struct NewImportTask {
    /// Originating job
    pub download_job_id: DownloadJobId,
    /// File to import
    pub source_path: String,
    /// Task being re-imported, if any
    pub previous_task_id: Option<ImportTaskId>,
    /// Movie or series
    pub media_type: MediaType,
    /// Target media item
    pub media_item_id: i64,
    /// Target episode (series only)
    pub episode_id: Option<i64>,
    /// Target library
    pub library_id: i64,
    /// Naming template
    pub name_template_id: i64,
}

/// Kind of audit event recorded against a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventType {
    /// Status moved from one state to another
    StatusChanged,
    /// A processing step failed
    Error,
    /// A transient failure was scheduled for another attempt
    RetryScheduled,
}

impl JobEventType {
    /// String form used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventType::StatusChanged => "status_changed",
            JobEventType::Error => "error",
            JobEventType::RetryScheduled => "retry_scheduled",
        }
    }
}

/// Immutable audit record for a job
#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct JobEvent {
    /// Unique database ID
    pub id: i64,
    /// Job this event belongs to
    pub download_job_id: DownloadJobId,
    /// "status_changed", "error" or "retry_scheduled"
    pub event_type: String,
    /// Free-text message
    pub message: Option<String>,
    /// Structured metadata as JSON text
    pub metadata: Option<String>,
    /// Unix timestamp
    pub created_at: i64,
}

/// Event to append to a job's audit trail
#[derive(Clone, Debug)]
pub struct NewJobEvent {
    /// Job this event belongs to
    pub download_job_id: DownloadJobId,
    /// Event kind
    pub event_type: JobEventType,
    /// Free-text message
    pub message: Option<String>,
    /// Structured metadata
    pub metadata: Option<serde_json::Value>,
}

/// Stored configuration of a downloader instance
#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct DownloaderRecord {
    /// Instance identity
    pub id: InstanceId,
    /// Display name
    pub name: String,
    /// Type tag, e.g. "qbittorrent"
    pub kind: String,
    /// Protocol this downloader serves ("torrent" or "usenet")
    pub protocol: String,
    /// Base URL
    pub url: String,
    /// Login user
    pub username: Option<String>,
    /// Login password
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Type-specific JSON config as text
    pub config_json: Option<String>,
    /// Disabled downloaders are never built
    pub enabled: bool,
    /// Default downloader for its protocol
    pub is_default: bool,
    /// Unix timestamp of creation
    pub created_at: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
}

impl DownloaderRecord {
    /// Convert into the record a registry builder consumes
    pub fn to_config_record(&self) -> Result<crate::downloader::ConfigRecord, Error> {
        let config = match self.config_json.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
                Error::permanent(Error::Config {
                    message: format!("invalid config JSON for downloader {}: {e}", self.id),
                    key: Some("config_json".to_string()),
                })
            })?),
        };

        Ok(crate::downloader::ConfigRecord {
            id: self.id.clone(),
            kind: self.kind.clone(),
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            config,
        })
    }
}

/// Downloader configuration to insert or update
#[derive(Clone, Debug)]
pub struct NewDownloader {
    /// Display name
    pub name: String,
    /// Type tag
    pub kind: String,
    /// Protocol served
    pub protocol: Protocol,
    /// Base URL
    pub url: String,
    /// Login user
    pub username: Option<String>,
    /// Login password
    pub password: Option<String>,
    /// Type-specific JSON config
    pub config: Option<serde_json::Value>,
    /// Whether the manager should build it
    pub enabled: bool,
}

/// Season record of a series
#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct Season {
    /// Unique database ID
    pub id: i64,
    /// Series this season belongs to
    pub media_item_id: i64,
    /// Season number
    pub season_number: i64,
}

/// Episode record of a season
#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct Episode {
    /// Unique database ID
    pub id: i64,
    /// Season this episode belongs to
    pub season_id: i64,
    /// Episode number within the season
    pub episode_number: i64,
    /// Episode title
    pub title: Option<String>,
}

/// Event broadcast to subscribers
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A job snapshot was persisted; carries the full updated record
    DownloadJobUpdated {
        /// Updated job
        job: DownloadJob,
    },

    /// An import task was spawned for a completed job
    ImportTaskCreated {
        /// Originating job
        job_id: DownloadJobId,
        /// New task
        task_id: ImportTaskId,
    },

    /// An import task changed status; carries the full updated record
    ImportTaskUpdated {
        /// Updated task
        task: ImportTask,
    },

    /// The worker loops stopped
    Shutdown,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_normalizes_uuid() {
        let id = InstanceId::parse("  6F9619FF-8B86-D011-B42D-00C04FC964FF ").unwrap();
        assert_eq!(id.as_str(), "6f9619ff-8b86-d011-b42d-00c04fc964ff");
    }

    #[test]
    fn instance_id_rejects_garbage() {
        let err = InstanceId::parse("not-a-uuid").unwrap_err();
        assert!(matches!(
            err,
            Error::Downloader(DownloaderError::InvalidInstanceId(_))
        ));
    }

    #[test]
    fn protocol_parses_known_values_only() {
        assert_eq!("torrent".parse::<Protocol>().unwrap(), Protocol::Torrent);
        assert_eq!("usenet".parse::<Protocol>().unwrap(), Protocol::Usenet);
        assert!("ftp".parse::<Protocol>().is_err());
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::ImportTaskCreated {
            job_id: DownloadJobId(3),
            task_id: ImportTaskId(9),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "import_task_created");
        assert_eq!(json["job_id"], 3);
        assert_eq!(json["task_id"], 9);
    }

    fn downloader_record(config_json: Option<&str>) -> DownloaderRecord {
        DownloaderRecord {
            id: InstanceId::new_v4(),
            name: "qb".into(),
            kind: "qbittorrent".into(),
            protocol: "torrent".into(),
            url: "http://qb:8080".into(),
            username: Some("admin".into()),
            password: Some("secret".into()),
            config_json: config_json.map(str::to_string),
            enabled: true,
            is_default: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn downloader_record_parses_config_json() {
        let rec = downloader_record(Some(r#"{"timeout_secs": 5}"#))
            .to_config_record()
            .unwrap();
        assert_eq!(rec.config.unwrap()["timeout_secs"], 5);
        assert_eq!(rec.username.as_deref(), Some("admin"));
    }

    #[test]
    fn blank_config_json_means_no_config() {
        assert!(
            downloader_record(Some("  "))
                .to_config_record()
                .unwrap()
                .config
                .is_none()
        );
        assert!(downloader_record(None).to_config_record().unwrap().config.is_none());
    }

    #[test]
    fn malformed_config_json_is_permanent() {
        let err = downloader_record(Some("{nope")).to_config_record().unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn downloader_password_is_never_serialized() {
        let json = serde_json::to_value(downloader_record(None)).unwrap();
        assert!(json.get("password").is_none());
    }

    #[test]
    fn job_event_type_strings() {
        assert_eq!(JobEventType::StatusChanged.as_str(), "status_changed");
        assert_eq!(JobEventType::RetryScheduled.as_str(), "retry_scheduled");
    }
}
