//! Status state machines for download jobs and import tasks
//!
//! Both machines are pure lookups over a fixed transition table. Terminal states
//! have no outgoing edges; callers check [`DownloadJobStatus::is_terminal`] before
//! doing any work and never apply a transition the table rejects.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Status of a download job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadJobStatus {
    /// Created by the enqueue path, not yet submitted
    Created,
    /// Submitted to the downloader
    Enqueued,
    /// Downloader reports progress
    Downloading,
    /// Download finished (terminal)
    Completed,
    /// Gave up (terminal)
    Failed,
    /// Cancelled by a user (terminal)
    Cancelled,
}

impl DownloadJobStatus {
    /// Every status, in lifecycle order
    pub const ALL: [DownloadJobStatus; 6] = [
        DownloadJobStatus::Created,
        DownloadJobStatus::Enqueued,
        DownloadJobStatus::Downloading,
        DownloadJobStatus::Completed,
        DownloadJobStatus::Failed,
        DownloadJobStatus::Cancelled,
    ];

    /// String form used in storage and events
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadJobStatus::Created => "created",
            DownloadJobStatus::Enqueued => "enqueued",
            DownloadJobStatus::Downloading => "downloading",
            DownloadJobStatus::Completed => "completed",
            DownloadJobStatus::Failed => "failed",
            DownloadJobStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses reachable in one step
    pub fn successors(&self) -> &'static [DownloadJobStatus] {
        use DownloadJobStatus::*;
        match self {
            Created => &[Enqueued, Failed, Cancelled],
            // the backend may already hold the finished torrent right after the add
            Enqueued => &[Downloading, Completed, Failed, Cancelled],
            Downloading => &[Completed, Failed, Cancelled],
            Completed | Failed | Cancelled => &[],
        }
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition(&self, to: DownloadJobStatus) -> bool {
        self.successors().contains(&to)
    }

    /// Like [`can_transition`](Self::can_transition) but returns an error naming both states
    pub fn must_transition(&self, to: DownloadJobStatus) -> Result<()> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                kind: "download job",
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }
}

impl std::fmt::Display for DownloadJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DownloadJobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DownloadJobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| Error::Other(format!("unknown download job status: {s}")))
    }
}

/// Status of an import task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportTaskStatus {
    /// Waiting to be picked up
    Pending,
    /// Being placed
    InProgress,
    /// Placed (terminal; a reimport creates a new task)
    Completed,
    /// Placement failed (terminal; a retry creates a new task)
    Failed,
    /// Abandoned before starting (terminal)
    Cancelled,
}

impl ImportTaskStatus {
    /// Every status
    pub const ALL: [ImportTaskStatus; 5] = [
        ImportTaskStatus::Pending,
        ImportTaskStatus::InProgress,
        ImportTaskStatus::Completed,
        ImportTaskStatus::Failed,
        ImportTaskStatus::Cancelled,
    ];

    /// String form used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportTaskStatus::Pending => "pending",
            ImportTaskStatus::InProgress => "in_progress",
            ImportTaskStatus::Completed => "completed",
            ImportTaskStatus::Failed => "failed",
            ImportTaskStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses reachable in one step
    pub fn successors(&self) -> &'static [ImportTaskStatus] {
        use ImportTaskStatus::*;
        match self {
            Pending => &[InProgress, Cancelled],
            InProgress => &[Completed, Failed],
            Completed | Failed | Cancelled => &[],
        }
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition(&self, to: ImportTaskStatus) -> bool {
        self.successors().contains(&to)
    }

    /// Like [`can_transition`](Self::can_transition) but returns an error naming both states
    pub fn must_transition(&self, to: ImportTaskStatus) -> Result<()> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                kind: "import task",
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }

    /// Only finished tasks (successful or not) may be imported again
    pub fn can_reimport(&self) -> bool {
        matches!(self, ImportTaskStatus::Completed | ImportTaskStatus::Failed)
    }
}

impl std::fmt::Display for ImportTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ImportTaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ImportTaskStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| Error::Other(format!("unknown import task status: {s}")))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::DownloadJobStatus as S;
    use super::ImportTaskStatus as I;

    fn expected_job_edges() -> Vec<(S, S)> {
        vec![
            (S::Created, S::Enqueued),
            (S::Created, S::Failed),
            (S::Created, S::Cancelled),
            (S::Enqueued, S::Downloading),
            (S::Enqueued, S::Completed),
            (S::Enqueued, S::Failed),
            (S::Enqueued, S::Cancelled),
            (S::Downloading, S::Completed),
            (S::Downloading, S::Failed),
            (S::Downloading, S::Cancelled),
        ]
    }

    #[test]
    fn job_transitions_match_table_exactly() {
        let edges = expected_job_edges();
        for from in S::ALL {
            for to in S::ALL {
                assert_eq!(
                    from.can_transition(to),
                    edges.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_job_states_have_no_successors() {
        for st in [S::Completed, S::Failed, S::Cancelled] {
            assert!(st.is_terminal());
            assert!(st.successors().is_empty());
        }
        for st in [S::Created, S::Enqueued, S::Downloading] {
            assert!(!st.is_terminal());
        }
    }

    #[test]
    fn enqueued_may_jump_straight_to_completed() {
        assert!(S::Enqueued.can_transition(S::Completed));
        assert!(!S::Created.can_transition(S::Completed));
    }

    #[test]
    fn self_transitions_are_not_edges() {
        for st in S::ALL {
            assert!(!st.can_transition(st));
        }
    }

    #[test]
    fn must_transition_reports_both_states() {
        let err = S::Downloading.must_transition(S::Enqueued).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid download job transition: downloading -> enqueued"
        );
        assert!(S::Created.must_transition(S::Enqueued).is_ok());
    }

    #[test]
    fn job_status_parses_its_own_strings() {
        for st in S::ALL {
            assert_eq!(st.as_str().parse::<S>().unwrap(), st);
        }
        assert!("seeding".parse::<S>().is_err());
    }

    #[test]
    fn import_task_transitions() {
        assert!(I::Pending.can_transition(I::InProgress));
        assert!(I::Pending.can_transition(I::Cancelled));
        assert!(I::InProgress.can_transition(I::Completed));
        assert!(I::InProgress.can_transition(I::Failed));
        assert!(!I::Pending.can_transition(I::Completed));
        assert!(!I::InProgress.can_transition(I::Cancelled));
        for st in [I::Completed, I::Failed, I::Cancelled] {
            assert!(st.is_terminal());
        }
    }

    #[test]
    fn only_finished_tasks_can_be_reimported() {
        assert!(I::Completed.can_reimport());
        assert!(I::Failed.can_reimport());
        assert!(!I::Cancelled.can_reimport());
        assert!(!I::Pending.can_reimport());
        assert!(!I::InProgress.can_reimport());
    }

    #[test]
    fn import_status_uses_snake_case() {
        assert_eq!(I::InProgress.as_str(), "in_progress");
        assert_eq!(
            serde_json::to_string(&I::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!("in_progress".parse::<I>().unwrap(), I::InProgress);
    }
}
