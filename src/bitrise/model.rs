//! Wire types for the Bitrise v0.1 API.

use crate::diff::Diffable;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Bitrise reports build status as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "i64")]
pub enum BuildStatus {
    NotFinished,
    Success,
    Failed,
    AbortedWithFailure,
    AbortedWithSuccess,
    Unknown(i64),
}

impl From<i64> for BuildStatus {
    fn from(code: i64) -> Self {
        match code {
            0 => BuildStatus::NotFinished,
            1 => BuildStatus::Success,
            2 => BuildStatus::Failed,
            3 => BuildStatus::AbortedWithFailure,
            4 => BuildStatus::AbortedWithSuccess,
            other => BuildStatus::Unknown(other),
        }
    }
}

impl BuildStatus {
    pub fn is_finished(self) -> bool {
        !matches!(self, BuildStatus::NotFinished)
    }

    pub fn is_aborted(self) -> bool {
        matches!(
            self,
            BuildStatus::AbortedWithFailure | BuildStatus::AbortedWithSuccess
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildRecord {
    pub slug: String,
    pub build_number: u64,
    pub status: BuildStatus,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub triggered_workflow: String,
    #[serde(default)]
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub pull_request_id: Option<u64>,
    #[serde(default)]
    pub abort_reason: Option<String>,
    #[serde(default)]
    pub triggered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_on_worker_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_on_hold: bool,
}

impl BuildRecord {
    pub fn is_running(&self) -> bool {
        !self.status.is_finished()
    }

    /// Tag wins over branch: tag builds also carry the branch they were cut from.
    pub fn git_ref_label(&self) -> Option<&str> {
        self.tag
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.branch.as_deref().filter(|b| !b.is_empty()))
    }
}

impl Diffable for BuildRecord {
    type Key = u64;

    fn diff_key(&self) -> u64 {
        self.build_number
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub total_item_count: Option<u64>,
    #[serde(default)]
    pub page_item_limit: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildsPage {
    #[serde(default)]
    pub data: Vec<BuildRecord>,
    #[serde(default)]
    pub paging: Paging,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AbortResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_msg: Option<String>,
}

/// Error bodies use `error_msg` on some endpoints and `message` on others.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub(crate) fn into_message(self) -> Option<String> {
        self.error_msg
            .or(self.message)
            .filter(|m| !m.trim().is_empty())
    }
}

/// Build-trigger hook response. Every field is optional; the hook is treated
/// as fire-and-forget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TriggerResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub build_slug: Option<String>,
    #[serde(default)]
    pub build_number: Option<u64>,
    #[serde(default)]
    pub build_url: Option<String>,
    #[serde(default)]
    pub triggered_workflow: Option<String>,
}
