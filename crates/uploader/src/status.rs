//! Job lifecycle states and scheduling strategies.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`TransferJob`](crate::TransferJob).
///
/// The driven order is `pending → ready → chunking → chunked →
/// [hashing → hashed] → [checking → checked] → uploading →
/// {success | error | abort}`. `success` is terminal. `error` and `abort`
/// only leave through a restart back into hashing, checking, or uploading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Ready,
    Hashing,
    Hashed,
    Chunking,
    Chunked,
    Checking,
    Checked,
    Uploading,
    Abort,
    Success,
    Error,
}

impl JobStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Success, _) => false,
            (Pending, Ready) => true,
            (Ready, Chunking | Hashing) => true,
            (Hashing, Hashed) => true,
            (Hashed, Chunking | Checking | Uploading) => true,
            (Chunking, Chunked) => true,
            (Chunked, Hashing | Checking | Uploading) => true,
            // A full resume skip completes the job while it is still checking.
            (Checking, Checked | Success) => true,
            (Checked, Uploading) => true,
            (Uploading, Success) => true,
            (Error | Abort, Chunking | Hashing | Checking | Uploading) => true,
            (Error | Abort, _) => false,
            (_, Error | Abort) => true,
            _ => false,
        }
    }

    /// Returns `true` for `success`, `error` and `abort`.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Abort)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Hashing => "hashing",
            Self::Hashed => "hashed",
            Self::Chunking => "chunking",
            Self::Chunked => "chunked",
            Self::Checking => "checking",
            Self::Checked => "checked",
            Self::Uploading => "uploading",
            Self::Abort => "abort",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable label for a status.
pub fn status_text(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "Waiting to upload",
        JobStatus::Ready => "Ready",
        JobStatus::Hashing => "Computing hash",
        JobStatus::Hashed => "Hash computed",
        JobStatus::Chunking => "Splitting into segments",
        JobStatus::Chunked => "Segments ready",
        JobStatus::Checking => "Checking remote state",
        JobStatus::Checked => "Remote state checked",
        JobStatus::Uploading => "Uploading",
        JobStatus::Abort => "Aborted",
        JobStatus::Success => "Uploaded",
        JobStatus::Error => "Upload failed",
    }
}

/// How a collection of work items is run.
///
/// Used both for a job's segments and for the scheduler's jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Everything at once, no simultaneity bound.
    #[default]
    Concurrent,
    /// One at a time; each settles before the next starts.
    Serial,
}

impl UploadMode {
    /// Decodes the legacy numeric mode flag: `1` selects concurrent, any
    /// other value selects serial.
    pub fn from_flag(flag: i64) -> Self {
        if flag == 1 {
            Self::Concurrent
        } else {
            Self::Serial
        }
    }
}
