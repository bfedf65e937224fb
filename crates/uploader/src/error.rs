//! Upload error types.

use serde_json::Value;
use segload_transfer::TransferError;

use crate::events::EventName;

/// Errors produced while admitting, scheduling, or transferring jobs.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("admission rejected: {total} files exceed the limit of {max_count}")]
    AdmissionRejected { total: usize, max_count: usize },

    #[error("halted by {0} hook")]
    VetoHalted(EventName),

    #[error("segment {index} failed: {response}")]
    TransportFailure { index: usize, response: Value },

    #[error("aborted")]
    Aborted,

    #[error("content hash failed: {0}")]
    Hash(#[source] TransferError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
}
