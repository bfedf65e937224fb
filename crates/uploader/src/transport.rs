//! The seam between the orchestrator and whatever moves bytes.
//!
//! A [`Transport`] uploads exactly one segment per call. The orchestrator
//! never inspects wire details; it only consumes progress reports and the
//! final success or error payload.

use std::fmt;
use std::sync::Arc;

use segload_transfer::{BoxFuture, ByteRange};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::options::{FormFields, TransferOptions};

/// One segment's upload request.
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub file_name: String,
    /// Form field carrying `bytes`.
    pub field_name: String,
    pub index: usize,
    pub range: ByteRange,
    pub bytes: Vec<u8>,
    /// Resolved extra form fields.
    pub fields: FormFields,
}

/// Outcome of a segment upload: the remote response on success, or the
/// failure payload on error.
pub type TransportResult = Result<Value, Value>;

/// Callback handle through which a transport reports `(loaded, total)`.
#[derive(Clone)]
pub struct ProgressReporter {
    report: Arc<dyn Fn(u64, u64) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(report: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        Self {
            report: Arc::new(report),
        }
    }

    /// A reporter that discards everything.
    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    pub fn report(&self, loaded: u64, total: u64) {
        (self.report)(loaded, total)
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressReporter")
    }
}

/// Performs a single segment upload.
///
/// `cancel` is the in-flight handle: when it fires the transport should
/// stop as soon as it can. The orchestrator also stops waiting on its own
/// once the token is cancelled, so a transport that ignores it is dropped
/// mid-flight.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: SegmentRequest,
        options: &'a TransferOptions,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, TransportResult>;
}
