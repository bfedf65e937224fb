//! One contiguous byte range of a file and its transfer state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use segload_transfer::{ByteRange, SliceSource, compute_percent};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::UploadError;
use crate::events::{BusEvent, EventBus, EventName, HookResult};
use crate::options::{SegmentContext, TransferOptions};
use crate::transport::{ProgressReporter, SegmentRequest, Transport};

/// Notifications a segment emits to its owning job.
#[derive(Debug, Clone)]
pub enum SegmentEvent {
    Progress { index: usize, loaded: u64, total: u64 },
    Success { index: usize, response: Value },
    Error { index: usize, response: Value },
}

impl BusEvent for SegmentEvent {
    fn name(&self) -> EventName {
        match self {
            Self::Progress { .. } => EventName::Progress,
            Self::Success { .. } => EventName::Success,
            Self::Error { .. } => EventName::Error,
        }
    }
}

#[derive(Debug, Default)]
struct SegmentState {
    percent: f64,
    uploaded: bool,
    uploading: bool,
    response: Option<Value>,
    handle: Option<CancellationToken>,
}

struct SegmentInner {
    index: usize,
    range: ByteRange,
    state: Mutex<SegmentState>,
    events: EventBus<SegmentEvent>,
}

/// Handle to a segment. Clones share state.
#[derive(Clone)]
pub struct Segment {
    inner: Arc<SegmentInner>,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Segment")
            .field("index", &self.inner.index)
            .field("range", &self.inner.range)
            .field("percent", &state.percent)
            .field("uploaded", &state.uploaded)
            .field("uploading", &state.uploading)
            .finish()
    }
}

impl Segment {
    pub fn new(index: usize, range: ByteRange) -> Self {
        Self {
            inner: Arc::new(SegmentInner {
                index,
                range,
                state: Mutex::new(SegmentState::default()),
                events: EventBus::new(),
            }),
        }
    }

    pub fn index(&self) -> usize {
        self.inner.index
    }

    pub fn range(&self) -> ByteRange {
        self.inner.range
    }

    /// Progress in percent, two decimals.
    pub fn percent(&self) -> f64 {
        self.state().percent
    }

    pub fn is_uploaded(&self) -> bool {
        self.state().uploaded
    }

    /// Whether a transport call is in flight.
    pub fn is_uploading(&self) -> bool {
        self.state().uploading
    }

    /// The last success or error payload.
    pub fn response(&self) -> Option<Value> {
        self.state().response.clone()
    }

    pub fn on<F, R>(&self, name: EventName, handler: F)
    where
        F: Fn(&SegmentEvent) -> R + Send + Sync + 'static,
        R: Into<HookResult>,
    {
        self.inner.events.on(name, handler);
    }

    /// Requests cancellation of the in-flight transport call.
    ///
    /// Returns `false` when nothing was in flight.
    pub fn abort(&self) -> bool {
        let handle = self.state().handle.take();
        match handle {
            Some(token) => {
                debug!(segment = self.inner.index, "aborting segment");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Marks the segment complete at 100% and emits `success`.
    pub fn set_success(&self, response: Value) {
        {
            let mut state = self.state();
            state.percent = 100.0;
            state.uploaded = true;
            state.response = Some(response.clone());
        }
        self.inner.events.trigger(&SegmentEvent::Success {
            index: self.inner.index,
            response,
        });
    }

    /// Records a `(loaded, total)` report and emits `progress`.
    pub fn report_progress(&self, loaded: u64, total: u64) {
        self.state().percent = compute_percent(loaded, total);
        self.inner.events.trigger(&SegmentEvent::Progress {
            index: self.inner.index,
            loaded,
            total,
        });
    }

    fn fail(&self, response: Value) {
        self.state().response = Some(response.clone());
        self.inner.events.trigger(&SegmentEvent::Error {
            index: self.inner.index,
            response,
        });
    }

    /// Reads this segment's bytes, resolves the form data and sends it.
    ///
    /// `ctx` carries the job-level fields; index, range and bytes are filled
    /// in here. The in-flight handle is a child of `parent`, so cancelling
    /// the job's attempt token cancels this call too. A cancelled call
    /// settles as [`UploadError::Aborted`] without an `error` event.
    pub async fn upload(
        &self,
        file: &dyn SliceSource,
        mut ctx: SegmentContext,
        options: &TransferOptions,
        transport: &dyn Transport,
        parent: &CancellationToken,
    ) -> Result<(), UploadError> {
        let index = self.inner.index;
        let range = self.inner.range;
        if parent.is_cancelled() {
            return Err(UploadError::Aborted);
        }

        let bytes = match file.read_range(range).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(segment = index, error = %err, "failed to read segment");
                self.fail(json!({ "error": err.to_string() }));
                return Err(err.into());
            }
        };
        ctx.index = index;
        ctx.range = range;
        ctx.bytes = bytes;
        let fields = options.data.resolve(&ctx).await;

        if parent.is_cancelled() {
            return Err(UploadError::Aborted);
        }
        let token = parent.child_token();
        {
            let mut state = self.state();
            state.uploading = true;
            state.handle = Some(token.clone());
        }

        let request = SegmentRequest {
            file_name: ctx.file_name,
            field_name: options.field_name.clone(),
            index,
            range,
            bytes: ctx.bytes,
            fields,
        };
        let progress = {
            let segment = self.clone();
            ProgressReporter::new(move |loaded, total| segment.report_progress(loaded, total))
        };
        debug!(segment = index, start = range.start, end = range.end, "sending segment");

        let outcome = tokio::select! {
            biased;
            result = transport.send(request, options, progress, token.clone()) => Some(result),
            _ = token.cancelled() => None,
        };

        {
            let mut state = self.state();
            state.uploading = false;
            state.handle = None;
        }

        match outcome {
            Some(Ok(response)) => {
                debug!(segment = index, "segment uploaded");
                self.set_success(response);
                Ok(())
            }
            Some(Err(response)) if !token.is_cancelled() => {
                warn!(segment = index, %response, "segment failed");
                self.fail(response.clone());
                Err(UploadError::TransportFailure { index, response })
            }
            _ => {
                debug!(segment = index, "segment cancelled");
                Err(UploadError::Aborted)
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, SegmentState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FormFields;
    use crate::test_support::{Behaviour, Call, ScriptedTransport};
    use segload_transfer::MemoryFile;

    fn ctx() -> SegmentContext {
        SegmentContext {
            file_name: "f.bin".into(),
            file_size: 10,
            content_hash: String::new(),
            segment_count: 2,
            metadata: FormFields::new(),
            index: 0,
            range: ByteRange::whole(0),
            bytes: Vec::new(),
        }
    }

    fn file() -> MemoryFile {
        MemoryFile::new("f.bin", b"0123456789".to_vec())
    }

    fn record(segment: &Segment) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in [EventName::Progress, EventName::Success, EventName::Error] {
            let seen = Arc::clone(&seen);
            segment.on(name, move |event: &SegmentEvent| {
                seen.lock().unwrap().push(event.name().to_string());
            });
        }
        seen
    }

    #[tokio::test]
    async fn success_marks_complete() {
        let segment = Segment::new(1, ByteRange::new(5, 10));
        let seen = record(&segment);
        let transport = ScriptedTransport::new(Behaviour::Succeed);
        let token = CancellationToken::new();

        segment
            .upload(&file(), ctx(), &TransferOptions::default(), &transport, &token)
            .await
            .unwrap();

        assert!(segment.is_uploaded());
        assert!(!segment.is_uploading());
        assert_eq!(segment.percent(), 100.0);
        assert_eq!(*seen.lock().unwrap(), vec!["progress", "progress", "success"]);
        let sent = transport.requests();
        assert_eq!(sent[0].bytes, b"56789");
        assert_eq!(sent[0].field_name, "file");
    }

    #[tokio::test]
    async fn failure_records_response() {
        let segment = Segment::new(0, ByteRange::new(0, 5));
        let seen = record(&segment);
        let transport = ScriptedTransport::new(Behaviour::Fail);
        let token = CancellationToken::new();

        let err = segment
            .upload(&file(), ctx(), &TransferOptions::default(), &transport, &token)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::TransportFailure { index: 0, .. }));
        assert!(!segment.is_uploaded());
        assert!(segment.response().is_some());
        assert_eq!(seen.lock().unwrap().last().unwrap(), "error");
    }

    #[tokio::test]
    async fn cancelled_parent_never_sends() {
        let segment = Segment::new(0, ByteRange::new(0, 5));
        let transport = ScriptedTransport::new(Behaviour::Succeed);
        let token = CancellationToken::new();
        token.cancel();

        let err = segment
            .upload(&file(), ctx(), &TransferOptions::default(), &transport, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Aborted));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn abort_settles_without_error_event() {
        let segment = Segment::new(0, ByteRange::new(0, 5));
        let seen = record(&segment);
        let transport = ScriptedTransport::new(Behaviour::HangUntilCancelled);
        let token = CancellationToken::new();
        let file = file();
        let options = TransferOptions::default();

        let upload = segment.upload(&file, ctx(), &options, &transport, &token);
        let abort = async {
            while !segment.is_uploading() {
                tokio::task::yield_now().await;
            }
            assert!(segment.abort());
        };
        let (result, ()) = tokio::join!(upload, abort);

        assert!(matches!(result, Err(UploadError::Aborted)));
        assert!(!seen.lock().unwrap().contains(&"error".to_string()));
        assert_eq!(transport.cancelled(), vec![0]);
        assert!(!segment.abort());
    }

    #[tokio::test]
    async fn read_failure_is_reported() {
        let segment = Segment::new(0, ByteRange::new(5, 20));
        let seen = record(&segment);
        let transport = ScriptedTransport::new(Behaviour::Succeed);
        let token = CancellationToken::new();

        let err = segment
            .upload(&file(), ctx(), &TransferOptions::default(), &transport, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transfer(_)));
        assert_eq!(*seen.lock().unwrap(), vec!["error"]);
        assert!(!transport.calls().contains(&Call::Started(0)));
    }
}
