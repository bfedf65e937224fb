//! One file's upload lifecycle.
//!
//! A [`TransferJob`] cuts its file into [`Segment`]s, optionally hashes it,
//! optionally asks a [`ResumeCheck`] which segments the remote side already
//! holds, and then uploads the rest either one at a time or all at once.
//! Every status change goes through [`JobStatus::can_transition_to`] and
//! emits `statusChange`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use futures_util::future::join_all;
use segload_transfer::{ByteRange, SliceSource, mean_percent, plan_segments};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::UploadError;
use crate::events::{EventBus, EventName, HookResult, UploadEvent};
use crate::hasher::ContentHasher;
use crate::options::{FormFields, SegmentContext, TransferOptions};
use crate::resume::{self, ResumeCheck};
use crate::segment::{Segment, SegmentEvent};
use crate::status::{JobStatus, UploadMode};
use crate::transport::Transport;

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    percent: f64,
    hash: Option<String>,
    response: Option<Value>,
    metadata: FormFields,
    /// Cancellation token of the running attempt.
    attempt: Option<CancellationToken>,
}

struct JobInner {
    id: Uuid,
    file: Arc<dyn SliceSource>,
    options: TransferOptions,
    segment_size: u64,
    mode: UploadMode,
    hasher: Option<Arc<dyn ContentHasher>>,
    resume: Option<Arc<dyn ResumeCheck>>,
    transport: Arc<dyn Transport>,
    events: EventBus<UploadEvent>,
    state: Mutex<JobState>,
    segments: RwLock<Vec<Segment>>,
}

/// Handle to a transfer job. Clones share state; identity is the
/// underlying file handle.
#[derive(Clone)]
pub struct TransferJob {
    inner: Arc<JobInner>,
}

impl fmt::Debug for TransferJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferJob")
            .field("id", &self.inner.id)
            .field("file", &self.inner.file.name())
            .field("status", &self.status())
            .field("percent", &self.percent())
            .finish()
    }
}

impl PartialEq for TransferJob {
    fn eq(&self, other: &Self) -> bool {
        self.same_job(other)
    }
}

/// Builder for [`TransferJob`].
pub struct TransferJobBuilder {
    file: Arc<dyn SliceSource>,
    transport: Arc<dyn Transport>,
    options: TransferOptions,
    segment_size: u64,
    mode: UploadMode,
    hasher: Option<Arc<dyn ContentHasher>>,
    resume: Option<Arc<dyn ResumeCheck>>,
    metadata: FormFields,
    status: JobStatus,
}

impl TransferJobBuilder {
    pub fn options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    /// Segment size in bytes; 0 means a single segment.
    pub fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    pub fn mode(mut self, mode: UploadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    pub fn resume_check(mut self, check: Arc<dyn ResumeCheck>) -> Self {
        self.resume = Some(check);
        self
    }

    pub fn metadata(mut self, metadata: FormFields) -> Self {
        self.metadata = metadata;
        self
    }

    /// Starts the job in `ready` instead of `pending`.
    pub fn ready(mut self) -> Self {
        self.status = JobStatus::Ready;
        self
    }

    pub fn build(self) -> TransferJob {
        TransferJob {
            inner: Arc::new(JobInner {
                id: Uuid::new_v4(),
                file: self.file,
                options: self.options,
                segment_size: self.segment_size,
                mode: self.mode,
                hasher: self.hasher,
                resume: self.resume,
                transport: self.transport,
                events: EventBus::new(),
                state: Mutex::new(JobState {
                    status: self.status,
                    percent: 0.0,
                    hash: None,
                    response: None,
                    metadata: self.metadata,
                    attempt: None,
                }),
                segments: RwLock::new(Vec::new()),
            }),
        }
    }
}

impl TransferJob {
    pub fn builder(file: Arc<dyn SliceSource>, transport: Arc<dyn Transport>) -> TransferJobBuilder {
        TransferJobBuilder {
            file,
            transport,
            options: TransferOptions::default(),
            segment_size: 0,
            mode: UploadMode::default(),
            hasher: None,
            resume: None,
            metadata: FormFields::new(),
            status: JobStatus::Pending,
        }
    }

    // -- accessors ----------------------------------------------------------

    /// Generated id used in logs.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn file(&self) -> &Arc<dyn SliceSource> {
        &self.inner.file
    }

    pub fn file_name(&self) -> &str {
        self.inner.file.name()
    }

    pub fn file_size(&self) -> u64 {
        self.inner.file.size()
    }

    pub fn options(&self) -> &TransferOptions {
        &self.inner.options
    }

    pub fn mode(&self) -> UploadMode {
        self.inner.mode
    }

    pub fn segment_size(&self) -> u64 {
        self.inner.segment_size
    }

    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    /// Aggregate progress: the mean of segment progress, two decimals.
    pub fn percent(&self) -> f64 {
        self.state().percent
    }

    /// Hex content hash, once computed.
    pub fn content_hash(&self) -> Option<String> {
        self.state().hash.clone()
    }

    /// The last segment response seen by this job.
    pub fn response(&self) -> Option<Value> {
        self.state().response.clone()
    }

    pub fn metadata(&self) -> FormFields {
        self.state().metadata.clone()
    }

    pub fn set_metadata(&self, metadata: FormFields) {
        self.state().metadata = metadata;
    }

    /// Snapshot of the segments; empty until segmented.
    pub fn segments(&self) -> Vec<Segment> {
        self.inner
            .segments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn segment_count(&self) -> usize {
        self.inner
            .segments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether both handles refer to the same file.
    pub fn same_file(&self, other: &TransferJob) -> bool {
        Arc::ptr_eq(&self.inner.file, &other.inner.file)
    }

    /// Whether both handles refer to the same job.
    pub fn same_job(&self, other: &TransferJob) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn events(&self) -> &EventBus<UploadEvent> {
        &self.inner.events
    }

    pub fn on<F, R>(&self, name: EventName, handler: F)
    where
        F: Fn(&UploadEvent) -> R + Send + Sync + 'static,
        R: Into<HookResult>,
    {
        self.inner.events.on(name, handler);
    }

    // -- state machine ------------------------------------------------------

    /// Moves to `next` if the transition table allows it and emits
    /// `statusChange`. Returns whether the status changed.
    pub fn change_status(&self, next: JobStatus) -> bool {
        {
            let mut state = self.state();
            let current = state.status;
            if current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                warn!(job = %self.inner.id, from = ?current, to = ?next, "refused status transition");
                return false;
            }
            state.status = next;
        }
        debug!(job = %self.inner.id, status = ?next, "status changed");
        self.emit(UploadEvent::StatusChange {
            job: self.clone(),
            status: next,
        });
        true
    }

    fn promote_pending(&self) {
        if self.status() == JobStatus::Pending {
            self.change_status(JobStatus::Ready);
        }
    }

    /// Cuts the file into segments and subscribes to them.
    ///
    /// Does nothing if the job is already segmented. A zero-length file
    /// yields one empty segment.
    pub fn prepare_segments(&self) {
        if self.segment_count() > 0 {
            return;
        }
        self.promote_pending();
        self.emit(UploadEvent::BeforeChunk { job: self.clone() });
        self.change_status(JobStatus::Chunking);

        let size = self.file_size();
        let mut ranges = plan_segments(size, self.inner.segment_size);
        if ranges.is_empty() {
            ranges.push(ByteRange::whole(size));
        }
        let segments: Vec<Segment> = ranges
            .into_iter()
            .enumerate()
            .map(|(index, range)| Segment::new(index, range))
            .collect();
        for segment in &segments {
            self.subscribe(segment);
        }
        let count = segments.len();
        *self
            .inner
            .segments
            .write()
            .unwrap_or_else(PoisonError::into_inner) = segments;

        debug!(job = %self.inner.id, segments = count, "file segmented");
        self.emit(UploadEvent::AfterChunk { job: self.clone() });
        self.change_status(JobStatus::Chunked);
    }

    fn subscribe(&self, segment: &Segment) {
        let weak = Arc::downgrade(&self.inner);

        segment.on(EventName::Progress, {
            let weak = Weak::clone(&weak);
            move |event: &SegmentEvent| {
                if let (Some(job), SegmentEvent::Progress { index, loaded, total }) =
                    (upgrade(&weak), event)
                {
                    job.recompute_percent();
                    job.emit(UploadEvent::Progress {
                        job: job.clone(),
                        segment: *index,
                        loaded: *loaded,
                        total: *total,
                    });
                }
            }
        });

        segment.on(EventName::Success, {
            let weak = Weak::clone(&weak);
            move |event: &SegmentEvent| {
                if let (Some(job), SegmentEvent::Success { index, response }) =
                    (upgrade(&weak), event)
                {
                    job.state().response = Some(response.clone());
                    job.recompute_percent();
                    job.emit(UploadEvent::Success {
                        job: job.clone(),
                        segment: *index,
                        response: response.clone(),
                    });
                    job.complete_if_done();
                }
            }
        });

        segment.on(EventName::Error, move |event: &SegmentEvent| {
            if let (Some(job), SegmentEvent::Error { index, response }) = (upgrade(&weak), event) {
                job.state().response = Some(response.clone());
                job.change_status(JobStatus::Error);
                job.emit(UploadEvent::Error {
                    job: job.clone(),
                    segment: *index,
                    response: response.clone(),
                });
            }
        });
    }

    fn recompute_percent(&self) {
        let percents: Vec<f64> = self.segments().iter().map(Segment::percent).collect();
        self.state().percent = mean_percent(&percents);
    }

    fn all_uploaded(&self) -> bool {
        let segments = self.segments();
        !segments.is_empty() && segments.iter().all(Segment::is_uploaded)
    }

    fn complete_if_done(&self) {
        if !self.all_uploaded() {
            return;
        }
        if matches!(self.status(), JobStatus::Checking | JobStatus::Uploading) {
            self.change_status(JobStatus::Success);
            info!(job = %self.inner.id, file = %self.file_name(), "upload complete");
        }
    }

    // -- driving operation --------------------------------------------------

    /// Drives the job to completion.
    ///
    /// Segments the file if needed, hashes it if a hasher is configured and
    /// no hash is recorded, negotiates resume state if a resume check is
    /// configured, then uploads every incomplete segment. Calling it again
    /// after `error` or `abort` resumes with the incomplete segments; after
    /// `success` it returns immediately.
    pub async fn transfer(&self) -> Result<(), UploadError> {
        if self.status() == JobStatus::Success {
            return Ok(());
        }
        let token = CancellationToken::new();
        self.state().attempt = Some(token.clone());

        self.prepare_segments();

        if let Some(hasher) = self.inner.hasher.clone() {
            if self.content_hash().is_none() {
                self.hash_with(hasher.as_ref()).await?;
                if token.is_cancelled() {
                    return Err(UploadError::Aborted);
                }
            }
        }

        if let Some(check) = self.inner.resume.clone() {
            if self.check_remote(check.as_ref()).await {
                return Ok(());
            }
            if token.is_cancelled() {
                return Err(UploadError::Aborted);
            }
        }

        if token.is_cancelled() {
            return Err(UploadError::Aborted);
        }
        self.change_status(JobStatus::Uploading);
        info!(
            job = %self.inner.id,
            file = %self.file_name(),
            segments = self.segment_count(),
            mode = ?self.inner.mode,
            "uploading"
        );

        match self.inner.mode {
            UploadMode::Serial => self.run_serial(&token).await?,
            UploadMode::Concurrent => self.run_concurrent(&token).await?,
        }

        if self.status() == JobStatus::Abort {
            return Err(UploadError::Aborted);
        }
        self.complete_if_done();
        Ok(())
    }

    async fn hash_with(&self, hasher: &dyn ContentHasher) -> Result<(), UploadError> {
        self.emit(UploadEvent::BeforeHash { job: self.clone() });
        self.change_status(JobStatus::Hashing);
        match hasher.hash(self.inner.file.as_ref()).await {
            Ok(hash) => {
                debug!(job = %self.inner.id, %hash, "content hashed");
                self.state().hash = Some(hash.clone());
                self.emit(UploadEvent::AfterHash {
                    job: self.clone(),
                    hash,
                });
                self.change_status(JobStatus::Hashed);
                Ok(())
            }
            Err(err) => {
                warn!(job = %self.inner.id, error = %err, "hashing failed");
                self.change_status(JobStatus::Error);
                Err(UploadError::Hash(err))
            }
        }
    }

    /// Runs resume negotiation. Returns `true` when nothing is left to send.
    async fn check_remote(&self, check: &dyn ResumeCheck) -> bool {
        self.change_status(JobStatus::Checking);
        let reply = resume::negotiate(check, self).await;
        if self.status() != JobStatus::Checking {
            // Aborted while negotiating.
            return false;
        }

        let segments = self.segments();
        if let Some(flags) = resume::received_flags(&reply, segments.len(), self) {
            let mut skipped = 0;
            for (segment, received) in segments.iter().zip(flags) {
                if received && !segment.is_uploaded() {
                    segment.set_success(reply.response.clone());
                    skipped += 1;
                }
            }
            debug!(job = %self.inner.id, skipped, "resume check applied");
        }

        if self.status() == JobStatus::Success {
            self.state().percent = 100.0;
            info!(job = %self.inner.id, file = %self.file_name(), "already on remote, skipped");
            return true;
        }
        self.change_status(JobStatus::Checked);
        false
    }

    fn segment_context(&self) -> SegmentContext {
        let state = self.state();
        SegmentContext {
            file_name: self.file_name().to_owned(),
            file_size: self.file_size(),
            content_hash: state.hash.clone().unwrap_or_default(),
            segment_count: self.segment_count(),
            metadata: state.metadata.clone(),
            index: 0,
            range: ByteRange::whole(0),
            bytes: Vec::new(),
        }
    }

    async fn upload_segment(
        &self,
        segment: &Segment,
        token: &CancellationToken,
    ) -> Result<(), UploadError> {
        segment
            .upload(
                self.inner.file.as_ref(),
                self.segment_context(),
                &self.inner.options,
                self.inner.transport.as_ref(),
                token,
            )
            .await
    }

    async fn run_serial(&self, token: &CancellationToken) -> Result<(), UploadError> {
        loop {
            if token.is_cancelled() {
                return Err(UploadError::Aborted);
            }
            let next = self.segments().into_iter().find(|s| !s.is_uploaded());
            let Some(segment) = next else {
                return Ok(());
            };
            self.upload_segment(&segment, token).await?;
        }
    }

    async fn run_concurrent(&self, token: &CancellationToken) -> Result<(), UploadError> {
        let pending: Vec<Segment> = self
            .segments()
            .into_iter()
            .filter(|s| !s.is_uploaded())
            .collect();

        let results = join_all(pending.iter().map(|segment| async move {
            let result = self.upload_segment(segment, token).await;
            if let Err(err) = &result {
                if !matches!(err, UploadError::Aborted) && !token.is_cancelled() {
                    debug!(job = %self.inner.id, segment = segment.index(), "fail-fast: cancelling siblings");
                    token.cancel();
                }
            }
            result
        }))
        .await;

        let mut aborted = false;
        for result in results {
            match result {
                Ok(()) => {}
                Err(UploadError::Aborted) => aborted = true,
                Err(err) => return Err(err),
            }
        }
        if aborted {
            return Err(UploadError::Aborted);
        }
        Ok(())
    }

    /// Aborts the job: moves to `abort`, recomputes progress and cancels
    /// every in-flight segment. Segments that already completed stay
    /// complete. Refused once the job settled as `success` or `error`.
    pub fn abort(&self) -> bool {
        if !self.change_status(JobStatus::Abort) {
            return false;
        }
        self.recompute_percent();
        let attempt = self.state().attempt.clone();
        if let Some(token) = attempt {
            token.cancel();
        }
        let aborted = self
            .segments()
            .iter()
            .filter(|segment| segment.abort())
            .count();
        info!(job = %self.inner.id, in_flight = aborted, "job aborted");
        true
    }

    fn emit(&self, event: UploadEvent) {
        self.inner.events.trigger(&event);
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn upgrade(weak: &Weak<JobInner>) -> Option<TransferJob> {
    weak.upgrade().map(|inner| TransferJob { inner })
}
