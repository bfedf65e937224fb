//! The job queue: admission control and top-level scheduling.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_util::future::join_all;
use segload_transfer::SliceSource;
use tracing::{debug, info, warn};

use crate::config::UploaderConfig;
use crate::error::UploadError;
use crate::events::{EventBus, EventName, FileInfo, HookResult, UploadEvent};
use crate::job::TransferJob;
use crate::source::Source;
use crate::status::{JobStatus, UploadMode};
use crate::veto::can_continue;

/// Job events re-emitted on the scheduler's bus.
const FORWARDED: [EventName; 8] = [
    EventName::BeforeChunk,
    EventName::AfterChunk,
    EventName::BeforeHash,
    EventName::AfterHash,
    EventName::StatusChange,
    EventName::Progress,
    EventName::Success,
    EventName::Error,
];

/// Result of offering a batch of files.
#[derive(Debug)]
pub enum Admission {
    Accepted {
        /// Jobs created for this batch, in offer order.
        jobs: Vec<TransferJob>,
        /// Oversized files dropped by the size gate.
        filtered: Vec<FileInfo>,
        /// Outcome of the automatic transfer, when `auto_upload` is set.
        transfer: Option<BatchOutcome>,
    },
    Rejected(UploadError),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Outcome for a single job of a batch transfer.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub index: usize,
    pub file_name: String,
    pub status: JobStatus,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status == JobStatus::Success
    }
}

/// Result of [`Uploader::transfer`].
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// A `beforeUpload` handler halted the batch; nothing was sent.
    Vetoed,
    /// Per-job outcomes in queue order.
    Finished(Vec<JobOutcome>),
}

/// Ordered collection of [`TransferJob`]s.
pub struct Uploader {
    config: UploaderConfig,
    jobs: RwLock<Vec<TransferJob>>,
    events: EventBus<UploadEvent>,
}

impl Uploader {
    pub fn new(config: UploaderConfig) -> Self {
        Self {
            config,
            jobs: RwLock::new(Vec::new()),
            events: EventBus::new(),
        }
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus<UploadEvent> {
        &self.events
    }

    /// Registers a handler on the scheduler's bus.
    ///
    /// Job events are forwarded here, so a handler for `progress` sees
    /// every job.
    pub fn on<F, R>(&self, name: EventName, handler: F)
    where
        F: Fn(&UploadEvent) -> R + Send + Sync + 'static,
        R: Into<HookResult>,
    {
        self.events.on(name, handler);
    }

    /// Snapshot of the queue.
    pub fn jobs(&self) -> Vec<TransferJob> {
        self.read_jobs().clone()
    }

    pub fn job(&self, index: usize) -> Option<TransferJob> {
        self.read_jobs().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_jobs().is_empty()
    }

    // -- admission ----------------------------------------------------------

    /// Pulls a batch from `source` and offers it.
    pub async fn offer_from(&self, source: &dyn Source) -> Admission {
        match source.files().await {
            Ok(files) => self.offer(files).await,
            Err(err) => {
                warn!(error = %err, "source failed");
                Admission::Rejected(err.into())
            }
        }
    }

    /// Runs the admission gates over `files` and enqueues the survivors.
    pub async fn offer(&self, files: Vec<Arc<dyn SliceSource>>) -> Admission {
        let infos = describe(&files);

        if !can_continue(self.events.trigger(&UploadEvent::Select { files: infos.clone() })).await
        {
            info!(files = infos.len(), "batch halted by select hook");
            return Admission::Rejected(UploadError::VetoHalted(EventName::Select));
        }

        let max_count = self.config.max_count;
        let total = self.len() + files.len();
        if max_count > 0 && !files.is_empty() && total > max_count {
            if !self.events.has_handlers(EventName::CountExceed) {
                info!(total, max_count, "batch rejected: queue limit");
                return Admission::Rejected(UploadError::AdmissionRejected { total, max_count });
            }
            let results = self.events.trigger(&UploadEvent::CountExceed {
                total,
                max_count,
                files: infos.clone(),
            });
            if !can_continue(results).await {
                info!(total, max_count, "batch halted by countExceed hook");
                return Admission::Rejected(UploadError::VetoHalted(EventName::CountExceed));
            }
        }

        let mut files = files;
        let mut filtered = Vec::new();
        let max_size = self.config.max_size;
        if max_size > 0 {
            let oversized: Vec<FileInfo> = infos.iter().filter(|f| f.size > max_size).cloned().collect();
            if !oversized.is_empty() {
                let admit_all = self.events.has_handlers(EventName::SizeExceed)
                    && can_continue(self.events.trigger(&UploadEvent::SizeExceed {
                        oversized: oversized.clone(),
                        max_size,
                        files: infos.clone(),
                    }))
                    .await;
                if !admit_all {
                    debug!(dropped = oversized.len(), max_size, "filtering oversized files");
                    files.retain(|f| f.size() <= max_size);
                    filtered = oversized;
                }
            }
        }

        if max_count > 0 && files.len() > max_count {
            files.truncate(max_count);
        }

        let jobs: Vec<TransferJob> = files.into_iter().map(|file| self.build_job(file)).collect();
        self.write_jobs().extend(jobs.iter().cloned());
        info!(accepted = jobs.len(), filtered = filtered.len(), queued = self.len(), "batch admitted");

        let transfer = if self.config.auto_upload && !jobs.is_empty() {
            Some(self.transfer().await)
        } else {
            None
        };
        Admission::Accepted {
            jobs,
            filtered,
            transfer,
        }
    }

    fn build_job(&self, file: Arc<dyn SliceSource>) -> TransferJob {
        let config = &self.config;
        let mut builder = TransferJob::builder(file, Arc::clone(&config.transport))
            .options(config.options.clone())
            .segment_size(config.segment_size)
            .mode(config.segment_mode)
            .ready();
        if let Some(hasher) = &config.hasher {
            builder = builder.hasher(Arc::clone(hasher));
        }
        if let Some(check) = &config.resume {
            builder = builder.resume_check(Arc::clone(check));
        }
        let job = builder.build();

        for name in FORWARDED {
            let bus = self.events.clone();
            job.on(name, move |event: &UploadEvent| {
                bus.trigger(event);
            });
        }
        job
    }

    // -- transfer -----------------------------------------------------------

    /// Transfers every queued job under the batch strategy.
    ///
    /// A failing job does not stop the others; each gets its own outcome.
    /// In serial mode a job removed before its turn is skipped and has no
    /// outcome.
    pub async fn transfer(&self) -> BatchOutcome {
        let jobs = self.jobs();
        let vote = self.events.trigger(&UploadEvent::BeforeUpload { jobs: jobs.clone() });
        if !can_continue(vote).await {
            info!(jobs = jobs.len(), "batch halted by beforeUpload hook");
            return BatchOutcome::Vetoed;
        }
        info!(jobs = jobs.len(), mode = ?self.config.batch_mode, "starting batch");

        let outcomes = match self.config.batch_mode {
            UploadMode::Serial => {
                let mut outcomes = Vec::with_capacity(jobs.len());
                for (index, job) in jobs.iter().enumerate() {
                    if !self.is_queued(job) {
                        debug!(job = %job.id(), index, "skipping removed job");
                        continue;
                    }
                    let result = job.transfer().await;
                    outcomes.push(outcome(index, job, result));
                }
                outcomes
            }
            UploadMode::Concurrent => {
                let results = join_all(jobs.iter().map(TransferJob::transfer)).await;
                jobs.iter()
                    .zip(results)
                    .enumerate()
                    .map(|(index, (job, result))| outcome(index, job, result))
                    .collect()
            }
        };

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        info!(succeeded, failed = outcomes.len() - succeeded, "batch finished");
        BatchOutcome::Finished(outcomes)
    }

    /// Aborts every queued job.
    pub fn abort(&self) {
        let jobs = self.jobs();
        let aborted = jobs.iter().filter(|job| job.abort()).count();
        info!(aborted, "batch aborted");
    }

    /// Removes the job at `index` unless a `beforeRemove` handler halts.
    ///
    /// A job that is still running is aborted first.
    pub async fn remove(&self, index: usize) -> Option<TransferJob> {
        let job = self.job(index)?;
        let vote = self.events.trigger(&UploadEvent::BeforeRemove {
            index,
            job: job.clone(),
        });
        if !can_continue(vote).await {
            debug!(index, "removal halted by beforeRemove hook");
            return None;
        }

        // The queue may have shifted while handlers were pending.
        let index = {
            let mut jobs = self.write_jobs();
            let position = jobs.iter().position(|j| j.same_job(&job))?;
            jobs.remove(position);
            position
        };
        if matches!(
            job.status(),
            JobStatus::Hashing | JobStatus::Checking | JobStatus::Uploading
        ) {
            job.abort();
        }
        info!(job = %job.id(), index, "job removed");
        self.events.trigger(&UploadEvent::Remove {
            index,
            job: job.clone(),
        });
        Some(job)
    }

    fn is_queued(&self, job: &TransferJob) -> bool {
        self.read_jobs().iter().any(|j| j.same_job(job))
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, Vec<TransferJob>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, Vec<TransferJob>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn describe(files: &[Arc<dyn SliceSource>]) -> Vec<FileInfo> {
    files
        .iter()
        .map(|f| FileInfo {
            name: f.name().to_owned(),
            size: f.size(),
        })
        .collect()
}

fn outcome(index: usize, job: &TransferJob, result: Result<(), UploadError>) -> JobOutcome {
    let error = match result {
        Ok(()) => None,
        Err(err) => {
            warn!(job = %job.id(), file = %job.file_name(), error = %err, "job failed");
            Some(err.to_string())
        }
    };
    JobOutcome {
        index,
        file_name: job.file_name().to_owned(),
        status: job.status(),
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Behaviour, ScriptedTransport};
    use segload_transfer::MemoryFile;
    use std::sync::Mutex;

    fn files(sizes: &[usize]) -> Vec<Arc<dyn SliceSource>> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &len)| {
                Arc::new(MemoryFile::new(format!("f{i}.bin"), vec![1u8; len])) as Arc<dyn SliceSource>
            })
            .collect()
    }

    fn uploader(config: impl FnOnce(UploaderConfig) -> UploaderConfig) -> (Uploader, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(Behaviour::Succeed));
        let uploader = Uploader::new(config(UploaderConfig::new(transport.clone())));
        (uploader, transport)
    }

    #[tokio::test]
    async fn accepted_jobs_start_ready() {
        let (uploader, _) = uploader(|c| c);
        let admission = uploader.offer(files(&[3, 5])).await;
        let Admission::Accepted { jobs, filtered, transfer } = admission else {
            panic!("expected acceptance");
        };
        assert_eq!(jobs.len(), 2);
        assert!(filtered.is_empty());
        assert!(transfer.is_none());
        assert!(jobs.iter().all(|j| j.status() == JobStatus::Ready));
        assert_eq!(uploader.len(), 2);
    }

    #[tokio::test]
    async fn select_veto_rejects_batch() {
        let (uploader, _) = uploader(|c| c);
        uploader.on(EventName::Select, |_: &UploadEvent| false);
        let admission = uploader.offer(files(&[1])).await;
        assert!(matches!(
            admission,
            Admission::Rejected(UploadError::VetoHalted(EventName::Select))
        ));
        assert!(uploader.is_empty());
    }

    #[tokio::test]
    async fn count_gate_without_handlers_rejects() {
        let (uploader, _) = uploader(|c| c.with_max_count(2));
        assert!(uploader.offer(files(&[1, 1])).await.is_accepted());
        let admission = uploader.offer(files(&[1])).await;
        assert!(matches!(
            admission,
            Admission::Rejected(UploadError::AdmissionRejected { total: 3, max_count: 2 })
        ));
        assert_eq!(uploader.len(), 2);
    }

    #[tokio::test]
    async fn count_gate_handler_vote_decides() {
        let (uploader, _) = uploader(|c| c.with_max_count(1));
        uploader.on(EventName::CountExceed, |_: &UploadEvent| true);
        let admission = uploader.offer(files(&[1, 1, 1])).await;
        // Admitted, then truncated to the limit.
        let Admission::Accepted { jobs, .. } = admission else {
            panic!("expected acceptance");
        };
        assert_eq!(jobs.len(), 1);

        let (uploader, _) = self::uploader(|c| c.with_max_count(1));
        uploader.on(EventName::CountExceed, |_: &UploadEvent| 0i64);
        assert!(!uploader.offer(files(&[1, 1])).await.is_accepted());
    }

    #[tokio::test]
    async fn size_gate_filters_without_handlers() {
        let (uploader, _) = uploader(|c| c.with_max_size(4));
        let Admission::Accepted { jobs, filtered, .. } = uploader.offer(files(&[2, 8, 4])).await
        else {
            panic!("expected acceptance");
        };
        let names: Vec<_> = jobs.iter().map(|j| j.file_name().to_owned()).collect();
        assert_eq!(names, vec!["f0.bin", "f2.bin"]);
        assert_eq!(filtered, vec![FileInfo { name: "f1.bin".into(), size: 8 }]);
    }

    #[tokio::test]
    async fn size_gate_continuing_vote_admits_all() {
        let (uploader, _) = uploader(|c| c.with_max_size(4));
        uploader.on(EventName::SizeExceed, |_: &UploadEvent| {});
        let Admission::Accepted { jobs, filtered, .. } = uploader.offer(files(&[2, 8])).await
        else {
            panic!("expected acceptance");
        };
        assert_eq!(jobs.len(), 2);
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn before_upload_veto_sends_nothing() {
        let (uploader, transport) = uploader(|c| c);
        uploader.on(EventName::BeforeUpload, |_: &UploadEvent| {
            HookResult::pending(async { "" })
        });
        uploader.offer(files(&[3])).await;
        assert!(matches!(uploader.transfer().await, BatchOutcome::Vetoed));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn auto_upload_transfers_on_admission() {
        let (uploader, transport) = uploader(|c| c.with_auto_upload(true));
        let Admission::Accepted { transfer, .. } = uploader.offer(files(&[3, 3])).await else {
            panic!("expected acceptance");
        };
        let Some(BatchOutcome::Finished(outcomes)) = transfer else {
            panic!("expected a finished batch");
        };
        assert!(outcomes.iter().all(JobOutcome::is_success));
        assert_eq!(transport.started().len(), 2);
    }

    #[tokio::test]
    async fn job_events_reach_scheduler_bus() {
        let (uploader, _) = uploader(|c| c);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            uploader.on(EventName::Success, move |event: &UploadEvent| {
                if let Some(job) = event.job() {
                    seen.lock().unwrap().push(job.file_name().to_owned());
                }
            });
        }
        uploader.offer(files(&[2])).await;
        uploader.transfer().await;
        assert_eq!(*seen.lock().unwrap(), vec!["f0.bin"]);
    }

    #[tokio::test]
    async fn remove_respects_veto() {
        let (uploader, _) = uploader(|c| c);
        uploader.offer(files(&[1, 2, 3])).await;
        let removed = Arc::new(Mutex::new(Vec::new()));
        {
            let removed = Arc::clone(&removed);
            uploader.on(EventName::Remove, move |event: &UploadEvent| {
                if let UploadEvent::Remove { index, .. } = event {
                    removed.lock().unwrap().push(*index);
                }
            });
        }

        let job = uploader.remove(1).await.unwrap();
        assert_eq!(job.file_name(), "f1.bin");
        assert_eq!(uploader.len(), 2);
        assert_eq!(*removed.lock().unwrap(), vec![1]);
        assert!(uploader.remove(5).await.is_none());

        uploader.on(EventName::BeforeRemove, |_: &UploadEvent| false);
        assert!(uploader.remove(0).await.is_none());
        assert_eq!(uploader.len(), 2);
    }

    #[tokio::test]
    async fn serial_batch_skips_job_removed_mid_run() {
        let (uploader, transport) = uploader(|c| c.with_batch_mode(UploadMode::Serial));
        uploader.offer(files(&[3, 3])).await;
        let first = uploader.job(0).unwrap();

        let remove = async {
            while first.status() != JobStatus::Uploading {
                tokio::task::yield_now().await;
            }
            uploader.remove(1).await
        };
        let (outcome, removed) = tokio::join!(uploader.transfer(), remove);

        let removed = removed.unwrap();
        assert_eq!(removed.file_name(), "f1.bin");
        assert_eq!(removed.status(), JobStatus::Ready);
        let sent: Vec<String> = transport
            .requests()
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        assert_eq!(sent, vec!["f0.bin"]);
        let BatchOutcome::Finished(outcomes) = outcome else {
            panic!("expected a finished batch");
        };
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].file_name, "f0.bin");
        assert!(outcomes[0].is_success());
    }

    #[tokio::test]
    async fn remove_picks_the_job_not_the_file() {
        let (uploader, _) = uploader(|c| c);
        let shared: Arc<dyn SliceSource> = Arc::new(MemoryFile::new("same.bin", vec![0u8; 4]));
        uploader.offer(vec![Arc::clone(&shared), shared]).await;
        let second = uploader.job(1).unwrap();
        let first = uploader.job(0).unwrap();
        assert!(first.same_file(&second));
        assert!(!first.same_job(&second));

        let removed = uploader.remove(1).await.unwrap();
        assert!(removed.same_job(&second));
        assert_eq!(uploader.len(), 1);
        assert!(uploader.job(0).unwrap().same_job(&first));
    }
}
