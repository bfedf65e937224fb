//! Scheduler configuration.

use std::fmt;
use std::sync::Arc;

use crate::hasher::{ContentHasher, Sha256Hasher};
use crate::options::TransferOptions;
use crate::resume::ResumeCheck;
use crate::status::UploadMode;
use crate::transport::Transport;

/// Default queue limit.
pub const DEFAULT_MAX_COUNT: usize = 100;

/// Everything the [`Uploader`](crate::Uploader) needs to admit and run jobs.
#[derive(Clone)]
pub struct UploaderConfig {
    pub transport: Arc<dyn Transport>,
    pub options: TransferOptions,
    /// Segment size in bytes; 0 uploads each file as one segment.
    pub segment_size: u64,
    /// How the queue's jobs run relative to each other.
    pub batch_mode: UploadMode,
    /// How each job's segments run relative to each other.
    pub segment_mode: UploadMode,
    /// Queue limit; 0 disables the count gate.
    pub max_count: usize,
    /// Per-file size limit in bytes; 0 disables the size gate.
    pub max_size: u64,
    /// Start transferring right after a successful admission.
    pub auto_upload: bool,
    pub hasher: Option<Arc<dyn ContentHasher>>,
    pub resume: Option<Arc<dyn ResumeCheck>>,
}

impl fmt::Debug for UploaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploaderConfig")
            .field("options", &self.options)
            .field("segment_size", &self.segment_size)
            .field("batch_mode", &self.batch_mode)
            .field("segment_mode", &self.segment_mode)
            .field("max_count", &self.max_count)
            .field("max_size", &self.max_size)
            .field("auto_upload", &self.auto_upload)
            .field("hashing", &self.hasher.is_some())
            .field("resume", &self.resume.is_some())
            .finish()
    }
}

impl UploaderConfig {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            options: TransferOptions::default(),
            segment_size: 0,
            batch_mode: UploadMode::Concurrent,
            segment_mode: UploadMode::Concurrent,
            max_count: DEFAULT_MAX_COUNT,
            max_size: 0,
            auto_upload: false,
            hasher: None,
            resume: None,
        }
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    pub fn with_batch_mode(mut self, mode: UploadMode) -> Self {
        self.batch_mode = mode;
        self
    }

    pub fn with_segment_mode(mut self, mode: UploadMode) -> Self {
        self.segment_mode = mode;
        self
    }

    pub fn with_max_count(mut self, max: usize) -> Self {
        self.max_count = max;
        self
    }

    pub fn with_max_size(mut self, max: u64) -> Self {
        self.max_size = max;
        self
    }

    pub fn with_auto_upload(mut self, auto: bool) -> Self {
        self.auto_upload = auto;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Enables content hashing with SHA-256.
    pub fn with_default_hashing(self) -> Self {
        self.with_hasher(Arc::new(Sha256Hasher))
    }

    pub fn with_resume_check(mut self, check: Arc<dyn ResumeCheck>) -> Self {
        self.resume = Some(check);
        self
    }
}
