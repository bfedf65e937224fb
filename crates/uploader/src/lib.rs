//! Segmented, resumable upload orchestration.
//!
//! An [`Uploader`] admits files into an ordered queue of [`TransferJob`]s.
//! Each job cuts its file into [`Segment`]s, optionally hashes it and asks a
//! [`ResumeCheck`] what the remote side already holds, then sends the
//! remaining segments through a [`Transport`]. Lifecycle notifications flow
//! through [`EventBus`]es; a few of them are vetoable (see [`veto`]).
//!
//! Nothing here performs network I/O itself and nothing is spawned:
//! concurrent strategies run cooperatively on the caller's task.

mod config;
mod error;
mod events;
mod hasher;
mod job;
mod options;
mod resume;
mod scheduler;
mod segment;
mod source;
mod status;
mod transport;
pub mod veto;

#[cfg(test)]
mod test_support;

pub use config::{DEFAULT_MAX_COUNT, UploaderConfig};
pub use error::UploadError;
pub use events::{BusEvent, EventBus, EventName, FileInfo, HookResult, UploadEvent};
pub use hasher::{ContentHasher, Md5Hasher, Sha256Hasher};
pub use job::{TransferJob, TransferJobBuilder};
pub use options::{FormData, FormFields, SegmentContext, TransferOptions};
pub use resume::{ResumeCallback, ResumeCheck, ResumeReply};
pub use scheduler::{Admission, BatchOutcome, JobOutcome, Uploader};
pub use segment::{Segment, SegmentEvent};
pub use source::{PathSource, Source};
pub use status::{JobStatus, UploadMode, status_text};
pub use transport::{ProgressReporter, SegmentRequest, Transport, TransportResult};

pub use segload_transfer::{BoxFuture, ByteRange, LocalFile, MemoryFile, SliceSource};
