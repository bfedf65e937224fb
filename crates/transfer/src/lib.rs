//! Byte-level primitives for segmented uploads.
//!
//! Everything here is independent of scheduling: how a file is cut into
//! ranges, how a range is read back from a file handle, how progress
//! percentages are rounded, and how a receiving side writes segments at
//! their offsets.

mod chunked;
mod progress;
mod slice;
mod types;
mod validation;

pub use chunked::{ChunkWriter, checksum_bytes};
pub use progress::{compute_percent, mean_percent};
pub use slice::{BoxFuture, LocalFile, MemoryFile, SliceSource};
pub use types::{ByteRange, Chunk, plan_segments};
pub use validation::validate_file_name;

/// Default segment size: 4 MiB.
pub const DEFAULT_SEGMENT_SIZE: u64 = 4 * 1024 * 1024;

/// Slice size used when a whole file is streamed through a digest.
pub const HASH_READ_SIZE: u64 = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid file name: {0}")]
    InvalidPath(String),

    #[error("range {start}..{end} outside of {size}-byte file")]
    OutOfRange { start: u64, end: u64, size: u64 },
}
