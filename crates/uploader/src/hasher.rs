//! Whole-file content hashing.

use md5::Md5;
use segload_transfer::{BoxFuture, HASH_READ_SIZE, SliceSource, TransferError, plan_segments};
use sha2::{Digest, Sha256};

/// Computes a content hash over an entire file.
///
/// The digest is exposed to form-data functions and resume checks as a hex
/// string; the orchestrator does not interpret it.
pub trait ContentHasher: Send + Sync {
    fn hash<'a>(&'a self, file: &'a dyn SliceSource) -> BoxFuture<'a, Result<String, TransferError>>;
}

/// SHA-256, streamed in [`HASH_READ_SIZE`] slices.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hash<'a>(&'a self, file: &'a dyn SliceSource) -> BoxFuture<'a, Result<String, TransferError>> {
        Box::pin(stream_digest::<Sha256>(file))
    }
}

/// MD5, for endpoints that key resumable uploads by an MD5 digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Hasher;

impl ContentHasher for Md5Hasher {
    fn hash<'a>(&'a self, file: &'a dyn SliceSource) -> BoxFuture<'a, Result<String, TransferError>> {
        Box::pin(stream_digest::<Md5>(file))
    }
}

async fn stream_digest<D: Digest>(file: &dyn SliceSource) -> Result<String, TransferError> {
    let mut hasher = D::new();
    for range in plan_segments(file.size(), HASH_READ_SIZE) {
        let bytes = file.read_range(range).await?;
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}
