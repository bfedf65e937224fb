use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::TransferError;
use crate::types::Chunk;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Writes segments to disk at exact offsets with optional checksum verification.
///
/// This is the receiving half of a segmented upload: segments may arrive in
/// any order and each one lands at its own offset.
pub struct ChunkWriter {
    base_path: PathBuf,
    /// Bytes written per destination file.
    written: HashMap<String, u64>,
}

impl ChunkWriter {
    /// Creates a writer rooted at `base_path`.
    pub fn new(base_path: &Path) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            written: HashMap::new(),
        }
    }

    /// Writes a chunk to disk.
    pub fn write_chunk(&mut self, chunk: &Chunk) -> Result<(), TransferError> {
        crate::validate_file_name(&chunk.file_name)?;

        if !chunk.checksum.is_empty() && checksum_bytes(&chunk.data) != chunk.checksum {
            return Err(TransferError::ChecksumMismatch);
        }

        if !self.base_path.exists() {
            std::fs::create_dir_all(&self.base_path)?;
        }
        let full_path = self.base_path.join(&chunk.file_name);

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&full_path)?;
        file.seek(SeekFrom::Start(chunk.offset))?;
        file.write_all(&chunk.data)?;

        *self.written.entry(chunk.file_name.clone()).or_insert(0) += chunk.data.len() as u64;
        Ok(())
    }

    /// Creates or truncates `file_name` to exactly `size` bytes and resets
    /// its written counter. Used when a stored copy no longer matches.
    pub fn reset_file(&mut self, file_name: &str, size: u64) -> Result<(), TransferError> {
        crate::validate_file_name(file_name)?;
        std::fs::create_dir_all(&self.base_path)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.base_path.join(file_name))?;
        file.set_len(size)?;
        self.written.remove(file_name);
        Ok(())
    }

    /// Total bytes written for `file_name` by this writer (0 if never written).
    pub fn bytes_written(&self, file_name: &str) -> u64 {
        self.written.get(file_name).copied().unwrap_or(0)
    }

    /// Returns the base output path.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}
