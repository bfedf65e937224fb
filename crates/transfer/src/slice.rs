use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;
use crate::types::ByteRange;

/// Boxed, `Send` future used at every async trait seam.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A file handle that knows its length and can read back any byte range.
///
/// Implemented by whatever concrete handle the platform binding provides.
/// Segmenting never copies the file; each segment reads its own range when
/// it is about to be sent.
pub trait SliceSource: Send + Sync {
    /// Display name of the file (used as the remote file name).
    fn name(&self) -> &str;

    /// Total length in bytes.
    fn size(&self) -> u64;

    /// Reads the bytes in `range`.
    fn read_range(&self, range: ByteRange) -> BoxFuture<'_, Result<Vec<u8>, TransferError>>;
}

fn check_range(range: ByteRange, size: u64) -> Result<(), TransferError> {
    if range.start > range.end || range.end > size {
        return Err(TransferError::OutOfRange {
            start: range.start,
            end: range.end,
            size,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// LocalFile
// ---------------------------------------------------------------------------

/// A file on the local filesystem.
///
/// The size is captured when the handle is opened; every read reopens the
/// file so concurrent segment reads never share a cursor.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    size: u64,
}

impl LocalFile {
    /// Opens `path` and records its current length.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(TransferError::InvalidPath(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path,
            name,
            size: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SliceSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&self, range: ByteRange) -> BoxFuture<'_, Result<Vec<u8>, TransferError>> {
        Box::pin(async move {
            check_range(range, self.size)?;
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(SeekFrom::Start(range.start)).await?;
            let mut buf = vec![0u8; range.len() as usize];
            file.read_exact(&mut buf).await?;
            Ok(buf)
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryFile
// ---------------------------------------------------------------------------

/// An in-memory file, cheap to clone.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    data: Arc<[u8]>,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl SliceSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, range: ByteRange) -> BoxFuture<'_, Result<Vec<u8>, TransferError>> {
        Box::pin(async move {
            check_range(range, self.size())?;
            Ok(self.data[range.start as usize..range.end as usize].to_vec())
        })
    }
}
