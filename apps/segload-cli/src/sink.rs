//! A local directory acting as the upload endpoint.
//!
//! Each received segment is written at its offset with [`ChunkWriter`] and
//! its byte range is recorded in a per-file manifest under `.segload/`.
//! The manifest also holds the size and digest of the content the ranges
//! came from. Resume checks answer from it only while both still match;
//! otherwise the destination is truncated and the upload starts over.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use segload_transfer::{Chunk, ChunkWriter, TransferError, checksum_bytes, validate_file_name};
use segload_uploader::{
    BoxFuture, ProgressReporter, ResumeCallback, ResumeCheck, SegmentRequest, TransferJob,
    TransferOptions, Transport, TransportResult,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

const MANIFEST_DIR: &str = ".segload";

/// What is stored for one file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    ranges: BTreeSet<(u64, u64)>,
}

impl Manifest {
    /// Unknown attributes of the incoming content are not compared.
    fn matches(&self, size: Option<u64>, hash: Option<&str>) -> bool {
        size.is_none_or(|size| self.size == Some(size))
            && hash.is_none_or(|hash| self.hash.as_deref() == Some(hash))
    }
}

/// Writes uploaded segments into a directory.
#[derive(Clone)]
pub struct DirectoryTransport {
    root: PathBuf,
    writer: Arc<Mutex<ChunkWriter>>,
}

impl DirectoryTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            writer: Arc::new(Mutex::new(ChunkWriter::new(&root))),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_writer(&self) -> MutexGuard<'_, ChunkWriter> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn manifest_path(root: &Path, file_name: &str) -> PathBuf {
        root.join(MANIFEST_DIR).join(format!("{file_name}.json"))
    }

    fn read_manifest(root: &Path, file_name: &str) -> Result<Option<Manifest>, TransferError> {
        let path = Self::manifest_path(root, file_name);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read(&path)?;
        match serde_json::from_slice(&content) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable manifest");
                Ok(None)
            }
        }
    }

    fn write_manifest(&self, file_name: &str, manifest: &Manifest) -> Result<(), TransferError> {
        let path = Self::manifest_path(&self.root, file_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_vec(manifest).map_err(std::io::Error::other)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Returns the manifest for `file_name` if it was written from the same
    /// content, otherwise truncates the destination to `size` and starts an
    /// empty one. Blocking; the caller holds the writer lock.
    fn reconcile(
        &self,
        writer: &mut ChunkWriter,
        file_name: &str,
        size: Option<u64>,
        hash: Option<&str>,
    ) -> Result<Manifest, TransferError> {
        if let Some(manifest) = Self::read_manifest(&self.root, file_name)?
            && manifest.matches(size, hash)
        {
            return Ok(manifest);
        }
        if let Some(size) = size {
            writer.reset_file(file_name, size)?;
        }
        let manifest = Manifest {
            size,
            hash: hash.map(str::to_owned),
            ranges: BTreeSet::new(),
        };
        self.write_manifest(file_name, &manifest)?;
        tracing::debug!(file = %file_name, ?size, "destination reset");
        Ok(manifest)
    }

    /// Stores one segment and records its range. Blocking.
    fn store(&self, request: &SegmentRequest) -> Result<(), TransferError> {
        validate_file_name(&request.file_name)?;
        let chunk = Chunk {
            offset: request.range.start,
            data: request.bytes.clone(),
            file_name: request.file_name.clone(),
            checksum: checksum_bytes(&request.bytes),
        };
        let size = request.fields.get("size").and_then(Value::as_u64);
        let hash = request.fields.get("hash").and_then(Value::as_str);

        let mut writer = self.lock_writer();
        let mut manifest = self.reconcile(&mut writer, &request.file_name, size, hash)?;
        writer.write_chunk(&chunk)?;
        manifest
            .ranges
            .insert((request.range.start, request.range.end));
        self.write_manifest(&request.file_name, &manifest)?;

        tracing::debug!(
            file = %request.file_name,
            segment = request.index,
            written = writer.bytes_written(&request.file_name),
            "segment stored"
        );
        Ok(())
    }

    /// Ranges already stored from the same content. Blocking.
    fn stored_ranges(
        &self,
        file_name: &str,
        size: u64,
        hash: Option<&str>,
    ) -> Result<BTreeSet<(u64, u64)>, TransferError> {
        validate_file_name(file_name)?;
        let mut writer = self.lock_writer();
        Ok(self.reconcile(&mut writer, file_name, Some(size), hash)?.ranges)
    }
}

impl Transport for DirectoryTransport {
    fn send<'a>(
        &'a self,
        request: SegmentRequest,
        _options: &'a TransferOptions,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, TransportResult> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(json!({ "error": "cancelled" }));
            }
            let index = request.index;
            let len = request.bytes.len() as u64;
            progress.report(0, len);

            let stored = tokio::task::spawn_blocking({
                let sink = self.clone();
                move || sink.store(&request)
            })
            .await;

            match stored {
                Ok(Ok(())) => {
                    progress.report(len, len);
                    Ok(json!({ "stored": index, "bytes": len }))
                }
                Ok(Err(e)) => Err(json!({ "error": e.to_string(), "segment": index })),
                Err(e) => Err(json!({ "error": format!("task join error: {e}"), "segment": index })),
            }
        })
    }
}

impl ResumeCheck for DirectoryTransport {
    fn check<'a>(&'a self, job: &'a TransferJob, done: ResumeCallback) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let sink = self.clone();
            let name = job.file_name().to_owned();
            let size = job.file_size();
            let hash = job.content_hash().filter(|h| !h.is_empty());
            let stored =
                tokio::task::spawn_blocking(move || sink.stored_ranges(&name, size, hash.as_deref()))
                    .await;

            let ranges = match stored {
                Ok(Ok(ranges)) => ranges,
                Ok(Err(e)) => {
                    tracing::warn!(file = %job.file_name(), error = %e, "resume check failed");
                    BTreeSet::new()
                }
                Err(e) => {
                    tracing::warn!(file = %job.file_name(), error = %e, "resume check task failed");
                    BTreeSet::new()
                }
            };
            if ranges.is_empty() {
                done.complete(None, Value::Null);
                return;
            }
            let received: Vec<bool> = job
                .segments()
                .iter()
                .map(|s| ranges.contains(&(s.range().start, s.range().end)))
                .collect();
            let count = received.iter().filter(|r| **r).count();
            done.complete(Some(received), json!({ "resumed": count }));
        })
    }
}
