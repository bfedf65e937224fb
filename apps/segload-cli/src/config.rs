//! CLI configuration.
//!
//! Configuration is stored as TOML. Without `--config` it is read from:
//! - Linux: `~/.config/segload/segload.toml`
//! - Windows: `%APPDATA%/segload/segload.toml`
//!
//! A missing default file means built-in defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use segload_transfer::DEFAULT_SEGMENT_SIZE;
use segload_uploader::{
    ContentHasher, DEFAULT_MAX_COUNT, FormData, FormFields, Md5Hasher, Sha256Hasher,
    TransferOptions, Transport, UploadMode, UploaderConfig,
};
use serde::{Deserialize, Serialize};

/// Digest used when `hash_file` is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Md5,
}

impl HashAlgorithm {
    pub fn hasher(self) -> Arc<dyn ContentHasher> {
        match self {
            Self::Sha256 => Arc::new(Sha256Hasher),
            Self::Md5 => Arc::new(Md5Hasher),
        }
    }
}

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Segment size in bytes (0 = one segment per file).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// How files run relative to each other.
    #[serde(default)]
    pub upload_mode: UploadMode,

    /// How each file's segments run relative to each other.
    #[serde(default)]
    pub segment_mode: UploadMode,

    /// Queue limit (0 = unlimited).
    #[serde(default = "default_max_count")]
    pub max_count: usize,

    /// Per-file size limit in bytes (0 = unlimited).
    #[serde(default)]
    pub max_size: u64,

    /// Compute a content hash before uploading.
    #[serde(default)]
    pub hash_file: bool,

    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    /// Skip segments the destination already holds. Implies hashing, since
    /// stored segments are only reused while the digest matches.
    #[serde(default = "default_true")]
    pub resume: bool,

    #[serde(default)]
    pub url: String,

    #[serde(default = "default_field_name")]
    pub field_name: String,

    #[serde(default)]
    pub with_credentials: bool,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Extra form fields sent with every segment.
    #[serde(default)]
    pub data: FormFields,
}

fn default_chunk_size() -> u64 {
    DEFAULT_SEGMENT_SIZE
}

fn default_max_count() -> usize {
    DEFAULT_MAX_COUNT
}

fn default_true() -> bool {
    true
}

fn default_field_name() -> String {
    "file".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            upload_mode: UploadMode::default(),
            segment_mode: UploadMode::default(),
            max_count: default_max_count(),
            max_size: 0,
            hash_file: false,
            hash_algorithm: HashAlgorithm::default(),
            resume: default_true(),
            url: String::new(),
            field_name: default_field_name(),
            with_credentials: false,
            headers: BTreeMap::new(),
            data: FormFields::new(),
        }
    }
}

impl Config {
    /// Loads `path` if given (it must exist), otherwise the default location
    /// if present, otherwise built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (config_path()?, false),
        };

        if path.exists() {
            let config = Self::from_file(&path)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else if required {
            anyhow::bail!("config file not found: {}", path.display())
        } else {
            Ok(Self::default())
        }
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Request options shared by every job.
    pub fn transfer_options(&self) -> TransferOptions {
        let mut options = TransferOptions::new(self.url.clone())
            .with_field_name(self.field_name.clone())
            .with_data(self.form_data())
            .with_credentials(self.with_credentials);
        for (name, value) in &self.headers {
            options = options.with_header(name.clone(), value.clone());
        }
        options
    }

    /// Static fields from the file plus per-segment bookkeeping.
    fn form_data(&self) -> FormData {
        let base = self.data.clone();
        FormData::from_fn(move |ctx| {
            let mut fields = base.clone();
            fields.insert("chunk".into(), ctx.index.into());
            fields.insert("chunks".into(), ctx.segment_count.into());
            fields.insert("size".into(), ctx.file_size.into());
            if !ctx.content_hash.is_empty() {
                fields.insert("hash".into(), ctx.content_hash.clone().into());
            }
            fields
        })
    }

    /// Builds the scheduler configuration around `transport`.
    pub fn uploader_config(&self, transport: Arc<dyn Transport>) -> UploaderConfig {
        let mut config = UploaderConfig::new(transport)
            .with_options(self.transfer_options())
            .with_segment_size(self.chunk_size)
            .with_batch_mode(self.upload_mode)
            .with_segment_mode(self.segment_mode)
            .with_max_count(self.max_count)
            .with_max_size(self.max_size);
        if self.hash_file || self.resume {
            config = config.with_hasher(self.hash_algorithm.hasher());
        }
        config
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("segload").join("segload.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("segload")
            .join("segload.toml"))
    }
}
