//! Per-job request configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use segload_transfer::{BoxFuture, ByteRange};
use serde_json::{Map, Value};

/// Extra form fields sent with every segment.
pub type FormFields = Map<String, Value>;

/// Everything known about a segment at the moment it is sent.
///
/// Passed to [`FormData::Computed`] so request bodies can be late-bound per
/// segment (e.g. to include the content hash or the segment index).
#[derive(Debug, Clone)]
pub struct SegmentContext {
    pub file_name: String,
    pub file_size: u64,
    /// Hex digest of the file, empty when hashing is disabled.
    pub content_hash: String,
    pub segment_count: usize,
    pub metadata: FormFields,
    pub index: usize,
    pub range: ByteRange,
    pub bytes: Vec<u8>,
}

type ComputeFields = dyn Fn(&SegmentContext) -> BoxFuture<'static, FormFields> + Send + Sync;

/// Form data: a fixed map, or a function producing one per segment.
#[derive(Clone)]
pub enum FormData {
    Static(FormFields),
    Computed(Arc<ComputeFields>),
}

impl FormData {
    /// Form data produced asynchronously from each segment's context.
    pub fn computed<F, Fut>(f: F) -> Self
    where
        F: Fn(&SegmentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FormFields> + Send + 'static,
    {
        Self::Computed(Arc::new(
            move |ctx: &SegmentContext| -> BoxFuture<'static, FormFields> { Box::pin(f(ctx)) },
        ))
    }

    /// Form data produced synchronously from each segment's context.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&SegmentContext) -> FormFields + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(
            move |ctx: &SegmentContext| -> BoxFuture<'static, FormFields> {
                let fields = f(ctx);
                Box::pin(async move { fields })
            },
        ))
    }

    /// Produces the fields for one segment.
    pub async fn resolve(&self, ctx: &SegmentContext) -> FormFields {
        match self {
            Self::Static(fields) => fields.clone(),
            Self::Computed(f) => f(ctx).await,
        }
    }
}

impl Default for FormData {
    fn default() -> Self {
        Self::Static(FormFields::new())
    }
}

impl From<FormFields> for FormData {
    fn from(fields: FormFields) -> Self {
        Self::Static(fields)
    }
}

impl fmt::Debug for FormData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(fields) => f.debug_tuple("Static").field(fields).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Request configuration captured once per job and reused for every
/// segment upload of that job.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Endpoint URL.
    pub url: String,
    /// Form field carrying the segment bytes.
    pub field_name: String,
    pub data: FormData,
    pub headers: BTreeMap<String, String>,
    /// Whether the transport should include credentials (cookies etc.).
    pub with_credentials: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            field_name: "file".into(),
            data: FormData::default(),
            headers: BTreeMap::new(),
            with_credentials: false,
        }
    }
}

impl TransferOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    pub fn with_data(mut self, data: impl Into<FormData>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_credentials(mut self, include: bool) -> Self {
        self.with_credentials = include;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(index: usize) -> SegmentContext {
        SegmentContext {
            file_name: "a.bin".into(),
            file_size: 10,
            content_hash: "abc".into(),
            segment_count: 3,
            metadata: FormFields::new(),
            index,
            range: ByteRange::new(0, 4),
            bytes: vec![0; 4],
        }
    }

    #[tokio::test]
    async fn static_data_is_cloned() {
        let mut fields = FormFields::new();
        fields.insert("token".into(), json!("t"));
        let data = FormData::from(fields.clone());
        assert_eq!(data.resolve(&ctx(0)).await, fields);
    }

    #[tokio::test]
    async fn sync_function_sees_segment() {
        let data = FormData::from_fn(|ctx| {
            let mut f = FormFields::new();
            f.insert("chunk".into(), json!(ctx.index));
            f.insert("chunks".into(), json!(ctx.segment_count));
            f
        });
        let fields = data.resolve(&ctx(2)).await;
        assert_eq!(fields["chunk"], json!(2));
        assert_eq!(fields["chunks"], json!(3));
    }

    #[tokio::test]
    async fn async_function_is_awaited() {
        let data = FormData::computed(|ctx| {
            let hash = ctx.content_hash.clone();
            async move {
                tokio::task::yield_now().await;
                let mut f = FormFields::new();
                f.insert("hash".into(), json!(hash));
                f
            }
        });
        assert_eq!(data.resolve(&ctx(0)).await["hash"], json!("abc"));
    }

    #[test]
    fn defaults() {
        let opts = TransferOptions::new("https://example.test/upload")
            .with_header("x-token", "secret")
            .with_credentials(true);
        assert_eq!(opts.field_name, "file");
        assert_eq!(opts.headers["x-token"], "secret");
        assert!(opts.with_credentials);
    }
}
