//! Where candidate files come from.

use std::path::PathBuf;
use std::sync::Arc;

use segload_transfer::{BoxFuture, LocalFile, SliceSource, TransferError};
use tracing::debug;

/// Yields a batch of candidate files, e.g. from a picker or a drop target.
pub trait Source: Send + Sync {
    fn files(&self) -> BoxFuture<'_, Result<Vec<Arc<dyn SliceSource>>, TransferError>>;
}

/// A fixed list of local paths.
#[derive(Debug, Clone, Default)]
pub struct PathSource {
    paths: Vec<PathBuf>,
}

impl PathSource {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl Source for PathSource {
    fn files(&self) -> BoxFuture<'_, Result<Vec<Arc<dyn SliceSource>>, TransferError>> {
        Box::pin(async move {
            let mut files: Vec<Arc<dyn SliceSource>> = Vec::with_capacity(self.paths.len());
            for path in &self.paths {
                let file = LocalFile::open(path).await?;
                debug!(path = %path.display(), size = file.size(), "opened candidate");
                files.push(Arc::new(file));
            }
            Ok(files)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_every_path_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"aaaa").unwrap();
        std::fs::write(&b, b"bb").unwrap();

        let files = PathSource::new([&a, &b]).files().await.unwrap();
        let names: Vec<_> = files.iter().map(|f| (f.name().to_owned(), f.size())).collect();
        assert_eq!(names, vec![("a.txt".to_owned(), 4), ("b.txt".to_owned(), 2)]);
    }

    #[tokio::test]
    async fn missing_path_fails_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let source = PathSource::new([dir.path().join("missing")]);
        assert!(source.files().await.is_err());
    }
}
