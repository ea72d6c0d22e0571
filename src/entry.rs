//! File entries flowing through pipelines

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One file travelling through a pipeline.
///
/// Entries are immutable: transforms build new values with the `with_*`
/// methods. Contents are reference counted so fanning an entry out to several
/// pipeline branches does not copy the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    path: PathBuf,
    base: PathBuf,
    contents: Arc<[u8]>,
    metadata: BTreeMap<String, String>,
}

impl FileEntry {
    /// Create an entry for `path`, read relative to the glob base `base`.
    pub fn new(path: impl Into<PathBuf>, base: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            base: base.into(),
            contents: Arc::from(contents.into()),
            metadata: BTreeMap::new(),
        }
    }

    /// Read a file from disk.
    pub async fn read(path: &Path, base: &Path) -> std::io::Result<Self> {
        let contents = tokio::fs::read(path).await?;
        Ok(Self::new(path, base, contents))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Path below the glob base; this is what `Dest` preserves.
    pub fn relative(&self) -> &Path {
        self.path.strip_prefix(&self.base).unwrap_or_else(|_| {
            Path::new(self.path.file_name().unwrap_or(self.path.as_os_str()))
        })
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    /// Contents as text, replacing invalid UTF-8.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.contents)
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn with_contents(&self, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            contents: Arc::from(contents.into()),
            ..self.clone()
        }
    }

    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    /// Same entry with the file extension replaced.
    pub fn with_extension(&self, ext: &str) -> Self {
        self.with_path(self.path.with_extension(ext))
    }

    pub fn with_meta(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut metadata = self.metadata.clone();
        metadata.insert(key.into(), value.into());
        Self {
            metadata,
            ..self.clone()
        }
    }

    pub fn without_meta(&self, key: &str) -> Self {
        let mut metadata = self.metadata.clone();
        metadata.remove(key);
        Self {
            metadata,
            ..self.clone()
        }
    }
}
