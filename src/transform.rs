//! Transforms and the generic stages every pipeline can use
//!
//! A [`Transform`] maps one entry to zero or more entries; an [`Aggregate`]
//! sees every surviving entry at once (bundling). Both hand back a boxed
//! future so synchronous and I/O-bound steps share one interface.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::BuildMode;
use crate::entry::FileEntry;
use crate::error::TransformError;

/// Outcome of a transform on one entry.
pub type TransformResult = std::result::Result<Vec<FileEntry>, TransformError>;

/// Per-file step in a pipeline.
///
/// Implementations other than [`Dest`] must not touch the filesystem.
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    fn apply<'a>(&'a self, entry: FileEntry) -> BoxFuture<'a, TransformResult>;
}

/// Barrier step receiving all surviving entries in source order.
pub trait Aggregate: Send + Sync {
    fn name(&self) -> &str;

    fn aggregate<'a>(&'a self, entries: Vec<FileEntry>) -> BoxFuture<'a, TransformResult>;
}

/// One step of a pipeline.
#[derive(Clone)]
pub enum Stage {
    Each(Arc<dyn Transform>),
    All(Arc<dyn Aggregate>),
}

impl Stage {
    pub fn each(transform: impl Transform + 'static) -> Self {
        Stage::Each(Arc::new(transform))
    }

    pub fn all(aggregate: impl Aggregate + 'static) -> Self {
        Stage::All(Arc::new(aggregate))
    }

    pub fn name(&self) -> &str {
        match self {
            Stage::Each(t) => t.name(),
            Stage::All(a) => a.name(),
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve a synchronous result as a transform future.
pub fn ready<'a>(result: TransformResult) -> BoxFuture<'a, TransformResult> {
    futures::future::ready(result).boxed()
}

/// Transform backed by a synchronous closure.
pub struct FnTransform<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a transform.
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnTransform<F>
where
    F: Fn(FileEntry) -> TransformResult + Send + Sync,
{
    FnTransform { name: name.into(), f }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(FileEntry) -> TransformResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply<'a>(&'a self, entry: FileEntry) -> BoxFuture<'a, TransformResult> {
        ready((self.f)(entry))
    }
}

/// Runs the inner transform only in one build mode; otherwise entries pass
/// through unchanged.
pub struct ModeGate {
    active: bool,
    inner: Arc<dyn Transform>,
}

impl ModeGate {
    /// Apply `inner` only for production builds.
    pub fn production(mode: BuildMode, inner: impl Transform + 'static) -> Self {
        Self {
            active: mode.is_production(),
            inner: Arc::new(inner),
        }
    }

    /// Apply `inner` only for builds that write source maps.
    pub fn source_maps(mode: BuildMode, inner: impl Transform + 'static) -> Self {
        Self {
            active: mode.source_maps(),
            inner: Arc::new(inner),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Transform for ModeGate {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn apply<'a>(&'a self, entry: FileEntry) -> BoxFuture<'a, TransformResult> {
        if self.active {
            self.inner.apply(entry)
        } else {
            ready(Ok(vec![entry]))
        }
    }
}

/// Replace the file extension.
pub struct Rename {
    extension: String,
}

impl Rename {
    pub fn extension(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }
}

impl Transform for Rename {
    fn name(&self) -> &str {
        "rename"
    }

    fn apply<'a>(&'a self, entry: FileEntry) -> BoxFuture<'a, TransformResult> {
        ready(Ok(vec![entry.with_extension(&self.extension)]))
    }
}

/// Terminal writer: stores each entry under `dir`, keeping its path relative
/// to the glob base.
pub struct Dest {
    dir: PathBuf,
}

impl Dest {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Transform for Dest {
    fn name(&self) -> &str {
        "dest"
    }

    fn apply<'a>(&'a self, entry: FileEntry) -> BoxFuture<'a, TransformResult> {
        Box::pin(async move {
            let target = self.dir.join(entry.relative());
            let fail = |e: std::io::Error| TransformError::new("dest", entry.path(), e.to_string());

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(fail)?;
            }
            tokio::fs::write(&target, entry.contents()).await.map_err(fail)?;

            tracing::debug!(file = %target.display(), bytes = entry.len(), "wrote");
            Ok(vec![FileEntry::new(target, self.dir.clone(), entry.contents().to_vec())])
        })
    }
}

/// Logs the size of every entry passing through.
pub struct ReportSize;

impl Transform for ReportSize {
    fn name(&self) -> &str {
        "filesize"
    }

    fn apply<'a>(&'a self, entry: FileEntry) -> BoxFuture<'a, TransformResult> {
        let name = entry
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!("Size {} : {}", name, human_size(entry.len()));
        ready(Ok(vec![entry]))
    }
}

/// Format a byte count the way size reporters usually do.
pub fn human_size(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mode_gate_passes_through_when_inactive() {
        let upper = || {
            from_fn("upper", |e: FileEntry| {
                let text = e.text().to_uppercase();
                Ok(vec![e.with_contents(text)])
            })
        };

        let entry = FileEntry::new("a.js", ".", "abc");

        let dev = ModeGate::production(BuildMode::Development, upper());
        assert!(!dev.is_active());
        assert_eq!(dev.apply(entry.clone()).await.unwrap()[0].contents(), b"abc");

        let prod = ModeGate::production(BuildMode::Production, upper());
        assert_eq!(prod.apply(entry.clone()).await.unwrap()[0].contents(), b"ABC");

        assert!(ModeGate::source_maps(BuildMode::Development, upper()).is_active());
        let maps = ModeGate::source_maps(BuildMode::Production, upper());
        assert_eq!(maps.apply(entry).await.unwrap()[0].contents(), b"abc");
    }

    #[tokio::test]
    async fn test_dest_preserves_relative_path() {
        let dir = TempDir::new().unwrap();
        let entry = FileEntry::new("/src/css/sass/pages/home.css", "/src/css/sass", "a{}");

        let out = Dest::new(dir.path()).apply(entry).await.unwrap();

        let written = dir.path().join("pages/home.css");
        assert_eq!(std::fs::read_to_string(&written).unwrap(), "a{}");
        assert_eq!(out[0].path(), written.as_path());
        assert_eq!(out[0].relative(), Path::new("pages/home.css"));
    }

    #[tokio::test]
    async fn test_rename_extension() {
        let entry = FileEntry::new("/s/main.scss", "/s", "");
        let out = Rename::extension("css").apply(entry).await.unwrap();
        assert_eq!(out[0].path(), Path::new("/s/main.css"));
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(12_500), "12.50 kB");
        assert_eq!(human_size(3_000_000), "3.00 MB");
    }
}
