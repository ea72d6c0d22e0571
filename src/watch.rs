//! File watching for automatic task re-execution
//!
//! Uses `notify` with debouncing to watch the project root, filters settled
//! paths through each [`WatchBinding`] and re-runs the bound tasks. Saves
//! that leave a file's content unchanged are ignored.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use console::style;
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use tokio::sync::mpsc;

use crate::error::{AssetError, Result};
use crate::glob::GlobSpec;
use crate::runner::Runner;

/// Re-run `tasks` when a file matching `patterns` changes.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    patterns: GlobSpec,
    tasks: Vec<String>,
}

impl WatchBinding {
    pub fn new<I, S>(patterns: GlobSpec, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns,
            tasks: tasks.into_iter().map(Into::into).collect(),
        }
    }

    pub fn patterns(&self) -> &GlobSpec {
        &self.patterns
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    /// Match a root-relative path.
    pub fn matches(&self, rel_path: &Path) -> bool {
        self.patterns.matches(rel_path)
    }
}

/// Tasks bound to a root-relative path, each named once, in binding order.
pub fn tasks_for<'a>(bindings: &'a [WatchBinding], rel_path: &Path) -> Vec<&'a str> {
    let mut tasks: Vec<&str> = Vec::new();
    for binding in bindings.iter().filter(|b| b.matches(rel_path)) {
        for task in &binding.tasks {
            if !tasks.contains(&task.as_str()) {
                tasks.push(task);
            }
        }
    }
    tasks
}

/// Last seen content hash per path.
#[derive(Debug, Default)]
pub struct ContentHashes {
    hashes: HashMap<PathBuf, blake3::Hash>,
}

impl ContentHashes {
    /// Record the current content of every file the bindings select.
    pub fn prime(root: &Path, bindings: &[WatchBinding]) -> Self {
        let mut hashes = HashMap::new();
        for binding in bindings {
            let Ok(files) = binding.patterns.expand(root) else {
                continue;
            };
            for file in files {
                if let Ok(bytes) = std::fs::read(&file.path) {
                    hashes.insert(file.path, blake3::hash(&bytes));
                }
            }
        }
        Self { hashes }
    }

    /// True if `path` differs from the last time it was seen. A deleted file
    /// counts as changed once.
    pub async fn changed(&mut self, path: &Path) -> bool {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let hash = blake3::hash(&bytes);
                self.hashes.insert(path.to_path_buf(), hash) != Some(hash)
            }
            Err(_) => self.hashes.remove(path).is_some(),
        }
    }
}

/// Paths whose events have settled. `AnyContinuous` marks a path that is
/// still being written; it is picked up once it goes quiet.
fn settled_paths<I>(events: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = (PathBuf, DebouncedEventKind)>,
{
    events
        .into_iter()
        .filter(|(_, kind)| matches!(kind, DebouncedEventKind::Any))
        .map(|(path, _)| path)
        .collect()
}

/// Debounced notify watcher over one root, forwarding settled paths into
/// tokio.
pub struct Watcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    root: PathBuf,
    batches: mpsc::UnboundedReceiver<Vec<PathBuf>>,
}

impl Watcher {
    /// Watch `root` recursively. A path is reported once it has been quiet
    /// for `debounce`.
    pub fn new(root: &Path, debounce: Duration) -> Result<Self> {
        let root = root.canonicalize()?;
        let (tx, batches) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(debounce, move |res: DebounceEventResult| match res {
            Ok(events) => {
                let paths = settled_paths(events.into_iter().map(|e| (e.path, e.kind)));
                if !paths.is_empty() {
                    let _ = tx.send(paths);
                }
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        })
        .map_err(|source| AssetError::Watch { source })?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| AssetError::Watch { source })?;

        tracing::info!(root = %root.display(), "file watcher started");
        Ok(Self {
            _debouncer: debouncer,
            root,
            batches,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Next batch of settled paths, absolute.
    pub async fn next_batch(&mut self) -> Option<Vec<PathBuf>> {
        self.batches.recv().await
    }
}

/// Watch the runner's root and re-run bound tasks until `shutdown`
/// resolves.
///
/// Each batch of settled paths runs every bound task once, however many of
/// its files changed.
pub async fn watch_and_run(
    runner: Runner,
    bindings: Vec<WatchBinding>,
    debounce: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let mut watcher = Watcher::new(runner.root(), debounce)?;
    let root = watcher.root().to_path_buf();

    let prime_root = root.clone();
    let prime_bindings = bindings.clone();
    let mut hashes =
        tokio::task::spawn_blocking(move || ContentHashes::prime(&prime_root, &prime_bindings))
            .await
            .unwrap_or_default();

    for binding in &bindings {
        println!(
            "{} Watching {} {} {}",
            style("👀").cyan(),
            style(binding.patterns().patterns().join(", ")).dim(),
            style("→").dim(),
            style(binding.tasks().join(", ")).bold()
        );
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            batch = watcher.next_batch() => {
                let Some(paths) = batch else { break };

                let mut due: Vec<&str> = Vec::new();
                for path in paths {
                    let Ok(rel) = path.strip_prefix(&root) else { continue };
                    let tasks = tasks_for(&bindings, rel);
                    if tasks.is_empty() || !hashes.changed(&path).await {
                        continue;
                    }
                    println!("{} Changed: {}", style("📝").yellow(), rel.display());
                    for task in tasks {
                        if !due.contains(&task) {
                            due.push(task);
                        }
                    }
                }

                for task in due {
                    let runner = runner.clone();
                    let task = task.to_string();
                    tokio::spawn(async move {
                        if let Err(e) = runner.run(&[task.as_str()]).await {
                            tracing::error!(task = %task, error = %e, "watch run failed");
                        }
                    });
                }
            }
            _ = &mut shutdown => {
                tracing::info!("stopping watch mode");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn binding(patterns: &[&str], tasks: &[&str]) -> WatchBinding {
        WatchBinding::new(GlobSpec::new(patterns).unwrap(), tasks.iter().copied())
    }

    #[test]
    fn test_tasks_for_path() {
        let bindings = vec![
            binding(&["src/css/sass/**/*.scss"], &["styles"]),
            binding(&["src/js/**/*.js", "!src/js/enlBase.js"], &["scripts"]),
            binding(&["src/**/*"], &["styles"]),
        ];

        assert_eq!(tasks_for(&bindings, Path::new("src/css/sass/a.scss")), vec!["styles"]);
        assert_eq!(tasks_for(&bindings, Path::new("src/js/a.js")), vec!["scripts", "styles"]);
        assert_eq!(tasks_for(&bindings, Path::new("src/js/enlBase.js")), vec!["styles"]);
        assert!(tasks_for(&bindings, Path::new("README.md")).is_empty());
    }

    #[test]
    fn test_only_settled_paths_pass() {
        let events = vec![
            (PathBuf::from("/p/a.js"), DebouncedEventKind::Any),
            (PathBuf::from("/p/big.js"), DebouncedEventKind::AnyContinuous),
            (PathBuf::from("/p/b.scss"), DebouncedEventKind::Any),
        ];
        assert_eq!(
            settled_paths(events),
            vec![PathBuf::from("/p/a.js"), PathBuf::from("/p/b.scss")]
        );
    }

    #[tokio::test]
    async fn test_content_hash_suppresses_identical_saves() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.scss");
        std::fs::write(&file, "a {}").unwrap();

        let bindings = vec![binding(&["*.scss"], &["styles"])];
        let mut hashes = ContentHashes::prime(dir.path(), &bindings);

        assert!(!hashes.changed(&file).await);
        std::fs::write(&file, "a { b: c }").unwrap();
        assert!(hashes.changed(&file).await);
        assert!(!hashes.changed(&file).await);
        std::fs::remove_file(&file).unwrap();
        assert!(hashes.changed(&file).await);
        assert!(!hashes.changed(&file).await);
    }
}
