//! File pipelines
//!
//! A pipeline expands its source glob, reads every match and pushes each file
//! through the stages in declared order. Per-file steps run concurrently up
//! to the configured ceiling; a file that fails is dropped with its error
//! recorded while its siblings carry on. Aggregate stages wait for every
//! surviving file and see them in source order, so bundles come out in glob
//! order no matter which file finished first.
//!
//! A pipeline may `tee` into branches: the files read once upstream feed each
//! branch, optionally narrowed by a filter glob, and the branches run side by
//! side.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::entry::FileEntry;
use crate::error::{AssetError, Result, TransformError};
use crate::glob::GlobSpec;
use crate::transform::{Aggregate, Stage, Transform};

/// Outcome of one pipeline (or several, merged).
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    /// Input files that made it through every stage.
    pub succeeded: usize,
    /// Input files dropped because a stage failed on them.
    pub failed: usize,
    /// Errors in source order.
    pub errors: Vec<TransformError>,
    /// Entries leaving the last stage.
    pub outputs: Vec<FileEntry>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: PipelineResult) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.errors.extend(other.errors);
        self.outputs.extend(other.outputs);
    }
}

/// Downstream half of a tee.
#[derive(Clone, Debug)]
pub struct Branch {
    name: String,
    filter: Option<GlobSpec>,
    stages: Vec<Stage>,
}

impl Branch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
            stages: Vec::new(),
        }
    }

    /// Only feed this branch the upstream files matching `filter`.
    pub fn filter(mut self, filter: GlobSpec) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn each(mut self, transform: impl Transform + 'static) -> Self {
        self.stages.push(Stage::each(transform));
        self
    }

    pub fn all(mut self, aggregate: impl Aggregate + 'static) -> Self {
        self.stages.push(Stage::all(aggregate));
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Source glob plus ordered stages.
#[derive(Clone, Debug)]
pub struct Pipeline {
    name: String,
    source: GlobSpec,
    stages: Vec<Stage>,
    branches: Vec<Branch>,
    concurrency: usize,
}

/// An entry in flight, with the input files it came from.
struct Item {
    entry: FileEntry,
    rank: (usize, usize),
    origins: Vec<usize>,
}

#[derive(Default)]
struct Outcome {
    items: Vec<Item>,
    errors: Vec<(usize, TransformError)>,
    dropped: BTreeSet<usize>,
}

impl Outcome {
    fn fail(&mut self, origins: &[usize], error: TransformError) {
        tracing::debug!(%error, "dropping file");
        let key = origins.iter().copied().min().unwrap_or(usize::MAX);
        self.errors.push((key, error));
        self.dropped.extend(origins.iter().copied());
    }
}

impl Pipeline {
    pub fn new(name: impl Into<String>, source: GlobSpec) -> Self {
        Self {
            name: name.into(),
            source,
            stages: Vec::new(),
            branches: Vec::new(),
            concurrency: 16,
        }
    }

    pub fn each(mut self, transform: impl Transform + 'static) -> Self {
        self.stages.push(Stage::each(transform));
        self
    }

    pub fn all(mut self, aggregate: impl Aggregate + 'static) -> Self {
        self.stages.push(Stage::all(aggregate));
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Feed the upstream files into another branch as well.
    pub fn tee(mut self, branch: Branch) -> Self {
        self.branches.push(branch);
        self
    }

    /// Ceiling on files processed at the same time.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &GlobSpec {
        &self.source
    }

    /// Run against the current state of `root`.
    ///
    /// Only failing to list the source files is an error; everything that
    /// goes wrong per file is reported in the result.
    pub async fn run(&self, root: &Path) -> Result<PipelineResult> {
        let source = self.source.clone();
        let walk_root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || source.expand(&walk_root))
            .await
            .map_err(|e| AssetError::Io(std::io::Error::other(e.to_string())))??;

        let inputs = files.len();
        tracing::debug!(pipeline = %self.name, files = inputs, "source expanded");

        let mut upstream = Outcome::default();
        let reads: Vec<(usize, std::io::Result<FileEntry>, std::path::PathBuf)> =
            stream::iter(files.into_iter().enumerate())
                .map(|(idx, file)| async move {
                    let read = FileEntry::read(&file.path, &file.base).await;
                    (idx, read, file.path)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        for (idx, read, path) in reads {
            match read {
                Ok(entry) => upstream.items.push(Item {
                    entry,
                    rank: (idx, 0),
                    origins: vec![idx],
                }),
                Err(e) => upstream.fail(&[idx], TransformError::new("read", &path, e.to_string())),
            }
        }
        upstream.items.sort_by_key(|item| item.rank);

        let items = std::mem::take(&mut upstream.items);
        let mut outcome = run_stages(&self.stages, items, self.concurrency).await;
        outcome.errors.splice(0..0, upstream.errors);
        outcome.dropped.extend(upstream.dropped);

        if !self.branches.is_empty() {
            let items = std::mem::take(&mut outcome.items);
            let branch_runs = self.branches.iter().map(|branch| {
                let subset = items
                    .iter()
                    .filter(|item| branch_accepts(branch, root, &item.entry))
                    .map(|item| Item {
                        entry: item.entry.clone(),
                        rank: item.rank,
                        origins: item.origins.clone(),
                    })
                    .collect::<Vec<_>>();
                tracing::debug!(branch = %branch.name, files = subset.len(), "tee");
                run_stages(&branch.stages, subset, self.concurrency)
            });

            for branch in futures::future::join_all(branch_runs).await {
                outcome.items.extend(branch.items);
                outcome.errors.extend(branch.errors);
                outcome.dropped.extend(branch.dropped);
            }
        }

        outcome.errors.sort_by_key(|(key, _)| *key);
        let failed = outcome.dropped.len();

        Ok(PipelineResult {
            succeeded: inputs - failed,
            failed,
            errors: outcome.errors.into_iter().map(|(_, e)| e).collect(),
            outputs: outcome.items.into_iter().map(|item| item.entry).collect(),
        })
    }
}

fn branch_accepts(branch: &Branch, root: &Path, entry: &FileEntry) -> bool {
    match &branch.filter {
        None => true,
        Some(filter) => entry
            .path()
            .strip_prefix(root)
            .map(|rel| filter.matches(rel))
            .unwrap_or(false),
    }
}

/// Push items through a list of stages, splitting at aggregate barriers.
async fn run_stages(stages: &[Stage], mut items: Vec<Item>, concurrency: usize) -> Outcome {
    let mut outcome = Outcome::default();
    let mut start = 0;

    while start < stages.len() {
        let end = stages[start..]
            .iter()
            .position(|s| matches!(s, Stage::All(_)))
            .map(|p| start + p)
            .unwrap_or(stages.len());

        let segment: Vec<Arc<dyn Transform>> = stages[start..end]
            .iter()
            .filter_map(|s| match s {
                Stage::Each(t) => Some(Arc::clone(t)),
                Stage::All(_) => None,
            })
            .collect();

        if !segment.is_empty() {
            items = map_segment(&segment, items, concurrency, &mut outcome).await;
        }

        if let Some(Stage::All(aggregate)) = stages.get(end) {
            items = aggregate_items(aggregate.as_ref(), items, &mut outcome).await;
        }

        start = end + 1;
    }

    outcome.items = items;
    outcome
}

/// Run consecutive per-file transforms over every item concurrently.
async fn map_segment(
    segment: &[Arc<dyn Transform>],
    items: Vec<Item>,
    concurrency: usize,
    outcome: &mut Outcome,
) -> Vec<Item> {
    let results: Vec<_> = stream::iter(items)
        .map(|item| async move {
            let result = apply_chain(segment, item.entry).await;
            (item.rank, item.origins, result)
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut survivors = Vec::new();
    for (rank, origins, result) in results {
        match result {
            Ok(entries) => {
                for (i, entry) in entries.into_iter().enumerate() {
                    survivors.push(Item {
                        entry,
                        rank: (rank.0, rank.1 + i),
                        origins: origins.clone(),
                    });
                }
            }
            Err(error) => outcome.fail(&origins, error),
        }
    }

    // Restore source order, then renumber so later fan-outs stay ordered.
    survivors.sort_by_key(|item| item.rank);
    for (i, item) in survivors.iter_mut().enumerate() {
        item.rank = (i, 0);
    }
    survivors
}

async fn apply_chain(
    segment: &[Arc<dyn Transform>],
    entry: FileEntry,
) -> std::result::Result<Vec<FileEntry>, TransformError> {
    let mut current = vec![entry];
    for transform in segment {
        let mut next = Vec::with_capacity(current.len());
        for entry in current {
            next.extend(transform.apply(entry).await?);
        }
        current = next;
    }
    Ok(current)
}

async fn aggregate_items(aggregate: &dyn Aggregate, mut items: Vec<Item>, outcome: &mut Outcome) -> Vec<Item> {
    if items.is_empty() {
        return items;
    }

    items.sort_by_key(|item| item.rank);
    let origins: Vec<usize> = items
        .iter()
        .flat_map(|item| item.origins.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let entries = items.into_iter().map(|item| item.entry).collect();

    match aggregate.aggregate(entries).await {
        Ok(entries) => entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| Item {
                entry,
                rank: (i, 0),
                origins: origins.clone(),
            })
            .collect(),
        Err(error) => {
            outcome.fail(&origins, error);
            Vec::new()
        }
    }
}
