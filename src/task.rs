//! Named units of work

use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::pipeline::{Pipeline, PipelineResult};
use crate::plugins::lint::{LintDiagnostic, LintStep};
use crate::watch::WatchBinding;

/// A named task: dependencies, the pipelines it runs, and the watch bindings
/// it registers.
///
/// A task without pipelines is a composite that only pulls in its
/// dependencies.
#[derive(Debug, Default)]
pub struct TaskSpec {
    pub name: String,
    pub description: Option<String>,
    pub depends: Vec<String>,
    pub pipelines: Vec<Pipeline>,
    pub lint: Option<LintStep>,
    pub watch: Vec<WatchBinding>,
}

/// What running a task produced.
#[derive(Debug)]
pub struct TaskReport {
    pub name: String,
    pub result: PipelineResult,
    pub lint: Vec<LintDiagnostic>,
    pub duration: Duration,
}

impl TaskReport {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipelines.push(pipeline);
        self
    }

    /// Lint alongside the pipelines. Findings never fail the task.
    pub fn lint(mut self, step: LintStep) -> Self {
        self.lint = Some(step);
        self
    }

    pub fn watch(mut self, binding: WatchBinding) -> Self {
        self.watch.push(binding);
        self
    }

    pub fn is_composite(&self) -> bool {
        self.pipelines.is_empty() && self.lint.is_none()
    }

    /// Run the pipelines (and lint step) concurrently against `root`.
    ///
    /// Per-file failures land in the report; an `Err` means a pipeline could
    /// not even list its sources.
    pub async fn run(&self, root: &Path) -> Result<TaskReport> {
        let started = Instant::now();

        let pipelines = futures::future::try_join_all(self.pipelines.iter().map(|p| p.run(root)));
        let lint = async {
            match &self.lint {
                Some(step) => step.run(root).await,
                None => Ok(Vec::new()),
            }
        };
        let (results, lint) = tokio::join!(pipelines, lint);

        let mut result = PipelineResult::default();
        for r in results? {
            result.merge(r);
        }

        let lint = lint.unwrap_or_else(|e| {
            tracing::warn!(task = %self.name, error = %e, "lint step could not run");
            Vec::new()
        });

        Ok(TaskReport {
            name: self.name.clone(),
            result,
            lint,
            duration: started.elapsed(),
        })
    }
}
