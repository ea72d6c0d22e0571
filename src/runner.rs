//! Task execution engine
//!
//! Resolves requested targets against the [`TaskGraph`], then runs the plan
//! level by level: tasks within a level run concurrently, levels run in
//! order. A failing task never aborts its siblings; everything that depends
//! on it is skipped and the run ends failed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::broadcast;

use crate::error::{AssetError, Result};
use crate::graph::{ExecutionPlan, TaskGraph};
use crate::task::{TaskReport, TaskSpec};
use crate::watch::WatchBinding;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Requested,
    Resolving,
    Running,
    Done,
    Failed,
}

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    Failed,
    /// A dependency failed, so the task never started.
    Skipped,
}

/// Published on the runner's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Started { task: String },
    Finished { task: String, status: TaskStatus },
}

/// Result of one task within a run.
#[derive(Debug)]
pub struct TaskOutcome {
    pub name: String,
    pub status: TaskStatus,
    pub report: Option<TaskReport>,
    /// Set when the task could not run its pipelines at all.
    pub error: Option<String>,
}

/// Result of a whole run.
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub tasks: Vec<TaskOutcome>,
    /// Bindings registered by the tasks that succeeded.
    pub watch_bindings: Vec<WatchBinding>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn failed_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn status_of(&self, name: &str) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| t.name == name).map(|t| t.status)
    }

    /// One `TaskFailed` per failed task, carrying its file errors.
    pub fn task_failures(&self) -> Vec<AssetError> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| AssetError::TaskFailed {
                task: t.name.clone(),
                errors: t
                    .report
                    .as_ref()
                    .map(|r| r.result.errors.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// `Err(RunFailed)` unless every task succeeded.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(AssetError::RunFailed {
                tasks: self.failed_tasks(),
            })
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// No progress output, errors only
    pub quiet: bool,
    /// Show the plugin behind every error
    pub stacktrace: bool,
}

/// Runs tasks from a shared graph. Cheap to clone; clones share the event
/// channel.
#[derive(Clone)]
pub struct Runner {
    graph: Arc<TaskGraph>,
    root: PathBuf,
    options: RunnerOptions,
    events: broadcast::Sender<TaskEvent>,
}

impl Runner {
    pub fn new(graph: TaskGraph, root: impl Into<PathBuf>, options: RunnerOptions) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            graph: Arc::new(graph),
            root: root.into(),
            options,
            events,
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TaskEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Run `targets` and everything they depend on.
    ///
    /// Returns `Err` only when resolving fails (unknown target); no task
    /// has run in that case. Task failures are reported in the [`RunReport`].
    pub async fn run(&self, targets: &[&str]) -> Result<RunReport> {
        tracing::debug!(?targets, state = ?RunState::Requested, "run");

        tracing::debug!(state = ?RunState::Resolving, "run");
        let plan = self.graph.plan(targets)?;

        tracing::debug!(state = ?RunState::Running, tasks = plan.tasks.len(), "run");
        let outcomes = self.execute(&plan).await;

        let failed = outcomes.iter().any(|o| o.status != TaskStatus::Succeeded);
        let state = if failed { RunState::Failed } else { RunState::Done };
        tracing::debug!(?state, "run");

        let watch_bindings = outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Succeeded)
            .filter_map(|o| self.graph.get_task(&o.name))
            .flat_map(|t| t.watch.iter().cloned())
            .collect();

        if !self.options.quiet {
            print_summary(&outcomes);
        }

        Ok(RunReport {
            state,
            tasks: outcomes,
            watch_bindings,
        })
    }

    async fn execute(&self, plan: &ExecutionPlan<'_>) -> Vec<TaskOutcome> {
        let mut status: HashMap<String, TaskStatus> = HashMap::new();
        let mut outcomes = Vec::new();

        // Execute groups sequentially, tasks within groups in parallel
        for group in &plan.parallel_groups {
            let mut runnable = Vec::new();

            for &task in group {
                let blocked = task
                    .depends
                    .iter()
                    .find(|d| status.get(d.as_str()).is_some_and(|s| *s != TaskStatus::Succeeded));

                match blocked {
                    Some(dep) => {
                        if !self.options.quiet {
                            println!(
                                "{} Skipping '{}', '{}' did not succeed",
                                timestamp(),
                                style(&task.name).cyan(),
                                dep
                            );
                        }
                        status.insert(task.name.clone(), TaskStatus::Skipped);
                        self.emit(TaskEvent::Finished {
                            task: task.name.clone(),
                            status: TaskStatus::Skipped,
                        });
                        outcomes.push(TaskOutcome {
                            name: task.name.clone(),
                            status: TaskStatus::Skipped,
                            report: None,
                            error: None,
                        });
                    }
                    None => runnable.push(task),
                }
            }

            let multi_progress = MultiProgress::new();
            let results = futures::future::join_all(
                runnable.into_iter().map(|task| self.run_task(task, &multi_progress)),
            )
            .await;

            for outcome in results {
                status.insert(outcome.name.clone(), outcome.status);
                outcomes.push(outcome);
            }
        }

        outcomes
    }

    async fn run_task(&self, task: &TaskSpec, multi_progress: &MultiProgress) -> TaskOutcome {
        self.emit(TaskEvent::Started {
            task: task.name.clone(),
        });

        if !self.options.quiet {
            println!("{} Starting '{}'...", timestamp(), style(&task.name).cyan());
        }
        let pb = if self.options.quiet || task.is_composite() {
            None
        } else {
            let pb = multi_progress.add(ProgressBar::new_spinner());
            if let Ok(spinner) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
                pb.set_style(spinner);
            }
            pb.set_message(format!("Running {}", task.name));
            pb.enable_steady_tick(Duration::from_millis(100));
            Some(pb)
        };

        let result = task.run(&self.root).await;

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let outcome = match result {
            Ok(report) => TaskOutcome {
                name: task.name.clone(),
                status: if report.is_success() {
                    TaskStatus::Succeeded
                } else {
                    TaskStatus::Failed
                },
                report: Some(report),
                error: None,
            },
            Err(e) => TaskOutcome {
                name: task.name.clone(),
                status: TaskStatus::Failed,
                report: None,
                error: Some(e.to_string()),
            },
        };

        self.print_task_result(&outcome);
        self.emit(TaskEvent::Finished {
            task: outcome.name.clone(),
            status: outcome.status,
        });
        outcome
    }

    /// Print result of a single task
    fn print_task_result(&self, outcome: &TaskOutcome) {
        if let Some(report) = &outcome.report {
            for error in &report.result.errors {
                if self.options.stacktrace {
                    eprintln!(
                        "  {} {}",
                        style(format!("[{}]", error.plugin)).dim(),
                        style(error).red()
                    );
                } else {
                    eprintln!("  {}", style(error).red());
                }
            }
            if !report.lint.is_empty() && !self.options.quiet {
                println!(
                    "  {} {} lint warning(s)",
                    style("!").yellow(),
                    report.lint.len()
                );
            }
        }
        if let Some(error) = &outcome.error {
            eprintln!("  {}", style(error).red());
        }

        if self.options.quiet {
            return;
        }

        let elapsed = outcome
            .report
            .as_ref()
            .map(|r| format_duration(r.duration))
            .unwrap_or_default();

        match outcome.status {
            TaskStatus::Succeeded => println!(
                "{} Finished '{}' after {}",
                timestamp(),
                style(&outcome.name).cyan(),
                style(elapsed).magenta()
            ),
            _ => println!(
                "{} {} '{}' errored after {}",
                timestamp(),
                style("✗").red(),
                style(&outcome.name).cyan(),
                style(elapsed).magenta()
            ),
        }
    }
}

fn timestamp() -> String {
    let now = chrono::Local::now().format("%H:%M:%S").to_string();
    format!("[{}]", style(now).dim())
}

fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1000 {
        format!("{ms} ms")
    } else {
        format!("{:.2} s", duration.as_secs_f64())
    }
}

/// Print execution summary
fn print_summary(outcomes: &[TaskOutcome]) {
    let count = |s: TaskStatus| outcomes.iter().filter(|o| o.status == s).count();
    let succeeded = count(TaskStatus::Succeeded);
    let failed = count(TaskStatus::Failed);
    let skipped = count(TaskStatus::Skipped);

    if failed == 0 && skipped == 0 {
        println!(
            "{} {} task(s) completed",
            style("✓").green().bold(),
            succeeded
        );
    } else {
        println!(
            "{} {} succeeded, {} failed, {} skipped",
            style("✗").red().bold(),
            succeeded,
            failed,
            skipped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::FileEntry;
    use crate::error::TransformError;
    use crate::glob::GlobSpec;
    use crate::graph::TaskGraphBuilder;
    use crate::pipeline::Pipeline;
    use crate::transform::{from_fn, Dest};
    use tempfile::TempDir;

    fn quiet() -> RunnerOptions {
        RunnerOptions {
            quiet: true,
            ..RunnerOptions::default()
        }
    }

    fn copy_task(root: &Path, name: &str, file: &str, deps: &[&str]) -> TaskSpec {
        let source = GlobSpec::new([file]).unwrap();
        TaskSpec::new(name)
            .depends_on(deps.iter().copied())
            .pipeline(Pipeline::new(name, source).each(Dest::new(root.join("out"))))
    }

    fn failing_task(name: &str, file: &str) -> TaskSpec {
        TaskSpec::new(name).pipeline(
            Pipeline::new(name, GlobSpec::new([file]).unwrap()).each(from_fn("boom", |e: FileEntry| {
                Err(TransformError::new("boom", e.path(), "exploded"))
            })),
        )
    }

    fn setup() -> TempDir {
        let dir = TempDir::new().unwrap();
        for f in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(dir.path().join(f), f).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_dependents_of_failed_task_are_skipped() {
        let dir = setup();
        let mut builder = TaskGraphBuilder::new();
        builder.add(failing_task("broken", "a.txt")).unwrap();
        builder.add(copy_task(dir.path(), "after", "b.txt", &["broken"])).unwrap();
        builder.add(copy_task(dir.path(), "independent", "c.txt", &[])).unwrap();
        builder.add(TaskSpec::new("all").depends_on(["after", "independent"])).unwrap();

        let runner = Runner::new(builder.build().unwrap(), dir.path(), quiet());
        let report = runner.run(&["all"]).await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.status_of("broken"), Some(TaskStatus::Failed));
        assert_eq!(report.status_of("after"), Some(TaskStatus::Skipped));
        assert_eq!(report.status_of("all"), Some(TaskStatus::Skipped));
        assert_eq!(report.status_of("independent"), Some(TaskStatus::Succeeded));
        assert_eq!(report.failed_tasks(), vec!["broken"]);
        assert!(!dir.path().join("out/b.txt").exists());
    }

    #[tokio::test]
    async fn test_unknown_target_runs_nothing() {
        let dir = setup();
        let mut builder = TaskGraphBuilder::new();
        builder.add(copy_task(dir.path(), "copy", "a.txt", &[])).unwrap();

        let runner = Runner::new(builder.build().unwrap(), dir.path(), quiet());
        let mut events = runner.subscribe();

        assert!(matches!(
            runner.run(&["copy", "nope"]).await,
            Err(AssetError::TaskNotFound { .. })
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let dir = setup();
        let mut builder = TaskGraphBuilder::new();
        builder.add(copy_task(dir.path(), "first", "a.txt", &[])).unwrap();
        builder.add(copy_task(dir.path(), "second", "b.txt", &["first"])).unwrap();

        let runner = Runner::new(builder.build().unwrap(), dir.path(), quiet());
        let mut events = runner.subscribe();
        let report = runner.run(&["second"]).await.unwrap();
        assert!(report.is_success());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                TaskEvent::Started { task: "first".into() },
                TaskEvent::Finished { task: "first".into(), status: TaskStatus::Succeeded },
                TaskEvent::Started { task: "second".into() },
                TaskEvent::Finished { task: "second".into(), status: TaskStatus::Succeeded },
            ]
        );
    }

    #[tokio::test]
    async fn test_into_result_names_failures() {
        let dir = setup();
        let mut builder = TaskGraphBuilder::new();
        builder.add(failing_task("broken", "a.txt")).unwrap();

        let runner = Runner::new(builder.build().unwrap(), dir.path(), quiet());
        let report = runner.run(&["broken"]).await.unwrap();

        match report.task_failures().as_slice() {
            [AssetError::TaskFailed { task, errors }] => {
                assert_eq!(task, "broken");
                assert_eq!(errors[0].message, "exploded");
            }
            other => panic!("expected one task failure, got {other:?}"),
        }

        let err = report.into_result().unwrap_err();
        assert_eq!(err.to_string(), "1 task(s) failed: broken");
    }
}
