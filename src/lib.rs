//! assetpipe - front-end asset builds as dependency-aware tasks
//!
//! This crate provides both a CLI tool and a library for building styles,
//! scripts and images.
//!
//! # Features
//!
//! - **File pipelines** - glob sources through ordered transforms, with tee
//! - **Dependency resolution** - tasks run level by level, cycles rejected up front
//! - **Standard tasks** - Sass, autoprefixing, script bundling, image compression
//! - **Build modes** - development source maps vs compressed production output
//! - **File watching** - debounced re-runs, with a live-reloading dev server
//!
//! # Example
//!
//! ```toml
//! # assetpipe.toml
//!
//! [paths]
//! src = "assets/"
//! dest = "public/"
//!
//! [tasks.ci]
//! desc = "Everything a CI build needs"
//! depends = ["build", "imagemin", "imagemin:png"]
//! ```
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use assetpipe::{standard_graph, BuildContext, BuildMode, Config, Runner, RunnerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (config, _) = Config::load(None)?;
//!     let ctx = BuildContext::new(".", BuildMode::Production, config.concurrency());
//!     let graph = standard_graph(&config, &ctx)?;
//!
//!     let runner = Runner::new(graph, ".", RunnerOptions::default());
//!     runner.run(&["build"]).await?.into_result()?;
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod entry;
pub mod error;
pub mod glob;
pub mod graph;
pub mod pipeline;
pub mod plugins;
pub mod runner;
pub mod serve;
pub mod sourcemap;
pub mod task;
pub mod tasks;
pub mod transform;
pub mod watch;

// Re-export main types
pub use config::{BuildMode, Config};
pub use entry::FileEntry;
pub use error::{AssetError, Result, TransformError};
pub use glob::GlobSpec;
pub use graph::{ExecutionPlan, TaskGraph, TaskGraphBuilder};
pub use pipeline::{Branch, Pipeline, PipelineResult};
pub use runner::{RunReport, Runner, RunnerOptions, TaskEvent, TaskStatus};
pub use task::{TaskReport, TaskSpec};
pub use tasks::{standard_graph, standard_tasks, BuildContext};
pub use transform::{Aggregate, Stage, Transform};
pub use watch::WatchBinding;
