//! assetpipe - front-end asset builds
//!
//! Compiles styles, bundles scripts and compresses images through
//! dependency-aware task pipelines, with a watch mode and a live-reloading
//! dev server for development.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

use assetpipe::cli::{Cli, Commands, EffectiveCommand, GraphFormat, ListFormat};
use assetpipe::config::{BuildMode, Config, CONFIG_FILES};
use assetpipe::error::{AssetError, Result};
use assetpipe::graph::TaskGraph;
use assetpipe::runner::{Runner, RunnerOptions};
use assetpipe::serve::{forward_reloads, open_browser, DevServer, ServeOptions};
use assetpipe::tasks::{standard_graph, BuildContext};
use assetpipe::watch::watch_and_run;

#[tokio::main]
async fn main() -> ExitCode {
    // Set up panic handler for nice error messages
    miette::set_panic_hook();

    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ASSETPIPE_LOG")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .without_time()
        .init();

    // Handle --no-color
    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            ExitCode::FAILURE
        }
    }
}

/// Loaded configuration plus everything derived from the command line.
struct Session {
    config: Config,
    config_path: Option<PathBuf>,
    ctx: BuildContext,
}

impl Session {
    fn load(cli: &Cli) -> Result<Self> {
        let (mut config, config_path) = Config::load(cli.config.as_deref())?;
        if let Some(concurrency) = cli.concurrency {
            config.settings.concurrency = concurrency;
        }

        // Paths in the config are relative to the file that declares them
        let root = match config_path.as_deref().and_then(Path::parent) {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => std::env::current_dir()?,
        };

        let mode = if cli.prod {
            BuildMode::Production
        } else {
            config.settings.mode
        };

        let ctx = BuildContext::new(root, mode, config.concurrency());
        Ok(Self {
            config,
            config_path,
            ctx,
        })
    }

    fn graph(&self) -> Result<TaskGraph> {
        standard_graph(&self.config, &self.ctx)
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Change working directory if specified
    if let Some(cwd) = &cli.cwd {
        std::env::set_current_dir(cwd)?;
    }

    match cli.effective_command() {
        EffectiveCommand::Subcommand(cmd) => run_command(cmd, &cli).await,
        EffectiveCommand::RunTasks(tasks) => run_tasks(&tasks, false, &cli).await,
    }
}

async fn run_command(cmd: &Commands, cli: &Cli) -> Result<()> {
    match cmd {
        Commands::Run { tasks, dry_run } => {
            let tasks: Vec<&str> = tasks.iter().map(String::as_str).collect();
            run_tasks(&tasks, *dry_run, cli).await
        }

        Commands::List { format, deps } => {
            let session = Session::load(cli)?;
            print_task_list(&session.graph()?, format.clone(), *deps)
        }

        Commands::Graph { task, format } => {
            let session = Session::load(cli)?;
            print_graph(&session.graph()?, task.as_deref(), format.clone())
        }

        Commands::Init { force } => init_config(*force),

        Commands::Check => {
            let session = Session::load(cli)?;

            // The other build mode has to resolve too
            let graph = session.graph()?;
            let other = if session.ctx.mode.is_production() {
                BuildMode::Development
            } else {
                BuildMode::Production
            };
            standard_graph(&session.config, &BuildContext::new(&session.ctx.root, other, 1))?;

            if which::which(&session.config.tools.sass).is_err() {
                println!(
                    "{} sass executable '{}' not found, the styles task will fail",
                    style("!").yellow(),
                    session.config.tools.sass
                );
            }

            let source = session
                .config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "default configuration".to_string());
            println!(
                "{} {} is valid ({} tasks)",
                style("✓").green(),
                source,
                graph.task_names().count()
            );
            Ok(())
        }
    }
}

async fn run_tasks(tasks: &[&str], dry_run: bool, cli: &Cli) -> Result<()> {
    let session = Session::load(cli)?;
    let graph = session.graph()?;
    let mode = session.ctx.mode;

    if dry_run {
        let plan = graph.plan(tasks)?;
        println!(
            "{} ({} build)",
            style("Execution plan:").bold(),
            style(mode).cyan()
        );
        for (level, group) in plan.parallel_groups.iter().enumerate() {
            let names: Vec<&str> = group.iter().map(|t| t.name.as_str()).collect();
            println!("  {}. {}", level + 1, names.join(", "));
        }
        return Ok(());
    }

    tracing::info!(%mode, root = %session.ctx.root.display(), "starting run");

    let options = RunnerOptions {
        quiet: cli.quiet,
        stacktrace: cli.stacktrace,
    };
    let runner = Runner::new(graph, session.ctx.root.clone(), options);
    let report = runner.run(tasks).await?;

    if cli.stacktrace {
        for failure in report.task_failures() {
            eprintln!("{:?}", miette::Report::new(failure));
        }
    }

    // A broken file in the initial build is what watch mode is for
    if mode.is_production() || report.watch_bindings.is_empty() {
        return report.into_result().map(drop);
    }
    if !report.is_success() {
        println!(
            "{} Initial build failed, watching for fixes",
            style("!").yellow()
        );
    }

    let server = start_server(&session, &runner)?;
    let debounce = Duration::from_millis(session.config.settings.debounce_ms);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "no Ctrl-C handler, watching until killed");
            std::future::pending::<()>().await;
        }
    };
    let watched = watch_and_run(runner, report.watch_bindings, debounce, shutdown).await;

    if let Some(server) = server {
        server.shutdown();
    }
    watched
}

/// Serve the destination root with live reload, if enabled.
fn start_server(
    session: &Session,
    runner: &Runner,
) -> Result<Option<assetpipe::serve::ServerHandle>> {
    let serve = &session.config.serve;
    if !serve.enabled {
        return Ok(None);
    }

    let root = session.config.paths.serve_root(&session.ctx.root);
    let server = DevServer::bind(
        &serve.host,
        serve.port,
        root,
        ServeOptions {
            livereload: serve.livereload,
            directory_listing: serve.directory_listing,
        },
    )?;

    let url = format!("http://{}/", server.addr());
    println!("{} Serving at {}", style("🌐").cyan(), style(&url).bold());
    if serve.open {
        if let Err(e) = open_browser(&url) {
            tracing::warn!(%url, error = %e, "could not open a browser");
        }
    }

    if serve.livereload {
        forward_reloads(runner, server.reload_signal());
    }
    Ok(Some(server.spawn()))
}

fn print_task_list(graph: &TaskGraph, format: ListFormat, show_deps: bool) -> Result<()> {
    match format {
        ListFormat::Table => {
            println!("{}", style("Available tasks:").bold());
            println!();

            let names: Vec<_> = graph.task_names().collect();
            let max_name_len = names.iter().map(|n| n.len()).max().unwrap_or(0);

            for name in names {
                let Some(task) = graph.get_task(name) else {
                    continue;
                };
                let desc = task.description.as_deref().unwrap_or("");

                print!(
                    "  {}{}  {}",
                    style(name).cyan().bold(),
                    " ".repeat(max_name_len - name.len()),
                    style(desc).dim()
                );

                if show_deps && !task.depends.is_empty() {
                    print!(
                        " {}",
                        style(format!("[deps: {}]", task.depends.join(", "))).yellow().dim()
                    );
                }

                println!();
            }
        }

        ListFormat::Json => {
            let mut tasks = serde_json::Map::new();
            for task in graph.tasks() {
                let mut obj = serde_json::Map::new();
                if let Some(desc) = &task.description {
                    obj.insert("description".to_string(), serde_json::json!(desc));
                }
                if show_deps {
                    obj.insert("depends".to_string(), serde_json::json!(task.depends));
                }
                tasks.insert(task.name.clone(), serde_json::Value::Object(obj));
            }
            println!("{}", to_json(&tasks)?);
        }

        ListFormat::Plain => {
            for name in graph.task_names() {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

fn print_graph(graph: &TaskGraph, task: Option<&str>, format: GraphFormat) -> Result<()> {
    let tasks = match task {
        Some(name) => graph.execution_order(&[name])?,
        None => {
            let all: Vec<&str> = graph.task_names().collect();
            graph.execution_order(&all)?
        }
    };

    match format {
        GraphFormat::Text => {
            println!("{}", style("Task dependency graph:").bold());
            println!();

            for task in &tasks {
                if task.depends.is_empty() {
                    println!("  {}", style(&task.name).cyan().bold());
                } else {
                    println!(
                        "  {} {} {}",
                        style(&task.name).cyan().bold(),
                        style("←").dim(),
                        task.depends.join(", ")
                    );
                }
            }
        }

        GraphFormat::Dot => {
            println!("digraph assetpipe {{");
            println!("  rankdir=LR;");
            println!("  node [shape=box];");

            for task in &tasks {
                println!("  \"{}\";", task.name);
                for dep in &task.depends {
                    println!("  \"{}\" -> \"{}\";", dep, task.name);
                }
            }

            println!("}}");
        }

        GraphFormat::Json => {
            let mut nodes = Vec::new();
            let mut edges = Vec::new();

            for task in &tasks {
                nodes.push(serde_json::json!({
                    "id": task.name,
                    "description": task.description,
                }));
                for dep in &task.depends {
                    edges.push(serde_json::json!({
                        "from": dep,
                        "to": task.name,
                    }));
                }
            }

            let output = serde_json::json!({
                "nodes": nodes,
                "edges": edges,
            });
            println!("{}", to_json(&output)?);
        }
    }

    Ok(())
}

fn to_json(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| AssetError::Io(e.into()))
}

fn init_config(force: bool) -> Result<()> {
    let path = Path::new(CONFIG_FILES[0]);

    if path.exists() && !force {
        return Err(AssetError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists (use --force to overwrite)", CONFIG_FILES[0]),
        )));
    }

    let template = r#"# assetpipe.toml - asset build configuration
# Every value below is the default; delete what you do not change.

[settings]
# mode = "development"      # or "production" (same as --prod)
# concurrency = 0           # files in flight per pipeline (0 = auto)
# debounce_ms = 200         # watch mode debounce delay

[paths]
src = "src/"
dest = "src/"
styles_src = "css/sass/"
styles_dest = "css/"
scripts_src = "js/"
scripts_dest = "js/"
images_src = ""
images_dest = ""

[bundles]
vendor_dir = "vendors/"
vendor = "vendors.js"
app = "enlBase.js"

[tools]
sass = "sass"
browsers = ["last 2 versions"]
jpeg_quality = 70

[serve]
port = 8000
livereload = true
directory_listing = true
open = false                # open the served root in a browser on start

# Composite tasks run their dependencies and nothing else
# [tasks.ci]
# desc = "Everything a CI build needs"
# depends = ["build", "imagemin", "imagemin:png"]
"#;

    std::fs::write(path, template)?;

    println!(
        "{} Created {}",
        style("✓").green(),
        style(CONFIG_FILES[0]).bold()
    );

    Ok(())
}
