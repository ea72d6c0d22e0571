//! The standard asset tasks
//!
//! Builds `styles`, `scripts`, `imagemin`, `imagemin:png`, `watch`,
//! `default` and `build` from a [`Config`], plus any composite tasks the
//! config declares. The build mode is fixed here: mode-dependent stages are
//! wrapped in a [`ModeGate`] and watch bindings only exist in development.

use std::path::PathBuf;

use crate::config::{join_glob, resolve, BuildMode, Config};
use crate::error::Result;
use crate::glob::GlobSpec;
use crate::graph::{TaskGraph, TaskGraphBuilder};
use crate::pipeline::{Branch, Pipeline};
use crate::plugins::lint::LintStep;
use crate::plugins::{Autoprefix, CompressImage, Concat, JsLinter, MinifyJs, Sass};
use crate::sourcemap::{InitSourceMaps, WriteSourceMaps};
use crate::task::TaskSpec;
use crate::transform::{Dest, ModeGate, Rename, ReportSize};
use crate::watch::WatchBinding;

/// Everything task construction needs besides the config.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub root: PathBuf,
    pub mode: BuildMode,
    pub concurrency: usize,
}

impl BuildContext {
    pub fn new(root: impl Into<PathBuf>, mode: BuildMode, concurrency: usize) -> Self {
        Self {
            root: root.into(),
            mode,
            concurrency: concurrency.max(1),
        }
    }

    fn dest(&self, dir: &str) -> PathBuf {
        resolve(&self.root, dir)
    }
}

/// Root-relative globs derived from the configured layout.
struct Globs {
    styles: Vec<String>,
    /// Partials included: editing one must rebuild the sheets importing it.
    styles_watch: String,
    scripts: Vec<String>,
    vendor_scripts: String,
    user_scripts: Vec<String>,
    images: String,
    images_png: String,
}

impl Globs {
    fn new(config: &Config) -> Self {
        let paths = &config.paths;
        let bundles = &config.bundles;

        let styles_src = paths.styles_src();
        let scripts_src = paths.scripts_src();
        let scripts_dest = paths.scripts_dest();
        let vendor_dir = join_glob(&[&scripts_src, &bundles.vendor_dir]);
        let images_src = paths.images_src();

        // Bundles land next to their sources; keep them out of the inputs.
        let outputs = [
            format!("!{scripts_dest}{}", bundles.vendor),
            format!("!{scripts_dest}{}", bundles.app),
        ];

        let mut scripts = vec![
            format!("{vendor_dir}**/*.js"),
            format!("{scripts_src}**/*.js"),
        ];
        scripts.extend(outputs.iter().cloned());

        let mut user_scripts = vec![
            format!("{scripts_src}**/*.js"),
            format!("!{vendor_dir}**/*.js"),
        ];
        user_scripts.extend(outputs.iter().cloned());

        Self {
            styles: vec![
                format!("{styles_src}**/*.scss"),
                format!("!{styles_src}**/_*.scss"),
            ],
            styles_watch: format!("{styles_src}**/*.scss"),
            scripts,
            vendor_scripts: format!("{vendor_dir}**"),
            user_scripts,
            images: format!("{images_src}**/*.{{jpg,jpeg,gif,svg}}"),
            images_png: format!("{images_src}**/*.png"),
        }
    }
}

/// Register the standard tasks and the config's composites.
pub fn standard_tasks(config: &Config, ctx: &BuildContext) -> Result<TaskGraphBuilder> {
    let globs = Globs::new(config);
    let mut builder = TaskGraphBuilder::new();

    builder.add(styles_task(config, ctx, &globs)?)?;
    builder.add(scripts_task(config, ctx, &globs)?)?;
    builder.add(image_task(
        "imagemin",
        "Compress JPEG, GIF and SVG images",
        &globs.images,
        config,
        ctx,
    )?)?;
    builder.add(image_task(
        "imagemin:png",
        "Compress PNG images",
        &globs.images_png,
        config,
        ctx,
    )?)?;
    builder.add(watch_task(ctx, &globs)?)?;
    builder.add(
        TaskSpec::new("default")
            .describe("Build styles and scripts, then watch")
            .depends_on(["styles", "scripts", "watch"]),
    )?;
    builder.add(
        TaskSpec::new("build")
            .describe("Build styles and scripts")
            .depends_on(["styles", "scripts"]),
    )?;

    for (name, task) in &config.tasks {
        let mut spec = TaskSpec::new(name).depends_on(task.depends.iter().cloned());
        if let Some(desc) = &task.desc {
            spec = spec.describe(desc);
        }
        builder.add(spec)?;
    }

    Ok(builder)
}

/// Build and validate the full task graph.
pub fn standard_graph(config: &Config, ctx: &BuildContext) -> Result<TaskGraph> {
    standard_tasks(config, ctx)?.build()
}

fn styles_task(config: &Config, ctx: &BuildContext, globs: &Globs) -> Result<TaskSpec> {
    let mode = ctx.mode;
    let tools = &config.tools;

    let pipeline = Pipeline::new("styles", GlobSpec::new(&globs.styles)?)
        .with_concurrency(ctx.concurrency)
        .each(ModeGate::source_maps(mode, InitSourceMaps))
        .each(Sass::new(&tools.sass, mode.style()).args(tools.sass_args.iter().cloned()))
        .each(Rename::extension("css"))
        .each(Autoprefix::new(&tools.browsers)?.minify(mode.is_production()))
        .each(ModeGate::source_maps(mode, WriteSourceMaps))
        .each(Dest::new(ctx.dest(&config.paths.styles_dest())))
        .each(ReportSize);

    Ok(TaskSpec::new("styles")
        .describe("Compile Sass to prefixed CSS")
        .pipeline(pipeline))
}

fn scripts_task(config: &Config, ctx: &BuildContext, globs: &Globs) -> Result<TaskSpec> {
    let mode = ctx.mode;
    let bundles = &config.bundles;
    let dest = ctx.dest(&config.paths.scripts_dest());
    let vendor_filter = GlobSpec::new([&globs.vendor_scripts])?;
    let app_filter = GlobSpec::new(["**/*".to_string(), format!("!{}", globs.vendor_scripts)])?;

    let vendor = Branch::new("vendor")
        .filter(vendor_filter)
        .all(Concat::new(&bundles.vendor, &bundles.separator))
        .each(ModeGate::production(mode, ReportSize))
        .each(ModeGate::production(mode, MinifyJs))
        .each(Dest::new(&dest))
        .each(ReportSize);

    let app = Branch::new("app")
        .filter(app_filter)
        .each(ModeGate::source_maps(mode, InitSourceMaps))
        .all(Concat::new(&bundles.app, &bundles.separator))
        .each(ModeGate::production(mode, ReportSize))
        .each(ModeGate::production(mode, MinifyJs))
        .each(ModeGate::source_maps(mode, WriteSourceMaps))
        .each(Dest::new(&dest))
        .each(ReportSize);

    let pipeline = Pipeline::new("scripts", GlobSpec::new(&globs.scripts)?)
        .with_concurrency(ctx.concurrency)
        .tee(vendor)
        .tee(app);

    Ok(TaskSpec::new("scripts")
        .describe("Lint and bundle vendor and app scripts")
        .pipeline(pipeline)
        .lint(LintStep::new(JsLinter, GlobSpec::new(&globs.user_scripts)?)))
}

fn image_task(
    name: &str,
    description: &str,
    glob: &str,
    config: &Config,
    ctx: &BuildContext,
) -> Result<TaskSpec> {
    let pipeline = Pipeline::new(name, GlobSpec::new([glob])?)
        .with_concurrency(ctx.concurrency)
        .each(CompressImage::new(config.tools.jpeg_quality))
        .each(Dest::new(ctx.dest(&config.paths.images_dest())));

    Ok(TaskSpec::new(name).describe(description).pipeline(pipeline))
}

/// Images are left out: their output lands in the watched tree.
fn watch_task(ctx: &BuildContext, globs: &Globs) -> Result<TaskSpec> {
    let mut task = TaskSpec::new("watch")
        .describe("Rebuild styles and scripts on change (development only)");

    if !ctx.mode.is_production() {
        task = task
            .watch(WatchBinding::new(GlobSpec::new([&globs.styles_watch])?, ["styles"]))
            .watch(WatchBinding::new(GlobSpec::new(&globs.scripts)?, ["scripts"]));
    }

    Ok(task)
}
