//! Configuration parsing for assetpipe.toml
//!
//! Every field has a default, so a project without a config file builds with
//! the conventional `src/` layout. The build mode is resolved here once and
//! then passed explicitly into task construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AssetError, Result};

/// Default config file names to search for
pub const CONFIG_FILES: &[&str] = &["assetpipe.toml", "Assetpipe.toml"];

/// Names of the tasks every project gets.
pub const BUILTIN_TASKS: &[&str] = &[
    "styles",
    "scripts",
    "imagemin",
    "imagemin:png",
    "watch",
    "default",
    "build",
];

/// Development keeps output readable and writes source maps; production
/// compresses everything and skips maps, watching and the dev server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Development,
    Production,
}

impl BuildMode {
    pub fn is_production(self) -> bool {
        self == BuildMode::Production
    }

    /// Output style passed to the stylesheet compiler.
    pub fn style(self) -> &'static str {
        match self {
            BuildMode::Development => "expanded",
            BuildMode::Production => "compressed",
        }
    }

    pub fn source_maps(self) -> bool {
        !self.is_production()
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildMode::Development => f.write_str("development"),
            BuildMode::Production => f.write_str("production"),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub settings: Settings,

    /// Source and destination layout
    #[serde(default)]
    pub paths: Paths,

    /// Script bundle names
    #[serde(default)]
    pub bundles: Bundles,

    /// External tools and transform options
    #[serde(default)]
    pub tools: Tools,

    /// Local development server
    #[serde(default)]
    pub serve: ServeConfig,

    /// Extra composite tasks built from the standard ones
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
}

/// Global settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Build mode when `--prod` is not given
    #[serde(default)]
    pub mode: BuildMode,

    /// Files in flight per pipeline (0 = number of CPUs)
    #[serde(default)]
    pub concurrency: usize,

    /// Watch debounce delay in milliseconds
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: BuildMode::default(),
            concurrency: 0,
            debounce_ms: default_debounce(),
        }
    }
}

fn default_debounce() -> u64 {
    200
}

fn default_true() -> bool {
    true
}

/// Where sources live and where builds go. All values are relative to the
/// project root (the directory holding the config file).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    #[serde(default = "default_src")]
    pub src: String,
    #[serde(default = "default_src")]
    pub dest: String,
    #[serde(default = "default_styles_src")]
    pub styles_src: String,
    #[serde(default = "default_styles_dest")]
    pub styles_dest: String,
    #[serde(default = "default_scripts")]
    pub scripts_src: String,
    #[serde(default = "default_scripts")]
    pub scripts_dest: String,
    #[serde(default)]
    pub images_src: String,
    #[serde(default)]
    pub images_dest: String,
}

fn default_src() -> String {
    "src/".to_string()
}

fn default_styles_src() -> String {
    "css/sass/".to_string()
}

fn default_styles_dest() -> String {
    "css/".to_string()
}

fn default_scripts() -> String {
    "js/".to_string()
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            src: default_src(),
            dest: default_src(),
            styles_src: default_styles_src(),
            styles_dest: default_styles_dest(),
            scripts_src: default_scripts(),
            scripts_dest: default_scripts(),
            images_src: String::new(),
            images_dest: String::new(),
        }
    }
}

impl Paths {
    pub fn styles_src(&self) -> String {
        join_glob(&[&self.src, &self.styles_src])
    }

    pub fn styles_dest(&self) -> String {
        join_glob(&[&self.dest, &self.styles_dest])
    }

    pub fn scripts_src(&self) -> String {
        join_glob(&[&self.src, &self.scripts_src])
    }

    pub fn scripts_dest(&self) -> String {
        join_glob(&[&self.dest, &self.scripts_dest])
    }

    pub fn images_src(&self) -> String {
        join_glob(&[&self.src, &self.images_src])
    }

    pub fn images_dest(&self) -> String {
        join_glob(&[&self.dest, &self.images_dest])
    }

    /// Directory served by the dev server.
    pub fn serve_root(&self, root: &Path) -> PathBuf {
        resolve(root, &self.dest)
    }
}

/// Names of the two script bundles.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Bundles {
    /// Directory below `scripts_src` holding third-party scripts
    #[serde(default = "default_vendor_dir")]
    pub vendor_dir: String,
    #[serde(default = "default_vendor")]
    pub vendor: String,
    #[serde(default = "default_app")]
    pub app: String,
    /// Inserted between concatenated scripts
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_vendor_dir() -> String {
    "vendors/".to_string()
}

fn default_vendor() -> String {
    "vendors.js".to_string()
}

fn default_app() -> String {
    "enlBase.js".to_string()
}

fn default_separator() -> String {
    ";\r\n".to_string()
}

impl Default for Bundles {
    fn default() -> Self {
        Self {
            vendor_dir: default_vendor_dir(),
            vendor: default_vendor(),
            app: default_app(),
            separator: default_separator(),
        }
    }
}

/// External programs and transform knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Tools {
    /// Sass executable (Dart Sass CLI)
    #[serde(default = "default_sass")]
    pub sass: String,

    /// Extra arguments appended to every sass invocation
    #[serde(default)]
    pub sass_args: Vec<String>,

    /// Browserslist queries used for vendor prefixing
    #[serde(default = "default_browsers")]
    pub browsers: Vec<String>,

    /// JPEG re-encode quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_sass() -> String {
    "sass".to_string()
}

fn default_browsers() -> Vec<String> {
    vec!["last 2 versions".to_string()]
}

fn default_jpeg_quality() -> u8 {
    70
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            sass: default_sass(),
            sass_args: Vec::new(),
            browsers: default_browsers(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// Development server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub livereload: bool,
    #[serde(default = "default_true")]
    pub directory_listing: bool,
    /// Open the served root in the default browser on start
    #[serde(default)]
    pub open: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            livereload: true,
            directory_listing: true,
            open: false,
        }
    }
}

/// A composite task: runs its dependencies and nothing else.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Human-readable description
    #[serde(default)]
    pub desc: Option<String>,

    /// Tasks that make up this one
    #[serde(default)]
    pub depends: Vec<String>,
}

impl Config {
    /// Load configuration from the given path, or search for it.
    ///
    /// Returns the defaults (and no path) when nothing is found during the
    /// search; an explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let config_path = match path {
            Some(p) => {
                if p.exists() {
                    Some(p.to_path_buf())
                } else {
                    return Err(AssetError::ConfigNotFound {
                        searched: vec![p.to_path_buf()],
                    });
                }
            }
            None => Self::find_config()?,
        };

        let Some(config_path) = config_path else {
            tracing::debug!("no config file found, using defaults");
            return Ok((Config::default(), None));
        };

        let content = std::fs::read_to_string(&config_path)?;
        let config = Self::parse(&content, &config_path)?;
        Ok((config, Some(config_path)))
    }

    /// Parse and validate config text.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| AssetError::ConfigParse {
            source: e,
            path: path.to_path_buf(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Search for config file starting from current directory
    fn find_config() -> Result<Option<PathBuf>> {
        let mut current = std::env::current_dir()?;

        loop {
            for name in CONFIG_FILES {
                let candidate = current.join(name);
                if candidate.exists() {
                    return Ok(Some(candidate));
                }
            }

            if !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        for (name, task) in &self.tasks {
            if BUILTIN_TASKS.contains(&name.as_str()) {
                return Err(AssetError::InvalidTask {
                    task: name.clone(),
                    reason: "name is reserved for a built-in task".to_string(),
                });
            }

            if task.depends.is_empty() {
                return Err(AssetError::InvalidTask {
                    task: name.clone(),
                    reason: "composite tasks need at least one entry in 'depends'".to_string(),
                });
            }

            if task.depends.contains(name) {
                return Err(AssetError::InvalidTask {
                    task: name.clone(),
                    reason: "task cannot depend on itself".to_string(),
                });
            }
        }

        if !(1..=100).contains(&self.tools.jpeg_quality) {
            return Err(AssetError::InvalidTask {
                task: "imagemin".to_string(),
                reason: format!("jpeg_quality must be 1-100, got {}", self.tools.jpeg_quality),
            });
        }

        Ok(())
    }

    /// Pipeline concurrency ceiling, resolving 0 to the CPU count.
    pub fn concurrency(&self) -> usize {
        match self.settings.concurrency {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            n => n,
        }
    }
}

/// Join config path fragments into a `/`-separated glob prefix.
pub fn join_glob(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        let part = part.trim_matches('/');
        if part.is_empty() || part == "." {
            continue;
        }
        out.push_str(part);
        out.push('/');
    }
    out
}

/// Resolve a configured directory against the project root, expanding `~`.
pub fn resolve(root: &Path, dir: &str) -> PathBuf {
    let expanded = shellexpand::tilde(dir);
    let path = Path::new(expanded.as_ref());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
