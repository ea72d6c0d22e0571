//! Sass compilation through the external `sass` executable

use std::process::Stdio;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::entry::FileEntry;
use crate::error::TransformError;
use crate::sourcemap::coarsen;
use crate::transform::{Transform, TransformResult};

/// Dart Sass reports the failing position as `line:col  root stylesheet`.
static POSITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+):(\d+)\s+root stylesheet").expect("valid regex"));

/// Compiles `.scss` entries by piping them through a Sass compiler.
///
/// The compiler is looked up on `PATH` at apply time so a missing
/// executable only fails the styles task.
pub struct Sass {
    program: String,
    style: String,
    args: Vec<String>,
}

impl Sass {
    pub fn new(program: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            style: style.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments passed before the input options.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    async fn compile(&self, entry: &FileEntry) -> Result<Vec<u8>, TransformError> {
        let fail = |msg: String| TransformError::new("sass", entry.path(), msg);

        let program = which::which(&self.program)
            .map_err(|_| fail(format!("sass executable '{}' not found", self.program)))?;

        let mut command = Command::new(program);
        command
            .args(&self.args)
            .arg("--stdin")
            .arg(format!("--style={}", self.style))
            .arg("--no-source-map");
        if let Some(dir) = entry.path().parent() {
            command.arg("--load-path").arg(dir);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| fail(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = entry.contents().to_vec();
            tokio::spawn(async move {
                // A compiler that exits early closes the pipe; its stderr says why.
                let _ = stdin.write_all(&input).await;
            });
        }

        let output = child.wait_with_output().await.map_err(|e| fail(e.to_string()))?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr
            .lines()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().trim_start_matches("Error: ").to_string())
            .unwrap_or_else(|| format!("sass exited with {}", output.status));

        let mut error = fail(message);
        if let Some(caps) = POSITION.captures(&stderr) {
            let line = caps[1].parse().ok();
            let column = caps[2].parse().ok();
            if let (Some(line), Some(column)) = (line, column) {
                error = error.at(line, column);
            }
        }
        Err(error)
    }
}

impl Transform for Sass {
    fn name(&self) -> &str {
        "sass"
    }

    fn apply<'a>(&'a self, entry: FileEntry) -> BoxFuture<'a, TransformResult> {
        Box::pin(async move {
            let css = self.compile(&entry).await?;
            Ok(vec![coarsen(entry.with_contents(css))])
        })
    }
}
