//! Script linting
//!
//! Lint findings are reported, never fatal: a task with a lint step still
//! succeeds or fails on its pipelines alone.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use oxc::allocator::Allocator;
use oxc::ast::ast::DebuggerStatement;
use oxc::ast_visit::Visit;
use oxc::parser::Parser;
use oxc::span::SourceType;

use crate::entry::FileEntry;
use crate::error::Result;
use crate::glob::GlobSpec;

/// One finding from a linter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintDiagnostic {
    pub path: PathBuf,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
}

impl fmt::Display for LintDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        if let Some(line) = self.line {
            write!(f, ": line {line}")?;
            if let Some(col) = self.column {
                write!(f, ", col {col}")?;
            }
        }
        write!(f, ", {}", self.message)
    }
}

/// Checks one file and returns what it found.
pub trait Linter: Send + Sync {
    fn name(&self) -> &str;

    fn lint(&self, entry: &FileEntry) -> Vec<LintDiagnostic>;
}

/// Syntax errors plus a few leftovers that should not ship.
pub struct JsLinter;

impl Linter for JsLinter {
    fn name(&self) -> &str {
        "jshint"
    }

    fn lint(&self, entry: &FileEntry) -> Vec<LintDiagnostic> {
        let source = entry.text();
        let mut found = Vec::new();

        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &source, SourceType::cjs()).parse();
        for err in &ret.errors {
            let at = err
                .labels
                .as_ref()
                .and_then(|labels| labels.first())
                .map(|label| position(&source, label.offset()));
            found.push(LintDiagnostic {
                path: entry.path().to_path_buf(),
                line: at.map(|(line, _)| line),
                column: at.map(|(_, column)| column),
                message: err.to_string(),
            });
        }

        let mut debuggers = DebuggerStatements::default();
        debuggers.visit_program(&ret.program);
        for offset in debuggers.offsets {
            let (line, column) = position(&source, offset as usize);
            found.push(LintDiagnostic {
                path: entry.path().to_path_buf(),
                line: Some(line),
                column: Some(column),
                message: "Forgotten 'debugger' statement?".to_string(),
            });
        }

        found
    }
}

/// Collects the start offset of every `debugger;` statement.
#[derive(Default)]
struct DebuggerStatements {
    offsets: Vec<u32>,
}

impl<'a> Visit<'a> for DebuggerStatements {
    fn visit_debugger_statement(&mut self, it: &DebuggerStatement) {
        self.offsets.push(it.span.start);
    }
}

/// 1-based line and column (in chars) of a byte offset.
fn position(text: &str, offset: usize) -> (u32, u32) {
    let before = text.get(..offset).unwrap_or(text);
    let line_start = before.rfind('\n').map_or(0, |nl| nl + 1);
    let line = before.matches('\n').count() + 1;
    let column = before[line_start..].chars().count() + 1;
    (line as u32, column as u32)
}

/// Lints every file a glob selects.
#[derive(Clone)]
pub struct LintStep {
    linter: Arc<dyn Linter>,
    source: GlobSpec,
}

impl fmt::Debug for LintStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LintStep")
            .field("linter", &self.linter.name())
            .field("source", &self.source)
            .finish()
    }
}

impl LintStep {
    pub fn new(linter: impl Linter + 'static, source: GlobSpec) -> Self {
        Self {
            linter: Arc::new(linter),
            source,
        }
    }

    pub fn source(&self) -> &GlobSpec {
        &self.source
    }

    /// Lint all matched files and report findings per file.
    ///
    /// Unreadable files are skipped with a warning.
    pub async fn run(&self, root: &Path) -> Result<Vec<LintDiagnostic>> {
        let spec = self.source.clone();
        let owned_root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || spec.expand(&owned_root))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))??;

        let entries: Vec<FileEntry> = stream::iter(files)
            .map(|m| async move {
                match FileEntry::read(&m.path, &m.base).await {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        tracing::warn!(file = %m.path.display(), error = %e, "skipping unreadable file");
                        None
                    }
                }
            })
            .buffered(16)
            .filter_map(futures::future::ready)
            .collect()
            .await;

        let mut all = Vec::new();
        for entry in &entries {
            let found = self.linter.lint(entry);
            report(self.linter.name(), entry.path(), &found);
            all.extend(found);
        }
        Ok(all)
    }
}

fn report(linter: &str, path: &Path, found: &[LintDiagnostic]) {
    if found.is_empty() {
        return;
    }
    tracing::warn!(
        linter,
        "{} error(s) in {}",
        found.len(),
        path.display()
    );
    for diagnostic in found {
        tracing::warn!(linter, "{diagnostic}");
    }
}
