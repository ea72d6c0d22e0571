//! Ordered include/exclude glob sets
//!
//! A [`GlobSpec`] is a list of rules in declared order. Rules starting with
//! `!` are exclusions. Expansion walks each inclusion rule in order and keeps
//! the first position of every file, then drops everything an exclusion
//! matches, wherever that exclusion sits in the list.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{AssetError, Result};

const GLOB_META: &[char] = &['*', '?', '[', '{'];

#[derive(Clone)]
struct IncludeRule {
    matcher: GlobMatcher,
    /// Literal directory prefix of the pattern; walking starts here and
    /// entries keep it as their base.
    base: PathBuf,
}

/// A file produced by expanding a [`GlobSpec`] against a root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedFile {
    pub path: PathBuf,
    pub base: PathBuf,
}

/// Ordered set of inclusion and exclusion rules.
#[derive(Clone)]
pub struct GlobSpec {
    patterns: Vec<String>,
    includes: Vec<IncludeRule>,
    include_set: GlobSet,
    exclude_set: GlobSet,
}

impl fmt::Debug for GlobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobSpec").field(&self.patterns).finish()
    }
}

impl GlobSpec {
    /// Compile a list of patterns. Fails on the first malformed rule.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut originals = Vec::new();
        let mut includes = Vec::new();
        let mut include_set = GlobSetBuilder::new();
        let mut exclude_set = GlobSetBuilder::new();

        for raw in patterns {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            originals.push(raw.to_string());

            let (negated, pattern) = match raw.strip_prefix('!') {
                Some(rest) => (true, normalize(rest)),
                None => (false, normalize(raw)),
            };

            let glob = GlobBuilder::new(&pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| AssetError::invalid_glob(raw, e))?;

            if negated {
                exclude_set.add(glob);
            } else {
                includes.push(IncludeRule {
                    matcher: glob.compile_matcher(),
                    base: glob_base(&pattern),
                });
                include_set.add(glob);
            }
        }

        let first = originals.first().cloned().unwrap_or_default();
        Ok(Self {
            patterns: originals,
            includes,
            include_set: include_set
                .build()
                .map_err(|e| AssetError::invalid_glob(&first, e))?,
            exclude_set: exclude_set
                .build()
                .map_err(|e| AssetError::invalid_glob(&first, e))?,
        })
    }

    /// The rules as written, negations included.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether a root-relative path is selected by this spec.
    pub fn matches(&self, rel_path: &Path) -> bool {
        let rel = to_slash(rel_path);
        self.include_set.is_match(&rel) && !self.exclude_set.is_match(&rel)
    }

    /// List matching files below `root`, in rule order.
    pub fn expand(&self, root: &Path) -> Result<Vec<MatchedFile>> {
        let mut seen = HashSet::new();
        let mut matched = Vec::new();

        for rule in &self.includes {
            let start = root.join(&rule.base);
            if !start.exists() {
                continue;
            }

            for entry in WalkDir::new(&start).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping unreadable path during glob walk");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }

                let Ok(rel) = entry.path().strip_prefix(root) else {
                    continue;
                };
                let rel = to_slash(rel);
                if rule.matcher.is_match(&rel) && seen.insert(rel.clone()) {
                    matched.push((rel, MatchedFile {
                        path: entry.path().to_path_buf(),
                        base: root.join(&rule.base),
                    }));
                }
            }
        }

        Ok(matched
            .into_iter()
            .filter(|(rel, _)| !self.exclude_set.is_match(rel))
            .map(|(_, file)| file)
            .collect())
    }
}

fn normalize(pattern: &str) -> String {
    let pattern = pattern.replace('\\', "/");
    pattern
        .strip_prefix("./")
        .map(str::to_string)
        .unwrap_or(pattern)
}

/// Leading directory components that contain no glob syntax.
fn glob_base(pattern: &str) -> PathBuf {
    let parts: Vec<&str> = pattern.split('/').collect();
    let literal = parts
        .iter()
        .take_while(|part| !part.contains(GLOB_META))
        .count();

    // A pattern without any glob syntax names a file; its parent is the base.
    let take = if literal == parts.len() {
        literal.saturating_sub(1)
    } else {
        literal
    };

    parts[..take]
        .iter()
        .filter(|p| !p.is_empty())
        .collect::<PathBuf>()
}

fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
