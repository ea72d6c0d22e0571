//! Vendor prefixing and CSS minification via lightningcss

use futures::future::BoxFuture;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use crate::entry::FileEntry;
use crate::error::{AssetError, Result, TransformError};
use crate::sourcemap::coarsen;
use crate::transform::{Transform, TransformResult};

/// Adds the vendor prefixes the configured browsers need.
///
/// With `minify` set the output is also compressed, which is how production
/// style builds finish.
pub struct Autoprefix {
    targets: Targets,
    minify: bool,
}

impl Autoprefix {
    /// Resolve a browserslist query such as `["last 2 versions"]`.
    pub fn new(browsers: &[String]) -> Result<Self> {
        let resolved = Browsers::from_browserslist(browsers).map_err(|e| AssetError::InvalidTask {
            task: "styles".to_string(),
            reason: format!("invalid browser query {browsers:?}: {e}"),
        })?;

        Ok(Self {
            targets: Targets {
                browsers: resolved,
                ..Targets::default()
            },
            minify: false,
        })
    }

    pub fn minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }
}

fn process(
    entry: &FileEntry,
    targets: Targets,
    minify: bool,
) -> std::result::Result<String, TransformError> {
    let source = entry.text();
    let filename = entry.relative().to_string_lossy().into_owned();
    let fail = |message: String, loc: Option<(u32, u32)>| {
        let err = TransformError::new("autoprefixer", entry.path(), message);
        match loc {
            Some((line, column)) => err.at(line, column),
            None => err,
        }
    };

    let mut sheet = StyleSheet::parse(
        &source,
        ParserOptions {
            filename,
            ..ParserOptions::default()
        },
    )
    .map_err(|e| {
        // lightningcss lines are zero based
        let loc = e.loc.as_ref().map(|l| (l.line + 1, l.column));
        fail(e.kind.to_string(), loc)
    })?;

    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| fail(e.kind.to_string(), None))?;

    let printed = sheet
        .to_css(PrinterOptions {
            minify,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| fail(e.kind.to_string(), None))?;

    Ok(printed.code)
}

impl Transform for Autoprefix {
    fn name(&self) -> &str {
        "autoprefixer"
    }

    fn apply<'a>(&'a self, entry: FileEntry) -> BoxFuture<'a, TransformResult> {
        Box::pin(async move {
            let (targets, minify) = (self.targets, self.minify);
            let source = entry.clone();
            let css = tokio::task::spawn_blocking(move || process(&source, targets, minify))
                .await
                .map_err(|e| TransformError::new("autoprefixer", entry.path(), e.to_string()))??;
            Ok(vec![coarsen(entry.with_contents(css))])
        })
    }
}
