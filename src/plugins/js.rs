//! JavaScript minification via oxc

use futures::future::BoxFuture;
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;

use crate::entry::FileEntry;
use crate::error::TransformError;
use crate::transform::{Transform, TransformResult};

/// Compresses and mangles scripts. Bundles are parsed as scripts, not modules.
pub struct MinifyJs;

/// Minify one script, or return the first parse error.
pub fn minify_js(source: &str) -> Result<String, String> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::cjs()).parse();
    if let Some(err) = ret.errors.first() {
        return Err(err.to_string());
    }

    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::smallest()),
    };
    let ret = Minifier::new(options).minify(&allocator, &mut program);

    Ok(Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            ..CodegenOptions::default()
        })
        .with_scoping(ret.scoping)
        .build(&program)
        .code)
}

impl Transform for MinifyJs {
    fn name(&self) -> &str {
        "uglify"
    }

    fn apply<'a>(&'a self, entry: FileEntry) -> BoxFuture<'a, TransformResult> {
        Box::pin(async move {
            let source = entry.text().into_owned();
            let minified = tokio::task::spawn_blocking(move || minify_js(&source))
                .await
                .map_err(|e| e.to_string())
                .and_then(|r| r)
                .map_err(|msg| TransformError::new("uglify", entry.path(), msg))?;
            Ok(vec![entry.with_contents(minified)])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_minifies_bundle() {
        let source = "function add(first, second) {\n  return first + second;\n}\nadd(1, 2);\n";
        let entry = FileEntry::new("/p/js/app.js", "/p/js", source);

        let out = MinifyJs.apply(entry).await.unwrap();
        let text = out[0].text();
        assert!(text.len() < source.len());
        assert!(!text.contains("second"));
    }

    #[tokio::test]
    async fn test_syntax_error_fails_entry() {
        let entry = FileEntry::new("/p/js/broken.js", "/p/js", "var = ;");
        let err = MinifyJs.apply(entry).await.unwrap_err();
        assert_eq!(err.plugin, "uglify");
    }
}
