//! Bundle concatenation

use futures::future::BoxFuture;

use crate::entry::FileEntry;
use crate::sourcemap::LineMap;
use crate::transform::{ready, Aggregate, TransformResult};

/// Joins every entry into one file named `file_name`, placed at the glob base
/// of the first entry.
pub struct Concat {
    file_name: String,
    separator: String,
}

impl Concat {
    pub fn new(file_name: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            separator: separator.into(),
        }
    }
}

impl Aggregate for Concat {
    fn name(&self) -> &str {
        "concat"
    }

    fn aggregate<'a>(&'a self, entries: Vec<FileEntry>) -> BoxFuture<'a, TransformResult> {
        let Some(first) = entries.first() else {
            return ready(Ok(Vec::new()));
        };

        let mut contents = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                contents.extend_from_slice(self.separator.as_bytes());
            }
            contents.extend_from_slice(entry.contents());
        }

        let bundle = FileEntry::new(
            first.base().join(&self.file_name),
            first.base(),
            contents,
        );

        // Any mapped part means the bundle gets a map.
        let bundle = if entries.iter().any(|e| LineMap::from_entry(e).is_some()) {
            let texts: Vec<String> = entries.iter().map(|e| e.text().into_owned()).collect();
            let parts: Vec<(Option<LineMap>, &str)> = entries
                .iter()
                .zip(&texts)
                .map(|(e, text)| (LineMap::from_entry(e), text.as_str()))
                .collect();
            LineMap::concat(&parts, &self.separator).attach(&bundle)
        } else {
            bundle
        };

        ready(Ok(vec![bundle]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::InitSourceMaps;
    use crate::transform::Transform;
    use std::path::Path;

    #[tokio::test]
    async fn test_concat_in_given_order_with_separator() {
        let entries = vec![
            FileEntry::new("/p/js/a.js", "/p/js", "var a = 1"),
            FileEntry::new("/p/js/c.js", "/p/js", "var c = 3"),
        ];

        let out = Concat::new("enlBase.js", ";\r\n").aggregate(entries).await.unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path(), Path::new("/p/js/enlBase.js"));
        assert_eq!(out[0].relative(), Path::new("enlBase.js"));
        assert_eq!(out[0].text(), "var a = 1;\r\nvar c = 3");
        assert!(LineMap::from_entry(&out[0]).is_none());
    }

    #[tokio::test]
    async fn test_concat_combines_maps() {
        let mut entries = Vec::new();
        for (path, body) in [("/p/js/a.js", "a1\na2"), ("/p/js/c.js", "c1")] {
            let entry = FileEntry::new(path, "/p/js", body);
            entries.extend(InitSourceMaps.apply(entry).await.unwrap());
        }

        let out = Concat::new("app.js", "\n").aggregate(entries).await.unwrap();
        let map = LineMap::from_entry(&out[0]).unwrap();

        assert_eq!(map.sources, vec!["a.js", "c.js"]);
        assert_eq!(map.lines.len(), 3);
        assert_eq!(map.lines[2], Some((1, 0)));
    }
}
