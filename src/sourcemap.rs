//! Line-level source maps
//!
//! Maps are carried between transforms in the entry metadata under
//! [`META_KEY`] and only written out by [`WriteSourceMaps`]. Mappings are kept
//! per generated line, which is exact for concatenation (the only
//! transform that runs on mapped files in development builds) and coarse for
//! compilers that reflow lines.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::entry::FileEntry;
use crate::transform::{Transform, TransformResult};

/// Metadata key holding the serialized [`LineMap`].
pub const META_KEY: &str = "sourcemap";

/// Prefix browsers show mapped sources under.
pub const SOURCE_ROOT: &str = "/source/";

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Per generated line: which source and which source line it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMap {
    pub sources: Vec<String>,
    pub contents: Vec<String>,
    pub lines: Vec<Option<(u32, u32)>>,
}

/// Source map v3 document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u8,
    pub file: String,
    pub source_root: String,
    pub sources: Vec<String>,
    pub sources_content: Vec<String>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl LineMap {
    /// Every line maps to itself.
    pub fn identity(source: &str, content: &str) -> Self {
        let count = line_count(content) as u32;
        Self {
            sources: vec![source.to_string()],
            contents: vec![content.to_string()],
            lines: (0..count).map(|line| Some((0, line))).collect(),
        }
    }

    /// Only the first generated line is mapped, to the start of the source.
    pub fn file_level(&self, generated: &str) -> Self {
        let mut lines = vec![None; line_count(generated)];
        if let (Some(first), false) = (lines.first_mut(), self.sources.is_empty()) {
            *first = Some((0, 0));
        }
        Self {
            sources: self.sources.iter().take(1).cloned().collect(),
            contents: self.contents.iter().take(1).cloned().collect(),
            lines,
        }
    }

    /// Append `other` starting at generated line `offset`.
    fn append(&mut self, other: &LineMap, offset: usize) {
        let remap: Vec<u32> = other
            .sources
            .iter()
            .zip(&other.contents)
            .map(|(source, content)| {
                match self.sources.iter().position(|s| s == source) {
                    Some(idx) => idx as u32,
                    None => {
                        self.sources.push(source.clone());
                        self.contents.push(content.clone());
                        (self.sources.len() - 1) as u32
                    }
                }
            })
            .collect();

        if self.lines.len() < offset {
            self.lines.resize(offset, None);
        }
        for (i, mapping) in other.lines.iter().enumerate() {
            let target = offset + i;
            let mapped = mapping.map(|(src, line)| (remap[src as usize], line));
            if target < self.lines.len() {
                self.lines[target] = self.lines[target].or(mapped);
            } else {
                self.lines.push(mapped);
            }
        }
    }

    /// Map of `parts` joined with `separator`, in order.
    ///
    /// Parts without a map still shift the lines of the parts after them.
    pub fn concat(parts: &[(Option<LineMap>, &str)], separator: &str) -> Self {
        let mut combined = LineMap::default();
        let mut offset = 0;
        let sep_lines = separator.matches('\n').count();

        for (i, (map, text)) in parts.iter().enumerate() {
            if let Some(map) = map {
                combined.append(map, offset);
            }
            offset += text.matches('\n').count();
            if i + 1 < parts.len() {
                offset += sep_lines;
            }
        }

        let total: usize = offset + 1;
        if combined.lines.len() < total {
            combined.lines.resize(total, None);
        }
        combined
    }

    pub fn to_source_map(&self, file: &str) -> SourceMap {
        SourceMap {
            version: 3,
            file: file.to_string(),
            source_root: SOURCE_ROOT.to_string(),
            sources: self.sources.clone(),
            sources_content: self.contents.clone(),
            names: Vec::new(),
            mappings: encode_mappings(&self.lines),
        }
    }

    /// Read the map carried by an entry, if any.
    pub fn from_entry(entry: &FileEntry) -> Option<Self> {
        entry
            .meta(META_KEY)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// Attach this map to an entry.
    pub fn attach(&self, entry: &FileEntry) -> FileEntry {
        match serde_json::to_string(self) {
            Ok(raw) => entry.with_meta(META_KEY, raw),
            Err(_) => entry.clone(),
        }
    }
}

/// After a transform that reflows lines, keep only a file-level mapping.
pub fn coarsen(entry: FileEntry) -> FileEntry {
    match LineMap::from_entry(&entry) {
        Some(map) => {
            let text = entry.text().into_owned();
            map.file_level(&text).attach(&entry)
        }
        None => entry,
    }
}

fn line_count(text: &str) -> usize {
    text.matches('\n').count() + 1
}

fn encode_mappings(lines: &[Option<(u32, u32)>]) -> String {
    let mut out = String::new();
    let mut prev_source = 0i64;
    let mut prev_line = 0i64;

    for (i, mapping) in lines.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        if let Some((source, line)) = mapping {
            let (source, line) = (*source as i64, *line as i64);
            encode_vlq(&mut out, 0);
            encode_vlq(&mut out, source - prev_source);
            encode_vlq(&mut out, line - prev_line);
            encode_vlq(&mut out, 0);
            prev_source = source;
            prev_line = line;
        }
    }

    // Trailing unmapped lines add nothing.
    out.trim_end_matches(';').to_string()
}

fn encode_vlq(out: &mut String, value: i64) {
    let mut v = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    loop {
        let mut digit = v & 0b1_1111;
        v >>= 5;
        if v > 0 {
            digit |= 0b10_0000;
        }
        out.push(BASE64[digit as usize] as char);
        if v == 0 {
            break;
        }
    }
}

/// Start tracking lines of each file (the `init` half of source maps).
pub struct InitSourceMaps;

impl Transform for InitSourceMaps {
    fn name(&self) -> &str {
        "sourcemaps:init"
    }

    fn apply<'a>(&'a self, entry: FileEntry) -> BoxFuture<'a, TransformResult> {
        let source = entry.relative().to_string_lossy().replace('\\', "/");
        let map = LineMap::identity(&source, &entry.text());
        futures::future::ready(Ok(vec![map.attach(&entry)])).boxed()
    }
}

/// Emit `<file>.map` next to each mapped file and reference it from the file.
pub struct WriteSourceMaps;

impl Transform for WriteSourceMaps {
    fn name(&self) -> &str {
        "sourcemaps:write"
    }

    fn apply<'a>(&'a self, entry: FileEntry) -> BoxFuture<'a, TransformResult> {
        let result = match LineMap::from_entry(&entry) {
            None => vec![entry],
            Some(map) => {
                let file_name = entry
                    .path()
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let map_name = format!("{file_name}.map");

                let reference = if entry.path().extension().is_some_and(|e| e == "css") {
                    format!("\n/*# sourceMappingURL={map_name} */\n")
                } else {
                    format!("\n//# sourceMappingURL={map_name}\n")
                };

                let mut contents = entry.contents().to_vec();
                contents.extend_from_slice(reference.as_bytes());

                let json = serde_json::to_vec(&map.to_source_map(&file_name)).unwrap_or_default();
                let map_path = entry.path().with_file_name(&map_name);

                let file = entry.with_contents(contents).without_meta(META_KEY);
                let map_file = entry.with_path(map_path).with_contents(json).without_meta(META_KEY);
                vec![file, map_file]
            }
        };
        futures::future::ready(Ok(result)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlq() {
        let mut out = String::new();
        encode_vlq(&mut out, 0);
        encode_vlq(&mut out, 1);
        encode_vlq(&mut out, -1);
        encode_vlq(&mut out, 16);
        assert_eq!(out, "ACDgB");
    }

    #[test]
    fn test_identity_mappings() {
        let map = LineMap::identity("a.js", "one\ntwo\nthree");
        assert_eq!(map.to_source_map("out.js").mappings, "AAAA;AACA;AACA");
    }

    #[test]
    fn test_concat_offsets_second_source() {
        let a = LineMap::identity("a.js", "a1\na2");
        let c = LineMap::identity("c.js", "c1");
        let map = LineMap::concat(&[(Some(a), "a1\na2"), (Some(c), "c1")], ";\r\n");

        assert_eq!(map.sources, vec!["a.js", "c.js"]);
        assert_eq!(map.lines, vec![Some((0, 0)), Some((0, 1)), Some((1, 0))]);
        // line 2 jumps to source 1, line 0: delta source +1, delta line -1
        assert_eq!(map.to_source_map("app.js").mappings, "AAAA;AACA;ACDA");
    }

    #[test]
    fn test_concat_keeps_unmapped_parts_in_line_count() {
        let c = LineMap::identity("c.js", "c1");
        let map = LineMap::concat(&[(None, "v1\nv2"), (Some(c), "c1")], "\n");
        assert_eq!(map.lines, vec![None, None, Some((0, 0))]);
    }

    #[tokio::test]
    async fn test_write_emits_map_and_reference() {
        let entry = FileEntry::new("/out/js/app.js", "/out/js", "var a;");
        let entry = InitSourceMaps.apply(entry).await.unwrap().remove(0);

        let out = WriteSourceMaps.apply(entry).await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[0].text().ends_with("//# sourceMappingURL=app.js.map\n"));
        assert_eq!(out[1].path(), std::path::Path::new("/out/js/app.js.map"));

        let map: SourceMap = serde_json::from_slice(out[1].contents()).unwrap();
        assert_eq!(map.sources, vec!["app.js"]);
        assert_eq!(map.sources_content, vec!["var a;"]);
        assert!(out[0].meta(META_KEY).is_none());
    }

    #[tokio::test]
    async fn test_write_passes_unmapped_entries() {
        let entry = FileEntry::new("/out/js/vendors.js", "/out/js", "var v;");
        let out = WriteSourceMaps.apply(entry.clone()).await.unwrap();
        assert_eq!(out, vec![entry]);
    }
}
