//! Lossy and lossless image compression

use futures::future::BoxFuture;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};

use crate::entry::FileEntry;
use crate::error::TransformError;
use crate::transform::{Transform, TransformResult};

/// Recompresses jpeg, png and svg entries. Other formats pass through.
///
/// An entry is only replaced when the result is smaller.
pub struct CompressImage {
    jpeg_quality: u8,
}

impl CompressImage {
    pub fn new(jpeg_quality: u8) -> Self {
        Self { jpeg_quality }
    }
}

fn encode(format: ImageFormat, bytes: &[u8], jpeg_quality: u8) -> Result<Vec<u8>, String> {
    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut out, jpeg_quality);
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(|e| e.to_string())?;
        }
        _ => {
            let encoder =
                PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
            img.write_with_encoder(encoder).map_err(|e| e.to_string())?;
        }
    }
    Ok(out)
}

/// Re-serialize through usvg, which drops comments, metadata, editor
/// attributes and indentation.
///
/// Documents with text come back unchanged: no fonts are loaded, so usvg
/// would drop the text instead of outlining it.
fn minify_svg(bytes: &[u8]) -> Result<Vec<u8>, String> {
    if bytes.windows(b"<text".len()).any(|w| w == b"<text") {
        return Ok(bytes.to_vec());
    }

    let tree = usvg::Tree::from_data(bytes, &usvg::Options::default())
        .map_err(|e| format!("invalid svg: {e}"))?;
    let write_options = usvg::WriteOptions {
        indent: usvg::Indent::None,
        ..Default::default()
    };
    let size = tree.size();
    let svg = ensure_viewbox(tree.to_string(&write_options), size.width(), size.height());
    Ok(svg.into_bytes())
}

/// Keep the image scalable: give the root a viewBox if usvg wrote none.
fn ensure_viewbox(svg: String, width: f32, height: f32) -> String {
    if svg.contains("viewBox=\"") {
        return svg;
    }
    match svg.find("<svg") {
        Some(start) => {
            let at = start + "<svg".len();
            format!("{} viewBox=\"0 0 {width} {height}\"{}", &svg[..at], &svg[at..])
        }
        None => svg,
    }
}

fn compress(ext: &str, bytes: &[u8], jpeg_quality: u8) -> Result<Vec<u8>, String> {
    match ext {
        "svg" => minify_svg(bytes),
        "png" => encode(ImageFormat::Png, bytes, jpeg_quality),
        _ => encode(ImageFormat::Jpeg, bytes, jpeg_quality),
    }
}

impl Transform for CompressImage {
    fn name(&self) -> &str {
        "imagemin"
    }

    fn apply<'a>(&'a self, entry: FileEntry) -> BoxFuture<'a, TransformResult> {
        Box::pin(async move {
            let ext = entry
                .path()
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();

            if !matches!(ext.as_str(), "svg" | "jpg" | "jpeg" | "png") {
                return Ok(vec![entry]);
            }

            let bytes = entry.contents().to_vec();
            let quality = self.jpeg_quality;
            let compressed = tokio::task::spawn_blocking(move || compress(&ext, &bytes, quality))
                .await
                .map_err(|e| e.to_string())
                .and_then(|r| r)
                .map_err(|msg| TransformError::new("imagemin", entry.path(), msg))?;

            if compressed.len() < entry.len() {
                tracing::debug!(
                    file = %entry.path().display(),
                    before = entry.len(),
                    after = compressed.len(),
                    "compressed"
                );
                Ok(vec![entry.with_contents(compressed)])
            } else {
                Ok(vec![entry])
            }
        })
    }
}
