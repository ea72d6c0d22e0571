//! Concrete transforms behind the standard tasks.
//!
//! Each one wraps an off-the-shelf library or executable; the engine only
//! sees them as [`Transform`](crate::transform::Transform),
//! [`Aggregate`](crate::transform::Aggregate) or [`Linter`](lint::Linter).

pub mod concat;
pub mod css;
pub mod image;
pub mod js;
pub mod lint;
pub mod sass;

pub use concat::Concat;
pub use css::Autoprefix;
pub use image::CompressImage;
pub use js::MinifyJs;
pub use lint::{JsLinter, LintDiagnostic, Linter};
pub use sass::Sass;
