//! Extract raster images embedded in PDF documents.
//!
//! The library interprets each page's content stream, following form
//! XObjects, tiling patterns and soft-mask transparency groups, and writes
//! every unique image XObject it encounters to disk exactly once. The output
//! container for each image is chosen from its native compression: JPEG and
//! JPEG 2000 streams can pass through untouched, everything else is decoded
//! and re-encoded (PNG by default).
//!
//! ```no_run
//! use std::path::Path;
//! use pdfimages::{extract_images, ExtractOptions};
//!
//! let written = extract_images(
//!     Path::new("report.pdf"),
//!     Path::new("."),
//!     None,
//!     "",
//!     &ExtractOptions::default(),
//! )?;
//! for image in &written {
//!     println!("{} ({}x{})", image.file_name, image.width, image.height);
//! }
//! # Ok::<(), pdfimages::ExtractError>(())
//! ```

use thiserror::Error;

pub mod codec;
pub mod extract;
pub mod graphics;
pub mod image;
pub mod interpreter;
pub mod materializer;
pub mod pdf;

pub use crate::codec::{ImageCodec, RasterCodec};
pub use crate::extract::{extract_document, extract_images};

/// Flags steering how images are materialized, mirroring the command line.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Write every JPEG-compressed image as-is, without re-encoding.
    pub direct_jpeg: bool,
    /// Dump raw sample data without any color conversion.
    pub no_color_convert: bool,
    /// Stamp the effective rendering resolution into formats that carry one.
    pub include_density: bool,
}

/// Fatal extraction failures. Per-image problems (missing codecs,
/// undecodable streams) are logged and skipped instead.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("document permissions do not allow image extraction")]
    AccessDenied,
    #[error(transparent)]
    Pdf(#[from] lopdf::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One image written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    /// PDF object number of the source image XObject.
    pub object_number: u32,
    pub generation: u16,
}
