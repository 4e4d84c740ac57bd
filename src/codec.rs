//! Pixel buffers and the raster codec boundary.
//!
//! The extraction core never touches container formats directly; it hands a
//! [`PixelBuffer`] and a target [`OutputFormat`] to a [`RasterCodec`].
//! [`ImageCodec`] is the production implementation, backed by the `png`,
//! `jpeg-encoder` and `tiff` crates. Formats the backing crates cannot
//! produce surface as [`CodecError`] and are handled per image, not fatally.

use std::io::Cursor;

use thiserror::Error;
use tiff::encoder::{colortype, TiffEncoder};

/// Decoded image samples in one of the layouts the extractor produces.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    Gray8 {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    Rgb8 {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    Rgba8 {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    Cmyk8 {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    /// Bi-level samples packed 8 pixels per byte, MSB first, rows padded to a
    /// whole byte. 1 is white.
    Bilevel {
        width: u32,
        height: u32,
        rows: Vec<u8>,
    },
}

impl PixelBuffer {
    pub fn width(&self) -> u32 {
        match self {
            PixelBuffer::Gray8 { width, .. }
            | PixelBuffer::Rgb8 { width, .. }
            | PixelBuffer::Rgba8 { width, .. }
            | PixelBuffer::Cmyk8 { width, .. }
            | PixelBuffer::Bilevel { width, .. } => *width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            PixelBuffer::Gray8 { height, .. }
            | PixelBuffer::Rgb8 { height, .. }
            | PixelBuffer::Rgba8 { height, .. }
            | PixelBuffer::Cmyk8 { height, .. }
            | PixelBuffer::Bilevel { height, .. } => *height,
        }
    }

    /// Sample channels per pixel.
    pub fn channels(&self) -> u32 {
        match self {
            PixelBuffer::Gray8 { .. } | PixelBuffer::Bilevel { .. } => 1,
            PixelBuffer::Rgb8 { .. } => 3,
            PixelBuffer::Rgba8 { .. } => 4,
            PixelBuffer::Cmyk8 { .. } => 4,
        }
    }
}

/// Target container formats, keyed by output file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg,
    Jpeg2000,
    Tiff,
}

impl OutputFormat {
    pub fn from_suffix(suffix: &str) -> Option<OutputFormat> {
        match suffix {
            "png" => Some(OutputFormat::Png),
            "jpg" => Some(OutputFormat::Jpeg),
            "jp2" => Some(OutputFormat::Jpeg2000),
            "tiff" => Some(OutputFormat::Tiff),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no encoder available for {0}")]
    MissingCodec(&'static str),
    #[error("{format} cannot represent a {channels}-channel buffer")]
    UnsupportedLayout { format: &'static str, channels: u32 },
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Encodes a pixel buffer into a container format, optionally tagging the
/// result with a resolution.
pub trait RasterCodec {
    fn encode(
        &self,
        buffer: &PixelBuffer,
        format: OutputFormat,
        dpi: Option<u32>,
    ) -> Result<Vec<u8>, CodecError>;
}

const JPEG_QUALITY: u8 = 85;

/// Production codec. JPEG2000 encoding has no backing crate and always
/// reports a missing codec; the TIFF backend carries no resolution tag.
#[derive(Debug, Default)]
pub struct ImageCodec;

impl ImageCodec {
    fn encode_png(buffer: &PixelBuffer, dpi: Option<u32>) -> Result<Vec<u8>, CodecError> {
        let (color, depth, data): (png::ColorType, png::BitDepth, &[u8]) = match buffer {
            PixelBuffer::Gray8 { data, .. } => {
                (png::ColorType::Grayscale, png::BitDepth::Eight, data)
            }
            PixelBuffer::Rgb8 { data, .. } => (png::ColorType::Rgb, png::BitDepth::Eight, data),
            PixelBuffer::Rgba8 { data, .. } => (png::ColorType::Rgba, png::BitDepth::Eight, data),
            PixelBuffer::Bilevel { rows, .. } => {
                (png::ColorType::Grayscale, png::BitDepth::One, rows)
            }
            PixelBuffer::Cmyk8 { .. } => {
                return Err(CodecError::UnsupportedLayout {
                    format: "png",
                    channels: buffer.channels(),
                })
            }
        };
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, buffer.width(), buffer.height());
            encoder.set_color(color);
            encoder.set_depth(depth);
            if let Some(dpi) = dpi {
                let ppu = (dpi as f64 * 1000.0 / 25.4).round() as u32;
                encoder.set_pixel_dims(Some(png::PixelDimensions {
                    xppu: ppu,
                    yppu: ppu,
                    unit: png::Unit::Meter,
                }));
            }
            let mut writer = encoder
                .write_header()
                .map_err(|e| CodecError::Encode(e.to_string()))?;
            writer
                .write_image_data(data)
                .map_err(|e| CodecError::Encode(e.to_string()))?;
            writer
                .finish()
                .map_err(|e| CodecError::Encode(e.to_string()))?;
        }
        Ok(out)
    }

    fn encode_jpeg(buffer: &PixelBuffer, dpi: Option<u32>) -> Result<Vec<u8>, CodecError> {
        let (color, data): (jpeg_encoder::ColorType, &[u8]) = match buffer {
            PixelBuffer::Gray8 { data, .. } => (jpeg_encoder::ColorType::Luma, data),
            PixelBuffer::Rgb8 { data, .. } => (jpeg_encoder::ColorType::Rgb, data),
            PixelBuffer::Rgba8 { data, .. } => (jpeg_encoder::ColorType::Rgba, data),
            PixelBuffer::Cmyk8 { .. } | PixelBuffer::Bilevel { .. } => {
                return Err(CodecError::UnsupportedLayout {
                    format: "jpg",
                    channels: buffer.channels(),
                })
            }
        };
        let mut out = Vec::new();
        let mut encoder = jpeg_encoder::Encoder::new(&mut out, JPEG_QUALITY);
        if let Some(dpi) = dpi {
            let dpi = dpi.min(u16::MAX as u32) as u16;
            encoder.set_density(jpeg_encoder::PixelDensity::dpi(dpi));
        }
        encoder
            .encode(
                data,
                buffer.width() as u16,
                buffer.height() as u16,
                color,
            )
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(out)
    }

    fn encode_tiff(buffer: &PixelBuffer) -> Result<Vec<u8>, CodecError> {
        let tiff_err = |e: tiff::TiffError| CodecError::Encode(e.to_string());
        let (width, height) = (buffer.width(), buffer.height());
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut cursor).map_err(tiff_err)?;
            match buffer {
                PixelBuffer::Gray8 { data, .. } => {
                    encoder.write_image::<colortype::Gray8>(width, height, data)
                }
                PixelBuffer::Rgb8 { data, .. } => {
                    encoder.write_image::<colortype::RGB8>(width, height, data)
                }
                PixelBuffer::Rgba8 { data, .. } => {
                    encoder.write_image::<colortype::RGBA8>(width, height, data)
                }
                PixelBuffer::Cmyk8 { data, .. } => {
                    encoder.write_image::<colortype::CMYK8>(width, height, data)
                }
                PixelBuffer::Bilevel { rows, .. } => {
                    // The tiff encoder has no 1-bit sample support; expand to
                    // 8-bit gray so bilevel images still land on disk.
                    let gray = Self::expand_bilevel(rows, width, height);
                    encoder.write_image::<colortype::Gray8>(width, height, &gray)
                }
            }
            .map_err(tiff_err)?;
        }
        Ok(cursor.into_inner())
    }

    fn expand_bilevel(rows: &[u8], width: u32, height: u32) -> Vec<u8> {
        let stride = (width as usize).div_ceil(8);
        let mut gray = Vec::with_capacity(width as usize * height as usize);
        for row in rows.chunks(stride).take(height as usize) {
            for x in 0..width as usize {
                let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
                gray.push(if bit == 1 { 255 } else { 0 });
            }
        }
        gray
    }
}

impl RasterCodec for ImageCodec {
    fn encode(
        &self,
        buffer: &PixelBuffer,
        format: OutputFormat,
        dpi: Option<u32>,
    ) -> Result<Vec<u8>, CodecError> {
        match format {
            OutputFormat::Png => Self::encode_png(buffer, dpi),
            OutputFormat::Jpeg => Self::encode_jpeg(buffer, dpi),
            OutputFormat::Tiff => Self::encode_tiff(buffer),
            OutputFormat::Jpeg2000 => Err(CodecError::MissingCodec("jp2")),
        }
    }
}
