//! Materializes one discovered image into an output file.
//!
//! This is where the format decision lives: suffix selection from the native
//! compression, passthrough-vs-recode for JPEG/JPEG2000 streams, the
//! `no_color_convert` raw-buffer override, DPI estimation from the current
//! transform and the bitonal TIFF special case.

use std::fs;
use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::codec::{CodecError, OutputFormat, PixelBuffer, RasterCodec};
use crate::graphics::Matrix;
use crate::image::ImageSource;
use crate::ExtractOptions;

/// Filter names whose streams may be copied verbatim into a .jpg file.
pub const JPEG_FILTERS: &[&str] = &["DCTDecode", "DCT"];
/// Filter names whose streams may be copied verbatim into a .jp2 file.
pub const JPX_FILTERS: &[&str] = &["JPXDecode"];

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One successfully written output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenImage {
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

/// Estimate the original scan resolution from how large the image is drawn:
/// the image's pixel extent against the transform's combined scale.
pub fn estimate_dpi(width: u32, height: u32, ctm: &Matrix) -> u32 {
    let scale = ctm.scale_x() + ctm.scale_y();
    if !scale.is_finite() || scale <= 0.0 {
        return 72;
    }
    ((width + height) as f32 * 72.0 / scale).round() as u32
}

/// Snap values one below a round photographic resolution up to it, to correct
/// systematic off-by-one rounding. Everything else passes through.
pub fn snap_dpi(dpi: u32) -> u32 {
    match dpi {
        599 => 600,
        299 => 300,
        199 => 200,
        149 => 150,
        99 => 100,
        other => other,
    }
}

/// Output suffix for an image: its native compression's format, with JBIG2
/// and unknown encodings landing on png, jpx renamed to jp2 for filesystem
/// compatibility, and any mask forcing png (a transparency channel cannot
/// ride along in a passthrough JPEG).
pub fn output_suffix<S: ImageSource + ?Sized>(image: &S) -> &'static str {
    let suffix = match image.native_suffix() {
        None | Some("jb2") => "png",
        Some("jpx") => "jp2",
        Some(other) => other,
    };
    if image.has_mask() {
        return "png";
    }
    suffix
}

/// Shared passthrough predicate for the JPEG and JPEG2000 branches. The
/// color-space check is literal: an Indexed space over DeviceRGB does not
/// qualify.
pub fn passthrough_eligible(options: &ExtractOptions, color_space: &str) -> bool {
    !options.include_density
        && (options.direct_jpeg || color_space == "DeviceGray" || color_space == "DeviceRGB")
}

/// Repack a decoded buffer into strictly 1-bit-per-pixel rows (MSB first,
/// byte-padded), so the codec emits a bi-level TIFF instead of 8-bit gray.
pub fn to_bilevel(buffer: &PixelBuffer) -> Option<PixelBuffer> {
    let (width, height) = (buffer.width(), buffer.height());
    let luma: Vec<u8> = match buffer {
        PixelBuffer::Bilevel { .. } => return Some(buffer.clone()),
        PixelBuffer::Gray8 { data, .. } => data.clone(),
        PixelBuffer::Rgb8 { data, .. } => data
            .chunks(3)
            .map(|px| ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8)
            .collect(),
        _ => return None,
    };
    let stride = (width as usize).div_ceil(8);
    let mut rows = vec![0u8; stride * height as usize];
    for y in 0..height as usize {
        for x in 0..width as usize {
            if luma[y * width as usize + x] >= 128 {
                rows[y * stride + x / 8] |= 0x80 >> (x % 8);
            }
        }
    }
    Some(PixelBuffer::Bilevel {
        width,
        height,
        rows,
    })
}

/// Write one image to `<out_dir>/<prefix>-<counter>.<suffix>` according to
/// the decision algorithm. `Ok(None)` is the silent-skip case: no usable
/// pixel buffer could be produced, so no file and no result entry.
pub fn materialize<S, C>(
    image: &S,
    ctm: &Matrix,
    options: &ExtractOptions,
    codec: &C,
    out_dir: &Path,
    prefix: &str,
    counter: u32,
) -> Result<Option<WrittenImage>, MaterializeError>
where
    S: ImageSource + ?Sized,
    C: RasterCodec + ?Sized,
{
    let dpi = snap_dpi(estimate_dpi(image.width(), image.height(), ctm));
    let suffix = output_suffix(image);

    if options.no_color_convert {
        // Prefer the original, non-color-converted samples. No alpha and no
        // density tag in this path.
        if let Some(raw) = image.raw_buffer() {
            let raw_suffix = if raw.channels() > 3 { "tiff" } else { "png" };
            let format = OutputFormat::from_suffix(raw_suffix).unwrap_or(OutputFormat::Png);
            let bytes = codec.encode(&raw, format, None)?;
            return write_file(image, out_dir, prefix, counter, raw_suffix, &bytes).map(Some);
        }
        // No raw buffer obtainable; fall through to the normal path.
    }

    let bytes = match suffix {
        "jpg" => {
            let passthrough = if passthrough_eligible(options, image.color_space_name()) {
                image.compressed_stream(JPEG_FILTERS)
            } else {
                None
            };
            match passthrough {
                Some(bytes) => bytes,
                None => {
                    // CMYK and other unusual color spaces are normalized
                    // through the bitmap pipeline.
                    let Some(buffer) = image.decoded_buffer() else {
                        debug!("image {counter}: no decodable jpeg buffer, skipping");
                        return Ok(None);
                    };
                    codec.encode(&buffer, OutputFormat::Jpeg, Some(dpi))?
                }
            }
        }
        "jp2" => {
            let passthrough = if passthrough_eligible(options, image.color_space_name()) {
                image.compressed_stream(JPX_FILTERS)
            } else {
                None
            };
            match passthrough {
                Some(bytes) => bytes,
                None => {
                    let Some(buffer) = image.decoded_buffer() else {
                        debug!("image {counter}: no decodable jp2 buffer, skipping");
                        return Ok(None);
                    };
                    codec.encode(&buffer, OutputFormat::Jpeg2000, Some(dpi))?
                }
            }
        }
        "tiff" if image.color_space_name() == "DeviceGray" => {
            let Some(buffer) = image.decoded_buffer() else {
                debug!("image {counter}: no decodable tiff buffer, skipping");
                return Ok(None);
            };
            // CCITT-style input is bitonal; 1-bit packing keeps it that way.
            let Some(bilevel) = to_bilevel(&buffer) else {
                debug!("image {counter}: buffer not reducible to bilevel, skipping");
                return Ok(None);
            };
            codec.encode(&bilevel, OutputFormat::Tiff, Some(dpi))?
        }
        other => {
            let Some(buffer) = image.decoded_buffer() else {
                debug!("image {counter}: no decodable buffer for .{other}, skipping");
                return Ok(None);
            };
            let format = OutputFormat::from_suffix(other).unwrap_or(OutputFormat::Png);
            codec.encode(&buffer, format, Some(dpi))?
        }
    };

    write_file(image, out_dir, prefix, counter, suffix, &bytes).map(Some)
}

fn write_file<S: ImageSource + ?Sized>(
    image: &S,
    out_dir: &Path,
    prefix: &str,
    counter: u32,
    suffix: &str,
    bytes: &[u8],
) -> Result<WrittenImage, MaterializeError> {
    let file_name = format!("{prefix}-{counter}.{suffix}");
    fs::write(out_dir.join(&file_name), bytes)?;
    debug!(
        "wrote {file_name} ({}x{}, {} bytes)",
        image.width(),
        image.height(),
        bytes.len()
    );
    Ok(WrittenImage {
        file_name,
        width: image.width(),
        height: image.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::PathBuf;

    struct FakeImage {
        width: u32,
        height: u32,
        color_space: &'static str,
        native_suffix: Option<&'static str>,
        has_mask: bool,
        raw: Option<PixelBuffer>,
        decoded: Option<PixelBuffer>,
        compressed: Option<Vec<u8>>,
    }

    impl Default for FakeImage {
        fn default() -> Self {
            FakeImage {
                width: 4,
                height: 4,
                color_space: "DeviceRGB",
                native_suffix: Some("png"),
                has_mask: false,
                raw: None,
                decoded: Some(PixelBuffer::Rgb8 {
                    width: 4,
                    height: 4,
                    data: vec![0; 48],
                }),
                compressed: None,
            }
        }
    }

    impl ImageSource for FakeImage {
        fn width(&self) -> u32 {
            self.width
        }
        fn height(&self) -> u32 {
            self.height
        }
        fn bits_per_component(&self) -> u32 {
            8
        }
        fn color_space_name(&self) -> &str {
            self.color_space
        }
        fn is_stencil(&self) -> bool {
            false
        }
        fn has_mask(&self) -> bool {
            self.has_mask
        }
        fn native_suffix(&self) -> Option<&'static str> {
            self.native_suffix
        }
        fn raw_buffer(&self) -> Option<PixelBuffer> {
            self.raw.clone()
        }
        fn decoded_buffer(&self) -> Option<PixelBuffer> {
            self.decoded.clone()
        }
        fn compressed_stream(&self, _filters: &[&str]) -> Option<Vec<u8>> {
            self.compressed.clone()
        }
    }

    /// Records every encode call; optionally fails every call.
    #[derive(Default)]
    struct RecordingCodec {
        calls: RefCell<Vec<(PixelBuffer, OutputFormat, Option<u32>)>>,
        fail: bool,
    }

    impl RasterCodec for RecordingCodec {
        fn encode(
            &self,
            buffer: &PixelBuffer,
            format: OutputFormat,
            dpi: Option<u32>,
        ) -> Result<Vec<u8>, CodecError> {
            self.calls.borrow_mut().push((buffer.clone(), format, dpi));
            if self.fail {
                Err(CodecError::MissingCodec("tiff"))
            } else {
                Ok(vec![0xAB; 8])
            }
        }
    }

    fn out_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pdfimages-mat-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn run_as(
        prefix: &str,
        image: &FakeImage,
        ctm: Matrix,
        options: &ExtractOptions,
        codec: &RecordingCodec,
    ) -> Result<Option<WrittenImage>, MaterializeError> {
        materialize(image, &ctm, options, codec, &out_dir(), prefix, 1)
    }

    #[test]
    fn snap_is_idempotent_and_total() {
        for x in 0..1000u32 {
            assert_eq!(snap_dpi(snap_dpi(x)), snap_dpi(x));
            if ![99, 149, 199, 299, 599].contains(&x) {
                assert_eq!(snap_dpi(x), x);
            }
        }
        assert_eq!(snap_dpi(299), 300);
        assert_eq!(snap_dpi(599), 600);
    }

    #[test]
    fn dpi_from_drawn_size() {
        // 100x100 px drawn 24x24 pt: (200 * 72) / 48 = 300
        let ctm = Matrix::new(24.0, 0.0, 0.0, 24.0, 0.0, 0.0);
        assert_eq!(estimate_dpi(100, 100, &ctm), 300);
        // Degenerate transform falls back to 72.
        assert_eq!(estimate_dpi(100, 100, &Matrix::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0)), 72);
    }

    #[test]
    fn suffix_table() {
        let jpeg = FakeImage {
            native_suffix: Some("jpg"),
            ..Default::default()
        };
        assert_eq!(output_suffix(&jpeg), "jpg");
        let jpx = FakeImage {
            native_suffix: Some("jpx"),
            ..Default::default()
        };
        assert_eq!(output_suffix(&jpx), "jp2");
        let jbig2 = FakeImage {
            native_suffix: Some("jb2"),
            ..Default::default()
        };
        assert_eq!(output_suffix(&jbig2), "png");
        let masked_jpeg = FakeImage {
            native_suffix: Some("jpg"),
            has_mask: true,
            ..Default::default()
        };
        assert_eq!(output_suffix(&masked_jpeg), "png");
        let unknown = FakeImage {
            native_suffix: None,
            ..Default::default()
        };
        assert_eq!(output_suffix(&unknown), "png");
    }

    #[test]
    fn passthrough_predicate() {
        let defaults = ExtractOptions::default();
        assert!(passthrough_eligible(&defaults, "DeviceRGB"));
        assert!(passthrough_eligible(&defaults, "DeviceGray"));
        assert!(!passthrough_eligible(&defaults, "DeviceCMYK"));
        assert!(!passthrough_eligible(&defaults, "ICCBased"));
        // Literal check: an indexed space over RGB does not qualify.
        assert!(!passthrough_eligible(&defaults, "Indexed"));

        let direct = ExtractOptions {
            direct_jpeg: true,
            ..Default::default()
        };
        assert!(passthrough_eligible(&direct, "DeviceCMYK"));

        let density = ExtractOptions {
            include_density: true,
            direct_jpeg: true,
            ..Default::default()
        };
        assert!(!passthrough_eligible(&density, "DeviceRGB"));
    }

    #[test]
    fn gray_jpeg_passes_through_untouched() {
        let image = FakeImage {
            color_space: "DeviceGray",
            native_suffix: Some("jpg"),
            compressed: Some(vec![0xFF, 0xD8, 0xFF, 0xD9]),
            ..Default::default()
        };
        let codec = RecordingCodec::default();
        let written = run_as("gray-pass", &image, Matrix::identity(), &ExtractOptions::default(), &codec)
            .unwrap()
            .unwrap();
        assert!(written.file_name.ends_with(".jpg"));
        assert!(codec.calls.borrow().is_empty(), "passthrough must not re-encode");
        let dir = out_dir();
        assert_eq!(
            std::fs::read(dir.join(&written.file_name)).unwrap(),
            vec![0xFF, 0xD8, 0xFF, 0xD9]
        );
    }

    #[test]
    fn cmyk_jpeg_recodes_unless_direct() {
        let make = || FakeImage {
            color_space: "DeviceCMYK",
            native_suffix: Some("jpg"),
            compressed: Some(vec![1, 2, 3]),
            ..Default::default()
        };

        // directJPEG=false: recode through the bitmap pipeline.
        let codec = RecordingCodec::default();
        run_as("cmyk-recode", &make(), Matrix::identity(), &ExtractOptions::default(), &codec)
            .unwrap()
            .unwrap();
        assert_eq!(codec.calls.borrow().len(), 1);
        assert_eq!(codec.calls.borrow()[0].1, OutputFormat::Jpeg);

        // directJPEG=true, includeDensity=false: passthrough even for CMYK.
        let codec = RecordingCodec::default();
        let options = ExtractOptions {
            direct_jpeg: true,
            ..Default::default()
        };
        run_as("cmyk-direct", &make(), Matrix::identity(), &options, &codec)
            .unwrap()
            .unwrap();
        assert!(codec.calls.borrow().is_empty());
    }

    #[test]
    fn bitonal_gray_tiff_is_packed_and_snapped() {
        // 100x100 px drawn at a scale giving dpi 299, snapped to 300.
        let scale = (200.0 * 72.0) / 299.0 / 2.0;
        let ctm = Matrix::new(scale, 0.0, 0.0, scale, 0.0, 0.0);
        let image = FakeImage {
            width: 100,
            height: 100,
            color_space: "DeviceGray",
            native_suffix: Some("tiff"),
            decoded: Some(PixelBuffer::Gray8 {
                width: 100,
                height: 100,
                data: vec![255; 100 * 100],
            }),
            ..Default::default()
        };
        let codec = RecordingCodec::default();
        let written = run_as("bitonal", &image, ctm, &ExtractOptions::default(), &codec)
            .unwrap()
            .unwrap();
        assert!(written.file_name.ends_with(".tiff"));
        let calls = codec.calls.borrow();
        assert_eq!(calls.len(), 1);
        let (buffer, format, dpi) = &calls[0];
        assert_eq!(*format, OutputFormat::Tiff);
        assert_eq!(*dpi, Some(300));
        match buffer {
            PixelBuffer::Bilevel { rows, .. } => {
                assert_eq!(rows.len(), 13 * 100);
                assert!(rows.iter().take(12).all(|&b| b == 0xFF));
            }
            other => panic!("expected bilevel buffer, got {other:?}"),
        }
    }

    #[test]
    fn no_color_convert_cmyk_goes_tiff_without_density() {
        let image = FakeImage {
            color_space: "DeviceCMYK",
            native_suffix: Some("png"),
            raw: Some(PixelBuffer::Cmyk8 {
                width: 4,
                height: 4,
                data: vec![0; 64],
            }),
            ..Default::default()
        };
        let options = ExtractOptions {
            no_color_convert: true,
            ..Default::default()
        };
        let codec = RecordingCodec::default();
        let written = run_as("ncc-cmyk", &image, Matrix::identity(), &options, &codec)
            .unwrap()
            .unwrap();
        assert!(written.file_name.ends_with(".tiff"));
        let calls = codec.calls.borrow();
        assert_eq!(calls[0].1, OutputFormat::Tiff);
        assert_eq!(calls[0].2, None, "raw path carries no density tag");
    }

    #[test]
    fn no_color_convert_missing_tiff_codec_skips_cleanly() {
        let image = FakeImage {
            raw: Some(PixelBuffer::Cmyk8 {
                width: 4,
                height: 4,
                data: vec![0; 64],
            }),
            ..Default::default()
        };
        let options = ExtractOptions {
            no_color_convert: true,
            ..Default::default()
        };
        let codec = RecordingCodec {
            fail: true,
            ..Default::default()
        };
        assert!(matches!(
            run_as("ncc-fail", &image, Matrix::identity(), &options, &codec),
            Err(MaterializeError::Codec(CodecError::MissingCodec(_)))
        ));
    }

    #[test]
    fn no_color_convert_falls_through_without_raw_buffer() {
        let image = FakeImage {
            native_suffix: Some("jpg"),
            compressed: Some(vec![9, 9]),
            ..Default::default()
        };
        let options = ExtractOptions {
            no_color_convert: true,
            ..Default::default()
        };
        let codec = RecordingCodec::default();
        let written = run_as("ncc-fallthrough", &image, Matrix::identity(), &options, &codec)
            .unwrap()
            .unwrap();
        // Normal jpg path applies: RGB passthrough.
        assert!(written.file_name.ends_with(".jpg"));
        assert!(codec.calls.borrow().is_empty());
    }

    #[test]
    fn undecodable_image_is_a_silent_skip() {
        let image = FakeImage {
            decoded: None,
            ..Default::default()
        };
        let codec = RecordingCodec::default();
        let result = run_as("skip", &image, Matrix::identity(), &ExtractOptions::default(), &codec).unwrap();
        assert!(result.is_none());
        assert!(codec.calls.borrow().is_empty());
    }

    #[test]
    fn bilevel_packing_layout() {
        let buffer = PixelBuffer::Gray8 {
            width: 10,
            height: 2,
            data: vec![
                255, 0, 255, 0, 255, 0, 255, 0, 255, 0, // row 0
                0, 0, 0, 0, 0, 0, 0, 0, 255, 255, // row 1
            ],
        };
        match to_bilevel(&buffer) {
            Some(PixelBuffer::Bilevel { rows, .. }) => {
                // Row 1 sets pixels 8 and 9: bits 7 and 6 of its second byte.
                assert_eq!(rows, vec![0b1010_1010, 0b1000_0000, 0b0000_0000, 0b1100_0000]);
            }
            other => panic!("expected bilevel, got {other:?}"),
        }
    }
}
