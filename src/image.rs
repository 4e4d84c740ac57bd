//! Embedded image objects: intrinsic properties, sample decoding and
//! passthrough access to the native compressed stream.

use lopdf::{Document, Object, ObjectId, Stream};

use crate::codec::PixelBuffer;
use crate::pdf;

/// The image contract the materializer consumes. `XImage` is the lopdf-backed
/// implementation; tests substitute fakes.
pub trait ImageSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn bits_per_component(&self) -> u32;
    /// Literal color-space name from the image dictionary (family name for
    /// array forms), not resolved to a base space.
    fn color_space_name(&self) -> &str;
    /// 1-bit stencil mask painted with the current fill color.
    fn is_stencil(&self) -> bool;
    /// Explicit `/Mask` or `/SMask` present.
    fn has_mask(&self) -> bool;
    /// Suffix implied by the native compression: "jpg", "jpx", "tiff", "jb2",
    /// "png" for plain deflate-style encodings, or none when unknown.
    fn native_suffix(&self) -> Option<&'static str>;
    /// Original, non-color-converted samples, when they can be produced.
    fn raw_buffer(&self) -> Option<PixelBuffer>;
    /// Fully color-converted samples, when they can be produced.
    fn decoded_buffer(&self) -> Option<PixelBuffer>;
    /// The native compressed bytes, valid only if the image's filter is one
    /// of the acceptable names.
    fn compressed_stream(&self, acceptable_filters: &[&str]) -> Option<Vec<u8>>;
}

/// An image XObject resolved from the document.
pub struct XImage<'a> {
    doc: &'a Document,
    id: ObjectId,
    stream: &'a Stream,
    width: u32,
    height: u32,
    bits_per_component: u32,
    color_space: String,
    filters: Vec<String>,
    is_stencil: bool,
    has_mask: bool,
}

/// Filters the image codecs own. At most one appears in a chain, always last,
/// possibly behind Flate wrappers.
const CODEC_FILTERS: &[&str] = &["DCTDecode", "DCT", "JPXDecode", "CCITTFaxDecode", "CCF", "JBIG2Decode"];

/// Sample encodings that can sit in front of (or instead of) a codec filter.
fn is_plain_encoding(filter: &str) -> bool {
    matches!(
        filter,
        "FlateDecode" | "Fl" | "LZWDecode" | "LZW" | "RunLengthDecode" | "RL"
    )
}

impl<'a> XImage<'a> {
    /// Wrap an image XObject. Returns none if the object is not an image
    /// stream.
    pub fn new(doc: &'a Document, id: ObjectId) -> Option<XImage<'a>> {
        let stream = match doc.get_object(id).ok()? {
            Object::Stream(s) => s,
            _ => return None,
        };
        let dict = &stream.dict;
        if pdf::dict_get_name(doc, dict, b"Subtype").as_deref() != Some("Image") {
            return None;
        }

        let is_stencil = matches!(
            pdf::dict_get(doc, dict, b"ImageMask"),
            Some(Object::Boolean(true))
        );
        let color_space = dict
            .get(b"ColorSpace")
            .ok()
            .map(|cs| pdf::color_space_name(doc, cs))
            .unwrap_or_else(|| {
                if is_stencil {
                    "DeviceGray".to_string()
                } else {
                    "Unknown".to_string()
                }
            });

        // A color-key /Mask array carries no transparency channel; only a
        // stream-valued mask (or a soft mask) forces the png output path.
        let has_stream_mask = matches!(
            pdf::dict_get(doc, dict, b"Mask"),
            Some(Object::Stream(_))
        );

        Some(XImage {
            doc,
            id,
            stream,
            width: pdf::dict_get_int(doc, dict, b"Width").unwrap_or(0) as u32,
            height: pdf::dict_get_int(doc, dict, b"Height").unwrap_or(0) as u32,
            bits_per_component: pdf::dict_get_int(doc, dict, b"BitsPerComponent")
                .unwrap_or(if is_stencil { 1 } else { 8 }) as u32,
            color_space,
            filters: pdf::stream_filters(doc, dict),
            is_stencil,
            has_mask: has_stream_mask || dict.has(b"SMask"),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The image codec filter of the chain, if any.
    fn codec_filter(&self) -> Option<&str> {
        self.filters
            .iter()
            .map(String::as_str)
            .find(|f| CODEC_FILTERS.contains(f))
    }

    /// Stream bytes with outer Flate wrappers stripped, stopping at the image
    /// codec filter. None when the last filter is not one of the acceptable
    /// names or an outer layer cannot be applied.
    fn codec_stream(&self, acceptable_filters: &[&str]) -> Option<Vec<u8>> {
        let (last, outer) = self.filters.split_last()?;
        if !acceptable_filters.contains(&last.as_str()) {
            return None;
        }
        let mut data = self.stream.content.clone();
        for filter in outer {
            match filter.as_str() {
                "FlateDecode" | "Fl" => data = pdf::inflate(&data)?,
                _ => return None,
            }
        }
        Some(data)
    }

    /// Samples in their native layout, without color conversion.
    /// Only plain deflate/raw encodings are decodable here.
    fn native_samples(&self) -> Option<Vec<u8>> {
        let mut data = self.stream.content.clone();
        for filter in &self.filters {
            match filter.as_str() {
                "FlateDecode" | "Fl" => data = pdf::inflate(&data)?,
                _ => return None,
            }
        }
        Some(data)
    }

    fn expand_bilevel(&self, data: &[u8]) -> Option<PixelBuffer> {
        let (w, h) = (self.width as usize, self.height as usize);
        let stride = w.div_ceil(8);
        if data.len() < stride * h {
            return None;
        }
        let mut gray = Vec::with_capacity(w * h);
        for row in data.chunks(stride).take(h) {
            for x in 0..w {
                let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
                gray.push(if bit == 1 { 255 } else { 0 });
            }
        }
        Some(PixelBuffer::Gray8 {
            width: self.width,
            height: self.height,
            data: gray,
        })
    }

    /// Interpret raw samples per the declared color space, optionally
    /// converting to a device-independent layout.
    fn samples_to_buffer(&self, data: Vec<u8>, color_convert: bool) -> Option<PixelBuffer> {
        let (w, h) = (self.width, self.height);
        let pixels = w as usize * h as usize;
        if pixels == 0 {
            return None;
        }

        if self.bits_per_component == 1 {
            // Stencils and 1-bit grayscale share the packed layout.
            if color_convert {
                return self.expand_bilevel(&data);
            }
            let stride = (w as usize).div_ceil(8);
            if data.len() < stride * h as usize {
                return None;
            }
            return Some(PixelBuffer::Bilevel {
                width: w,
                height: h,
                rows: data[..stride * h as usize].to_vec(),
            });
        }
        if self.bits_per_component != 8 {
            return None;
        }

        match self.color_space.as_str() {
            "DeviceGray" | "CalGray" => {
                if data.len() < pixels {
                    return None;
                }
                Some(PixelBuffer::Gray8 {
                    width: w,
                    height: h,
                    data: data[..pixels].to_vec(),
                })
            }
            "DeviceRGB" | "CalRGB" => {
                if data.len() < pixels * 3 {
                    return None;
                }
                Some(PixelBuffer::Rgb8 {
                    width: w,
                    height: h,
                    data: data[..pixels * 3].to_vec(),
                })
            }
            "DeviceCMYK" => {
                if data.len() < pixels * 4 {
                    return None;
                }
                if !color_convert {
                    return Some(PixelBuffer::Cmyk8 {
                        width: w,
                        height: h,
                        data: data[..pixels * 4].to_vec(),
                    });
                }
                let mut rgb = Vec::with_capacity(pixels * 3);
                for px in data[..pixels * 4].chunks(4) {
                    let c = px[0] as f32 / 255.0;
                    let m = px[1] as f32 / 255.0;
                    let y = px[2] as f32 / 255.0;
                    let k = px[3] as f32 / 255.0;
                    rgb.push(((1.0 - c) * (1.0 - k) * 255.0) as u8);
                    rgb.push(((1.0 - m) * (1.0 - k) * 255.0) as u8);
                    rgb.push(((1.0 - y) * (1.0 - k) * 255.0) as u8);
                }
                Some(PixelBuffer::Rgb8 {
                    width: w,
                    height: h,
                    data: rgb,
                })
            }
            "ICCBased" => {
                // No profile math here; guess the layout from the data size.
                if data.len() >= pixels * 3 {
                    Some(PixelBuffer::Rgb8 {
                        width: w,
                        height: h,
                        data: data[..pixels * 3].to_vec(),
                    })
                } else if data.len() >= pixels {
                    Some(PixelBuffer::Gray8 {
                        width: w,
                        height: h,
                        data: data[..pixels].to_vec(),
                    })
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn dynamic_to_buffer(img: image::DynamicImage) -> PixelBuffer {
        match img {
            image::DynamicImage::ImageLuma8(g) => PixelBuffer::Gray8 {
                width: g.width(),
                height: g.height(),
                data: g.into_raw(),
            },
            image::DynamicImage::ImageRgb8(rgb) => PixelBuffer::Rgb8 {
                width: rgb.width(),
                height: rgb.height(),
                data: rgb.into_raw(),
            },
            image::DynamicImage::ImageRgba8(rgba) => PixelBuffer::Rgba8 {
                width: rgba.width(),
                height: rgba.height(),
                data: rgba.into_raw(),
            },
            other => {
                let rgb = other.to_rgb8();
                PixelBuffer::Rgb8 {
                    width: rgb.width(),
                    height: rgb.height(),
                    data: rgb.into_raw(),
                }
            }
        }
    }
}

impl ImageSource for XImage<'_> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn bits_per_component(&self) -> u32 {
        self.bits_per_component
    }

    fn color_space_name(&self) -> &str {
        &self.color_space
    }

    fn is_stencil(&self) -> bool {
        self.is_stencil
    }

    fn has_mask(&self) -> bool {
        self.has_mask
    }

    fn native_suffix(&self) -> Option<&'static str> {
        match self.codec_filter() {
            Some("DCTDecode" | "DCT") => Some("jpg"),
            Some("JPXDecode") => Some("jpx"),
            Some("CCITTFaxDecode" | "CCF") => Some("tiff"),
            Some("JBIG2Decode") => Some("jb2"),
            _ => {
                // Raw samples, or a chain of plain sample encodings only.
                if self.filters.iter().all(|f| is_plain_encoding(f)) {
                    Some("png")
                } else {
                    None
                }
            }
        }
    }

    fn raw_buffer(&self) -> Option<PixelBuffer> {
        let data = self.native_samples()?;
        self.samples_to_buffer(data, false)
    }

    fn decoded_buffer(&self) -> Option<PixelBuffer> {
        match self.codec_filter() {
            Some("DCTDecode" | "DCT") => {
                let bytes = self.codec_stream(&["DCTDecode", "DCT"])?;
                let img =
                    image::load_from_memory_with_format(&bytes, image::ImageFormat::Jpeg).ok()?;
                Some(Self::dynamic_to_buffer(img))
            }
            Some("JPXDecode") => {
                // No JPEG2000 decoder is available; this succeeds only if the
                // stream turns out to be a format the image crate recognizes.
                let bytes = self.codec_stream(&["JPXDecode"])?;
                let img = image::load_from_memory(&bytes).ok()?;
                Some(Self::dynamic_to_buffer(img))
            }
            Some(_) => None,
            None => {
                let data = self.native_samples()?;
                self.samples_to_buffer(data, true)
            }
        }
    }

    fn compressed_stream(&self, acceptable_filters: &[&str]) -> Option<Vec<u8>> {
        self.codec_stream(acceptable_filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn image_doc(dict: lopdf::Dictionary, content: Vec<u8>) -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.5");
        let id = doc.add_object(Object::Stream(Stream::new(dict, content)));
        (doc, id)
    }

    #[test]
    fn gray_flate_free_samples_decode() {
        let dict = dictionary! {
            "Type" => Object::Name(b"XObject".to_vec()),
            "Subtype" => Object::Name(b"Image".to_vec()),
            "Width" => 2i64,
            "Height" => 2i64,
            "ColorSpace" => Object::Name(b"DeviceGray".to_vec()),
            "BitsPerComponent" => 8i64,
        };
        let (doc, id) = image_doc(dict, vec![0, 85, 170, 255]);
        let img = XImage::new(&doc, id).unwrap();
        assert_eq!(img.native_suffix(), Some("png"));
        assert_eq!(
            img.decoded_buffer(),
            Some(PixelBuffer::Gray8 {
                width: 2,
                height: 2,
                data: vec![0, 85, 170, 255]
            })
        );
    }

    #[test]
    fn one_bit_raw_buffer_stays_packed() {
        let dict = dictionary! {
            "Subtype" => Object::Name(b"Image".to_vec()),
            "Width" => 10i64,
            "Height" => 2i64,
            "ColorSpace" => Object::Name(b"DeviceGray".to_vec()),
            "BitsPerComponent" => 1i64,
        };
        // 10 pixels -> 2 bytes per row
        let (doc, id) = image_doc(dict, vec![0b1010_1010, 0b1100_0000, 0xff, 0x40]);
        let img = XImage::new(&doc, id).unwrap();
        match img.raw_buffer() {
            Some(PixelBuffer::Bilevel { width, height, rows }) => {
                assert_eq!((width, height), (10, 2));
                assert_eq!(rows.len(), 4);
            }
            other => panic!("expected packed bilevel buffer, got {other:?}"),
        }
        // Decoded form expands to 8-bit gray.
        match img.decoded_buffer() {
            Some(PixelBuffer::Gray8 { data, .. }) => {
                assert_eq!(data.len(), 20);
                assert_eq!(&data[..4], &[255, 0, 255, 0]);
            }
            other => panic!("expected gray buffer, got {other:?}"),
        }
    }

    #[test]
    fn cmyk_raw_keeps_four_channels() {
        let dict = dictionary! {
            "Subtype" => Object::Name(b"Image".to_vec()),
            "Width" => 1i64,
            "Height" => 1i64,
            "ColorSpace" => Object::Name(b"DeviceCMYK".to_vec()),
            "BitsPerComponent" => 8i64,
        };
        let (doc, id) = image_doc(dict, vec![0, 0, 0, 255]);
        let img = XImage::new(&doc, id).unwrap();
        let raw = img.raw_buffer().unwrap();
        assert_eq!(raw.channels(), 4);
        // Fully converted form is RGB black.
        assert_eq!(
            img.decoded_buffer(),
            Some(PixelBuffer::Rgb8 {
                width: 1,
                height: 1,
                data: vec![0, 0, 0]
            })
        );
    }

    #[test]
    fn passthrough_respects_acceptable_filters() {
        let dict = dictionary! {
            "Subtype" => Object::Name(b"Image".to_vec()),
            "Width" => 1i64,
            "Height" => 1i64,
            "ColorSpace" => Object::Name(b"DeviceRGB".to_vec()),
            "BitsPerComponent" => 8i64,
            "Filter" => Object::Name(b"DCTDecode".to_vec()),
        };
        let (doc, id) = image_doc(dict, vec![0xde, 0xad]);
        let img = XImage::new(&doc, id).unwrap();
        assert_eq!(
            img.compressed_stream(&["DCTDecode", "DCT"]),
            Some(vec![0xde, 0xad])
        );
        assert_eq!(img.compressed_stream(&["JPXDecode"]), None);
    }

    #[test]
    fn flate_wrapped_jpeg_unwraps_for_passthrough() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let jpeg = vec![0xFF, 0xD8, 0x01, 0x02, 0x03, 0xFF, 0xD9];
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&jpeg).unwrap();
        let wrapped = encoder.finish().unwrap();

        let dict = dictionary! {
            "Subtype" => Object::Name(b"Image".to_vec()),
            "Width" => 1i64,
            "Height" => 1i64,
            "ColorSpace" => Object::Name(b"DeviceRGB".to_vec()),
            "BitsPerComponent" => 8i64,
            "Filter" => Object::Array(vec![
                Object::Name(b"FlateDecode".to_vec()),
                Object::Name(b"DCTDecode".to_vec()),
            ]),
        };
        let (doc, id) = image_doc(dict, wrapped);
        let img = XImage::new(&doc, id).unwrap();
        // The chain is classified by its codec filter, not its first entry.
        assert_eq!(img.native_suffix(), Some("jpg"));
        assert_eq!(img.compressed_stream(&["DCTDecode", "DCT"]), Some(jpeg));
    }

    #[test]
    fn unknown_filter_has_no_suffix() {
        let dict = dictionary! {
            "Subtype" => Object::Name(b"Image".to_vec()),
            "Width" => 1i64,
            "Height" => 1i64,
            "ColorSpace" => Object::Name(b"DeviceRGB".to_vec()),
            "BitsPerComponent" => 8i64,
            "Filter" => Object::Name(b"Crypt".to_vec()),
        };
        let (doc, id) = image_doc(dict, vec![0]);
        let img = XImage::new(&doc, id).unwrap();
        assert_eq!(img.native_suffix(), None);
        assert_eq!(img.decoded_buffer(), None);
    }

    #[test]
    fn color_key_mask_is_not_a_transparency_mask() {
        let base = || {
            dictionary! {
                "Subtype" => Object::Name(b"Image".to_vec()),
                "Width" => 1i64,
                "Height" => 1i64,
                "ColorSpace" => Object::Name(b"DeviceRGB".to_vec()),
                "BitsPerComponent" => 8i64,
            }
        };

        // Color-key masking: an array of component ranges, no alpha data.
        let mut color_key = base();
        color_key.set(
            "Mask",
            Object::Array(vec![Object::Integer(250), Object::Integer(255)]),
        );
        let (doc, id) = image_doc(color_key, vec![0, 0, 0]);
        assert!(!XImage::new(&doc, id).unwrap().has_mask());

        // A stream-valued mask carries transparency.
        let mut doc = Document::with_version("1.5");
        let mask = doc.add_object(Object::Stream(Stream::new(
            dictionary! {
                "Subtype" => Object::Name(b"Image".to_vec()),
                "Width" => 8i64,
                "Height" => 1i64,
                "ImageMask" => true,
            },
            vec![0xF0],
        )));
        let mut with_stream = base();
        with_stream.set("Mask", Object::Reference(mask));
        let id = doc.add_object(Object::Stream(Stream::new(with_stream, vec![0, 0, 0])));
        assert!(XImage::new(&doc, id).unwrap().has_mask());
    }

    #[test]
    fn stencil_defaults() {
        let dict = dictionary! {
            "Subtype" => Object::Name(b"Image".to_vec()),
            "Width" => 8i64,
            "Height" => 1i64,
            "ImageMask" => true,
        };
        let (doc, id) = image_doc(dict, vec![0b1111_0000]);
        let img = XImage::new(&doc, id).unwrap();
        assert!(img.is_stencil());
        assert_eq!(img.bits_per_component(), 1);
        assert_eq!(img.color_space_name(), "DeviceGray");
    }
}
