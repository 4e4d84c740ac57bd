//! Content-stream interpreter.
//!
//! Walks a page's drawing operators, tracking just enough graphics state to
//! discover every image: the transform stack, the fill/stroke paint (so
//! pattern color spaces can be chased into tiling patterns) and the text
//! rendering mode. Recurses into form XObjects, tiling patterns and
//! soft-mask transparency groups; geometry operators are accepted as no-ops.

use std::collections::HashSet;
use std::path::Path;

use log::{debug, warn};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::codec::RasterCodec;
use crate::graphics::{GraphicsState, Matrix, Paint};
use crate::image::{ImageSource, XImage};
use crate::materializer;
use crate::pdf;
use crate::{ExtractOptions, ExtractedImage};

/// Shared state of one whole-document extraction run: the dedup set and the
/// image counter span pages and every nested pattern/mask recursion.
pub struct RunContext<'a> {
    pub doc: &'a Document,
    pub options: &'a ExtractOptions,
    pub codec: &'a dyn RasterCodec,
    pub prefix: &'a str,
    pub out_dir: &'a Path,
    seen: HashSet<ObjectId>,
    counter: u32,
    pub results: Vec<ExtractedImage>,
}

impl<'a> RunContext<'a> {
    pub fn new(
        doc: &'a Document,
        options: &'a ExtractOptions,
        codec: &'a dyn RasterCodec,
        prefix: &'a str,
        out_dir: &'a Path,
    ) -> Self {
        RunContext {
            doc,
            options,
            codec,
            prefix,
            out_dir,
            seen: HashSet::new(),
            counter: 1,
            results: Vec::new(),
        }
    }

    fn next_image_number(&mut self) -> u32 {
        let n = self.counter;
        self.counter += 1;
        n
    }
}

/// Interpret one page: its content stream, then the soft-mask transparency
/// groups reachable from its ExtGState resources.
pub fn run_page(ctx: &mut RunContext<'_>, page_id: ObjectId) {
    let resources = pdf::page_resources(ctx.doc, page_id);
    // Cycle guard for form/pattern/mask streams, scoped to this page-like
    // traversal.
    let mut visited: HashSet<ObjectId> = HashSet::new();

    match ctx.doc.get_page_content(page_id) {
        Ok(content) => run_stream(
            ctx,
            &mut visited,
            &content,
            resources,
            GraphicsState::default(),
        ),
        Err(e) => warn!("page {page_id:?}: unreadable content stream: {e}"),
    }

    scan_soft_masks(ctx, &mut visited, resources);
}

/// Execute every operator of one content stream against a fresh state stack.
fn run_stream(
    ctx: &mut RunContext<'_>,
    visited: &mut HashSet<ObjectId>,
    content: &[u8],
    resources: Option<&Dictionary>,
    initial: GraphicsState,
) {
    let content = match Content::decode(content) {
        Ok(content) => content,
        Err(e) => {
            warn!("undecodable content stream: {e}");
            return;
        }
    };

    let mut gs = initial;
    let mut stack: Vec<GraphicsState> = Vec::new();

    for op in &content.operations {
        let operands = &op.operands;
        match op.operator.as_ref() {
            "q" => stack.push(gs.clone()),
            "Q" => match stack.pop() {
                Some(saved) => gs = saved,
                None => debug!("graphics state stack underflow"),
            },
            "cm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    gs.ctm = gs.ctm.concat(&m);
                }
            }
            "cs" => gs.fill = named_space(operands),
            "CS" => gs.stroke = named_space(operands),
            "scn" => select_pattern(&mut gs.fill, operands),
            "SCN" => select_pattern(&mut gs.stroke, operands),
            "g" | "rg" | "k" => gs.fill = Paint::device(),
            "G" | "RG" | "K" => gs.stroke = Paint::device(),
            "Tr" => {
                if let Some(Object::Integer(mode)) = operands.first() {
                    gs.text_render_mode = *mode;
                }
            }
            // Path painting: the geometry is irrelevant here, but the paint
            // may resolve to a tiling pattern holding images.
            "S" | "s" => color_event(ctx, visited, &gs.stroke, resources, &gs),
            "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                color_event(ctx, visited, &gs.fill, resources, &gs)
            }
            "Tj" | "TJ" | "'" | "\"" => {
                if gs.text_mode_fills() {
                    color_event(ctx, visited, &gs.fill, resources, &gs);
                }
                if gs.text_mode_strokes() {
                    color_event(ctx, visited, &gs.stroke, resources, &gs);
                }
            }
            "Do" => {
                let name = operands.first().and_then(|o| o.as_name().ok());
                if let (Some(name), Some(res)) = (name, resources) {
                    xobject_event(ctx, visited, name, res, &gs);
                }
            }
            // Shading fills are not traced for embedded images.
            "sh" => {}
            // Everything else (path construction, clipping, text positioning,
            // marked content, inline-image syntax) needs no state here.
            _ => {}
        }
    }
}

fn named_space(operands: &[Object]) -> Paint {
    match operands.first().and_then(|o| o.as_name().ok()) {
        Some(b"Pattern") => Paint::pattern_space(),
        _ => Paint::device(),
    }
}

/// `scn`/`SCN` in a pattern space names the pattern as its last operand.
fn select_pattern(paint: &mut Paint, operands: &[Object]) {
    if paint.is_pattern_space {
        paint.pattern_name = operands
            .last()
            .and_then(|o| o.as_name().ok())
            .map(|n| n.to_vec());
    }
}

/// A color was used for painting. If it resolves to a tiling pattern, the
/// pattern's own content stream is interpreted for further images.
fn color_event(
    ctx: &mut RunContext<'_>,
    visited: &mut HashSet<ObjectId>,
    paint: &Paint,
    resources: Option<&Dictionary>,
    gs: &GraphicsState,
) {
    if !paint.is_pattern_space {
        return;
    }
    let (Some(name), Some(res)) = (&paint.pattern_name, resources) else {
        return;
    };
    let Some(&pattern_id) = pdf::patterns(ctx.doc, res).get(name) else {
        return;
    };
    let Ok(Object::Stream(stream)) = ctx.doc.get_object(pattern_id) else {
        // Shading patterns are dictionaries; image-irrelevant either way.
        return;
    };
    // PatternType 1 is tiling; 2 (shading) carries no content stream.
    if pdf::dict_get_int(ctx.doc, &stream.dict, b"PatternType") != Some(1) {
        return;
    }
    if !visited.insert(pattern_id) {
        return;
    }

    let pattern_resources = stream
        .dict
        .get(b"Resources")
        .ok()
        .and_then(|r| pdf::resolve_dict(ctx.doc, r))
        .or(resources);
    let sub = gs.derive(&pdf::dict_matrix(ctx.doc, &stream.dict));
    let content = pdf::decompress_stream(stream);
    run_stream(ctx, visited, &content, pattern_resources, sub);
}

/// `Do`: paint an image, or recurse into a form XObject.
fn xobject_event(
    ctx: &mut RunContext<'_>,
    visited: &mut HashSet<ObjectId>,
    name: &[u8],
    resources: &Dictionary,
    gs: &GraphicsState,
) {
    let Some(&id) = pdf::xobjects(ctx.doc, resources).get(name) else {
        return;
    };
    let subtype = ctx
        .doc
        .get_object(id)
        .ok()
        .and_then(|obj| match obj {
            Object::Stream(s) => pdf::dict_get_name(ctx.doc, &s.dict, b"Subtype"),
            _ => None,
        });
    match subtype.as_deref() {
        Some("Image") => image_event(ctx, visited, id, resources, gs),
        Some("Form") => form_event(ctx, visited, id, resources, gs),
        _ => {}
    }
}

/// An image-paint event: stencil ink color first (it may be a tiling pattern
/// with more images), then the dedup gate, then materialization.
fn image_event(
    ctx: &mut RunContext<'_>,
    visited: &mut HashSet<ObjectId>,
    id: ObjectId,
    resources: &Dictionary,
    gs: &GraphicsState,
) {
    let Some(image) = XImage::new(ctx.doc, id) else {
        return;
    };

    if image.is_stencil() {
        color_event(ctx, visited, &gs.fill, Some(resources), gs);
    }

    if ctx.seen.contains(&id) {
        debug!("image {id:?}: duplicate reference, skipping");
        return;
    }
    ctx.seen.insert(id);
    let number = ctx.next_image_number();

    match materializer::materialize(
        &image,
        &gs.ctm,
        ctx.options,
        ctx.codec,
        ctx.out_dir,
        ctx.prefix,
        number,
    ) {
        Ok(Some(written)) => ctx.results.push(ExtractedImage {
            file_name: written.file_name,
            width: written.width,
            height: written.height,
            object_number: id.0,
            generation: id.1,
        }),
        Ok(None) => {}
        Err(e) => warn!("image {id:?}: {e}"),
    }
}

fn form_event(
    ctx: &mut RunContext<'_>,
    visited: &mut HashSet<ObjectId>,
    id: ObjectId,
    parent_resources: &Dictionary,
    gs: &GraphicsState,
) {
    if !visited.insert(id) {
        return;
    }
    let Ok(Object::Stream(stream)) = ctx.doc.get_object(id) else {
        return;
    };
    let form_resources = stream
        .dict
        .get(b"Resources")
        .ok()
        .and_then(|r| pdf::resolve_dict(ctx.doc, r))
        .unwrap_or(parent_resources);

    let mut sub = gs.clone();
    sub.ctm = gs.ctm.concat(&pdf::dict_matrix(ctx.doc, &stream.dict));
    let content = pdf::decompress_stream(stream);
    run_stream(ctx, visited, &content, Some(form_resources), sub);
}

/// Scan the ExtGState resources for soft masks with transparency groups and
/// interpret each group's content stream as if it were a page. Entries
/// without a usable soft mask are skipped without error.
fn scan_soft_masks(
    ctx: &mut RunContext<'_>,
    visited: &mut HashSet<ObjectId>,
    resources: Option<&Dictionary>,
) {
    let Some(res) = resources else {
        return;
    };
    for ext_g_state in pdf::ext_g_states(ctx.doc, res) {
        let Some(group_id) = pdf::soft_mask_group(ctx.doc, ext_g_state) else {
            continue;
        };
        if !visited.insert(group_id) {
            continue;
        }
        let Ok(Object::Stream(stream)) = ctx.doc.get_object(group_id) else {
            continue;
        };
        let group_resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|r| pdf::resolve_dict(ctx.doc, r))
            .or(Some(res));
        let gs = GraphicsState::default().derive(&pdf::dict_matrix(ctx.doc, &stream.dict));
        let content = pdf::decompress_stream(stream);
        run_stream(ctx, visited, &content, group_resources, gs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, OutputFormat, PixelBuffer};

    struct NullCodec;
    impl RasterCodec for NullCodec {
        fn encode(
            &self,
            _buffer: &PixelBuffer,
            _format: OutputFormat,
            _dpi: Option<u32>,
        ) -> Result<Vec<u8>, CodecError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn malformed_streams_do_not_panic() {
        let doc = Document::new();
        let options = ExtractOptions::default();
        let out_dir = std::env::temp_dir();
        let mut ctx = RunContext::new(&doc, &options, &NullCodec, "x", &out_dir);
        let mut visited = HashSet::new();

        // Stack underflow, unknown operators, truncated operands.
        run_stream(
            &mut ctx,
            &mut visited,
            b"Q Q q 1 0 0 cm /Nothing Do wibble f",
            None,
            GraphicsState::default(),
        );
        assert!(ctx.results.is_empty());
        assert_eq!(ctx.counter, 1);
    }

    #[test]
    fn pattern_selection_tracks_space() {
        let mut paint = Paint::device();
        select_pattern(&mut paint, &[Object::Name(b"P1".to_vec())]);
        assert!(paint.pattern_name.is_none(), "device space ignores scn names");

        let mut paint = Paint::pattern_space();
        select_pattern(
            &mut paint,
            &[Object::Real(0.5), Object::Name(b"P1".to_vec())],
        );
        assert_eq!(paint.pattern_name.as_deref(), Some(b"P1".as_ref()));
    }
}
