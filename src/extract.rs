//! Document-level extraction: open, decrypt, walk the pages.

use std::fs;
use std::path::Path;

use log::debug;
use lopdf::{Document, Object};

use crate::codec::ImageCodec;
use crate::interpreter::{self, RunContext};
use crate::pdf;
use crate::{ExtractError, ExtractOptions, ExtractedImage};

/// Bit 5 of the encryption dictionary's /P entry: copy or otherwise extract
/// text and graphics.
const PERMISSION_EXTRACT: i64 = 1 << 4;

/// Extract every unique embedded image of the document at `input` into
/// `out_dir`, returning one record per written file.
///
/// Files are named `<prefix>-<n>.<suffix>`; when no prefix is given it is
/// derived from the input file name with its extension stripped.
pub fn extract_images(
    input: &Path,
    out_dir: &Path,
    prefix: Option<&str>,
    password: &str,
    options: &ExtractOptions,
) -> Result<Vec<ExtractedImage>, ExtractError> {
    let mut doc = Document::load(input)?;
    if doc.is_encrypted() {
        doc.decrypt(password)?;
        if !can_extract(&doc) {
            return Err(ExtractError::AccessDenied);
        }
    }
    let prefix = match prefix {
        Some(p) => p.to_owned(),
        None => default_prefix(input),
    };
    extract_document(&doc, out_dir, &prefix, options)
}

/// Extract from an already-loaded document. Decryption and permission checks
/// are the caller's concern.
pub fn extract_document(
    doc: &Document,
    out_dir: &Path,
    prefix: &str,
    options: &ExtractOptions,
) -> Result<Vec<ExtractedImage>, ExtractError> {
    fs::create_dir_all(out_dir)?;
    let codec = ImageCodec;
    let mut ctx = RunContext::new(doc, options, &codec, prefix, out_dir);
    for (page_number, page_id) in doc.get_pages() {
        debug!("processing page {page_number}");
        interpreter::run_page(&mut ctx, page_id);
    }
    Ok(ctx.results)
}

/// Whether the document's permissions allow extracting graphics. Documents
/// without an encryption dictionary, or without a /P entry, allow everything.
fn can_extract(doc: &Document) -> bool {
    let Some(encrypt) = doc
        .trailer
        .get(b"Encrypt")
        .ok()
        .and_then(|e| pdf::resolve_dict(doc, e))
    else {
        return true;
    };
    match pdf::dict_get(doc, encrypt, b"P") {
        Some(Object::Integer(p)) => p & PERMISSION_EXTRACT != 0,
        _ => true,
    }
}

/// The input file name with a four-character extension stripped, matching the
/// conventional `.pdf` suffix. Short names are kept whole.
fn default_prefix(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.chars().count() > 4 {
        let cut = name.char_indices().rev().nth(3).map(|(i, _)| i).unwrap_or(0);
        name[..cut].to_owned()
    } else {
        name
    }
}
