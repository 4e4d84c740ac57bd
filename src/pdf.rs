//! Helpers over the lopdf object model: reference resolution, dictionary
//! accessors and the resource lookups the interpreter needs.

use flate2::read::ZlibDecoder;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use std::io::Read;

use crate::graphics::Matrix;

/// Resolve a reference to the actual object.
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        _ => Some(obj),
    }
}

/// Resolve an object down to a dictionary, following one reference hop.
pub fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

/// Get a dictionary entry resolved through references.
pub fn dict_get<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().and_then(|obj| resolve(doc, obj))
}

pub fn dict_get_int(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<i64> {
    match dict_get(doc, dict, key)? {
        Object::Integer(n) => Some(*n),
        _ => None,
    }
}

pub fn dict_get_name(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict_get(doc, dict, key)? {
        Object::Name(n) => Some(String::from_utf8_lossy(n).to_string()),
        _ => None,
    }
}

/// Filter chain of a stream in application order; empty for raw samples.
/// A bare name and a one-element array are equivalent.
pub fn stream_filters(doc: &Document, dict: &Dictionary) -> Vec<String> {
    match dict_get(doc, dict, b"Filter") {
        Some(Object::Name(n)) => vec![String::from_utf8_lossy(n).to_string()],
        Some(Object::Array(arr)) => arr
            .iter()
            .filter_map(|f| match resolve(doc, f)? {
                Object::Name(n) => Some(String::from_utf8_lossy(n).to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Color space name as written in the dictionary: a bare name, or the family
/// name of an array form (ICCBased, Indexed, ...). The name is literal and
/// deliberately not resolved to its base space.
pub fn color_space_name(doc: &Document, obj: &Object) -> String {
    match obj {
        Object::Name(name) => String::from_utf8_lossy(name).to_string(),
        Object::Array(arr) => match arr.first() {
            Some(Object::Name(name)) => String::from_utf8_lossy(name).to_string(),
            _ => "Unknown".to_string(),
        },
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(resolved) => color_space_name(doc, resolved),
            Err(_) => "Unknown".to_string(),
        },
        _ => "Unknown".to_string(),
    }
}

/// Decompress a content stream's bytes. Only FlateDecode is handled here;
/// anything else is returned as-is.
pub fn decompress_stream(stream: &Stream) -> Vec<u8> {
    if let Ok(data) = stream.decompressed_content() {
        return data;
    }
    inflate(&stream.content).unwrap_or_else(|| stream.content.clone())
}

/// One zlib/deflate pass over raw bytes.
pub fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).ok()?;
    Some(decoded)
}

/// Named entries of a resource sub-dictionary, as object references.
fn named_refs(doc: &Document, resources: &Dictionary, key: &[u8]) -> HashMap<Vec<u8>, ObjectId> {
    let mut result = HashMap::new();
    if let Some(Object::Dictionary(sub)) = dict_get(doc, resources, key) {
        for (name, value) in sub.iter() {
            if let Object::Reference(id) = value {
                result.insert(name.clone(), *id);
            }
        }
    }
    result
}

/// XObject name -> object id mapping from a resource dictionary.
pub fn xobjects(doc: &Document, resources: &Dictionary) -> HashMap<Vec<u8>, ObjectId> {
    named_refs(doc, resources, b"XObject")
}

/// Pattern name -> object id mapping from a resource dictionary.
pub fn patterns(doc: &Document, resources: &Dictionary) -> HashMap<Vec<u8>, ObjectId> {
    named_refs(doc, resources, b"Pattern")
}

/// ExtGState name -> dictionary mapping from a resource dictionary.
/// Entries that are present but not dictionaries are skipped, not errors.
pub fn ext_g_states<'a>(doc: &'a Document, resources: &'a Dictionary) -> Vec<&'a Dictionary> {
    let mut result = Vec::new();
    if let Some(Object::Dictionary(sub)) = dict_get(doc, resources, b"ExtGState") {
        for (_, value) in sub.iter() {
            if let Some(gs) = resolve_dict(doc, value) {
                result.push(gs);
            }
        }
    }
    result
}

/// The transparency-group stream of an ExtGState's soft mask, if any.
/// `/SMask /None` and malformed entries yield none.
pub fn soft_mask_group(doc: &Document, ext_g_state: &Dictionary) -> Option<ObjectId> {
    let smask = dict_get(doc, ext_g_state, b"SMask")?;
    let smask_dict = match smask {
        Object::Dictionary(d) => d,
        _ => return None,
    };
    match smask_dict.get(b"G").ok()? {
        Object::Reference(id) => Some(*id),
        _ => None,
    }
}

/// `/Matrix` entry of a pattern or form dictionary, defaulting to identity.
pub fn dict_matrix(doc: &Document, dict: &Dictionary) -> Matrix {
    dict_get(doc, dict, b"Matrix")
        .and_then(|m| match m {
            Object::Array(arr) => Matrix::from_operands(arr),
            _ => None,
        })
        .unwrap_or_else(Matrix::identity)
}

/// Resources of a page, walking up the page tree for inherited entries.
pub fn page_resources<'a>(doc: &'a Document, page_id: ObjectId) -> Option<&'a Dictionary> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    loop {
        if let Some(res) = dict.get(b"Resources").ok().and_then(|r| resolve_dict(doc, r)) {
            return Some(res);
        }
        let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
}
