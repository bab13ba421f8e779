//! Page dictionary lookups
//!
//! Attribute inheritance through the page tree and page geometry.

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::page::{PageGeometry, Rotation};

/// Attributes a page may inherit from its ancestors in the page tree
pub(crate) const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

const MAX_TREE_DEPTH: usize = 32;

/// Look up `key` on the page, walking up through `Parent` links if absent
pub(crate) fn inherited_attribute<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = doc.objects.get(&page_id)?.as_dict().ok()?;

    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        let parent_id = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.objects.get(&parent_id)?.as_dict().ok()?;
    }

    None
}

/// Follow a reference to its target, or return the object itself
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.objects.get(id),
        other => Some(other),
    }
}

pub(crate) fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj)?.as_dict().ok()
}

pub(crate) fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(n) => Some(*n as f64),
        Object::Real(n) => Some(*n as f64),
        _ => None,
    }
}

/// Parse a rectangle array [x1, y1, x2, y2]
fn parse_box(doc: &Document, obj: &Object) -> Option<[f64; 4]> {
    let array = resolve(doc, obj)?.as_array().ok()?;
    if array.len() != 4 {
        return None;
    }

    let mut result = [0.0; 4];
    for (slot, item) in result.iter_mut().zip(array) {
        *slot = number(resolve(doc, item)?)?;
    }
    Some(result)
}

/// Page size from the (inherited) MediaBox and /Rotate
///
/// Falls back to US Letter when no usable MediaBox exists.
pub(crate) fn page_geometry(doc: &Document, page_id: ObjectId) -> PageGeometry {
    let media_box = inherited_attribute(doc, page_id, b"MediaBox")
        .and_then(|obj| parse_box(doc, obj))
        .unwrap_or([0.0, 0.0, 612.0, 792.0]);

    let base_rotation = inherited_attribute(doc, page_id, b"Rotate")
        .and_then(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_i64().ok())
        .and_then(Rotation::from_degrees)
        .unwrap_or_default();

    PageGeometry {
        width_pt: (media_box[2] - media_box[0]).abs(),
        height_pt: (media_box[3] - media_box[1]).abs(),
        base_rotation,
    }
}

/// The only page of a single-page slice
pub(crate) fn first_page(doc: &Document) -> Option<ObjectId> {
    doc.get_pages().values().next().copied()
}
