//! Assembly engine
//!
//! Orders the selected pages, runs the compression decision for each one
//! on the worker pool, and concatenates the chosen payloads into a single
//! PDF. Pages that cannot be emitted are left out and reported; invariant
//! violations abort the call without producing output.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::str::FromStr;

use lopdf::{dictionary, Document, Object, ObjectId};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::compress::{CompressionResult, PayloadKind};
use crate::engine::Engine;
use crate::error::{AssemblyError, RenderError, ReorderConsistencyError};
use crate::page::{OriginKind, Page, Profile, Rotation, SourceFormat};
use crate::page_tree::{first_page, inherited_attribute, INHERITABLE};
use crate::pdf_image::{image_page_document, image_xobject};
use crate::report::{PageOutcome, PageStatus, PartialFailureReport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum AssemblyMode {
    /// Kept pages, each under its own profile
    #[default]
    Merge,
    /// Same as `Merge`: the keep flags select the subset to extract
    Split,
    /// Every page, keep flags ignored, no compression; only rotation and
    /// order change
    RotateOnly,
}

impl FromStr for AssemblyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(AssemblyMode::Merge),
            "split" => Ok(AssemblyMode::Split),
            "rotate" | "rotate-only" | "rotateonly" => Ok(AssemblyMode::RotateOnly),
            other => Err(format!("Unknown mode: {}", other)),
        }
    }
}

impl fmt::Display for AssemblyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssemblyMode::Merge => "merge",
            AssemblyMode::Split => "split",
            AssemblyMode::RotateOnly => "rotate-only",
        };
        f.write_str(name)
    }
}

/// Output document plus what happened to every selected page
#[derive(Debug, Clone)]
pub struct Assembly {
    pub bytes: Vec<u8>,
    /// One entry per selected page, in output order
    pub pages: Vec<PageOutcome>,
    pub report: PartialFailureReport,
}

/// Positions of the selected pages must be pairwise distinct
pub fn check_positions(pages: &[&Page]) -> Result<(), ReorderConsistencyError> {
    let mut by_position: BTreeMap<u32, Vec<_>> = BTreeMap::new();
    for page in pages {
        by_position.entry(page.position).or_default().push(page.id());
    }

    match by_position.into_iter().find(|(_, ids)| ids.len() > 1) {
        Some((position, mut ids)) => {
            ids.sort();
            Err(ReorderConsistencyError::DuplicatePosition {
                position,
                pages: ids,
            })
        }
        None => Ok(()),
    }
}

/// A page ready to be imported into the output
struct Emitted {
    doc: Document,
    /// Original size and whether it was an image file, for the size bound
    original_size: usize,
    is_image: bool,
    untransformed: bool,
}

/// Assemble the selected pages of `pages` into one PDF
#[instrument(skip_all, fields(pages = pages.len(), %mode))]
pub fn assemble(
    engine: &Engine,
    pages: &[Page],
    mode: AssemblyMode,
    cancel: &CancelToken,
) -> Result<Assembly, AssemblyError> {
    let mut selected: Vec<&Page> = match mode {
        AssemblyMode::Merge | AssemblyMode::Split => pages.iter().filter(|p| p.keep).collect(),
        AssemblyMode::RotateOnly => pages.iter().collect(),
    };
    if selected.is_empty() {
        return Err(AssemblyError::NothingSelected);
    }

    check_positions(&selected)?;
    selected.sort_by_key(|p| p.position);

    let jobs: Vec<(&Page, Profile)> = selected
        .iter()
        .map(|&page| match mode {
            AssemblyMode::RotateOnly => (page, Profile::None),
            AssemblyMode::Merge | AssemblyMode::Split => (page, page.profile),
        })
        .collect();
    let results = engine.decide_all(&jobs, cancel);
    if cancel.is_cancelled() {
        return Err(AssemblyError::Cancelled);
    }

    let mut outcomes = Vec::with_capacity(selected.len());
    let mut emitted = Vec::with_capacity(selected.len());

    for ((page, profile), result) in jobs.iter().zip(results) {
        let decided = match result {
            Ok(result) => {
                if result.size() > page.original_size() {
                    return Err(AssemblyError::GuardRail {
                        subject: format!("page {}", page.id()),
                        actual: result.size(),
                        limit: page.original_size(),
                    });
                }
                emit_page(page, &result).map(|doc| (doc, result))
            }
            Err(RenderError::Cancelled) => return Err(AssemblyError::Cancelled),
            Err(err) => Err(err),
        };

        let outcome = |result_size, status, fallback_reason| PageOutcome {
            page: page.id(),
            source_name: page.source_name().to_string(),
            profile: *profile,
            original_size: page.original_size(),
            result_size,
            status,
            fallback_reason,
        };

        match decided {
            Ok((doc, result)) => {
                debug!(page = %page.id(), status = ?result.status(), size = result.size(), "Page emitted");
                outcomes.push(outcome(
                    result.size(),
                    result.status(),
                    result.fallback_reason.clone(),
                ));
                emitted.push(Emitted {
                    doc,
                    original_size: page.original_size(),
                    is_image: page.origin_kind() == OriginKind::Image,
                    untransformed: result.status() != PageStatus::Compressed,
                });
            }
            Err(err) => {
                warn!(page = %page.id(), source = page.source_name(), error = %err, "Excluding page");
                outcomes.push(outcome(page.original_size(), PageStatus::Excluded(err), None));
            }
        }
    }

    let report = PartialFailureReport::from(outcomes.as_slice());
    if emitted.is_empty() {
        return Err(AssemblyError::AllPagesFailed(report));
    }

    let limit = size_limit(&emitted, engine.config().remux_overhead_per_page);
    let bytes = match byte_copy(&selected, &emitted) {
        Some(original) => original.to_vec(),
        None => merge_pages(emitted.into_iter().map(|e| e.doc).collect())?,
    };

    if bytes.len() > limit {
        return Err(AssemblyError::GuardRail {
            subject: "assembled document".into(),
            actual: bytes.len(),
            limit,
        });
    }

    info!(
        pages = outcomes.len() - report.excluded.len(),
        excluded = report.excluded.len(),
        size = bytes.len(),
        "Assembled document"
    );

    Ok(Assembly {
        bytes,
        pages: outcomes,
        report,
    })
}

/// Upper bound for the output size
///
/// Image files need a PDF wrapper, so each carries one container
/// allowance. When nothing was transformed every page gets one.
fn size_limit(emitted: &[Emitted], overhead: usize) -> usize {
    let originals: usize = emitted.iter().map(|e| e.original_size).sum();
    let images = emitted.iter().filter(|e| e.is_image).count();
    let remux = if emitted.iter().all(|e| e.untransformed) {
        emitted.len()
    } else {
        0
    };
    originals + overhead * (images + remux)
}

/// A lone PDF page with nothing to change is passed through verbatim
fn byte_copy<'a>(selected: &[&'a Page], emitted: &[Emitted]) -> Option<&'a [u8]> {
    match (selected, emitted) {
        ([page], [only])
            if only.untransformed
                && page.format() == SourceFormat::Pdf
                && page.rotation == Rotation::None =>
        {
            Some((*page).original_bytes())
        }
        _ => None,
    }
}

/// Turn a decision into a single-page document with the right rotation
fn emit_page(page: &Page, result: &CompressionResult) -> Result<Document, RenderError> {
    let mut doc = match result.payload {
        PayloadKind::Pdf => Document::load_mem(&result.bytes)
            .map_err(|e| RenderError::Decode(format!("page slice: {}", e)))?,
        PayloadKind::Jpeg | PayloadKind::Png => {
            let format = match result.payload {
                PayloadKind::Png => SourceFormat::Png,
                _ => SourceFormat::Jpeg,
            };
            let geometry = page
                .geometry()
                .ok_or_else(|| RenderError::Decode("image size unknown".into()))?;
            let (width_pt, height_pt) = if result.rotation_applied {
                geometry.rotated_size(page.rotation)
            } else {
                (geometry.width_pt, geometry.height_pt)
            };
            image_page_document(image_xobject(&result.bytes, format)?, width_pt, height_pt)?
        }
    };

    if !result.rotation_applied && page.effective_rotation() != Rotation::None {
        let page_id =
            first_page(&doc).ok_or_else(|| RenderError::Decode("slice has no page".into()))?;
        if let Some(Object::Dictionary(dict)) = doc.objects.get_mut(&page_id) {
            dict.set("Rotate", Object::Integer(page.effective_rotation().degrees()));
        }
    }

    Ok(doc)
}

/// Copy attributes a page inherits from its tree onto the page itself
fn materialize_inherited(doc: &mut Document, page_id: ObjectId) {
    let inherited: Vec<(&[u8], Object)> = INHERITABLE
        .iter()
        .filter_map(|key| inherited_attribute(doc, page_id, key).map(|v| (*key, v.clone())))
        .collect();

    if let Some(Object::Dictionary(dict)) = doc.objects.get_mut(&page_id) {
        for (key, value) in inherited {
            if !dict.has(key) {
                dict.set(key, value);
            }
        }
    }
}

/// Shift every reference by `offset`
fn remap_object_refs(obj: &mut Object, offset: u32) {
    match obj {
        Object::Reference(id) => id.0 += offset,
        Object::Array(items) => {
            for item in items.iter_mut() {
                remap_object_refs(item, offset);
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                remap_object_refs(value, offset);
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter_mut() {
                remap_object_refs(value, offset);
            }
        }
        _ => {}
    }
}

/// Concatenate single-page documents into a fresh PDF
///
/// Each document's objects are imported with ids shifted past everything
/// already in the destination; its page is re-parented under one new page
/// tree and orphans are pruned before saving.
fn merge_pages(docs: Vec<Document>) -> Result<Vec<u8>, AssemblyError> {
    let mut dest = Document::with_version("1.7");
    let pages_id = dest.new_object_id();
    let mut kids = Vec::with_capacity(docs.len());

    for mut source in docs {
        let page_id = first_page(&source)
            .ok_or_else(|| AssemblyError::Pdf("emitted document has no page".into()))?;
        materialize_inherited(&mut source, page_id);

        let offset = dest.max_id;
        let source_max = source
            .objects
            .keys()
            .map(|id| id.0)
            .max()
            .unwrap_or(0)
            .max(source.max_id);
        for (old_id, mut object) in mem::take(&mut source.objects) {
            remap_object_refs(&mut object, offset);
            dest.objects.insert((old_id.0 + offset, old_id.1), object);
        }

        let new_page_id = (page_id.0 + offset, page_id.1);
        match dest.objects.get_mut(&new_page_id) {
            Some(Object::Dictionary(page)) => page.set("Parent", Object::Reference(pages_id)),
            _ => return Err(AssemblyError::Pdf("page object is not a dictionary".into())),
        }
        kids.push(Object::Reference(new_page_id));
        dest.max_id = dest.max_id.max(source_max + offset);
    }

    let count = kids.len() as i64;
    dest.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = dest.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    dest.trailer.set("Root", catalog_id);

    dest.prune_objects();
    dest.compress();

    let mut buffer = Vec::new();
    dest.save_to(&mut buffer)
        .map_err(|e| AssemblyError::Pdf(format!("Failed to save assembled PDF: {}", e)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ingest::ingest;
    use lopdf::content::{Content, Operation};
    use lopdf::{Dictionary, Stream};
    use pretty_assertions::assert_eq;

    fn create_test_pdf(num_pages: u32, prefix: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();

        for page_num in 0..num_pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new(
                        "Tj",
                        vec![Object::string_literal(format!("{}-Page-{}", prefix, page_num + 1))],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
            kids.push(Object::Reference(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            })));
        }

        // MediaBox only on the tree root, so pages inherit it
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => num_pages as i64,
                "Kids" => kids,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    fn page_texts(bytes: &[u8]) -> Vec<String> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|id| String::from_utf8_lossy(&doc.get_page_content(*id).unwrap()).into_owned())
            .collect()
    }

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_output_follows_positions() {
        let mut pages = ingest("doc.pdf", &create_test_pdf(3, "Doc"), "pdf").unwrap();
        pages[0].position = 2;
        pages[1].position = 0;
        pages[2].position = 1;

        let assembly = assemble(&engine(), &pages, AssemblyMode::Merge, &CancelToken::new()).unwrap();
        let texts = page_texts(&assembly.bytes);

        assert_eq!(texts.len(), 3);
        assert!(texts[0].contains("Doc-Page-2"));
        assert!(texts[1].contains("Doc-Page-3"));
        assert!(texts[2].contains("Doc-Page-1"));
        assert!(assembly.report.is_empty());
    }

    #[test]
    fn test_duplicate_positions_fail_fast() {
        let mut pages = ingest("doc.pdf", &create_test_pdf(2, "Dup"), "pdf").unwrap();
        pages[1].position = 0;

        let result = assemble(&engine(), &pages, AssemblyMode::Merge, &CancelToken::new());
        assert!(matches!(
            result,
            Err(AssemblyError::Reorder(ReorderConsistencyError::DuplicatePosition {
                position: 0,
                ..
            }))
        ));
    }

    #[test]
    fn test_dropped_pages_may_share_positions() {
        let mut pages = ingest("doc.pdf", &create_test_pdf(3, "Drop"), "pdf").unwrap();
        pages[1].keep = false;
        pages[1].position = pages[2].position;

        let assembly = assemble(&engine(), &pages, AssemblyMode::Split, &CancelToken::new()).unwrap();
        assert_eq!(page_texts(&assembly.bytes).len(), 2);
    }

    #[test]
    fn test_rotate_only_ignores_keep_and_sets_rotate() {
        let mut pages = ingest("doc.pdf", &create_test_pdf(2, "Rot"), "pdf").unwrap();
        pages[0].keep = false;
        pages[1].rotation = Rotation::Cw90;
        pages[1].profile = Profile::Maximum;

        let assembly =
            assemble(&engine(), &pages, AssemblyMode::RotateOnly, &CancelToken::new()).unwrap();
        let doc = Document::load_mem(&assembly.bytes).unwrap();
        let page_ids: Vec<_> = doc.get_pages().into_values().collect();
        assert_eq!(page_ids.len(), 2);

        let second = doc.objects.get(&page_ids[1]).unwrap().as_dict().unwrap();
        assert_eq!(second.get(b"Rotate").unwrap().as_i64().unwrap(), 90);
        // Inherited MediaBox survives the move to a new page tree
        assert!(second.has(b"MediaBox"));
        assert!(assembly
            .pages
            .iter()
            .all(|o| o.status == PageStatus::Unchanged && o.profile == Profile::None));
    }

    #[test]
    fn test_single_untouched_page_is_byte_copy() {
        let pdf = create_test_pdf(1, "Solo");
        let pages = ingest("solo.pdf", &pdf, "pdf").unwrap();
        let assembly = assemble(&engine(), &pages, AssemblyMode::Merge, &CancelToken::new()).unwrap();
        assert_eq!(assembly.bytes, pdf);
    }

    #[test]
    fn test_nothing_selected() {
        let mut pages = ingest("doc.pdf", &create_test_pdf(1, "None"), "pdf").unwrap();
        pages[0].keep = false;
        let result = assemble(&engine(), &pages, AssemblyMode::Merge, &CancelToken::new());
        assert!(matches!(result, Err(AssemblyError::NothingSelected)));
    }

    #[test]
    fn test_all_pages_failing_is_an_error() {
        let pages = ingest("bad.jpg", b"\xFF\xD8\xFF\xE0garbage", "jpg").unwrap();
        let result = assemble(&engine(), &pages, AssemblyMode::Merge, &CancelToken::new());
        match result {
            Err(AssemblyError::AllPagesFailed(report)) => {
                assert!(report.contains(pages[0].id()));
            }
            other => panic!("expected AllPagesFailed, got {:?}", other.map(|a| a.pages)),
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let pages = ingest("doc.pdf", &create_test_pdf(2, "C"), "pdf").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = assemble(&engine(), &pages, AssemblyMode::Merge, &cancel);
        assert!(matches!(result, Err(AssemblyError::Cancelled)));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("merge".parse::<AssemblyMode>().unwrap(), AssemblyMode::Merge);
        assert_eq!(
            "rotate-only".parse::<AssemblyMode>().unwrap(),
            AssemblyMode::RotateOnly
        );
        assert!("shuffle".parse::<AssemblyMode>().is_err());
    }
}
