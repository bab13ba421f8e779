//! Ingestion
//!
//! Turns `(source name, bytes, declared kind)` into pages. A PDF yields one
//! page per document page, each sliced into its own single-page document;
//! an image yields exactly one page.

use std::io::Cursor;
use std::sync::Arc;

use lopdf::Document;
use tracing::{debug, info};

use crate::classify::classify_page;
use crate::error::IngestError;
use crate::page::{ContentKind, Page, PageGeometry, PageId, SourceFormat, SourceId};
use crate::page_tree::page_geometry;

/// One file handed to the core by the upload collaborator
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub name: String,
    pub bytes: Vec<u8>,
    pub declared_kind: String,
}

impl SourceInput {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, declared_kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes,
            declared_kind: declared_kind.into(),
        }
    }
}

/// Ingest one file; positions are numbered from 0 in page order
pub fn ingest(name: &str, bytes: &[u8], declared_kind: &str) -> Result<Vec<Page>, IngestError> {
    let format = SourceFormat::from_declared(declared_kind).ok_or_else(|| {
        IngestError::UnsupportedFormat {
            name: name.to_string(),
            kind: declared_kind.to_string(),
        }
    })?;
    let source = SourceId::derive(name, bytes);
    let source_name: Arc<str> = Arc::from(name);

    let pages = match format {
        SourceFormat::Pdf => ingest_pdf(source, &source_name, bytes)?,
        SourceFormat::Jpeg | SourceFormat::Png => {
            vec![ingest_image(source, source_name.clone(), format, bytes)]
        }
    };

    info!(source = %name, pages = pages.len(), "Ingested source");
    Ok(pages)
}

/// Ingest several files; a bad file fails alone
pub fn ingest_batch(inputs: &[SourceInput]) -> Vec<Result<Vec<Page>, IngestError>> {
    inputs
        .iter()
        .map(|input| ingest(&input.name, &input.bytes, &input.declared_kind))
        .collect()
}

fn ingest_image(source: SourceId, source_name: Arc<str>, format: SourceFormat, bytes: &[u8]) -> Page {
    // An unreadable header is a page-level problem, surfaced at render time
    let geometry = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok())
        .map(|(w, h)| PageGeometry::from_pixels(w, h));

    if geometry.is_none() {
        debug!(source = %source_name, "Image header unreadable");
    }

    Page::new(
        PageId { source, index: 0 },
        source_name,
        format,
        ContentKind::ImageOnly,
        geometry,
        Arc::from(bytes),
        0,
    )
}

fn ingest_pdf(source: SourceId, source_name: &Arc<str>, bytes: &[u8]) -> Result<Vec<Page>, IngestError> {
    let doc = Document::load_mem(bytes).map_err(|e| IngestError::Parse {
        name: source_name.to_string(),
        reason: e.to_string(),
    })?;

    if doc.is_encrypted() {
        return Err(IngestError::Encrypted(source_name.to_string()));
    }

    let page_ids: Vec<_> = doc.get_pages().into_values().collect();
    if page_ids.is_empty() {
        return Err(IngestError::EmptyDocument(source_name.to_string()));
    }
    let page_count = page_ids.len() as u32;

    let mut pages = Vec::with_capacity(page_ids.len());
    for (index, page_id) in page_ids.into_iter().enumerate() {
        let content_kind = classify_page(&doc, page_id);
        let geometry = page_geometry(&doc, page_id);

        let original: Arc<[u8]> = if page_count == 1 {
            Arc::from(bytes)
        } else {
            Arc::from(slice_page(&doc, index as u32 + 1, page_count).map_err(|reason| {
                IngestError::Parse {
                    name: source_name.to_string(),
                    reason,
                }
            })?)
        };

        debug!(
            source = %source_name,
            page = index,
            ?content_kind,
            size = original.len(),
            "Sliced page"
        );

        pages.push(Page::new(
            PageId {
                source,
                index: index as u32,
            },
            source_name.clone(),
            SourceFormat::Pdf,
            content_kind,
            Some(geometry),
            original,
            index as u32,
        ));
    }

    Ok(pages)
}

/// Single-page document holding page `keep` (1-indexed)
///
/// Streams keep their source encoding; only unreachable objects are
/// dropped.
fn slice_page(doc: &Document, keep: u32, page_count: u32) -> Result<Vec<u8>, String> {
    let mut slice = doc.clone();

    for page_num in (1..=page_count).rev().filter(|p| *p != keep) {
        slice.delete_pages(&[page_num]);
    }
    slice.prune_objects();

    let mut buffer = Vec::new();
    slice
        .save_to(&mut buffer)
        .map_err(|e| format!("Failed to save page {}: {}", keep, e))?;
    Ok(buffer)
}
