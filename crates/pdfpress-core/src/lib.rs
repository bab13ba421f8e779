//! Page-level PDF compression and assembly
//!
//! Takes PDF and image files, breaks them into pages, and reassembles the
//! kept pages into one PDF. Each page can be rotated, dropped, reordered and
//! compressed under its own profile; a page is only replaced by a
//! re-encoded version when that version is strictly smaller.
//!
//! Entry points:
//! - [`Session`]: the page collection of one user session
//! - [`ingest`] / [`estimate`] / [`assemble`]: the same operations on plain
//!   page slices, for callers that keep their own state
//! - [`Engine`]: configuration, rasterizer and worker pool shared by both

pub mod assemble;
pub mod cancel;
pub(crate) mod classify;
pub mod compress;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimate;
pub mod ingest;
pub mod page;
pub(crate) mod page_tree;
pub(crate) mod pdf_image;
pub mod preview;
pub mod raster;
pub mod report;
pub mod session;

pub use assemble::{assemble, check_positions, Assembly, AssemblyMode};
pub use cancel::CancelToken;
pub use compress::{decide, CompressionResult, PayloadKind};
pub use config::{EngineConfig, PreviewConfig, ProfileSettings, ProfileTable};
pub use engine::Engine;
pub use error::{
    AssemblyError, ConfigError, IngestError, RenderError, ReorderConsistencyError, SessionError,
};
pub use estimate::{
    estimate, format_size, EstimateStrategy, ProfilePlan, SizeEstimate,
};
pub use ingest::{ingest, ingest_batch, SourceInput};
pub use page::{
    ContentKind, OriginKind, Page, PageGeometry, PageId, Profile, Rotation, SourceFormat, SourceId,
};
pub use preview::{EntryState, Preview, PreviewCache};
pub use raster::{Bitmap, BuiltinRasterizer, Rasterizer, Resolution, Tier};
pub use report::{ExcludedPage, PageOutcome, PageStatus, PartialFailureReport};
pub use session::{Session, SortKey};

#[cfg(feature = "pdfium")]
pub use raster::PdfiumRasterizer;

/// Parse page range string like "1-3, 5, 8-10" into sorted unique page numbers
///
/// Every page must lie within `1..=page_count`.
pub fn parse_ranges(input: &str, page_count: u32) -> Result<Vec<u32>, SessionError> {
    use std::collections::BTreeSet;

    let mut pages = BTreeSet::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start
                .trim()
                .parse()
                .map_err(|_| SessionError::InvalidRange(format!("Invalid start: {}", start)))?;
            let end: u32 = end
                .trim()
                .parse()
                .map_err(|_| SessionError::InvalidRange(format!("Invalid end: {}", end)))?;

            if start > end {
                return Err(SessionError::InvalidRange(format!(
                    "Start {} > end {}",
                    start, end
                )));
            }
            if start == 0 {
                return Err(SessionError::InvalidRange("Pages are numbered from 1".into()));
            }
            check_page_count(end, page_count)?;

            pages.extend(start..=end);
        } else {
            let page: u32 = part
                .parse()
                .map_err(|_| SessionError::InvalidRange(format!("Invalid page: {}", part)))?;
            if page == 0 {
                return Err(SessionError::InvalidRange("Pages are numbered from 1".into()));
            }
            check_page_count(page, page_count)?;
            pages.insert(page);
        }
    }

    Ok(pages.into_iter().collect())
}

fn check_page_count(page: u32, page_count: u32) -> Result<(), SessionError> {
    if page > page_count {
        return Err(SessionError::InvalidRange(format!(
            "Page {} is past the last page ({})",
            page, page_count
        )));
    }
    Ok(())
}
