//! Compression decision engine
//!
//! For one page and one profile, produce the bytes to emit. A candidate is
//! only ever taken when it is strictly smaller than the page's original
//! bytes; everything else falls back to the original.

use std::sync::Arc;

use lopdf::Document;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::{EngineConfig, ProfileSettings};
use crate::error::RenderError;
use crate::page::{ContentKind, OriginKind, Page, PageId, Profile, SourceFormat};
use crate::pdf_image::{encode_jpeg, jpeg_xobject, single_image_page};
use crate::raster::{Rasterizer, Resolution};
use crate::report::PageStatus;

/// Representation of `CompressionResult::bytes`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PayloadKind {
    /// Single-page PDF
    Pdf,
    Jpeg,
    Png,
}

impl PayloadKind {
    fn native(page: &Page) -> Self {
        match page.format() {
            SourceFormat::Pdf => PayloadKind::Pdf,
            SourceFormat::Jpeg => PayloadKind::Jpeg,
            SourceFormat::Png => PayloadKind::Png,
        }
    }
}

/// Outcome of `decide` for one (page, profile) pair
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    pub page: PageId,
    pub profile: Profile,
    pub bytes: Arc<[u8]>,
    pub payload: PayloadKind,
    /// A candidate was produced or attempted but the original was kept
    pub used_fallback: bool,
    /// The page's effective rotation is already baked into the pixels
    pub rotation_applied: bool,
    /// Render failure that made the page fall back to its original
    pub fallback_reason: Option<RenderError>,
}

impl CompressionResult {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Upper bound on what this result adds to an assembled document
    ///
    /// Image payloads get a page of their own, which costs up to `overhead`
    /// bytes on top of the payload.
    pub fn emitted_size(&self, overhead: usize) -> usize {
        match self.payload {
            PayloadKind::Pdf => self.size(),
            PayloadKind::Jpeg | PayloadKind::Png => self.size() + overhead,
        }
    }

    pub fn status(&self) -> PageStatus {
        if self.rotation_applied {
            PageStatus::Compressed
        } else if self.used_fallback {
            PageStatus::FellBack
        } else {
            PageStatus::Unchanged
        }
    }

    fn original(page: &Page, profile: Profile, used_fallback: bool) -> Self {
        Self {
            page: page.id(),
            profile,
            bytes: page.original_shared(),
            payload: PayloadKind::native(page),
            used_fallback,
            rotation_applied: false,
            fallback_reason: None,
        }
    }
}

/// Whether `profile` produces a candidate for `page` at all
///
/// Minimal never rasterizes text or vector pages.
pub fn transforms(page: &Page, profile: Profile) -> bool {
    match profile {
        Profile::None => false,
        Profile::Minimal => {
            page.origin_kind() == OriginKind::Image || page.content_kind() == ContentKind::ImageOnly
        }
        Profile::Medium | Profile::Maximum => true,
    }
}

/// Pick the bytes to emit for `page` under `profile`
///
/// Never returns more bytes than the original. A failed render falls back
/// to the original unless the original itself is unreadable, which is a
/// page-level hard failure. Cancellation is passed through.
pub fn decide(
    page: &Page,
    profile: Profile,
    config: &EngineConfig,
    rasterizer: &dyn Rasterizer,
    cancel: &CancelToken,
) -> Result<CompressionResult, RenderError> {
    let settings = match config.profiles.get(profile) {
        Some(settings) if transforms(page, profile) => settings,
        _ => return Ok(CompressionResult::original(page, profile, false)),
    };

    match candidate(page, settings, config, rasterizer, cancel) {
        Ok((bytes, payload)) if bytes.len() < page.original_size() => {
            debug!(
                page = %page.id(),
                %profile,
                original = page.original_size(),
                candidate = bytes.len(),
                "Candidate accepted"
            );
            Ok(CompressionResult {
                page: page.id(),
                profile,
                bytes: Arc::from(bytes),
                payload,
                used_fallback: false,
                rotation_applied: true,
                fallback_reason: None,
            })
        }
        Ok((bytes, _)) => {
            debug!(
                page = %page.id(),
                %profile,
                original = page.original_size(),
                candidate = bytes.len(),
                "Candidate not smaller, keeping original"
            );
            Ok(CompressionResult::original(page, profile, true))
        }
        Err(RenderError::Cancelled) => Err(RenderError::Cancelled),
        Err(err) => {
            ensure_readable(page)?;
            warn!(page = %page.id(), %profile, error = %err, "Render failed, keeping original");
            Ok(CompressionResult {
                fallback_reason: Some(err),
                ..CompressionResult::original(page, profile, true)
            })
        }
    }
}

/// Rasterize with the page rotation baked in and JPEG-encode
fn candidate(
    page: &Page,
    settings: &ProfileSettings,
    config: &EngineConfig,
    rasterizer: &dyn Rasterizer,
    cancel: &CancelToken,
) -> Result<(Vec<u8>, PayloadKind), RenderError> {
    let geometry = page
        .geometry()
        .ok_or_else(|| RenderError::Decode("page size unknown".into()))?;

    match page.origin_kind() {
        OriginKind::PdfPage => {
            let resolution = Resolution::Dpi(config.effective_dpi(settings));
            let bitmap = rasterizer.render(page, page.rotation, resolution, cancel)?;
            cancel.check()?;
            let jpeg = encode_jpeg(&bitmap.image, settings.jpeg_quality)?;
            let (width_pt, height_pt) = geometry.rotated_size(page.rotation);
            let pdf = single_image_page(jpeg_xobject(&jpeg)?, width_pt, height_pt)?;
            Ok((pdf, PayloadKind::Pdf))
        }
        OriginKind::Image => {
            let long_side_pt = geometry.width_pt.max(geometry.height_pt);
            let resolution = Resolution::MaxSide(config.effective_max_side(settings, long_side_pt));
            let bitmap = rasterizer.render(page, page.rotation, resolution, cancel)?;
            cancel.check()?;
            let jpeg = encode_jpeg(&bitmap.image, settings.jpeg_quality)?;
            Ok((jpeg, PayloadKind::Jpeg))
        }
    }
}

/// Confirm the original bytes can still be read
fn ensure_readable(page: &Page) -> Result<(), RenderError> {
    match page.origin_kind() {
        OriginKind::Image => image::load_from_memory(page.original_bytes())
            .map(|_| ())
            .map_err(|e| RenderError::Decode(format!("original image unreadable: {}", e))),
        OriginKind::PdfPage => Document::load_mem(page.original_bytes())
            .map(|_| ())
            .map_err(|e| RenderError::Decode(format!("original page unreadable: {}", e))),
    }
}
