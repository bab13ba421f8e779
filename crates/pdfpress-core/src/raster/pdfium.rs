//! Full PDF rendering through the system pdfium library

use std::sync::Mutex;

use pdfium_render::prelude::*;

use super::{finish, target_size, Bitmap, BuiltinRasterizer, Rasterizer, Resolution};
use crate::cancel::CancelToken;
use crate::error::RenderError;
use crate::page::{OriginKind, Page, Rotation};
use crate::pdf_image::flatten_onto_white;

/// Resolution used when the request is not expressed in dpi
const FALLBACK_DPI: f32 = 150.0;

/// Renders any PDF page, text and vector content included
///
/// Standalone images go through the builtin decoder. pdfium bindings are
/// not re-entrant, so renders are serialized.
#[derive(Default)]
pub struct PdfiumRasterizer {
    lock: Mutex<()>,
    images: BuiltinRasterizer,
}

impl PdfiumRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn render_pdf(&self, page: &Page, resolution: Resolution) -> Result<image::RgbImage, RenderError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| RenderError::Unsupported("pdfium lock poisoned".into()))?;

        let pdfium = Pdfium::new(
            Pdfium::bind_to_system_library()
                .map_err(|e| RenderError::Unsupported(format!("pdfium bind failed: {e}")))?,
        );
        let doc = pdfium
            .load_pdf_from_byte_slice(page.original_bytes(), None)
            .map_err(|e| RenderError::Decode(format!("pdfium open failed: {e}")))?;
        let pdf_page = doc
            .pages()
            .get(0)
            .map_err(|e| RenderError::Decode(format!("pdfium page access failed: {e}")))?;

        // pdfium applies the page's own /Rotate, so these are display sizes
        let (width, height) = pixel_size(pdf_page.width().value, pdf_page.height().value, resolution);

        let bitmap = pdf_page
            .render_with_config(
                &PdfRenderConfig::new()
                    .set_target_width(width.max(1))
                    .set_target_height(height.max(1)),
            )
            .map_err(|e| RenderError::Decode(format!("pdfium render failed: {e}")))?;

        Ok(flatten_onto_white(&bitmap.as_image()))
    }
}

/// Pixel size to ask pdfium for, given the page size in points
fn pixel_size(width_pt: f32, height_pt: f32, resolution: Resolution) -> (i32, i32) {
    let at_dpi = |dpi: f32| {
        (
            (width_pt * dpi / 72.0).ceil() as i32,
            (height_pt * dpi / 72.0).ceil() as i32,
        )
    };
    match resolution {
        Resolution::Dpi(dpi) => at_dpi(dpi as f32),
        Resolution::Preview { .. } => {
            let (w, h) = target_size(
                (width_pt.ceil() as u32, height_pt.ceil() as u32),
                Some((width_pt as f64, height_pt as f64)),
                resolution,
            );
            (w as i32, h as i32)
        }
        Resolution::MaxSide(_) => at_dpi(FALLBACK_DPI),
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn render(
        &self,
        page: &Page,
        rotation: Rotation,
        resolution: Resolution,
        cancel: &CancelToken,
    ) -> Result<Bitmap, RenderError> {
        if page.origin_kind() == OriginKind::Image {
            return self.images.render(page, rotation, resolution, cancel);
        }

        cancel.check()?;
        let image = self.render_pdf(page, resolution)?;
        cancel.check()?;

        let display_pt = page.geometry().map(|g| g.rotated_size(rotation));
        finish(image, rotation, display_pt, resolution, cancel)
    }
}
