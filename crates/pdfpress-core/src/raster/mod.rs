//! Page rasterization
//!
//! `Rasterizer` is the seam between the engine and whatever turns a page
//! into pixels. Rotation is applied before scaling, so every size
//! computation works on the page as it will be displayed.

#[cfg(feature = "pdfium")]
mod pdfium;

#[cfg(feature = "pdfium")]
pub use pdfium::PdfiumRasterizer;

use image::imageops::{self, FilterType};
use image::RgbImage;
use lopdf::Document;

use crate::cancel::CancelToken;
use crate::classify::{full_page_image, Placement};
use crate::config::PreviewConfig;
use crate::error::RenderError;
use crate::page::{ContentKind, OriginKind, Page, Rotation};
use crate::page_tree::first_page;
use crate::pdf_image::{decode_image_xobject, flatten_onto_white};

/// Requested output resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Fit inside a fixed pixel box regardless of page size
    Preview { max_width: u32, max_height: u32 },
    /// Dots per inch of physical page size; never upsamples
    Dpi(u32),
    /// Longest side in pixels; never upsamples
    MaxSide(u32),
}

impl Resolution {
    pub fn tier(self) -> Tier {
        match self {
            Resolution::Preview { .. } => Tier::Preview,
            Resolution::Dpi(_) | Resolution::MaxSide(_) => Tier::High,
        }
    }
}

impl From<PreviewConfig> for Resolution {
    fn from(config: PreviewConfig) -> Self {
        Resolution::Preview {
            max_width: config.max_width,
            max_height: config.max_height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Tier {
    Preview,
    High,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub image: RgbImage,
    pub tier: Tier,
}

impl Bitmap {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Renders a page to an RGB bitmap
///
/// Implementations must be pure in (page content, rotation, resolution):
/// equal inputs give pixel-identical output. `rotation` is the caller's
/// rotation on top of the page's own base rotation.
pub trait Rasterizer: Send + Sync {
    fn render(
        &self,
        page: &Page,
        rotation: Rotation,
        resolution: Resolution,
        cancel: &CancelToken,
    ) -> Result<Bitmap, RenderError>;
}

/// Rotate clockwise by quarter turns
pub(crate) fn orient(image: RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::None => image,
        Rotation::Cw90 => imageops::rotate90(&image),
        Rotation::Cw180 => imageops::rotate180(&image),
        Rotation::Cw270 => imageops::rotate270(&image),
    }
}

/// Turn decoded image pixels the way the page paints them
fn place(image: RgbImage, placement: Placement) -> RgbImage {
    let turned = orient(image, placement.rotation);
    if placement.mirrored {
        imageops::flip_horizontal(&turned)
    } else {
        turned
    }
}

fn scaled(value: u32, scale: f64) -> u32 {
    ((value as f64 * scale).round() as u32).max(1)
}

/// Target pixel size for an already-rotated image
///
/// `display_pt` is the rotated physical size in points, when known.
pub(crate) fn target_size(
    pixels: (u32, u32),
    display_pt: Option<(f64, f64)>,
    resolution: Resolution,
) -> (u32, u32) {
    let (w, h) = pixels;
    if w == 0 || h == 0 {
        return pixels;
    }

    match resolution {
        Resolution::Preview {
            max_width,
            max_height,
        } => {
            let (dw, dh) = display_pt.unwrap_or((w as f64, h as f64));
            let scale = (max_width as f64 / dw).min(max_height as f64 / dh);
            (
                ((dw * scale).round() as u32).clamp(1, max_width),
                ((dh * scale).round() as u32).clamp(1, max_height),
            )
        }
        Resolution::Dpi(dpi) => match display_pt {
            Some((dw, _)) => {
                let wanted = dw / 72.0 * dpi as f64;
                let scale = wanted / w as f64;
                if scale >= 1.0 {
                    pixels
                } else {
                    (scaled(w, scale), scaled(h, scale))
                }
            }
            None => pixels,
        },
        Resolution::MaxSide(max_side) => {
            let long = w.max(h);
            if long <= max_side {
                pixels
            } else {
                let scale = max_side as f64 / long as f64;
                (scaled(w, scale), scaled(h, scale))
            }
        }
    }
}

/// Rotate pixels by `orientation`, then scale to the requested resolution
///
/// `display_pt` is the physical page size as displayed, when known.
pub(crate) fn finish(
    image: RgbImage,
    orientation: Rotation,
    display_pt: Option<(f64, f64)>,
    resolution: Resolution,
    cancel: &CancelToken,
) -> Result<Bitmap, RenderError> {
    let oriented = orient(image, orientation);
    cancel.check()?;

    let (tw, th) = target_size(oriented.dimensions(), display_pt, resolution);
    let image = if (tw, th) == oriented.dimensions() {
        oriented
    } else {
        imageops::resize(&oriented, tw, th, FilterType::Lanczos3)
    };

    Ok(Bitmap {
        image,
        tier: resolution.tier(),
    })
}

/// Decodes standalone images and image-only PDF pages directly
///
/// Pages with text or vector content need a full PDF renderer and are
/// reported as `RenderError::Unsupported`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinRasterizer;

impl BuiltinRasterizer {
    pub(crate) fn decode(&self, page: &Page) -> Result<RgbImage, RenderError> {
        match page.origin_kind() {
            OriginKind::Image => {
                let decoded = image::load_from_memory(page.original_bytes())
                    .map_err(|e| RenderError::Decode(format!("{}: {}", page.source_name(), e)))?;
                Ok(flatten_onto_white(&decoded))
            }
            OriginKind::PdfPage => {
                if page.content_kind() == ContentKind::Mixed {
                    return Err(RenderError::Unsupported(
                        "page has text or vector content".into(),
                    ));
                }
                let doc = Document::load_mem(page.original_bytes())
                    .map_err(|e| RenderError::Decode(e.to_string()))?;
                let page_id =
                    first_page(&doc).ok_or_else(|| RenderError::Decode("slice has no page".into()))?;
                let (stream, placement) = full_page_image(&doc, page_id)?;
                let decoded = decode_image_xobject(&doc, stream)?;
                Ok(place(flatten_onto_white(&decoded), placement))
            }
        }
    }
}

impl Rasterizer for BuiltinRasterizer {
    fn render(
        &self,
        page: &Page,
        rotation: Rotation,
        resolution: Resolution,
        cancel: &CancelToken,
    ) -> Result<Bitmap, RenderError> {
        cancel.check()?;
        let image = self.decode(page)?;
        cancel.check()?;

        let base = page.geometry().map(|g| g.base_rotation).unwrap_or_default();
        let display_pt = page.geometry().map(|g| g.rotated_size(rotation));
        finish(image, base.compose(rotation), display_pt, resolution, cancel)
    }
}

const PLACEHOLDER_SIZE: (u32, u32) = (180, 240);
const PLACEHOLDER_FILL: [u8; 3] = [230, 230, 230];

/// Light-gray stand-in shown when a page cannot be rendered
pub fn placeholder(config: &PreviewConfig) -> Bitmap {
    let (w, h) = target_size(PLACEHOLDER_SIZE, None, Resolution::from(*config));
    Bitmap {
        image: RgbImage::from_pixel(w, h, image::Rgb(PLACEHOLDER_FILL)),
        tier: Tier::Preview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{PageGeometry, PageId, SourceFormat, SourceId};
    use crate::pdf_image::encode_jpeg;
    use std::sync::Arc;

    fn image_page(width: u32, height: u32) -> Page {
        let pixels = RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 0]));
        let jpeg = encode_jpeg(&pixels, 90).unwrap();
        let id = PageId {
            source: SourceId::derive("scan.jpg", &jpeg),
            index: 0,
        };
        Page::new(
            id,
            Arc::from("scan.jpg"),
            SourceFormat::Jpeg,
            ContentKind::ImageOnly,
            Some(PageGeometry::from_pixels(width, height)),
            Arc::from(jpeg),
            0,
        )
    }

    /// One-page PDF painting a 2x1 image (black, then white) through `matrix`
    /// on a 100x200pt page
    fn scan_fixture(matrix: [i64; 6]) -> Page {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 1,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            vec![0, 0, 0, 255, 255, 255],
        ));
        let content = Content {
            operations: vec![
                Operation::new("cm", matrix.iter().map(|&v| v.into()).collect()),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            lopdf::Dictionary::new(),
            content.encode().unwrap(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 100.into(), 200.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        crate::ingest::ingest("turned.pdf", &bytes, "pdf").unwrap().remove(0)
    }

    const BLACK: image::Rgb<u8> = image::Rgb([0, 0, 0]);
    const WHITE: image::Rgb<u8> = image::Rgb([255, 255, 255]);

    #[test]
    fn test_turned_scan_decodes_upright() {
        // Image x axis points up the page: black pixel at the bottom
        let page = scan_fixture([0, 200, -100, 0, 100, 0]);
        assert_eq!(page.content_kind(), ContentKind::ImageOnly);
        let pixels = BuiltinRasterizer.decode(&page).unwrap();
        assert_eq!(pixels.dimensions(), (1, 2));
        assert_eq!(pixels.get_pixel(0, 0), &WHITE);
        assert_eq!(pixels.get_pixel(0, 1), &BLACK);

        let bitmap = BuiltinRasterizer
            .render(&page, Rotation::None, Resolution::MaxSide(400), &CancelToken::new())
            .unwrap();
        assert!(bitmap.width() < bitmap.height());
    }

    #[test]
    fn test_mirrored_scan_decodes_unmirrored() {
        let page = scan_fixture([-100, 0, 0, 200, 100, 0]);
        let pixels = BuiltinRasterizer.decode(&page).unwrap();
        assert_eq!(pixels.dimensions(), (2, 1));
        assert_eq!(pixels.get_pixel(0, 0), &WHITE);
        assert_eq!(pixels.get_pixel(1, 0), &BLACK);
    }

    #[test]
    fn test_preview_fits_box() {
        assert_eq!(
            target_size(
                (1000, 2000),
                None,
                Resolution::Preview {
                    max_width: 220,
                    max_height: 300
                }
            ),
            (150, 300)
        );
    }

    #[test]
    fn test_max_side_never_upscales() {
        assert_eq!(target_size((100, 50), None, Resolution::MaxSide(400)), (100, 50));
        assert_eq!(target_size((800, 400), None, Resolution::MaxSide(400)), (400, 200));
    }

    #[test]
    fn test_dpi_uses_physical_size() {
        // 612pt wide at 72 dpi is 612px
        assert_eq!(
            target_size((1224, 1584), Some((612.0, 792.0)), Resolution::Dpi(72)),
            (612, 792)
        );
        assert_eq!(
            target_size((300, 400), Some((612.0, 792.0)), Resolution::Dpi(300)),
            (300, 400)
        );
    }

    #[test]
    fn test_rotation_applied_before_scaling() {
        let page = image_page(200, 100);
        let bitmap = BuiltinRasterizer
            .render(
                &page,
                Rotation::Cw90,
                Resolution::MaxSide(100),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!((bitmap.width(), bitmap.height()), (50, 100));
        assert_eq!(bitmap.tier, Tier::High);
    }

    #[test]
    fn test_render_is_deterministic() {
        let page = image_page(64, 48);
        let cancel = CancelToken::new();
        let resolution = Resolution::Preview {
            max_width: 32,
            max_height: 32,
        };
        let a = BuiltinRasterizer
            .render(&page, Rotation::Cw180, resolution, &cancel)
            .unwrap();
        let b = BuiltinRasterizer
            .render(&page, Rotation::Cw180, resolution, &cancel)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cancelled_render() {
        let page = image_page(10, 10);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = BuiltinRasterizer.render(&page, Rotation::None, Resolution::MaxSide(5), &cancel);
        assert_eq!(result, Err(RenderError::Cancelled));
    }

    #[test]
    fn test_placeholder_fits_preview_box() {
        let bitmap = placeholder(&PreviewConfig {
            max_width: 90,
            max_height: 300,
        });
        assert_eq!((bitmap.width(), bitmap.height()), (90, 120));
    }
}
