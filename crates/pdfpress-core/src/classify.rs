//! Content classification
//!
//! Decides once, at ingestion, whether a PDF page is a single full-page
//! raster image (a scan) or anything else. Only image-only pages may be
//! recompressed under the Minimal profile.

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::error::RenderError;
use crate::page::{ContentKind, Rotation};
use crate::page_tree::{inherited_attribute, number, page_geometry, resolve, resolve_dict};

/// Fraction of the page area an image must cover to count as full-page
const FULL_PAGE_COVERAGE: f64 = 0.9;

/// Off-axis matrix terms below this fraction of the largest term count as zero
const AXIS_TOLERANCE: f64 = 1e-6;

const TEXT_OPERATORS: &[&str] = &[
    "BT", "ET", "Tj", "TJ", "'", "\"", "Tf", "Td", "TD", "Tm", "T*",
];

const PAINT_OPERATORS: &[&str] = &["S", "s", "f", "F", "f*", "B", "B*", "b", "b*", "sh"];

const INLINE_IMAGE_OPERATORS: &[&str] = &["BI", "ID", "EI"];

/// Affine transform [a b c d e f]
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f64; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    /// `self` applied first, then `ctm`
    fn then(self, ctm: Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [ca, cb, cc, cd, ce, cf] = ctm.0;
        Matrix([
            a * ca + b * cc,
            a * cb + b * cd,
            c * ca + d * cc,
            c * cb + d * cd,
            e * ca + f * cc + ce,
            e * cb + f * cd + cf,
        ])
    }

    /// Area of the unit square after transformation
    fn unit_area(self) -> f64 {
        let [a, b, c, d, _, _] = self.0;
        (a * d - b * c).abs()
    }

    /// Where the image's pixel grid lands on the page, for matrices that
    /// keep image rows and columns parallel to the page edges
    ///
    /// Image row 0 sits at the top of the unit square, so a plain scale
    /// maps it to the top of the page.
    fn placement(self) -> Option<Placement> {
        let [a, b, c, d, _, _] = self.0;
        let scale = a.abs().max(b.abs()).max(c.abs()).max(d.abs());
        let zero = |v: f64| v.abs() <= scale * AXIS_TOLERANCE;

        let (rotation, mirrored) = if zero(b) && zero(c) && !zero(a) && !zero(d) {
            match (a > 0.0, d > 0.0) {
                (true, true) => (Rotation::None, false),
                (false, true) => (Rotation::None, true),
                (true, false) => (Rotation::Cw180, true),
                (false, false) => (Rotation::Cw180, false),
            }
        } else if zero(a) && zero(d) && !zero(b) && !zero(c) {
            match (b > 0.0, c > 0.0) {
                (false, true) => (Rotation::Cw90, false),
                (true, false) => (Rotation::Cw270, false),
                (true, true) => (Rotation::Cw270, true),
                (false, false) => (Rotation::Cw90, true),
            }
        } else {
            return None;
        };
        Some(Placement { rotation, mirrored })
    }

    fn from_operands(operands: &[Object]) -> Option<Matrix> {
        if operands.len() != 6 {
            return None;
        }
        let mut m = [0.0; 6];
        for (slot, operand) in m.iter_mut().zip(operands) {
            *slot = number(operand)?;
        }
        Some(Matrix(m))
    }
}

/// Orientation of decoded image pixels relative to the page: a clockwise
/// quarter turn, then a left-right mirror when `mirrored` is set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Placement {
    pub rotation: Rotation,
    pub mirrored: bool,
}

/// An image XObject painted by a page's content stream
pub(crate) struct PaintedImage<'a> {
    pub stream: &'a Stream,
    /// Painted area relative to the page area
    pub coverage: f64,
    /// None when the image is skewed or turned off the page axes
    pub placement: Option<Placement>,
}

/// Everything the classifier needs to know about a page's content
pub(crate) struct PageScan<'a> {
    pub images: Vec<PaintedImage<'a>>,
    /// Text, vector painting, inline images or form XObjects were found
    pub other_content: bool,
}

impl PageScan<'_> {
    pub fn content_kind(&self) -> ContentKind {
        match self.images.as_slice() {
            [only]
                if !self.other_content
                    && only.coverage >= FULL_PAGE_COVERAGE
                    && only.placement.is_some() =>
            {
                ContentKind::ImageOnly
            }
            _ => ContentKind::Mixed,
        }
    }
}

/// Walk a page's content stream, tracking the CTM through q/Q/cm
pub(crate) fn scan_page(doc: &Document, page_id: ObjectId) -> Result<PageScan<'_>, String> {
    let content = doc
        .get_page_content(page_id)
        .map_err(|e| format!("Failed to read content stream: {}", e))?;
    let operations = Content::decode(&content)
        .map_err(|e| format!("Failed to decode content stream: {}", e))?
        .operations;

    let geometry = page_geometry(doc, page_id);
    let page_area = geometry.width_pt * geometry.height_pt;

    let xobjects = inherited_attribute(doc, page_id, b"Resources")
        .and_then(|res| resolve_dict(doc, res))
        .and_then(|res| res.get(b"XObject").ok())
        .and_then(|xo| resolve_dict(doc, xo));

    let mut ctm = Matrix::IDENTITY;
    let mut stack = Vec::new();
    let mut scan = PageScan {
        images: Vec::new(),
        other_content: false,
    };

    for op in &operations {
        let operator = op.operator.as_str();
        match operator {
            "q" => stack.push(ctm),
            "Q" => ctm = stack.pop().unwrap_or(Matrix::IDENTITY),
            "cm" => {
                if let Some(m) = Matrix::from_operands(&op.operands) {
                    ctm = m.then(ctm);
                }
            }
            "Do" => {
                let stream = op
                    .operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| xobjects?.get(name).ok())
                    .and_then(|obj| resolve(doc, obj))
                    .and_then(|obj| obj.as_stream().ok());

                match stream {
                    Some(stream) if is_image(stream) => {
                        let coverage = if page_area > 0.0 {
                            ctm.unit_area() / page_area
                        } else {
                            0.0
                        };
                        scan.images.push(PaintedImage {
                            stream,
                            coverage,
                            placement: ctm.placement(),
                        });
                    }
                    // Forms, unresolvable names
                    _ => scan.other_content = true,
                }
            }
            _ if TEXT_OPERATORS.contains(&operator)
                || PAINT_OPERATORS.contains(&operator)
                || INLINE_IMAGE_OPERATORS.contains(&operator) =>
            {
                scan.other_content = true;
            }
            _ => {}
        }
    }

    Ok(scan)
}

fn is_image(stream: &Stream) -> bool {
    stream
        .dict
        .get(b"Subtype")
        .and_then(|s| s.as_name())
        .map(|name| name == b"Image")
        .unwrap_or(false)
}

/// Classify a page; anything that cannot be scanned is treated as Mixed
pub(crate) fn classify_page(doc: &Document, page_id: ObjectId) -> ContentKind {
    match scan_page(doc, page_id) {
        Ok(scan) => scan.content_kind(),
        Err(reason) => {
            debug!(?page_id, %reason, "Classifying unscannable page as mixed");
            ContentKind::Mixed
        }
    }
}

/// The single image of an image-only page and how its pixels are laid on it
pub(crate) fn full_page_image(
    doc: &Document,
    page_id: ObjectId,
) -> Result<(&Stream, Placement), RenderError> {
    let scan = scan_page(doc, page_id).map_err(RenderError::Decode)?;
    if scan.content_kind() != ContentKind::ImageOnly {
        return Err(RenderError::Unsupported(
            "page is not a single full-page image".into(),
        ));
    }
    scan.images
        .into_iter()
        .next()
        .and_then(|image| image.placement.map(|placement| (image.stream, placement)))
        .ok_or_else(|| RenderError::Decode("image XObject disappeared".into()))
}
