//! Page model
//!
//! One `Page` per input page: a PDF page sliced into its own single-page
//! document, or a standalone image. The original bytes are shared and never
//! mutated; rotation, keep flag, position and profile are the caller's to
//! change.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable key of a source file, derived from its name and content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceId(u64);

impl SourceId {
    pub fn derive(name: &str, bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(prefix))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Page identity: (source file, 0-based page index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PageId {
    pub source: SourceId,
    pub index: u32,
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.index)
    }
}

/// Quarter-turn rotation, clockwise
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Normalize any multiple of 90 degrees (negative allowed)
    pub fn from_degrees(degrees: i64) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i64 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    pub fn compose(self, other: Rotation) -> Rotation {
        Rotation::from_degrees(self.degrees() + other.degrees()).unwrap_or_default()
    }

    pub fn clockwise(self) -> Rotation {
        self.compose(Rotation::Cw90)
    }

    /// Whether width and height trade places
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

/// Compression intensity requested for a page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    None,
    Minimal,
    Medium,
    Maximum,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Profile::None),
            "min" | "minimal" => Ok(Profile::Minimal),
            "med" | "medium" => Ok(Profile::Medium),
            "max" | "maximum" => Ok(Profile::Maximum),
            other => Err(format!("Unknown profile: {}", other)),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Profile::None => "none",
            Profile::Minimal => "minimal",
            Profile::Medium => "medium",
            Profile::Maximum => "maximum",
        };
        f.write_str(name)
    }
}

/// Declared kind of an input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SourceFormat {
    Pdf,
    Jpeg,
    Png,
}

impl SourceFormat {
    /// Accepts `pdf`, `jpg`, `jpeg` and `png`, case-insensitively
    pub fn from_declared(kind: &str) -> Option<Self> {
        match kind.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(SourceFormat::Pdf),
            "jpg" | "jpeg" => Some(SourceFormat::Jpeg),
            "png" => Some(SourceFormat::Png),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OriginKind {
    PdfPage,
    Image,
}

/// Content classification computed once at ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContentKind {
    /// One full-page raster image and nothing else
    ImageOnly,
    Mixed,
}

/// Physical page size in points (1/72 inch) and the rotation the source
/// already carries
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageGeometry {
    pub width_pt: f64,
    pub height_pt: f64,
    pub base_rotation: Rotation,
}

/// Pixels per inch assumed for standalone images
pub const IMAGE_PPI: f64 = 96.0;

impl PageGeometry {
    pub fn from_pixels(width: u32, height: u32) -> Self {
        Self {
            width_pt: width as f64 * 72.0 / IMAGE_PPI,
            height_pt: height as f64 * 72.0 / IMAGE_PPI,
            base_rotation: Rotation::None,
        }
    }

    /// Size as displayed after applying `rotation` on top of the base rotation
    pub fn rotated_size(&self, rotation: Rotation) -> (f64, f64) {
        if self.base_rotation.compose(rotation).swaps_axes() {
            (self.height_pt, self.width_pt)
        } else {
            (self.width_pt, self.height_pt)
        }
    }
}

/// One input page and its presentation state
#[derive(Debug, Clone)]
pub struct Page {
    id: PageId,
    source_name: Arc<str>,
    format: SourceFormat,
    content_kind: ContentKind,
    geometry: Option<PageGeometry>,
    original: Arc<[u8]>,
    /// Rotation requested on top of the page's base rotation
    pub rotation: Rotation,
    pub keep: bool,
    pub position: u32,
    pub profile: Profile,
    /// Set when the profile was chosen for this page rather than globally
    pub profile_pinned: bool,
}

impl Page {
    pub(crate) fn new(
        id: PageId,
        source_name: Arc<str>,
        format: SourceFormat,
        content_kind: ContentKind,
        geometry: Option<PageGeometry>,
        original: Arc<[u8]>,
        position: u32,
    ) -> Self {
        Self {
            id,
            source_name,
            format,
            content_kind,
            geometry,
            original,
            rotation: Rotation::None,
            keep: true,
            position,
            profile: Profile::None,
            profile_pinned: false,
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn origin_kind(&self) -> OriginKind {
        match self.format {
            SourceFormat::Pdf => OriginKind::PdfPage,
            SourceFormat::Jpeg | SourceFormat::Png => OriginKind::Image,
        }
    }

    pub fn content_kind(&self) -> ContentKind {
        self.content_kind
    }

    pub fn geometry(&self) -> Option<PageGeometry> {
        self.geometry
    }

    pub fn original_bytes(&self) -> &[u8] {
        &self.original
    }

    pub(crate) fn original_shared(&self) -> Arc<[u8]> {
        Arc::clone(&self.original)
    }

    pub fn original_size(&self) -> usize {
        self.original.len()
    }

    /// Base rotation of the source combined with the requested rotation
    pub fn effective_rotation(&self) -> Rotation {
        let base = self
            .geometry
            .map(|g| g.base_rotation)
            .unwrap_or_default();
        base.compose(self.rotation)
    }
}
