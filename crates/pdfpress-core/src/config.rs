//! Engine configuration
//!
//! TOML-backed settings for the worker pool, rasterization resolutions and
//! the guard-rail allowance. Every field has a default, so an empty document
//! is a valid configuration.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::page::Profile;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Worker threads for per-page work (default: available cores)
    #[serde(default)]
    pub workers: Option<usize>,
    /// Legibility floor; no rasterization goes below this resolution
    #[serde(default = "default_min_dpi")]
    pub min_dpi: u32,
    #[serde(default)]
    pub preview: PreviewConfig,
    /// Container bytes tolerated per page when wrapping is unavoidable
    #[serde(default = "default_remux_overhead")]
    pub remux_overhead_per_page: usize,
    #[serde(default)]
    pub profiles: ProfileTable,
}

/// Pixel box previews are fitted into
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_width")]
    pub max_width: u32,
    #[serde(default = "default_preview_height")]
    pub max_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ProfileSettings {
    /// Rasterization resolution for PDF pages
    pub dpi: u32,
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
    /// Longest side in pixels for standalone images
    pub image_max_side: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProfileTable {
    #[serde(default = "default_minimal")]
    pub minimal: ProfileSettings,
    #[serde(default = "default_medium")]
    pub medium: ProfileSettings,
    #[serde(default = "default_maximum")]
    pub maximum: ProfileSettings,
}

fn default_min_dpi() -> u32 {
    72
}

fn default_remux_overhead() -> usize {
    1024
}

fn default_preview_width() -> u32 {
    220
}

fn default_preview_height() -> u32 {
    300
}

fn default_minimal() -> ProfileSettings {
    ProfileSettings {
        dpi: 200,
        jpeg_quality: 85,
        image_max_side: 2400,
    }
}

fn default_medium() -> ProfileSettings {
    ProfileSettings {
        dpi: 150,
        jpeg_quality: 70,
        image_max_side: 2000,
    }
}

fn default_maximum() -> ProfileSettings {
    ProfileSettings {
        dpi: 110,
        jpeg_quality: 50,
        image_max_side: 1600,
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_width: default_preview_width(),
            max_height: default_preview_height(),
        }
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self {
            minimal: default_minimal(),
            medium: default_medium(),
            maximum: default_maximum(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            min_dpi: default_min_dpi(),
            preview: PreviewConfig::default(),
            remux_overhead_per_page: default_remux_overhead(),
            profiles: ProfileTable::default(),
        }
    }
}

impl ProfileTable {
    /// Settings for a transforming profile; `None` has no settings
    pub fn get(&self, profile: Profile) -> Option<&ProfileSettings> {
        match profile {
            Profile::None => None,
            Profile::Minimal => Some(&self.minimal),
            Profile::Medium => Some(&self.medium),
            Profile::Maximum => Some(&self.maximum),
        }
    }
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    ///
    /// ```
    /// use pdfpress_core::EngineConfig;
    ///
    /// let config = EngineConfig::from_toml_str(r#"
    ///     min_dpi = 96
    ///
    ///     [profiles.maximum]
    ///     dpi = 100
    ///     jpeg_quality = 40
    ///     image_max_side = 1200
    /// "#).unwrap();
    /// assert_eq!(config.profiles.maximum.jpeg_quality, 40);
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.min_dpi == 0 {
            return Err(ConfigError::Invalid("min_dpi must be positive".into()));
        }
        if self.preview.max_width == 0 || self.preview.max_height == 0 {
            return Err(ConfigError::Invalid(
                "preview box must have positive dimensions".into(),
            ));
        }

        for (name, settings) in [
            ("minimal", &self.profiles.minimal),
            ("medium", &self.profiles.medium),
            ("maximum", &self.profiles.maximum),
        ] {
            if !(1..=100).contains(&settings.jpeg_quality) {
                return Err(ConfigError::Invalid(format!(
                    "{}: jpeg_quality must be between 1 and 100",
                    name
                )));
            }
            if settings.dpi == 0 || settings.image_max_side == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{}: dpi and image_max_side must be positive",
                    name
                )));
            }
        }

        let (medium, maximum) = (&self.profiles.medium, &self.profiles.maximum);
        if maximum.dpi > medium.dpi {
            return Err(ConfigError::Invalid(
                "maximum profile must not rasterize at a higher dpi than medium".into(),
            ));
        }
        if maximum.jpeg_quality > medium.jpeg_quality {
            return Err(ConfigError::Invalid(
                "maximum profile must not use a higher jpeg_quality than medium".into(),
            ));
        }
        if maximum.image_max_side > medium.image_max_side {
            return Err(ConfigError::Invalid(
                "maximum profile must not allow larger images than medium".into(),
            ));
        }

        Ok(())
    }

    /// Resolution for PDF page rasterization, clamped to the legibility floor
    pub fn effective_dpi(&self, settings: &ProfileSettings) -> u32 {
        settings.dpi.max(self.min_dpi)
    }

    /// Longest image side in pixels, never below what `min_dpi` demands for
    /// an image whose longest physical side is `long_side_pt` points
    pub fn effective_max_side(&self, settings: &ProfileSettings, long_side_pt: f64) -> u32 {
        let floor = (long_side_pt / 72.0 * self.min_dpi as f64).ceil() as u32;
        settings.image_max_side.max(floor)
    }
}
