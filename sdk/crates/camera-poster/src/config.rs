//! Widget configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! frame_width = 1280
//! jpeg_quality = 100
//! placeholder_rgb = [170, 170, 170]
//!
//! [constraints]
//! facing_mode = "environment"
//! width = { min = 1024, ideal = 1280, max = 1920 }
//! height = { min = 576, ideal = 720, max = 1080 }
//!
//! [labels]
//! shutter = "Foto aufnehmen"
//! discard = "Verwerfen"
//! ```

use crate::error::ConfigError;
use crate::surface::Labels;
use crate::video::VideoConstraints;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Accepted range for `frame_width`. The upper bound is 8K UHD.
pub const FRAME_WIDTH_RANGE: std::ops::RangeInclusive<u32> = 1..=7680;

/// Complete widget configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Width every captured frame is scaled to. Height follows the stream's aspect ratio.
    pub frame_width: u32,
    /// Resolution envelope requested from the camera.
    pub constraints: VideoConstraints,
    /// Literal text written onto the surface.
    pub labels: Labels,
    /// JPEG quality for the uploaded still, 1-100.
    pub jpeg_quality: u8,
    /// Fill colour used when no frame can be captured.
    pub placeholder_rgb: [u8; 3],
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_width: 1280,
            constraints: VideoConstraints::default(),
            labels: Labels::default(),
            jpeg_quality: 100,
            placeholder_rgb: [0xAA, 0xAA, 0xAA],
        }
    }
}

impl CaptureConfig {
    /// Parse a config from TOML text. Missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the controller cannot render with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !FRAME_WIDTH_RANGE.contains(&self.frame_width) {
            return Err(ConfigError::FrameWidthOutOfRange {
                width: self.frame_width,
                min: *FRAME_WIDTH_RANGE.start(),
                max: *FRAME_WIDTH_RANGE.end(),
            });
        }
        Ok(())
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
