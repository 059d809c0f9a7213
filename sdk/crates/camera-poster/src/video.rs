//! Camera stream seams: device acquisition, streams, tracks and frame geometry.

use crate::error::CaptureError;
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// A captured raster frame.
pub type Frame = RgbImage;

/// Which camera the platform should prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

/// One dimension of the requested resolution envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstrainRange {
    pub min: u32,
    pub ideal: u32,
    pub max: u32,
}

impl ConstrainRange {
    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Video-only constraints passed to `MediaDevices::open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConstraints {
    pub width: ConstrainRange,
    pub height: ConstrainRange,
    pub facing_mode: FacingMode,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: ConstrainRange {
                min: 1024,
                ideal: 1280,
                max: 1920,
            },
            height: ConstrainRange {
                min: 576,
                ideal: 720,
                max: 1080,
            },
            facing_mode: FacingMode::Environment,
        }
    }
}

/// Native geometry of a stream as reported by the platform.
///
/// Floating point so that platforms which cannot read their own geometry
/// can report NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoGeometry {
    pub width: f64,
    pub height: f64,
}

impl VideoGeometry {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn unknown() -> Self {
        Self::new(f64::NAN, f64::NAN)
    }
}

/// Pixel size of captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    /// Size used when the stream geometry is unusable: 4:3 at `width`.
    pub fn fallback(width: u32) -> Self {
        Self {
            width,
            // At most three quarters of u32::MAX, so the narrowing is lossless.
            height: (u64::from(width) * 3 / 4) as u32,
        }
    }

    /// Scale the native geometry to `width`, keeping the aspect ratio.
    pub fn from_geometry(width: u32, geometry: VideoGeometry) -> Self {
        let height = geometry.height / (geometry.width / f64::from(width));
        if !height.is_finite() || height < 1.0 {
            return Self::fallback(width);
        }
        Self {
            width,
            height: height as u32,
        }
    }
}

/// A single hardware track of a stream.
pub trait MediaTrack: Send {
    fn label(&self) -> &str;

    /// Release the underlying device. Must be idempotent.
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}

/// A live camera stream.
pub trait MediaStream: Send {
    fn id(&self) -> &str;

    fn tracks_mut(&mut self) -> &mut [Box<dyn MediaTrack>];

    /// Most recent decoded frame at native resolution, if any.
    fn snapshot(&self) -> Option<Frame>;
}

/// Stop every track of `stream`, returning how many were still live.
pub fn stop_all_tracks(stream: &mut dyn MediaStream) -> usize {
    let mut stopped = 0;
    for track in stream.tracks_mut() {
        if track.is_live() {
            stopped += 1;
        }
        tracing::debug!("Stopping track {}", track.label());
        track.stop();
    }
    stopped
}

/// A granted stream together with its first-frame notification.
pub struct LiveStream {
    pub stream: Box<dyn MediaStream>,
    /// Resolves once the first frame is decodable.
    pub first_frame: oneshot::Receiver<VideoGeometry>,
}

/// Camera access on the host platform.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Whether the platform offers camera capture at all.
    fn supports_capture(&self) -> bool;

    /// Request a video stream within `constraints`. Waits as long as the
    /// platform takes to grant or deny.
    async fn open(&self, constraints: &VideoConstraints) -> Result<LiveStream, CaptureError>;
}
