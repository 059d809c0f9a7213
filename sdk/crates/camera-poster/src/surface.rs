//! Presentation surface seams.
//!
//! The surface is passive: the controller writes every attribute it shows
//! and keeps the handle returned by `Document::mount_surface` for the whole
//! session instead of looking elements up again.

use crate::video::{Frame, FrameSize};
use serde::{Deserialize, Serialize};

/// Identifies the element that spawns the widget.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(pub String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Literal text placed on the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Labels {
    pub shutter: String,
    pub discard: String,
    pub submit: String,
    pub close: String,
    /// Shown in the live region when the platform cannot render video.
    pub video_unavailable: String,
    /// Text of the single control shown when embedded in a subordinate frame.
    pub open_standalone: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            shutter: "Foto aufnehmen".to_string(),
            discard: "Verwerfen".to_string(),
            submit: "Senden".to_string(),
            close: "Schließen".to_string(),
            video_unavailable: "Video stream steht nicht zur Verfügung.".to_string(),
            open_standalone: "View live result of the example code above".to_string(),
        }
    }
}

/// The mounted widget: live region, still region and three controls.
pub trait Surface: Send {
    /// Bind the live region to a stream.
    fn attach_stream(&mut self, stream_id: &str);

    fn detach_stream(&mut self);

    fn set_frame_size(&mut self, size: FrameSize);

    /// Show the live feed and hide the still region.
    fn show_live(&mut self);

    /// Show `frame` in the still region, hiding the live feed.
    fn show_still(&mut self, frame: &Frame);

    fn set_shutter_label(&mut self, label: &str);

    /// Enable or disable shutter and submit. Close is always enabled.
    fn set_capture_enabled(&mut self, enabled: bool);

    /// Remove every node of the surface from the document.
    fn remove(&mut self);
}

/// The hosting document.
pub trait Document: Send {
    /// True when rendered inside a frame subordinate to a top-level document.
    fn is_embedded(&self) -> bool;

    /// Build the surface and insert it directly after `spawner`.
    fn mount_surface(&mut self, spawner: &ElementId, labels: &Labels) -> Box<dyn Surface>;

    /// Replace the interactive content with a single control that opens the
    /// hosting document in a new top-level context.
    fn show_standalone_launcher(&mut self, label: &str);
}
