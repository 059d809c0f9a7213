//! Embeddable camera capture widget.
//!
//! Activating the spawner opens a live camera preview next to it. The user
//! snaps a still, optionally retakes it, and submits it; the still is posted
//! as a JPEG to the configured endpoint and the parsed JSON response is
//! handed to the caller's handler after the widget has torn itself down.
//!
//! The host provides the platform through the traits in [`video`],
//! [`surface`] and [`gateway`], and forwards user input through the
//! [`CameraPoster`] handle returned by [`setup_camera`].

pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
#[cfg(feature = "native")]
pub mod native;
mod state;
pub mod surface;
#[cfg(test)]
mod testing;
pub mod video;

pub use config::CaptureConfig;
pub use error::{CaptureError, ConfigError, UploadError, WidgetError};
pub use gateway::{HttpGateway, UploadGateway};
pub use reqwest::Url;
pub use state::{run_widget_loop, CaptureController, Phase, Platform, ResultHandler, UserInput};
pub use surface::{Document, ElementId, Labels, Surface};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Attach the widget to `spawner` with the default configuration.
///
/// `handler` runs once per successful upload with the parsed response body.
pub fn setup_camera<H>(
    platform: Platform,
    spawner: ElementId,
    destination: &str,
    handler: H,
) -> Result<CameraPoster, WidgetError>
where
    H: FnMut(Value) + Send + 'static,
{
    setup_camera_with_config(platform, spawner, destination, handler, CaptureConfig::default())
}

/// Attach the widget to `spawner` with an explicit configuration.
pub fn setup_camera_with_config<H>(
    platform: Platform,
    spawner: ElementId,
    destination: &str,
    handler: H,
    config: CaptureConfig,
) -> Result<CameraPoster, WidgetError>
where
    H: FnMut(Value) + Send + 'static,
{
    let url = Url::parse(destination).map_err(|e| WidgetError::InvalidDestination {
        url: destination.to_string(),
        reason: e.to_string(),
    })?;
    config.validate()?;
    let controller = CaptureController::new(platform, spawner, url, Box::new(handler), config);
    CameraPoster::start(controller)
}

/// Handle to a running widget.
///
/// The controller runs on its own thread with a single-threaded runtime, so
/// every transition is applied in order. Dropping the handle behaves like
/// navigating away: any open session is torn down and the camera released.
pub struct CameraPoster {
    input_tx: Option<mpsc::UnboundedSender<UserInput>>,
    cancel: Option<CancellationToken>,
    rt_handle: Option<std::thread::JoinHandle<()>>,
}

impl CameraPoster {
    fn start(controller: CaptureController) -> Result<Self, WidgetError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let cancel = CancellationToken::new();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let loop_cancel = cancel.clone();
        let handle = std::thread::Builder::new()
            .name("camera-poster".to_string())
            .spawn(move || {
                init_tracing();
                runtime.block_on(run_widget_loop(controller, input_rx, loop_cancel));
                tracing::debug!("Widget runtime exited");
            })?;

        Ok(CameraPoster {
            input_tx: Some(input_tx),
            cancel: Some(cancel),
            rt_handle: Some(handle),
        })
    }

    /// The spawner element was activated.
    pub fn activate(&self) -> Result<(), WidgetError> {
        self.send_input(UserInput::Activate)
    }

    /// Capture a frame, or discard the one on display.
    pub fn shutter(&self) -> Result<(), WidgetError> {
        self.send_input(UserInput::Shutter)
    }

    /// Upload the still on display.
    pub fn submit(&self) -> Result<(), WidgetError> {
        self.send_input(UserInput::Submit)
    }

    /// Close the widget, releasing the camera.
    pub fn close(&self) -> Result<(), WidgetError> {
        self.send_input(UserInput::Close)
    }

    /// Tear down any open session and stop the widget runtime.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.input_tx = None;
        if let Some(handle) = self.rt_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Widget runtime panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.rt_handle.is_some()
    }

    fn send_input(&self, input: UserInput) -> Result<(), WidgetError> {
        match &self.input_tx {
            Some(tx) => tx.send(input).map_err(|_| WidgetError::NotRunning),
            None => Err(WidgetError::NotRunning),
        }
    }
}

impl Drop for CameraPoster {
    fn drop(&mut self) {
        self.stop();
    }
}
