//! Native camera backend over nokhwa.
//!
//! `nokhwa::Camera` is not `Send`, so each stream owns a dedicated capture
//! thread that opens the device, keeps the latest decoded frame in a shared
//! slot and stops the device once its track is stopped.

use crate::error::CaptureError;
use crate::video::{
    Frame, LiveStream, MediaDevices, MediaStream, MediaTrack, VideoConstraints, VideoGeometry,
};
use async_trait::async_trait;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::{Camera, NokhwaError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

const FRAME_RATE: u32 = 30;
const RETRY_DELAY: Duration = Duration::from_millis(100);

static STREAM_IDS: AtomicU64 = AtomicU64::new(1);

type FrameSlot = Arc<Mutex<Option<Frame>>>;

/// `MediaDevices` backed by the platform's native camera API.
#[derive(Debug, Clone, Default)]
pub struct NativeDevices {
    index: u32,
}

impl NativeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the camera at `index` in nokhwa's enumeration order.
    pub fn with_index(index: u32) -> Self {
        Self { index }
    }
}

#[async_trait]
impl MediaDevices for NativeDevices {
    fn supports_capture(&self) -> bool {
        match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => !cameras.is_empty(),
            Err(e) => {
                tracing::warn!("Camera enumeration failed: {}", e);
                false
            }
        }
    }

    async fn open(&self, constraints: &VideoConstraints) -> Result<LiveStream, CaptureError> {
        tracing::debug!(
            facing = ?constraints.facing_mode,
            "Native backend cannot select by facing mode, using camera {}",
            self.index
        );

        let (grant_tx, grant_rx) = oneshot::channel();
        let (frame_tx, frame_rx) = oneshot::channel();
        let latest: FrameSlot = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let index = self.index;
            let constraints = constraints.clone();
            let latest = Arc::clone(&latest);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("camera-capture".to_string())
                .spawn(move || capture_loop(index, constraints, grant_tx, frame_tx, latest, stop))
                .map_err(|e| CaptureError::Device(e.to_string()))?
        };

        let label = match grant_rx.await {
            Ok(Ok(label)) => label,
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => return Err(CaptureError::Device("capture thread exited".to_string())),
        };

        let track = NativeTrack {
            label,
            stop,
            worker: Some(worker),
        };
        let stream = NativeStream {
            id: format!("native-{}-{}", self.index, STREAM_IDS.fetch_add(1, Ordering::Relaxed)),
            tracks: vec![Box::new(track)],
            latest,
        };
        Ok(LiveStream {
            stream: Box::new(stream),
            first_frame: frame_rx,
        })
    }
}

struct NativeStream {
    id: String,
    tracks: Vec<Box<dyn MediaTrack>>,
    latest: FrameSlot,
}

impl MediaStream for NativeStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks_mut(&mut self) -> &mut [Box<dyn MediaTrack>] {
        &mut self.tracks
    }

    fn snapshot(&self) -> Option<Frame> {
        self.latest.lock().ok().and_then(|slot| slot.clone())
    }
}

struct NativeTrack {
    label: String,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MediaTrack for NativeTrack {
    fn label(&self) -> &str {
        &self.label
    }

    /// Raise the stop flag and reap the capture thread. The worker may be
    /// blocked in `Camera::frame` for up to one frame interval, so inside a
    /// runtime the join runs on the blocking pool instead of the caller.
    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        let Some(worker) = self.worker.take() else {
            return;
        };
        let label = self.label.clone();
        let reap = move || {
            if worker.join().is_err() {
                tracing::error!("Capture thread for {} panicked", label);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(reap);
            }
            Err(_) => reap(),
        }
    }

    fn is_live(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
    }
}

impl Drop for NativeTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

fn requested_format(constraints: &VideoConstraints) -> RequestedFormat<'static> {
    let ideal = CameraFormat::new(
        Resolution::new(constraints.width.ideal, constraints.height.ideal),
        FrameFormat::MJPEG,
        FRAME_RATE,
    );
    RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(ideal))
}

fn within_envelope(constraints: &VideoConstraints, width: u32, height: u32) -> bool {
    constraints.width.contains(width) && constraints.height.contains(height)
}

fn open_camera(index: u32, constraints: &VideoConstraints) -> Result<Camera, CaptureError> {
    let mut camera = Camera::new(CameraIndex::Index(index), requested_format(constraints))
        .map_err(device_error)?;

    let resolution = camera.resolution();
    if !within_envelope(constraints, resolution.width(), resolution.height()) {
        return Err(CaptureError::Device(format!(
            "camera resolution {}x{} is outside the requested envelope",
            resolution.width(),
            resolution.height()
        )));
    }

    camera.open_stream().map_err(device_error)?;
    tracing::info!(
        "Camera stream opened on {} at {}x{}",
        camera.info().human_name(),
        resolution.width(),
        resolution.height()
    );
    Ok(camera)
}

fn device_error(e: NokhwaError) -> CaptureError {
    CaptureError::Device(e.to_string())
}

fn decode(camera: &mut Camera) -> Result<Frame, NokhwaError> {
    let buffer = camera.frame()?;
    let resolution = buffer.resolution();
    let rgb = buffer.decode_image::<RgbFormat>()?;
    Frame::from_raw(resolution.width(), resolution.height(), rgb.into_raw()).ok_or_else(|| {
        NokhwaError::ProcessFrameError {
            src: FrameFormat::MJPEG,
            destination: "RGB".to_string(),
            error: "decoded buffer does not match frame resolution".to_string(),
        }
    })
}

fn capture_loop(
    index: u32,
    constraints: VideoConstraints,
    grant: oneshot::Sender<Result<String, CaptureError>>,
    first_frame: oneshot::Sender<VideoGeometry>,
    latest: FrameSlot,
    stop: Arc<AtomicBool>,
) {
    let mut camera = match open_camera(index, &constraints) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = grant.send(Err(e));
            return;
        }
    };
    if grant.send(Ok(camera.info().human_name())).is_err() {
        let _ = camera.stop_stream();
        return;
    }

    let mut first_frame = Some(first_frame);
    while !stop.load(Ordering::Acquire) {
        match decode(&mut camera) {
            Ok(frame) => {
                if let Some(tx) = first_frame.take() {
                    let (width, height) = frame.dimensions();
                    let _ = tx.send(VideoGeometry::new(f64::from(width), f64::from(height)));
                }
                if let Ok(mut slot) = latest.lock() {
                    *slot = Some(frame);
                }
            }
            Err(e) => {
                tracing::warn!("Frame capture failed: {}", e);
                std::thread::sleep(RETRY_DELAY);
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Failed to stop camera stream: {}", e);
    }
    tracing::info!("Camera stream stopped");
}
