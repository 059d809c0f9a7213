//! Recording mocks for the host seams.

use crate::config::CaptureConfig;
use crate::error::{CaptureError, UploadError};
use crate::gateway::UploadGateway;
use crate::state::{CaptureController, Platform, UserInput};
use crate::surface::{Document, ElementId, Labels, Surface};
use crate::video::{
    Frame, FrameSize, LiveStream, MediaDevices, MediaStream, MediaTrack, VideoConstraints,
    VideoGeometry,
};
use async_trait::async_trait;
use bytes::Bytes;
use image::Rgb;
use reqwest::Url;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub fn sample_frame(width: u32, height: u32) -> Frame {
    Frame::from_fn(width, height, |x, y| Rgb([(x % 251) as u8, (y % 241) as u8, 64]))
}

/// Stop calls per track of one stream.
#[derive(Debug, Clone, Default)]
pub struct TrackLog(Arc<Mutex<Vec<usize>>>);

impl TrackLog {
    /// Number of tracks stopped at least once.
    pub fn stopped(&self) -> usize {
        self.0.lock().unwrap().iter().filter(|calls| **calls > 0).count()
    }

    fn add_track(&self) -> usize {
        let mut tracks = self.0.lock().unwrap();
        tracks.push(0);
        tracks.len() - 1
    }

    fn record_stop(&self, index: usize) {
        self.0.lock().unwrap()[index] += 1;
    }
}

pub struct MockTrack {
    label: String,
    index: usize,
    live: bool,
    log: TrackLog,
}

impl MediaTrack for MockTrack {
    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&mut self) {
        self.live = false;
        self.log.record_stop(self.index);
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

static STREAM_IDS: AtomicU64 = AtomicU64::new(1);

pub struct MockStream {
    id: String,
    tracks: Vec<Box<dyn MediaTrack>>,
    frame: Option<Frame>,
    log: TrackLog,
}

impl MockStream {
    pub fn new(track_count: usize) -> Self {
        let log = TrackLog::default();
        let tracks = (0..track_count)
            .map(|i| {
                let index = log.add_track();
                Box::new(MockTrack {
                    label: format!("mock camera {i}"),
                    index,
                    live: true,
                    log: log.clone(),
                }) as Box<dyn MediaTrack>
            })
            .collect();
        MockStream {
            id: format!("mock-stream-{}", STREAM_IDS.fetch_add(1, Ordering::Relaxed)),
            tracks,
            frame: None,
            log,
        }
    }

    pub fn with_frame(mut self, frame: Option<Frame>) -> Self {
        self.frame = frame;
        self
    }

    pub fn track_log(&self) -> TrackLog {
        self.log.clone()
    }
}

impl MediaStream for MockStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks_mut(&mut self) -> &mut [Box<dyn MediaTrack>] {
        &mut self.tracks
    }

    fn snapshot(&self) -> Option<Frame> {
        self.frame.clone()
    }
}

enum Outcome {
    Grant {
        tracks: usize,
        geometry: Option<VideoGeometry>,
        frame: Option<Frame>,
    },
    Deny,
}

pub struct MockDevices {
    supported: bool,
    outcome: Outcome,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    opens: AtomicUsize,
    requested: Mutex<Vec<VideoConstraints>>,
    streams: Mutex<Vec<TrackLog>>,
    // Held so that streams without geometry stay in `Live`.
    pending_frames: Mutex<Vec<oneshot::Sender<VideoGeometry>>>,
}

impl MockDevices {
    fn with_outcome(supported: bool, outcome: Outcome) -> Self {
        MockDevices {
            supported,
            outcome,
            gate: Mutex::new(None),
            opens: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            pending_frames: Mutex::new(Vec::new()),
        }
    }

    /// Grants one-track streams. `geometry` of `None` never reports a first frame.
    pub fn granting(geometry: Option<VideoGeometry>) -> Self {
        Self::with_outcome(
            true,
            Outcome::Grant {
                tracks: 1,
                geometry,
                frame: None,
            },
        )
    }

    pub fn denying() -> Self {
        Self::with_outcome(true, Outcome::Deny)
    }

    pub fn unsupported() -> Self {
        Self::with_outcome(false, Outcome::Deny)
    }

    pub fn with_tracks(mut self, count: usize) -> Self {
        if let Outcome::Grant { tracks, .. } = &mut self.outcome {
            *tracks = count;
        }
        self
    }

    pub fn with_frame(mut self, still: Frame) -> Self {
        if let Outcome::Grant { frame, .. } = &mut self.outcome {
            *frame = Some(still);
        }
        self
    }

    /// Hold every `open` until the returned sender fires.
    pub fn gated(self) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        (self, tx)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub async fn open_count_eventually(&self, expected: usize) -> usize {
        for _ in 0..1000 {
            if self.open_count() >= expected {
                break;
            }
            tokio::task::yield_now().await;
        }
        self.open_count()
    }

    pub fn requested(&self) -> Vec<VideoConstraints> {
        self.requested.lock().unwrap().clone()
    }

    /// Tracks stopped across every stream handed out.
    pub fn stopped_tracks(&self) -> usize {
        self.streams.lock().unwrap().iter().map(TrackLog::stopped).sum()
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    fn supports_capture(&self) -> bool {
        self.supported
    }

    async fn open(&self, constraints: &VideoConstraints) -> Result<LiveStream, CaptureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(constraints.clone());

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        match &self.outcome {
            Outcome::Deny => Err(CaptureError::Denied("NotAllowedError".to_string())),
            Outcome::Grant {
                tracks,
                geometry,
                frame,
            } => {
                let stream = MockStream::new(*tracks).with_frame(frame.clone());
                self.streams.lock().unwrap().push(stream.track_log());

                let (tx, rx) = oneshot::channel();
                match geometry {
                    Some(geometry) => {
                        let _ = tx.send(*geometry);
                    }
                    None => self.pending_frames.lock().unwrap().push(tx),
                }
                Ok(LiveStream {
                    stream: Box::new(stream),
                    first_frame: rx,
                })
            }
        }
    }
}

/// Everything a mock surface has been told.
#[derive(Debug, Clone, Default)]
pub struct SurfaceState {
    pub labels: Labels,
    pub attached: Option<String>,
    pub size: Option<FrameSize>,
    pub live_visible: bool,
    pub still: Option<Frame>,
    pub still_visible: bool,
    pub shutter_label: String,
    pub capture_enabled: bool,
    pub removed: bool,
}

struct MockSurface(Arc<Mutex<SurfaceState>>);

impl MockSurface {
    fn update(&self, f: impl FnOnce(&mut SurfaceState)) {
        f(&mut self.0.lock().unwrap());
    }
}

impl Surface for MockSurface {
    fn attach_stream(&mut self, stream_id: &str) {
        self.update(|s| s.attached = Some(stream_id.to_string()));
    }

    fn detach_stream(&mut self) {
        self.update(|s| s.attached = None);
    }

    fn set_frame_size(&mut self, size: FrameSize) {
        self.update(|s| s.size = Some(size));
    }

    fn show_live(&mut self) {
        self.update(|s| {
            s.live_visible = true;
            s.still_visible = false;
        });
    }

    fn show_still(&mut self, frame: &Frame) {
        self.update(|s| {
            s.still = Some(frame.clone());
            s.still_visible = true;
            s.live_visible = false;
        });
    }

    fn set_shutter_label(&mut self, label: &str) {
        self.update(|s| s.shutter_label = label.to_string());
    }

    fn set_capture_enabled(&mut self, enabled: bool) {
        self.update(|s| s.capture_enabled = enabled);
    }

    fn remove(&mut self) {
        self.update(|s| s.removed = true);
    }
}

#[derive(Default)]
struct DocumentState {
    embedded: bool,
    mounts: Vec<(ElementId, Arc<Mutex<SurfaceState>>)>,
    launcher: Option<String>,
}

/// Shared view of a `MockDocument`.
#[derive(Clone, Default)]
pub struct DocumentLog(Arc<Mutex<DocumentState>>);

impl DocumentLog {
    pub fn mount_count(&self) -> usize {
        self.0.lock().unwrap().mounts.len()
    }

    pub fn mounted_after(&self) -> Option<ElementId> {
        self.0.lock().unwrap().mounts.last().map(|(id, _)| id.clone())
    }

    /// State of the most recently mounted surface.
    pub fn surface(&self) -> SurfaceState {
        let doc = self.0.lock().unwrap();
        let (_, surface) = doc.mounts.last().expect("no surface mounted");
        let state = surface.lock().unwrap().clone();
        state
    }

    /// State of the surface mounted `index`-th, counting from zero.
    pub fn surface_at(&self, index: usize) -> SurfaceState {
        let doc = self.0.lock().unwrap();
        let state = doc.mounts[index].1.lock().unwrap().clone();
        state
    }

    pub fn launcher(&self) -> Option<String> {
        self.0.lock().unwrap().launcher.clone()
    }
}

pub struct MockDocument(DocumentLog);

impl MockDocument {
    pub fn new(log: DocumentLog) -> Self {
        MockDocument(log)
    }
}

impl Document for MockDocument {
    fn is_embedded(&self) -> bool {
        self.0 .0.lock().unwrap().embedded
    }

    fn mount_surface(&mut self, spawner: &ElementId, labels: &Labels) -> Box<dyn Surface> {
        let state = Arc::new(Mutex::new(SurfaceState {
            labels: labels.clone(),
            capture_enabled: true,
            ..SurfaceState::default()
        }));
        self.0 .0
            .lock()
            .unwrap()
            .mounts
            .push((spawner.clone(), Arc::clone(&state)));
        Box::new(MockSurface(state))
    }

    fn show_standalone_launcher(&mut self, label: &str) {
        self.0 .0.lock().unwrap().launcher = Some(label.to_string());
    }
}

pub struct MockGateway {
    success: Value,
    failures: Mutex<VecDeque<UploadError>>,
    hang: bool,
    calls: Mutex<Vec<(Bytes, Url)>>,
    aborted: Arc<AtomicBool>,
}

struct AbortFlag(Arc<AtomicBool>);

impl Drop for AbortFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl MockGateway {
    pub fn accepting(body: Value) -> Self {
        MockGateway {
            success: body,
            failures: Mutex::new(VecDeque::new()),
            hang: false,
            calls: Mutex::new(Vec::new()),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Never completes; records when its future is dropped.
    pub fn hanging() -> Self {
        MockGateway {
            hang: true,
            ..Self::accepting(Value::Null)
        }
    }

    pub fn fail_first(self, error: UploadError) -> Self {
        self.failures.lock().unwrap().push_back(error);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<(Bytes, Url)> {
        self.calls.lock().unwrap().last().cloned()
    }

    pub fn was_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadGateway for MockGateway {
    async fn submit(&self, image: Bytes, destination: &Url) -> Result<Value, UploadError> {
        self.calls.lock().unwrap().push((image, destination.clone()));
        if self.hang {
            let _flag = AbortFlag(Arc::clone(&self.aborted));
            std::future::pending::<()>().await;
        }
        let failure = self.failures.lock().unwrap().pop_front();
        match failure {
            Some(error) => Err(error),
            None => Ok(self.success.clone()),
        }
    }
}

/// Wire mocks into a `Platform`, keeping shared handles for assertions.
pub fn platform(
    devices: &Arc<MockDevices>,
    document: &DocumentLog,
    gateway: &Arc<MockGateway>,
) -> Platform {
    Platform {
        devices: Arc::clone(devices) as Arc<dyn MediaDevices>,
        document: Box::new(MockDocument::new(document.clone())),
        gateway: Arc::clone(gateway) as Arc<dyn UploadGateway>,
    }
}

/// What the result handler saw when it ran.
#[derive(Debug, Clone)]
pub struct HandlerCall {
    pub body: Value,
    pub surface_removed: bool,
    pub tracks_stopped: usize,
}

pub struct Harness {
    pub controller: CaptureController,
    pub devices: Arc<MockDevices>,
    pub document: DocumentLog,
    pub gateway: Arc<MockGateway>,
    calls: Arc<Mutex<Vec<HandlerCall>>>,
}

impl Harness {
    pub fn new(devices: MockDevices, gateway: MockGateway) -> Self {
        Self::build(devices, gateway, false)
    }

    pub fn embedded(devices: MockDevices) -> Self {
        Self::build(devices, MockGateway::accepting(Value::Null), true)
    }

    /// A harness already opened and armed.
    pub async fn ready(devices: MockDevices) -> Self {
        let mut harness = Self::new(devices, MockGateway::accepting(Value::Null));
        harness.open_ready().await;
        harness
    }

    fn build(devices: MockDevices, gateway: MockGateway, embedded: bool) -> Self {
        let devices = Arc::new(devices);
        let gateway = Arc::new(gateway);
        let document = DocumentLog::default();
        document.0.lock().unwrap().embedded = embedded;
        let calls = Arc::new(Mutex::new(Vec::new()));

        let handler = {
            let calls = Arc::clone(&calls);
            let document = document.clone();
            let devices = Arc::clone(&devices);
            Box::new(move |body: Value| {
                let call = HandlerCall {
                    body,
                    surface_removed: document.surface().removed,
                    tracks_stopped: devices.stopped_tracks(),
                };
                calls.lock().unwrap().push(call);
            })
        };

        let platform = platform(&devices, &document, &gateway);
        let controller = CaptureController::new(
            platform,
            ElementId::new("cameraButton"),
            Url::parse("http://localhost:8080/ocr").unwrap(),
            handler,
            CaptureConfig::default(),
        );

        Harness {
            controller,
            devices,
            document,
            gateway,
            calls,
        }
    }

    pub async fn step(&mut self) {
        self.controller.process_next_event().await;
    }

    /// Activate, then apply the stream grant and first frame.
    pub async fn open_ready(&mut self) {
        self.controller.handle_input(UserInput::Activate);
        self.step().await;
        self.step().await;
    }

    pub fn handler_calls(&self) -> Vec<HandlerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub async fn wait_for_gateway_calls(&self, expected: usize) {
        for _ in 0..1000 {
            if self.gateway.call_count() >= expected {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    pub async fn wait_for_upload_abort(&self) {
        for _ in 0..1000 {
            if self.gateway.was_aborted() {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    pub fn into_parts(self) -> (CaptureController, Arc<MockDevices>, DocumentLog) {
        (self.controller, self.devices, self.document)
    }
}
