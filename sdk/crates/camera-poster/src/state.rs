//! Capture state machine: processes user input and platform events.
//!
//! All transitions run on one task. Stream acquisition, first-frame
//! notification and upload completion are spawned and report back through
//! an internal channel, tagged with the session they belong to so that
//! results for a closed session are dropped.

use crate::codec::StillEncoder;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, UploadError};
use crate::gateway::UploadGateway;
use crate::surface::{Document, ElementId, Surface};
use crate::video::{
    stop_all_tracks, Frame, FrameSize, LiveStream, MediaDevices, MediaStream, VideoGeometry,
};
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Receives the parsed response of every successful upload.
pub type ResultHandler = Box<dyn FnMut(Value) + Send>;

/// Host services the controller drives.
pub struct Platform {
    pub devices: Arc<dyn MediaDevices>,
    pub document: Box<dyn Document>,
    pub gateway: Arc<dyn UploadGateway>,
}

/// User actions delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserInput {
    /// The spawner element was activated.
    Activate,
    /// Shutter or retake.
    Shutter,
    Submit,
    Close,
}

/// Observable lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Acquiring,
    Live,
    Ready,
    Preview,
    Submitting,
    Closed,
}

/// Resources owned by one open session.
struct Session {
    id: u64,
    surface: Box<dyn Surface>,
    cancel: CancellationToken,
}

enum SessionState {
    Idle,
    Acquiring {
        session: Session,
        /// Acquisition failed or is unsupported; capture stays disabled.
        failed: bool,
    },
    Live {
        session: Session,
        stream: Box<dyn MediaStream>,
    },
    Ready {
        session: Session,
        stream: Box<dyn MediaStream>,
        size: FrameSize,
    },
    Preview {
        session: Session,
        stream: Box<dyn MediaStream>,
        size: FrameSize,
        still: Frame,
    },
    Submitting {
        session: Session,
        stream: Box<dyn MediaStream>,
        size: FrameSize,
        still: Frame,
    },
    Closed,
}

impl SessionState {
    fn phase(&self) -> Phase {
        match self {
            SessionState::Idle => Phase::Idle,
            SessionState::Acquiring { .. } => Phase::Acquiring,
            SessionState::Live { .. } => Phase::Live,
            SessionState::Ready { .. } => Phase::Ready,
            SessionState::Preview { .. } => Phase::Preview,
            SessionState::Submitting { .. } => Phase::Submitting,
            SessionState::Closed => Phase::Closed,
        }
    }

    fn is_open(&self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Closed)
    }

    /// Release the camera and remove the surface.
    fn teardown(self) {
        let (mut session, stream) = match self {
            SessionState::Idle | SessionState::Closed => return,
            SessionState::Acquiring { session, .. } => (session, None),
            SessionState::Live { session, stream }
            | SessionState::Ready {
                session, stream, ..
            }
            | SessionState::Preview {
                session, stream, ..
            }
            | SessionState::Submitting {
                session, stream, ..
            } => (session, Some(stream)),
        };

        session.cancel.cancel();
        if let Some(mut stream) = stream {
            let stopped = stop_all_tracks(stream.as_mut());
            session.surface.detach_stream();
            tracing::debug!(session = session.id, "Camera released, {} tracks stopped", stopped);
        }
        session.surface.remove();
    }
}

/// Internal events posted by spawned tasks.
enum SessionEvent {
    StreamGranted { session: u64, live: LiveStream },
    StreamFailed { session: u64, error: CaptureError },
    FrameDecodable { session: u64, geometry: VideoGeometry },
    UploadFinished {
        session: u64,
        result: Result<Value, UploadError>,
    },
}

/// Drives one spawner's capture lifecycle.
pub struct CaptureController {
    config: CaptureConfig,
    encoder: StillEncoder,
    spawner: ElementId,
    destination: Url,
    devices: Arc<dyn MediaDevices>,
    document: Box<dyn Document>,
    gateway: Arc<dyn UploadGateway>,
    handler: ResultHandler,
    state: SessionState,
    next_session: u64,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl CaptureController {
    pub fn new(
        platform: Platform,
        spawner: ElementId,
        destination: Url,
        handler: ResultHandler,
        config: CaptureConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        CaptureController {
            encoder: StillEncoder::new(config.jpeg_quality, config.placeholder_rgb),
            config,
            spawner,
            destination,
            devices: platform.devices,
            document: platform.document,
            gateway: platform.gateway,
            handler,
            state: SessionState::Idle,
            next_session: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Apply one user action. Must be called from within a tokio runtime.
    pub fn handle_input(&mut self, input: UserInput) {
        match input {
            UserInput::Activate => self.activate(),
            UserInput::Shutter => self.shutter(),
            UserInput::Submit => self.submit(),
            UserInput::Close => self.close(),
        }
    }

    /// Tear down any open session without invoking the handler.
    pub fn shutdown(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        if state.is_open() {
            tracing::info!("Shutting down open capture session");
        }
        state.teardown();
    }

    /// Wait for the next platform event and apply it.
    pub(crate) async fn process_next_event(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
        }
    }

    fn activate(&mut self) {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Acquiring {
                session,
                failed: true,
            } => {
                tracing::info!(session = session.id, "Retrying camera acquisition in a fresh session");
                SessionState::Acquiring {
                    session,
                    failed: true,
                }
                .teardown();
            }
            open if open.is_open() => {
                tracing::debug!(spawner = %self.spawner, "Session already open, ignoring activation");
                self.state = open;
                return;
            }
            other => self.state = other,
        }

        if self.document.is_embedded() {
            tracing::info!("Rendered inside a subordinate frame, offering standalone view");
            self.document
                .show_standalone_launcher(&self.config.labels.open_standalone);
            return;
        }

        self.next_session += 1;
        let id = self.next_session;
        let mut surface = self.document.mount_surface(&self.spawner, &self.config.labels);
        surface.set_shutter_label(&self.config.labels.shutter);
        let session = Session {
            id,
            surface,
            cancel: CancellationToken::new(),
        };
        tracing::info!(session = id, "Capture session opened next to {}", self.spawner);

        if !self.devices.supports_capture() {
            tracing::error!(session = id, "{}", CaptureError::Unsupported);
            self.state = Self::disable_capture(session);
            return;
        }

        let devices = Arc::clone(&self.devices);
        let constraints = self.config.constraints.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let event = match devices.open(&constraints).await {
                Ok(live) => SessionEvent::StreamGranted { session: id, live },
                Err(error) => SessionEvent::StreamFailed { session: id, error },
            };
            let _ = tx.send(event);
        });

        self.state = SessionState::Acquiring {
            session,
            failed: false,
        };
    }

    fn disable_capture(mut session: Session) -> SessionState {
        session.surface.set_capture_enabled(false);
        SessionState::Acquiring {
            session,
            failed: true,
        }
    }

    fn shutter(&mut self) {
        let labels = &self.config.labels;
        self.state = match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Acquiring { session, failed: true } => {
                tracing::debug!(session = session.id, "Capture disabled, ignoring shutter");
                SessionState::Acquiring {
                    session,
                    failed: true,
                }
            }
            SessionState::Acquiring {
                mut session,
                failed: false,
            } => {
                self.paint_placeholder(&mut session);
                SessionState::Acquiring {
                    session,
                    failed: false,
                }
            }
            SessionState::Live {
                mut session,
                stream,
            } => {
                self.paint_placeholder(&mut session);
                SessionState::Live { session, stream }
            }
            SessionState::Ready {
                mut session,
                stream,
                size,
            } => {
                let still = match stream.snapshot() {
                    Some(frame) => self.encoder.draw(&frame, size),
                    None => {
                        tracing::warn!(session = session.id, "No decoded frame available, using placeholder");
                        self.encoder.placeholder(size)
                    }
                };
                session.surface.show_still(&still);
                session.surface.set_shutter_label(&labels.discard);
                tracing::info!(session = session.id, "Frame captured at {}x{}", size.width, size.height);
                SessionState::Preview {
                    session,
                    stream,
                    size,
                    still,
                }
            }
            SessionState::Preview {
                mut session,
                stream,
                size,
                ..
            } => {
                session.surface.show_live();
                session.surface.set_shutter_label(&labels.shutter);
                tracing::info!(session = session.id, "Still discarded");
                SessionState::Ready {
                    session,
                    stream,
                    size,
                }
            }
            other => {
                tracing::debug!("Ignoring shutter in {:?}", other.phase());
                other
            }
        };
    }

    fn paint_placeholder(&self, session: &mut Session) {
        let placeholder = self
            .encoder
            .placeholder(FrameSize::fallback(self.config.frame_width));
        session.surface.show_still(&placeholder);
        tracing::debug!(session = session.id, "Frame size unknown, showing placeholder");
    }

    fn submit(&mut self) {
        self.state = match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Preview {
                session,
                stream,
                size,
                still,
            } => match self.encoder.encode(&still) {
                Ok(jpeg) => {
                    self.spawn_upload(&session, jpeg);
                    SessionState::Submitting {
                        session,
                        stream,
                        size,
                        still,
                    }
                }
                Err(e) => {
                    let error = UploadError::from(e);
                    tracing::error!(session = session.id, "Submit failed: {}", error);
                    SessionState::Preview {
                        session,
                        stream,
                        size,
                        still,
                    }
                }
            },
            SessionState::Submitting {
                session,
                stream,
                size,
                still,
            } => {
                tracing::debug!(session = session.id, "Upload already in flight");
                SessionState::Submitting {
                    session,
                    stream,
                    size,
                    still,
                }
            }
            other => {
                tracing::debug!("Nothing to submit in {:?}", other.phase());
                other
            }
        };
    }

    fn spawn_upload(&self, session: &Session, jpeg: bytes::Bytes) {
        let id = session.id;
        let cancel = session.cancel.clone();
        let gateway = Arc::clone(&self.gateway);
        let destination = self.destination.clone();
        let tx = self.events_tx.clone();
        tracing::info!(session = id, "Submitting {} byte still to {}", jpeg.len(), destination);

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(session = id, "Upload aborted");
                }
                result = gateway.submit(jpeg, &destination) => {
                    let _ = tx.send(SessionEvent::UploadFinished { session: id, result });
                }
            }
        });
    }

    fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        match state {
            SessionState::Idle => {
                tracing::debug!("No session to close");
                self.state = SessionState::Idle;
            }
            SessionState::Closed => tracing::debug!("No session to close"),
            open => {
                tracing::info!("Closing capture session in {:?}", open.phase());
                open.teardown();
            }
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StreamGranted { session, live } => self.on_stream_granted(session, live),
            SessionEvent::StreamFailed { session, error } => self.on_stream_failed(session, error),
            SessionEvent::FrameDecodable { session, geometry } => {
                self.on_frame_decodable(session, geometry)
            }
            SessionEvent::UploadFinished { session, result } => {
                self.on_upload_finished(session, result)
            }
        }
    }

    fn on_stream_granted(&mut self, id: u64, live: LiveStream) {
        let LiveStream {
            mut stream,
            first_frame,
        } = live;

        self.state = match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Acquiring {
                mut session,
                failed: false,
            } if session.id == id => {
                session.surface.attach_stream(stream.id());
                session.surface.show_live();
                tracing::info!(session = id, "Camera stream {} attached", stream.id());

                let tx = self.events_tx.clone();
                let cancel = session.cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        geometry = first_frame => match geometry {
                            Ok(geometry) => {
                                let _ = tx.send(SessionEvent::FrameDecodable { session: id, geometry });
                            }
                            Err(_) => {
                                tracing::warn!(session = id, "Stream ended before a frame was decodable");
                            }
                        }
                    }
                });

                SessionState::Live { session, stream }
            }
            other => {
                let stopped = stop_all_tracks(stream.as_mut());
                tracing::warn!(session = id, "Stream granted after its session ended, released {} tracks", stopped);
                other
            }
        };
    }

    fn on_stream_failed(&mut self, id: u64, error: CaptureError) {
        self.state = match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Acquiring { session, .. } if session.id == id => {
                tracing::error!(session = id, "Camera acquisition failed: {}", error);
                Self::disable_capture(session)
            }
            other => {
                tracing::debug!(session = id, "Acquisition failure for a closed session: {}", error);
                other
            }
        };
    }

    fn on_frame_decodable(&mut self, id: u64, geometry: VideoGeometry) {
        self.state = match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Live {
                mut session,
                stream,
            } if session.id == id => {
                let size = FrameSize::from_geometry(self.config.frame_width, geometry);
                if !(geometry.width > 0.0 && geometry.height > 0.0) {
                    tracing::debug!(session = id, "Stream geometry {:?} unreadable, assuming 4:3", geometry);
                }
                session.surface.set_frame_size(size);
                session.surface.show_live();
                tracing::info!(session = id, "Shutter armed at {}x{}", size.width, size.height);
                SessionState::Ready {
                    session,
                    stream,
                    size,
                }
            }
            other => other,
        };
    }

    fn on_upload_finished(&mut self, id: u64, result: Result<Value, UploadError>) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        match state {
            SessionState::Submitting {
                session,
                stream,
                size,
                still,
            } if session.id == id => match result {
                Ok(body) => {
                    tracing::info!(session = id, "Upload accepted");
                    // The handler must observe a fully torn down surface.
                    SessionState::Submitting {
                        session,
                        stream,
                        size,
                        still,
                    }
                    .teardown();
                    (self.handler)(body);
                }
                Err(error) => {
                    tracing::error!(session = id, "Upload failed: {}", error);
                    self.state = SessionState::Preview {
                        session,
                        stream,
                        size,
                        still,
                    };
                }
            },
            other => {
                tracing::debug!(session = id, "Discarding upload result for a closed session");
                self.state = other;
            }
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Step {
    Cancelled,
    Input(Option<UserInput>),
    Event(Option<SessionEvent>),
}

/// Main widget loop. Applies user input and platform events in order until
/// `cancel` fires or the input channel closes, then tears down any open
/// session.
pub async fn run_widget_loop(
    mut controller: CaptureController,
    mut input_rx: mpsc::UnboundedReceiver<UserInput>,
    cancel: CancellationToken,
) {
    loop {
        let step = tokio::select! {
            _ = cancel.cancelled() => Step::Cancelled,
            input = input_rx.recv() => Step::Input(input),
            event = controller.events_rx.recv() => Step::Event(event),
        };

        match step {
            Step::Cancelled => {
                tracing::info!("Widget loop cancelled");
                break;
            }
            Step::Input(None) => break,
            Step::Input(Some(input)) => controller.handle_input(input),
            Step::Event(Some(event)) => controller.handle_event(event),
            Step::Event(None) => break,
        }
    }
    controller.shutdown();
}
