use super::intent::CaptureIntent;
use super::state::{transition, SessionAction, SessionEvent, SessionState};
use crate::backend::{
    CameraBackend, CameraCallbacks, CameraDevice, CaptureRequest, CaptureSession, DeviceEvent,
    WorkerMessage,
};
use crate::error::CameraError;
use crate::permission::PermissionCollaborator;
use crate::surface::{OutputSurface, SurfaceRegistry, SurfaceTarget};
use crate::worker::Worker;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const STATE_HISTORY_LIMIT: usize = 32;

/// Default bound on waiting for the callback worker during `close`
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns one physical camera: device handle, capture session and the worker
/// thread that processes backend callbacks.
///
/// Once torn down (explicitly or after any failure) a session stays closed;
/// create a new one to reopen the camera.
pub struct CameraSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    backend: Arc<dyn CameraBackend>,
    permissions: Arc<dyn PermissionCollaborator>,
    surfaces: SurfaceRegistry,
    intent: Mutex<CaptureIntent>,
    close_timeout: Duration,
    core: Mutex<SessionCore>,
    torn_down: AtomicBool,
    generation: AtomicU64,
    tx: Sender<WorkerMessage>,
    rx: Mutex<Option<Receiver<WorkerMessage>>>,
    worker: Mutex<Option<Worker>>,
}

struct SessionCore {
    state: SessionState,
    camera_id: Option<String>,
    device: Option<Box<dyn CameraDevice>>,
    capture_session: Option<Box<dyn CaptureSession>>,
    targets: Vec<SurfaceTarget>,
    history: VecDeque<SessionState>,
    last_error: Option<CameraError>,
}

impl SessionCore {
    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(
            "Camera {} session state {} -> {}",
            self.camera_label(),
            self.state,
            state
        );
        self.state = state;
        if self.history.len() == STATE_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(state);
    }

    fn camera_label(&self) -> &str {
        self.camera_id.as_deref().unwrap_or("-")
    }
}

impl CameraSession {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        permissions: Arc<dyn PermissionCollaborator>,
        close_timeout: Duration,
    ) -> Self {
        let (tx, rx) = channel::unbounded();
        let mut history = VecDeque::with_capacity(STATE_HISTORY_LIMIT);
        history.push_back(SessionState::Closed);

        Self {
            inner: Arc::new(SessionInner {
                backend,
                permissions,
                surfaces: SurfaceRegistry::new(),
                intent: Mutex::new(CaptureIntent::default()),
                close_timeout,
                core: Mutex::new(SessionCore {
                    state: SessionState::Closed,
                    camera_id: None,
                    device: None,
                    capture_session: None,
                    targets: Vec::new(),
                    history,
                    last_error: None,
                }),
                torn_down: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                tx,
                rx: Mutex::new(Some(rx)),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Add an output. Only surfaces registered before the device opens are
    /// part of the capture session.
    pub fn register_surface(&self, surface: Arc<dyn OutputSurface>) -> bool {
        self.inner.surfaces.register(surface)
    }

    pub fn unregister_surface(&self, surface: &Arc<dyn OutputSurface>) -> bool {
        self.inner.surfaces.unregister(surface)
    }

    pub fn surface_count(&self) -> usize {
        self.inner.surfaces.len()
    }

    pub fn set_capture_intent(&self, intent: CaptureIntent) {
        *self.inner.intent.lock() = intent;
    }

    /// Select the request template by name; unknown names select `MANUAL`.
    pub fn set_capture_intent_by_name(&self, name: &str) {
        self.set_capture_intent(CaptureIntent::from_name(name));
    }

    pub fn capture_intent(&self) -> CaptureIntent {
        *self.inner.intent.lock()
    }

    /// Begin opening `camera_id`. Progress continues on the session worker;
    /// observe it through `state()`.
    pub fn open_camera(&self, camera_id: &str) -> Result<(), CameraError> {
        self.inner.open_camera(camera_id)
    }

    /// Tear down and wait (bounded) for the callback worker. Idempotent and
    /// safe to call from any thread, including the worker itself.
    pub fn close(&self) {
        self.inner.teardown(SessionEvent::CloseRequested, None);

        let worker = {
            let mut worker = self.inner.worker.lock();
            if worker.as_ref().map_or(false, Worker::is_current) {
                // Left in place so a later close() from another thread joins it.
                debug!("close() called on the session worker; not joining");
                return;
            }
            worker.take()
        };
        if let Some(worker) = worker {
            worker.join(self.inner.close_timeout);
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Open | SessionState::Configuring | SessionState::Streaming
        )
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// True once the session has been torn down for good
    pub fn is_terminated(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    pub fn camera_id(&self) -> Option<String> {
        self.inner.core.lock().camera_id.clone()
    }

    /// The failure that closed the session, if it did not close on request
    pub fn last_error(&self) -> Option<CameraError> {
        self.inner.core.lock().last_error.clone()
    }

    /// States visited so far, oldest first (bounded)
    pub fn state_history(&self) -> Vec<SessionState> {
        self.inner.core.lock().history.iter().copied().collect()
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl SessionInner {
    fn open_camera(self: &Arc<Self>, camera_id: &str) -> Result<(), CameraError> {
        if !self.permissions.is_granted() {
            warn!("Camera permission not granted; not opening camera {}", camera_id);
            return Err(CameraError::PermissionDenied);
        }

        let generation = {
            let mut core = self.core.lock();
            if self.torn_down.load(Ordering::Acquire) {
                return Err(CameraError::SessionClosed);
            }

            match transition(core.state, &SessionEvent::OpenRequested) {
                (next, SessionAction::OpenDevice) => {
                    core.camera_id = Some(camera_id.to_string());
                    core.set_state(next);
                }
                _ => {
                    warn!(
                        "Camera {} already {}; ignoring open request for {}",
                        core.camera_label(),
                        core.state,
                        camera_id
                    );
                    return Ok(());
                }
            }
            self.generation.fetch_add(1, Ordering::AcqRel) + 1
        };

        if let Err(e) = self.ensure_worker(camera_id) {
            error!("Failed to start worker for camera {}: {}", camera_id, e);
            let error = CameraError::DeviceOpen {
                camera_id: camera_id.to_string(),
                details: format!("worker thread: {}", e),
            };
            self.teardown(SessionEvent::OpenFailed, Some(error.clone()));
            return Err(error);
        }

        info!("Opening camera {}", camera_id);
        let callbacks = CameraCallbacks::new(generation, self.tx.clone());
        if let Err(e) = self.backend.open_device(camera_id, callbacks) {
            error!("Failed to open camera {}: {}", camera_id, e);
            self.teardown(SessionEvent::OpenFailed, Some(e.clone()));
            return Err(e);
        }
        Ok(())
    }

    fn ensure_worker(self: &Arc<Self>, camera_id: &str) -> std::io::Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let Some(rx) = self.rx.lock().take() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "callback channel already consumed",
            ));
        };

        let inner = Arc::clone(self);
        *worker = Some(Worker::spawn(format!("camera-{}", camera_id), move || {
            inner.run(rx)
        })?);
        Ok(())
    }

    fn run(&self, rx: Receiver<WorkerMessage>) {
        debug!("Session worker started");
        while let Ok(message) = rx.recv() {
            match message {
                WorkerMessage::Device { generation, event } => self.handle(generation, event),
                WorkerMessage::Shutdown => break,
            }
            if self.torn_down.load(Ordering::Acquire) {
                break;
            }
        }

        // Handles still queued belong to nobody now.
        for message in rx.try_iter() {
            if let WorkerMessage::Device { event, .. } = message {
                event.release();
            }
        }
        debug!("Session worker stopped");
    }

    fn handle(&self, generation: u64, event: DeviceEvent) {
        if generation != self.generation.load(Ordering::Acquire) {
            debug!(
                "Ignoring stale camera event {:?} (generation {})",
                event, generation
            );
            event.release();
            return;
        }

        let camera_id = self.core.lock().camera_label().to_string();
        match event {
            DeviceEvent::Opened(device) => self.on_opened(generation, device),
            DeviceEvent::Configured(session) => self.on_configured(session),
            DeviceEvent::OpenFailed { details } => {
                error!("Camera open failed: {}", details);
                self.teardown(
                    SessionEvent::OpenFailed,
                    Some(CameraError::DeviceOpen { camera_id, details }),
                );
            }
            DeviceEvent::Disconnected => {
                warn!("Camera disconnected unexpectedly");
                self.teardown(
                    SessionEvent::Disconnected,
                    Some(CameraError::Disconnected { camera_id }),
                );
            }
            DeviceEvent::Error { code } => {
                error!("Camera encountered an error (code: {})", code);
                self.teardown(
                    SessionEvent::Error(code),
                    Some(CameraError::Device { camera_id, code }),
                );
            }
            DeviceEvent::ConfigureFailed { details } => {
                error!("Failed to configure capture session: {}", details);
                self.teardown(
                    SessionEvent::ConfigureFailed,
                    Some(CameraError::SessionConfiguration { camera_id, details }),
                );
            }
        }
    }

    fn on_opened(&self, generation: u64, device: Box<dyn CameraDevice>) {
        let snapshot = self.surfaces.snapshot();
        let targets: Vec<SurfaceTarget> = snapshot.iter().map(|s| s.target()).collect();
        let camera_id = self.core.lock().camera_label().to_string();

        let result = {
            let mut core = self.core.lock();
            let (next, action) = transition(core.state, &SessionEvent::Opened);
            if action != SessionAction::Configure {
                drop(core);
                DeviceEvent::Opened(device).release();
                return;
            }

            info!("Camera {} opened", device.id());
            core.device = Some(device);
            core.set_state(next);

            if targets.is_empty() {
                warn!(
                    "No output surfaces registered; closing camera {}",
                    core.camera_label()
                );
                None
            } else {
                let (next, _) = transition(core.state, &SessionEvent::ConfigureStarted);
                core.set_state(next);
                core.targets = targets.clone();
                debug!(
                    "Creating capture session for camera {} with {} outputs",
                    core.camera_label(),
                    targets.len()
                );
                let callbacks = CameraCallbacks::new(generation, self.tx.clone());
                core.device
                    .as_mut()
                    .map(|device| device.create_capture_session(&targets, callbacks))
            }
        };

        match result {
            None => {
                self.teardown(
                    SessionEvent::EmptyOutputs,
                    Some(CameraError::EmptyOutputSet { camera_id }),
                );
            }
            Some(Err(e)) => {
                error!("Exception during capture session creation: {}", e);
                self.teardown(SessionEvent::ConfigureFailed, Some(e));
            }
            Some(Ok(())) => {}
        }
    }

    fn on_configured(&self, mut session: Box<dyn CaptureSession>) {
        let intent = *self.intent.lock();
        let failure = {
            let mut core = self.core.lock();
            let (_, action) = transition(core.state, &SessionEvent::Configured);
            if action != SessionAction::StartRepeating {
                drop(core);
                session.close();
                return;
            }

            info!("Capture session configured for camera {}", core.camera_label());
            let request = CaptureRequest {
                intent,
                targets: core.targets.clone(),
            };
            let result = session.set_repeating_request(request);
            core.capture_session = Some(session);

            match result {
                Ok(()) => {
                    let (next, _) = transition(core.state, &SessionEvent::RequestStarted);
                    core.set_state(next);
                    info!(
                        "Repeating {} request started for camera {}",
                        intent,
                        core.camera_label()
                    );
                    None
                }
                Err(e) => {
                    error!("Failed to start repeating request: {}", e);
                    Some(e)
                }
            }
        };

        if let Some(e) = failure {
            self.teardown(SessionEvent::RequestFailed, Some(e));
        }
    }

    /// Release everything exactly once. Returns false if there was nothing
    /// to release: already torn down, or never opened.
    fn teardown(&self, reason: SessionEvent, error: Option<CameraError>) -> bool {
        let (capture_session, device, camera) = {
            let mut core = self.core.lock();
            let (next, action) = transition(core.state, &reason);
            if action == SessionAction::Ignore {
                return false;
            }
            if self.torn_down.swap(true, Ordering::AcqRel) {
                return false;
            }

            core.set_state(next);
            if error.is_some() {
                core.last_error = error;
            }
            self.generation.fetch_add(1, Ordering::AcqRel);
            core.targets.clear();
            (
                core.capture_session.take(),
                core.device.take(),
                core.camera_label().to_string(),
            )
        };

        info!("Closing camera {} ({:?})", camera, reason);
        let _ = self.tx.send(WorkerMessage::Shutdown);

        if let Some(mut capture_session) = capture_session {
            capture_session.close();
        }
        if let Some(mut device) = device {
            device.close();
        }

        for surface in self.surfaces.snapshot() {
            surface.close();
        }

        info!("Camera {} resources released", camera);
        true
    }
}
