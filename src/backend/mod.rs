//! Camera hardware seam.
//!
//! A backend opens devices and creates capture sessions; results arrive
//! asynchronously through [`CameraCallbacks`], which forward them to the
//! owning session's worker thread.

mod simulated;

pub use simulated::{FaultPlan, SimulatedBackend, SimulatedStats};

use crate::error::CameraError;
use crate::session::CaptureIntent;
use crate::surface::SurfaceTarget;
use crossbeam::channel::Sender;
use std::fmt;
use tracing::{debug, warn};

/// Opens camera devices.
pub trait CameraBackend: Send + Sync {
    /// Start opening `camera_id`. An `Err` means the request was rejected
    /// outright; otherwise exactly one of `on_opened`, `on_open_failed` or
    /// `on_error` follows on `callbacks`.
    fn open_device(&self, camera_id: &str, callbacks: CameraCallbacks) -> Result<(), CameraError>;
}

/// Exclusive handle to one opened device.
pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    /// Start configuring a capture session over `targets`. The outcome is
    /// reported through `on_configured` or `on_configure_failed`.
    fn create_capture_session(
        &mut self,
        targets: &[SurfaceTarget],
        callbacks: CameraCallbacks,
    ) -> Result<(), CameraError>;

    fn close(&mut self);
}

/// A configured capture session on an open device.
pub trait CaptureSession: Send {
    fn set_repeating_request(&mut self, request: CaptureRequest) -> Result<(), CameraError>;

    fn close(&mut self);
}

/// A repeating request: which surfaces to fill, with which template.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub intent: CaptureIntent,
    pub targets: Vec<SurfaceTarget>,
}

/// Asynchronous results reported by a backend.
pub enum DeviceEvent {
    Opened(Box<dyn CameraDevice>),
    OpenFailed { details: String },
    Disconnected,
    Error { code: i32 },
    Configured(Box<dyn CaptureSession>),
    ConfigureFailed { details: String },
}

impl DeviceEvent {
    pub(crate) fn release(self) {
        match self {
            DeviceEvent::Opened(mut device) => {
                debug!("Closing device {} from undeliverable event", device.id());
                device.close();
            }
            DeviceEvent::Configured(mut session) => session.close(),
            _ => {}
        }
    }
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            DeviceEvent::OpenFailed { details } => write!(f, "OpenFailed({})", details),
            DeviceEvent::Disconnected => f.write_str("Disconnected"),
            DeviceEvent::Error { code } => write!(f, "Error({})", code),
            DeviceEvent::Configured(_) => f.write_str("Configured"),
            DeviceEvent::ConfigureFailed { details } => write!(f, "ConfigureFailed({})", details),
        }
    }
}

/// Messages consumed by a session worker
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Device { generation: u64, event: DeviceEvent },
    Shutdown,
}

/// Callback sink handed to a backend for one open attempt.
#[derive(Clone)]
pub struct CameraCallbacks {
    generation: u64,
    tx: Sender<WorkerMessage>,
}

impl CameraCallbacks {
    pub(crate) fn new(generation: u64, tx: Sender<WorkerMessage>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn on_opened(&self, device: Box<dyn CameraDevice>) {
        self.send(DeviceEvent::Opened(device));
    }

    pub fn on_open_failed(&self, details: impl Into<String>) {
        self.send(DeviceEvent::OpenFailed {
            details: details.into(),
        });
    }

    pub fn on_disconnected(&self) {
        self.send(DeviceEvent::Disconnected);
    }

    pub fn on_error(&self, code: i32) {
        self.send(DeviceEvent::Error { code });
    }

    pub fn on_configured(&self, session: Box<dyn CaptureSession>) {
        self.send(DeviceEvent::Configured(session));
    }

    pub fn on_configure_failed(&self, details: impl Into<String>) {
        self.send(DeviceEvent::ConfigureFailed {
            details: details.into(),
        });
    }

    fn send(&self, event: DeviceEvent) {
        let message = WorkerMessage::Device {
            generation: self.generation,
            event,
        };
        if let Err(err) = self.tx.send(message) {
            warn!(
                "Session worker gone; dropping camera callback (generation {})",
                self.generation
            );
            if let WorkerMessage::Device { event, .. } = err.into_inner() {
                event.release();
            }
        }
    }
}

impl fmt::Debug for CameraCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraCallbacks")
            .field("generation", &self.generation)
            .finish()
    }
}
