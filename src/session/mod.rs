//! Per-camera session lifecycle.

mod core;
mod intent;
mod state;

pub use self::core::{CameraSession, DEFAULT_CLOSE_TIMEOUT};
pub use intent::CaptureIntent;
pub use state::{transition, SessionAction, SessionEvent, SessionState};
