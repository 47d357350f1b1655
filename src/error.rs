use thiserror::Error;

#[derive(Error, Debug)]
pub enum PasscamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl PasscamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures in the camera session lifecycle.
///
/// Apart from `PermissionDenied` and `SessionClosed`, every variant is handled
/// the same way by the session: log it, then tear down to `Closed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera permission not granted")]
    PermissionDenied,

    #[error("Failed to open camera {camera_id}: {details}")]
    DeviceOpen { camera_id: String, details: String },

    #[error("Failed to configure capture session for camera {camera_id}: {details}")]
    SessionConfiguration { camera_id: String, details: String },

    #[error("Failed to start repeating request for camera {camera_id}: {details}")]
    RepeatingRequest { camera_id: String, details: String },

    #[error("Camera {camera_id} disconnected")]
    Disconnected { camera_id: String },

    #[error("Camera {camera_id} reported device error (code: {code})")]
    Device { camera_id: String, code: i32 },

    #[error("No output surfaces registered for camera {camera_id}")]
    EmptyOutputSet { camera_id: String },

    #[error("Camera session has been shut down")]
    SessionClosed,
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode format descriptor: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Persistence worker is not running")]
    WorkerStopped,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame dimensions must be even and non-zero, got {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Frame too small for {width}x{height}: expected at least {expected} bytes, got {actual}")]
    InvalidSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("JPEG encoding failed: {details}")]
    JpegEncoding { details: String },
}

pub type Result<T> = std::result::Result<T, PasscamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_error_converts_into_top_level() {
        let err: PasscamError = CameraError::Device {
            camera_id: "50".to_string(),
            code: 4,
        }
        .into();

        assert!(matches!(err, PasscamError::Camera(CameraError::Device { code: 4, .. })));
        assert_eq!(
            err.to_string(),
            "Camera error: Camera 50 reported device error (code: 4)"
        );
    }

    #[test]
    fn test_helper_constructors() {
        match PasscamError::component("ingest", "queue closed") {
            PasscamError::Component { component, message } => {
                assert_eq!(component, "ingest");
                assert_eq!(message, "queue closed");
            }
            other => panic!("unexpected error: {}", other),
        }

        assert_eq!(
            PasscamError::system("boom").to_string(),
            "System error: boom"
        );
    }
}
