use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Capture request template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureIntent {
    Preview,
    #[default]
    StillCapture,
    Record,
    VideoSnapshot,
    ZeroShutterLag,
    Manual,
}

impl CaptureIntent {
    /// Case-insensitive lookup; anything unrecognized selects `Manual`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "PREVIEW" => CaptureIntent::Preview,
            "STILL_CAPTURE" => CaptureIntent::StillCapture,
            "RECORD" => CaptureIntent::Record,
            "VIDEO_SNAPSHOT" => CaptureIntent::VideoSnapshot,
            "ZERO_SHUTTER_LAG" => CaptureIntent::ZeroShutterLag,
            "MANUAL" => CaptureIntent::Manual,
            other => {
                warn!("Unknown capture intent '{}', using MANUAL", other);
                CaptureIntent::Manual
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CaptureIntent::Preview => "PREVIEW",
            CaptureIntent::StillCapture => "STILL_CAPTURE",
            CaptureIntent::Record => "RECORD",
            CaptureIntent::VideoSnapshot => "VIDEO_SNAPSHOT",
            CaptureIntent::ZeroShutterLag => "ZERO_SHUTTER_LAG",
            CaptureIntent::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for CaptureIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
