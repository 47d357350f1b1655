//! Static camera characteristics and stereo pair selection.

use crate::error::{PasscamError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Vendor value of `camera_source` marking a passthrough sensor
pub const PASSTHROUGH_CAMERA_SOURCE: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraPosition {
    Left,
    Right,
    Unknown,
}

impl CameraPosition {
    pub fn from_id(id: Option<i32>) -> Self {
        match id {
            Some(0) => CameraPosition::Left,
            Some(1) => CameraPosition::Right,
            _ => CameraPosition::Unknown,
        }
    }

    /// Lowercase prefix used for on-disk names (`left_camera`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraPosition::Left => "left",
            CameraPosition::Right => "right",
            CameraPosition::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CameraPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LensFacing {
    Front,
    Back,
    External,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HardwareLevel {
    Legacy,
    Limited,
    Full,
    #[serde(rename = "LEVEL_3")]
    Level3,
    External,
    #[serde(other)]
    Unknown,
}

/// Lens pose relative to the device reference frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// x, y, z in meters
    pub translation: Vec<f32>,
    /// Quaternion x, y, z, w
    pub rotation: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub skew: f32,
}

impl Intrinsics {
    /// Parse the five-element `[fx, fy, cx, cy, skew]` calibration array.
    pub fn from_calibration(values: &[f32]) -> Option<Self> {
        match values {
            [fx, fy, cx, cy, skew, ..] => Some(Self {
                fx: *fx,
                fy: *fy,
                cx: *cx,
                cy: *cy,
                skew: *skew,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatSize {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntRect {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub available_focal_lengths: Option<Vec<f32>>,
    pub physical_size: Option<FloatSize>,
    pub pixel_array_size: Option<IntSize>,
    pub active_array_size: Option<IntRect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_correction_active_array_size: Option<IntRect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_source: Option<String>,
}

/// Immutable description of one camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraMetadata {
    pub camera_id: String,
    pub camera_source: Option<i32>,
    pub camera_position_id: Option<i32>,
    pub lens_facing: LensFacing,
    pub hardware_level: HardwareLevel,
    #[serde(default)]
    pub pose: Option<Pose>,
    #[serde(default)]
    pub intrinsics: Option<Intrinsics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distortion: Option<Vec<f32>>,
    #[serde(default)]
    pub sensor: Option<Sensor>,
}

impl CameraMetadata {
    pub fn is_passthrough_camera(&self) -> bool {
        self.camera_source == Some(PASSTHROUGH_CAMERA_SOURCE)
    }

    pub fn camera_position(&self) -> CameraPosition {
        CameraPosition::from_id(self.camera_position_id)
    }

    pub fn pixel_array_size(&self) -> Option<IntSize> {
        self.sensor.as_ref().and_then(|s| s.pixel_array_size)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Source of camera characteristics
pub trait MetadataProvider: Send + Sync {
    fn camera_ids(&self) -> Vec<String>;

    fn metadata(&self, camera_id: &str) -> Option<CameraMetadata>;
}

/// The passthrough cameras at the left and right positions
#[derive(Debug, Clone, PartialEq)]
pub struct StereoPair {
    pub left: CameraMetadata,
    pub right: CameraMetadata,
}

/// Pick the left and right passthrough cameras.
///
/// Explicit id overrides win over position-based discovery; the first
/// passthrough camera found at each position is used otherwise.
pub fn select_stereo_pair(
    provider: &dyn MetadataProvider,
    left_override: Option<&str>,
    right_override: Option<&str>,
) -> Result<StereoPair> {
    let cameras: Vec<CameraMetadata> = provider
        .camera_ids()
        .iter()
        .filter_map(|id| provider.metadata(id))
        .collect();

    debug!("Found {} cameras", cameras.len());

    let pick = |position: CameraPosition, id_override: Option<&str>| -> Result<CameraMetadata> {
        if let Some(id) = id_override {
            return cameras
                .iter()
                .find(|c| c.camera_id == id)
                .cloned()
                .ok_or_else(|| {
                    PasscamError::component("metadata", format!("Camera {} not found", id))
                });
        }

        let candidates: Vec<&CameraMetadata> = cameras
            .iter()
            .filter(|c| c.is_passthrough_camera() && c.camera_position() == position)
            .collect();

        if candidates.len() > 1 {
            warn!(
                "{} passthrough cameras at {} position; using {}",
                candidates.len(),
                position,
                candidates[0].camera_id
            );
        }

        candidates.first().map(|c| (*c).clone()).ok_or_else(|| {
            PasscamError::component(
                "metadata",
                format!("No passthrough camera at {} position", position),
            )
        })
    };

    Ok(StereoPair {
        left: pick(CameraPosition::Left, left_override)?,
        right: pick(CameraPosition::Right, right_override)?,
    })
}
