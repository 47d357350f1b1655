use crate::timeline::TimelineBase;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Pixel format tags reported by the sensor pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Flexible 4:2:0 YUV; with pixel stride 2 the chroma plane is NV12 interleaved
    Yuv420_888,
    /// 4:2:0 semi-planar with VU interleaving
    Nv21,
    /// Compressed JPEG
    Jpeg,
    /// Flexible 4:2:2 YUV
    Yuv422_888,
    /// Bayer sensor data, 16 bits per pixel
    RawSensor,
    /// Packed RGB 5-6-5
    Rgb565,
    /// A tag this crate does not know about
    Unknown(i32),
}

impl PixelFormat {
    /// Bytes needed for one decoded frame of the given size.
    ///
    /// Compressed and unknown formats fall back to the 4:2:0 size, which is
    /// only used as an initial pool allocation hint.
    pub fn frame_bytes(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Yuv422_888 | PixelFormat::RawSensor | PixelFormat::Rgb565 => pixels * 2,
            PixelFormat::Yuv420_888
            | PixelFormat::Nv21
            | PixelFormat::Jpeg
            | PixelFormat::Unknown(_) => pixels + pixels / 2,
        }
    }

    pub fn tag(&self) -> String {
        self.to_string()
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "YUV_420_888" => PixelFormat::Yuv420_888,
            "NV21" => PixelFormat::Nv21,
            "JPEG" => PixelFormat::Jpeg,
            "YUV_422_888" => PixelFormat::Yuv422_888,
            "RAW_SENSOR" => PixelFormat::RawSensor,
            "RGB_565" => PixelFormat::Rgb565,
            other => {
                let code = other
                    .strip_prefix("UNKNOWN(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|code| code.parse().ok())
                    .unwrap_or(-1);
                PixelFormat::Unknown(code)
            }
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Yuv420_888 => f.write_str("YUV_420_888"),
            PixelFormat::Nv21 => f.write_str("NV21"),
            PixelFormat::Jpeg => f.write_str("JPEG"),
            PixelFormat::Yuv422_888 => f.write_str("YUV_422_888"),
            PixelFormat::RawSensor => f.write_str("RAW_SENSOR"),
            PixelFormat::Rgb565 => f.write_str("RGB_565"),
            PixelFormat::Unknown(code) => write!(f, "UNKNOWN({})", code),
        }
    }
}

impl Serialize for PixelFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PixelFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(PixelFormat::from_tag(&tag))
    }
}

/// One plane of a sensor frame
#[derive(Debug, Clone)]
pub struct Plane {
    /// Plane bytes (shared so a frame can fan out to several surfaces)
    pub data: Arc<[u8]>,
    pub row_stride: u32,
    pub pixel_stride: u32,
}

/// A raw frame as delivered by the sensor to an output surface
#[derive(Debug, Clone)]
pub struct SensorFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Sensor timestamp in monotonic nanoseconds
    pub timestamp_ns: i64,
    pub planes: Vec<Plane>,
}

impl SensorFrame {
    /// Build a `YUV_420_888` frame from contiguous NV12 bytes: a luma plane
    /// followed by an interleaved UV plane with pixel stride 2.
    pub fn from_nv12(width: u32, height: u32, timestamp_ns: i64, nv12: &[u8]) -> Self {
        let luma_len = (width as usize * height as usize).min(nv12.len());
        let (luma, chroma) = nv12.split_at(luma_len);
        Self {
            width,
            height,
            format: PixelFormat::Yuv420_888,
            timestamp_ns,
            planes: vec![
                Plane {
                    data: Arc::from(luma),
                    row_stride: width,
                    pixel_stride: 1,
                },
                Plane {
                    data: Arc::from(chroma),
                    row_stride: width,
                    pixel_stride: 2,
                },
            ],
        }
    }

    /// Total bytes across all planes
    pub fn byte_len(&self) -> usize {
        self.planes.iter().map(|p| p.data.len()).sum()
    }
}

/// Layout of one plane as recorded in the format descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneLayout {
    pub row_stride: u32,
    pub pixel_stride: u32,
    pub buffer_size: usize,
}

/// Per-session description of the raw frames written to storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<PlaneLayout>,
    pub timeline_base: TimelineBase,
}

impl FormatDescriptor {
    pub fn from_frame(frame: &SensorFrame, timeline_base: TimelineBase) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            format: frame.format,
            planes: frame
                .planes
                .iter()
                .map(|plane| PlaneLayout {
                    row_stride: plane.row_stride,
                    pixel_stride: plane.pixel_stride,
                    buffer_size: plane.data.len(),
                })
                .collect(),
            timeline_base,
        }
    }

    /// Size of one raw frame dump described by this descriptor
    pub fn frame_bytes(&self) -> usize {
        self.planes.iter().map(|p| p.buffer_size).sum()
    }
}

/// A copy of one pooled frame handed out to readers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledFrame {
    /// Pool slot the copy was taken from
    pub slot: usize,
    /// Derived wall-clock timestamp in milliseconds
    pub timestamp_ms: i64,
    pub data: Vec<u8>,
}
