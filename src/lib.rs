pub mod backend;
pub mod buffer_pool;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod latch;
pub mod metadata;
pub mod permission;
pub mod rig;
pub mod session;
pub mod storage;
pub mod surface;
pub mod timeline;

mod worker;

pub use backend::{CameraBackend, CameraCallbacks, CameraDevice, CaptureRequest, CaptureSession, DeviceEvent, FaultPlan, SimulatedBackend};
pub use buffer_pool::{FrameBufferPool, FrameBufferPoolBuilder, PoolStatsSnapshot};
pub use codec::ImageCodec;
pub use config::PasscamConfig;
pub use error::{CameraError, CodecError, PasscamError, PersistenceError, Result};
pub use frame::{FormatDescriptor, PixelFormat, Plane, PooledFrame, SensorFrame};
pub use ingest::{CaptureRecord, FrameIngest, IngestConfig, IngestStats, Persistence};
pub use latch::CaptureSignal;
pub use metadata::{select_stereo_pair, CameraMetadata, CameraPosition, MetadataProvider, StereoPair};
pub use permission::{PermissionCollaborator, PermissionRequest, StaticPermissions};
pub use rig::{RigStats, StereoRig};
pub use session::{CameraSession, CaptureIntent, SessionState};
pub use storage::{write_camera_metadata, DataDirectory};
pub use surface::{FrameSink, OutputSurface, SurfaceRegistry, SurfaceTarget};
pub use timeline::{Clock, ManualClock, SystemClock, TimelineBase};
