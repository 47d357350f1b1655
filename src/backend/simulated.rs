use super::{CameraBackend, CameraCallbacks, CameraDevice, CaptureRequest, CaptureSession};
use crate::error::{CameraError, PasscamError, Result};
use crate::frame::SensorFrame;
use crate::metadata::{
    CameraMetadata, HardwareLevel, IntRect, IntSize, Intrinsics, LensFacing, MetadataProvider,
    Pose, Sensor,
};
use crate::session::CaptureIntent;
use crate::surface::SurfaceTarget;
use crate::timeline::Clock;
use crate::worker::Worker;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const DEFAULT_RESOLUTION: (u32, u32) = (640, 480);

/// Failures to inject into the next operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Report a device error instead of opening
    pub fail_open: bool,
    /// Error code reported when `fail_open` is set
    pub open_error_code: i32,
    /// Report a configuration failure instead of configuring
    pub fail_configure: bool,
    /// Reject repeating requests
    pub fail_repeating_request: bool,
}

/// Counters describing what the backend has been asked to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStats {
    pub opens: u64,
    pub device_closes: u64,
    pub session_closes: u64,
    pub repeating_requests: u64,
    pub frames_delivered: u64,
    pub last_intent: Option<CaptureIntent>,
}

#[derive(Default)]
struct Counters {
    opens: AtomicU64,
    device_closes: AtomicU64,
    session_closes: AtomicU64,
    repeating_requests: AtomicU64,
    frames_delivered: AtomicU64,
}

struct SimCamera {
    metadata: CameraMetadata,
    width: u32,
    height: u32,
    pattern: Arc<[u8]>,
    active: Option<ActiveDevice>,
}

struct ActiveDevice {
    token: u64,
    callbacks: CameraCallbacks,
    session_token: Option<u64>,
    targets: Vec<SurfaceTarget>,
    streaming: bool,
}

struct Shared {
    cameras: Mutex<BTreeMap<String, SimCamera>>,
    faults: Mutex<FaultPlan>,
    counters: Counters,
    last_intent: Mutex<Option<CaptureIntent>>,
    next_token: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    fn deliver_frame(&self, camera_id: &str, timestamp_ns: i64) -> usize {
        let (targets, frame) = {
            let cameras = self.cameras.lock();
            let Some(camera) = cameras.get(camera_id) else {
                return 0;
            };
            match &camera.active {
                Some(active) if active.streaming => (
                    active.targets.clone(),
                    SensorFrame::from_nv12(camera.width, camera.height, timestamp_ns, &camera.pattern),
                ),
                _ => return 0,
            }
        };

        for target in &targets {
            target.deliver(frame.clone());
        }
        self.counters.frames_delivered.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Delivered frame {} from camera {} to {} targets",
            timestamp_ns,
            camera_id,
            targets.len()
        );
        targets.len()
    }

    fn streaming_ids(&self) -> Vec<String> {
        self.cameras
            .lock()
            .iter()
            .filter(|(_, c)| c.active.as_ref().map_or(false, |a| a.streaming))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn active_callbacks(&self, camera_id: &str) -> Option<CameraCallbacks> {
        self.cameras
            .lock()
            .get(camera_id)
            .and_then(|c| c.active.as_ref())
            .map(|a| a.callbacks.clone())
    }
}

struct FrameGenerator {
    stop: Arc<AtomicBool>,
    worker: Worker,
}

/// In-process camera backend producing synthetic NV12 frames.
///
/// Frames are produced either on demand via [`SimulatedBackend::deliver_frame`]
/// or by a generator thread at the configured rate.
pub struct SimulatedBackend {
    shared: Arc<Shared>,
    fps: u32,
    generator: Mutex<Option<FrameGenerator>>,
}

impl SimulatedBackend {
    pub fn new(cameras: Vec<CameraMetadata>, clock: Arc<dyn Clock>, fps: u32) -> Self {
        let cameras = cameras
            .into_iter()
            .map(|metadata| {
                let (width, height) = metadata
                    .pixel_array_size()
                    .map(|s| (s.width, s.height))
                    .unwrap_or(DEFAULT_RESOLUTION);
                let pattern = gradient_nv12(width, height);
                (
                    metadata.camera_id.clone(),
                    SimCamera {
                        metadata,
                        width,
                        height,
                        pattern,
                        active: None,
                    },
                )
            })
            .collect();

        Self {
            shared: Arc::new(Shared {
                cameras: Mutex::new(cameras),
                faults: Mutex::new(FaultPlan::default()),
                counters: Counters::default(),
                last_intent: Mutex::new(None),
                next_token: AtomicU64::new(1),
                clock,
            }),
            fps,
            generator: Mutex::new(None),
        }
    }

    /// A headset-like rig: passthrough cameras "50" (left) and "51" (right)
    /// plus a non-passthrough camera "1".
    pub fn stereo(width: u32, height: u32, clock: Arc<dyn Clock>, fps: u32) -> Self {
        let cameras = vec![
            simulated_metadata("1", Some(1), None, width, height),
            simulated_metadata("50", Some(0), Some(0), width, height),
            simulated_metadata("51", Some(0), Some(1), width, height),
        ];
        Self::new(cameras, clock, fps)
    }

    pub fn set_fault_plan(&self, plan: FaultPlan) {
        debug!("Simulated fault plan set: {:?}", plan);
        *self.shared.faults.lock() = plan;
    }

    /// Push one frame to every target of a streaming camera. Returns the
    /// number of targets reached.
    pub fn deliver_frame(&self, camera_id: &str, timestamp_ns: i64) -> usize {
        self.shared.deliver_frame(camera_id, timestamp_ns)
    }

    /// Report an unexpected disconnect for an open camera.
    pub fn disconnect(&self, camera_id: &str) -> bool {
        match self.shared.active_callbacks(camera_id) {
            Some(callbacks) => {
                info!("Simulating disconnect of camera {}", camera_id);
                callbacks.on_disconnected();
                true
            }
            None => false,
        }
    }

    /// Report a device error for an open camera.
    pub fn raise_error(&self, camera_id: &str, code: i32) -> bool {
        match self.shared.active_callbacks(camera_id) {
            Some(callbacks) => {
                info!("Simulating error {} on camera {}", code, camera_id);
                callbacks.on_error(code);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self, camera_id: &str) -> bool {
        self.shared
            .cameras
            .lock()
            .get(camera_id)
            .map_or(false, |c| c.active.is_some())
    }

    pub fn is_streaming(&self, camera_id: &str) -> bool {
        self.shared.streaming_ids().iter().any(|id| id == camera_id)
    }

    pub fn stats(&self) -> SimulatedStats {
        let counters = &self.shared.counters;
        SimulatedStats {
            opens: counters.opens.load(Ordering::Relaxed),
            device_closes: counters.device_closes.load(Ordering::Relaxed),
            session_closes: counters.session_closes.load(Ordering::Relaxed),
            repeating_requests: counters.repeating_requests.load(Ordering::Relaxed),
            frames_delivered: counters.frames_delivered.load(Ordering::Relaxed),
            last_intent: *self.shared.last_intent.lock(),
        }
    }

    /// Start producing frames for every streaming camera at the configured
    /// rate. A rate of zero leaves frame delivery to the caller.
    pub fn start_frame_generator(&self) -> Result<()> {
        if self.fps == 0 {
            debug!("Simulated frame rate is 0; frames are delivered manually");
            return Ok(());
        }

        let mut generator = self.generator.lock();
        if generator.is_some() {
            warn!("Simulated frame generator already running");
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_secs(1) / self.fps;
        let shared = Arc::clone(&self.shared);
        let stop_flag = Arc::clone(&stop);

        let worker = Worker::spawn("sim-frames", move || {
            while !stop_flag.load(Ordering::Acquire) {
                std::thread::sleep(interval);
                let timestamp_ns = shared.clock.monotonic_ns();
                for camera_id in shared.streaming_ids() {
                    shared.deliver_frame(&camera_id, timestamp_ns);
                }
            }
        })
        .map_err(|e| PasscamError::component("simulation", format!("Failed to spawn frame generator: {}", e)))?;

        info!("Simulated frame generator started at {} fps", self.fps);
        *generator = Some(FrameGenerator { stop, worker });
        Ok(())
    }

    pub fn stop_frame_generator(&self) {
        if let Some(generator) = self.generator.lock().take() {
            generator.stop.store(true, Ordering::Release);
            generator.worker.join(Duration::from_secs(1));
            info!("Simulated frame generator stopped");
        }
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        self.stop_frame_generator();
    }
}

impl CameraBackend for SimulatedBackend {
    fn open_device(&self, camera_id: &str, callbacks: CameraCallbacks) -> std::result::Result<(), CameraError> {
        self.shared.counters.opens.fetch_add(1, Ordering::Relaxed);
        let faults = self.shared.faults.lock().clone();

        let token = {
            let mut cameras = self.shared.cameras.lock();
            let camera = cameras.get_mut(camera_id).ok_or_else(|| CameraError::DeviceOpen {
                camera_id: camera_id.to_string(),
                details: "no such camera".to_string(),
            })?;

            if camera.active.is_some() {
                return Err(CameraError::DeviceOpen {
                    camera_id: camera_id.to_string(),
                    details: "camera in use".to_string(),
                });
            }

            if faults.fail_open {
                None
            } else {
                let token = self.shared.token();
                camera.active = Some(ActiveDevice {
                    token,
                    callbacks: callbacks.clone(),
                    session_token: None,
                    targets: Vec::new(),
                    streaming: false,
                });
                Some(token)
            }
        };

        match token {
            Some(token) => {
                debug!("Simulated camera {} opened", camera_id);
                callbacks.on_opened(Box::new(SimulatedDevice {
                    camera_id: camera_id.to_string(),
                    token,
                    closed: false,
                    shared: Arc::clone(&self.shared),
                }));
            }
            None => {
                debug!("Simulated camera {} failing open", camera_id);
                callbacks.on_error(faults.open_error_code);
            }
        }
        Ok(())
    }
}

impl MetadataProvider for SimulatedBackend {
    fn camera_ids(&self) -> Vec<String> {
        self.shared.cameras.lock().keys().cloned().collect()
    }

    fn metadata(&self, camera_id: &str) -> Option<CameraMetadata> {
        self.shared
            .cameras
            .lock()
            .get(camera_id)
            .map(|c| c.metadata.clone())
    }
}

struct SimulatedDevice {
    camera_id: String,
    token: u64,
    closed: bool,
    shared: Arc<Shared>,
}

impl CameraDevice for SimulatedDevice {
    fn id(&self) -> &str {
        &self.camera_id
    }

    fn create_capture_session(
        &mut self,
        targets: &[SurfaceTarget],
        callbacks: CameraCallbacks,
    ) -> std::result::Result<(), CameraError> {
        if self.shared.faults.lock().fail_configure {
            callbacks.on_configure_failed("simulated configuration failure");
            return Ok(());
        }

        let session_token = {
            let mut cameras = self.shared.cameras.lock();
            let active = cameras
                .get_mut(&self.camera_id)
                .and_then(|c| c.active.as_mut())
                .filter(|a| a.token == self.token)
                .ok_or_else(|| CameraError::SessionConfiguration {
                    camera_id: self.camera_id.clone(),
                    details: "device is closed".to_string(),
                })?;

            let session_token = self.shared.token();
            active.session_token = Some(session_token);
            active.targets = targets.to_vec();
            active.streaming = false;
            session_token
        };

        debug!(
            "Simulated capture session configured for camera {} with {} targets",
            self.camera_id,
            targets.len()
        );
        callbacks.on_configured(Box::new(SimulatedCaptureSession {
            camera_id: self.camera_id.clone(),
            device_token: self.token,
            session_token,
            closed: false,
            shared: Arc::clone(&self.shared),
        }));
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut cameras = self.shared.cameras.lock();
        if let Some(camera) = cameras.get_mut(&self.camera_id) {
            if camera.active.as_ref().map_or(false, |a| a.token == self.token) {
                camera.active = None;
            }
        }
        self.shared.counters.device_closes.fetch_add(1, Ordering::Relaxed);
        debug!("Simulated camera {} closed", self.camera_id);
    }
}

struct SimulatedCaptureSession {
    camera_id: String,
    device_token: u64,
    session_token: u64,
    closed: bool,
    shared: Arc<Shared>,
}

impl CaptureSession for SimulatedCaptureSession {
    fn set_repeating_request(&mut self, request: CaptureRequest) -> std::result::Result<(), CameraError> {
        if self.shared.faults.lock().fail_repeating_request {
            return Err(CameraError::RepeatingRequest {
                camera_id: self.camera_id.clone(),
                details: "simulated request failure".to_string(),
            });
        }

        let mut cameras = self.shared.cameras.lock();
        let active = cameras
            .get_mut(&self.camera_id)
            .and_then(|c| c.active.as_mut())
            .filter(|a| a.token == self.device_token && a.session_token == Some(self.session_token))
            .ok_or_else(|| CameraError::RepeatingRequest {
                camera_id: self.camera_id.clone(),
                details: "capture session is closed".to_string(),
            })?;

        active.targets = request.targets;
        active.streaming = true;
        self.shared
            .counters
            .repeating_requests
            .fetch_add(1, Ordering::Relaxed);
        *self.shared.last_intent.lock() = Some(request.intent);
        debug!(
            "Simulated camera {} streaming with {:?}",
            self.camera_id, request.intent
        );
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut cameras = self.shared.cameras.lock();
        if let Some(active) = cameras.get_mut(&self.camera_id).and_then(|c| c.active.as_mut()) {
            if active.session_token == Some(self.session_token) {
                active.session_token = None;
                active.streaming = false;
                active.targets.clear();
            }
        }
        self.shared
            .counters
            .session_closes
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Diagonal luma ramp with neutral chroma
fn gradient_nv12(width: u32, height: u32) -> Arc<[u8]> {
    let (w, h) = (width as usize, height as usize);
    let mut data = Vec::with_capacity(w * h * 3 / 2);
    for y in 0..h {
        data.extend((0..w).map(|x| ((x + y) % 256) as u8));
    }
    data.resize(w * h + (w * h) / 2, 128);
    Arc::from(data)
}

fn simulated_metadata(
    camera_id: &str,
    camera_source: Option<i32>,
    position: Option<i32>,
    width: u32,
    height: u32,
) -> CameraMetadata {
    let offset = match position {
        Some(0) => -0.032,
        Some(1) => 0.032,
        _ => 0.0,
    };
    CameraMetadata {
        camera_id: camera_id.to_string(),
        camera_source,
        camera_position_id: position,
        lens_facing: LensFacing::Back,
        hardware_level: HardwareLevel::Limited,
        pose: Some(Pose {
            translation: vec![offset, 0.0, 0.0],
            rotation: vec![0.0, 0.0, 0.0, 1.0],
            reference: Some("GYROSCOPE".to_string()),
        }),
        intrinsics: Some(Intrinsics {
            fx: width as f32 * 0.7,
            fy: width as f32 * 0.7,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
            skew: 0.0,
        }),
        distortion: Some(vec![0.0; 5]),
        sensor: Some(Sensor {
            available_focal_lengths: Some(vec![2.0]),
            physical_size: None,
            pixel_array_size: Some(IntSize { width, height }),
            active_array_size: Some(IntRect {
                top: 0,
                left: 0,
                bottom: height as i32,
                right: width as i32,
            }),
            pre_correction_active_array_size: None,
            timestamp_source: Some("REALTIME".to_string()),
        }),
    }
}
