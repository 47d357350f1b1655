//! Left/right camera pair driven as one unit.
//!
//! Each side owns a [`CameraSession`] streaming into a [`FrameIngest`]. A
//! trigger arms both ingests so the next frame from each camera is captured.

use crate::backend::CameraBackend;
use crate::config::PasscamConfig;
use crate::error::{PasscamError, Result};
use crate::ingest::{FrameIngest, IngestConfig, IngestStats};
use crate::metadata::{select_stereo_pair, CameraMetadata, CameraPosition, MetadataProvider, StereoPair};
use crate::permission::PermissionCollaborator;
use crate::session::{CameraSession, SessionState};
use crate::storage::{write_camera_metadata, DataDirectory};
use crate::timeline::Clock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One side of the rig
pub struct RigCamera {
    position: CameraPosition,
    camera_id: String,
    ingest: Arc<FrameIngest>,
    session: CameraSession,
}

impl RigCamera {
    fn start(
        position: CameraPosition,
        metadata: &CameraMetadata,
        config: &PasscamConfig,
        data_dir: &DataDirectory,
        backend: Arc<dyn CameraBackend>,
        permissions: Arc<dyn PermissionCollaborator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let size = metadata.pixel_array_size().ok_or_else(|| {
            PasscamError::component(
                "rig",
                format!("Camera {} reports no pixel array size", metadata.camera_id),
            )
        })?;

        let mut ingest_config = IngestConfig::new(
            position.as_str(),
            size.width,
            size.height,
            data_dir.camera_frame_dir(position),
            data_dir.camera_format_path(position),
        );
        ingest_config.buffer_pool_size = config.ingest.buffer_pool_size;
        ingest_config.save_frames = config.ingest.save_frames;
        ingest_config.queue_depth = config.ingest.queue_depth;
        ingest_config.close_timeout = config.close_timeout();

        let ingest = Arc::new(FrameIngest::new(ingest_config, clock)?);
        let session = CameraSession::new(backend, permissions, config.close_timeout());
        session.set_capture_intent(config.capture_intent());
        session.register_surface(ingest.clone());

        if let Err(e) = session.open_camera(&metadata.camera_id) {
            session.close();
            ingest.close();
            return Err(e.into());
        }

        debug!(
            "Opening {} camera {} at {}x{}",
            position, metadata.camera_id, size.width, size.height
        );

        Ok(Self {
            position,
            camera_id: metadata.camera_id.clone(),
            ingest,
            session,
        })
    }

    pub fn position(&self) -> CameraPosition {
        self.position
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn ingest(&self) -> &FrameIngest {
        &self.ingest
    }

    pub fn session(&self) -> &CameraSession {
        &self.session
    }

    pub fn stats(&self) -> CameraStats {
        CameraStats {
            camera_id: self.camera_id.clone(),
            state: self.session.state(),
            ingest: self.ingest.stats(),
        }
    }

    fn close(&self) {
        self.session.close();
        // The session closes its surfaces on teardown; this covers an ingest
        // that was never registered.
        self.ingest.close();
    }
}

/// Per-camera statistics snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct CameraStats {
    pub camera_id: String,
    pub state: SessionState,
    pub ingest: IngestStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RigStats {
    pub left: CameraStats,
    pub right: CameraStats,
}

pub struct StereoRig {
    pair: StereoPair,
    left: RigCamera,
    right: RigCamera,
    data_dir: Mutex<DataDirectory>,
}

impl StereoRig {
    /// Select the stereo pair, record its characteristics in `data_dir` and
    /// open both cameras.
    pub fn start(
        config: &PasscamConfig,
        data_dir: DataDirectory,
        backend: Arc<dyn CameraBackend>,
        provider: &dyn MetadataProvider,
        permissions: Arc<dyn PermissionCollaborator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let pair = select_stereo_pair(
            provider,
            config.camera.left_camera_id.as_deref(),
            config.camera.right_camera_id.as_deref(),
        )?;
        info!(
            "Stereo pair: left camera {}, right camera {}",
            pair.left.camera_id, pair.right.camera_id
        );

        write_camera_metadata(&data_dir, &pair)?;

        let left = RigCamera::start(
            CameraPosition::Left,
            &pair.left,
            config,
            &data_dir,
            Arc::clone(&backend),
            Arc::clone(&permissions),
            Arc::clone(&clock),
        )?;

        let right = match RigCamera::start(
            CameraPosition::Right,
            &pair.right,
            config,
            &data_dir,
            backend,
            permissions,
            clock,
        ) {
            Ok(right) => right,
            Err(e) => {
                error!("Failed to start right camera: {}", e);
                left.close();
                return Err(e);
            }
        };

        Ok(Self {
            pair,
            left,
            right,
            data_dir: Mutex::new(data_dir),
        })
    }

    pub fn pair(&self) -> &StereoPair {
        &self.pair
    }

    pub fn camera(&self, position: CameraPosition) -> Option<&RigCamera> {
        match position {
            CameraPosition::Left => Some(&self.left),
            CameraPosition::Right => Some(&self.right),
            CameraPosition::Unknown => None,
        }
    }

    pub fn data_dir(&self) -> DataDirectory {
        self.data_dir.lock().clone()
    }

    /// Arm both cameras to capture their next frame.
    pub fn capture_next_frame(&self) {
        self.left.ingest.arm_next_capture();
        self.right.ingest.arm_next_capture();
        debug!("Capture armed on both cameras");
    }

    pub fn reset_timeline_base(&self) {
        self.left.ingest.reset_timeline_base();
        self.right.ingest.reset_timeline_base();
    }

    pub fn latest_jpeg(&self, position: CameraPosition) -> Result<Option<Vec<u8>>> {
        match self.camera(position) {
            Some(camera) => Ok(camera.ingest.latest_jpeg()?),
            None => Ok(None),
        }
    }

    /// Move both cameras' output to `data_dir`, including fresh
    /// characteristics and format descriptors.
    pub fn redirect(&self, data_dir: DataDirectory) -> Result<()> {
        write_camera_metadata(&data_dir, &self.pair)?;
        for camera in [&self.left, &self.right] {
            camera.ingest.redirect_outputs(
                data_dir.camera_frame_dir(camera.position),
                data_dir.camera_format_path(camera.position),
            );
        }
        info!("Rig output redirected to {}", data_dir.path().display());
        *self.data_dir.lock() = data_dir;
        Ok(())
    }

    pub fn set_save_frames(&self, save_frames: bool) {
        self.left.ingest.set_save_frames(save_frames);
        self.right.ingest.set_save_frames(save_frames);
    }

    pub fn is_streaming(&self) -> bool {
        self.left.session.is_streaming() && self.right.session.is_streaming()
    }

    /// True once either session has shut down.
    pub fn is_terminated(&self) -> bool {
        self.left.session.is_terminated() || self.right.session.is_terminated()
    }

    /// Wait for queued frame writes on both cameras.
    pub fn flush(&self, timeout: Duration) -> bool {
        let left = self.left.ingest.flush(timeout);
        let right = self.right.ingest.flush(timeout);
        if !(left && right) {
            warn!("Rig flush did not complete within {:?}", timeout);
        }
        left && right
    }

    pub fn stats(&self) -> RigStats {
        RigStats {
            left: self.left.stats(),
            right: self.right.stats(),
        }
    }

    pub fn close(&self) {
        info!("Closing stereo rig");
        self.left.close();
        self.right.close();
    }
}

impl Drop for StereoRig {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::error::CameraError;
    use crate::permission::StaticPermissions;
    use crate::timeline::ManualClock;
    use std::time::Instant;
    use tempfile::TempDir;

    struct Fixture {
        base: TempDir,
        backend: Arc<SimulatedBackend>,
        rig: StereoRig,
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn start_rig(save_frames: bool) -> Fixture {
        let base = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0, 1_000));
        let backend = Arc::new(SimulatedBackend::stereo(8, 4, clock.clone(), 0));
        let mut config = PasscamConfig::default();
        config.ingest.save_frames = save_frames;
        config.ingest.buffer_pool_size = 3;

        let data_dir = DataDirectory::create(base.path(), Some("run")).unwrap();
        let rig = StereoRig::start(
            &config,
            data_dir,
            backend.clone(),
            backend.as_ref(),
            StaticPermissions::new(true),
            clock,
        )
        .unwrap();
        assert!(wait_until(|| rig.is_streaming()));

        Fixture {
            base,
            backend,
            rig,
        }
    }

    fn deliver_both(fixture: &Fixture, timestamp_ns: i64) {
        let before = fixture.rig.stats();
        let processed = |s: &CameraStats| s.ingest.captured + s.ingest.discarded;
        assert_eq!(fixture.backend.deliver_frame("50", timestamp_ns), 1);
        assert_eq!(fixture.backend.deliver_frame("51", timestamp_ns), 1);
        assert!(wait_until(|| {
            let now = fixture.rig.stats();
            processed(&now.left) > processed(&before.left)
                && processed(&now.right) > processed(&before.right)
        }));
    }

    #[test]
    fn test_trigger_captures_one_frame_per_camera() {
        let fixture = start_rig(true);
        let rig = &fixture.rig;
        assert_eq!(rig.pair().left.camera_id, "50");
        assert_eq!(rig.pair().right.camera_id, "51");

        rig.capture_next_frame();
        deliver_both(&fixture, 5_000_000);
        deliver_both(&fixture, 6_000_000);
        assert!(rig.flush(Duration::from_secs(5)));

        let dir = rig.data_dir();
        for side in ["left_camera", "right_camera"] {
            let names: Vec<_> = std::fs::read_dir(dir.file(side))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            assert_eq!(names, vec!["1005.yuv"]);
        }
        assert!(dir.file("left_camera_image_format.json").exists());
        assert!(dir.file("right_camera_characteristic.json").exists());

        let stats = rig.stats();
        assert_eq!(stats.left.state, SessionState::Streaming);
        assert_eq!(stats.left.ingest.captured, 1);
        assert_eq!(stats.right.ingest.discarded, 1);
    }

    #[test]
    fn test_latest_jpeg_per_position() {
        let fixture = start_rig(false);
        let rig = &fixture.rig;
        assert!(rig.latest_jpeg(CameraPosition::Left).unwrap().is_none());

        rig.capture_next_frame();
        deliver_both(&fixture, 1_000_000);

        let jpeg = rig.latest_jpeg(CameraPosition::Right).unwrap().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(rig.latest_jpeg(CameraPosition::Unknown).unwrap().is_none());
    }

    #[test]
    fn test_redirect_moves_output() {
        let fixture = start_rig(true);
        let rig = &fixture.rig;

        let second = DataDirectory::create(fixture.base.path(), Some("second")).unwrap();
        rig.redirect(second.clone()).unwrap();
        assert_eq!(rig.data_dir().path(), second.path());

        rig.capture_next_frame();
        deliver_both(&fixture, 2_000_000);
        assert!(rig.flush(Duration::from_secs(5)));

        assert!(second.file("left_camera/1002.yuv").exists());
        assert!(second.file("left_camera_characteristic.json").exists());
        assert!(second.file("right_camera_image_format.json").exists());
    }

    #[test]
    fn test_close_tears_down_both_cameras() {
        let fixture = start_rig(false);
        fixture.rig.close();

        assert!(fixture.rig.is_terminated());
        assert!(!fixture.backend.is_open("50"));
        assert!(!fixture.backend.is_open("51"));
        assert!(fixture.rig.camera(CameraPosition::Left).unwrap().ingest().is_closed());

        fixture.rig.close();
        assert_eq!(fixture.backend.stats().device_closes, 2);
    }

    #[test]
    fn test_permission_denied_fails_start() {
        let base = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0, 0));
        let backend = Arc::new(SimulatedBackend::stereo(8, 4, clock.clone(), 0));
        let data_dir = DataDirectory::create(base.path(), Some("run")).unwrap();

        let result = StereoRig::start(
            &PasscamConfig::default(),
            data_dir,
            backend.clone(),
            backend.as_ref(),
            StaticPermissions::new(false),
            clock,
        );

        assert!(matches!(
            result,
            Err(PasscamError::Camera(CameraError::PermissionDenied))
        ));
        assert_eq!(backend.stats().opens, 0);
    }
}
