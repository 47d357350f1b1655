use super::*;
use crate::error::PersistenceError;
use crate::frame::{FormatDescriptor, PixelFormat, SensorFrame};
use crate::surface::OutputSurface;
use crate::timeline::{ManualClock, TimelineBase};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const WIDTH: u32 = 8;
const HEIGHT: u32 = 4;

fn config(dir: &Path, pool_size: usize, save_frames: bool) -> IngestConfig {
    let mut config = IngestConfig::new(
        "test",
        WIDTH,
        HEIGHT,
        dir.join("left_camera"),
        dir.join("left_camera_image_format.json"),
    );
    config.buffer_pool_size = pool_size;
    config.save_frames = save_frames;
    config
}

fn frame_at_ms(ms: i64, fill: u8) -> SensorFrame {
    let data = vec![fill; (WIDTH * HEIGHT * 3 / 2) as usize];
    SensorFrame::from_nv12(WIDTH, HEIGHT, ms * 1_000_000, &data)
}

fn yuv_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
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

#[test]
fn test_only_armed_frames_are_written() {
    let dir = TempDir::new().unwrap();
    let ingest = FrameIngest::new(config(dir.path(), 3, true), Arc::new(ManualClock::new(0, 0))).unwrap();

    let mut records = Vec::new();
    for (i, ms) in [100, 101, 102, 103].into_iter().enumerate() {
        if i == 0 || i == 2 {
            ingest.arm_next_capture();
        }
        records.push(ingest.on_frame(&frame_at_ms(ms, i as u8)));
    }

    assert_eq!(
        records,
        vec![
            Some(CaptureRecord { slot: 1, timestamp_ms: 100 }),
            None,
            Some(CaptureRecord { slot: 2, timestamp_ms: 102 }),
            None,
        ]
    );
    assert!(ingest.flush(Duration::from_secs(5)));
    assert_eq!(
        yuv_files(&dir.path().join("left_camera")),
        vec!["100.yuv", "102.yuv"]
    );

    let written = std::fs::read(dir.path().join("left_camera/102.yuv")).unwrap();
    assert_eq!(written.len(), (WIDTH * HEIGHT * 3 / 2) as usize);
    assert!(written.iter().all(|&b| b == 2));

    let stats = ingest.stats();
    assert_eq!(stats.captured, 2);
    assert_eq!(stats.discarded, 2);
    assert_eq!(stats.persistence.frame_writes, 2);
    assert_eq!(stats.persistence.format_writes, 1);
}

#[test]
fn test_latest_index_cycles_through_pool() {
    let dir = TempDir::new().unwrap();
    let ingest = FrameIngest::new(config(dir.path(), 3, false), Arc::new(ManualClock::new(0, 0))).unwrap();

    let mut slots = Vec::new();
    for ms in 0..4 {
        ingest.arm_next_capture();
        slots.push(ingest.on_frame(&frame_at_ms(ms, ms as u8)).unwrap().slot);
        assert_eq!(ingest.latest_index(), *slots.last().unwrap());
    }

    assert_eq!(slots, vec![1, 2, 0, 1]);
    assert_eq!(ingest.latest_frame().unwrap().data[0], 3);
}

#[test]
fn test_unarmed_frames_leave_pool_untouched() {
    let dir = TempDir::new().unwrap();
    let ingest = FrameIngest::new(config(dir.path(), 3, true), Arc::new(ManualClock::new(0, 0))).unwrap();

    for ms in 0..5 {
        assert!(ingest.on_frame(&frame_at_ms(ms, 1)).is_none());
    }

    assert!(ingest.latest_frame().is_none());
    assert_eq!(ingest.stats().pool.frames_published, 0);
    assert_eq!(ingest.stats().discarded, 5);

    // The descriptor is still derived from the first frame.
    assert!(ingest.flush(Duration::from_secs(5)));
    assert!(dir.path().join("left_camera_image_format.json").exists());
    assert!(yuv_files(&dir.path().join("left_camera")).is_empty());
}

#[test]
fn test_double_arming_captures_once() {
    let dir = TempDir::new().unwrap();
    let ingest = FrameIngest::new(config(dir.path(), 3, false), Arc::new(ManualClock::new(0, 0))).unwrap();

    ingest.arm_next_capture();
    ingest.arm_next_capture();
    assert!(ingest.is_capture_armed());

    assert!(ingest.on_frame(&frame_at_ms(1, 1)).is_some());
    assert!(ingest.on_frame(&frame_at_ms(2, 2)).is_none());
    assert_eq!(ingest.stats().captured, 1);
}

#[test]
fn test_timeline_reset_between_frames() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0, 1_000));
    let ingest = FrameIngest::new(config(dir.path(), 3, false), clock.clone()).unwrap();

    ingest.arm_next_capture();
    let a = ingest.on_frame(&frame_at_ms(5, 1)).unwrap();
    assert_eq!(a.timestamp_ms, 1_005);

    let t = 1_700_000_000_000;
    clock.set(5_000_000, t);
    assert_eq!(ingest.reset_timeline_base(), TimelineBase::new(5_000_000, t));

    ingest.arm_next_capture();
    let b = ingest.on_frame(&frame_at_ms(6, 2)).unwrap();
    assert_eq!(b.timestamp_ms, t + 1);
    assert_eq!(ingest.latest_frame().unwrap().timestamp_ms, t + 1);
}

#[test]
fn test_format_descriptor_contents() {
    let dir = TempDir::new().unwrap();
    let ingest = FrameIngest::new(config(dir.path(), 3, true), Arc::new(ManualClock::new(42, 7))).unwrap();
    assert!(ingest.format_descriptor().is_none());

    ingest.on_frame(&frame_at_ms(1, 0));
    assert!(ingest.flush(Duration::from_secs(5)));

    let json = std::fs::read_to_string(dir.path().join("left_camera_image_format.json")).unwrap();
    let persisted: FormatDescriptor = serde_json::from_str(&json).unwrap();

    assert_eq!(Some(persisted.clone()), ingest.format_descriptor());
    assert_eq!(persisted.width, WIDTH);
    assert_eq!(persisted.format, PixelFormat::Yuv420_888);
    assert_eq!(persisted.planes.len(), 2);
    assert_eq!(persisted.timeline_base, TimelineBase::new(42, 7));
}

#[test]
fn test_redirect_outputs_recomputes_descriptor() {
    let dir = TempDir::new().unwrap();
    let ingest = FrameIngest::new(config(dir.path(), 3, true), Arc::new(ManualClock::new(0, 0))).unwrap();

    ingest.arm_next_capture();
    ingest.on_frame(&frame_at_ms(10, 1));

    let second = dir.path().join("second");
    ingest.redirect_outputs(second.join("frames"), second.join("format.json"));
    assert!(ingest.format_descriptor().is_none());

    ingest.arm_next_capture();
    ingest.on_frame(&frame_at_ms(20, 2));
    assert!(ingest.flush(Duration::from_secs(5)));

    assert_eq!(yuv_files(&dir.path().join("left_camera")), vec!["10.yuv"]);
    assert_eq!(yuv_files(&second.join("frames")), vec!["20.yuv"]);
    assert!(second.join("format.json").exists());
    assert_eq!(ingest.stats().persistence.format_writes, 2);
}

#[test]
fn test_save_frames_toggle() {
    let dir = TempDir::new().unwrap();
    let ingest = FrameIngest::new(config(dir.path(), 3, false), Arc::new(ManualClock::new(0, 0))).unwrap();
    assert!(!ingest.save_frames());

    ingest.arm_next_capture();
    ingest.on_frame(&frame_at_ms(1, 1));
    ingest.set_save_frames(true);
    ingest.arm_next_capture();
    ingest.on_frame(&frame_at_ms(2, 2));
    assert!(ingest.flush(Duration::from_secs(5)));

    assert_eq!(yuv_files(&dir.path().join("left_camera")), vec!["2.yuv"]);
    // The descriptor was derived while saving was off, so it is never written.
    assert!(!dir.path().join("left_camera_image_format.json").exists());
}

#[test]
fn test_write_failures_do_not_reach_ingest() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let mut config = config(dir.path(), 3, true);
    config.frame_dir = blocker.join("frames");
    let ingest = FrameIngest::new(config, Arc::new(ManualClock::new(0, 0))).unwrap();

    ingest.arm_next_capture();
    assert!(ingest.on_frame(&frame_at_ms(1, 1)).is_some());
    assert!(ingest.flush(Duration::from_secs(5)));

    let stats = ingest.stats();
    assert_eq!(stats.persistence.failed_writes, 1);
    assert_eq!(stats.persistence.frame_writes, 0);
    assert!(ingest.latest_frame().is_some());
}

#[test]
fn test_latest_jpeg() {
    let dir = TempDir::new().unwrap();
    let ingest = FrameIngest::new(config(dir.path(), 3, false), Arc::new(ManualClock::new(0, 0))).unwrap();
    assert_eq!(ingest.latest_jpeg().unwrap(), None);

    ingest.arm_next_capture();
    ingest.on_frame(&frame_at_ms(1, 128));

    let jpeg = ingest.latest_jpeg().unwrap().unwrap();
    let decoded = image::load_from_memory(&jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (WIDTH, HEIGHT));
}

#[test]
fn test_frames_through_surface_target() {
    let dir = TempDir::new().unwrap();
    let ingest = FrameIngest::new(config(dir.path(), 3, true), Arc::new(ManualClock::new(0, 0))).unwrap();
    let target = ingest.target();

    ingest.arm_next_capture();
    target.deliver(frame_at_ms(7, 9));

    assert!(wait_until(|| ingest.stats().captured == 1));
    assert!(ingest.flush(Duration::from_secs(5)));
    assert_eq!(yuv_files(&dir.path().join("left_camera")), vec!["7.yuv"]);
    assert_eq!(ingest.stats().received, 1);
}

#[test]
fn test_close_is_idempotent_and_drops_late_frames() {
    let dir = TempDir::new().unwrap();
    let ingest = FrameIngest::new(config(dir.path(), 3, true), Arc::new(ManualClock::new(0, 0))).unwrap();
    let target = ingest.target();

    ingest.close();
    ingest.close();
    assert!(ingest.is_closed());

    target.deliver(frame_at_ms(1, 1));
    let stats = ingest.stats();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.captured, 0);
}

#[test]
fn test_invalid_config_rejected() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0, 0));

    let zero_pool = config(dir.path(), 0, false);
    assert!(FrameIngest::new(zero_pool, clock.clone()).is_err());

    let mut zero_queue = config(dir.path(), 3, false);
    zero_queue.queue_depth = 0;
    assert!(FrameIngest::new(zero_queue, clock).is_err());
}

#[test]
fn test_persistence_flush_and_shutdown() {
    let dir = TempDir::new().unwrap();
    let persistence = Persistence::spawn("standalone").unwrap();

    persistence
        .write_frame(&dir.path().join("nested/frames"), 55, vec![1, 2, 3])
        .unwrap();
    assert!(persistence.flush(Duration::from_secs(5)));
    assert_eq!(
        std::fs::read(dir.path().join("nested/frames").join(frame_file_name(55))).unwrap(),
        vec![1, 2, 3]
    );

    assert!(persistence.shutdown(Duration::from_secs(5)));
    assert!(!persistence.is_running());
    assert!(matches!(
        persistence.write_frame(dir.path(), 56, vec![0]),
        Err(PersistenceError::WorkerStopped)
    ));
    assert_eq!(persistence.stats().frame_writes, 1);
    assert_eq!(persistence.stats().bytes_written, 3);
}
