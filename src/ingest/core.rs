use super::persist::{Persistence, PersistenceStats};
use crate::buffer_pool::{FrameBufferPool, FrameBufferPoolBuilder, PoolStatsSnapshot};
use crate::codec::ImageCodec;
use crate::error::{CodecError, PasscamError, Result};
use crate::frame::{FormatDescriptor, PixelFormat, PooledFrame, SensorFrame};
use crate::latch::CaptureSignal;
use crate::surface::{FrameSink, OutputSurface, SurfaceTarget};
use crate::timeline::{Clock, TimelineBase};
use crate::worker::Worker;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use crossbeam::select;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Settings for one ingest surface
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Label used for thread names and logs
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub buffer_pool_size: usize,
    pub save_frames: bool,
    /// Directory receiving `<timestamp_ms>.yuv` files
    pub frame_dir: PathBuf,
    /// Path of the format descriptor JSON
    pub format_path: PathBuf,
    /// Frames that may wait for the ingest worker before new ones are dropped
    pub queue_depth: usize,
    pub close_timeout: Duration,
}

impl IngestConfig {
    pub fn new(name: impl Into<String>, width: u32, height: u32, frame_dir: PathBuf, format_path: PathBuf) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            buffer_pool_size: 5,
            save_frames: false,
            frame_dir,
            format_path,
            queue_depth: 2,
            close_timeout: Duration::from_secs(2),
        }
    }
}

/// Result of a frame that consumed the capture signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRecord {
    pub slot: usize,
    pub timestamp_ms: i64,
}

/// Ingest counters snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Frames delivered by the camera
    pub received: u64,
    /// Frames copied into the pool
    pub captured: u64,
    /// Frames processed while the signal was not armed
    pub discarded: u64,
    /// Frames dropped because the queue was full or closed
    pub dropped: u64,
    pub pool: PoolStatsSnapshot,
    pub persistence: PersistenceStats,
}

#[derive(Debug, Default)]
struct IngestCounters {
    received: AtomicU64,
    captured: AtomicU64,
    discarded: AtomicU64,
    dropped: AtomicU64,
}

struct OutputPaths {
    frame_dir: PathBuf,
    format_path: PathBuf,
}

struct IngestInner {
    name: String,
    width: u32,
    height: u32,
    pool: FrameBufferPool,
    signal: CaptureSignal,
    clock: Arc<dyn Clock>,
    timeline: Mutex<TimelineBase>,
    descriptor: Mutex<Option<FormatDescriptor>>,
    outputs: Mutex<OutputPaths>,
    save_frames: AtomicBool,
    persistence: Persistence,
    counters: IngestCounters,
}

/// Frame-arrival handler backing one output surface.
///
/// Frames queue to a dedicated worker. Each frame either consumes the capture
/// signal, in which case its planes are copied into the pool and optionally
/// persisted, or is discarded without copying.
pub struct FrameIngest {
    inner: Arc<IngestInner>,
    target: SurfaceTarget,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<Worker>>,
    close_timeout: Duration,
    closed: AtomicBool,
}

struct IngestSink {
    name: String,
    frames: Sender<SensorFrame>,
    inner: Arc<IngestInner>,
}

impl FrameSink for IngestSink {
    fn on_frame(&self, frame: SensorFrame) {
        let counters = &self.inner.counters;
        counters.received.fetch_add(1, Ordering::Relaxed);
        match self.frames.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "Ingest {} queue full; dropping frame {}",
                    self.name,
                    frame.timestamp_ns
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl FrameIngest {
    pub fn new(config: IngestConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.queue_depth == 0 {
            return Err(PasscamError::component(
                "ingest",
                "Queue depth must be greater than 0",
            ));
        }

        let pool = FrameBufferPoolBuilder::new()
            .capacity(config.buffer_pool_size)
            .frame_geometry(config.width, config.height, PixelFormat::Yuv420_888)
            .build()?;

        let persistence = Persistence::spawn(&config.name)?;
        let timeline = TimelineBase::capture(clock.as_ref());
        debug!(
            "Ingest {} timeline base: monotonic {}ns, wall clock {}ms",
            config.name, timeline.monotonic_origin_ns, timeline.wall_clock_origin_ms
        );

        let inner = Arc::new(IngestInner {
            name: config.name.clone(),
            width: config.width,
            height: config.height,
            pool,
            signal: CaptureSignal::new(),
            clock,
            timeline: Mutex::new(timeline),
            descriptor: Mutex::new(None),
            outputs: Mutex::new(OutputPaths {
                frame_dir: config.frame_dir,
                format_path: config.format_path,
            }),
            save_frames: AtomicBool::new(config.save_frames),
            persistence,
            counters: IngestCounters::default(),
        });

        let (frames_tx, frames_rx) = channel::bounded(config.queue_depth);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        let worker_inner = Arc::clone(&inner);
        let worker = Worker::spawn(format!("{}-ingest", config.name), move || {
            ingest_worker(worker_inner, frames_rx, shutdown_rx)
        })?;

        let target = SurfaceTarget::new(
            config.name.clone(),
            Arc::new(IngestSink {
                name: config.name.clone(),
                frames: frames_tx,
                inner: Arc::clone(&inner),
            }),
        );

        info!(
            "Frame ingest {} ready ({}x{}, {} buffers, save_frames={})",
            config.name, config.width, config.height, config.buffer_pool_size, config.save_frames
        );

        Ok(Self {
            inner,
            target,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
            close_timeout: config.close_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Process one frame synchronously on the calling thread.
    pub fn on_frame(&self, frame: &SensorFrame) -> Option<CaptureRecord> {
        self.inner.on_frame(frame)
    }

    /// Capture the next arriving frame. Arming an armed ingest has no effect.
    pub fn arm_next_capture(&self) {
        self.inner.signal.arm();
    }

    pub fn is_capture_armed(&self) -> bool {
        self.inner.signal.is_armed()
    }

    /// Re-read both clocks; later frames are timestamped against the new base.
    pub fn reset_timeline_base(&self) -> TimelineBase {
        let base = TimelineBase::capture(self.inner.clock.as_ref());
        *self.inner.timeline.lock() = base;
        info!(
            "Ingest {} timeline base reset: monotonic {}ns, wall clock {}ms",
            self.inner.name, base.monotonic_origin_ns, base.wall_clock_origin_ms
        );
        base
    }

    pub fn timeline_base(&self) -> TimelineBase {
        *self.inner.timeline.lock()
    }

    /// Send later frames and the next format descriptor to new locations.
    pub fn redirect_outputs(&self, frame_dir: PathBuf, format_path: PathBuf) {
        {
            let mut outputs = self.inner.outputs.lock();
            outputs.frame_dir = frame_dir;
            outputs.format_path = format_path;
        }
        *self.inner.descriptor.lock() = None;
        info!(
            "Ingest {} outputs redirected to {}",
            self.inner.name,
            self.inner.outputs.lock().frame_dir.display()
        );
    }

    pub fn set_save_frames(&self, save_frames: bool) {
        self.inner.save_frames.store(save_frames, Ordering::Release);
        debug!("Ingest {} save_frames={}", self.inner.name, save_frames);
    }

    pub fn save_frames(&self) -> bool {
        self.inner.save_frames.load(Ordering::Acquire)
    }

    /// Copy of the most recently captured frame
    pub fn latest_frame(&self) -> Option<PooledFrame> {
        self.inner.pool.latest_frame()
    }

    /// JPEG of the most recently captured frame
    pub fn latest_jpeg(&self) -> std::result::Result<Option<Vec<u8>>, CodecError> {
        let Some(frame) = self.latest_frame() else {
            return Ok(None);
        };

        let (width, height) = self
            .format_descriptor()
            .map(|d| (d.width, d.height))
            .unwrap_or((self.inner.width, self.inner.height));
        ImageCodec::encode_jpeg(&frame.data, width, height).map(Some)
    }

    pub fn format_descriptor(&self) -> Option<FormatDescriptor> {
        self.inner.descriptor.lock().clone()
    }

    pub fn latest_index(&self) -> usize {
        self.inner.pool.latest_index()
    }

    pub fn stats(&self) -> IngestStats {
        let counters = &self.inner.counters;
        IngestStats {
            received: counters.received.load(Ordering::Relaxed),
            captured: counters.captured.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            pool: self.inner.pool.stats(),
            persistence: self.inner.persistence.stats(),
        }
    }

    /// Wait for queued persistence writes.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.inner.persistence.flush(timeout)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the ingest worker and drain persistence. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        drop(self.shutdown_tx.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            if worker.is_current() {
                debug!("Ingest {} closed from its own worker", self.inner.name);
            } else {
                worker.join(self.close_timeout);
            }
        }

        self.inner.persistence.shutdown(self.close_timeout);
        let stats = self.stats();
        info!(
            "Frame ingest {} closed (received {}, captured {}, dropped {})",
            self.inner.name, stats.received, stats.captured, stats.dropped
        );
    }
}

impl OutputSurface for FrameIngest {
    fn target(&self) -> SurfaceTarget {
        self.target.clone()
    }

    fn close(&self) {
        FrameIngest::close(self);
    }
}

impl Drop for FrameIngest {
    fn drop(&mut self) {
        self.close();
    }
}

impl IngestInner {
    fn on_frame(&self, frame: &SensorFrame) -> Option<CaptureRecord> {
        let save_frames = self.save_frames.load(Ordering::Acquire);
        self.ensure_descriptor(frame, save_frames);

        if !self.signal.try_consume() {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let timestamp_ms = self.timeline.lock().derive_wall_clock_ms(frame.timestamp_ns);
        let slot = self
            .pool
            .publish(frame.planes.iter().map(|p| &p.data[..]), timestamp_ms);
        self.counters.captured.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Ingest {} captured frame {} into slot {} ({}ms)",
            self.name,
            frame.timestamp_ns,
            slot,
            timestamp_ms
        );

        if save_frames {
            let mut data = Vec::with_capacity(frame.byte_len());
            for plane in &frame.planes {
                data.extend_from_slice(&plane.data);
            }
            let frame_dir = self.outputs.lock().frame_dir.clone();
            if let Err(e) = self.persistence.write_frame(&frame_dir, timestamp_ms, data) {
                warn!("Ingest {} could not queue frame write: {}", self.name, e);
            }
        }

        Some(CaptureRecord { slot, timestamp_ms })
    }

    fn ensure_descriptor(&self, frame: &SensorFrame, save_frames: bool) {
        let mut descriptor = self.descriptor.lock();
        if descriptor.is_some() {
            return;
        }

        let computed = FormatDescriptor::from_frame(frame, *self.timeline.lock());
        debug!(
            "Ingest {} format: {}x{} {} with {} planes",
            self.name,
            computed.width,
            computed.height,
            computed.format,
            computed.planes.len()
        );

        if save_frames {
            let path = self.outputs.lock().format_path.clone();
            if let Err(e) = self.persistence.write_format(path, computed.clone()) {
                warn!("Ingest {} could not queue format write: {}", self.name, e);
            }
        }
        *descriptor = Some(computed);
    }
}

fn ingest_worker(inner: Arc<IngestInner>, frames: Receiver<SensorFrame>, shutdown: Receiver<()>) {
    debug!("Ingest {} worker started", inner.name);
    loop {
        select! {
            recv(frames) -> frame => match frame {
                Ok(frame) => {
                    inner.on_frame(&frame);
                }
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    debug!("Ingest {} worker stopped", inner.name);
}
