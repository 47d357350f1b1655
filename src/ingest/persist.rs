use crate::error::PersistenceError;
use crate::frame::FormatDescriptor;
use crate::worker::Worker;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Job for the persistence worker
enum PersistJob {
    Format {
        path: PathBuf,
        descriptor: FormatDescriptor,
    },
    Frame {
        path: PathBuf,
        data: Vec<u8>,
    },
    Flush(Sender<()>),
}

#[derive(Debug, Default)]
struct PersistCounters {
    format_writes: AtomicU64,
    frame_writes: AtomicU64,
    failed_writes: AtomicU64,
    bytes_written: AtomicU64,
}

/// Persistence statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceStats {
    pub format_writes: u64,
    pub frame_writes: u64,
    pub failed_writes: u64,
    pub bytes_written: u64,
}

/// Single background writer for raw frames and format descriptors.
///
/// Jobs run in submission order. Write failures are logged and counted and
/// never reported back to the submitter.
pub struct Persistence {
    tx: Mutex<Option<Sender<PersistJob>>>,
    worker: Mutex<Option<Worker>>,
    counters: Arc<PersistCounters>,
}

impl Persistence {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = channel::unbounded();
        let counters = Arc::new(PersistCounters::default());

        let worker_counters = Arc::clone(&counters);
        let worker = Worker::spawn(format!("{}-persist", name), move || {
            persistence_worker(rx, worker_counters)
        })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            counters,
        })
    }

    pub fn write_format(
        &self,
        path: PathBuf,
        descriptor: FormatDescriptor,
    ) -> Result<(), PersistenceError> {
        self.submit(PersistJob::Format { path, descriptor })
    }

    /// Queue `data` for writing as `<dir>/<timestamp_ms>.yuv`.
    pub fn write_frame(
        &self,
        dir: &Path,
        timestamp_ms: i64,
        data: Vec<u8>,
    ) -> Result<(), PersistenceError> {
        let path = dir.join(frame_file_name(timestamp_ms));
        self.submit(PersistJob::Frame { path, data })
    }

    /// Wait until every job queued before this call has run.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = channel::bounded(1);
        if self.submit(PersistJob::Flush(done_tx)).is_err() {
            return true;
        }
        match done_rx.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => {
                warn!("Persistence flush timed out after {:?}", timeout);
                false
            }
            Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    /// Stop accepting jobs, drain the queue and join the worker.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let tx = self.tx.lock().take();
        if tx.is_none() {
            return true;
        }
        drop(tx);

        match self.worker.lock().take() {
            Some(worker) => worker.join(timeout),
            None => true,
        }
    }

    pub fn is_running(&self) -> bool {
        self.tx.lock().is_some()
    }

    pub fn stats(&self) -> PersistenceStats {
        PersistenceStats {
            format_writes: self.counters.format_writes.load(Ordering::Relaxed),
            frame_writes: self.counters.frame_writes.load(Ordering::Relaxed),
            failed_writes: self.counters.failed_writes.load(Ordering::Relaxed),
            bytes_written: self.counters.bytes_written.load(Ordering::Relaxed),
        }
    }

    fn submit(&self, job: PersistJob) -> Result<(), PersistenceError> {
        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or(PersistenceError::WorkerStopped)?;
        tx.send(job).map_err(|_| PersistenceError::WorkerStopped)
    }
}

impl Drop for Persistence {
    fn drop(&mut self) {
        self.shutdown(Duration::from_secs(1));
    }
}

pub fn frame_file_name(timestamp_ms: i64) -> String {
    format!("{}.yuv", timestamp_ms)
}

fn persistence_worker(rx: Receiver<PersistJob>, counters: Arc<PersistCounters>) {
    info!("Persistence worker started");

    for job in rx.iter() {
        match job {
            PersistJob::Format { path, descriptor } => {
                let started = Instant::now();
                let result = serde_json::to_vec(&descriptor)
                    .map_err(PersistenceError::from)
                    .and_then(|json| write_file(&path, &json));
                match result {
                    Ok(bytes) => {
                        counters.format_writes.fetch_add(1, Ordering::Relaxed);
                        counters.bytes_written.fetch_add(bytes, Ordering::Relaxed);
                        debug!(
                            "Wrote format descriptor {} in {:?}",
                            path.display(),
                            started.elapsed()
                        );
                    }
                    Err(e) => {
                        counters.failed_writes.fetch_add(1, Ordering::Relaxed);
                        error!("Failed to persist format descriptor: {}", e);
                    }
                }
            }
            PersistJob::Frame { path, data } => match write_file(&path, &data) {
                Ok(bytes) => {
                    counters.frame_writes.fetch_add(1, Ordering::Relaxed);
                    counters.bytes_written.fetch_add(bytes, Ordering::Relaxed);
                    trace!("Wrote {} bytes to {}", bytes, path.display());
                }
                Err(e) => {
                    counters.failed_writes.fetch_add(1, Ordering::Relaxed);
                    error!("Failed to persist frame: {}", e);
                }
            },
            PersistJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    info!("Persistence worker stopped");
}

fn write_file(path: &Path, data: &[u8]) -> Result<u64, PersistenceError> {
    let to_error = |source| PersistenceError::Write {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(to_error)?;
        }
    }
    fs::write(path, data).map_err(to_error)?;
    Ok(data.len() as u64)
}
