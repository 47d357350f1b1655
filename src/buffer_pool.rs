use crate::error::PasscamError;
use crate::frame::{PixelFormat, PooledFrame};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Fixed-capacity ring of reusable frame buffers
///
/// Only the ingest worker writes. Slots are filled in strict round-robin
/// order and a slot is completely written before its index is published as
/// the latest one, so a reader that loads the latest index always copies a
/// complete frame. Readers only ever get copies.
pub struct FrameBufferPool {
    /// Frame slots, each behind its own lock
    slots: Vec<RwLock<FrameSlot>>,
    /// Index of the most recently completed slot
    latest_index: AtomicUsize,
    /// Set once the first frame has been published
    published: AtomicBool,
    /// Number of slots
    capacity: usize,
    /// Statistics
    stats: PoolStats,
}

struct FrameSlot {
    /// Backing storage; grows when a frame does not fit, never shrinks
    data: Vec<u8>,
    /// Bytes of `data` holding the current frame
    len: usize,
    /// Derived wall-clock timestamp of the current frame
    timestamp_ms: i64,
}

impl FrameSlot {
    fn with_size(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
            len: 0,
            timestamp_ms: 0,
        }
    }
}

/// Statistics for pool monitoring
#[derive(Debug)]
pub struct PoolStats {
    /// Frames published into the pool
    pub frames_published: AtomicU64,
    /// Copies handed out to readers
    pub copies_served: AtomicU64,
    /// Slots reallocated because a frame outgrew them
    pub slot_growths: AtomicU64,
}

impl PoolStats {
    fn new() -> Self {
        Self {
            frames_published: AtomicU64::new(0),
            copies_served: AtomicU64::new(0),
            slot_growths: AtomicU64::new(0),
        }
    }

    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            copies_served: self.copies_served.load(Ordering::Relaxed),
            slot_growths: self.slot_growths.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub frames_published: u64,
    pub copies_served: u64,
    pub slot_growths: u64,
}

impl FrameBufferPool {
    /// Create a pool of `capacity` slots, each preallocated to `frame_bytes`.
    ///
    /// # Example
    /// ```
    /// use passcam::buffer_pool::FrameBufferPool;
    ///
    /// let pool = FrameBufferPool::new(5, 640 * 480 * 3 / 2).unwrap();
    /// assert_eq!(pool.capacity(), 5);
    /// assert!(pool.latest_frame().is_none());
    /// ```
    pub fn new(capacity: usize, frame_bytes: usize) -> Result<Self, PasscamError> {
        if capacity == 0 {
            return Err(PasscamError::system(
                "Frame buffer pool capacity must be greater than 0",
            ));
        }

        let slots = (0..capacity)
            .map(|_| RwLock::new(FrameSlot::with_size(frame_bytes)))
            .collect();

        debug!(
            "Created frame buffer pool with {} slots of {} bytes",
            capacity, frame_bytes
        );

        Ok(Self {
            slots,
            latest_index: AtomicUsize::new(0),
            published: AtomicBool::new(false),
            capacity,
            stats: PoolStats::new(),
        })
    }

    /// Copy a frame's planes contiguously into the next slot and publish it.
    ///
    /// Returns the slot index that became the latest one. The write waits
    /// for any reader still copying the slot about to be overwritten.
    pub fn publish<'a, I>(&self, planes: I, timestamp_ms: i64) -> usize
    where
        I: IntoIterator<Item = &'a [u8]> + Clone,
    {
        let required: usize = planes.clone().into_iter().map(<[u8]>::len).sum();
        let next = (self.latest_index.load(Ordering::Acquire) + 1) % self.capacity;

        {
            let mut slot = self.slots[next].write();
            if slot.data.len() < required {
                trace!(
                    "Growing slot {} from {} to {} bytes",
                    next,
                    slot.data.len(),
                    required
                );
                slot.data.resize(required, 0);
                self.stats.slot_growths.fetch_add(1, Ordering::Relaxed);
            }

            let mut offset = 0;
            for plane in planes {
                slot.data[offset..offset + plane.len()].copy_from_slice(plane);
                offset += plane.len();
            }
            slot.len = required;
            slot.timestamp_ms = timestamp_ms;
        }

        self.latest_index.store(next, Ordering::Release);
        self.published.store(true, Ordering::Release);
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);

        trace!(
            "Published {} bytes to slot {} (timestamp {}ms)",
            required,
            next,
            timestamp_ms
        );
        next
    }

    /// Copy of the most recently published frame, if any frame was published.
    pub fn latest_frame(&self) -> Option<PooledFrame> {
        if !self.published.load(Ordering::Acquire) {
            return None;
        }
        Some(self.copy_slot(self.latest_index.load(Ordering::Acquire)))
    }

    /// Copy of a specific slot's current contents.
    pub fn snapshot(&self, slot: usize) -> Option<PooledFrame> {
        if slot >= self.capacity || !self.published.load(Ordering::Acquire) {
            return None;
        }
        Some(self.copy_slot(slot))
    }

    fn copy_slot(&self, index: usize) -> PooledFrame {
        let slot = self.slots[index].read();
        self.stats.copies_served.fetch_add(1, Ordering::Relaxed);
        PooledFrame {
            slot: index,
            timestamp_ms: slot.timestamp_ms,
            data: slot.data[..slot.len].to_vec(),
        }
    }

    /// Index of the latest slot (0 before anything was published)
    pub fn latest_index(&self) -> usize {
        self.latest_index.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current allocated size of a slot
    pub fn slot_size(&self, slot: usize) -> Option<usize> {
        self.slots.get(slot).map(|s| s.read().data.len())
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Builder for frame buffer pools sized from frame geometry
pub struct FrameBufferPoolBuilder {
    capacity: Option<usize>,
    frame_bytes: Option<usize>,
}

impl FrameBufferPoolBuilder {
    pub fn new() -> Self {
        Self {
            capacity: None,
            frame_bytes: None,
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Size slots for one frame of the given geometry and format
    pub fn frame_geometry(mut self, width: u32, height: u32, format: PixelFormat) -> Self {
        self.frame_bytes = Some(format.frame_bytes(width, height));
        self
    }

    pub fn frame_bytes(mut self, frame_bytes: usize) -> Self {
        self.frame_bytes = Some(frame_bytes);
        self
    }

    pub fn build(self) -> Result<FrameBufferPool, PasscamError> {
        let capacity = self
            .capacity
            .ok_or_else(|| PasscamError::system("Frame buffer pool capacity must be specified"))?;

        let frame_bytes = self
            .frame_bytes
            .ok_or_else(|| PasscamError::system("Frame buffer pool frame size must be specified"))?;

        FrameBufferPool::new(capacity, frame_bytes)
    }
}

impl Default for FrameBufferPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn publish_filled(pool: &FrameBufferPool, value: u8, len: usize, timestamp_ms: i64) -> usize {
        let data = vec![value; len];
        pool.publish([data.as_slice()], timestamp_ms)
    }

    #[test]
    fn test_pool_creation() {
        let pool = FrameBufferPool::new(5, 1024).unwrap();
        assert_eq!(pool.capacity(), 5);
        assert_eq!(pool.latest_index(), 0);
        assert_eq!(pool.slot_size(4), Some(1024));
        assert!(pool.latest_frame().is_none());
        assert!(pool.snapshot(0).is_none());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(FrameBufferPool::new(0, 1024).is_err());
    }

    #[test]
    fn test_latest_index_advances_round_robin() {
        let pool = FrameBufferPool::new(3, 16).unwrap();

        let indices: Vec<usize> = (0..4)
            .map(|i| publish_filled(&pool, i as u8, 16, 100 + i as i64))
            .collect();

        assert_eq!(indices, vec![1, 2, 0, 1]);
        assert_eq!(pool.latest_index(), 1);
        assert_eq!(pool.stats().frames_published, 4);
    }

    #[test]
    fn test_planes_are_concatenated() {
        let pool = FrameBufferPool::new(2, 6).unwrap();
        let luma = [1u8, 2, 3, 4];
        let chroma = [9u8, 8];
        pool.publish([&luma[..], &chroma[..]], 55);

        let latest = pool.latest_frame().unwrap();
        assert_eq!(latest.slot, 1);
        assert_eq!(latest.timestamp_ms, 55);
        assert_eq!(latest.data, vec![1, 2, 3, 4, 9, 8]);
    }

    #[test]
    fn test_readers_get_copies() {
        let pool = FrameBufferPool::new(2, 4).unwrap();
        publish_filled(&pool, 1, 4, 1);

        let mut copy = pool.latest_frame().unwrap();
        copy.data[0] = 99;

        // Overwrite every slot; the earlier copy is untouched.
        publish_filled(&pool, 2, 4, 2);
        publish_filled(&pool, 3, 4, 3);

        assert_eq!(copy.data, vec![99, 1, 1, 1]);
        assert_eq!(pool.latest_frame().unwrap().data, vec![3, 3, 3, 3]);
    }

    #[test]
    fn test_slot_grows_alone_and_never_shrinks() {
        let pool = FrameBufferPool::new(3, 8).unwrap();

        let slot = publish_filled(&pool, 5, 12, 1);
        assert_eq!(slot, 1);
        assert_eq!(pool.slot_size(1), Some(12));
        assert_eq!(pool.slot_size(0), Some(8));
        assert_eq!(pool.slot_size(2), Some(8));
        assert_eq!(pool.stats().slot_growths, 1);

        // Wrap around to slot 1 again with a smaller frame.
        publish_filled(&pool, 6, 4, 2);
        publish_filled(&pool, 7, 4, 3);
        let slot = publish_filled(&pool, 8, 4, 4);
        assert_eq!(slot, 1);
        assert_eq!(pool.slot_size(1), Some(12));
        assert_eq!(pool.latest_frame().unwrap().data, vec![8, 8, 8, 8]);
    }

    #[test]
    fn test_builder_pattern() {
        let pool = FrameBufferPoolBuilder::new()
            .capacity(4)
            .frame_geometry(640, 480, PixelFormat::Yuv420_888)
            .build()
            .unwrap();

        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.slot_size(0), Some(640 * 480 * 3 / 2));
    }

    #[test]
    fn test_builder_validation() {
        assert!(FrameBufferPoolBuilder::new().frame_bytes(10).build().is_err());
        assert!(FrameBufferPoolBuilder::new().capacity(3).build().is_err());
        assert!(FrameBufferPoolBuilder::new()
            .capacity(0)
            .frame_bytes(10)
            .build()
            .is_err());
    }

    #[test]
    fn test_publish_waits_for_reader_of_next_slot() {
        let pool = Arc::new(FrameBufferPool::new(3, 4).unwrap());
        let reader = pool.slots[1].read();

        let writer = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || publish_filled(&pool, 7, 4, 10))
        };

        thread::sleep(std::time::Duration::from_millis(50));
        assert!(!writer.is_finished());
        assert_eq!(pool.latest_index(), 0);

        drop(reader);
        assert_eq!(writer.join().unwrap(), 1);
        assert_eq!(pool.latest_frame().unwrap().data, vec![7, 7, 7, 7]);
    }

    #[test]
    fn test_concurrent_reads_never_tear() {
        const FRAME_BYTES: usize = 64 * 1024;
        let pool = Arc::new(FrameBufferPool::new(3, FRAME_BYTES).unwrap());

        let writer = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..2_000u32 {
                    publish_filled(&pool, (i % 251) as u8, FRAME_BYTES, i as i64);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let mut checked = 0;
                    while checked < 500 {
                        if let Some(frame) = pool.latest_frame() {
                            assert_eq!(frame.data.len(), FRAME_BYTES);
                            let first = frame.data[0];
                            assert!(frame.data.iter().all(|&b| b == first), "torn read");
                            checked += 1;
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(pool.stats().frames_published, 2_000);
    }
}
