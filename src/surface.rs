//! Output surfaces and the registry a camera session configures against.

use crate::frame::SensorFrame;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Receives frames produced by a capture session.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: SensorFrame);
}

/// The endpoint a backend writes frames into.
#[derive(Clone)]
pub struct SurfaceTarget {
    id: u64,
    label: String,
    sink: Arc<dyn FrameSink>,
}

impl SurfaceTarget {
    pub fn new(label: impl Into<String>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            sink,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn deliver(&self, frame: SensorFrame) {
        self.sink.on_frame(frame);
    }
}

impl fmt::Debug for SurfaceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceTarget")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

/// Anything that receives pixel data from a camera session.
///
/// `close` is called by the session when it tears down; implementations must
/// tolerate it being the last call they ever receive.
pub trait OutputSurface: Send + Sync {
    fn target(&self) -> SurfaceTarget;

    fn close(&self);
}

/// Ordered set of output surfaces feeding one capture session.
#[derive(Default)]
pub struct SurfaceRegistry {
    surfaces: Mutex<Vec<Arc<dyn OutputSurface>>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a surface; registering the same surface twice is a no-op.
    pub fn register(&self, surface: Arc<dyn OutputSurface>) -> bool {
        let mut surfaces = self.surfaces.lock();
        if surfaces.iter().any(|s| same_surface(s, &surface)) {
            warn!("Output surface already registered");
            return false;
        }
        surfaces.push(surface);
        debug!("Registered output surface ({} total)", surfaces.len());
        true
    }

    pub fn unregister(&self, surface: &Arc<dyn OutputSurface>) -> bool {
        let mut surfaces = self.surfaces.lock();
        let before = surfaces.len();
        surfaces.retain(|s| !same_surface(s, surface));
        before != surfaces.len()
    }

    /// Freeze the current set for a configuration attempt.
    pub fn snapshot(&self) -> Vec<Arc<dyn OutputSurface>> {
        self.surfaces.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.surfaces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.lock().is_empty()
    }
}

fn same_surface(a: &Arc<dyn OutputSurface>, b: &Arc<dyn OutputSurface>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink(AtomicUsize);

    impl FrameSink for CountingSink {
        fn on_frame(&self, _frame: SensorFrame) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestSurface {
        target: SurfaceTarget,
    }

    impl TestSurface {
        fn new(sink: Arc<CountingSink>) -> Arc<dyn OutputSurface> {
            Arc::new(Self {
                target: SurfaceTarget::new("test", sink),
            })
        }
    }

    impl OutputSurface for TestSurface {
        fn target(&self) -> SurfaceTarget {
            self.target.clone()
        }

        fn close(&self) {}
    }

    #[test]
    fn test_register_deduplicates() {
        let registry = SurfaceRegistry::new();
        let surface = TestSurface::new(Arc::new(CountingSink(AtomicUsize::new(0))));

        assert!(registry.register(Arc::clone(&surface)));
        assert!(!registry.register(Arc::clone(&surface)));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(&surface));
        assert!(!registry.unregister(&surface));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let registry = SurfaceRegistry::new();
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        registry.register(TestSurface::new(Arc::clone(&sink)));

        let snapshot = registry.snapshot();
        registry.register(TestSurface::new(Arc::clone(&sink)));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_target_delivers_to_sink() {
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let surface = TestSurface::new(Arc::clone(&sink));
        let target = surface.target();

        target.deliver(SensorFrame::from_nv12(2, 2, 0, &[0u8; 6]));
        target.deliver(SensorFrame::from_nv12(2, 2, 1, &[0u8; 6]));

        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
        assert_ne!(target.id(), TestSurface::new(sink).target().id());
    }
}
