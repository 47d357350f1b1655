//! Camera permission collaborator.
//!
//! A permission request resolves exactly once; every caller that asked gets
//! the same single-fire notification.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Grants or denies camera access
pub trait PermissionCollaborator: Send + Sync {
    fn is_granted(&self) -> bool;

    /// Ask for access unless it is already granted. The returned request
    /// resolves once with the outcome.
    fn request_if_needed(&self) -> PermissionRequest;
}

/// Pending outcome of a permission request
#[derive(Debug)]
pub struct PermissionRequest {
    rx: oneshot::Receiver<bool>,
}

impl PermissionRequest {
    /// A request that already has its answer
    pub fn resolved(granted: bool) -> Self {
        let (resolver, request) = Self::channel();
        resolver.resolve(granted);
        request
    }

    pub fn channel() -> (PermissionResolver, PermissionRequest) {
        let (tx, rx) = oneshot::channel();
        (PermissionResolver { tx }, PermissionRequest { rx })
    }

    /// Wait for the outcome on the current thread. A dropped resolver counts
    /// as a denial. Must not be called from within an async runtime.
    pub fn wait(self) -> bool {
        self.rx.blocking_recv().unwrap_or(false)
    }

    pub async fn granted(self) -> bool {
        self.rx.await.unwrap_or(false)
    }
}

/// Sending half of a permission request
#[derive(Debug)]
pub struct PermissionResolver {
    tx: oneshot::Sender<bool>,
}

impl PermissionResolver {
    pub fn resolve(self, granted: bool) {
        debug!("Camera permission request resolved: {}", granted);
        if self.tx.send(granted).is_err() {
            debug!("Permission requester went away before the result arrived");
        }
    }
}

/// Fixed permission state, changed explicitly with `grant`/`revoke`.
///
/// Requests made while access is not granted stay pending until `grant` or
/// `deny_pending` resolves them.
#[derive(Debug, Default)]
pub struct StaticPermissions {
    granted: AtomicBool,
    pending: Mutex<Vec<PermissionResolver>>,
}

impl StaticPermissions {
    pub fn new(granted: bool) -> Arc<Self> {
        Arc::new(Self {
            granted: AtomicBool::new(granted),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn grant(&self) {
        self.granted.store(true, Ordering::SeqCst);
        info!("Camera permission granted");
        self.resolve_pending(true);
    }

    pub fn revoke(&self) {
        self.granted.store(false, Ordering::SeqCst);
        warn!("Camera permission revoked");
    }

    pub fn deny_pending(&self) {
        self.resolve_pending(false);
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    fn resolve_pending(&self, granted: bool) {
        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        for resolver in pending {
            resolver.resolve(granted);
        }
    }
}

impl PermissionCollaborator for StaticPermissions {
    fn is_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn request_if_needed(&self) -> PermissionRequest {
        if self.is_granted() {
            return PermissionRequest::resolved(true);
        }

        let (resolver, request) = PermissionRequest::channel();
        self.pending.lock().push(resolver);
        debug!("Camera permission request queued");
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granted_request_resolves_immediately() {
        let permissions = StaticPermissions::new(true);
        assert!(permissions.is_granted());
        assert!(permissions.request_if_needed().wait());
        assert_eq!(permissions.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_pending_request_resolved_by_grant() {
        let permissions = StaticPermissions::new(false);
        let first = permissions.request_if_needed();
        let second = permissions.request_if_needed();
        assert_eq!(permissions.pending_requests(), 2);

        permissions.grant();

        assert!(first.granted().await);
        assert!(second.granted().await);
        assert_eq!(permissions.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_denied_and_dropped_requests() {
        let permissions = StaticPermissions::new(false);
        let request = permissions.request_if_needed();
        permissions.deny_pending();
        assert!(!request.granted().await);

        let (resolver, request) = PermissionRequest::channel();
        drop(resolver);
        assert!(!request.granted().await);
    }

    #[test]
    fn test_revoke() {
        let permissions = StaticPermissions::new(true);
        permissions.revoke();
        assert!(!permissions.is_granted());
    }
}
