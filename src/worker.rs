use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::io;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error, warn};

/// A named OS thread that can be joined with a deadline.
///
/// The thread holds the sending half of a rendezvous channel; when it exits
/// (normally or by panic) the sender drops and the receiver disconnects, which
/// is what `join` waits for.
pub(crate) struct Worker {
    name: String,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: impl Into<String>, f: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let (done_tx, done) = channel::bounded::<()>(0);
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _done = done_tx;
            f();
        })?;

        debug!("Spawned worker thread {}", name);
        Ok(Self { name, handle, done })
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    /// True when called from this worker's own thread.
    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id()
    }

    /// Wait up to `timeout` for the thread to exit. Returns false when the
    /// deadline passed (the thread is left detached) or the thread panicked.
    pub(crate) fn join(self, timeout: Duration) -> bool {
        if self.is_current() {
            warn!("Worker {} asked to join itself; detaching", self.name);
            return false;
        }

        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => match self.handle.join() {
                Ok(()) => {
                    debug!("Worker thread {} joined", self.name);
                    true
                }
                Err(_) => {
                    error!("Worker thread {} panicked", self.name);
                    false
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Worker thread {} did not stop within {:?}; detaching",
                    self.name, timeout
                );
                false
            }
        }
    }
}
