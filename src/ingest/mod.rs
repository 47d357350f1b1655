//! Frame arrival, pooling and triggered persistence.

mod core;
mod persist;
#[cfg(test)]
mod tests;

pub use self::core::{CaptureRecord, FrameIngest, IngestConfig, IngestStats};
pub use persist::{frame_file_name, Persistence, PersistenceStats};
