use crate::error::{PasscamError, Result};
use crate::metadata::{CameraMetadata, CameraPosition, StereoPair};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory name format for auto-named capture sessions
pub const DIRECTORY_NAME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// One capture session's output directory.
///
/// Holds per-camera frame directories, format descriptors and camera
/// characteristics for both cameras of a stereo rig.
#[derive(Debug, Clone)]
pub struct DataDirectory {
    path: PathBuf,
}

impl DataDirectory {
    /// Create `<base>/<name>`, or `<base>/<yyyyMMdd_HHmmss>` when no name is given.
    pub fn create(base: impl AsRef<Path>, name: Option<&str>) -> Result<Self> {
        let name = match name {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => Local::now().format(DIRECTORY_NAME_FORMAT).to_string(),
        };

        let path = base.as_ref().join(name);
        fs::create_dir_all(&path).map_err(|e| {
            PasscamError::component(
                "storage",
                format!("Failed to create data directory {}: {}", path.display(), e),
            )
        })?;

        info!("Using data directory {}", path.display());
        Ok(Self { path })
    }

    /// Wipe and recreate the directory.
    pub fn recreate(&self) -> Result<()> {
        if self.path.exists() {
            debug!("Removing existing data directory {}", self.path.display());
            fs::remove_dir_all(&self.path)?;
        }
        fs::create_dir_all(&self.path)?;
        info!("Recreated data directory {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn camera_frame_dir(&self, position: CameraPosition) -> PathBuf {
        self.path.join(format!("{}_camera", position.as_str()))
    }

    pub fn camera_format_path(&self, position: CameraPosition) -> PathBuf {
        self.path
            .join(format!("{}_camera_image_format.json", position.as_str()))
    }

    pub fn camera_characteristics_path(&self, position: CameraPosition) -> PathBuf {
        self.path
            .join(format!("{}_camera_characteristic.json", position.as_str()))
    }
}

/// Write `left_camera_characteristic.json` and `right_camera_characteristic.json`.
pub fn write_camera_metadata(dir: &DataDirectory, pair: &StereoPair) -> Result<()> {
    write_characteristics(dir, CameraPosition::Left, &pair.left)?;
    write_characteristics(dir, CameraPosition::Right, &pair.right)?;
    Ok(())
}

fn write_characteristics(
    dir: &DataDirectory,
    position: CameraPosition,
    metadata: &CameraMetadata,
) -> Result<()> {
    let path = dir.camera_characteristics_path(position);
    fs::write(&path, metadata.to_json()?)?;
    debug!(
        "Wrote characteristics for camera {} to {}",
        metadata.camera_id,
        path.display()
    );
    Ok(())
}
