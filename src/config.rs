use crate::session::CaptureIntent;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Default configuration file, resolved relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "passcam.toml";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PasscamConfig {
    pub camera: CameraConfig,
    pub ingest: IngestSettings,
    pub storage: StorageConfig,
    pub trigger: TriggerConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Capture intent name (preview, still_capture, record, ...)
    #[serde(default = "default_capture_intent")]
    pub capture_intent: String,

    /// Force the left camera id instead of discovering it from metadata
    #[serde(default)]
    pub left_camera_id: Option<String>,

    /// Force the right camera id instead of discovering it from metadata
    #[serde(default)]
    pub right_camera_id: Option<String>,

    /// Upper bound on joining a session worker during close
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IngestSettings {
    /// Frame buffer pool slots per camera
    #[serde(default = "default_buffer_pool_size")]
    pub buffer_pool_size: usize,

    /// Persist captured frames as raw `.yuv` files
    #[serde(default = "default_save_frames")]
    pub save_frames: bool,

    /// Frames queued between the camera and the ingest worker
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    /// Parent of all data directories
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Fixed data directory name; timestamped when unset
    #[serde(default)]
    pub directory_name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TriggerConfig {
    /// Period between capture triggers
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Simulated sensor resolution (width, height)
    #[serde(default = "default_resolution")]
    pub resolution: (u32, u32),

    /// Simulated frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,
}

impl PasscamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file(DEFAULT_CONFIG_FILE)
    }

    /// Load defaults, then an optional TOML file, then `PASSCAM_*` variables.
    ///
    /// Environment keys separate sections with a double underscore, e.g.
    /// `PASSCAM_INGEST__SAVE_FRAMES=true`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.capture_intent", default_capture_intent())?
            .set_default("camera.close_timeout_ms", default_close_timeout_ms() as i64)?
            .set_default("ingest.buffer_pool_size", default_buffer_pool_size() as i64)?
            .set_default("ingest.save_frames", default_save_frames())?
            .set_default("ingest.queue_depth", default_queue_depth() as i64)?
            .set_default("storage.base_path", default_base_path())?
            .set_default("trigger.interval_ms", default_interval_ms() as i64)?
            .set_default(
                "simulation.resolution",
                vec![default_resolution().0, default_resolution().1],
            )?
            .set_default("simulation.fps", default_fps())?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("PASSCAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: PasscamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.buffer_pool_size == 0 {
            return Err(ConfigError::Message(
                "Buffer pool size must be greater than 0".to_string(),
            ));
        }

        if self.ingest.queue_depth == 0 {
            return Err(ConfigError::Message(
                "Ingest queue depth must be greater than 0".to_string(),
            ));
        }

        if self.camera.close_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Camera close_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.trigger.interval_ms == 0 {
            return Err(ConfigError::Message(
                "Trigger interval_ms must be greater than 0".to_string(),
            ));
        }

        let (width, height) = self.simulation.resolution;
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(ConfigError::Message(format!(
                "Simulation resolution must be even and non-zero, got {}x{}",
                width, height
            )));
        }

        if self.storage.base_path.trim().is_empty() {
            return Err(ConfigError::Message(
                "Storage base_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn capture_intent(&self) -> CaptureIntent {
        CaptureIntent::from_name(&self.camera.capture_intent)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.camera.close_timeout_ms)
    }

    pub fn trigger_interval(&self) -> Duration {
        Duration::from_millis(self.trigger.interval_ms)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for PasscamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                capture_intent: default_capture_intent(),
                left_camera_id: None,
                right_camera_id: None,
                close_timeout_ms: default_close_timeout_ms(),
            },
            ingest: IngestSettings {
                buffer_pool_size: default_buffer_pool_size(),
                save_frames: default_save_frames(),
                queue_depth: default_queue_depth(),
            },
            storage: StorageConfig {
                base_path: default_base_path(),
                directory_name: None,
            },
            trigger: TriggerConfig {
                interval_ms: default_interval_ms(),
            },
            simulation: SimulationConfig {
                resolution: default_resolution(),
                fps: default_fps(),
            },
        }
    }
}

// Default value functions
fn default_capture_intent() -> String {
    "still_capture".to_string()
}
fn default_close_timeout_ms() -> u64 {
    2000
}

fn default_buffer_pool_size() -> usize {
    5
}
fn default_save_frames() -> bool {
    false
}
fn default_queue_depth() -> usize {
    2
}

fn default_base_path() -> String {
    "./passcam_data".to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_resolution() -> (u32, u32) {
    (1280, 960)
}
fn default_fps() -> u32 {
    30
}
