//! Configuration reading and data directory paths.

pub mod credentials;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::audio::AudioConfig;
use crate::control::demo::DemoConfig;
use crate::error::ErrorKind;
use crate::face::FaceConfig;
use crate::motion::MotionConfig;
use crate::net::link::NetworkConfig;
use crate::net::transport::ServerConfig;
use crate::power::PowerConfig;

pub use credentials::{CredentialStore, Credentials};

pub const CONFIG_FILE: &str = "device_config.json";

/// Points the data directory somewhere else, e.g. a mounted flash partition.
pub const DATA_DIR_ENV: &str = "COMPANION_DATA_DIR";

const APP_DIR: &str = "companion-core";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::TransientIo,
            Self::Json(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// Top-level `device_config.json` shape. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub face: FaceConfig,
    pub motion: MotionConfig,
    pub power: PowerConfig,
    pub demo: DemoConfig,
    pub network: NetworkConfig,
}

impl DeviceConfig {
    /// Read `device_config.json` from the data directory.
    pub fn load() -> Self {
        Self::load_from(&get_config_path())
    }

    /// Missing file gives defaults silently; a broken one is logged and
    /// also gives defaults.
    pub fn load_from(path: &Path) -> Self {
        match read_json_file::<Self>(path) {
            Some(mut config) => {
                info!(path = %path.display(), "Loaded device config");
                config.face.geometry = config.face.geometry.validated();
                config
            }
            None => Self::default(),
        }
    }
}

/// Config, credentials and logs live here: `$COMPANION_DATA_DIR` when set,
/// otherwise `companion-core/data` under the platform config directory
/// (XDG config home, Application Support or roaming AppData).
pub fn get_data_dir() -> PathBuf {
    data_dir_from(std::env::var_os(DATA_DIR_ENV))
}

fn data_dir_from(override_dir: Option<OsString>) -> PathBuf {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("data")
}

/// Directory the rolling log files go to.
pub fn get_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Path to device_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join(CONFIG_FILE)
}

/// Generic helper: read a JSON file and deserialize it.
pub(crate) fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
