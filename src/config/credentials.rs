//! Persisted network credentials (`credentials.json`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{read_json_file, ConfigError};

pub const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"***")
            .finish()
    }
}

/// One named store holding `ssid` and `password`.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CREDENTIALS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored credentials, or `None` when nothing (or nothing readable) is saved.
    pub fn load(&self) -> Option<Credentials> {
        read_json_file::<Credentials>(&self.path).filter(|c| !c.ssid.is_empty())
    }

    /// Write atomically: `.json.tmp` then rename over the real file.
    pub fn save(&self, creds: &Credentials) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(creds)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| ConfigError::io(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| ConfigError::io(&self.path, e))?;
        info!(ssid = %creds.ssid, "Credentials saved");
        Ok(())
    }

    /// Factory reset. A store that was never written is already clear.
    pub fn clear(&self) -> Result<(), ConfigError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Credentials cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConfigError::io(&self.path, e)),
        }
    }
}
