use crate::error::{self, Result};
use serde::Deserialize;
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// On-disk configuration, e.g. `/etc/device-update.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the deployments management service.
    pub server_url: String,
    /// Path to the transactional datastore file.
    pub datastore_path: PathBuf,
    /// Directory update modules are invoked under, one subdirectory per payload.
    pub work_dir: PathBuf,
    /// Directory holding one update module executable per payload type, named by that type.
    pub module_dir: PathBuf,
    /// Device type string reported to the server and exposed to update modules.
    pub device_type: String,
    #[serde(default = "default_max_backoff_minutes")]
    pub max_backoff_minutes: u64,
    #[serde(default = "default_control_map_ttl_minutes")]
    pub control_map_ttl_minutes: u64,
    #[serde(default = "default_module_timeout_seconds")]
    pub module_timeout_seconds: u64,
    #[serde(default)]
    pub verification_keys: Vec<PathBuf>,
}

fn default_max_backoff_minutes() -> u64 {
    10
}

fn default_control_map_ttl_minutes() -> u64 {
    60
}

fn default_module_timeout_seconds() -> u64 {
    300
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(error::ConfigReadSnafu {
            path: path.to_path_buf(),
        })?;
        toml::from_str(&text).context(error::ConfigParseSnafu {
            path: path.to_path_buf(),
        })
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_minutes * 60)
    }

    pub fn control_map_ttl(&self) -> Duration {
        Duration::from_secs(self.control_map_ttl_minutes * 60)
    }

    pub fn module_timeout(&self) -> Duration {
        Duration::from_secs(self.module_timeout_seconds)
    }

    /// Loads every PEM key named in `verification_keys` eagerly, so a missing or malformed key
    /// file is reported at startup rather than mid-update.
    pub fn load_verification_keys(&self) -> Result<Vec<checksum::PublicKey>> {
        self.verification_keys
            .iter()
            .map(|path| checksum::PublicKey::from_pem_file(path).context(error::KeyLoadSnafu))
            .collect()
    }
}
