//! Settings file and home directory resolution.
//!
//! ```toml
//! transport = "registry"   # registry | daemon | memory
//! workers = 4
//! timeout_secs = 30
//! daemon_host = "tcp://127.0.0.1:2375"
//!
//! [[registries]]
//! host = "localhost:5000"
//! insecure = true
//! ```

use crate::CoreError;
use mlist_remote::config::DEFAULT_TIMEOUT_SECS;
use mlist_remote::{RegistryConfig, TransportConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fetch concurrency used when nothing else is configured.
pub const DEFAULT_WORKERS: usize = 4;

const CONFIG_FILE: &str = "config.toml";
const HOME_ENV: &str = "MLIST_HOME";
const HOME_DIR: &str = ".mlist";

/// Where the index manager keeps its state.
pub trait ConfigProvider {
    /// Store root; indexes live under `<root>/manifests/`.
    fn root(&self) -> PathBuf;

    fn workers(&self) -> usize {
        DEFAULT_WORKERS
    }
}

impl ConfigProvider for PathBuf {
    fn root(&self) -> PathBuf {
        self.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip)]
    pub home: PathBuf,
    pub transport: String,
    pub workers: usize,
    pub timeout_secs: u64,
    pub daemon_host: Option<String>,
    pub registries: Vec<RegistryConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home: PathBuf::new(),
            transport: "registry".to_owned(),
            workers: DEFAULT_WORKERS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            daemon_host: None,
            registries: Vec::new(),
        }
    }
}

impl Settings {
    /// Read `<home>/config.toml`. A missing file yields defaults.
    pub fn load(home: &Path) -> Result<Self, CoreError> {
        let path = home.join(CONFIG_FILE);
        let mut settings = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str::<Settings>(&content)
                .map_err(|e| CoreError::Config(format!("invalid {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no config at {}, using defaults", path.display());
                Settings::default()
            }
            Err(e) => {
                return Err(CoreError::Config(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        if settings.workers == 0 {
            return Err(CoreError::Config("workers must be at least 1".to_owned()));
        }
        settings.home = home.to_path_buf();
        Ok(settings)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            registries: self.registries.clone(),
            daemon_host: self.daemon_host.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

impl ConfigProvider for Settings {
    fn root(&self) -> PathBuf {
        self.home.clone()
    }

    fn workers(&self) -> usize {
        self.workers
    }
}

/// `flag` if given, else `$MLIST_HOME`, else `~/.mlist`.
pub fn resolve_home(flag: Option<&Path>) -> Result<PathBuf, CoreError> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let home = std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoreError::Config(format!("neither {HOME_ENV} nor HOME is set")))?;
    Ok(PathBuf::from(home).join(HOME_DIR))
}
