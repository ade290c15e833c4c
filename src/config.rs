use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the gRPC server binds to.
    pub listen: String,
    /// Fixed worker count for CancelTasks/ReplayTasks fan-out.
    pub bulk_concurrency: usize,
    /// Extra attempts PutWorkflow makes after losing the version CAS.
    pub version_cas_retries: u32,
    /// Deadline applied to calls that do not carry a shorter one.
    pub default_deadline_ms: u64,
    /// Upper bound on the number of tasks a single filter may resolve to.
    pub max_candidates: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:50051".to_string(),
            bulk_concurrency: 8,
            version_cas_retries: 5,
            default_deadline_ms: 30_000,
            max_candidates: 10_000,
        }
    }
}

impl Config {
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("conductor.toml"))
    }

    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }

    /// Server endpoint clients connect to.
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.listen)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading config");
        if !path.exists() {
            tracing::debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        tracing::debug!(
            listen = %config.listen,
            bulk_concurrency = config.bulk_concurrency,
            version_cas_retries = config.version_cas_retries,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.bulk_concurrency == 0 {
            return Err(Error::InvalidArgument(
                "bulk_concurrency must be at least 1".to_string(),
            ));
        }
        if self.default_deadline_ms == 0 {
            return Err(Error::InvalidArgument(
                "default_deadline_ms must be positive".to_string(),
            ));
        }
        if self.max_candidates == 0 {
            return Err(Error::InvalidArgument(
                "max_candidates must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
