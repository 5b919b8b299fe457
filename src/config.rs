use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestration::RetryPolicy;
use crate::rbac::RoleCatalog;
use crate::{tlog, tlog_debug, Error, Result};

/// Conditional-write retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    /// Total write attempts per claim, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Extra random delay as a fraction of the computed delay, in [0, 1].
    pub jitter_ratio: f64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 25,
            backoff_cap_ms: 500,
            jitter_ratio: 0.5,
        }
    }
}

impl ClaimConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
            self.jitter_ratio,
        )
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Validation(
                "claim.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(Error::Validation(format!(
                "claim.jitter_ratio must be within [0, 1], got {}",
                self.jitter_ratio
            )));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(Error::Validation(format!(
                "claim.backoff_cap_ms ({}) is below backoff_base_ms ({})",
                self.backoff_cap_ms, self.backoff_base_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub claim: ClaimConfig,
    /// Role name -> permission patterns, replacing the built-in entry.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub roles: BTreeMap<String, Vec<String>>,
}

impl Config {
    pub fn tasklane_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".tasklane"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::tasklane_dir()?.join("tasklane.toml"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.claim.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        tlog_debug!("Config::load_from path={}", path.display());
        if !path.exists() {
            tlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config = Self::from_toml_str(&fs::read_to_string(path)?)?;
        tlog!(
            "Config loaded: max_attempts={}, role overrides={}",
            config.claim.max_attempts,
            config.roles.len()
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                tlog_debug!("Creating config directory: {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Built-in role catalog with this config's overrides applied.
    pub fn role_catalog(&self) -> Result<RoleCatalog> {
        RoleCatalog::with_overrides(&self.roles)
    }
}
