//! Configuration structures for a backup run.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure.
///
/// Loaded from a TOML file with repeated `[[backup]]` sections, or built
/// directly by the CLI in property-scan mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backup host, `hostname` or `hostname:port`
    pub host: String,

    /// Remote user
    #[serde(default = "default_user")]
    pub user: String,

    /// Private key file for the secure channel
    #[serde(default = "default_key")]
    pub key: String,

    /// Maximum number of tasks streaming in parallel
    #[serde(default = "default_max_io_threads")]
    pub max_io_threads: usize,

    /// Backup specs, one `[[backup]]` section each
    #[serde(default, rename = "backup")]
    pub backups: Vec<BackupSpec>,
}

/// One `[[backup]]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupSpec {
    /// Source dataset; a trailing `*` selects siblings by basename
    pub local: String,

    /// Parent dataset on the remote that receives the streams
    pub remote_root: String,

    /// Fixed destination name under `remote_root` instead of the derived one
    #[serde(default)]
    pub remote_prefix: Option<String>,

    /// Expand `local` to itself plus every descendant dataset
    #[serde(default)]
    pub recursive: bool,

    /// Retention policy: empty, `lastone`, or a duration such as `24h`
    #[serde(default)]
    pub expire: String,
}

impl BackupSpec {
    /// True when `local` uses the trailing-`*` sibling selector.
    pub fn is_pattern(&self) -> bool {
        self.local.ends_with('*')
    }
}

fn default_user() -> String {
    "root".to_string()
}

fn default_key() -> String {
    "/root/.ssh/id_rsa".to_string()
}

fn default_max_io_threads() -> usize {
    1
}

impl Config {
    /// Parse a TOML configuration file's contents.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.max_io_threads == 0 {
            return Err(Error::Config("max_io_threads must be at least 1".to_string()));
        }
        for spec in &self.backups {
            if spec.local.trim().is_empty() {
                return Err(Error::Config("backup section without 'local'".to_string()));
            }
            if spec.remote_root.trim().is_empty() {
                return Err(Error::Config(format!(
                    "{}: backup section without 'remote_root'",
                    spec.local
                )));
            }
        }
        Ok(())
    }
}
