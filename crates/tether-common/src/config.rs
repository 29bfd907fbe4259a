//! ---
//! tether_section: "01-core-functionality"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Shared primitives and utilities for the client runtime."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logs_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_capture_drain_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_capture_chunk_size() -> usize {
    512
}

fn default_sync_entrypoint() -> bool {
    false
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the Tether client.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Grace period granted to the log-streaming task after the run body
    /// exits, before it is force-cancelled.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_logs_grace")]
    pub logs_grace: Duration,
    /// Optional cap on how long `run_forever` keeps the app alive. `None`
    /// runs until the process is interrupted.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub run_forever_timeout: Option<Duration>,
    /// Build the client support mount from the local checkout instead of
    /// referencing the published global mount.
    #[serde(default = "default_sync_entrypoint")]
    pub sync_entrypoint: bool,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tunables for the output-capture subsystem.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Bound on the teardown wait for the capture worker to drain its pipe.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_capture_drain_timeout")]
    pub drain_timeout: Duration,
    /// Size of each raw read issued against the capture pipe.
    #[serde(default = "default_capture_chunk_size")]
    pub chunk_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            drain_timeout: default_capture_drain_timeout(),
            chunk_size: default_capture_chunk_size(),
        }
    }
}

/// Logging output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            file_prefix: None,
            format: default_log_format(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            logs_grace: default_logs_grace(),
            run_forever_timeout: None,
            sync_entrypoint: default_sync_entrypoint(),
            capture: CaptureConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Metadata describing where a [`ClientConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedClientConfig {
    pub config: ClientConfig,
    pub source: Option<PathBuf>,
}

impl ClientConfig {
    pub const ENV_CONFIG_PATH: &str = "TETHER_CONFIG";

    /// Load configuration from disk, respecting the `TETHER_CONFIG` override.
    /// Falls back to built-in defaults when no candidate file exists, since
    /// the client is expected to work with zero local setup.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedClientConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedClientConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedClientConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        Ok(LoadedClientConfig {
            config: Self::default(),
            source: None,
        })
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<ClientConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.capture.chunk_size == 0 {
            return Err(anyhow!("capture.chunk_size must be non-zero"));
        }
        if self.capture.drain_timeout.is_zero() {
            return Err(anyhow!("capture.drain_timeout must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_no_candidates_exist() {
        let loaded =
            ClientConfig::load_with_source(&["does/not/exist.toml"]).expect("defaults load");
        assert!(loaded.source.is_none());
        assert_eq!(loaded.config.logs_grace, Duration::from_secs(10));
        assert_eq!(loaded.config.capture.chunk_size, 512);
    }

    #[test]
    fn loads_candidate_file_and_validates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tether.toml");
        let mut file = fs::File::create(&path).expect("create config");
        writeln!(
            file,
            "logs_grace = 5\n[capture]\ndrain_timeout = 1\nchunk_size = 64\n"
        )
        .expect("write config");

        let loaded = ClientConfig::load_with_source(&[&path]).expect("load");
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.logs_grace, Duration::from_secs(5));
        assert_eq!(loaded.config.capture.chunk_size, 64);
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tether.toml");
        fs::write(&path, "[capture]\nchunk_size = 0\n").expect("write config");
        assert!(ClientConfig::load(&[&path]).is_err());
    }
}
