//! # Configuration Management
//!
//! This module loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP__ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between Rust structs and TOML/JSON/env data
//! - **derive macros**: Generate `Debug`, `Clone`, `Serialize`, `Deserialize`
//! - **Result<T, E>**: Loading can fail, and callers must handle it
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`APP__SERVER__PORT`, `APP__RECORDING__FINALIZE_MAX_ATTEMPTS`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! The double-underscore separator is needed because several keys contain
//! single underscores themselves (`media_root`, `poll_interval_ms`).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
///
/// ## Why separate config structs:
/// Each group maps to one concern (network, storage, protocol timing,
/// external worker, capacity), and each group becomes one `[section]` in
/// config.toml.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub recording: RecordingConfig,
    pub transcription: TranscriptionConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where recordings are stored.
///
/// Recordings live under `{media_root}/RECORDINGS/{id}_{title}/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub media_root: PathBuf,
}

/// Timing of the recording protocol.
///
/// ## Fields:
/// - `finalize_max_attempts`: how many times `stop_recording` re-checks for
///   missing chunks before giving up with `DATA_LOSS`
/// - `finalize_retry_interval_ms`: pause between those attempts
/// - `heartbeat_interval_secs`: how often the server pings each socket
/// - `client_timeout_secs`: silence after which a socket counts as disconnected
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingConfig {
    pub finalize_max_attempts: u32,
    pub finalize_retry_interval_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// The external transcription command.
///
/// `args` may contain the placeholders `{input}`, `{output_dir}` and `{model}`.
/// When the requested language is not `auto`, `language_flag` and the
/// language are appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionConfig {
    pub program: String,
    pub args: Vec<String>,
    pub language_flag: String,
    pub poll_interval_ms: u64,
    pub default_model: String,
    pub default_language: String,
}

/// Capacity limits.
///
/// ## Fields:
/// - `max_concurrent_sessions`: WebSocket upgrades beyond this get HTTP 503
/// - `broadcast_capacity`: events buffered per broadcast topic before slow
///   subscribers start missing them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub broadcast_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                media_root: PathBuf::from("media"),
            },
            recording: RecordingConfig {
                finalize_max_attempts: 10,
                finalize_retry_interval_ms: 1000,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
            transcription: TranscriptionConfig {
                program: "python".to_string(),
                args: [
                    "dictaphone/aau-whisper/app.py",
                    "--job_name",
                    "files",
                    "-o",
                    "{output_dir}",
                    "-m",
                    "{model}",
                    "--input",
                    "{input}",
                    "--merge_speakers",
                    "--threads",
                    "4",
                    "--transcriber_gui",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                language_flag: "--language".to_string(),
                poll_interval_ms: 2000,
                default_model: "medium".to_string(),
                default_language: "auto".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
                broadcast_capacity: 256,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP__STORAGE__MEDIA_ROOT=/var/lib/dictaphone`: Move storage
    /// - `APP__TRANSCRIPTION__PROGRAM=whisper-cli`: Swap the worker
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.storage.media_root.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Media root cannot be empty"));
        }

        if self.recording.finalize_max_attempts == 0 {
            return Err(anyhow::anyhow!("Finalize needs at least one attempt"));
        }

        if self.recording.heartbeat_interval_secs == 0
            || self.recording.client_timeout_secs <= self.recording.heartbeat_interval_secs
        {
            return Err(anyhow::anyhow!(
                "Client timeout must be longer than a non-zero heartbeat interval"
            ));
        }

        if self.transcription.program.trim().is_empty() {
            return Err(anyhow::anyhow!("Transcription program cannot be empty"));
        }

        if self.transcription.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Transcription poll interval must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.broadcast_capacity == 0 {
            return Err(anyhow::anyhow!("Broadcast capacity must be greater than 0"));
        }

        Ok(())
    }
}

impl RecordingConfig {
    pub fn finalize_retry_interval(&self) -> Duration {
        Duration::from_millis(self.finalize_retry_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

impl TranscriptionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.recording.finalize_max_attempts, 10);
        assert_eq!(config.recording.finalize_retry_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.recording.client_timeout_secs = config.recording.heartbeat_interval_secs;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.recording.finalize_max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_worker_command_has_placeholders() {
        let args = AppConfig::default().transcription.args;
        for placeholder in ["{input}", "{output_dir}", "{model}"] {
            assert!(args.iter().any(|a| a == placeholder), "missing {}", placeholder);
        }
    }
}
