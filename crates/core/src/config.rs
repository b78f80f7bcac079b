//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Maximum size of a single chunk request body in bytes.
    #[serde(default = "default_max_chunk_body_bytes")]
    pub max_chunk_body_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_chunk_body_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            max_chunk_body_bytes: default_max_chunk_body_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_body_bytes == 0 {
            return Err("server.max_chunk_body_bytes must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Upload pipeline configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory that receives temp files and published uploads.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Sessions allowed to write to disk at the same time.
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    /// Admitted but unfinished sessions before new files are refused.
    #[serde(default = "default_max_pending_sessions")]
    pub max_pending_sessions: usize,
    /// Seconds without a chunk before a session fails with a timeout.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Seconds a session may wait for a worker slot.
    #[serde(default = "default_slot_acquire_timeout_secs")]
    pub slot_acquire_timeout_secs: u64,
    /// Chunks buffered per session between the caller and its worker.
    #[serde(default = "default_chunk_queue_depth")]
    pub chunk_queue_depth: usize,
    /// Files larger than this skip the admission check.
    #[serde(default = "default_admission_scan_threshold_bytes")]
    pub admission_scan_threshold_bytes: u64,
    /// Largest declared size accepted at admission (default: unlimited).
    #[serde(default)]
    pub max_file_size: Option<u64>,
    /// Extensions refused at admission, compared case-insensitively without the dot.
    #[serde(default)]
    pub blocked_extensions: Vec<String>,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

fn default_max_concurrent_uploads() -> usize {
    4
}

fn default_max_pending_sessions() -> usize {
    1024
}

fn default_idle_timeout_secs() -> u64 {
    300 // 5 minutes
}

fn default_slot_acquire_timeout_secs() -> u64 {
    600 // 10 minutes
}

fn default_chunk_queue_depth() -> usize {
    4
}

fn default_admission_scan_threshold_bytes() -> u64 {
    100 * 1024 * 1024
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            max_pending_sessions: default_max_pending_sessions(),
            idle_timeout_secs: default_idle_timeout_secs(),
            slot_acquire_timeout_secs: default_slot_acquire_timeout_secs(),
            chunk_queue_depth: default_chunk_queue_depth(),
            admission_scan_threshold_bytes: default_admission_scan_threshold_bytes(),
            max_file_size: None,
            blocked_extensions: Vec::new(),
        }
    }
}

impl UploadConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn slot_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.slot_acquire_timeout_secs)
    }

    /// Validate upload configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_uploads == 0 {
            return Err("upload.max_concurrent_uploads must be at least 1".to_string());
        }
        if self.max_pending_sessions < self.max_concurrent_uploads {
            return Err(format!(
                "upload.max_pending_sessions ({}) must be >= upload.max_concurrent_uploads ({})",
                self.max_pending_sessions, self.max_concurrent_uploads
            ));
        }
        if self.chunk_queue_depth == 0 {
            return Err("upload.chunk_queue_depth must be at least 1".to_string());
        }
        // tokio::time::timeout panics on durations that overflow an Instant
        if self.idle_timeout_secs == 0 || self.idle_timeout_secs > u32::MAX as u64 {
            return Err(format!(
                "upload.idle_timeout_secs {} must be between 1 and {}",
                self.idle_timeout_secs,
                u32::MAX
            ));
        }
        if self.slot_acquire_timeout_secs == 0 || self.slot_acquire_timeout_secs > u32::MAX as u64
        {
            return Err(format!(
                "upload.slot_acquire_timeout_secs {} must be between 1 and {}",
                self.slot_acquire_timeout_secs,
                u32::MAX
            ));
        }
        Ok(())
    }
}

/// How the resource probe is chosen at startup.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// Use host signals when the platform exposes them.
    #[default]
    Auto,
    /// Never read host signals.
    Fixed,
}

/// Chunk sizing and yield pacing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default)]
    pub probe: ProbeMode,
    /// Use this chunk size for every file instead of the size tiers.
    #[serde(default)]
    pub fixed_chunk_size: Option<usize>,
    /// Sleep this long after every chunk instead of adapting.
    #[serde(default)]
    pub fixed_yield_interval_ms: Option<u64>,
    /// Pause at yield points when several uploads share the host.
    #[serde(default = "default_contended_pause_ms")]
    pub contended_pause_ms: u64,
    /// Pause at yield points while the host is under pressure.
    #[serde(default = "default_pressure_pause_ms")]
    pub pressure_pause_ms: u64,
    /// Load per core at which the host counts as CPU-bound.
    #[serde(default = "default_cpu_pressure_threshold")]
    pub cpu_pressure_threshold: f32,
    /// Available memory below which the host counts as memory-bound.
    #[serde(default = "default_low_memory_bytes")]
    pub low_memory_bytes: u64,
}

fn default_contended_pause_ms() -> u64 {
    1
}

fn default_pressure_pause_ms() -> u64 {
    10
}

fn default_cpu_pressure_threshold() -> f32 {
    0.85
}

fn default_low_memory_bytes() -> u64 {
    256 * 1024 * 1024
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            probe: ProbeMode::default(),
            fixed_chunk_size: None,
            fixed_yield_interval_ms: None,
            contended_pause_ms: default_contended_pause_ms(),
            pressure_pause_ms: default_pressure_pause_ms(),
            cpu_pressure_threshold: default_cpu_pressure_threshold(),
            low_memory_bytes: default_low_memory_bytes(),
        }
    }
}

impl PacingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.fixed_chunk_size == Some(0) {
            return Err("pacing.fixed_chunk_size must be greater than 0".to_string());
        }
        if !(self.cpu_pressure_threshold.is_finite() && self.cpu_pressure_threshold > 0.0) {
            return Err(format!(
                "pacing.cpu_pressure_threshold {} must be a positive number",
                self.cpu_pressure_threshold
            ));
        }
        Ok(())
    }
}

/// Encryption parameters for password-derived keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// PBKDF2-HMAC-SHA256 rounds for new password-encrypted uploads.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

fn default_kdf_iterations() -> u32 {
    100_000
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: default_kdf_iterations(),
        }
    }
}

impl EncryptionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.kdf_iterations == 0 {
            return Err("encryption.kdf_iterations must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

impl AppConfig {
    /// Create a test configuration rooted at `upload_dir`.
    ///
    /// **For testing only.** Uses fixed pacing inputs and a low KDF round
    /// count so password tests stay fast.
    pub fn for_testing(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            upload: UploadConfig {
                upload_dir: upload_dir.into(),
                ..UploadConfig::default()
            },
            pacing: PacingConfig {
                probe: ProbeMode::Fixed,
                ..PacingConfig::default()
            },
            encryption: EncryptionConfig {
                kdf_iterations: 1_000,
            },
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> crate::Result<()> {
        self.server
            .validate()
            .and_then(|()| self.upload.validate())
            .and_then(|()| self.pacing.validate())
            .and_then(|()| self.encryption.validate())
            .map_err(crate::Error::InvalidConfig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(AppConfig::default().validate().is_ok());
        assert!(AppConfig::for_testing("/tmp/x").validate().is_ok());
    }

    #[test]
    fn test_server_config_defaults_metrics_enabled() {
        let config = ServerConfig::default();
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_upload_config_deserialize_partial() {
        let json = r#"{"max_concurrent_uploads": 2}"#;
        let config: UploadConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_concurrent_uploads, 2);
        assert_eq!(config.chunk_queue_depth, 4);
        assert_eq!(config.max_pending_sessions, 1024);
        assert!(config.max_file_size.is_none());
    }

    #[test]
    fn test_upload_config_rejects_zero_slots() {
        let config = UploadConfig {
            max_concurrent_uploads: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_config_rejects_pending_below_slots() {
        let config = UploadConfig {
            max_concurrent_uploads: 8,
            max_pending_sessions: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_config_rejects_zero_idle_timeout() {
        let config = UploadConfig {
            idle_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_probe_mode_lowercase() {
        let config: PacingConfig = serde_json::from_str(r#"{"probe":"fixed"}"#).unwrap();
        assert_eq!(config.probe, ProbeMode::Fixed);
        assert_eq!(config.pressure_pause_ms, 10);
    }

    #[test]
    fn test_zero_kdf_iterations_rejected() {
        let mut config = AppConfig::default();
        config.encryption.kdf_iterations = 0;
        assert!(matches!(
            config.validate(),
            Err(crate::Error::InvalidConfig(_))
        ));
    }
}
