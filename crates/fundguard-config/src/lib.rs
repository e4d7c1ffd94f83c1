//! Configuration management for Fundguard
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (FUNDGUARD_* prefix, `__` between section and key)
//! 2. fundguard.local.toml (gitignored, local overrides)
//! 3. fundguard.toml (git-tracked, project config)
//! 4. ~/.config/fundguard/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use fundguard_types::IpRange;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Fundguard configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundguardConfig {
    pub vault: VaultConfig,
    pub detection: DetectionConfig,
    pub audit: AuditConfig,
    pub notifications: NotificationConfig,
}

/// Document vault settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Environment variable holding the hex or base64 vault key.
    pub key_env_var: String,
    /// Generate a throwaway key when the variable is missing.
    pub allow_ephemeral_key: bool,
    /// Directory for durable, file-backed encryption metadata. When unset the
    /// metadata lives in process memory.
    pub metadata_dir: Option<PathBuf>,
    /// Expire metadata entries after this many seconds. Unset means entries
    /// live as long as the store does.
    pub metadata_ttl_secs: Option<u64>,
    /// Documents larger than this are refused before encryption.
    pub max_document_bytes: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_env_var: "FUNDGUARD_ENCRYPTION_KEY".to_string(),
            allow_ephemeral_key: true,
            metadata_dir: None,
            metadata_ttl_secs: None,
            max_document_bytes: 25 * 1024 * 1024,
        }
    }
}

/// Breach detection heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub suspicious_ip_ranges: Vec<String>,
    /// Case-insensitive substrings matched against the user agent.
    pub suspicious_user_agents: Vec<String>,
    /// Requests per IP per window above which access is unauthorized.
    pub request_rate_limit: u64,
    pub rate_window_secs: u64,
    pub bulk_record_threshold: u64,
    pub bulk_download_threshold: u64,
    pub disallowed_extensions: Vec<String>,
    /// First in-hours hour; earlier hours are out of hours.
    pub quiet_hours_start: u32,
    /// Last in-hours hour; later hours are out of hours.
    pub quiet_hours_end: u32,
    /// Offset of platform local time from UTC.
    pub utc_offset_minutes: i32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            suspicious_ip_ranges: vec!["192.168.1.0/24".to_string(), "10.0.0.0/8".to_string()],
            suspicious_user_agents: ["bot", "crawler", "scraper", "curl", "wget"]
                .into_iter()
                .map(String::from)
                .collect(),
            request_rate_limit: 100,
            rate_window_secs: 60,
            bulk_record_threshold: 100,
            bulk_download_threshold: 10,
            disallowed_extensions: ["exe", "bat", "sh", "ps1"]
                .into_iter()
                .map(String::from)
                .collect(),
            quiet_hours_start: 6,
            quiet_hours_end: 22,
            utc_offset_minutes: 0,
        }
    }
}

/// Audit trail pattern thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub suspicious_window_secs: u64,
    pub download_threshold: usize,
    pub off_hours_threshold: usize,
    pub rapid_window_secs: u64,
    pub rapid_action_threshold: usize,
    pub report_default_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            suspicious_window_secs: 3600,
            download_threshold: 10,
            off_hours_threshold: 5,
            rapid_window_secs: 300,
            rapid_action_threshold: 20,
            report_default_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    /// Addresses that receive breach alerts and summaries.
    pub admin_emails: Vec<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            admin_emails: Vec::new(),
        }
    }
}

impl DetectionConfig {
    /// Parsed suspicious ranges. Call after [`FundguardConfig::validate`].
    pub fn ip_ranges(&self) -> std::result::Result<Vec<IpRange>, ConfigError> {
        self.suspicious_ip_ranges
            .iter()
            .map(|raw| {
                raw.parse::<IpRange>()
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))
            })
            .collect()
    }
}

impl FundguardConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parse a single TOML document, without layering.
    pub fn from_toml_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for tests and local development: no ephemeral key
    /// surprises, no notification fan-out.
    pub fn development() -> Self {
        Self {
            notifications: NotificationConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Production refuses to run without a configured key.
    pub fn production() -> Self {
        Self {
            vault: VaultConfig {
                allow_ephemeral_key: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if let Some(dir) = &self.vault.metadata_dir {
            if dir.is_relative() {
                self.vault.metadata_dir = Some(base.join(dir));
            }
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.detection.ip_ranges()?;

        let d = &self.detection;
        if d.quiet_hours_start > 23 || d.quiet_hours_end > 23 {
            return Err(ConfigError::ValidationError(format!(
                "quiet hours must be within 0-23, got {}-{}",
                d.quiet_hours_start, d.quiet_hours_end
            )));
        }
        if d.quiet_hours_start > d.quiet_hours_end {
            return Err(ConfigError::ValidationError(format!(
                "quiet_hours_start ({}) is after quiet_hours_end ({})",
                d.quiet_hours_start, d.quiet_hours_end
            )));
        }
        if d.utc_offset_minutes.unsigned_abs() >= 24 * 60 {
            return Err(ConfigError::ValidationError(format!(
                "utc_offset_minutes out of range: {}",
                d.utc_offset_minutes
            )));
        }
        if d.rate_window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "rate_window_secs must be positive".to_string(),
            ));
        }

        let a = &self.audit;
        if a.suspicious_window_secs == 0 || a.rapid_window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "audit windows must be positive".to_string(),
            ));
        }
        if a.rapid_window_secs > a.suspicious_window_secs {
            return Err(ConfigError::ValidationError(format!(
                "rapid_window_secs ({}) exceeds suspicious_window_secs ({})",
                a.rapid_window_secs, a.suspicious_window_secs
            )));
        }

        if self.vault.metadata_ttl_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "metadata_ttl_secs must be positive when set".to_string(),
            ));
        }
        if self.vault.key_env_var.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "vault.key_env_var must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
