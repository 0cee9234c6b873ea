//! Configuration for scans.
//!
//! **File Locations** (checked in order):
//! 1. `--config` flag
//! 2. `FINOPS_CONFIG` environment variable
//! 3. `.finops/config.toml` in current directory
//! 4. `finops.toml` in current directory
//! 5. `~/.finops/config.toml`
//!
//! Falls back to built-in defaults when no file is found.
//!
//! ```toml
//! region = "eu-west-1"
//! profile = "billing"
//! services = ["ec2", "ebs", "s3"]
//! required_tags = ["team", "env"]
//!
//! [thresholds]
//! snapshot_max_age_days = 180
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::client::{DEFAULT_PROGRAM, DEFAULT_TIMEOUT_SECS};
use crate::error::ConfigError;
use crate::recommendation::Severity;
use crate::services::ServiceKind;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "FINOPS_CONFIG";

/// Rule thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Days an instance may stay stopped before it is flagged.
    pub stopped_instance_days: u32,
    /// Snapshot age (days) considered stale.
    pub snapshot_max_age_days: u32,
    /// Minimum RDS automated backup retention (days).
    pub rds_min_backup_retention_days: u32,
    /// Lambda memory size (MB) at or above which sizing is reviewed.
    pub lambda_memory_review_mb: u32,
    /// Stored size (GiB) above which a never-expiring log group is medium severity.
    pub log_group_review_gib: f64,
    /// Retention (days) above which a log group is flagged.
    pub log_max_retention_days: u32,
    /// Oldest EKS minor version still in standard support.
    pub eks_min_standard_version: String,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            stopped_instance_days: 30,
            snapshot_max_age_days: 90,
            rds_min_backup_retention_days: 7,
            lambda_memory_review_mb: 3008,
            log_group_review_gib: 1.0,
            log_max_retention_days: 731,
            eks_min_standard_version: "1.30".to_string(),
        }
    }
}

impl Thresholds {
    /// Reject values that would make rules meaningless.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let day_counts = [
            ("stopped_instance_days", self.stopped_instance_days),
            ("snapshot_max_age_days", self.snapshot_max_age_days),
            ("log_max_retention_days", self.log_max_retention_days),
            ("lambda_memory_review_mb", self.lambda_memory_review_mb),
        ];
        for (name, value) in day_counts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        if !self.log_group_review_gib.is_finite() || self.log_group_review_gib < 0.0 {
            return Err(ConfigError::Invalid(
                "log_group_review_gib must be a non-negative number".to_string(),
            ));
        }
        if parse_minor_version(&self.eks_min_standard_version).is_none() {
            return Err(ConfigError::Invalid(format!(
                "eks_min_standard_version must look like 1.30, got {}",
                self.eks_min_standard_version
            )));
        }
        Ok(())
    }
}

/// Settings for the `aws` CLI client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsCliSettings {
    /// CLI executable.
    pub program: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for AwsCliSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FinopsConfig {
    /// Region to scan. `None` defers to the CLI's own resolution.
    pub region: Option<String>,
    /// Named AWS profile.
    pub profile: Option<String>,
    /// Services to scan; empty means all.
    pub services: Vec<ServiceKind>,
    /// Tag keys every taggable resource should carry.
    pub required_tags: Vec<String>,
    /// Include normalized resource records in reports.
    pub include_resources: bool,
    /// Drop recommendations below this severity.
    pub min_severity: Option<Severity>,
    /// CLI client settings.
    pub aws_cli: AwsCliSettings,
    /// Rule thresholds.
    pub thresholds: Thresholds,
}

impl FinopsConfig {
    /// Load config from an explicit path or the standard locations.
    ///
    /// # Errors
    /// Returns an error if a config file exists but cannot be read, parsed or validated.
    pub async fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_path(path).await;
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            info!(path = %path, "Loading config from {CONFIG_ENV}");
            return Self::load_from_path(Path::new(&path)).await;
        }

        for path in Self::standard_locations() {
            if path.exists() {
                info!(path = %path.display(), "Loading config");
                return Self::load_from_path(&path).await;
            }
        }

        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load and validate config from a specific file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let config = Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate config from TOML text.
    ///
    /// # Errors
    /// Returns an error if the text is not valid config.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.thresholds.validate()?;
        Ok(config)
    }

    /// Services selected for scanning, in catalog order.
    #[must_use]
    pub fn selected_services(&self) -> Vec<ServiceKind> {
        if self.services.is_empty() {
            ServiceKind::ALL.to_vec()
        } else {
            ServiceKind::ALL
                .iter()
                .copied()
                .filter(|kind| self.services.contains(kind))
                .collect()
        }
    }

    fn standard_locations() -> Vec<PathBuf> {
        let mut locations = vec![
            PathBuf::from(".finops/config.toml"),
            PathBuf::from("finops.toml"),
        ];
        if let Ok(home) = std::env::var("HOME") {
            locations.push(PathBuf::from(home).join(".finops/config.toml"));
        }
        locations
    }
}

/// Parse `"1.29"` into `(1, 29)`.
#[must_use]
pub fn parse_minor_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}
