use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};

const DEFAULT_TRANSFORM_IMAGE: &str = "127.0.0.1:29006/library/busybox:1.25";
const DEFAULT_CSI_DRIVER: &str = "xfshostpathplugin";
const DEFAULT_JOB_NAMESPACE: &str = "kube-system";
const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Declared timeout of each migration step.
///
/// The sum is the saga's cumulative budget; twice the sum is the age at
/// which another replica's lease counts as abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StepTimeouts {
    #[serde(with = "humantime_serde")]
    pub lease_check: Duration,
    #[serde(with = "humantime_serde")]
    pub transform_content: Duration,
    #[serde(with = "humantime_serde")]
    pub provision_replacement: Duration,
    #[serde(with = "humantime_serde")]
    pub retire_legacy: Duration,
    #[serde(with = "humantime_serde")]
    pub publish_replacement: Duration,
    #[serde(with = "humantime_serde")]
    pub await_binding: Duration,
    #[serde(with = "humantime_serde")]
    pub restart_dependents: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            lease_check: Duration::from_secs(3),
            transform_content: Duration::from_secs(3 * 60),
            provision_replacement: Duration::from_secs(3),
            retire_legacy: Duration::from_secs(3),
            publish_replacement: Duration::from_secs(3),
            await_binding: Duration::from_secs(50),
            restart_dependents: Duration::from_secs(5 * 60),
        }
    }
}

impl StepTimeouts {
    #[must_use]
    pub fn total(&self) -> Duration {
        [
            self.lease_check,
            self.transform_content,
            self.provision_replacement,
            self.retire_legacy,
            self.publish_replacement,
            self.await_binding,
            self.restart_dependents,
        ]
        .into_iter()
        .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationSettings {
    /// Pause after each successful migration.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Image of the per-node job that switches quota accounting.
    pub transform_image: String,
    /// Command run by the job; the mounted host directories are appended.
    pub transform_command: Vec<String>,
    pub csi_driver: String,
    pub job_namespace: String,
    pub queue_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub job_completion_wait: Duration,
    #[serde(with = "humantime_serde")]
    pub binding_wait: Duration,
    /// Grace period given to dependent pods when they are restarted.
    #[serde(with = "humantime_serde")]
    pub dependent_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub delete_wait: Duration,
    pub timeouts: StepTimeouts,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            transform_image: DEFAULT_TRANSFORM_IMAGE.to_string(),
            transform_command: default_transform_command(),
            csi_driver: DEFAULT_CSI_DRIVER.to_string(),
            job_namespace: DEFAULT_JOB_NAMESPACE.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: Duration::from_secs(2),
            job_completion_wait: Duration::from_secs(120),
            binding_wait: Duration::from_secs(40),
            dependent_grace: Duration::from_secs(60),
            delete_wait: Duration::from_secs(60),
            timeouts: StepTimeouts::default(),
        }
    }
}

fn default_transform_command() -> Vec<String> {
    [
        "/bin/sh",
        "-c",
        r#"set -e; for dir in "$@"; do echo csi > "$dir/.quota-type"; done"#,
        "change-quota-type",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl MigrationSettings {
    /// Load settings from a TOML file; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting settings are invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::SettingsRead {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&content).map_err(|source| CoreError::SettingsParse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        debug!(path = %path.display(), "loaded migration settings");
        settings.validate()?;
        Ok(settings)
    }

    /// # Errors
    ///
    /// Returns an error if the settings cannot be represented as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(CoreError::InvalidSettings(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.transform_image.trim().is_empty() {
            return Err(CoreError::InvalidSettings(
                "transform_image must not be empty".to_string(),
            ));
        }
        if self.transform_command.is_empty() {
            return Err(CoreError::InvalidSettings(
                "transform_command must not be empty".to_string(),
            ));
        }
        if self.csi_driver.trim().is_empty() {
            return Err(CoreError::InvalidSettings(
                "csi_driver must not be empty".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(CoreError::InvalidSettings(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.timeouts.total().is_zero() {
            return Err(CoreError::InvalidSettings(
                "step timeouts must not all be zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = MigrationSettings::default();

        assert_eq!(settings.interval, Duration::from_secs(3600));
        assert_eq!(settings.transform_image, "127.0.0.1:29006/library/busybox:1.25");
        assert_eq!(settings.csi_driver, "xfshostpathplugin");
        assert_eq!(settings.queue_capacity, 100);
        assert_eq!(settings.job_completion_wait, Duration::from_secs(120));
        assert_eq!(settings.binding_wait, Duration::from_secs(40));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn default_budget_is_sum_of_step_timeouts() {
        assert_eq!(StepTimeouts::default().total(), Duration::from_secs(3 + 180 + 3 + 3 + 3 + 50 + 300));
    }

    #[test]
    fn partial_file_keeps_defaults() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            r#"
interval = "10m"
csi_driver = "other.csi.example.com"

[timeouts]
await_binding = "2m"
"#
        )?;

        let settings = MigrationSettings::load(file.path())?;

        assert_eq!(settings.interval, Duration::from_secs(600));
        assert_eq!(settings.csi_driver, "other.csi.example.com");
        assert_eq!(settings.timeouts.await_binding, Duration::from_secs(120));
        assert_eq!(settings.timeouts.lease_check, Duration::from_secs(3));
        assert_eq!(settings.transform_image, DEFAULT_TRANSFORM_IMAGE);
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "intervall = \"1h\"")?;

        let err = MigrationSettings::load(file.path()).expect_err("should reject typo");

        assert!(matches!(err, CoreError::SettingsParse { .. }));
        Ok(())
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = MigrationSettings::load(Path::new("/nonexistent/migrator.toml"))
            .expect_err("should fail");

        assert!(matches!(err, CoreError::SettingsRead { .. }));
    }

    #[test]
    fn zero_queue_capacity_is_invalid() {
        let settings = MigrationSettings {
            queue_capacity: 0,
            ..MigrationSettings::default()
        };

        let err = settings.validate().expect_err("should be invalid");

        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn empty_image_is_invalid() {
        let settings = MigrationSettings {
            transform_image: "  ".to_string(),
            ..MigrationSettings::default()
        };

        assert!(settings.validate().is_err());
    }

    #[test]
    fn rendered_toml_loads_back() -> anyhow::Result<()> {
        let settings = MigrationSettings {
            interval: Duration::from_secs(90),
            ..MigrationSettings::default()
        };
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(settings.to_toml()?.as_bytes())?;

        let loaded = MigrationSettings::load(file.path())?;

        assert_eq!(loaded, settings);
        Ok(())
    }
}
