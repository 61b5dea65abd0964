use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use migrator_core::MigrationSettings;

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Flags shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct GlobalArgs {
    /// Settings file (TOML); missing keys keep their defaults
    #[arg(long, short = 'c', global = true, env = "HOSTPATH_MIGRATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter such as `debug` or `migrator_operations=trace` (default: RUST_LOG, then info)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t)]
    pub log_format: LogFormat,

    /// Pause after each successful migration, e.g. `30m`
    #[arg(long, global = true, value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Image of the per-node quota transform job
    #[arg(long, global = true)]
    pub transform_image: Option<String>,

    /// CSI driver name used for replacement volumes
    #[arg(long, global = true)]
    pub csi_driver: Option<String>,

    /// Lease holder name of this replica (default: POD_NAME, then HOSTNAME)
    #[arg(long, global = true, env = "POD_NAME")]
    pub identity: Option<String>,
}

fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

impl GlobalArgs {
    /// Settings from the file (or defaults) with command-line overrides.
    pub(crate) fn settings(&self) -> Result<MigrationSettings> {
        let mut settings = match self.config.as_deref() {
            Some(path) => MigrationSettings::load(path)?,
            None => MigrationSettings::default(),
        };

        if let Some(interval) = self.interval {
            settings.interval = interval;
        }
        if let Some(image) = &self.transform_image {
            settings.transform_image.clone_from(image);
        }
        if let Some(driver) = &self.csi_driver {
            settings.csi_driver.clone_from(driver);
        }

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn identity(&self) -> Result<String> {
        self.identity
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .filter(|identity| !identity.trim().is_empty())
            .ok_or(CliError::MissingIdentity)
    }
}
