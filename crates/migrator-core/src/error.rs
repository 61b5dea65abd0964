use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("volume '{volume}' has a malformed lease start '{value}'")]
    MalformedLeaseStart {
        volume: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("volume '{volume}' has a malformed node mount list")]
    MalformedMountInfo {
        volume: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("volume '{0}' is not backed by a host path")]
    NotHostPath(String),

    #[error("failed to read settings file '{path}'")]
    SettingsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file '{path}'")]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("failed to serialize settings")]
    SettingsSerialize(#[from] toml::ser::Error),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
