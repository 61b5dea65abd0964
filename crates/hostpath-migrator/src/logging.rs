use tracing_subscriber::EnvFilter;

use crate::error::{CliError, Result};
use crate::settings::LogFormat;

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber writing to stderr.
///
/// `level` wins over `RUST_LOG`; without either everything at `info` and
/// above is logged.
pub(crate) fn init(level: Option<&str>, format: LogFormat) -> Result<()> {
    let filter = match level {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(CliError::Logging)
}
