use migrator_core::MigrationSettings;

use crate::error::Result;

pub(crate) fn run(settings: &MigrationSettings) -> Result<()> {
    print!("{}", settings.to_toml()?);
    Ok(())
}
