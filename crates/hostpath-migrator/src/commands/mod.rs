mod config;
mod lease;
mod migrate;
mod run;

use std::sync::Arc;

use clap::Subcommand;
use k8s_openapi::api::core::v1::PersistentVolume;
use migrator_core::MigrationSettings;
use migrator_operations::OperationError;
use migrator_operations::providers::{KubeCluster, KubeClusterSettings};
use migrator_operations::traits::VolumeStore;

use crate::error::{CliError, Result};
use crate::settings::GlobalArgs;

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Watch volumes and migrate legacy ones until interrupted
    Run,
    /// Migrate one volume now and print its step log
    Migrate {
        /// Name of the persistent volume
        volume: String,
    },
    /// Show the migration lease recorded on a volume
    Lease {
        /// Name of the persistent volume
        volume: String,
    },
    /// Print the effective settings as TOML
    Config,
}

impl Commands {
    pub(crate) fn execute(self, global: &GlobalArgs) -> Result<()> {
        match self {
            Self::Config => config::run(&global.settings()?),
            Self::Run => {
                let settings = global.settings()?;
                let identity = global.identity()?;
                runtime()?.block_on(run::run(settings, identity))
            }
            Self::Migrate { volume } => {
                let settings = global.settings()?;
                let identity = global.identity()?;
                runtime()?.block_on(migrate::run(settings, identity, &volume))
            }
            Self::Lease { volume } => {
                let settings = global.settings()?;
                let identity = global.identity()?;
                runtime()?.block_on(lease::run(&settings, &identity, &volume))
            }
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)
}

async fn connect(settings: &MigrationSettings) -> Result<Arc<KubeCluster>> {
    let client = kube::Client::try_default().await?;
    Ok(Arc::new(KubeCluster::new(
        client,
        KubeClusterSettings::from(settings),
    )))
}

async fn fetch_volume(cluster: &KubeCluster, name: &str) -> Result<PersistentVolume> {
    cluster
        .get(name)
        .await?
        .ok_or_else(|| OperationError::VolumeNotFound(name.to_string()).into())
}
