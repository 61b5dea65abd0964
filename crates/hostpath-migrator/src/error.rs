use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid settings")]
    Settings(#[from] migrator_core::CoreError),

    #[error("migration operation failed")]
    Operation(#[from] migrator_operations::OperationError),

    #[error("failed to connect to the cluster")]
    Client(#[from] kube::Error),

    #[error("invalid log filter")]
    LogFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to install log subscriber")]
    Logging(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to start the async runtime")]
    Runtime(#[source] std::io::Error),

    #[error("failed to listen for shutdown signals")]
    Signal(#[source] std::io::Error),

    #[error("no replica identity: pass --identity or set POD_NAME or HOSTNAME")]
    MissingIdentity,

    #[error("migration of '{volume}' failed at step '{step}'")]
    MigrationFailed {
        volume: String,
        step: String,
        #[source]
        reason: migrator_saga::SagaError<migrator_operations::OperationError>,
    },
}

pub type Result<T> = std::result::Result<T, CliError>;
