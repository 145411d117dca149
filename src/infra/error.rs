use thiserror::Error;

/// Failures while wiring the process together at startup.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not connect to the relational store")]
    Connect(#[source] sqlx::Error),
    #[error("schema migration failed")]
    Migrate(#[source] sqlx::Error),
    #[error("failed to install tracing subscriber: {0}")]
    Telemetry(String),
    #[error("{0} is not configured")]
    Missing(&'static str),
}
