//! Error types for workmill.

/// Top-level error type for the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Task store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Backend command failed: {0}")]
    Backend(String),

    #[error("Record serialization error: {0}")]
    Serialization(String),

    #[error("Manage command rejected: {reason}")]
    InvalidCommand { reason: String },
}

/// Periodic schedule errors.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Cannot read schedule file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Control loop errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Malformed {name} command {id}: {reason}")]
    MalformedCommand {
        name: String,
        id: String,
        reason: String,
    },

    #[error("Worker {worker} out of range for a pool of {size}")]
    WorkerOutOfRange { worker: usize, size: usize },
}

/// Producer-side errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Method name must not be empty")]
    EmptyMethod,

    #[error("Worker numbers are 1-based, 0 is not a valid slot")]
    ZeroWorker,
}

/// Result type alias for the dispatcher.
pub type Result<T> = std::result::Result<T, Error>;
