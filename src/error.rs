use thiserror::Error;
use uuid::Uuid;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum VigilError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A repository call failed
    #[error("Repository error: {0}")]
    Repository(String),

    /// A bounded operation did not complete in time
    #[error("Timed out after {ms}ms: {operation}")]
    Timeout {
        /// Name of the operation that exceeded its bound
        operation: &'static str,
        /// Configured bound in milliseconds
        ms: u64,
    },

    /// Returned value type does not match the expected type
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name
        expected: &'static str,
        /// Actual type description
        actual: String,
    },

    /// Trigger definition failed creation-time validation
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Referenced trigger does not exist
    #[error("Trigger not found: {0}")]
    TriggerNotFound(Uuid),

    /// Publishing a value to a downstream target failed
    #[error("Publish error: {0}")]
    Publish(String),

    /// Sending an email notification failed
    #[error("Email error: {0}")]
    Email(String),

    /// The runtime is shutting down and no longer accepts updates
    #[error("Runtime is shutting down")]
    ShuttingDown,
}

/// Convenient alias over [`Result`] using [`VigilError`]
pub type Result<T> = std::result::Result<T, VigilError>;
