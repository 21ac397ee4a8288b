//! Error types for sqlcursor.
//!
//! Defines the error enum shared by every engine component. Each variant maps
//! to one failure class of the handle/binding engine; all of them surface as
//! the `-1` sentinel at the facade.

use thiserror::Error;

/// Main error type for engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A handle pool has no free slot left.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The underlying service could not allocate a native handle.
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// Opening a session to a data source failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The underlying service reported a hard error while running a statement.
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Column metadata could not be queried or a buffer could not be bound.
    #[error("Binding failed: {0}")]
    BindingFailed(String),

    /// Populating a host-side destination structure failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The handle does not name a live connection or cursor.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// The cursor has no result set to read from.
    #[error("No result set: {0}")]
    NoResultSet(String),

    /// The process-wide environment context could not be created.
    #[error("Environment error: {0}")]
    Environment(String),

    /// Configuration errors (unreadable file, invalid values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Creates a capacity error with the given message.
    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::CapacityExceeded(msg.into())
    }

    /// Creates an allocation error with the given message.
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::AllocationFailed(msg.into())
    }

    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// Creates an execution error with the given message.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::ExecutionError(msg.into())
    }

    /// Creates a binding error with the given message.
    pub fn binding(msg: impl Into<String>) -> Self {
        Self::BindingFailed(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    /// Creates an invalid handle error with the given message.
    pub fn invalid_handle(msg: impl Into<String>) -> Self {
        Self::InvalidHandle(msg.into())
    }

    /// Creates a missing result set error with the given message.
    pub fn no_result_set(msg: impl Into<String>) -> Self {
        Self::NoResultSet(msg.into())
    }

    /// Creates an environment error with the given message.
    pub fn environment(msg: impl Into<String>) -> Self {
        Self::Environment(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::CapacityExceeded(_) => "Capacity Error",
            Self::AllocationFailed(_) => "Allocation Error",
            Self::ConnectionFailed(_) => "Connection Error",
            Self::ExecutionError(_) => "Execution Error",
            Self::BindingFailed(_) => "Binding Error",
            Self::SerializationError(_) => "Serialization Error",
            Self::InvalidHandle(_) => "Handle Error",
            Self::NoResultSet(_) => "Cursor Error",
            Self::Environment(_) => "Environment Error",
            Self::Config(_) => "Configuration Error",
        }
    }
}

/// Result type alias using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;
