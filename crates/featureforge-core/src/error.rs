//! Error types for FeatureForge
//!
//! Every fallible operation in the orchestration core returns [`Result`].
//! The variants follow the failure categories callers need to tell apart:
//!
//! - registration: a key was bound twice
//! - lookup: a provider type or job kind has no factory
//! - deserialization: configuration bytes could not be decoded
//! - capability: a provider cannot act as the requested store
//! - execution: a backend operation failed while a job was running
//!
//! Execution errors only reach callers through a job watcher; everything
//! else is returned synchronously.

use thiserror::Error;

use crate::provider::{Capability, ProviderType};

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors that can occur in FeatureForge
#[derive(Error, Debug)]
pub enum Error {
    /// A factory is already bound to this key
    ///
    /// The registry keeps the first binding untouched.
    #[error("{registry} factory already registered for '{key}'")]
    DuplicateRegistration { registry: &'static str, key: String },

    /// No provider factory is registered for the requested type
    #[error("no provider of type: {0}")]
    UnknownProviderType(String),

    /// No runner factory is registered for the requested job kind
    #[error("no runner for job kind: {0}")]
    UnknownJobKind(String),

    /// Configuration bytes could not be decoded
    ///
    /// `kind` names the configuration being decoded; serde_json's message
    /// carries the offending field and position.
    #[error("failed to deserialize {kind} config: {source}")]
    Deserialization {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be encoded
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The provider does not support the requested store capability
    #[error("{concrete} ({provider_type}) cannot be used as an {capability}")]
    UnsupportedCapability {
        provider_type: ProviderType,
        capability: Capability,
        concrete: &'static str,
    },

    /// A table, materialization or training set does not exist
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// A table, materialization or training set already exists
    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },

    /// Invalid input from the caller
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The backend does not implement this operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Backend driver error (connection, query, protocol)
    ///
    /// Driver errors are wrapped to preserve their context.
    #[error("Storage error: {0}")]
    StorageError(#[from] anyhow::Error),

    /// A job finished in the failed state
    #[error("job '{job}' failed: {message}")]
    JobFailed { job: String, message: String },

    /// Internal error - this should rarely happen
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl Error {
    /// Creates a Deserialization error for the named config kind
    pub fn deserialization(kind: &'static str, source: serde_json::Error) -> Self {
        Self::Deserialization { kind, source }
    }

    /// Creates a NotFound error
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Creates an AlreadyExists error
    pub fn already_exists(kind: &'static str, id: impl ToString) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.to_string(),
        }
    }

    /// Creates an InvalidInput error from a string
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates an Unsupported error from a string
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Creates a StorageError from any driver error
    pub fn storage<E: std::fmt::Display>(context: &str, err: E) -> Self {
        Self::StorageError(anyhow::anyhow!("{}: {}", context, err))
    }

    /// Creates an InternalError from a string
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// True for NotFound errors
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for AlreadyExists errors
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}
