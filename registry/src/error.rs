//! Registry error types.

use crate::config::ConfigError;
use crate::identity::IdentityError;
use crate::types::RequestId;
use gift_registry_core::catalog::CatalogError;
use gift_registry_runtime::StoreError;
use thiserror::Error;

/// Errors surfaced by the registry session and binary.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The catalog store failed (e.g. the feed could not subscribe)
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The runtime store refused or timed out
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A save is already running
    #[error("A save is already in progress ({current})")]
    CommitInProgress {
        /// The running save
        current: RequestId,
    },

    /// The reducer answered with an unexpected action
    #[error("Unexpected answer to {request}")]
    UnexpectedAnswer {
        /// Correlation id of the command
        request: RequestId,
    },

    /// The session was closed
    #[error("Session is closed")]
    Closed,

    /// Client identity could not be loaded
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
