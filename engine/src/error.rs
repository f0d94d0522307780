//! Error types for the tandem engine.

use std::sync::Arc;

use crate::{ActionName, StoreName};
use thiserror::Error;

/// Boxed source carried by a [`PluginError`].
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// An error raised by a store plugin while running an action.
///
/// The dispatcher never wraps or rewrites these: whatever a store returns is
/// what the caller receives once the error policy has run its course.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PluginError {
    message: String,
    store: Option<StoreName>,
    #[source]
    source: Option<ErrorSource>,
}

impl PluginError {
    /// Create an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            store: None,
            source: None,
        }
    }

    /// Create an error wrapping an underlying cause.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            store: None,
            source: Some(Arc::new(source)),
        }
    }

    /// The error a store returns for an action it declared but did not implement.
    pub fn unsupported(action: ActionName) -> Self {
        Self::new(format!("action '{action}' is not implemented by this store"))
    }

    /// Tag the error with the store that raised it.
    pub fn for_store(mut self, store: impl Into<StoreName>) -> Self {
        self.store = Some(store.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The store that raised the error, if known.
    pub fn store(&self) -> Option<&str> {
        self.store.as_deref()
    }
}

/// All possible errors from the engine.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Configuration errors
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("no execution order resolved for action '{0}'; configure at least one store")]
    NoExecutionOrder(ActionName),

    #[error("no data store configured; set a data store name or a local store name")]
    NoDataStoreName,

    #[error("no store plugins implemented stream")]
    NoStreamStores,

    #[error("no store registered handlers for added/modified/removed stream documents")]
    NoStreamHandler,

    #[error("store '{0}' is named in an execution order but was never registered")]
    UnknownStore(StoreName),

    #[error("invalid query clauses: {0}")]
    InvalidClauses(String),

    // Runtime errors
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl Error {
    /// Returns true for errors caused by misconfiguration rather than a failing store.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Error::Plugin(_))
    }

    /// The store error behind this error, if any.
    pub fn as_plugin(&self) -> Option<&PluginError> {
        match self {
            Error::Plugin(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
