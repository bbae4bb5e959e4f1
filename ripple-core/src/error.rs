//! Error types.
//!
//! Only [`DependencyError`] reaches callers of the manager. Processing
//! failures are caught at the delivery site and reported through
//! [`DeliveryFailure`] instead of being propagated.

use std::error::Error as StdError;

use thiserror::Error;

use crate::graph::ObjectId;

/// Errors returned by graph mutation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DependencyError {
    /// A registration endpoint is missing or no longer alive.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The namespace is not attached to this manager.
    #[error("unknown namespace: {0}")]
    UnknownNamespace(String),
}

/// Failure reported by a dependent while processing a batch.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcessingError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ProcessingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Build from a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::new(format!("processor panicked: {detail}"))
    }
}

/// A dependent whose `process_change` failed during dispatch.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub dependent: ObjectId,
    pub events: usize,
    pub error: ProcessingError,
}

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
