// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the editable-grid engine
//!
//! Driver-specific failures are mapped onto these unified variants so the
//! host application can distinguish transport problems from analysis
//! results. "I could not determine updatability" is always an error here,
//! never a `ResultSetUpdatability { is_updatable: false }`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all grid operations
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum GridError {
    #[error("Not connected to the database")]
    NotConnected,

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Catalog query failed: {message}")]
    CatalogQueryFailed { message: String },

    #[error("Query execution error: {message}")]
    ExecutionFailed { message: String },

    #[error("Invalid filter: {message}")]
    FilterValidationFailed { message: String },

    #[error("The resultset is not updatable")]
    NotUpdatable,

    #[error("Feature not supported: {message}")]
    NotSupported { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GridError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::CatalogQueryFailed { message: msg.into() }
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed { message: msg.into() }
    }

    pub fn filter_validation(msg: impl Into<String>) -> Self {
        Self::FilterValidationFailed { message: msg.into() }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// The engine-reported message, without the variant prefix.
    ///
    /// Used when a per-row save failure captures the database's own error
    /// text verbatim into a [`SaveOutcome`](crate::changeset::SaveOutcome).
    pub fn message(&self) -> String {
        match self {
            Self::NotConnected => "not connected to the database".to_string(),
            Self::ConnectionFailed { message }
            | Self::CatalogQueryFailed { message }
            | Self::ExecutionFailed { message }
            | Self::FilterValidationFailed { message }
            | Self::NotSupported { message }
            | Self::Internal { message } => message.clone(),
            Self::NotUpdatable => "the resultset is not updatable".to_string(),
        }
    }

    /// True when the failure is transport-level (the call never reached a
    /// definitive answer) rather than a per-operation validation result.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::ConnectionFailed { .. } | Self::CatalogQueryFailed { .. }
        )
    }
}

/// Result type alias for grid operations
pub type GridResult<T> = Result<T, GridError>;
