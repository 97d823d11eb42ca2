//! Error types for blob dispatch and lifecycle operations.
//!
//! SPI traits (blob stores, providers, key-value stores) return
//! `anyhow::Result`; the engine surfaces failures to its callers as
//! [`BlobError`] so they can tell a retention refusal apart from a broken
//! backend.

use thiserror::Error;

/// Errors raised by the registry, dispatcher and deletion lifecycle.
#[derive(Debug, Error)]
pub enum BlobError {
    /// Invalid rule syntax, missing default rule, or an unusable
    /// provider descriptor.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A provider backend failed to build or initialize.
    #[error("failed to initialize blob provider {provider_id}: {source}")]
    Construction {
        provider_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Deletion refused because the attachment is under retention or
    /// legal hold and the principal lacks the capability to override it.
    #[error("blob at {xpath} of {object_id} is protected by retention or legal hold")]
    RetentionDenied { object_id: String, xpath: String },

    /// No descriptor is registered under this provider id.
    #[error("unknown blob provider: {provider_id}")]
    UnknownProvider { provider_id: String },

    /// The object has no blob at the given attachment path.
    #[error("no blob at {xpath} of {object_id}")]
    BlobNotFound { object_id: String, xpath: String },

    /// Catch-all for store and key-value failures.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BlobError {
    pub fn configuration(message: impl Into<String>) -> Self {
        BlobError::Configuration {
            message: message.into(),
        }
    }

    /// Stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            BlobError::Configuration { .. } => "ConfigurationError",
            BlobError::Construction { .. } => "ConstructionError",
            BlobError::RetentionDenied { .. } => "RetentionDenied",
            BlobError::UnknownProvider { .. } => "UnknownProvider",
            BlobError::BlobNotFound { .. } => "BlobNotFound",
            BlobError::Internal(_) => "InternalError",
        }
    }

    /// True for policy refusals, as opposed to storage failures.
    pub fn is_authorization(&self) -> bool {
        matches!(self, BlobError::RetentionDenied { .. })
    }
}

pub type BlobResult<T> = Result<T, BlobError>;
