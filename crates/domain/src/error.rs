//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`DeviceHubError`] via `#[from]` when crossing a port boundary.

/// Base error returned by registry ports and domain validation.
#[derive(Debug, thiserror::Error)]
pub enum DeviceHubError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("entity not found")]
    NotFound(#[from] NotFoundError),

    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Domain invariant violations.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("identifier must not be empty")]
    EmptyIdentifier,

    #[error("connector type must not be empty")]
    EmptyConnectorType,

    #[error("control name must not be empty")]
    EmptyControlName,

    #[error("enum property requires at least one format value")]
    EmptyEnumFormat,

    #[error("property cannot be its own parent")]
    SelfParent,
}

/// A lookup that was required to succeed did not.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// Failure raised by a protocol adapter (plugin).
///
/// Adapters may return any of the typed variants, or bubble an arbitrary
/// hardware/transport failure through [`PluginError::Other`].
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The adapter does not support the requested operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// A payload field the adapter needs is missing or malformed.
    #[error("invalid payload field `{0}`")]
    InvalidPayload(&'static str),

    /// The adapter was asked to do work before `start`.
    #[error("adapter is not running")]
    NotRunning,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
