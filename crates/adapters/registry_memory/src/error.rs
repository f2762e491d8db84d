//! Storage-specific error type for the in-memory registry.

use devicehub_domain::error::DeviceHubError;

/// Errors originating from the in-memory registry.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A record could not be turned into a bus payload.
    #[error("JSON serialization error")]
    Json(#[from] serde_json::Error),

    /// A record serialized to something other than a JSON object.
    #[error("{0} did not serialize to a JSON object")]
    NotAnObject(&'static str),
}

impl From<StorageError> for DeviceHubError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}
