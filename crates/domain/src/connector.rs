//! Connector: a configured protocol adapter and its published connection state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DeviceHubError, ValidationError};
use crate::id::ConnectorId;

/// A registry record describing one configured protocol adapter.
///
/// `connector_type` selects the plugin implementation at load time
/// (e.g. `"virtual"`, `"modbus"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub id: ConnectorId,
    pub identifier: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub connector_type: String,
    pub enabled: bool,
}

impl Connector {
    #[must_use]
    pub fn builder() -> ConnectorBuilder {
        ConnectorBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceHubError::Validation`] when the identifier or the
    /// connector type is empty.
    pub fn validate(&self) -> Result<(), DeviceHubError> {
        if self.identifier.is_empty() {
            return Err(ValidationError::EmptyIdentifier.into());
        }
        if self.connector_type.is_empty() {
            return Err(ValidationError::EmptyConnectorType.into());
        }
        Ok(())
    }
}

/// Step-by-step builder for [`Connector`].
#[derive(Debug, Default)]
pub struct ConnectorBuilder {
    id: Option<ConnectorId>,
    identifier: Option<String>,
    name: Option<String>,
    connector_type: Option<String>,
    enabled: Option<bool>,
}

impl ConnectorBuilder {
    #[must_use]
    pub fn id(mut self, id: ConnectorId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn connector_type(mut self, connector_type: impl Into<String>) -> Self {
        self.connector_type = Some(connector_type.into());
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Consume the builder, validate, and return a [`Connector`].
    ///
    /// # Errors
    ///
    /// Returns [`DeviceHubError::Validation`] if the identifier or the type
    /// is missing.
    pub fn build(self) -> Result<Connector, DeviceHubError> {
        let connector = Connector {
            id: self.id.unwrap_or_default(),
            identifier: self.identifier.unwrap_or_default(),
            name: self.name,
            connector_type: self.connector_type.unwrap_or_default(),
            enabled: self.enabled.unwrap_or(true),
        };
        connector.validate()?;
        Ok(connector)
    }
}

/// Operational status reported by the loaded plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Running,
    Stopped,
    Unknown,
    Sleeping,
    Alert,
}

impl ConnectionState {
    pub const ALL: [Self; 5] = [
        Self::Running,
        Self::Stopped,
        Self::Unknown,
        Self::Sleeping,
        Self::Alert,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
            Self::Sleeping => "sleeping",
            Self::Alert => "alert",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the [`ConnectionState`] names.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown connection state `{0}`")]
pub struct UnknownConnectionState(pub String);

impl FromStr for ConnectionState {
    type Err = UnknownConnectionState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownConnectionState(s.to_string()))
    }
}
