//! Device: a physical or virtual thing driven by exactly one connector.

use serde::{Deserialize, Serialize};

use crate::error::{DeviceHubError, ValidationError};
use crate::id::{AttributeId, ConnectorId, DeviceId};

/// A device registered under a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub identifier: String,
    pub name: Option<String>,
    #[serde(rename = "connector")]
    pub connector_id: ConnectorId,
    /// Parent device for gateways exposing child devices.
    #[serde(rename = "parent")]
    pub parent_id: Option<DeviceId>,
}

impl Device {
    #[must_use]
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::default()
    }

    /// Whether the device is driven by the given connector.
    #[must_use]
    pub fn belongs_to(&self, connector_id: ConnectorId) -> bool {
        self.connector_id == connector_id
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceHubError::Validation`] when the identifier is empty.
    pub fn validate(&self) -> Result<(), DeviceHubError> {
        if self.identifier.is_empty() {
            return Err(ValidationError::EmptyIdentifier.into());
        }
        Ok(())
    }
}

/// Step-by-step builder for [`Device`].
#[derive(Debug, Default)]
pub struct DeviceBuilder {
    id: Option<DeviceId>,
    identifier: Option<String>,
    name: Option<String>,
    connector_id: Option<ConnectorId>,
    parent_id: Option<DeviceId>,
}

impl DeviceBuilder {
    #[must_use]
    pub fn id(mut self, id: DeviceId) -> Self {
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
    pub fn connector_id(mut self, connector_id: ConnectorId) -> Self {
        self.connector_id = Some(connector_id);
        self
    }

    #[must_use]
    pub fn parent_id(mut self, parent_id: DeviceId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Consume the builder, validate, and return a [`Device`].
    ///
    /// A missing connector id yields a fresh random one, which is only
    /// useful in tests.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceHubError::Validation`] if the identifier is missing.
    pub fn build(self) -> Result<Device, DeviceHubError> {
        let device = Device {
            id: self.id.unwrap_or_default(),
            identifier: self.identifier.unwrap_or_default(),
            name: self.name,
            connector_id: self.connector_id.unwrap_or_default(),
            parent_id: self.parent_id,
        };
        device.validate()?;
        Ok(device)
    }
}

/// Static, hardware-reported metadata of a device (firmware version,
/// serial number, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttributeId,
    pub identifier: String,
    #[serde(rename = "device")]
    pub device_id: DeviceId,
    pub content: Option<serde_json::Value>,
}

impl Attribute {
    #[must_use]
    pub fn new(device_id: DeviceId, identifier: impl Into<String>) -> Self {
        Self {
            id: AttributeId::new(),
            identifier: identifier.into(),
            device_id,
            content: None,
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: serde_json::Value) -> Self {
        self.content = Some(content);
        self
    }
}
