//! Property: a typed value slot on a connector, device or channel, plus its
//! persisted runtime state.
//!
//! A property with a `parent_id` is *derived*: its value is mapped from the
//! parent (root) property. Writes are always addressed to the root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeviceHubError, ValidationError};
use crate::id::{ChannelId, ConnectorId, DeviceId, PropertyId};

/// UTC timestamp recorded on state changes.
pub type Timestamp = DateTime<Utc>;

/// The entity a property hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyOwner {
    Connector(ConnectorId),
    Device(DeviceId),
    Channel(ChannelId),
}

impl PropertyOwner {
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Connector(_) => "connector",
            Self::Device(_) => "device",
            Self::Channel(_) => "channel",
        }
    }
}

/// How the property value comes to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    /// Value lives in the runtime state store and is reported by hardware.
    #[default]
    Dynamic,
    /// Value is configuration stored on the registry record itself.
    Variable,
    /// Value is mapped from a parent property.
    Mapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int,
    Uint,
    Float,
    String,
    Enum,
    Switch,
    Button,
    #[default]
    Unknown,
}

/// A property registry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub identifier: String,
    #[serde(flatten)]
    pub owner: PropertyOwner,
    pub kind: PropertyKind,
    pub data_type: DataType,
    pub settable: bool,
    pub queryable: bool,
    /// Allowed values for enum-typed properties.
    pub format: Vec<String>,
    #[serde(rename = "parent")]
    pub parent_id: Option<PropertyId>,
}

impl Property {
    #[must_use]
    pub fn builder() -> PropertyBuilder {
        PropertyBuilder::default()
    }

    /// A root property is one that is not derived from another.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceHubError::Validation`] when the identifier is empty,
    /// an enum property carries no format, or the property is its own parent.
    pub fn validate(&self) -> Result<(), DeviceHubError> {
        if self.identifier.is_empty() {
            return Err(ValidationError::EmptyIdentifier.into());
        }
        if self.data_type == DataType::Enum && self.format.is_empty() {
            return Err(ValidationError::EmptyEnumFormat.into());
        }
        if self.parent_id == Some(self.id) {
            return Err(ValidationError::SelfParent.into());
        }
        Ok(())
    }
}

/// Step-by-step builder for [`Property`].
#[derive(Debug, Default)]
pub struct PropertyBuilder {
    id: Option<PropertyId>,
    identifier: Option<String>,
    owner: Option<PropertyOwner>,
    kind: PropertyKind,
    data_type: DataType,
    settable: bool,
    queryable: bool,
    format: Vec<String>,
    parent_id: Option<PropertyId>,
}

impl PropertyBuilder {
    #[must_use]
    pub fn id(mut self, id: PropertyId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: PropertyOwner) -> Self {
        self.owner = Some(owner);
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: PropertyKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    #[must_use]
    pub fn settable(mut self, settable: bool) -> Self {
        self.settable = settable;
        self
    }

    #[must_use]
    pub fn queryable(mut self, queryable: bool) -> Self {
        self.queryable = queryable;
        self
    }

    #[must_use]
    pub fn format<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.format = values.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the property as mapped from `parent_id`.
    #[must_use]
    pub fn parent_id(mut self, parent_id: PropertyId) -> Self {
        self.parent_id = Some(parent_id);
        self.kind = PropertyKind::Mapped;
        self
    }

    /// Consume the builder, validate, and return a [`Property`].
    ///
    /// A missing owner yields a device owner with a fresh id, which is only
    /// useful in tests.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceHubError::Validation`] when invariants fail.
    pub fn build(self) -> Result<Property, DeviceHubError> {
        let property = Property {
            id: self.id.unwrap_or_default(),
            identifier: self.identifier.unwrap_or_default(),
            owner: self
                .owner
                .unwrap_or_else(|| PropertyOwner::Device(DeviceId::new())),
            kind: self.kind,
            data_type: self.data_type,
            settable: self.settable,
            queryable: self.queryable,
            format: self.format,
            parent_id: self.parent_id,
        };
        property.validate()?;
        Ok(property)
    }
}

/// Persisted runtime state of a dynamic property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyState {
    #[serde(rename = "id")]
    pub property_id: PropertyId,
    pub actual_value: Option<serde_json::Value>,
    pub expected_value: Option<serde_json::Value>,
    pub pending: bool,
    pub valid: bool,
    pub updated_at: Timestamp,
}

impl PropertyState {
    #[must_use]
    pub fn new(property_id: PropertyId, patch: PropertyStatePatch, ts: Timestamp) -> Self {
        Self {
            property_id,
            actual_value: patch.actual_value,
            expected_value: patch.expected_value,
            pending: patch.pending,
            valid: patch.valid,
            updated_at: ts,
        }
    }

    /// Overwrite every field carried by the patch.
    pub fn apply(&mut self, patch: PropertyStatePatch, ts: Timestamp) {
        self.actual_value = patch.actual_value;
        self.expected_value = patch.expected_value;
        self.pending = patch.pending;
        self.valid = patch.valid;
        self.updated_at = ts;
    }
}

/// Values written by a state create or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyStatePatch {
    pub actual_value: Option<serde_json::Value>,
    pub expected_value: Option<serde_json::Value>,
    pub pending: bool,
    pub valid: bool,
}

impl PropertyStatePatch {
    /// A settled, hardware-confirmed value: nothing expected, nothing pending.
    #[must_use]
    pub fn actual(value: serde_json::Value) -> Self {
        Self {
            actual_value: Some(value),
            expected_value: None,
            pending: false,
            valid: true,
        }
    }
}
