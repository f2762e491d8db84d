//! Registry store and the management operations that mutate it.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use devicehub_app::ports::{BusMessage, BusPublisher};
use devicehub_domain::channel::Channel;
use devicehub_domain::connector::Connector;
use devicehub_domain::control::{Control, ControlOwner};
use devicehub_domain::device::{Attribute, Device};
use devicehub_domain::error::{DeviceHubError, NotFoundError};
use devicehub_domain::id::{
    AttributeId, ChannelId, ConnectorId, ControlId, DeviceId, PropertyId,
};
use devicehub_domain::payload::Payload;
use devicehub_domain::property::{Property, PropertyOwner, PropertyState};
use devicehub_domain::routing::{EntityEvent, EntityKind, MessageSource, RoutingKey};

use crate::error::StorageError;

#[derive(Default)]
pub(crate) struct Store {
    pub(crate) connectors: HashMap<ConnectorId, Connector>,
    pub(crate) devices: HashMap<DeviceId, Device>,
    pub(crate) attributes: HashMap<AttributeId, Attribute>,
    pub(crate) channels: HashMap<ChannelId, Channel>,
    pub(crate) properties: HashMap<PropertyId, Property>,
    pub(crate) controls: HashMap<ControlId, Control>,
    pub(crate) states: HashMap<PropertyId, PropertyState>,
}

/// In-memory registry announcing its mutations through `P`.
///
/// Use `Option<P>` with `None` to run without a bus.
pub struct MemoryRegistry<P> {
    store: Mutex<Store>,
    publisher: P,
}

pub(crate) fn property_kind(owner: PropertyOwner) -> EntityKind {
    match owner {
        PropertyOwner::Connector(_) => EntityKind::ConnectorProperty,
        PropertyOwner::Device(_) => EntityKind::DeviceProperty,
        PropertyOwner::Channel(_) => EntityKind::ChannelProperty,
    }
}

fn control_kind(owner: ControlOwner) -> EntityKind {
    match owner {
        ControlOwner::Connector(_) => EntityKind::ConnectorControl,
        ControlOwner::Device(_) => EntityKind::DeviceControl,
        ControlOwner::Channel(_) => EntityKind::ChannelControl,
    }
}

/// Serialize a record into a bus payload.
pub(crate) fn to_payload<T: Serialize>(
    entity: &'static str,
    record: &T,
) -> Result<Payload, StorageError> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(StorageError::NotAnObject(entity)),
    }
}

/// Overwrite an existing record; `false` when there is none.
fn replace<K: std::hash::Hash + Eq, V>(map: &mut HashMap<K, V>, key: K, value: V) -> bool {
    match map.get_mut(&key) {
        Some(existing) => {
            *existing = value;
            true
        }
        None => false,
    }
}

pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> DeviceHubError {
    NotFoundError {
        entity,
        id: id.to_string(),
    }
    .into()
}

impl<P: BusPublisher + Send + Sync> MemoryRegistry<P> {
    #[must_use]
    pub fn new(publisher: P) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            publisher,
        }
    }

    /// Run `f` against the store while holding the lock.
    pub(crate) fn with_store<T>(&self, f: impl FnOnce(&mut Store) -> T) -> T {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }

    /// Publish a `devices.entity.<event>.<kind>` message.
    pub(crate) async fn announce(
        &self,
        event: EntityEvent,
        kind: EntityKind,
        data: Payload,
    ) -> Result<(), DeviceHubError> {
        tracing::debug!(event = event.as_str(), kind = kind.as_str(), "announcing registry change");
        self.publisher
            .publish(BusMessage::new(
                MessageSource::Registry,
                RoutingKey::Entity(event, kind),
                data,
            ))
            .await
    }

    // ── Connectors ─────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns a validation error for an invalid record, or a storage
    /// error when the bus rejects the notification.
    pub async fn create_connector(
        &self,
        connector: Connector,
    ) -> Result<Connector, DeviceHubError> {
        connector.validate()?;
        let data = to_payload("connector", &connector)?;
        self.with_store(|s| s.connectors.insert(connector.id, connector.clone()));
        self.announce(EntityEvent::Created, EntityKind::Connector, data)
            .await?;
        Ok(connector)
    }

    /// # Errors
    ///
    /// Returns [`DeviceHubError::NotFound`] when the connector does not exist.
    pub async fn update_connector(
        &self,
        connector: Connector,
    ) -> Result<Connector, DeviceHubError> {
        connector.validate()?;
        let data = to_payload("connector", &connector)?;
        let replaced =
            self.with_store(|s| replace(&mut s.connectors, connector.id, connector.clone()));
        if !replaced {
            return Err(not_found("Connector", connector.id));
        }
        self.announce(EntityEvent::Updated, EntityKind::Connector, data)
            .await?;
        Ok(connector)
    }

    /// # Errors
    ///
    /// Returns [`DeviceHubError::NotFound`] when the connector does not exist.
    pub async fn delete_connector(&self, id: ConnectorId) -> Result<Connector, DeviceHubError> {
        let removed = self
            .with_store(|s| s.connectors.remove(&id))
            .ok_or_else(|| not_found("Connector", id))?;
        let data = to_payload("connector", &removed)?;
        self.announce(EntityEvent::Deleted, EntityKind::Connector, data)
            .await?;
        Ok(removed)
    }

    // ── Devices ────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns a validation error for an invalid record, or
    /// [`DeviceHubError::NotFound`] when the owning connector does not exist.
    pub async fn create_device(&self, device: Device) -> Result<Device, DeviceHubError> {
        device.validate()?;
        let data = to_payload("device", &device)?;
        let inserted = self.with_store(|s| {
            if !s.connectors.contains_key(&device.connector_id) {
                return false;
            }
            s.devices.insert(device.id, device.clone());
            true
        });
        if !inserted {
            return Err(not_found("Connector", device.connector_id));
        }
        self.announce(EntityEvent::Created, EntityKind::Device, data)
            .await?;
        Ok(device)
    }

    /// # Errors
    ///
    /// Returns [`DeviceHubError::NotFound`] when the device does not exist.
    pub async fn update_device(&self, device: Device) -> Result<Device, DeviceHubError> {
        device.validate()?;
        let data = to_payload("device", &device)?;
        let replaced = self.with_store(|s| replace(&mut s.devices, device.id, device.clone()));
        if !replaced {
            return Err(not_found("Device", device.id));
        }
        self.announce(EntityEvent::Updated, EntityKind::Device, data)
            .await?;
        Ok(device)
    }

    /// # Errors
    ///
    /// Returns [`DeviceHubError::NotFound`] when the device does not exist.
    pub async fn delete_device(&self, id: DeviceId) -> Result<Device, DeviceHubError> {
        let removed = self
            .with_store(|s| s.devices.remove(&id))
            .ok_or_else(|| not_found("Device", id))?;
        let data = to_payload("device", &removed)?;
        self.announce(EntityEvent::Deleted, EntityKind::Device, data)
            .await?;
        Ok(removed)
    }

    // ── Attributes ─────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns [`DeviceHubError::NotFound`] when the owning device does not exist.
    pub async fn create_attribute(
        &self,
        attribute: Attribute,
    ) -> Result<Attribute, DeviceHubError> {
        let data = to_payload("attribute", &attribute)?;
        let inserted = self.with_store(|s| {
            if !s.devices.contains_key(&attribute.device_id) {
                return false;
            }
            s.attributes.insert(attribute.id, attribute.clone());
            true
        });
        if !inserted {
            return Err(not_found("Device", attribute.device_id));
        }
        self.announce(EntityEvent::Created, EntityKind::DeviceAttribute, data)
            .await?;
        Ok(attribute)
    }

    /// Record hardware-reported content for an attribute.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceHubError::NotFound`] when the attribute does not exist.
    pub async fn report_attribute(
        &self,
        id: AttributeId,
        content: serde_json::Value,
    ) -> Result<Attribute, DeviceHubError> {
        let updated = self
            .with_store(|s| {
                s.attributes.get_mut(&id).map(|attribute| {
                    attribute.content = Some(content);
                    attribute.clone()
                })
            })
            .ok_or_else(|| not_found("Attribute", id))?;
        let data = to_payload("attribute", &updated)?;
        self.announce(EntityEvent::Reported, EntityKind::DeviceAttribute, data)
            .await?;
        Ok(updated)
    }

    /// # Errors
    ///
    /// Returns [`DeviceHubError::NotFound`] when the attribute does not exist.
    pub async fn delete_attribute(&self, id: AttributeId) -> Result<Attribute, DeviceHubError> {
        let removed = self
            .with_store(|s| s.attributes.remove(&id))
            .ok_or_else(|| not_found("Attribute", id))?;
        let data = to_payload("attribute", &removed)?;
        self.announce(EntityEvent::Deleted, EntityKind::DeviceAttribute, data)
            .await?;
        Ok(removed)
    }

    // ── Channels ───────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns [`DeviceHubError::NotFound`] when the owning device does not exist.
    pub async fn create_channel(&self, channel: Channel) -> Result<Channel, DeviceHubError> {
        let data = to_payload("channel", &channel)?;
        let inserted = self.with_store(|s| {
            if !s.devices.contains_key(&channel.device_id) {
                return false;
            }
            s.channels.insert(channel.id, channel.clone());
            true
        });
        if !inserted {
            return Err(not_found("Device", channel.device_id));
        }
        self.announce(EntityEvent::Created, EntityKind::Channel, data)
            .await?;
        Ok(channel)
    }

    /// # Errors
    ///
    /// Returns [`DeviceHubError::NotFound`] when the channel does not exist.
    pub async fn delete_channel(&self, id: ChannelId) -> Result<Channel, DeviceHubError> {
        let removed = self
            .with_store(|s| s.channels.remove(&id))
            .ok_or_else(|| not_found("Channel", id))?;
        let data = to_payload("channel", &removed)?;
        self.announce(EntityEvent::Deleted, EntityKind::Channel, data)
            .await?;
        Ok(removed)
    }

    // ── Properties ─────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns [`DeviceHubError::NotFound`] when the property does not exist.
    pub async fn update_property(&self, property: Property) -> Result<Property, DeviceHubError> {
        property.validate()?;
        let data = to_payload("property", &property)?;
        let replaced =
            self.with_store(|s| replace(&mut s.properties, property.id, property.clone()));
        if !replaced {
            return Err(not_found("Property", property.id));
        }
        self.announce(EntityEvent::Updated, property_kind(property.owner), data)
            .await?;
        Ok(property)
    }

    /// Delete a property together with its state record.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceHubError::NotFound`] when the property does not exist.
    pub async fn delete_property(&self, id: PropertyId) -> Result<Property, DeviceHubError> {
        let removed = self
            .with_store(|s| {
                s.states.remove(&id);
                s.properties.remove(&id)
            })
            .ok_or_else(|| not_found("Property", id))?;
        let data = to_payload("property", &removed)?;
        self.announce(EntityEvent::Deleted, property_kind(removed.owner), data)
            .await?;
        Ok(removed)
    }

    // ── Controls ───────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns a storage error when the bus rejects the notification.
    pub async fn create_control(&self, control: Control) -> Result<Control, DeviceHubError> {
        let data = to_payload("control", &control)?;
        self.with_store(|s| s.controls.insert(control.id, control.clone()));
        self.announce(EntityEvent::Created, control_kind(control.owner), data)
            .await?;
        Ok(control)
    }

    /// # Errors
    ///
    /// Returns [`DeviceHubError::NotFound`] when the control does not exist.
    pub async fn delete_control(&self, id: ControlId) -> Result<Control, DeviceHubError> {
        let removed = self
            .with_store(|s| s.controls.remove(&id))
            .ok_or_else(|| not_found("Control", id))?;
        let data = to_payload("control", &removed)?;
        self.announce(EntityEvent::Deleted, control_kind(removed.owner), data)
            .await?;
        Ok(removed)
    }
}
