//! Registry port implementations for [`MemoryRegistry`].

use std::future::Future;

use devicehub_app::ports::{
    BusPublisher, ChannelRepository, ConnectorRepository, ControlRepository, DeviceRepository,
    PropertyManager, PropertyRepository, PropertyStateManager, PropertyStateRepository,
};
use devicehub_domain::channel::Channel;
use devicehub_domain::connector::Connector;
use devicehub_domain::control::{Control, ControlOwner};
use devicehub_domain::device::{Attribute, Device};
use devicehub_domain::error::DeviceHubError;
use devicehub_domain::id::{AttributeId, ChannelId, ConnectorId, DeviceId, PropertyId};
use devicehub_domain::payload::Payload;
use devicehub_domain::property::{Property, PropertyOwner, PropertyState, PropertyStatePatch};
use devicehub_domain::routing::EntityEvent;

use crate::error::StorageError;
use crate::registry::{MemoryRegistry, not_found, property_kind, to_payload};

impl<P: BusPublisher + Send + Sync> ConnectorRepository for MemoryRegistry<P> {
    fn get_connector(
        &self,
        id: ConnectorId,
    ) -> impl Future<Output = Result<Option<Connector>, DeviceHubError>> + Send {
        let found = self.with_store(|s| s.connectors.get(&id).cloned());
        async move { Ok(found) }
    }
}

impl<P: BusPublisher + Send + Sync> DeviceRepository for MemoryRegistry<P> {
    fn get_device(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Option<Device>, DeviceHubError>> + Send {
        let found = self.with_store(|s| s.devices.get(&id).cloned());
        async move { Ok(found) }
    }

    fn get_attribute(
        &self,
        id: AttributeId,
    ) -> impl Future<Output = Result<Option<Attribute>, DeviceHubError>> + Send {
        let found = self.with_store(|s| s.attributes.get(&id).cloned());
        async move { Ok(found) }
    }

    fn devices_by_connector(
        &self,
        connector_id: ConnectorId,
    ) -> impl Future<Output = Result<Vec<Device>, DeviceHubError>> + Send {
        let found: Vec<Device> = self.with_store(|s| {
            s.devices
                .values()
                .filter(|d| d.belongs_to(connector_id))
                .cloned()
                .collect()
        });
        async move { Ok(found) }
    }

    fn attributes_by_device(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<Attribute>, DeviceHubError>> + Send {
        let found: Vec<Attribute> = self.with_store(|s| {
            s.attributes
                .values()
                .filter(|a| a.device_id == device_id)
                .cloned()
                .collect()
        });
        async move { Ok(found) }
    }
}

impl<P: BusPublisher + Send + Sync> ChannelRepository for MemoryRegistry<P> {
    fn get_channel(
        &self,
        id: ChannelId,
    ) -> impl Future<Output = Result<Option<Channel>, DeviceHubError>> + Send {
        let found = self.with_store(|s| s.channels.get(&id).cloned());
        async move { Ok(found) }
    }

    fn channels_by_device(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<Channel>, DeviceHubError>> + Send {
        let found: Vec<Channel> = self.with_store(|s| {
            s.channels
                .values()
                .filter(|c| c.device_id == device_id)
                .cloned()
                .collect()
        });
        async move { Ok(found) }
    }
}

impl<P: BusPublisher + Send + Sync> PropertyRepository for MemoryRegistry<P> {
    fn get_property(
        &self,
        id: PropertyId,
    ) -> impl Future<Output = Result<Option<Property>, DeviceHubError>> + Send {
        let found = self.with_store(|s| s.properties.get(&id).cloned());
        async move { Ok(found) }
    }

    fn find_property(
        &self,
        owner: PropertyOwner,
        identifier: &str,
    ) -> impl Future<Output = Result<Option<Property>, DeviceHubError>> + Send {
        let found = self.with_store(|s| {
            s.properties
                .values()
                .find(|p| p.owner == owner && p.identifier == identifier)
                .cloned()
        });
        async move { Ok(found) }
    }

    fn properties_by_owner(
        &self,
        owner: PropertyOwner,
    ) -> impl Future<Output = Result<Vec<Property>, DeviceHubError>> + Send {
        let found: Vec<Property> = self.with_store(|s| {
            s.properties
                .values()
                .filter(|p| p.owner == owner)
                .cloned()
                .collect()
        });
        async move { Ok(found) }
    }
}

impl<P: BusPublisher + Send + Sync> ControlRepository for MemoryRegistry<P> {
    fn find_control(
        &self,
        owner: ControlOwner,
        name: &str,
    ) -> impl Future<Output = Result<Option<Control>, DeviceHubError>> + Send {
        let found = self.with_store(|s| {
            s.controls
                .values()
                .find(|c| c.owner == owner && c.name == name)
                .cloned()
        });
        async move { Ok(found) }
    }
}

impl<P: BusPublisher + Send + Sync> PropertyManager for MemoryRegistry<P> {
    fn create_property(
        &self,
        property: Property,
    ) -> impl Future<Output = Result<Property, DeviceHubError>> + Send {
        async move {
            property.validate()?;
            let data = to_payload("property", &property)?;
            self.with_store(|s| s.properties.insert(property.id, property.clone()));
            self.announce(EntityEvent::Created, property_kind(property.owner), data)
                .await?;
            Ok(property)
        }
    }
}

impl<P: BusPublisher + Send + Sync> PropertyStateRepository for MemoryRegistry<P> {
    fn get_state(
        &self,
        property_id: PropertyId,
    ) -> impl Future<Output = Result<Option<PropertyState>, DeviceHubError>> + Send {
        let found = self.with_store(|s| s.states.get(&property_id).cloned());
        async move { Ok(found) }
    }
}

/// Payload of a `reported` message: the state record plus the owner reference.
fn state_payload(state: &PropertyState, owner: PropertyOwner) -> Result<Payload, StorageError> {
    let mut data = to_payload("property state", state)?;
    data.extend(to_payload("property owner", &owner)?);
    Ok(data)
}

impl<P: BusPublisher + Send + Sync> MemoryRegistry<P> {
    /// Store `state` and announce it as reported by the owning property.
    async fn record_state(
        &self,
        state: PropertyState,
        owner: PropertyOwner,
    ) -> Result<PropertyState, DeviceHubError> {
        let data = state_payload(&state, owner)?;
        self.with_store(|s| s.states.insert(state.property_id, state.clone()));
        self.announce(EntityEvent::Reported, property_kind(owner), data)
            .await?;
        Ok(state)
    }

    /// Drop the runtime state of a property. Missing state is not an error.
    pub fn delete_state(&self, property_id: PropertyId) -> Option<PropertyState> {
        self.with_store(|s| s.states.remove(&property_id))
    }

    fn property_owner(&self, property_id: PropertyId) -> Result<PropertyOwner, DeviceHubError> {
        self.with_store(|s| s.properties.get(&property_id).map(|p| p.owner))
            .ok_or_else(|| not_found("Property", property_id))
    }
}

impl<P: BusPublisher + Send + Sync> PropertyStateManager for MemoryRegistry<P> {
    fn create_state(
        &self,
        property_id: PropertyId,
        patch: PropertyStatePatch,
    ) -> impl Future<Output = Result<PropertyState, DeviceHubError>> + Send {
        async move {
            let owner = self.property_owner(property_id)?;
            let state = PropertyState::new(property_id, patch, chrono::Utc::now());
            self.record_state(state, owner).await
        }
    }

    fn update_state(
        &self,
        property_id: PropertyId,
        patch: PropertyStatePatch,
    ) -> impl Future<Output = Result<PropertyState, DeviceHubError>> + Send {
        async move {
            let owner = self.property_owner(property_id)?;
            let mut state = self
                .with_store(|s| s.states.get(&property_id).cloned())
                .ok_or_else(|| not_found("PropertyState", property_id))?;
            state.apply(patch, chrono::Utc::now());
            self.record_state(state, owner).await
        }
    }
}
