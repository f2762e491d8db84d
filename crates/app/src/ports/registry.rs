//! Registry ports: lookups and mutations over the persisted device registry.
//!
//! The registry is an external collaborator: adapters implement these traits
//! (see `devicehub-adapter-registry-memory`). Every mutation returns the
//! updated record and is expected to emit a change notification on the bus.
//!
//! Lookups return `Ok(None)` for a missing record; `Err` is reserved for
//! storage failures.

use std::future::Future;

use devicehub_domain::channel::Channel;
use devicehub_domain::connector::Connector;
use devicehub_domain::control::{Control, ControlOwner};
use devicehub_domain::device::{Attribute, Device};
use devicehub_domain::error::DeviceHubError;
use devicehub_domain::id::{AttributeId, ChannelId, ConnectorId, DeviceId, PropertyId};
use devicehub_domain::property::{Property, PropertyOwner, PropertyState, PropertyStatePatch};

/// Lookup of connector records.
pub trait ConnectorRepository {
    fn get_connector(
        &self,
        id: ConnectorId,
    ) -> impl Future<Output = Result<Option<Connector>, DeviceHubError>> + Send;
}

/// Lookups for devices and their attributes.
pub trait DeviceRepository {
    fn get_device(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Option<Device>, DeviceHubError>> + Send;

    fn get_attribute(
        &self,
        id: AttributeId,
    ) -> impl Future<Output = Result<Option<Attribute>, DeviceHubError>> + Send;

    /// Every device driven by `connector_id`.
    fn devices_by_connector(
        &self,
        connector_id: ConnectorId,
    ) -> impl Future<Output = Result<Vec<Device>, DeviceHubError>> + Send;

    fn attributes_by_device(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<Attribute>, DeviceHubError>> + Send;
}

/// Lookups for channels.
pub trait ChannelRepository {
    fn get_channel(
        &self,
        id: ChannelId,
    ) -> impl Future<Output = Result<Option<Channel>, DeviceHubError>> + Send;

    fn channels_by_device(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<Channel>, DeviceHubError>> + Send;
}

/// Lookups for properties of every owner kind.
pub trait PropertyRepository {
    fn get_property(
        &self,
        id: PropertyId,
    ) -> impl Future<Output = Result<Option<Property>, DeviceHubError>> + Send;

    /// Find a property by its identifier within one owner.
    fn find_property(
        &self,
        owner: PropertyOwner,
        identifier: &str,
    ) -> impl Future<Output = Result<Option<Property>, DeviceHubError>> + Send;

    /// Every property of one owner, derived properties included.
    fn properties_by_owner(
        &self,
        owner: PropertyOwner,
    ) -> impl Future<Output = Result<Vec<Property>, DeviceHubError>> + Send;
}

pub trait ControlRepository {
    /// Find a control by name within one owner.
    fn find_control(
        &self,
        owner: ControlOwner,
        name: &str,
    ) -> impl Future<Output = Result<Option<Control>, DeviceHubError>> + Send;
}

/// Creation of properties, used for the connector's own `state` property.
pub trait PropertyManager {
    /// Persist a new property and announce it.
    fn create_property(
        &self,
        property: Property,
    ) -> impl Future<Output = Result<Property, DeviceHubError>> + Send;
}

/// Lookup of runtime property state.
pub trait PropertyStateRepository {
    fn get_state(
        &self,
        property_id: PropertyId,
    ) -> impl Future<Output = Result<Option<PropertyState>, DeviceHubError>> + Send;
}

/// Mutations of runtime property state.
pub trait PropertyStateManager {
    fn create_state(
        &self,
        property_id: PropertyId,
        patch: PropertyStatePatch,
    ) -> impl Future<Output = Result<PropertyState, DeviceHubError>> + Send;

    /// Update an existing state record in place.
    ///
    /// # Errors
    ///
    /// Implementations return [`DeviceHubError::NotFound`] when no record
    /// exists for `property_id`.
    fn update_state(
        &self,
        property_id: PropertyId,
        patch: PropertyStatePatch,
    ) -> impl Future<Output = Result<PropertyState, DeviceHubError>> + Send;
}

/// Everything the dispatch engine needs from the registry, as one bound.
pub trait Registry:
    ConnectorRepository
    + DeviceRepository
    + ChannelRepository
    + PropertyRepository
    + ControlRepository
    + PropertyManager
    + PropertyStateRepository
    + PropertyStateManager
    + Send
    + Sync
    + 'static
{
}

impl<T> Registry for T where
    T: ConnectorRepository
        + DeviceRepository
        + ChannelRepository
        + PropertyRepository
        + ControlRepository
        + PropertyManager
        + PropertyStateRepository
        + PropertyStateManager
        + Send
        + Sync
        + 'static
{
}
