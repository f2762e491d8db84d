//! Test doubles shared by the unit tests of this crate.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use devicehub_domain::channel::Channel;
use devicehub_domain::connector::Connector;
use devicehub_domain::control::{Control, ControlAction, ControlOwner};
use devicehub_domain::device::{Attribute, Device};
use devicehub_domain::error::{DeviceHubError, NotFoundError};
use devicehub_domain::id::{
    AttributeId, ChannelId, ConnectorId, ControlId, DeviceId, PropertyId,
};
use devicehub_domain::payload::Payload;
use devicehub_domain::property::{Property, PropertyOwner, PropertyState, PropertyStatePatch};

use crate::ports::{
    ChannelRepository, ConnectorPlugin, ConnectorRepository, ControlRepository, DeviceRepository,
    PluginResult, PropertyManager, PropertyRepository, PropertyStateManager,
    PropertyStateRepository,
};

// ── In-memory registry ─────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryRegistry {
    connectors: Mutex<HashMap<ConnectorId, Connector>>,
    devices: Mutex<HashMap<DeviceId, Device>>,
    attributes: Mutex<HashMap<AttributeId, Attribute>>,
    channels: Mutex<HashMap<ChannelId, Channel>>,
    properties: Mutex<Vec<Property>>,
    controls: Mutex<Vec<Control>>,
    states: Mutex<HashMap<PropertyId, PropertyState>>,
    failing: AtomicBool,
}

impl InMemoryRegistry {
    pub fn insert_connector(&self, connector: Connector) {
        self.connectors
            .lock()
            .unwrap()
            .insert(connector.id, connector);
    }

    pub fn insert_device(&self, device: Device) {
        self.devices.lock().unwrap().insert(device.id, device);
    }

    pub fn insert_attribute(&self, attribute: Attribute) {
        self.attributes
            .lock()
            .unwrap()
            .insert(attribute.id, attribute);
    }

    pub fn insert_channel(&self, channel: Channel) {
        self.channels.lock().unwrap().insert(channel.id, channel);
    }

    pub fn insert_property(&self, property: Property) {
        self.properties.lock().unwrap().push(property);
    }

    pub fn insert_control(&self, control: Control) {
        self.controls.lock().unwrap().push(control);
    }

    pub fn properties(&self) -> Vec<Property> {
        self.properties.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<PropertyState> {
        self.states.lock().unwrap().values().cloned().collect()
    }

    /// Make every subsequent lookup fail with a storage error.
    pub fn fail_lookups(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), DeviceHubError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceHubError::Storage("registry unavailable".into()));
        }
        Ok(())
    }
}

impl ConnectorRepository for InMemoryRegistry {
    fn get_connector(
        &self,
        id: ConnectorId,
    ) -> impl Future<Output = Result<Option<Connector>, DeviceHubError>> + Send {
        let result = self
            .check()
            .map(|()| self.connectors.lock().unwrap().get(&id).cloned());
        async move { result }
    }
}

impl DeviceRepository for InMemoryRegistry {
    fn get_device(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Option<Device>, DeviceHubError>> + Send {
        let result = self
            .check()
            .map(|()| self.devices.lock().unwrap().get(&id).cloned());
        async move { result }
    }

    fn get_attribute(
        &self,
        id: AttributeId,
    ) -> impl Future<Output = Result<Option<Attribute>, DeviceHubError>> + Send {
        let result = self
            .check()
            .map(|()| self.attributes.lock().unwrap().get(&id).cloned());
        async move { result }
    }

    fn devices_by_connector(
        &self,
        connector_id: ConnectorId,
    ) -> impl Future<Output = Result<Vec<Device>, DeviceHubError>> + Send {
        let result: Result<Vec<Device>, DeviceHubError> = self.check().map(|()| {
            self.devices
                .lock()
                .unwrap()
                .values()
                .filter(|d| d.belongs_to(connector_id))
                .cloned()
                .collect()
        });
        async move { result }
    }

    fn attributes_by_device(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<Attribute>, DeviceHubError>> + Send {
        let result: Result<Vec<Attribute>, DeviceHubError> = self.check().map(|()| {
            self.attributes
                .lock()
                .unwrap()
                .values()
                .filter(|a| a.device_id == device_id)
                .cloned()
                .collect()
        });
        async move { result }
    }
}

impl ChannelRepository for InMemoryRegistry {
    fn get_channel(
        &self,
        id: ChannelId,
    ) -> impl Future<Output = Result<Option<Channel>, DeviceHubError>> + Send {
        let result = self
            .check()
            .map(|()| self.channels.lock().unwrap().get(&id).cloned());
        async move { result }
    }

    fn channels_by_device(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<Channel>, DeviceHubError>> + Send {
        let result: Result<Vec<Channel>, DeviceHubError> = self.check().map(|()| {
            self.channels
                .lock()
                .unwrap()
                .values()
                .filter(|c| c.device_id == device_id)
                .cloned()
                .collect()
        });
        async move { result }
    }
}

impl PropertyRepository for InMemoryRegistry {
    fn get_property(
        &self,
        id: PropertyId,
    ) -> impl Future<Output = Result<Option<Property>, DeviceHubError>> + Send {
        let result = self.check().map(|()| {
            self.properties
                .lock()
                .unwrap()
                .iter()
                .find(|p| p.id == id)
                .cloned()
        });
        async move { result }
    }

    fn find_property(
        &self,
        owner: PropertyOwner,
        identifier: &str,
    ) -> impl Future<Output = Result<Option<Property>, DeviceHubError>> + Send {
        let result = self.check().map(|()| {
            self.properties
                .lock()
                .unwrap()
                .iter()
                .find(|p| p.owner == owner && p.identifier == identifier)
                .cloned()
        });
        async move { result }
    }

    fn properties_by_owner(
        &self,
        owner: PropertyOwner,
    ) -> impl Future<Output = Result<Vec<Property>, DeviceHubError>> + Send {
        let result: Result<Vec<Property>, DeviceHubError> = self.check().map(|()| {
            self.properties
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.owner == owner)
                .cloned()
                .collect()
        });
        async move { result }
    }
}

impl ControlRepository for InMemoryRegistry {
    fn find_control(
        &self,
        owner: ControlOwner,
        name: &str,
    ) -> impl Future<Output = Result<Option<Control>, DeviceHubError>> + Send {
        let result = self.check().map(|()| {
            self.controls
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.owner == owner && c.name == name)
                .cloned()
        });
        async move { result }
    }
}

impl PropertyManager for InMemoryRegistry {
    fn create_property(
        &self,
        property: Property,
    ) -> impl Future<Output = Result<Property, DeviceHubError>> + Send {
        self.properties.lock().unwrap().push(property.clone());
        async move { Ok(property) }
    }
}

impl PropertyStateRepository for InMemoryRegistry {
    fn get_state(
        &self,
        property_id: PropertyId,
    ) -> impl Future<Output = Result<Option<PropertyState>, DeviceHubError>> + Send {
        let state = self.states.lock().unwrap().get(&property_id).cloned();
        async move { Ok(state) }
    }
}

impl PropertyStateManager for InMemoryRegistry {
    fn create_state(
        &self,
        property_id: PropertyId,
        patch: PropertyStatePatch,
    ) -> impl Future<Output = Result<PropertyState, DeviceHubError>> + Send {
        let state = PropertyState::new(property_id, patch, chrono::Utc::now());
        self.states
            .lock()
            .unwrap()
            .insert(property_id, state.clone());
        async move { Ok(state) }
    }

    fn update_state(
        &self,
        property_id: PropertyId,
        patch: PropertyStatePatch,
    ) -> impl Future<Output = Result<PropertyState, DeviceHubError>> + Send {
        let result = match self.states.lock().unwrap().get_mut(&property_id) {
            Some(state) => {
                state.apply(patch, chrono::Utc::now());
                Ok(state.clone())
            }
            None => Err(NotFoundError {
                entity: "PropertyState",
                id: property_id.to_string(),
            }
            .into()),
        };
        async move { result }
    }
}

// ── Spy plugin ─────────────────────────────────────────────────────

/// One recorded plugin call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Initialize(ConnectorId),
    Start,
    Stop,
    InitializeDevice(DeviceId),
    RemoveDevice(DeviceId),
    InitializeDeviceProperty(DeviceId, PropertyId),
    NotifyDeviceProperty(DeviceId, PropertyId),
    RemoveDeviceProperty(DeviceId, PropertyId),
    InitializeDeviceAttribute(DeviceId, AttributeId),
    NotifyDeviceAttribute(DeviceId, AttributeId),
    RemoveDeviceAttribute(DeviceId, AttributeId),
    InitializeChannel(DeviceId, ChannelId),
    RemoveChannel(DeviceId, ChannelId),
    InitializeChannelProperty(ChannelId, PropertyId),
    NotifyChannelProperty(ChannelId, PropertyId),
    RemoveChannelProperty(ChannelId, PropertyId),
    WriteProperty(PropertyId),
    WriteControl(ControlId, ControlAction),
}

pub struct SpyPlugin {
    connector_type: &'static str,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<Vec<&'static str>>,
    unfinished: AtomicBool,
}

impl SpyPlugin {
    pub fn new(connector_type: &'static str) -> Self {
        Self {
            connector_type,
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            unfinished: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Make the named operation fail from now on.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().push(operation);
    }

    pub fn set_unfinished(&self, unfinished: bool) {
        self.unfinished.store(unfinished, Ordering::SeqCst);
    }

    fn record(&self, operation: &'static str, call: Call) -> PluginResult {
        if self.failing.lock().unwrap().contains(&operation) {
            return Err(anyhow::anyhow!("{operation} failed").into());
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl ConnectorPlugin for SpyPlugin {
    fn connector_type(&self) -> &str {
        self.connector_type
    }

    fn initialize(&self, connector: &Connector) -> PluginResult {
        self.record("initialize", Call::Initialize(connector.id))
    }

    async fn start(&self) -> PluginResult {
        self.record("start", Call::Start)
    }

    fn stop(&self) -> PluginResult {
        self.record("stop", Call::Stop)
    }

    fn has_unfinished_tasks(&self) -> bool {
        self.unfinished.load(Ordering::SeqCst)
    }

    fn initialize_device(&self, device: &Device) -> PluginResult {
        self.record("initialize_device", Call::InitializeDevice(device.id))
    }

    fn remove_device(&self, device_id: DeviceId) -> PluginResult {
        self.record("remove_device", Call::RemoveDevice(device_id))
    }

    fn initialize_device_property(&self, device: &Device, property: &Property) -> PluginResult {
        self.record(
            "initialize_device_property",
            Call::InitializeDeviceProperty(device.id, property.id),
        )
    }

    fn notify_device_property(&self, device: &Device, property: &Property) -> PluginResult {
        self.record(
            "notify_device_property",
            Call::NotifyDeviceProperty(device.id, property.id),
        )
    }

    fn remove_device_property(&self, device: &Device, property_id: PropertyId) -> PluginResult {
        self.record(
            "remove_device_property",
            Call::RemoveDeviceProperty(device.id, property_id),
        )
    }

    fn initialize_device_attribute(
        &self,
        device: &Device,
        attribute: &Attribute,
    ) -> PluginResult {
        self.record(
            "initialize_device_attribute",
            Call::InitializeDeviceAttribute(device.id, attribute.id),
        )
    }

    fn notify_device_attribute(&self, device: &Device, attribute: &Attribute) -> PluginResult {
        self.record(
            "notify_device_attribute",
            Call::NotifyDeviceAttribute(device.id, attribute.id),
        )
    }

    fn remove_device_attribute(
        &self,
        device: &Device,
        attribute_id: AttributeId,
    ) -> PluginResult {
        self.record(
            "remove_device_attribute",
            Call::RemoveDeviceAttribute(device.id, attribute_id),
        )
    }

    fn initialize_channel(&self, device: &Device, channel: &Channel) -> PluginResult {
        self.record(
            "initialize_channel",
            Call::InitializeChannel(device.id, channel.id),
        )
    }

    fn remove_channel(&self, device: &Device, channel_id: ChannelId) -> PluginResult {
        self.record("remove_channel", Call::RemoveChannel(device.id, channel_id))
    }

    fn initialize_channel_property(
        &self,
        channel: &Channel,
        property: &Property,
    ) -> PluginResult {
        self.record(
            "initialize_channel_property",
            Call::InitializeChannelProperty(channel.id, property.id),
        )
    }

    fn notify_channel_property(&self, channel: &Channel, property: &Property) -> PluginResult {
        self.record(
            "notify_channel_property",
            Call::NotifyChannelProperty(channel.id, property.id),
        )
    }

    fn remove_channel_property(
        &self,
        channel: &Channel,
        property_id: PropertyId,
    ) -> PluginResult {
        self.record(
            "remove_channel_property",
            Call::RemoveChannelProperty(channel.id, property_id),
        )
    }

    async fn write_property(&self, property: &Property, _data: &Payload) -> PluginResult {
        self.record("write_property", Call::WriteProperty(property.id))
    }

    async fn write_control(
        &self,
        control: &Control,
        _data: &Payload,
        action: ControlAction,
    ) -> PluginResult {
        self.record("write_control", Call::WriteControl(control.id, action))
    }
}
