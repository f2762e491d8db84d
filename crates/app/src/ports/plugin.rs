//! Plugin port: the capability contract of a protocol adapter.
//!
//! A plugin bridges one hardware protocol (Modbus, a vendor LAN API, a
//! simulated bus, ...) into the registry. The dispatch engine owns exactly
//! one plugin instance and drives it in this order:
//!
//! 1. [`initialize`](ConnectorPlugin::initialize): once, right after construction
//! 2. [`start`](ConnectorPlugin::start): open connections, spawn pollers
//! 3. entity callbacks and command writes, strictly one at a time
//! 4. [`stop`](ConnectorPlugin::stop), then
//!    [`has_unfinished_tasks`](ConnectorPlugin::has_unfinished_tasks) is polled
//!    until it reports `false` or the shutdown ceiling is hit
//!
//! Every method may fail; the engine treats a failure from any call made
//! while draining the queue as fatal.

use async_trait::async_trait;

use devicehub_domain::channel::Channel;
use devicehub_domain::connector::Connector;
use devicehub_domain::control::{Control, ControlAction};
use devicehub_domain::device::{Attribute, Device};
use devicehub_domain::error::PluginError;
use devicehub_domain::id::{AttributeId, ChannelId, DeviceId, PropertyId};
use devicehub_domain::payload::Payload;
use devicehub_domain::property::Property;

pub type PluginResult<T = ()> = Result<T, PluginError>;

/// A protocol adapter driving the hardware of one connector.
#[async_trait]
pub trait ConnectorPlugin: Send + Sync {
    /// The connector type this implementation serves (e.g. `"virtual"`).
    fn connector_type(&self) -> &str;

    /// Bind to the loaded connector record. Called once, before any
    /// entity is handed over.
    fn initialize(&self, connector: &Connector) -> PluginResult;

    async fn start(&self) -> PluginResult;

    /// Stop taking new hardware work. Commands still queued when the
    /// engine stops are handed over after this call and must be accepted.
    fn stop(&self) -> PluginResult;

    /// Whether writes or other hardware work are still in flight.
    fn has_unfinished_tasks(&self) -> bool;

    // ── Devices ────────────────────────────────────────────────────

    fn initialize_device(&self, device: &Device) -> PluginResult;

    fn remove_device(&self, device_id: DeviceId) -> PluginResult;

    fn initialize_device_property(&self, device: &Device, property: &Property) -> PluginResult;

    /// A hardware-originated value was recorded for a device property.
    fn notify_device_property(&self, device: &Device, property: &Property) -> PluginResult;

    fn remove_device_property(&self, device: &Device, property_id: PropertyId) -> PluginResult;

    fn initialize_device_attribute(&self, device: &Device, attribute: &Attribute)
    -> PluginResult;

    fn notify_device_attribute(&self, device: &Device, attribute: &Attribute) -> PluginResult;

    fn remove_device_attribute(&self, device: &Device, attribute_id: AttributeId)
    -> PluginResult;

    // ── Channels ───────────────────────────────────────────────────

    fn initialize_channel(&self, device: &Device, channel: &Channel) -> PluginResult;

    fn remove_channel(&self, device: &Device, channel_id: ChannelId) -> PluginResult;

    fn initialize_channel_property(&self, channel: &Channel, property: &Property)
    -> PluginResult;

    fn notify_channel_property(&self, channel: &Channel, property: &Property) -> PluginResult;

    fn remove_channel_property(&self, channel: &Channel, property_id: PropertyId)
    -> PluginResult;

    // ── Commands ───────────────────────────────────────────────────

    /// Write a value to hardware. `property` is always a root property.
    async fn write_property(&self, property: &Property, data: &Payload) -> PluginResult;

    async fn write_control(
        &self,
        control: &Control,
        data: &Payload,
        action: ControlAction,
    ) -> PluginResult;
}
