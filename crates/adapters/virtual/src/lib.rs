//! # devicehub-adapter-virtual
//!
//! Demo protocol adapter serving the `virtual` connector type. Every device,
//! channel, property and attribute the dispatch engine hands over is tracked
//! against simulated hardware; writes are acknowledged asynchronously.
//!
//! ## Dependency rule
//!
//! Depends on `devicehub-app` (port traits) and `devicehub-domain` only.

mod hardware;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::Instrument;

use devicehub_app::loader::PluginRegistry;
use devicehub_app::ports::plugin::{ConnectorPlugin, PluginResult};
use devicehub_domain::channel::Channel;
use devicehub_domain::connector::Connector;
use devicehub_domain::control::{Control, ControlAction};
use devicehub_domain::device::{Attribute, Device};
use devicehub_domain::error::PluginError;
use devicehub_domain::id::{AttributeId, ChannelId, ConnectorId, DeviceId, PropertyId};
use devicehub_domain::payload::{Payload, keys};
use devicehub_domain::property::{DataType, Property};

pub use hardware::{ExecutedControl, PendingWrite};
use hardware::Hardware;

/// Connector type served by this adapter.
pub const CONNECTOR_TYPE: &str = "virtual";

/// Delay between two write acknowledgements of the simulated hardware.
pub const DEFAULT_ACK_INTERVAL: Duration = Duration::from_millis(50);

/// Register the virtual adapter factory.
pub fn register(plugins: &mut PluginRegistry) {
    plugins.register(CONNECTOR_TYPE, |connector, span| {
        let plugin: Arc<dyn ConnectorPlugin> = Arc::new(VirtualPlugin::new(connector, span));
        Ok(plugin)
    });
}

/// Plugin driving simulated hardware.
pub struct VirtualPlugin {
    connector_id: ConnectorId,
    span: tracing::Span,
    ack_interval: Duration,
    hardware: Arc<Mutex<Hardware>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl VirtualPlugin {
    #[must_use]
    pub fn new(connector: &Connector, span: tracing::Span) -> Self {
        Self {
            connector_id: connector.id,
            span,
            ack_interval: DEFAULT_ACK_INTERVAL,
            hardware: Arc::default(),
            ticker: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_ack_interval(mut self, interval: Duration) -> Self {
        self.ack_interval = interval;
        self
    }

    /// Current simulated value of a property.
    #[must_use]
    pub fn value(&self, property_id: PropertyId) -> Option<serde_json::Value> {
        self.hardware().values.get(&property_id).cloned()
    }

    #[must_use]
    pub fn has_device(&self, device_id: DeviceId) -> bool {
        self.hardware().devices.contains_key(&device_id)
    }

    #[must_use]
    pub fn has_channel(&self, channel_id: ChannelId) -> bool {
        self.hardware().channels.contains_key(&channel_id)
    }

    #[must_use]
    pub fn has_property(&self, property_id: PropertyId) -> bool {
        self.hardware().properties.contains_key(&property_id)
    }

    #[must_use]
    pub fn attribute(&self, attribute_id: AttributeId) -> Option<Attribute> {
        self.hardware().attributes.get(&attribute_id).cloned()
    }

    /// Writes sent but not yet acknowledged, oldest first.
    #[must_use]
    pub fn pending_writes(&self) -> Vec<PendingWrite> {
        self.hardware().pending.iter().cloned().collect()
    }

    #[must_use]
    pub fn executed_controls(&self) -> Vec<ExecutedControl> {
        self.hardware().executed.clone()
    }

    fn hardware(&self) -> MutexGuard<'_, Hardware> {
        self.hardware.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commands are refused before the first `start`. After `stop` they are
    /// still accepted: the engine hands over what was queued before it.
    fn ensure_started(&self) -> PluginResult {
        if self.hardware().started {
            Ok(())
        } else {
            Err(PluginError::NotRunning)
        }
    }

    /// Spawn an acknowledgement ticker unless one is alive.
    fn ensure_ticker(&self, hw: &mut Hardware) {
        if !hw.claim_ticker() {
            return;
        }
        let ticker = tokio::spawn(
            acknowledge_writes(Arc::clone(&self.hardware), self.ack_interval)
                .instrument(self.span.clone()),
        );
        *self.ticker.lock().unwrap_or_else(PoisonError::into_inner) = Some(ticker);
    }
}

/// Check that a written value fits the property's data type.
fn check_value(property: &Property, value: &serde_json::Value) -> PluginResult {
    let fits = match property.data_type {
        DataType::Unknown => {
            return Err(PluginError::Unsupported("write to a property of unknown data type"));
        }
        DataType::Bool | DataType::Switch => value.is_boolean(),
        DataType::Int => value.is_i64(),
        DataType::Uint => value.is_u64(),
        DataType::Float => value.is_number(),
        DataType::String => value.is_string(),
        DataType::Enum => value
            .as_str()
            .is_some_and(|v| property.format.iter().any(|f| f == v)),
        DataType::Button => true,
    };
    if fits {
        Ok(())
    } else {
        Err(PluginError::InvalidPayload(keys::EXPECTED_VALUE))
    }
}

impl Drop for VirtualPlugin {
    fn drop(&mut self) {
        let ticker = self
            .ticker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = ticker.take() {
            handle.abort();
        }
    }
}

/// Acknowledge pending writes until stopped and drained.
async fn acknowledge_writes(hardware: Arc<Mutex<Hardware>>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let mut hw = hardware.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(write) = hw.acknowledge_next() {
            tracing::debug!(
                property_id = %write.property_id,
                value = %write.value,
                "write acknowledged"
            );
        }
        if !hw.has_work_left() {
            hw.ticking = false;
            break;
        }
    }
    tracing::debug!("simulated hardware idle");
}

#[async_trait]
impl ConnectorPlugin for VirtualPlugin {
    fn connector_type(&self) -> &str {
        CONNECTOR_TYPE
    }

    fn initialize(&self, connector: &Connector) -> PluginResult {
        if connector.id != self.connector_id {
            return Err(anyhow::anyhow!(
                "plugin built for connector {} cannot serve {}",
                self.connector_id,
                connector.id
            )
            .into());
        }
        tracing::info!(
            parent: &self.span,
            identifier = %connector.identifier,
            "virtual connector initialized"
        );
        Ok(())
    }

    async fn start(&self) -> PluginResult {
        {
            let mut hw = self.hardware();
            hw.started = true;
            hw.running = true;
            self.ensure_ticker(&mut hw);
        }
        tracing::info!(parent: &self.span, "simulated hardware started");
        Ok(())
    }

    fn stop(&self) -> PluginResult {
        let pending = {
            let mut hw = self.hardware();
            hw.running = false;
            hw.pending.len()
        };
        tracing::info!(parent: &self.span, pending, "simulated hardware stopping");
        Ok(())
    }

    fn has_unfinished_tasks(&self) -> bool {
        !self.hardware().pending.is_empty()
    }

    fn initialize_device(&self, device: &Device) -> PluginResult {
        tracing::debug!(parent: &self.span, device_id = %device.id, "device attached");
        self.hardware().devices.insert(device.id, device.clone());
        Ok(())
    }

    fn remove_device(&self, device_id: DeviceId) -> PluginResult {
        tracing::debug!(parent: &self.span, %device_id, "device detached");
        self.hardware().detach_device(device_id);
        Ok(())
    }

    fn initialize_device_property(&self, device: &Device, property: &Property) -> PluginResult {
        tracing::debug!(
            parent: &self.span,
            device_id = %device.id,
            property_id = %property.id,
            "device property attached"
        );
        self.hardware().attach_property(property);
        Ok(())
    }

    fn notify_device_property(&self, device: &Device, property: &Property) -> PluginResult {
        tracing::trace!(
            parent: &self.span,
            device_id = %device.id,
            property_id = %property.id,
            "device property reported"
        );
        Ok(())
    }

    fn remove_device_property(&self, device: &Device, property_id: PropertyId) -> PluginResult {
        tracing::debug!(
            parent: &self.span,
            device_id = %device.id,
            %property_id,
            "device property detached"
        );
        self.hardware().detach_property(property_id);
        Ok(())
    }

    fn initialize_device_attribute(
        &self,
        device: &Device,
        attribute: &Attribute,
    ) -> PluginResult {
        tracing::debug!(
            parent: &self.span,
            device_id = %device.id,
            attribute_id = %attribute.id,
            "attribute attached"
        );
        self.hardware()
            .attributes
            .insert(attribute.id, attribute.clone());
        Ok(())
    }

    fn notify_device_attribute(&self, device: &Device, attribute: &Attribute) -> PluginResult {
        tracing::trace!(
            parent: &self.span,
            device_id = %device.id,
            attribute_id = %attribute.id,
            "attribute reported"
        );
        self.hardware()
            .attributes
            .insert(attribute.id, attribute.clone());
        Ok(())
    }

    fn remove_device_attribute(
        &self,
        device: &Device,
        attribute_id: AttributeId,
    ) -> PluginResult {
        tracing::debug!(
            parent: &self.span,
            device_id = %device.id,
            %attribute_id,
            "attribute detached"
        );
        self.hardware().attributes.remove(&attribute_id);
        Ok(())
    }

    fn initialize_channel(&self, device: &Device, channel: &Channel) -> PluginResult {
        tracing::debug!(
            parent: &self.span,
            device_id = %device.id,
            channel_id = %channel.id,
            "channel attached"
        );
        self.hardware().channels.insert(channel.id, channel.clone());
        Ok(())
    }

    fn remove_channel(&self, device: &Device, channel_id: ChannelId) -> PluginResult {
        tracing::debug!(
            parent: &self.span,
            device_id = %device.id,
            %channel_id,
            "channel detached"
        );
        self.hardware().detach_channel(channel_id);
        Ok(())
    }

    fn initialize_channel_property(
        &self,
        channel: &Channel,
        property: &Property,
    ) -> PluginResult {
        tracing::debug!(
            parent: &self.span,
            channel_id = %channel.id,
            property_id = %property.id,
            "channel property attached"
        );
        self.hardware().attach_property(property);
        Ok(())
    }

    fn notify_channel_property(&self, channel: &Channel, property: &Property) -> PluginResult {
        tracing::trace!(
            parent: &self.span,
            channel_id = %channel.id,
            property_id = %property.id,
            "channel property reported"
        );
        Ok(())
    }

    fn remove_channel_property(
        &self,
        channel: &Channel,
        property_id: PropertyId,
    ) -> PluginResult {
        tracing::debug!(
            parent: &self.span,
            channel_id = %channel.id,
            %property_id,
            "channel property detached"
        );
        self.hardware().detach_property(property_id);
        Ok(())
    }

    async fn write_property(&self, property: &Property, data: &Payload) -> PluginResult {
        self.ensure_started()?;
        let Some(value) = data.get(keys::EXPECTED_VALUE).cloned() else {
            tracing::warn!(
                parent: &self.span,
                property_id = %property.id,
                "write without expected value ignored"
            );
            return Ok(());
        };
        if !property.settable {
            tracing::warn!(
                parent: &self.span,
                property_id = %property.id,
                "write to read-only property ignored"
            );
            return Ok(());
        }
        check_value(property, &value)?;
        tracing::debug!(parent: &self.span, property_id = %property.id, %value, "write queued");
        let mut hw = self.hardware();
        if !hw.properties.contains_key(&property.id) {
            hw.attach_property(property);
        }
        hw.pending.push_back(PendingWrite {
            property_id: property.id,
            value,
        });
        self.ensure_ticker(&mut hw);
        Ok(())
    }

    async fn write_control(
        &self,
        control: &Control,
        _data: &Payload,
        action: ControlAction,
    ) -> PluginResult {
        self.ensure_started()?;
        tracing::info!(
            parent: &self.span,
            control_id = %control.id,
            action = action.as_str(),
            "control executed"
        );
        self.hardware().execute(ExecutedControl {
            control_id: control.id,
            owner: control.owner,
            action,
        });
        Ok(())
    }
}
