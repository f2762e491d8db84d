//! Simulated hardware behind the virtual connector.
//!
//! Writes are not applied immediately: they are queued and acknowledged one
//! at a time by a background ticker, the way a real bus would confirm a
//! register write some time after it was sent.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;

use devicehub_domain::channel::Channel;
use devicehub_domain::control::{ControlAction, ControlOwner};
use devicehub_domain::device::{Attribute, Device};
use devicehub_domain::id::{AttributeId, ChannelId, ControlId, DeviceId, PropertyId};
use devicehub_domain::property::{DataType, Property, PropertyOwner};

/// A value sent to hardware and not yet confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub property_id: PropertyId,
    pub value: Value,
}

/// A control action the hardware has executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutedControl {
    pub control_id: ControlId,
    pub owner: ControlOwner,
    pub action: ControlAction,
}

#[derive(Debug, Default)]
pub(crate) struct Hardware {
    /// Set by the first `start`; commands are refused before that.
    pub(crate) started: bool,
    pub(crate) running: bool,
    /// Whether an acknowledgement ticker is alive.
    pub(crate) ticking: bool,
    pub(crate) devices: HashMap<DeviceId, Device>,
    pub(crate) channels: HashMap<ChannelId, Channel>,
    pub(crate) properties: HashMap<PropertyId, Property>,
    pub(crate) attributes: HashMap<AttributeId, Attribute>,
    pub(crate) values: HashMap<PropertyId, Value>,
    pub(crate) pending: VecDeque<PendingWrite>,
    pub(crate) executed: Vec<ExecutedControl>,
}

/// Power-on value of a freshly attached property.
fn initial_value(property: &Property) -> Option<Value> {
    match property.data_type {
        DataType::Bool | DataType::Switch => Some(Value::Bool(false)),
        DataType::Int | DataType::Uint => Some(Value::from(0)),
        DataType::Float => Some(Value::from(0.0)),
        DataType::String => Some(Value::String(String::new())),
        DataType::Enum => property.format.first().cloned().map(Value::String),
        DataType::Button | DataType::Unknown => None,
    }
}

fn owned_by(property: PropertyOwner, control: ControlOwner) -> bool {
    match (property, control) {
        (PropertyOwner::Connector(a), ControlOwner::Connector(b)) => a == b,
        (PropertyOwner::Device(a), ControlOwner::Device(b)) => a == b,
        (PropertyOwner::Channel(a), ControlOwner::Channel(b)) => a == b,
        _ => false,
    }
}

impl Hardware {
    /// Attach a property, keeping its current value when already attached.
    pub(crate) fn attach_property(&mut self, property: &Property) {
        if let Some(value) = initial_value(property) {
            self.values.entry(property.id).or_insert(value);
        }
        self.properties.insert(property.id, property.clone());
    }

    pub(crate) fn detach_property(&mut self, property_id: PropertyId) {
        self.properties.remove(&property_id);
        self.values.remove(&property_id);
        self.pending.retain(|w| w.property_id != property_id);
    }

    /// Forget a device together with its channels, attributes and properties.
    pub(crate) fn detach_device(&mut self, device_id: DeviceId) {
        self.devices.remove(&device_id);
        let channels: Vec<ChannelId> = self
            .channels
            .values()
            .filter(|c| c.device_id == device_id)
            .map(|c| c.id)
            .collect();
        for channel_id in channels {
            self.detach_channel(channel_id);
        }
        self.attributes.retain(|_, a| a.device_id != device_id);
        self.detach_properties_where(|owner| owner == PropertyOwner::Device(device_id));
    }

    pub(crate) fn detach_channel(&mut self, channel_id: ChannelId) {
        self.channels.remove(&channel_id);
        self.detach_properties_where(|owner| owner == PropertyOwner::Channel(channel_id));
    }

    fn detach_properties_where(&mut self, matches: impl Fn(PropertyOwner) -> bool) {
        let ids: Vec<PropertyId> = self
            .properties
            .values()
            .filter(|p| matches(p.owner))
            .map(|p| p.id)
            .collect();
        for id in ids {
            self.detach_property(id);
        }
    }

    /// Execute a control. `reset` restores the power-on value of every
    /// property of the control owner and drops its pending writes.
    pub(crate) fn execute(&mut self, executed: ExecutedControl) {
        if executed.action == ControlAction::Reset {
            let reset: Vec<Property> = self
                .properties
                .values()
                .filter(|p| owned_by(p.owner, executed.owner))
                .cloned()
                .collect();
            for property in reset {
                self.pending.retain(|w| w.property_id != property.id);
                match initial_value(&property) {
                    Some(value) => self.values.insert(property.id, value),
                    None => self.values.remove(&property.id),
                };
            }
        }
        self.executed.push(executed);
    }

    /// Confirm the oldest pending write.
    pub(crate) fn acknowledge_next(&mut self) -> Option<PendingWrite> {
        let write = self.pending.pop_front()?;
        if self.properties.contains_key(&write.property_id) {
            self.values.insert(write.property_id, write.value.clone());
        }
        Some(write)
    }

    /// The ticker keeps going while running, and after stop until drained.
    pub(crate) fn has_work_left(&self) -> bool {
        self.running || !self.pending.is_empty()
    }

    /// Claim the ticker slot. `true` when the caller must spawn a ticker.
    pub(crate) fn claim_ticker(&mut self) -> bool {
        !std::mem::replace(&mut self.ticking, true)
    }
}
