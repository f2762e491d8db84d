//! Channel: a functional sub-unit of a device (a relay output, a sensor head).

use serde::{Deserialize, Serialize};

use crate::id::{ChannelId, DeviceId};

/// A channel belonging to exactly one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub identifier: String,
    pub name: Option<String>,
    #[serde(rename = "device")]
    pub device_id: DeviceId,
}

impl Channel {
    #[must_use]
    pub fn new(device_id: DeviceId, identifier: impl Into<String>) -> Self {
        Self {
            id: ChannelId::new(),
            identifier: identifier.into(),
            name: None,
            device_id,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
