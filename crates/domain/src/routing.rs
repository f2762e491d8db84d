//! Bus vocabulary: routing keys and message sources.
//!
//! Routing keys are dotted strings under the `devices.` namespace:
//!
//! | Intent | Form |
//! |--------|------|
//! | property action | `devices.action.<device\|channel>.property` |
//! | control action | `devices.action.<connector\|device\|channel>.control` |
//! | entity notification | `devices.entity.<created\|updated\|deleted>.<kind>` |
//! | hardware report | `devices.entity.reported.<kind>` (property/attribute kinds only) |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const NAMESPACE: &str = "devices";

/// Registry entity kinds that produce notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Connector,
    ConnectorProperty,
    ConnectorControl,
    Device,
    DeviceProperty,
    DeviceAttribute,
    DeviceControl,
    Channel,
    ChannelProperty,
    ChannelControl,
}

impl EntityKind {
    const ALL: [Self; 10] = [
        Self::Connector,
        Self::ConnectorProperty,
        Self::ConnectorControl,
        Self::Device,
        Self::DeviceProperty,
        Self::DeviceAttribute,
        Self::DeviceControl,
        Self::Channel,
        Self::ChannelProperty,
        Self::ChannelControl,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connector => "connector",
            Self::ConnectorProperty => "connector.property",
            Self::ConnectorControl => "connector.control",
            Self::Device => "device",
            Self::DeviceProperty => "device.property",
            Self::DeviceAttribute => "device.attribute",
            Self::DeviceControl => "device.control",
            Self::Channel => "channel",
            Self::ChannelProperty => "channel.property",
            Self::ChannelControl => "channel.control",
        }
    }

    /// Whether hardware can push values for this kind (`reported` events).
    #[must_use]
    pub fn is_reportable(self) -> bool {
        matches!(
            self,
            Self::ConnectorProperty
                | Self::DeviceProperty
                | Self::DeviceAttribute
                | Self::ChannelProperty
        )
    }
}

/// What happened to a registry entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityEvent {
    Created,
    Updated,
    Deleted,
    /// A hardware-originated value push, as opposed to a registry mutation.
    Reported,
}

impl EntityEvent {
    const ALL: [Self; 4] = [Self::Created, Self::Updated, Self::Deleted, Self::Reported];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Reported => "reported",
        }
    }
}

/// The three message intents a consumer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    PropertyAction,
    ControlAction,
    EntityNotification,
}

/// Enumerated tag identifying the intent of a bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    DevicePropertyAction,
    ChannelPropertyAction,
    ConnectorControlAction,
    DeviceControlAction,
    ChannelControlAction,
    Entity(EntityEvent, EntityKind),
}

impl RoutingKey {
    pub const CONNECTOR_ENTITY_UPDATED: Self =
        Self::Entity(EntityEvent::Updated, EntityKind::Connector);
    pub const CONNECTOR_ENTITY_DELETED: Self =
        Self::Entity(EntityEvent::Deleted, EntityKind::Connector);

    #[must_use]
    pub fn intent(self) -> Intent {
        match self {
            Self::DevicePropertyAction | Self::ChannelPropertyAction => Intent::PropertyAction,
            Self::ConnectorControlAction
            | Self::DeviceControlAction
            | Self::ChannelControlAction => Intent::ControlAction,
            Self::Entity(..) => Intent::EntityNotification,
        }
    }

    /// Whether `key` lies in a namespace this crate knows about, without
    /// requiring it to be a fully recognised key.
    #[must_use]
    pub fn in_namespace(key: &str) -> bool {
        key.strip_prefix(NAMESPACE)
            .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DevicePropertyAction => write!(f, "{NAMESPACE}.action.device.property"),
            Self::ChannelPropertyAction => write!(f, "{NAMESPACE}.action.channel.property"),
            Self::ConnectorControlAction => write!(f, "{NAMESPACE}.action.connector.control"),
            Self::DeviceControlAction => write!(f, "{NAMESPACE}.action.device.control"),
            Self::ChannelControlAction => write!(f, "{NAMESPACE}.action.channel.control"),
            Self::Entity(event, kind) => {
                write!(f, "{NAMESPACE}.entity.{}.{}", event.as_str(), kind.as_str())
            }
        }
    }
}

/// Returned when a string is not a recognised routing key.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown routing key `{0}`")]
pub struct UnknownRoutingKey(pub String);

impl FromStr for RoutingKey {
    type Err = UnknownRoutingKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownRoutingKey(s.to_string());
        let rest = s
            .strip_prefix(NAMESPACE)
            .and_then(|rest| rest.strip_prefix('.'))
            .ok_or_else(unknown)?;

        if let Some(target) = rest.strip_prefix("action.") {
            return match target {
                "device.property" => Ok(Self::DevicePropertyAction),
                "channel.property" => Ok(Self::ChannelPropertyAction),
                "connector.control" => Ok(Self::ConnectorControlAction),
                "device.control" => Ok(Self::DeviceControlAction),
                "channel.control" => Ok(Self::ChannelControlAction),
                _ => Err(unknown()),
            };
        }

        let (event_str, kind_str) = rest
            .strip_prefix("entity.")
            .and_then(|entity| entity.split_once('.'))
            .ok_or_else(unknown)?;
        let event = EntityEvent::ALL
            .into_iter()
            .find(|e| e.as_str() == event_str)
            .ok_or_else(unknown)?;
        let kind = EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str() == kind_str)
            .ok_or_else(unknown)?;

        if event == EntityEvent::Reported && !kind.is_reportable() {
            return Err(unknown());
        }
        Ok(Self::Entity(event, kind))
    }
}

impl Serialize for RoutingKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoutingKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a bus message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    /// The registry itself (entity mutations).
    Registry,
    /// An API client (user-issued commands).
    Api,
    /// A running connector (state and value reports).
    Connector,
    /// The automation layer.
    Automation,
}
