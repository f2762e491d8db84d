//! Control: a named command that can be triggered on a connector, device or channel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DeviceHubError, ValidationError};
use crate::id::{ChannelId, ConnectorId, ControlId, DeviceId};

/// The entity a control hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlOwner {
    Connector(ConnectorId),
    Device(DeviceId),
    Channel(ChannelId),
}

/// A control registry record. Controls are unique per `(owner, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub id: ControlId,
    pub name: String,
    #[serde(flatten)]
    pub owner: ControlOwner,
}

impl Control {
    /// Create a control after checking the name is not empty.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceHubError::Validation`] when `name` is empty.
    pub fn new(owner: ControlOwner, name: impl Into<String>) -> Result<Self, DeviceHubError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::EmptyControlName.into());
        }
        Ok(Self {
            id: ControlId::new(),
            name,
            owner,
        })
    }
}

/// The closed set of recognised control actions.
///
/// A control-action message names its action through the control name;
/// names outside this set are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Configure,
    Discover,
    Identify,
    Reboot,
    Reset,
    Restart,
}

impl ControlAction {
    pub const ALL: [Self; 6] = [
        Self::Configure,
        Self::Discover,
        Self::Identify,
        Self::Reboot,
        Self::Reset,
        Self::Restart,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Discover => "discover",
            Self::Identify => "identify",
            Self::Reboot => "reboot",
            Self::Reset => "reset",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the [`ControlAction`] names.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown control action `{0}`")]
pub struct UnknownControlAction(pub String);

impl FromStr for ControlAction {
    type Err = UnknownControlAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownControlAction(s.to_string()))
    }
}
