//! Connection state publisher: records the plugin's connection state on
//! the connector's `state` property.
//!
//! Writing through the registry's state manager is what broadcasts the new
//! state: the registry emits the change notification, not this type.

use std::sync::Arc;

use devicehub_domain::connector::ConnectionState;
use devicehub_domain::error::DeviceHubError;
use devicehub_domain::id::ConnectorId;
use devicehub_domain::property::{
    DataType, Property, PropertyKind, PropertyOwner, PropertyState, PropertyStatePatch,
};

use crate::ports::Registry;

/// Well-known identifier of the connector property carrying the state.
pub const STATE_PROPERTY_IDENTIFIER: &str = "state";

/// Records the connection state of one connector in the registry.
pub struct ConnectionStatePublisher<R> {
    registry: Arc<R>,
    connector_id: ConnectorId,
}

impl<R: Registry> ConnectionStatePublisher<R> {
    /// Create a publisher for `connector_id` backed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<R>, connector_id: ConnectorId) -> Self {
        Self {
            registry,
            connector_id,
        }
    }

    /// Record `state` as the connector's current connection state.
    ///
    /// Creates the `state` property and its state record on first use;
    /// afterwards the same record is updated in place.
    ///
    /// # Errors
    ///
    /// Propagates registry failures.
    #[tracing::instrument(skip(self), fields(connector_id = %self.connector_id))]
    pub async fn set_state(&self, state: ConnectionState) -> Result<PropertyState, DeviceHubError> {
        let property = self.state_property().await?;
        let patch = PropertyStatePatch::actual(serde_json::Value::from(state.as_str()));

        let recorded = if self.registry.get_state(property.id).await?.is_some() {
            self.registry.update_state(property.id, patch).await?
        } else {
            self.registry.create_state(property.id, patch).await?
        };
        tracing::debug!(%state, "connection state recorded");
        Ok(recorded)
    }

    /// Read back the last recorded state, if any.
    ///
    /// # Errors
    ///
    /// Propagates registry failures.
    pub async fn current(&self) -> Result<Option<ConnectionState>, DeviceHubError> {
        let Some(property) = self
            .registry
            .find_property(
                PropertyOwner::Connector(self.connector_id),
                STATE_PROPERTY_IDENTIFIER,
            )
            .await?
        else {
            return Ok(None);
        };
        let state = self.registry.get_state(property.id).await?;
        Ok(state
            .and_then(|s| s.actual_value)
            .and_then(|value| value.as_str().and_then(|raw| raw.parse().ok())))
    }

    async fn state_property(&self) -> Result<Property, DeviceHubError> {
        let owner = PropertyOwner::Connector(self.connector_id);
        if let Some(property) = self
            .registry
            .find_property(owner, STATE_PROPERTY_IDENTIFIER)
            .await?
        {
            return Ok(property);
        }

        let property = Property::builder()
            .identifier(STATE_PROPERTY_IDENTIFIER)
            .owner(owner)
            .kind(PropertyKind::Dynamic)
            .data_type(DataType::Enum)
            .settable(false)
            .queryable(false)
            .format(ConnectionState::ALL.map(ConnectionState::as_str))
            .build()?;
        tracing::info!(property_id = %property.id, "creating connector state property");
        self.registry.create_property(property).await
    }
}
