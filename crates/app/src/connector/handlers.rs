//! Per-intent handlers run by the drain loop, one queue item at a time.
//!
//! Every lookup that comes back empty drops the item and logs; only
//! registry and plugin failures escape as [`DispatchError`].

use std::collections::HashSet;
use std::sync::Arc;

use devicehub_domain::channel::Channel;
use devicehub_domain::control::{ControlAction, ControlOwner};
use devicehub_domain::device::Device;
use devicehub_domain::error::PluginError;
use devicehub_domain::id::{AttributeId, ChannelId, ConnectorId, DeviceId, PropertyId};
use devicehub_domain::payload::{Payload, PayloadExt, keys};
use devicehub_domain::property::{Property, PropertyOwner};
use devicehub_domain::routing::{EntityEvent, EntityKind, RoutingKey};

use super::DispatchError;
use crate::loader::LoadedConnector;
use crate::ports::{ConnectorPlugin, Registry};
use crate::queue::{Envelope, QueueItem};

/// What the drain loop should do after an item was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// The loaded connector's record changed; reload and start again.
    Restart,
    /// The loaded connector's record is gone; stop for good.
    Terminate,
}

fn plugin_failure(operation: &'static str) -> impl FnOnce(PluginError) -> DispatchError {
    move |source| DispatchError::Plugin { operation, source }
}

pub(crate) struct Dispatcher<R> {
    registry: Arc<R>,
    loaded: LoadedConnector,
}

impl<R: Registry> Dispatcher<R> {
    pub(crate) fn new(registry: Arc<R>, loaded: LoadedConnector) -> Self {
        Self { registry, loaded }
    }

    pub(crate) fn loaded(&self) -> &LoadedConnector {
        &self.loaded
    }

    pub(crate) fn plugin(&self) -> &dyn ConnectorPlugin {
        self.loaded.plugin().as_ref()
    }

    fn connector_id(&self) -> ConnectorId {
        self.loaded.connector().id
    }

    #[tracing::instrument(
        skip_all,
        fields(
            routing_key = %item.envelope().routing_key(),
            source = ?item.envelope().source(),
        )
    )]
    pub(crate) async fn dispatch(&self, item: &QueueItem) -> Result<Flow, DispatchError> {
        match item {
            QueueItem::PropertyAction(envelope) => {
                self.on_property_action(envelope).await?;
                Ok(Flow::Continue)
            }
            QueueItem::ControlAction(envelope) => {
                self.on_control_action(envelope).await?;
                Ok(Flow::Continue)
            }
            QueueItem::EntityEvent(envelope) => self.on_entity_event(envelope).await,
        }
    }

    // ── Property actions ───────────────────────────────────────────

    async fn on_property_action(&self, envelope: &Envelope) -> Result<(), DispatchError> {
        let data = envelope.data();
        let Some(property_id) = data.parsed_field::<PropertyId>(keys::PROPERTY) else {
            tracing::warn!("property action without a valid property id, dropping");
            return Ok(());
        };
        let Some(property) = self.registry.get_property(property_id).await? else {
            tracing::debug!(%property_id, "property not found, dropping action");
            return Ok(());
        };

        let owner_matches = match envelope.routing_key() {
            RoutingKey::DevicePropertyAction => matches!(property.owner, PropertyOwner::Device(_)),
            RoutingKey::ChannelPropertyAction => {
                matches!(property.owner, PropertyOwner::Channel(_))
            }
            _ => false,
        };
        if !owner_matches {
            tracing::warn!(
                %property_id,
                owner = property.owner.kind(),
                "property owner does not match action kind, dropping"
            );
            return Ok(());
        }

        let Some(root) = self.resolve_root(property).await? else {
            return Ok(());
        };
        if !self.owns_property(&root).await? {
            return Ok(());
        }

        self.plugin()
            .write_property(&root, data)
            .await
            .map_err(plugin_failure("write_property"))
    }

    /// Follow `parent_id` links up to the root property.
    async fn resolve_root(&self, property: Property) -> Result<Option<Property>, DispatchError> {
        let mut visited = HashSet::new();
        let mut current = property;
        while let Some(parent_id) = current.parent_id {
            if !visited.insert(current.id) {
                tracing::warn!(property_id = %current.id, "cycle in property parents, dropping");
                return Ok(None);
            }
            let Some(parent) = self.registry.get_property(parent_id).await? else {
                tracing::debug!(%parent_id, "parent property not found, dropping");
                return Ok(None);
            };
            current = parent;
        }
        Ok(Some(current))
    }

    async fn owns_property(&self, property: &Property) -> Result<bool, DispatchError> {
        Ok(match property.owner {
            PropertyOwner::Connector(connector_id) => connector_id == self.connector_id(),
            PropertyOwner::Device(device_id) => self.owned_device(device_id).await?.is_some(),
            PropertyOwner::Channel(channel_id) => self.owned_channel(channel_id).await?.is_some(),
        })
    }

    // ── Control actions ────────────────────────────────────────────

    async fn on_control_action(&self, envelope: &Envelope) -> Result<(), DispatchError> {
        let data = envelope.data();
        let Some(action) = data.parsed_field::<ControlAction>(keys::NAME) else {
            tracing::debug!(
                name = data.str_field(keys::NAME),
                "unrecognised control action, dropping"
            );
            return Ok(());
        };

        let Some(owner) = self.control_owner(envelope.routing_key(), data).await? else {
            return Ok(());
        };
        let Some(control) = self.registry.find_control(owner, action.as_str()).await? else {
            tracing::warn!(?owner, %action, "control not found, dropping action");
            return Ok(());
        };

        self.plugin()
            .write_control(&control, data, action)
            .await
            .map_err(plugin_failure("write_control"))
    }

    async fn control_owner(
        &self,
        routing_key: RoutingKey,
        data: &Payload,
    ) -> Result<Option<ControlOwner>, DispatchError> {
        Ok(match routing_key {
            RoutingKey::ConnectorControlAction => {
                match data.parsed_field::<ConnectorId>(keys::CONNECTOR) {
                    Some(id) if id == self.connector_id() => Some(ControlOwner::Connector(id)),
                    Some(id) => {
                        tracing::debug!(connector_id = %id, "control action for another connector");
                        None
                    }
                    None => {
                        tracing::warn!("connector control action without connector id");
                        None
                    }
                }
            }
            RoutingKey::DeviceControlAction => match data.parsed_field::<DeviceId>(keys::DEVICE) {
                Some(id) => self
                    .owned_device(id)
                    .await?
                    .map(|device| ControlOwner::Device(device.id)),
                None => {
                    tracing::warn!("device control action without device id");
                    None
                }
            },
            RoutingKey::ChannelControlAction => {
                match data.parsed_field::<ChannelId>(keys::CHANNEL) {
                    Some(id) => self
                        .owned_channel(id)
                        .await?
                        .map(|(_, channel)| ControlOwner::Channel(channel.id)),
                    None => {
                        tracing::warn!("channel control action without channel id");
                        None
                    }
                }
            }
            _ => None,
        })
    }

    // ── Entity events ──────────────────────────────────────────────

    async fn on_entity_event(&self, envelope: &Envelope) -> Result<Flow, DispatchError> {
        let RoutingKey::Entity(event, kind) = envelope.routing_key() else {
            return Ok(Flow::Continue);
        };
        let data = envelope.data();

        match kind {
            EntityKind::Connector => return Ok(self.on_connector_event(event, data)),
            EntityKind::Device => self.on_device_event(event, data).await?,
            EntityKind::DeviceProperty => self.on_device_property_event(event, data).await?,
            EntityKind::DeviceAttribute => self.on_device_attribute_event(event, data).await?,
            EntityKind::Channel => self.on_channel_event(event, data).await?,
            EntityKind::ChannelProperty => self.on_channel_property_event(event, data).await?,
            EntityKind::ConnectorProperty
            | EntityKind::ConnectorControl
            | EntityKind::DeviceControl
            | EntityKind::ChannelControl => {
                tracing::trace!(kind = kind.as_str(), "entity kind not forwarded to plugin");
            }
        }
        Ok(Flow::Continue)
    }

    fn on_connector_event(&self, event: EntityEvent, data: &Payload) -> Flow {
        if data.parsed_field::<ConnectorId>(keys::ID) != Some(self.connector_id()) {
            return Flow::Continue;
        }
        match event {
            EntityEvent::Updated => {
                tracing::warn!(
                    connector_id = %self.connector_id(),
                    "connector record updated, restart required"
                );
                Flow::Restart
            }
            EntityEvent::Deleted => {
                tracing::warn!(
                    connector_id = %self.connector_id(),
                    "connector record deleted, terminating"
                );
                Flow::Terminate
            }
            EntityEvent::Created | EntityEvent::Reported => Flow::Continue,
        }
    }

    async fn on_device_event(
        &self,
        event: EntityEvent,
        data: &Payload,
    ) -> Result<(), DispatchError> {
        let Some(device_id) = entity_id::<DeviceId>(data, "device") else {
            return Ok(());
        };

        if event == EntityEvent::Deleted {
            if data.parsed_field::<ConnectorId>(keys::CONNECTOR) != Some(self.connector_id()) {
                tracing::debug!(%device_id, "deleted device belonged to another connector");
                return Ok(());
            }
            return self
                .plugin()
                .remove_device(device_id)
                .map_err(plugin_failure("remove_device"));
        }

        let Some(device) = self.owned_device(device_id).await? else {
            return Ok(());
        };
        self.plugin()
            .initialize_device(&device)
            .map_err(plugin_failure("initialize_device"))
    }

    async fn on_device_property_event(
        &self,
        event: EntityEvent,
        data: &Payload,
    ) -> Result<(), DispatchError> {
        let Some(property_id) = entity_id::<PropertyId>(data, "device property") else {
            return Ok(());
        };

        if event == EntityEvent::Deleted {
            let Some(device) = self.owner_device_from(data).await? else {
                return Ok(());
            };
            return self
                .plugin()
                .remove_device_property(&device, property_id)
                .map_err(plugin_failure("remove_device_property"));
        }

        let Some(property) = self.registry.get_property(property_id).await? else {
            tracing::debug!(%property_id, "device property not found, dropping event");
            return Ok(());
        };
        let PropertyOwner::Device(device_id) = property.owner else {
            tracing::warn!(%property_id, "property is not owned by a device, dropping event");
            return Ok(());
        };
        let Some(device) = self.owned_device(device_id).await? else {
            return Ok(());
        };

        if event == EntityEvent::Reported {
            self.plugin()
                .notify_device_property(&device, &property)
                .map_err(plugin_failure("notify_device_property"))
        } else {
            self.plugin()
                .initialize_device_property(&device, &property)
                .map_err(plugin_failure("initialize_device_property"))
        }
    }

    async fn on_device_attribute_event(
        &self,
        event: EntityEvent,
        data: &Payload,
    ) -> Result<(), DispatchError> {
        let Some(attribute_id) = entity_id::<AttributeId>(data, "device attribute") else {
            return Ok(());
        };

        if event == EntityEvent::Deleted {
            let Some(device) = self.owner_device_from(data).await? else {
                return Ok(());
            };
            return self
                .plugin()
                .remove_device_attribute(&device, attribute_id)
                .map_err(plugin_failure("remove_device_attribute"));
        }

        let Some(attribute) = self.registry.get_attribute(attribute_id).await? else {
            tracing::debug!(%attribute_id, "device attribute not found, dropping event");
            return Ok(());
        };
        let Some(device) = self.owned_device(attribute.device_id).await? else {
            return Ok(());
        };

        if event == EntityEvent::Reported {
            self.plugin()
                .notify_device_attribute(&device, &attribute)
                .map_err(plugin_failure("notify_device_attribute"))
        } else {
            self.plugin()
                .initialize_device_attribute(&device, &attribute)
                .map_err(plugin_failure("initialize_device_attribute"))
        }
    }

    async fn on_channel_event(
        &self,
        event: EntityEvent,
        data: &Payload,
    ) -> Result<(), DispatchError> {
        let Some(channel_id) = entity_id::<ChannelId>(data, "channel") else {
            return Ok(());
        };

        if event == EntityEvent::Deleted {
            let Some(device) = self.owner_device_from(data).await? else {
                return Ok(());
            };
            return self
                .plugin()
                .remove_channel(&device, channel_id)
                .map_err(plugin_failure("remove_channel"));
        }

        let Some((device, channel)) = self.owned_channel(channel_id).await? else {
            return Ok(());
        };
        self.plugin()
            .initialize_channel(&device, &channel)
            .map_err(plugin_failure("initialize_channel"))
    }

    async fn on_channel_property_event(
        &self,
        event: EntityEvent,
        data: &Payload,
    ) -> Result<(), DispatchError> {
        let Some(property_id) = entity_id::<PropertyId>(data, "channel property") else {
            return Ok(());
        };

        if event == EntityEvent::Deleted {
            let Some(channel_id) = data.parsed_field::<ChannelId>(keys::CHANNEL) else {
                tracing::warn!(%property_id, "deleted channel property without channel id");
                return Ok(());
            };
            let Some((_, channel)) = self.owned_channel(channel_id).await? else {
                return Ok(());
            };
            return self
                .plugin()
                .remove_channel_property(&channel, property_id)
                .map_err(plugin_failure("remove_channel_property"));
        }

        let Some(property) = self.registry.get_property(property_id).await? else {
            tracing::debug!(%property_id, "channel property not found, dropping event");
            return Ok(());
        };
        let PropertyOwner::Channel(channel_id) = property.owner else {
            tracing::warn!(%property_id, "property is not owned by a channel, dropping event");
            return Ok(());
        };
        let Some((_, channel)) = self.owned_channel(channel_id).await? else {
            return Ok(());
        };

        if event == EntityEvent::Reported {
            self.plugin()
                .notify_channel_property(&channel, &property)
                .map_err(plugin_failure("notify_channel_property"))
        } else {
            self.plugin()
                .initialize_channel_property(&channel, &property)
                .map_err(plugin_failure("initialize_channel_property"))
        }
    }

    // ── Ownership ──────────────────────────────────────────────────

    /// Look up a device and keep it only if the loaded connector drives it.
    async fn owned_device(&self, device_id: DeviceId) -> Result<Option<Device>, DispatchError> {
        let Some(device) = self.registry.get_device(device_id).await? else {
            tracing::debug!(%device_id, "device not found, dropping");
            return Ok(None);
        };
        if !device.belongs_to(self.connector_id()) {
            tracing::debug!(%device_id, "device belongs to another connector, ignoring");
            return Ok(None);
        }
        Ok(Some(device))
    }

    /// Look up a channel together with its owning device.
    async fn owned_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<(Device, Channel)>, DispatchError> {
        let Some(channel) = self.registry.get_channel(channel_id).await? else {
            tracing::debug!(%channel_id, "channel not found, dropping");
            return Ok(None);
        };
        Ok(self
            .owned_device(channel.device_id)
            .await?
            .map(|device| (device, channel)))
    }

    /// Owning device named by the `device` field of a deletion payload.
    async fn owner_device_from(&self, data: &Payload) -> Result<Option<Device>, DispatchError> {
        let Some(device_id) = data.parsed_field::<DeviceId>(keys::DEVICE) else {
            tracing::warn!("deletion payload without owning device id, dropping");
            return Ok(None);
        };
        self.owned_device(device_id).await
    }
}

fn entity_id<T: std::str::FromStr>(data: &Payload, entity: &'static str) -> Option<T> {
    let id = data.parsed_field::<T>(keys::ID);
    if id.is_none() {
        tracing::warn!(entity, "entity event without a valid id, dropping");
    }
    id
}
