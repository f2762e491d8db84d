//! Plugin registry and connector loading.
//!
//! Adapters are registered explicitly at startup under their connector
//! type. Loading a connector resolves its registry record, picks the
//! factory whose key matches the record's `type`, builds the plugin and
//! initializes it.
//!
//! Type keys are matched after normalization: case and separators are
//! ignored and a trailing `connector` suffix is dropped, so `"Modbus"`,
//! `"modbus-connector"` and `"modbus_connector"` all select `modbus`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use devicehub_domain::connector::Connector;
use devicehub_domain::error::{DeviceHubError, PluginError};
use devicehub_domain::id::ConnectorId;
use devicehub_domain::property::PropertyOwner;

use crate::ports::{ConnectorPlugin, Registry};

/// Builds a plugin for one connector record.
///
/// The span is scoped to the connector; adapters should enter it (or use
/// it as a parent) for everything they log.
pub type PluginFactory = Box<
    dyn Fn(&Connector, tracing::Span) -> Result<Arc<dyn ConnectorPlugin>, PluginError>
        + Send
        + Sync,
>;

/// Why a connector could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("connector {0} not found in registry")]
    ConnectorNotFound(ConnectorId),

    #[error("no plugin registered for connector type `{0}`")]
    UnknownType(String),

    #[error("plugin for `{expected}` reports connector type `{actual}`")]
    TypeMismatch { expected: String, actual: String },

    #[error("plugin factory failed")]
    Factory(#[source] PluginError),

    #[error("plugin initialization failed")]
    Initialize(#[source] PluginError),

    #[error("registry lookup failed")]
    Registry(#[from] DeviceHubError),
}

/// A connector record paired with the plugin instance built for it.
#[derive(Clone)]
pub struct LoadedConnector {
    connector: Connector,
    plugin: Arc<dyn ConnectorPlugin>,
}

impl LoadedConnector {
    #[must_use]
    pub fn new(connector: Connector, plugin: Arc<dyn ConnectorPlugin>) -> Self {
        Self { connector, plugin }
    }

    #[must_use]
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    #[must_use]
    pub fn plugin(&self) -> &Arc<dyn ConnectorPlugin> {
        &self.plugin
    }
}

impl fmt::Debug for LoadedConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedConnector")
            .field("connector", &self.connector)
            .field("plugin", &self.plugin.connector_type())
            .finish()
    }
}

/// Map from normalized connector type to plugin factory.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `connector_type`. A later registration for
    /// the same normalized type replaces the earlier one.
    pub fn register<F>(&mut self, connector_type: &str, factory: F)
    where
        F: Fn(&Connector, tracing::Span) -> Result<Arc<dyn ConnectorPlugin>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        let key = normalize_type(connector_type);
        if self.factories.insert(key.clone(), Box::new(factory)).is_some() {
            tracing::warn!(connector_type = %key, "replacing previously registered plugin");
        }
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with<F>(mut self, connector_type: &str, factory: F) -> Self
    where
        F: Fn(&Connector, tracing::Span) -> Result<Arc<dyn ConnectorPlugin>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        self.register(connector_type, factory);
        self
    }

    #[must_use]
    pub fn contains(&self, connector_type: &str) -> bool {
        self.factories.contains_key(&normalize_type(connector_type))
    }

    /// Registered types, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    fn resolve(&self, connector_type: &str) -> Option<(String, &PluginFactory)> {
        let key = normalize_type(connector_type);
        let factory = self.factories.get(&key)?;
        Some((key, factory))
    }

    /// Load the connector `connector_id` and build its plugin.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when the record is missing, no plugin matches
    /// its type, the factory fails, the plugin reports a different type,
    /// or the plugin rejects `initialize` or one of the registered entities.
    #[tracing::instrument(skip(self, registry))]
    pub async fn load<R: Registry>(
        &self,
        registry: &R,
        connector_id: ConnectorId,
    ) -> Result<LoadedConnector, LoadError> {
        let connector = registry
            .get_connector(connector_id)
            .await?
            .ok_or(LoadError::ConnectorNotFound(connector_id))?;

        let (key, factory) = self
            .resolve(&connector.connector_type)
            .ok_or_else(|| LoadError::UnknownType(connector.connector_type.clone()))?;

        let span = tracing::info_span!(
            "connector",
            connector_id = %connector.id,
            connector_type = %key,
        );
        let plugin = factory(&connector, span).map_err(LoadError::Factory)?;

        let actual = normalize_type(plugin.connector_type());
        if actual != key {
            return Err(LoadError::TypeMismatch {
                expected: key,
                actual,
            });
        }

        plugin.initialize(&connector).map_err(LoadError::Initialize)?;
        let devices = attach_registered_devices(registry, &connector, plugin.as_ref()).await?;

        tracing::info!(
            connector_type = %key,
            identifier = %connector.identifier,
            devices,
            "connector loaded"
        );
        Ok(LoadedConnector::new(connector, plugin))
    }
}

/// Initialize every registered device of `connector` on the plugin, each
/// followed by its properties, attributes and channels. Returns the number
/// of devices handed over.
async fn attach_registered_devices<R: Registry>(
    registry: &R,
    connector: &Connector,
    plugin: &dyn ConnectorPlugin,
) -> Result<usize, LoadError> {
    let devices = registry.devices_by_connector(connector.id).await?;
    for device in &devices {
        plugin
            .initialize_device(device)
            .map_err(LoadError::Initialize)?;
        for property in registry
            .properties_by_owner(PropertyOwner::Device(device.id))
            .await?
        {
            plugin
                .initialize_device_property(device, &property)
                .map_err(LoadError::Initialize)?;
        }
        for attribute in registry.attributes_by_device(device.id).await? {
            plugin
                .initialize_device_attribute(device, &attribute)
                .map_err(LoadError::Initialize)?;
        }
        for channel in registry.channels_by_device(device.id).await? {
            plugin
                .initialize_channel(device, &channel)
                .map_err(LoadError::Initialize)?;
            for property in registry
                .properties_by_owner(PropertyOwner::Channel(channel.id))
                .await?
            {
                plugin
                    .initialize_channel_property(&channel, &property)
                    .map_err(LoadError::Initialize)?;
            }
        }
    }
    Ok(devices.len())
}

/// Normalize a connector type or adapter name to its registry key.
#[must_use]
pub fn normalize_type(raw: &str) -> String {
    let compact: String = raw
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match compact.strip_suffix("connector") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => compact,
    }
}
