//! Registry seeding for a standalone process.
//!
//! Without an external registry the process owns an in-memory one, so it
//! records its own connector and, for the virtual type, a small demo device.

use devicehub_adapter_registry_memory::MemoryRegistry;
use devicehub_app::ports::{
    BusPublisher, ConnectorRepository, PropertyManager, PropertyStateManager,
};
use devicehub_domain::channel::Channel;
use devicehub_domain::connector::Connector;
use devicehub_domain::control::{Control, ControlOwner};
use devicehub_domain::device::{Attribute, Device};
use devicehub_domain::error::DeviceHubError;
use devicehub_domain::id::ConnectorId;
use devicehub_domain::property::{DataType, Property, PropertyOwner, PropertyStatePatch};

use crate::config::ConnectorConfig;

/// Ensure the configured connector exists and return its record.
///
/// # Errors
///
/// Returns a validation error for an invalid configuration, or a storage
/// error from the registry.
pub async fn ensure_connector<P>(
    registry: &MemoryRegistry<P>,
    config: &ConnectorConfig,
) -> Result<Connector, DeviceHubError>
where
    P: BusPublisher + Send + Sync,
{
    if let Some(id) = config.id
        && let Some(existing) = registry.get_connector(id).await?
    {
        return Ok(existing);
    }
    let connector = Connector::builder()
        .id(config.id.unwrap_or_default())
        .identifier(config.identifier.clone())
        .connector_type(config.connector_type.clone())
        .build()?;
    tracing::info!(
        connector_id = %connector.id,
        connector_type = %connector.connector_type,
        "seeding connector"
    );
    registry.create_connector(connector).await
}

/// Records created by [`seed_demo_device`].
#[derive(Debug, Clone)]
pub struct DemoDevice {
    pub device: Device,
    pub channel: Channel,
    pub temperature: Property,
    pub setpoint: Property,
    pub relay: Property,
    pub identify: Control,
}

/// Create a thermostat with a relay channel under `connector_id`.
///
/// # Errors
///
/// Returns a registry error when any record cannot be created.
pub async fn seed_demo_device<P>(
    registry: &MemoryRegistry<P>,
    connector_id: ConnectorId,
) -> Result<DemoDevice, DeviceHubError>
where
    P: BusPublisher + Send + Sync,
{
    let device = registry
        .create_device(
            Device::builder()
                .identifier("thermostat")
                .name("Demo thermostat")
                .connector_id(connector_id)
                .build()?,
        )
        .await?;
    let owner = PropertyOwner::Device(device.id);

    let temperature = registry
        .create_property(
            Property::builder()
                .identifier("temperature")
                .owner(owner)
                .data_type(DataType::Float)
                .queryable(true)
                .build()?,
        )
        .await?;
    let setpoint = registry
        .create_property(
            Property::builder()
                .identifier("setpoint")
                .owner(owner)
                .data_type(DataType::Float)
                .settable(true)
                .queryable(true)
                .build()?,
        )
        .await?;
    registry
        .create_attribute(
            Attribute::new(device.id, "firmware").with_content(serde_json::json!("1.0.0")),
        )
        .await?;

    let channel = registry
        .create_channel(Channel::new(device.id, "relay").with_name("Heating relay"))
        .await?;
    let relay = registry
        .create_property(
            Property::builder()
                .identifier("switch")
                .owner(PropertyOwner::Channel(channel.id))
                .data_type(DataType::Switch)
                .settable(true)
                .build()?,
        )
        .await?;

    let identify = registry
        .create_control(Control::new(ControlOwner::Device(device.id), "identify")?)
        .await?;

    registry
        .create_state(
            temperature.id,
            PropertyStatePatch::actual(serde_json::json!(20.5)),
        )
        .await?;

    Ok(DemoDevice {
        device,
        channel,
        temperature,
        setpoint,
        relay,
        identify,
    })
}
