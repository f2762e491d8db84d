//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside
//! world: the registry (persistence), the bus (outbound messages) and the
//! protocol adapters (plugins).

pub mod bus;
pub mod plugin;
pub mod registry;

pub use bus::{BusMessage, BusPublisher};
pub use plugin::{ConnectorPlugin, PluginResult};
pub use registry::{
    ChannelRepository, ConnectorRepository, ControlRepository, DeviceRepository,
    PropertyManager, PropertyRepository, PropertyStateManager, PropertyStateRepository, Registry,
};
