//! # devicehub-app
//!
//! Application layer: the connector dispatch engine and its **port
//! definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters implement:
//!   - registry collaborators (`ConnectorRepository`, `PropertyRepository`,
//!     `PropertyStateManager`, ...) bundled as [`ports::Registry`]
//!   - [`ports::BusPublisher`] for outbound bus messages
//!   - [`ports::ConnectorPlugin`], the contract of a protocol adapter
//! - Receive bus messages ([`consumer`]), queue them in submission order
//!   ([`queue`]) and drain them into the loaded plugin ([`connector`])
//! - Resolve a connector's type to a registered plugin factory ([`loader`])
//! - Record the plugin's connection state in the registry ([`state`])
//! - Provide an **in-process bus** that needs no IO ([`bus`])
//!
//! ## Dependency rule
//! Depends on `devicehub-domain` only (plus `tokio` for tasks and channels).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod bus;
pub mod connector;
pub mod consumer;
pub mod loader;
pub mod ports;
pub mod queue;
pub mod state;

#[cfg(test)]
mod testing;
