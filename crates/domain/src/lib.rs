//! # devicehub-domain
//!
//! Pure domain model for the devicehub device registry.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions
//! - Registry entities: **Connectors** (configured protocol adapters),
//!   **Devices**, **Channels**, **Properties**, **Attributes**, **Controls**
//! - Persisted runtime state of dynamic properties
//! - The bus vocabulary: routing keys, message sources and payloads
//! - Closed value sets: connection states, control actions
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.

pub mod error;
pub mod id;

pub mod channel;
pub mod connector;
pub mod control;
pub mod device;
pub mod payload;
pub mod property;
pub mod routing;
