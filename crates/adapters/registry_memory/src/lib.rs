//! # devicehub-adapter-registry-memory
//!
//! In-memory implementation of the registry collaborators.
//!
//! ## Responsibilities
//! - Implement every registry port trait defined in `devicehub-app::ports::registry`
//! - Offer the management operations (create / update / delete per entity
//!   kind) that the rest of the platform would normally perform
//! - Announce every mutation on the bus with a `devices.entity.*` message
//!   whose payload is the serialized record
//!
//! Deleting an entity does not cascade to its children.
//!
//! ## Dependency rule
//! Depends on `devicehub-app` (for port traits) and `devicehub-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod error;
mod lookups;
mod registry;

pub use error::StorageError;
pub use registry::MemoryRegistry;
