//! # devicehub-connectord
//!
//! Composition root for a connector process: one connector, one plugin, an
//! in-memory registry and an in-process bus.
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

pub mod config;
pub mod seed;
pub mod supervisor;
