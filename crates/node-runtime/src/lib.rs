//! # Node Runtime Library
//!
//! Wires the orchestration core of an IDV node to the shared bus. The
//! `main.rs` binary is a thin shell around [`NodeRuntime`].
//!
//! ## Modules
//!
//! - `container/` - configuration and dependency injection
//! - `adapters/` - ledger client over the shared bus
//! - `wiring/` - event routing from the bus into the core
//! - `runtime` - startup and shutdown sequences

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod container;
pub mod runtime;
pub mod wiring;

pub use container::{ConfigError, ContainerError, NodeConfig, NodeContainer};
pub use runtime::NodeRuntime;
