//! # Node Container
//!
//! Configuration and dependency injection for one node.
//!
//! - Components are built once, in dependency order
//! - Every component is shared through `Arc`
//! - The ledger is reached only through the shared bus

pub mod components;
pub mod config;

pub use components::{ContainerError, NodeContainer};
pub use config::{ConfigError, NodeConfig};
