//! # Wiring
//!
//! Connects the shared bus to the orchestration core. The container builds
//! the components; this module feeds them events.

pub mod event_routing;

pub use event_routing::EventRouter;
