//! Outbound notifications to participant endpoints.

pub mod engine;
pub mod notify;
pub mod url_registry;

pub use engine::{CallbackDeliveryEngine, EnqueueOptions};
pub use notify::{IdentityResultNotifier, NOTIFY_ADD_ACCESSOR_RESULT};
pub use url_registry::{required_callback_kinds, CallbackUrlRegistry};
