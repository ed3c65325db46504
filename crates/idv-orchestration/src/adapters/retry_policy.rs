//! Static retry policy resolution.

use shared_types::entities::NodeId;

use crate::domain::{CallbackKind, RetryPolicy};
use crate::ports::outbound::RetryPolicyResolver;

/// One policy for domain events and one for error notifications.
#[derive(Debug, Clone, Default)]
pub struct StaticRetryPolicy {
    pub events: RetryPolicy,
    pub errors: RetryPolicy,
}

impl StaticRetryPolicy {
    pub fn new(events: RetryPolicy, errors: RetryPolicy) -> Self {
        Self { events, errors }
    }

    /// Same policy for everything
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            events: policy.clone(),
            errors: policy,
        }
    }
}

impl RetryPolicyResolver for StaticRetryPolicy {
    fn resolve(&self, _node_id: &NodeId, _kind: CallbackKind, is_error: bool) -> RetryPolicy {
        if is_error {
            self.errors.clone()
        } else {
            self.events.clone()
        }
    }
}
