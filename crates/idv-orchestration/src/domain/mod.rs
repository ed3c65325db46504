//! Domain layer: pure state and policy, no I/O.

pub mod callback;
pub mod continuation;
pub mod entities;
pub mod lock_table;
pub mod retry;

pub use callback::{CallbackJob, CallbackKind, JobStatus};
pub use continuation::{CallbackDescriptor, ContinuationRecord, SavedArgs};
pub use entities::{readiness_window, IdentityRecord, ReconcileOutcome, ReplaySummary};
pub use lock_table::{RequestLockGuard, RequestLockTable};
pub use retry::{RetryDecision, RetryPolicy};
