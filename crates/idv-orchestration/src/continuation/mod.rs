//! Resumable multi-step workflows.
//!
//! Steps are addressed by name through [`ContinuationRegistry`], never by a
//! held closure, so a step suspended before a restart resumes after it.

pub mod add_accessor;
pub mod registry;

pub use add_accessor::{
    add_accessor_after_consent, register_add_accessor_steps, ACTION_ADD_ACCESSOR,
    AFTER_ADD_ACCESSOR_METHOD, AFTER_REGISTER_MQ_DEST,
};
pub use registry::{ContinuationRegistry, ContinuationStep, TerminalCallback};
