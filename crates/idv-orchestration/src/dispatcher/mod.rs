//! Routing of bus and ledger events to role handlers.

pub mod block_tasks;
pub mod role;

pub use role::{
    AsHandler, IdpHandler, ProxyHandler, RoleContext, RoleDispatcher, RoleHandler, RpHandler,
    ACTION_HANDLE_MESSAGE, ACTION_HANDLE_MQ_ERROR, ACTION_HANDLE_NEW_BLOCK,
};
