//! Adapters for the outbound ports.

pub mod cache_db;
pub mod error_reporter;
pub mod file_store;
pub mod http_transport;
pub mod memory_store;
pub mod processor;
pub mod retry_policy;
pub mod schema_cache;

pub use cache_db::CacheDb;
pub use error_reporter::CallbackErrorReporter;
pub use file_store::FileBackedKVStore;
pub use http_transport::HttpCallbackTransport;
pub use memory_store::InMemoryKVStore;
pub use processor::{request_callback_kind, IncomingRequestNotifier};
pub use retry_policy::StaticRetryPolicy;
pub use schema_cache::DataSchemaCache;
