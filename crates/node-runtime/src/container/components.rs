//! # Node Container
//!
//! Holds every orchestration component of one node and the shared
//! collaborators they are wired with.
//!
//! ## Initialization Order
//!
//! ```text
//! Phase 1: store, cache facade, counters
//! Phase 2: ledger bridge, callback transport, retry policies
//! Phase 3: callback delivery engine, callback URLs, error reporter
//! Phase 4: lock table, block-sync reconciler
//! Phase 5: continuation registry and its steps
//! Phase 6: role dispatcher
//! ```

use std::sync::Arc;

use idv_orchestration::{
    register_add_accessor_steps, BlockSyncReconciler, CacheDb, CallbackDeliveryEngine,
    CallbackErrorReporter, CallbackTransport, CallbackUrlRegistry, ContinuationRegistry,
    DataSchemaCache, ErrorReporter, FileBackedKVStore, HttpCallbackTransport,
    IdentityResultNotifier, IncomingRequestNotifier, OrchestrationError, OrchestrationMetrics,
    RequestLockTable, RoleContext, RoleDispatcher, StaticRetryPolicy, NOTIFY_ADD_ACCESSOR_RESULT,
};
use shared_bus::EventPublisher;
use thiserror::Error;
use tracing::{info, instrument};

use crate::adapters::BusLedgerClient;
use crate::container::config::{ConfigError, NodeConfig};

/// Result type reported by the add-accessor workflow to the client
const ADD_ACCESSOR_RESULT_TYPE: &str = "add_accessor_result";

/// Container construction errors.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to prepare data directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open store: {0}")]
    Store(#[from] idv_orchestration::KVStoreError),

    #[error("Failed to build orchestration core: {0}")]
    Core(#[from] OrchestrationError),
}

/// Every component of a running node.
pub struct NodeContainer {
    // =========================================================================
    // SHARED INFRASTRUCTURE
    // =========================================================================
    /// Cache facade over the persistent store.
    pub cache: Arc<CacheDb>,
    /// Core counters, mirrored into Prometheus by the runtime.
    pub metrics: Arc<OrchestrationMetrics>,
    /// Ledger connector bridge.
    pub ledger: Arc<BusLedgerClient>,

    // =========================================================================
    // CALLBACKS
    // =========================================================================
    pub callbacks: Arc<CallbackDeliveryEngine>,
    pub urls: Arc<CallbackUrlRegistry>,
    pub reporter: Arc<dyn ErrorReporter>,

    // =========================================================================
    // ORCHESTRATION
    // =========================================================================
    pub locks: Arc<RequestLockTable>,
    pub reconciler: Arc<BlockSyncReconciler>,
    pub continuations: Arc<ContinuationRegistry>,
    pub schemas: Arc<DataSchemaCache>,
    pub dispatcher: Arc<RoleDispatcher>,

    /// Node configuration (immutable after initialization).
    pub config: NodeConfig,
}

impl NodeContainer {
    /// Build the container with the HTTPS callback transport.
    pub fn new(
        config: NodeConfig,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self, ContainerError> {
        let transport = Arc::new(HttpCallbackTransport::new(
            config.callback.core.request_timeout(),
        )?);
        Self::with_transport(config, publisher, transport)
    }

    /// Build the container over a given callback transport.
    #[instrument(name = "container_init", skip_all, fields(node_id = %config.node.node_id))]
    pub fn with_transport(
        config: NodeConfig,
        publisher: Arc<dyn EventPublisher>,
        transport: Arc<dyn CallbackTransport>,
    ) -> Result<Self, ContainerError> {
        config.validate()?;

        // =====================================================================
        // PHASE 1: Store
        // =====================================================================
        std::fs::create_dir_all(&config.storage.data_dir)?;
        let store = Arc::new(FileBackedKVStore::open(config.storage.store_path())?);
        let cache = Arc::new(CacheDb::new(store));
        let metrics = Arc::new(OrchestrationMetrics::new());
        info!(path = %config.storage.store_path().display(), "Store opened");

        // =====================================================================
        // PHASE 2: Ledger and transport
        // =====================================================================
        let ledger = Arc::new(BusLedgerClient::new(
            publisher,
            config.ledger.query_timeout(),
        ));
        let policies = Arc::new(StaticRetryPolicy::new(
            config.callback.core.event_retry.clone(),
            config.callback.core.error_retry.clone(),
        ));

        // =====================================================================
        // PHASE 3: Callbacks
        // =====================================================================
        let callbacks = Arc::new(CallbackDeliveryEngine::new(
            cache.clone(),
            transport,
            policies,
            metrics.clone(),
            config.callback.core.clone(),
        ));

        let hosted = config.hosted_roles();
        let urls = Arc::new(CallbackUrlRegistry::new());
        for node_id in hosted.keys() {
            for (kind, url) in &config.callback.urls {
                urls.set(node_id, *kind, url.clone());
            }
        }
        let reporter: Arc<dyn ErrorReporter> = Arc::new(CallbackErrorReporter::new(
            urls.clone(),
            callbacks.clone(),
            metrics.clone(),
        ));

        // =====================================================================
        // PHASE 4: Reconciliation
        // =====================================================================
        let processor = Arc::new(IncomingRequestNotifier::new(
            hosted,
            urls.clone(),
            callbacks.clone(),
        ));
        let locks = Arc::new(RequestLockTable::new());
        let reconciler = Arc::new(BlockSyncReconciler::new(
            locks.clone(),
            cache.clone(),
            ledger.clone(),
            processor,
            reporter.clone(),
            metrics.clone(),
        ));

        // =====================================================================
        // PHASE 5: Continuations
        // =====================================================================
        let continuations = Arc::new(ContinuationRegistry::new(
            ledger.clone(),
            cache.clone(),
            metrics.clone(),
        ));
        register_add_accessor_steps(&continuations);
        continuations.register_callback(
            NOTIFY_ADD_ACCESSOR_RESULT,
            Arc::new(IdentityResultNotifier::new(
                ADD_ACCESSOR_RESULT_TYPE,
                urls.clone(),
                callbacks.clone(),
            )),
        );

        // =====================================================================
        // PHASE 6: Dispatcher
        // =====================================================================
        let schemas = Arc::new(DataSchemaCache::new());
        let ctx = RoleContext {
            reconciler: reconciler.clone(),
            cache: cache.clone(),
            ledger: ledger.clone(),
            reporter: reporter.clone(),
            urls: urls.clone(),
            schema_cache: schemas.clone(),
        };
        let dispatcher = Arc::new(RoleDispatcher::new(
            config.node.role,
            config.node.node_id.clone(),
            &config.node.proxied,
            ctx,
        )?);
        info!(role = %config.node.role, hosted = dispatcher.hosted_roles().len(), "Container initialized");

        Ok(Self {
            cache,
            metrics,
            ledger,
            callbacks,
            urls,
            reporter,
            locks,
            reconciler,
            continuations,
            schemas,
            dispatcher,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idv_orchestration::{CallbackKind, Result};
    use serde_json::Value;
    use shared_bus::InMemoryEventBus;
    use shared_types::entities::{NodeId, NodeRole};

    struct NoTransport;

    #[async_trait::async_trait]
    impl CallbackTransport for NoTransport {
        async fn post_json(&self, _url: &str, _body: &Value) -> Result<u16> {
            Ok(200)
        }
    }

    fn proxy_config(dir: &std::path::Path) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.node.node_id = NodeId::from("proxy1");
        config.node.role = NodeRole::Proxy;
        config.node.proxied = vec![
            (NodeId::from("rp1"), NodeRole::Rp),
            (NodeId::from("idp1"), NodeRole::Idp),
        ];
        config.storage.data_dir = dir.join("nested");
        config
            .callback
            .urls
            .insert(CallbackKind::Error, "https://client.example/error".into());
        config
    }

    #[test]
    fn test_proxy_container_wires_every_member() {
        let dir = tempfile::tempdir().unwrap();
        let container = NodeContainer::with_transport(
            proxy_config(dir.path()),
            Arc::new(InMemoryEventBus::new()),
            Arc::new(NoTransport),
        )
        .unwrap();

        assert!(dir.path().join("nested").exists());
        assert_eq!(container.dispatcher.role(), NodeRole::Proxy);
        assert_eq!(container.dispatcher.hosted_roles().len(), 2);
        for member in ["rp1", "idp1"] {
            assert_eq!(
                container
                    .urls
                    .get(&NodeId::from(member), CallbackKind::Error)
                    .as_deref(),
                Some("https://client.example/error")
            );
        }
        assert!(container.continuations.has_callback(NOTIFY_ADD_ACCESSOR_RESULT));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = proxy_config(dir.path());
        config.node.proxied.clear();

        let result = NodeContainer::with_transport(
            config,
            Arc::new(InMemoryEventBus::new()),
            Arc::new(NoTransport),
        );
        assert!(matches!(result, Err(ContainerError::Config(_))));
    }
}
