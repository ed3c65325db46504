//! # Identity-Verification Request Orchestration
//!
//! Reconciles out-of-band message delivery with on-ledger confirmation,
//! drives workflows that pause across ledger transactions, and delivers
//! outcome notifications to participant callback endpoints.
//!
//! ## Components
//!
//! | Component | Responsibility | Module |
//! |-----------|----------------|--------|
//! | `RequestLockTable` | Per-request exclusion between bus and block paths | `domain/lock_table.rs` |
//! | `BlockSyncReconciler` | Process now or buffer until the ledger catches up | `reconciler.rs` |
//! | `ContinuationRegistry` | Resume named workflow steps on transaction results | `continuation/` |
//! | `CallbackDeliveryEngine` | At-least-once HTTP delivery with retry | `callback/` |
//! | `RoleDispatcher` | Route events to RP / IDP / AS / Proxy handlers | `dispatcher/` |
//!
//! ## Invariants
//!
//! | Invariant | Enforcement |
//! |-----------|-------------|
//! | A request is processed at most once per delivery race | `RequestLockGuard::release_if` re-checks height under the table mutex |
//! | A buffered request is never processed before its height | `readiness_window` replays `[from - 1, to - 1]` only |
//! | Window index entries are cleared after every block event | `BlockSyncReconciler::on_new_blocks` |
//! | A continuation is resumed at most once | `CacheDb::take_continuation` |
//! | A stored callback job survives a restart | persisted before the first attempt, removed only on 2xx or exhaustion |
//!
//! ## Event Flow
//!
//! ```text
//! bus message ──► RoleDispatcher ──► BlockSyncReconciler ──► RequestProcessor
//!                                        ▲                        │
//! new blocks ──► RoleDispatcher ─────────┘                        ▼
//!                    └──► block tasks (cleanup)        CallbackDeliveryEngine ──► HTTPS
//!
//! tx result ──► ContinuationRegistry ──► step ──► next tx | terminal callback
//! ```
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OUTER LAYER                                │
//! │  adapters/ - stores, cache facade, HTTP transport, reporters    │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MIDDLE LAYER                               │
//! │  ports/inbound.rs  - NodeEventHandler, TransactionResultHandler │
//! │  ports/outbound.rs - KeyValueStore, LedgerClient, transports    │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INNER LAYER                                │
//! │  domain/lock_table.rs   - RequestLockTable, RequestLockGuard    │
//! │  domain/entities.rs     - readiness window, identity record     │
//! │  domain/continuation.rs - ContinuationRecord, SavedArgs         │
//! │  domain/callback.rs     - CallbackJob, CallbackKind             │
//! │  domain/retry.rs        - RetryPolicy                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod callback;
pub mod config;
pub mod continuation;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod reconciler;

pub use adapters::*;
pub use callback::*;
pub use config::{CallbackConfig, OrchestrationConfig};
pub use continuation::*;
pub use dispatcher::*;
pub use domain::*;
pub use error::{ErrorPayload, KVStoreError, OrchestrationError, Result};
pub use metrics::OrchestrationMetrics;
pub use ports::*;
pub use reconciler::{BlockSyncReconciler, ACTION_PROCESS_EXPECTED_IN_BLOCKS};
