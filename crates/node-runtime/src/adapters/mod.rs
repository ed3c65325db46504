//! # Adapter Implementations
//!
//! Outbound ports of the orchestration core that only make sense inside a
//! running node, where the ledger connector sits on the other side of the
//! shared bus.
//!
//! ```text
//! ┌─────────────────────┐  TransactionSubmitted  ┌──────────────────┐
//! │   BusLedgerClient   │ ─────────────────────► │                  │
//! │ (LedgerClient port) │  LedgerQuery           │ Ledger connector │
//! │                     │ ─────────────────────► │                  │
//! │                     │ ◄───────────────────── │                  │
//! └─────────────────────┘  LedgerQueryResponse   └──────────────────┘
//! ```

pub mod ledger_bridge;

pub use ledger_bridge::BusLedgerClient;
