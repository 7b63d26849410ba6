//! Embedded single-user relational store for personal financial records.
//!
//! The durable authority is one serialized SQLite blob held by a key/value
//! [`backing::BackingStore`]; the live engine is rebuilt from it at startup
//! and re-serialized behind every mutating call. [`FinanceStore`] is the
//! sole access path: typed, parameterized gateway operations scoped to the
//! owning user, read-only aggregate views, and the [`SessionGate`] auth
//! state machine on top.

pub mod backing;
pub mod csv;
mod db;
mod error;
mod model;
mod persist;
mod repo;
mod schema;
mod session;
mod stats;
mod store;
mod time;

pub mod logging;

pub use backing::{BackingStore, FileBackingStore, MemoryBackingStore};
pub use error::{StoreError, StoreResult};
pub use model::{
    BudgetInput, BudgetRecord, CurrencyCode, ReminderInput, ReminderRecord, ThemePreference,
    TransactionFilter, TransactionInput, TransactionRecord, TxnKind, UserRecord,
    RECOMMENDED_CATEGORIES,
};
pub use repo::PinOutcome;
pub use session::{SavedSession, SessionGate, SessionState};
pub use stats::{CategorySlice, MonthlyBucket, SafeToSpend, Totals, CHART_PALETTE};
pub use store::{FinanceStore, StoreOptions};
