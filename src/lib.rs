//! Client-side private balance ledger.
//!
//! Reconstructs an account's spendable commitments from commitment pool events, keeps a
//! chain-ordered transaction history in sled, and selects inputs for outgoing spends.
//! The [`sync::Watcher`] is the entry point; everything it mutates is serialized through
//! the [`scheduler::Scheduler`].

/// Configuration loading and validation
pub mod config;
/// Decryption delegate client
pub mod delegate;
/// Commitment event log source
pub mod indexer;
/// Persistent commitment and history stores
pub mod ledger;
/// Key-serialized task scheduler
pub mod scheduler;
/// Backfill, event processing and decryption routing
pub mod sync;
/// Spend planning
pub mod transaction;
/// Formatting helpers
pub mod utils;

pub use config::{ConfigError, LedgerConfig};
pub use sync::{SyncError, Watcher};
