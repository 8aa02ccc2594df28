//! Ledger Synchronization Module
//!
//! This module provides the logic that keeps the ledger in step with the chain:
//!
//! - `watcher`: The entry point. Buffers live events, runs backfills and applies event
//!   batches to the stores under the scheduler.
//! - `events`: Filtering and chain-order sorting of raw events.
//! - `decryption`: Note metadata, local note encryption and the per-event decryption route.
//! - `tracker`: The persisted sync checkpoint and the chunked backfill.
//!
//! Event application is idempotent, so any batch may be redelivered after a crash or a
//! failed backfill.

/// Metadata decoding and decryption dispatch
pub mod decryption;
/// Event filtering and ordering
pub mod events;
/// Sync checkpoint and chunked backfill
pub mod tracker;
/// Error and status types
pub mod types;
/// Event batch processor
pub mod watcher;

pub use decryption::{
	DecryptionDispatcher, DecryptionKey, DecryptionRoute, EncryptedMetadata, NoteDecryptor,
	NotePlaintext,
};
pub use events::{OrderedEvent, order_events};
pub use tracker::{Backfill, SyncStateTracker, TrackerSettings};
pub use types::*;
pub use watcher::{Watcher, WatcherParts, WatcherSettings};
