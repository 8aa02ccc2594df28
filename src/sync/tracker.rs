//! Sync cursor tracking for the ledger.
//!
//! The `SyncStateTracker` owns the persisted `last_synced_block` checkpoint and the
//! in-memory progress cursor, and runs the chunked historical backfill against the log
//! source.
//!
//! The checkpoint only ever moves forward. A backfill walk never writes it: the caller
//! commits [`Backfill::target_block`] once the collected events have been applied, so a
//! failure anywhere before that leaves the previous checkpoint in place and the next
//! attempt refetches from there.

use super::types::{SyncError, SyncStatus};
use crate::indexer::{ChainEvent, EventName, LogSource, MAX_LOG_RANGE};
use crate::ledger::store::{decode, encode};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

const LAST_SYNCED_KEY: &[u8] = b"last_synced_block";

/// Backfill tuning.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
	/// Contract whose logs are fetched.
	pub contract: String,
	/// Blocks per log query, capped at [`MAX_LOG_RANGE`].
	pub chunk_size: u64,
	/// Pause between consecutive log queries.
	pub request_delay: Duration,
	/// Checkpoint used when none is stored; the chain head otherwise.
	pub default_start_block: Option<u64>,
}

impl TrackerSettings {
	pub fn new(contract: impl Into<String>) -> Self {
		Self {
			contract: contract.into(),
			chunk_size: MAX_LOG_RANGE,
			request_delay: Duration::from_millis(250),
			default_start_block: None,
		}
	}
}

/// Persisted checkpoint entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncCheckpoint {
	block: u64,
	/// Unix timestamp of the last write.
	updated_at: i64,
}

/// Events collected by one backfill walk, up to and including `target_block`.
#[derive(Debug, Default)]
pub struct Backfill {
	pub events: Vec<ChainEvent>,
	pub target_block: u64,
}

pub struct SyncStateTracker {
	tree: sled::Tree,
	source: Arc<dyn LogSource>,
	settings: TrackerSettings,
	/// Highest block applied in this process; progress reporting only.
	processed_block: AtomicU64,
	/// Checkpoint the most recent walk started from.
	anchor_block: AtomicU64,
}

impl SyncStateTracker {
	pub fn new(tree: sled::Tree, source: Arc<dyn LogSource>, settings: TrackerSettings) -> Self {
		Self {
			tree,
			source,
			settings,
			processed_block: AtomicU64::new(0),
			anchor_block: AtomicU64::new(0),
		}
	}

	fn load_checkpoint(&self) -> Result<Option<SyncCheckpoint>, SyncError> {
		match self.tree.get(LAST_SYNCED_KEY).map_err(crate::ledger::LedgerError::from)? {
			Some(bytes) => Ok(Some(decode(&bytes)?)),
			None => Ok(None),
		}
	}

	fn store_checkpoint(&self, block: u64) -> Result<(), SyncError> {
		let checkpoint = SyncCheckpoint {
			block,
			updated_at: chrono::Utc::now().timestamp(),
		};
		self.tree
			.insert(LAST_SYNCED_KEY, encode(&checkpoint)?)
			.map_err(crate::ledger::LedgerError::from)?;
		Ok(())
	}

	/// The persisted checkpoint, initialized on first use to the configured default block
	/// or the current chain head.
	pub async fn get_last_synced_block(&self) -> Result<u64, SyncError> {
		if let Some(checkpoint) = self.load_checkpoint()? {
			return Ok(checkpoint.block);
		}
		let initial = match self.settings.default_start_block {
			Some(block) => block,
			None => self.source.block_number().await?,
		};
		info!("Initializing sync checkpoint at block {}", initial);
		self.store_checkpoint(initial)?;
		Ok(initial)
	}

	/// Advance the checkpoint to `block`. Lower values are ignored.
	pub fn set_last_synced_block(&self, block: u64) -> Result<(), SyncError> {
		if let Some(current) = self.load_checkpoint()? {
			if current.block >= block {
				return Ok(());
			}
		}
		self.store_checkpoint(block)
	}

	pub fn processed_block(&self) -> u64 {
		self.processed_block.load(Ordering::Relaxed)
	}

	pub fn record_processed(&self, block: u64) {
		self.processed_block.fetch_max(block, Ordering::Relaxed);
	}

	pub fn anchor_block(&self) -> u64 {
		self.anchor_block.load(Ordering::Relaxed)
	}

	pub fn status(&self) -> SyncStatus {
		SyncStatus {
			anchor_block: self.anchor_block(),
			current_block: self.processed_block(),
		}
	}

	/// Fetch every created/removed event between the checkpoint and `current`.
	///
	/// Windows are `chunk_size` blocks wide and each window issues one query per event
	/// kind, separated by the configured delay. The collected events are returned
	/// unfiltered and the checkpoint is left untouched; pass the result to
	/// [`commit_backfill`](Self::commit_backfill) after applying it.
	pub async fn run_onchain_sync(&self, current: u64) -> Result<Backfill, SyncError> {
		let last_synced = self.get_last_synced_block().await?;
		self.anchor_block.store(last_synced, Ordering::Relaxed);

		if last_synced >= current {
			debug!(
				"Checkpoint {} already at or past block {}, nothing to backfill",
				last_synced, current
			);
			self.record_processed(last_synced);
			return Ok(Backfill {
				events: Vec::new(),
				target_block: last_synced,
			});
		}

		let chunk = self.settings.chunk_size.clamp(1, MAX_LOG_RANGE);
		info!(
			"Backfilling blocks {}..={} in windows of {}",
			last_synced + 1,
			current,
			chunk
		);

		let mut events = Vec::new();
		let mut first_request = true;
		let mut from = last_synced + 1;
		while from <= current {
			let to = from.saturating_add(chunk - 1).min(current);
			for event_name in EventName::ALL {
				if !first_request && !self.settings.request_delay.is_zero() {
					tokio::time::sleep(self.settings.request_delay).await;
				}
				first_request = false;
				let logs = self
					.source
					.query_logs(&self.settings.contract, from, to, event_name)
					.await?;
				debug!(
					"Fetched {} {} events in blocks {}..={}",
					logs.len(),
					event_name,
					from,
					to
				);
				events.extend(logs);
			}
			self.record_processed(to);
			if to == u64::MAX {
				break;
			}
			from = to + 1;
		}

		info!(
			"Backfill to block {} fetched: {} events collected",
			current,
			events.len()
		);
		Ok(Backfill {
			events,
			target_block: current,
		})
	}

	/// Persist the target of an applied backfill as the new checkpoint.
	pub fn commit_backfill(&self, backfill: &Backfill) -> Result<(), SyncError> {
		self.set_last_synced_block(backfill.target_block)
	}

	/// Forget the checkpoint and the in-memory cursors.
	pub fn clear(&self) -> Result<(), SyncError> {
		self.tree.clear().map_err(crate::ledger::LedgerError::from)?;
		self.processed_block.store(0, Ordering::Relaxed);
		self.anchor_block.store(0, Ordering::Relaxed);
		Ok(())
	}
}
