use crate::delegate::DelegateError;
use crate::indexer::IndexerError;
use crate::ledger::LedgerError;
use crate::scheduler::SchedulerError;

use serde::{Deserialize, Serialize};

/// Lifecycle of the event watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherState {
	Idle,
	Backfilling,
	Live,
}

/// Progress snapshot: the checkpoint the latest walk started from and the highest block
/// processed since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
	pub anchor_block: u64,
	pub current_block: u64,
}

/// Outcome counters of one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
	pub created: usize,
	pub removed: usize,
	pub duplicates: usize,
	pub skipped: usize,
}

/// Error types for ledger synchronization
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Indexer error: {0}")]
	IndexerError(#[from] IndexerError),

	#[error("Delegate error: {0}")]
	DelegateError(#[from] DelegateError),

	#[error("Ledger error: {0}")]
	LedgerError(#[from] LedgerError),

	#[error("Metadata error: {0}")]
	MetadataError(String),

	#[error("Decryption error: {0}")]
	DecryptionError(String),

	#[error("Scheduled task timed out: {0}")]
	Timeout(String),

	#[error("Scheduled task aborted: {0}")]
	TaskAborted(String),
}

impl SyncError {
	pub fn is_timeout(&self) -> bool {
		matches!(self, SyncError::Timeout(_))
	}
}

impl From<SchedulerError<SyncError>> for SyncError {
	fn from(err: SchedulerError<SyncError>) -> Self {
		match err {
			SchedulerError::Failed(e) => e,
			timeout @ SchedulerError::Timeout { .. } => SyncError::Timeout(timeout.to_string()),
			panicked @ SchedulerError::Panicked { .. } => SyncError::TaskAborted(panicked.to_string()),
		}
	}
}
