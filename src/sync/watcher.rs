//! Ledger watcher and integration point for all sync services.
//!
//! The `Watcher` ties the stores, the sync tracker, the decryption dispatcher and the
//! scheduler together. It moves through `Idle -> Backfilling -> Live`:
//!
//! - `start` subscribes to live events (buffered in memory), pulls the delegate's index
//!   and the chunked on-chain backfill, then flushes everything once before returning
//! - while live, buffered events are flushed after an idle gap or a max-wait ceiling
//! - every mutation (start, flush, reset) runs under one scheduler key, so they never
//!   interleave
//!
//! Reads (balance, history pages, selection) go straight to the stores and may observe a
//! batch that is still being applied.

use super::decryption::{DecryptionDispatcher, EncryptedMetadata};
use super::events::{OrderedEvent, order_events};
use super::tracker::SyncStateTracker;
use super::types::{BatchSummary, SyncError, SyncStatus, WatcherState};
use crate::delegate::DecryptionDelegate;
use crate::indexer::{ChainEvent, EventFilter, EventName, EventStream, LogSource};
use crate::ledger::{
	Commitment, CommitmentStore, HistoryPage, HistoryRecord, HistoryStatus, HistoryStore,
	Selection, WindowMode, find_commitments,
};
use crate::scheduler::{ScheduleOptions, Scheduler};
use crate::transaction::{SpendPlan, SpendPlanBuilder, TransactionError};

use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Identity and timing of one watcher.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
	pub owner: String,
	pub token: String,
	pub contract: String,
	/// Idle gap after the last live event before a flush.
	pub debounce: Duration,
	/// Longest a buffered event waits while events keep arriving.
	pub max_wait: Duration,
	/// Caller-side timeout for scheduled tasks.
	pub task_timeout: Option<Duration>,
	pub window_mode: WindowMode,
}

impl WatcherSettings {
	pub fn new(owner: impl Into<String>, token: impl Into<String>, contract: impl Into<String>) -> Self {
		Self {
			owner: owner.into(),
			token: token.into(),
			contract: contract.into(),
			debounce: Duration::from_secs(1),
			max_wait: Duration::from_secs(5),
			task_timeout: None,
			window_mode: WindowMode::default(),
		}
	}
}

/// Everything a watcher is built from.
pub struct WatcherParts {
	pub scheduler: Arc<Scheduler>,
	pub source: Arc<dyn LogSource>,
	pub delegate: Option<Arc<dyn DecryptionDelegate>>,
	pub decryptors: DecryptionDispatcher,
	pub commitments: CommitmentStore,
	pub history: HistoryStore,
	pub tracker: SyncStateTracker,
}

enum CreatedOutcome {
	Applied,
	Duplicate,
	Skipped,
}

struct WatcherInner {
	key: String,
	settings: WatcherSettings,
	scheduler: Arc<Scheduler>,
	source: Arc<dyn LogSource>,
	delegate: Option<Arc<dyn DecryptionDelegate>>,
	decryptors: DecryptionDispatcher,
	commitments: CommitmentStore,
	history: HistoryStore,
	tracker: SyncStateTracker,
	state: Mutex<WatcherState>,
	/// Live events waiting for the next flush.
	cache: Mutex<Vec<ChainEvent>>,
	/// Signalled whenever the cache gains events.
	wake: Notify,
	/// Subscription and debounce tasks of the current session.
	tasks: Mutex<Vec<JoinHandle<()>>>,
	/// Bumped by every reset; a start that began under an older epoch must not go live.
	epoch: AtomicU64,
	balance: watch::Sender<u128>,
}

/// Event batch processor for one owner/token ledger.
pub struct Watcher {
	inner: Arc<WatcherInner>,
}

impl Watcher {
	pub fn new(parts: WatcherParts, settings: WatcherSettings) -> Result<Self, SyncError> {
		let initial_balance = parts.commitments.total_value()?;
		let (balance, _) = watch::channel(initial_balance);
		let key = format!("ledger:{}:{}", settings.owner.to_lowercase(), settings.token.to_lowercase());

		Ok(Self {
			inner: Arc::new(WatcherInner {
				key,
				settings,
				scheduler: parts.scheduler,
				source: parts.source,
				delegate: parts.delegate,
				decryptors: parts.decryptors,
				commitments: parts.commitments,
				history: parts.history,
				tracker: parts.tracker,
				state: Mutex::new(WatcherState::Idle),
				cache: Mutex::new(Vec::new()),
				wake: Notify::new(),
				tasks: Mutex::new(Vec::new()),
				epoch: AtomicU64::new(0),
				balance,
			}),
		})
	}

	pub fn state(&self) -> WatcherState {
		*self.inner.state.lock()
	}

	/// Scheduler key all of this watcher's mutations run under.
	pub fn key(&self) -> &str {
		&self.inner.key
	}

	fn options(&self, label: &str) -> ScheduleOptions {
		ScheduleOptions::default()
			.with_correlation_id(format!("{}:{}", self.inner.key, label))
			.with_timeout(self.inner.settings.task_timeout)
			.forward_error()
	}

	/// Backfill and go live. No-op unless the watcher is idle.
	pub async fn start(&self) -> Result<(), SyncError> {
		let epoch = {
			let mut state = self.inner.state.lock();
			if *state != WatcherState::Idle {
				debug!("Watcher {} already {:?}, ignoring start", self.inner.key, *state);
				return Ok(());
			}
			*state = WatcherState::Backfilling;
			self.inner.epoch.load(Ordering::SeqCst)
		};

		let inner = self.inner.clone();
		let task = async move { inner.run_start(epoch).await };
		let result = self
			.inner
			.scheduler
			.schedule(&self.inner.key, task, self.options("start"))
			.await;
		if let Err(e) = result {
			// A panicked or timed out start never reached its own cleanup
			if self.inner.is_current(epoch) {
				warn!("Watcher {} start abandoned: {}", self.inner.key, e);
				self.inner.stop_session();
			}
			return Err(e.into());
		}
		Ok(())
	}

	/// Process all buffered events now, persisting the checkpoint after each one.
	pub async fn flush(&self) -> Result<BatchSummary, SyncError> {
		let inner = self.inner.clone();
		let task = async move { inner.flush_cached(true).await };
		Ok(self
			.inner
			.scheduler
			.schedule(&self.inner.key, task, self.options("flush"))
			.await?)
	}

	/// Apply `events` directly as one batch.
	///
	/// With `update_block_number`, the checkpoint advances to each event's block as it is
	/// applied.
	pub async fn process_events(
		&self,
		events: Vec<ChainEvent>,
		update_block_number: bool,
	) -> Result<BatchSummary, SyncError> {
		let inner = self.inner.clone();
		let task = async move {
			let ordered = order_events(events, &inner.settings.owner, &inner.settings.token);
			inner.process_batch(ordered, update_block_number).await
		};
		Ok(self
			.inner
			.scheduler
			.schedule(&self.inner.key, task, self.options("process"))
			.await?)
	}

	/// Stop live tasks and drop buffered events. Stored state is kept.
	///
	/// Scheduled work that is already queued still runs to completion.
	pub fn soft_reset(&self) {
		self.inner.stop_session();
		info!("Watcher {} soft reset", self.inner.key);
	}

	/// Soft reset, then wipe commitments, history and the sync checkpoint.
	pub async fn reset(&self) -> Result<(), SyncError> {
		self.inner.stop_session();
		let inner = self.inner.clone();
		let task = async move {
			inner.commitments.clear()?;
			inner.history.clear()?;
			inner.tracker.clear()?;
			inner.balance.send_replace(0);
			info!("Ledger {} wiped", inner.key);
			Ok::<(), SyncError>(())
		};
		self.inner
			.scheduler
			.schedule(&self.inner.key, task, self.options("reset"))
			.await?;
		Ok(())
	}

	/// Sum of all spendable commitment values.
	pub fn get_balance(&self) -> Result<u128, SyncError> {
		Ok(self.inner.commitments.total_value()?)
	}

	/// Latest balance, updated after every batch and reset.
	pub fn subscribe_balance(&self) -> watch::Receiver<u128> {
		self.inner.balance.subscribe()
	}

	/// A page of history grouped by transaction, newest first. `limit` counts groups.
	pub fn get_paginated_transactions(
		&self,
		limit: usize,
		cursor: Option<&str>,
		hide_decoys: bool,
	) -> Result<HistoryPage, SyncError> {
		Ok(self.inner.history.paginate(cursor, limit, hide_decoys)?)
	}

	/// Every history record, newest first.
	pub fn all_history(&self) -> Result<Vec<HistoryRecord>, SyncError> {
		Ok(self.inner.history.all()?)
	}

	pub fn commitments(&self) -> Result<Vec<Commitment>, SyncError> {
		Ok(self.inner.commitments.all()?)
	}

	pub fn sync_status(&self) -> SyncStatus {
		self.inner.tracker.status()
	}

	pub async fn last_synced_block(&self) -> Result<u64, SyncError> {
		self.inner.tracker.get_last_synced_block().await
	}

	/// Inputs covering `target`; empty if no selection window does.
	pub fn find_commitments(&self, target: u128) -> Result<Selection, SyncError> {
		let commitments = self.inner.commitments.all()?;
		Ok(find_commitments(commitments, target, self.inner.settings.window_mode))
	}

	/// Select inputs for sending `amount` to `recipient`.
	pub fn prepare_spend(&self, amount: u128, recipient: &str) -> Result<SpendPlan, TransactionError> {
		let commitments = self
			.inner
			.commitments
			.all()
			.map_err(|e| TransactionError::UnexpectedError(e.to_string()))?;
		SpendPlanBuilder::new()
			.with_commitments(commitments)
			.with_amount(amount)
			.with_recipient(recipient)
			.with_window_mode(self.inner.settings.window_mode)
			.build()
	}
}

impl Drop for Watcher {
	fn drop(&mut self) {
		for task in self.inner.tasks.lock().drain(..) {
			task.abort();
		}
	}
}

impl WatcherInner {
	fn filter(&self) -> EventFilter {
		EventFilter {
			contract: self.settings.contract.clone(),
			owner: self.settings.owner.clone(),
			token: self.settings.token.clone(),
		}
	}

	fn stop_session(&self) {
		self.epoch.fetch_add(1, Ordering::SeqCst);
		for task in self.tasks.lock().drain(..) {
			task.abort();
		}
		let dropped = std::mem::take(&mut *self.cache.lock()).len();
		if dropped > 0 {
			debug!("Dropped {} buffered events", dropped);
		}
		*self.state.lock() = WatcherState::Idle;
	}

	fn is_current(&self, epoch: u64) -> bool {
		self.epoch.load(Ordering::SeqCst) == epoch
	}

	async fn run_start(self: Arc<Self>, epoch: u64) -> Result<(), SyncError> {
		match self.clone().backfill_and_go_live(epoch).await {
			Ok(()) => Ok(()),
			Err(e) => {
				error!("Watcher {} failed to start: {}", self.key, e);
				if self.is_current(epoch) {
					self.stop_session();
				}
				Err(e)
			}
		}
	}

	async fn backfill_and_go_live(self: Arc<Self>, epoch: u64) -> Result<(), SyncError> {
		info!("Starting watcher {}", self.key);

		let stream = self.source.subscribe(&self.filter()).await?;
		if !self.is_current(epoch) {
			debug!("Watcher {} reset during start", self.key);
			return Ok(());
		}
		self.spawn_session_tasks(stream);

		let last_synced = self.tracker.get_last_synced_block().await?;
		let mut backlog = Vec::new();
		if let Some(delegate) = &self.delegate {
			match delegate
				.events_since(last_synced.saturating_add(1), &self.settings.owner, &self.settings.token)
				.await
			{
				Ok(events) => {
					debug!("Delegate {} supplied {} events", delegate.url(), events.len());
					backlog.extend(events);
				}
				Err(e) => warn!("Delegate {} index unavailable: {}", delegate.url(), e),
			}
		}

		let current = self.source.block_number().await?;
		let mut backfill = self.tracker.run_onchain_sync(current).await?;

		if !self.is_current(epoch) {
			// Nothing was applied, so the checkpoint stays where it was
			debug!("Watcher {} reset during backfill", self.key);
			return Ok(());
		}
		backlog.append(&mut backfill.events);
		self.cache.lock().extend(backlog);
		let summary = self.flush_cached(false).await?;
		self.tracker.commit_backfill(&backfill)?;

		if self.is_current(epoch) {
			*self.state.lock() = WatcherState::Live;
		}
		info!(
			"Watcher {} live at block {}: {} created, {} removed, {} skipped",
			self.key, backfill.target_block, summary.created, summary.removed, summary.skipped
		);
		Ok(())
	}

	fn spawn_session_tasks(self: &Arc<Self>, mut stream: EventStream) {
		let receiver = self.clone();
		let subscription = tokio::spawn(async move {
			while let Some(item) = stream.next().await {
				match item {
					Ok(event) => {
						receiver.cache.lock().push(event);
						receiver.wake.notify_one();
					}
					Err(e) => warn!("Live event stream error: {}", e),
				}
			}
			info!("Live event stream for {} ended", receiver.key);
		});

		let debouncer = tokio::spawn(self.clone().debounce_loop());

		let mut tasks = self.tasks.lock();
		tasks.push(subscription);
		tasks.push(debouncer);
	}

	/// Wait for buffered events, let them settle, then schedule a flush.
	async fn debounce_loop(self: Arc<Self>) {
		loop {
			self.wake.notified().await;
			let ceiling = Instant::now() + self.settings.max_wait;
			loop {
				let deadline = (Instant::now() + self.settings.debounce).min(ceiling);
				tokio::select! {
					_ = self.wake.notified() => {
						if Instant::now() >= ceiling {
							break;
						}
					}
					_ = tokio::time::sleep_until(deadline) => break,
				}
			}

			let inner = self.clone();
			let options = ScheduleOptions::default()
				.with_correlation_id(format!("{}:debounced-flush", self.key))
				.with_timeout(self.settings.task_timeout);
			let task = async move { inner.flush_cached(true).await };
			if let Err(e) = self.scheduler.schedule(&self.key, task, options).await {
				warn!("Debounced flush for {} failed: {}", self.key, e);
			}
		}
	}

	/// Drain the cache once and apply what it held.
	async fn flush_cached(&self, update_block_number: bool) -> Result<BatchSummary, SyncError> {
		let drained = std::mem::take(&mut *self.cache.lock());
		if drained.is_empty() {
			return Ok(BatchSummary::default());
		}
		let events = order_events(drained, &self.settings.owner, &self.settings.token);
		self.process_batch(events, update_block_number).await
	}

	async fn process_batch(
		&self,
		events: Vec<OrderedEvent>,
		update_block_number: bool,
	) -> Result<BatchSummary, SyncError> {
		let mut summary = BatchSummary::default();
		for event in events {
			match event.event_name {
				EventName::CommitmentCreated => match self.apply_created(&event).await? {
					CreatedOutcome::Applied => summary.created += 1,
					CreatedOutcome::Duplicate => summary.duplicates += 1,
					CreatedOutcome::Skipped => summary.skipped += 1,
				},
				EventName::CommitmentRemoved => {
					if self.apply_removed(&event)? {
						summary.removed += 1;
					} else {
						summary.duplicates += 1;
					}
				}
			}
			if update_block_number {
				self.tracker.set_last_synced_block(event.block_number)?;
			}
			self.tracker.record_processed(event.block_number);
		}

		let balance = self.commitments.total_value()?;
		self.balance.send_replace(balance);
		debug!("Batch applied: {:?}, balance {}", summary, balance);
		Ok(summary)
	}

	async fn apply_created(&self, event: &OrderedEvent) -> Result<CreatedOutcome, SyncError> {
		let hash = event.poseidon_hash;
		if self.history.contains(&HistoryRecord::id_for(&hash, HistoryStatus::Added))? {
			debug!("Commitment {} already recorded", hash);
			return Ok(CreatedOutcome::Duplicate);
		}

		let metadata = match event.metadata.as_deref().map(EncryptedMetadata::decode) {
			Some(Ok(metadata)) => metadata,
			Some(Err(e)) => {
				warn!("Skipping commitment {} at block {}: {}", hash, event.block_number, e);
				return Ok(CreatedOutcome::Skipped);
			}
			None => {
				warn!("Skipping commitment {} at block {}: no metadata", hash, event.block_number);
				return Ok(CreatedOutcome::Skipped);
			}
		};

		let note = match self.decryptors.decrypt(event, &metadata).await {
			Ok(note) => note,
			Err(e) => {
				warn!(
					"Skipping commitment {} at block {}: {}",
					hash, event.block_number, e
				);
				return Ok(CreatedOutcome::Skipped);
			}
		};

		let commitment = Commitment {
			hash,
			value: note.amount,
			blinding: note.blinding,
		};
		if self.history.contains(&HistoryRecord::id_for(&hash, HistoryStatus::Spent))? {
			debug!("Commitment {} already spent, not restoring it", hash);
		} else {
			self.commitments.save(&commitment)?;
		}
		self.history.add(HistoryRecord::new(
			HistoryStatus::Added,
			commitment,
			event.transaction_hash,
			event.block_number,
			event.transaction_index,
			metadata.message,
		))?;
		debug!("Added commitment {} worth {}", hash, note.amount);
		Ok(CreatedOutcome::Applied)
	}

	/// Returns whether a commitment was actually removed.
	fn apply_removed(&self, event: &OrderedEvent) -> Result<bool, SyncError> {
		let Some(spent) = self.commitments.delete(&event.poseidon_hash)? else {
			debug!("Commitment {} already absent", event.poseidon_hash);
			return Ok(false);
		};
		debug!("Spent commitment {} worth {}", spent.hash, spent.value);
		self.history.add(HistoryRecord::new(
			HistoryStatus::Spent,
			spent,
			event.transaction_hash,
			event.block_number,
			event.transaction_index,
			None,
		))?;
		Ok(true)
	}
}
