//! Event normalization for ledger synchronization.
//!
//! Raw chain events arrive from three places (the live subscription, the delegate's own
//! index and the chunked backfill) in no particular order and with optional position
//! fields. Before anything touches the stores, a batch is filtered down to the events of
//! this ledger's owner and token that carry a complete chain position, then sorted by
//! chain order.

use crate::indexer::{ChainEvent, EventName};
use crate::ledger::H256;

/// A chain event with a validated position, ready to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedEvent {
	pub event_name: EventName,
	pub owner: String,
	pub token: String,
	pub poseidon_hash: H256,
	pub metadata: Option<String>,
	pub block_number: u64,
	pub transaction_index: u32,
	pub transaction_hash: Option<H256>,
}

impl OrderedEvent {
	/// Accept `event` if it belongs to `owner`/`token` and has a block number and
	/// transaction index. Addresses compare case-insensitively.
	pub fn from_chain(event: ChainEvent, owner: &str, token: &str) -> Option<Self> {
		if !event.owner.eq_ignore_ascii_case(owner) || !event.token.eq_ignore_ascii_case(token) {
			return None;
		}
		let block_number = event.block_number?;
		let transaction_index = event.transaction_index?;
		Some(Self {
			event_name: event.event_name,
			owner: event.owner,
			token: event.token,
			poseidon_hash: event.poseidon_hash,
			metadata: event.metadata,
			block_number,
			transaction_index,
			transaction_hash: event.transaction_hash,
		})
	}

	pub fn position(&self) -> (u64, u32) {
		(self.block_number, self.transaction_index)
	}
}

/// Filter a drained batch and sort it by `(block, transaction index)`.
///
/// The sort is stable, so events sharing a position keep their arrival order.
pub fn order_events(events: Vec<ChainEvent>, owner: &str, token: &str) -> Vec<OrderedEvent> {
	let total = events.len();
	let mut ordered: Vec<OrderedEvent> = events
		.into_iter()
		.filter_map(|event| OrderedEvent::from_chain(event, owner, token))
		.collect();
	if ordered.len() < total {
		tracing::debug!(
			"Dropped {} of {} events for foreign owner/token or missing position",
			total - ordered.len(),
			total
		);
	}
	ordered.sort_by_key(OrderedEvent::position);
	ordered
}
