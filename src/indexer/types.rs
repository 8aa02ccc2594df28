//! Types for the commitment event indexer

use crate::ledger::H256;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest block window a single log query may cover.
pub const MAX_LOG_RANGE: u64 = 500;

/// Commitment pool events this ledger consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
	CommitmentCreated,
	CommitmentRemoved,
}

impl EventName {
	pub const ALL: [EventName; 2] = [EventName::CommitmentCreated, EventName::CommitmentRemoved];

	pub fn as_str(&self) -> &'static str {
		match self {
			EventName::CommitmentCreated => "CommitmentCreated",
			EventName::CommitmentRemoved => "CommitmentRemoved",
		}
	}
}

impl fmt::Display for EventName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A raw commitment event as delivered by the indexer.
///
/// Position fields are optional on the wire: entries missing them are dropped by the
/// event processor rather than failing deserialization of a whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEvent {
	pub event_name: EventName,
	pub owner: String,
	pub token: String,
	pub poseidon_hash: H256,
	/// Hex-encoded encrypted note metadata (created events only).
	#[serde(default)]
	pub metadata: Option<String>,
	#[serde(default)]
	pub block_number: Option<u64>,
	#[serde(default)]
	pub transaction_index: Option<u32>,
	#[serde(default)]
	pub transaction_hash: Option<H256>,
}

/// Filter for the live event subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
	pub contract: String,
	pub owner: String,
	pub token: String,
}

/// Error types for indexer queries and subscriptions
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
	#[error("GraphQL error: {0}")]
	GraphQLError(String),

	#[error("No data returned")]
	NoData,

	#[error("Block range {from}..={to} exceeds {max} blocks")]
	RangeTooLarge { from: u64, to: u64, max: u64 },

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Subscription error: {0}")]
	SubscriptionError(String),
}
