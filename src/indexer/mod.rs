//! Log source integration for the commitment pool contract
//!
//! This module provides the [`LogSource`] abstraction the sync engine reads chain events
//! through, and the GraphQL indexer client that implements it. Historical queries are
//! windowed to at most [`MAX_LOG_RANGE`] blocks per call.

/// GraphQL client for the commitment event indexer
mod client;
/// Type definitions for indexer data structures
mod types;

pub use client::IndexerClient;
pub use types::*;

use futures::stream::BoxStream;

/// Live commitment events, in arrival order.
pub type EventStream = BoxStream<'static, Result<ChainEvent, IndexerError>>;

/// Read access to commitment pool events.
#[async_trait::async_trait]
pub trait LogSource: Send + Sync {
	/// Current chain head.
	async fn block_number(&self) -> Result<u64, IndexerError>;

	/// Events of one kind emitted by `contract` in `from_block..=to_block`.
	async fn query_logs(
		&self,
		contract: &str,
		from_block: u64,
		to_block: u64,
		event_name: EventName,
	) -> Result<Vec<ChainEvent>, IndexerError>;

	/// Stream of live events matching `filter`.
	async fn subscribe(&self, filter: &EventFilter) -> Result<EventStream, IndexerError>;
}
