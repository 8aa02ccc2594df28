//! Decryption delegate integration
//!
//! Delegates are remote services that open encrypted commitment notes for an account and
//! index the account's events. The ledger talks to its own delegate and, when an event's
//! metadata names another delegate, to a short-lived client for that one.

/// HTTP delegate client and connector
mod client;
/// Delegate request/response types
mod types;

pub use client::{DelegateClient, HttpDelegateConnector};
pub use types::{DecryptRequest, DecryptedNote, DelegateError};

use crate::indexer::ChainEvent;
use std::sync::Arc;

/// Remote decryption oracle.
#[async_trait::async_trait]
pub trait DecryptionDelegate: Send + Sync {
	/// Service URL this delegate is reached at.
	fn url(&self) -> &str;

	async fn decrypt(&self, request: &DecryptRequest) -> Result<DecryptedNote, DelegateError>;

	/// Events for `owner`/`token` the delegate has indexed from `from_block` onwards.
	async fn events_since(
		&self,
		from_block: u64,
		owner: &str,
		token: &str,
	) -> Result<Vec<ChainEvent>, DelegateError>;
}

/// Creates delegate clients for arbitrary service URLs.
pub trait DelegateConnector: Send + Sync {
	fn connect(&self, url: &str) -> Result<Arc<dyn DecryptionDelegate>, DelegateError>;
}
