//! Sled-backed key-value store shared by the ledger components.
//!
//! Every component gets its own tree (namespace) inside one database, so a full ledger
//! reset can clear each namespace independently while atomic multi-key writes stay
//! inside a single tree.

use crate::ledger::types::LedgerError;

use serde::{Serialize, de::DeserializeOwned};
use std::path::Path;
use tracing::debug;

const COMMITMENTS_TREE: &str = "commitments";
const HISTORY_TREE: &str = "history";
const SYNC_STATE_TREE: &str = "sync_state";

/// Handle on the ledger database and its namespaces.
#[derive(Debug, Clone)]
pub struct LedgerDb {
	db: sled::Db,
	commitments: sled::Tree,
	history: sled::Tree,
	sync_state: sled::Tree,
}

impl LedgerDb {
	/// Open or create the ledger database at the given path.
	pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
		let db = sled::open(path.as_ref())?;
		debug!("Opened ledger database at {:?}", path.as_ref());
		Self::from_db(db)
	}

	/// Open a throwaway database that lives only as long as the handle.
	pub fn temporary() -> Result<Self, LedgerError> {
		let db = sled::Config::new().temporary(true).open()?;
		Self::from_db(db)
	}

	fn from_db(db: sled::Db) -> Result<Self, LedgerError> {
		let commitments = db.open_tree(COMMITMENTS_TREE)?;
		let history = db.open_tree(HISTORY_TREE)?;
		let sync_state = db.open_tree(SYNC_STATE_TREE)?;
		Ok(Self {
			db,
			commitments,
			history,
			sync_state,
		})
	}

	pub fn commitments_tree(&self) -> sled::Tree {
		self.commitments.clone()
	}

	pub fn history_tree(&self) -> sled::Tree {
		self.history.clone()
	}

	pub fn sync_state_tree(&self) -> sled::Tree {
		self.sync_state.clone()
	}

	/// Flush all pending writes to disk
	pub async fn flush(&self) -> Result<(), LedgerError> {
		self.db.flush_async().await?;
		Ok(())
	}
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LedgerError> {
	Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LedgerError> {
	Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn reopening_keeps_namespaces_separate() {
		let dir = tempfile::tempdir().unwrap();
		{
			let db = LedgerDb::open(dir.path()).unwrap();
			db.commitments_tree().insert(b"k", b"commitment".to_vec()).unwrap();
			db.sync_state_tree().insert(b"k", b"sync".to_vec()).unwrap();
			db.flush().await.unwrap();
		}
		let db = LedgerDb::open(dir.path()).unwrap();
		assert_eq!(
			db.commitments_tree().get(b"k").unwrap().as_deref(),
			Some(&b"commitment"[..])
		);
		assert_eq!(
			db.sync_state_tree().get(b"k").unwrap().as_deref(),
			Some(&b"sync"[..])
		);
		assert!(db.history_tree().get(b"k").unwrap().is_none());
	}
}
