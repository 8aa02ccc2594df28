use crate::ledger::store::{decode, encode};
use crate::ledger::types::{Commitment, H256, LedgerError};

use tracing::debug;

/// CRUD over the set of currently spendable commitments, keyed by commitment hash.
///
/// All writes are idempotent: saving the same commitment twice leaves one entry, and
/// deleting an absent hash is a no-op reported as `None`.
#[derive(Debug, Clone)]
pub struct CommitmentStore {
	tree: sled::Tree,
}

impl CommitmentStore {
	pub fn new(tree: sled::Tree) -> Self {
		Self { tree }
	}

	pub fn get(&self, hash: &H256) -> Result<Option<Commitment>, LedgerError> {
		self.tree
			.get(hash.as_bytes())?
			.map(|bytes| decode(&bytes))
			.transpose()
	}

	/// Look up several hashes; absent ones are skipped.
	pub fn get_many(&self, hashes: &[H256]) -> Result<Vec<Commitment>, LedgerError> {
		let mut found = Vec::with_capacity(hashes.len());
		for hash in hashes {
			if let Some(commitment) = self.get(hash)? {
				found.push(commitment);
			}
		}
		Ok(found)
	}

	pub fn save(&self, commitment: &Commitment) -> Result<(), LedgerError> {
		self.tree
			.insert(commitment.hash.as_bytes(), encode(commitment)?)?;
		debug!("Saved commitment {}", commitment.hash);
		Ok(())
	}

	pub fn save_many(&self, commitments: &[Commitment]) -> Result<(), LedgerError> {
		let mut batch = sled::Batch::default();
		for commitment in commitments {
			batch.insert(&commitment.hash.as_bytes()[..], encode(commitment)?);
		}
		self.tree.apply_batch(batch)?;
		Ok(())
	}

	/// Remove a commitment, returning its last stored value if it was present.
	pub fn delete(&self, hash: &H256) -> Result<Option<Commitment>, LedgerError> {
		let removed = self
			.tree
			.remove(hash.as_bytes())?
			.map(|bytes| decode(&bytes))
			.transpose()?;
		if removed.is_none() {
			debug!("Commitment {} not found for removal", hash);
		}
		Ok(removed)
	}

	pub fn delete_many(&self, hashes: &[H256]) -> Result<Vec<Commitment>, LedgerError> {
		let mut removed = Vec::new();
		for hash in hashes {
			if let Some(commitment) = self.delete(hash)? {
				removed.push(commitment);
			}
		}
		Ok(removed)
	}

	pub fn all(&self) -> Result<Vec<Commitment>, LedgerError> {
		self.tree
			.iter()
			.map(|entry| {
				let (_, bytes) = entry?;
				decode(&bytes)
			})
			.collect()
	}

	/// Sum of all stored commitment values.
	pub fn total_value(&self) -> Result<u128, LedgerError> {
		Ok(self
			.all()?
			.iter()
			.fold(0u128, |acc, c| acc.saturating_add(c.value)))
	}

	pub fn clear(&self) -> Result<(), LedgerError> {
		self.tree.clear()?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::store::LedgerDb;

	fn commitment(byte: u8, value: u128) -> Commitment {
		Commitment {
			hash: H256([byte; 32]),
			value,
			blinding: H256([byte.wrapping_add(1); 32]),
		}
	}

	fn store() -> CommitmentStore {
		CommitmentStore::new(LedgerDb::temporary().unwrap().commitments_tree())
	}

	#[test]
	fn save_is_idempotent() {
		let store = store();
		store.save(&commitment(1, 10)).unwrap();
		store.save(&commitment(1, 10)).unwrap();
		assert_eq!(store.all().unwrap().len(), 1);
		assert_eq!(store.get(&H256([1; 32])).unwrap(), Some(commitment(1, 10)));
	}

	#[test]
	fn delete_of_missing_hash_is_not_an_error() {
		let store = store();
		store.save(&commitment(1, 10)).unwrap();
		assert_eq!(store.delete(&H256([1; 32])).unwrap(), Some(commitment(1, 10)));
		assert_eq!(store.delete(&H256([1; 32])).unwrap(), None);
	}

	#[test]
	fn batch_operations_and_total() {
		let store = store();
		store
			.save_many(&[commitment(1, 10), commitment(2, 20), commitment(3, 30)])
			.unwrap();
		assert_eq!(store.total_value().unwrap(), 60);

		let found = store.get_many(&[H256([2; 32]), H256([9; 32])]).unwrap();
		assert_eq!(found, vec![commitment(2, 20)]);

		let removed = store.delete_many(&[H256([1; 32]), H256([9; 32])]).unwrap();
		assert_eq!(removed, vec![commitment(1, 10)]);
		assert_eq!(store.total_value().unwrap(), 50);

		store.clear().unwrap();
		assert!(store.all().unwrap().is_empty());
	}
}
