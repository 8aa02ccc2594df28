//! Ordered history store.
//!
//! History records are kept in a doubly-linked list persisted in one sled tree. Each node
//! lives under `node:<id>` and names its neighbours by id; the list ends are tracked by the
//! `ptr:head` and `ptr:tail` entries. Nodes are kept sorted by chain order (oldest at the
//! head), so reverse traversal yields newest-first history.
//!
//! Every structural edit (the new node, the rewritten neighbours and any moved end pointer)
//! is written as a single `sled::Batch`, so the links stay consistent across crashes.

use crate::ledger::store::{decode, encode};
use crate::ledger::types::{H256, HistoryNode, HistoryRecord, HistoryStatus, LedgerError};

use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

const HEAD_KEY: &[u8] = b"ptr:head";
const TAIL_KEY: &[u8] = b"ptr:tail";
const NODE_PREFIX: &str = "node:";

fn node_key(id: &str) -> Vec<u8> {
	format!("{}{}", NODE_PREFIX, id).into_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
	Forward,
	Reverse,
}

/// Persistent, chain-order-sorted history list.
///
/// Mutations must be serialized by the caller (the watcher runs them under its scheduler
/// key); reads may run concurrently.
#[derive(Debug, Clone)]
pub struct HistoryStore {
	tree: sled::Tree,
}

impl HistoryStore {
	pub fn new(tree: sled::Tree) -> Self {
		Self { tree }
	}

	pub fn get(&self, id: &str) -> Result<Option<HistoryNode>, LedgerError> {
		self.tree
			.get(node_key(id))?
			.map(|bytes| decode(&bytes))
			.transpose()
	}

	pub fn contains(&self, id: &str) -> Result<bool, LedgerError> {
		Ok(self.tree.contains_key(node_key(id))?)
	}

	fn require(&self, id: &str) -> Result<HistoryNode, LedgerError> {
		self.get(id)?
			.ok_or_else(|| LedgerError::Corrupted(format!("missing node {}", id)))
	}

	fn pointer(&self, key: &[u8]) -> Result<Option<String>, LedgerError> {
		Ok(self
			.tree
			.get(key)?
			.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
	}

	pub fn head_id(&self) -> Result<Option<String>, LedgerError> {
		self.pointer(HEAD_KEY)
	}

	pub fn tail_id(&self) -> Result<Option<String>, LedgerError> {
		self.pointer(TAIL_KEY)
	}

	pub fn len(&self) -> usize {
		self.tree.scan_prefix(NODE_PREFIX.as_bytes()).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Insert a record at its chain-order position.
	///
	/// Returns `false` without writing anything if a record with the same id exists.
	pub fn add(&self, record: HistoryRecord) -> Result<bool, LedgerError> {
		if self.contains(&record.id)? {
			debug!("History record {} already present", record.id);
			return Ok(false);
		}

		let id = record.id.clone();
		let mut batch = sled::Batch::default();

		let (head_id, tail_id) = match (self.head_id()?, self.tail_id()?) {
			(Some(head), Some(tail)) => (head, tail),
			(None, None) => {
				let node = HistoryNode {
					record,
					prev_id: None,
					next_id: None,
				};
				batch.insert(node_key(&id), encode(&node)?);
				batch.insert(HEAD_KEY, id.as_bytes());
				batch.insert(TAIL_KEY, id.as_bytes());
				self.tree.apply_batch(batch)?;
				debug!("History record {} started the list", id);
				return Ok(true);
			}
			(head, tail) => {
				return Err(LedgerError::Corrupted(format!(
					"head {:?} and tail {:?} disagree",
					head, tail
				)));
			}
		};

		let mut tail = self.require(&tail_id)?;
		if record.cmp_chain_order(&tail.record) == Ordering::Greater {
			tail.next_id = Some(id.clone());
			let node = HistoryNode {
				record,
				prev_id: Some(tail_id.clone()),
				next_id: None,
			};
			batch.insert(node_key(&tail_id), encode(&tail)?);
			batch.insert(node_key(&id), encode(&node)?);
			batch.insert(TAIL_KEY, id.as_bytes());
			self.tree.apply_batch(batch)?;
			return Ok(true);
		}

		let mut head = if head_id == tail_id {
			tail
		} else {
			self.require(&head_id)?
		};
		if record.cmp_chain_order(&head.record) == Ordering::Less {
			head.prev_id = Some(id.clone());
			let node = HistoryNode {
				record,
				prev_id: None,
				next_id: Some(head_id.clone()),
			};
			batch.insert(node_key(&head_id), encode(&head)?);
			batch.insert(node_key(&id), encode(&node)?);
			batch.insert(HEAD_KEY, id.as_bytes());
			self.tree.apply_batch(batch)?;
			return Ok(true);
		}

		// Strictly between head and tail: walk forward to the first node ordered after it.
		let mut current = head;
		loop {
			let next_id = current.next_id.clone().ok_or_else(|| {
				LedgerError::Corrupted(format!("list ends at {} before the tail", current.id()))
			})?;
			let mut next = self.require(&next_id)?;
			if record.cmp_chain_order(&next.record) == Ordering::Less {
				let current_id = current.id().to_string();
				current.next_id = Some(id.clone());
				next.prev_id = Some(id.clone());
				let node = HistoryNode {
					record,
					prev_id: Some(current_id.clone()),
					next_id: Some(next_id.clone()),
				};
				batch.insert(node_key(&current_id), encode(&current)?);
				batch.insert(node_key(&next_id), encode(&next)?);
				batch.insert(node_key(&id), encode(&node)?);
				self.tree.apply_batch(batch)?;
				return Ok(true);
			}
			current = next;
		}
	}

	/// Walk head to tail (oldest first).
	pub fn iter(&self) -> HistoryIter<'_> {
		HistoryIter::new(self, self.head_id(), Direction::Forward)
	}

	/// Walk tail to head (newest first).
	pub fn iter_rev(&self) -> HistoryIter<'_> {
		HistoryIter::new(self, self.tail_id(), Direction::Reverse)
	}

	/// Walk newest-first starting at `cursor` (inclusive), or at the tail when absent.
	pub fn iter_rev_from(&self, cursor: Option<&str>) -> Result<HistoryIter<'_>, LedgerError> {
		match cursor {
			None => Ok(self.iter_rev()),
			Some(id) if self.contains(id)? => {
				Ok(HistoryIter::new(self, Ok(Some(id.to_string())), Direction::Reverse))
			}
			Some(id) => Err(LedgerError::UnknownCursor(id.to_string())),
		}
	}

	/// All records, newest first.
	pub fn all(&self) -> Result<Vec<HistoryRecord>, LedgerError> {
		self.iter_rev()
			.map(|node| node.map(|n| n.record))
			.collect()
	}

	/// One page of history grouped by transaction hash, newest first.
	///
	/// `limit` counts groups, not records. When `hide_decoys` is set, a group made of one
	/// zero-value incoming record and nothing else is dropped once the walk reaches the
	/// next group's first record; the oldest group of the whole history has no such
	/// boundary and is always kept. `next_cursor` is the id of the first record not
	/// returned, i.e. the `prev_id` of the last record included. A `limit` of zero is
	/// treated as one so that paging always makes progress.
	pub fn paginate(
		&self,
		cursor: Option<&str>,
		limit: usize,
		hide_decoys: bool,
	) -> Result<HistoryPage, LedgerError> {
		let limit = limit.max(1);
		let mut groups = Vec::new();
		let mut current: Option<HistoryGroup> = None;

		for node in self.iter_rev_from(cursor)? {
			let node = node?;
			if let Some(group) = current.as_mut() {
				if group.transaction_hash == node.record.transaction_hash {
					group.push(node.record);
					continue;
				}
			}

			if let Some(group) = current.take() {
				if hide_decoys && group.is_decoy() {
					debug!("Hiding decoy group {:?}", group.transaction_hash);
				} else {
					groups.push(group);
				}
			}

			if groups.len() >= limit {
				return Ok(HistoryPage {
					groups,
					next_cursor: Some(node.record.id),
				});
			}
			current = Some(HistoryGroup::new(node.record));
		}

		groups.extend(current);
		Ok(HistoryPage {
			groups,
			next_cursor: None,
		})
	}

	pub fn clear(&self) -> Result<(), LedgerError> {
		self.tree.clear()?;
		Ok(())
	}
}

/// Deduplicating walk over the persisted list in either direction.
///
/// Stops at the list end, or as soon as an id would be visited twice.
pub struct HistoryIter<'a> {
	store: &'a HistoryStore,
	next: Option<String>,
	pending_error: Option<LedgerError>,
	direction: Direction,
	visited: HashSet<String>,
}

impl<'a> HistoryIter<'a> {
	fn new(
		store: &'a HistoryStore,
		start: Result<Option<String>, LedgerError>,
		direction: Direction,
	) -> Self {
		let (next, pending_error) = match start {
			Ok(next) => (next, None),
			Err(e) => (None, Some(e)),
		};
		Self {
			store,
			next,
			pending_error,
			direction,
			visited: HashSet::new(),
		}
	}
}

impl Iterator for HistoryIter<'_> {
	type Item = Result<HistoryNode, LedgerError>;

	fn next(&mut self) -> Option<Self::Item> {
		if let Some(e) = self.pending_error.take() {
			return Some(Err(e));
		}
		let id = self.next.take()?;
		if !self.visited.insert(id.clone()) {
			return None;
		}
		match self.store.require(&id) {
			Ok(node) => {
				self.next = match self.direction {
					Direction::Forward => node.next_id.clone(),
					Direction::Reverse => node.prev_id.clone(),
				};
				Some(Ok(node))
			}
			Err(e) => Some(Err(e)),
		}
	}
}

/// Consecutive history records sharing one transaction hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryGroup {
	pub transaction_hash: Option<H256>,
	pub block_number: u64,
	pub transaction_index: u32,
	pub incomings: Vec<HistoryRecord>,
	pub outgoings: Vec<HistoryRecord>,
}

impl HistoryGroup {
	fn new(record: HistoryRecord) -> Self {
		let mut group = Self {
			transaction_hash: record.transaction_hash,
			block_number: record.block_number,
			transaction_index: record.transaction_index,
			incomings: Vec::new(),
			outgoings: Vec::new(),
		};
		group.push(record);
		group
	}

	fn push(&mut self, record: HistoryRecord) {
		match record.status {
			HistoryStatus::Added => self.incomings.push(record),
			HistoryStatus::Spent => self.outgoings.push(record),
		}
	}

	/// Privacy padding: a single zero-value incoming and no outgoings.
	pub fn is_decoy(&self) -> bool {
		self.outgoings.is_empty()
			&& self.incomings.len() == 1
			&& self.incomings[0].commitment.value == 0
	}

	pub fn incoming_value(&self) -> u128 {
		self.incomings
			.iter()
			.fold(0, |acc, r| acc.saturating_add(r.commitment.value))
	}

	pub fn outgoing_value(&self) -> u128 {
		self.outgoings
			.iter()
			.fold(0, |acc, r| acc.saturating_add(r.commitment.value))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
	pub groups: Vec<HistoryGroup>,
	pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::store::LedgerDb;
	use crate::ledger::types::Commitment;
	use proptest::prelude::*;

	fn store() -> HistoryStore {
		HistoryStore::new(LedgerDb::temporary().unwrap().history_tree())
	}

	fn record(hash: u8, value: u128, block: u64, index: u32, tx: u8) -> HistoryRecord {
		HistoryRecord::new(
			HistoryStatus::Added,
			Commitment {
				hash: H256([hash; 32]),
				value,
				blinding: H256([0; 32]),
			},
			Some(H256([tx; 32])),
			block,
			index,
			None,
		)
	}

	fn spent(hash: u8, value: u128, block: u64, index: u32, tx: u8) -> HistoryRecord {
		let mut r = record(hash, value, block, index, tx);
		r.status = HistoryStatus::Spent;
		r.id = HistoryRecord::id_for(&r.commitment.hash, HistoryStatus::Spent);
		r
	}

	fn blocks(records: &[HistoryRecord]) -> Vec<u64> {
		records.iter().map(|r| r.block_number).collect()
	}

	/// Walks both directions and checks the links agree with the end pointers.
	fn assert_well_linked(store: &HistoryStore, expected: usize) {
		let forward: Vec<HistoryNode> = store.iter().collect::<Result<_, _>>().unwrap();
		let backward: Vec<HistoryNode> = store.iter_rev().collect::<Result<_, _>>().unwrap();
		assert_eq!(forward.len(), expected);
		assert_eq!(backward.len(), expected);
		assert_eq!(store.len(), expected);
		if expected > 0 {
			assert_eq!(Some(forward.last().unwrap().id().to_string()), store.tail_id().unwrap());
			assert_eq!(Some(backward.last().unwrap().id().to_string()), store.head_id().unwrap());
			assert!(forward[0].prev_id.is_none());
			assert!(backward[0].next_id.is_none());
		}
		let reversed: Vec<&str> = backward.iter().rev().map(|n| n.id()).collect();
		let ids: Vec<&str> = forward.iter().map(|n| n.id()).collect();
		assert_eq!(ids, reversed);
	}

	#[test]
	fn add_handles_empty_singleton_and_ends() {
		let store = store();
		assert!(store.add(record(1, 1, 10, 0, 1)).unwrap());
		assert_eq!(store.head_id().unwrap(), store.tail_id().unwrap());

		assert!(store.add(record(2, 1, 5, 0, 2)).unwrap());
		assert!(store.add(record(3, 1, 20, 0, 3)).unwrap());
		assert!(store.add(record(4, 1, 1, 0, 4)).unwrap());
		assert_eq!(blocks(&store.all().unwrap()), vec![20, 10, 5, 1]);
		assert_well_linked(&store, 4);
	}

	#[test]
	fn add_splices_into_the_middle() {
		let store = store();
		for (hash, block, index) in [(1, 10, 0), (2, 30, 0), (3, 20, 5), (4, 20, 1), (5, 25, 0)] {
			assert!(store.add(record(hash, 1, block, index, hash)).unwrap());
		}
		let all = store.all().unwrap();
		assert_eq!(blocks(&all), vec![30, 25, 20, 20, 10]);
		assert_eq!(all[2].transaction_index, 5);
		assert_eq!(all[3].transaction_index, 1);
		assert_well_linked(&store, 5);
	}

	#[test]
	fn duplicate_add_is_a_no_op() {
		let store = store();
		assert!(store.add(record(1, 1, 10, 0, 1)).unwrap());
		assert!(!store.add(record(1, 1, 10, 0, 1)).unwrap());
		assert!(store.add(spent(1, 1, 12, 0, 2)).unwrap());
		assert_well_linked(&store, 2);
	}

	#[test]
	fn paginate_counts_groups_and_returns_cursor() {
		let store = store();
		// tx 1: two incomings at block 10; tx 2: spend + change at block 20; tx 3: block 30
		store.add(record(1, 5, 10, 0, 1)).unwrap();
		store.add(record(2, 6, 10, 0, 1)).unwrap();
		store.add(spent(1, 5, 20, 0, 2)).unwrap();
		store.add(record(3, 1, 20, 0, 2)).unwrap();
		store.add(record(4, 9, 30, 0, 3)).unwrap();

		let first = store.paginate(None, 2, false).unwrap();
		assert_eq!(first.groups.len(), 2);
		assert_eq!(first.groups[0].transaction_hash, Some(H256([3; 32])));
		assert_eq!(first.groups[1].incomings.len(), 1);
		assert_eq!(first.groups[1].outgoings.len(), 1);
		let cursor = first.next_cursor.expect("more pages");

		let second = store.paginate(Some(&cursor), 2, false).unwrap();
		assert_eq!(second.groups.len(), 1);
		assert_eq!(second.groups[0].incomings.len(), 2);
		assert_eq!(second.groups[0].incoming_value(), 11);
		assert!(second.next_cursor.is_none());
	}

	#[test]
	fn paginate_cursor_is_stable_when_new_records_arrive() {
		let store = store();
		store.add(record(1, 1, 10, 0, 1)).unwrap();
		store.add(record(2, 1, 20, 0, 2)).unwrap();
		store.add(record(3, 1, 30, 0, 3)).unwrap();

		let first = store.paginate(None, 1, false).unwrap();
		store.add(record(4, 1, 40, 0, 4)).unwrap();
		let second = store
			.paginate(first.next_cursor.as_deref(), 1, false)
			.unwrap();
		assert_eq!(second.groups[0].block_number, 20);
	}

	#[test]
	fn decoys_are_hidden_only_before_a_hash_boundary() {
		let store = store();
		store.add(record(1, 0, 10, 0, 1)).unwrap(); // oldest, no boundary after it
		store.add(record(2, 7, 20, 0, 2)).unwrap();
		store.add(record(3, 0, 30, 0, 3)).unwrap(); // decoy followed by a boundary
		store.add(record(4, 8, 40, 0, 4)).unwrap();

		let visible = store.paginate(None, 10, true).unwrap();
		assert_eq!(
			visible.groups.iter().map(|g| g.block_number).collect::<Vec<_>>(),
			vec![40, 20, 10]
		);
		let everything = store.paginate(None, 10, false).unwrap();
		assert_eq!(everything.groups.len(), 4);
	}

	#[test]
	fn zero_limit_still_advances() {
		let store = store();
		store.add(record(1, 1, 10, 0, 1)).unwrap();
		store.add(record(2, 1, 20, 0, 2)).unwrap();

		let first = store.paginate(None, 0, false).unwrap();
		assert_eq!(first.groups.len(), 1);
		assert_eq!(first.groups[0].block_number, 20);
		let cursor = first.next_cursor.expect("more pages");

		let second = store.paginate(Some(&cursor), 0, false).unwrap();
		assert_eq!(second.groups[0].block_number, 10);
		assert!(second.next_cursor.is_none());
	}

	#[test]
	fn unknown_cursor_is_rejected() {
		let store = store();
		store.add(record(1, 1, 10, 0, 1)).unwrap();
		assert!(matches!(
			store.paginate(Some("nope"), 1, false),
			Err(LedgerError::UnknownCursor(_))
		));
	}

	#[test]
	fn clear_empties_the_list() {
		let store = store();
		store.add(record(1, 1, 10, 0, 1)).unwrap();
		store.clear().unwrap();
		assert!(store.is_empty());
		assert!(store.head_id().unwrap().is_none());
		assert!(store.add(record(2, 1, 5, 0, 2)).unwrap());
		assert_well_linked(&store, 1);
	}

	proptest! {
		#[test]
		fn any_insertion_order_yields_sorted_well_linked_list(
			positions in proptest::collection::hash_set((0u64..50, 0u32..4), 1..40)
		) {
			let store = store();
			let positions: Vec<(u64, u32)> = positions.into_iter().collect();
			for (i, (block, index)) in positions.iter().enumerate() {
				prop_assert!(store.add(record(i as u8, 1, *block, *index, i as u8)).unwrap());
			}
			// redelivery changes nothing
			for (i, (block, index)) in positions.iter().enumerate() {
				prop_assert!(!store.add(record(i as u8, 1, *block, *index, i as u8)).unwrap());
			}

			let all = store.all().unwrap();
			prop_assert_eq!(all.len(), positions.len());
			for pair in all.windows(2) {
				prop_assert!(
					(pair[0].block_number, pair[0].transaction_index)
						> (pair[1].block_number, pair[1].transaction_index)
				);
			}
			assert_well_linked(&store, positions.len());
		}
	}
}
