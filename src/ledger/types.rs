//! Types for the persistent commitment ledger

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A 32-byte word used for commitment hashes, blinding factors and transaction hashes.
///
/// Rendered as `0x`-prefixed lowercase hex; parsing accepts the prefix optionally.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct H256(pub [u8; 32]);

impl H256 {
	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}

	pub fn to_hex(&self) -> String {
		format!("0x{}", hex::encode(self.0))
	}
}

impl From<[u8; 32]> for H256 {
	fn from(bytes: [u8; 32]) -> Self {
		Self(bytes)
	}
}

impl FromStr for H256 {
	type Err = LedgerError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let trimmed = s.strip_prefix("0x").unwrap_or(s);
		let bytes = hex::decode(trimmed)
			.map_err(|e| LedgerError::InvalidHash(format!("{}: {}", s, e)))?;
		let word: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
			LedgerError::InvalidHash(format!("{}: expected 32 bytes, got {}", s, b.len()))
		})?;
		Ok(Self(word))
	}
}

impl fmt::Display for H256 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

impl fmt::Debug for H256 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "H256({})", self.to_hex())
	}
}

impl Serialize for H256 {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> Deserialize<'de> for H256 {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

/// One private balance entry.
///
/// A commitment is present in the store iff it is unspent and owned by this ledger's
/// account for this ledger's asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
	pub hash: H256,
	pub value: u128,
	pub blinding: H256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
	Added,
	Spent,
}

impl HistoryStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			HistoryStatus::Added => "added",
			HistoryStatus::Spent => "spent",
		}
	}
}

/// Immutable history entry marking the creation or consumption of a commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
	pub id: String,
	pub status: HistoryStatus,
	pub transaction_hash: Option<H256>,
	pub commitment: Commitment,
	pub block_number: u64,
	pub transaction_index: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

impl HistoryRecord {
	pub fn new(
		status: HistoryStatus,
		commitment: Commitment,
		transaction_hash: Option<H256>,
		block_number: u64,
		transaction_index: u32,
		message: Option<String>,
	) -> Self {
		Self {
			id: Self::id_for(&commitment.hash, status),
			status,
			transaction_hash,
			commitment,
			block_number,
			transaction_index,
			message,
		}
	}

	/// Record id for a commitment/status pair; a commitment appears at most once per status.
	pub fn id_for(hash: &H256, status: HistoryStatus) -> String {
		format!("{}:{}", hash.to_hex(), status.as_str())
	}

	/// Total chain order: block, transaction index, then hash and status as tie-breakers.
	pub fn cmp_chain_order(&self, other: &Self) -> Ordering {
		(
			self.block_number,
			self.transaction_index,
			self.commitment.hash,
			self.status,
		)
			.cmp(&(
				other.block_number,
				other.transaction_index,
				other.commitment.hash,
				other.status,
			))
	}
}

/// A history record plus its neighbour links inside the persisted list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryNode {
	pub record: HistoryRecord,
	pub prev_id: Option<String>,
	pub next_id: Option<String>,
}

impl HistoryNode {
	pub fn id(&self) -> &str {
		&self.record.id
	}
}

/// Errors raised by the persistent ledger stores
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("Storage error: {0}")]
	Storage(#[from] sled::Error),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Invalid hash: {0}")]
	InvalidHash(String),

	#[error("Unknown history cursor: {0}")]
	UnknownCursor(String),

	#[error("History list is corrupted: {0}")]
	Corrupted(String),
}
