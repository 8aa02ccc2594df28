//! Request and response types for the decryption delegate service

use crate::ledger::H256;

use serde::{Deserialize, Serialize};

/// Identifies the created commitment the delegate should decrypt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptRequest {
	pub block_number: u64,
	pub token: String,
	pub poseidon_hash: H256,
	pub owner: String,
}

/// Wire shape of a successful decryption; amounts travel as decimal or `0x` hex strings.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DecryptResponse {
	pub amount: String,
	pub blinding: H256,
}

/// Opened note contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptedNote {
	pub amount: u128,
	pub blinding: H256,
}

impl TryFrom<DecryptResponse> for DecryptedNote {
	type Error = DelegateError;

	fn try_from(response: DecryptResponse) -> Result<Self, Self::Error> {
		Ok(Self {
			amount: parse_amount(&response.amount)?,
			blinding: response.blinding,
		})
	}
}

pub(crate) fn parse_amount(raw: &str) -> Result<u128, DelegateError> {
	let parsed = match raw.strip_prefix("0x") {
		Some(hex_digits) => u128::from_str_radix(hex_digits, 16),
		None => raw.parse::<u128>(),
	};
	parsed.map_err(|e| DelegateError::InvalidResponse(format!("amount {:?}: {}", raw, e)))
}

/// Error types for decryption delegate calls
#[derive(Debug, thiserror::Error)]
pub enum DelegateError {
	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("Delegate rejected request with status {status}: {body}")]
	Rejected { status: u16, body: String },

	#[error("Invalid delegate response: {0}")]
	InvalidResponse(String),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn amounts_parse_from_decimal_and_hex() {
		assert_eq!(parse_amount("1000").unwrap(), 1000);
		assert_eq!(parse_amount("0xff").unwrap(), 255);
		assert!(parse_amount("-1").is_err());
		assert!(parse_amount("0xzz").is_err());
	}

	#[test]
	fn response_converts_into_note() {
		let response: DecryptResponse = serde_json::from_value(serde_json::json!({
			"amount": "50",
			"blinding": format!("0x{}", "07".repeat(32)),
		}))
		.unwrap();
		let note = DecryptedNote::try_from(response).unwrap();
		assert_eq!(note.amount, 50);
		assert_eq!(note.blinding, H256([7; 32]));
	}
}
