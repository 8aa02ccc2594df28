//! Spend plan builder
//!
//! This module provides a builder for the input side of an outgoing private transfer: it
//! picks the commitments that fund the transfer and computes the change note. Proof
//! generation and submission happen outside this crate and consume the resulting
//! [`SpendPlan`].

use crate::ledger::{Commitment, WindowMode, find_commitments};

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize)]
pub enum TransactionError {
	#[error("Transaction validation error: {0}")]
	ValidationError(String),

	#[error("Unexpected error: {0}")]
	UnexpectedError(String),

	#[error("Insufficient balance: requested {requested}, spendable {available}")]
	InsufficientBalance { requested: u128, available: u128 },
}

/// Inputs and change for one outgoing transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendPlan {
	pub inputs: Vec<Commitment>,
	/// Sum of the input values.
	pub total: u128,
	pub amount: u128,
	/// `total - amount`, returned to the sender as a new note.
	pub change: u128,
	pub recipient: String,
}

/// Builder for spend plans over a snapshot of spendable commitments
pub struct SpendPlanBuilder {
	/// Spendable commitments to choose from
	commitments: Option<Vec<Commitment>>,
	/// Value to transfer, in base units
	amount: Option<u128>,
	/// Recipient address
	recipient: Option<String>,
	window_mode: WindowMode,
}

impl SpendPlanBuilder {
	/// Creates a new spend plan builder
	pub fn new() -> Self {
		Self {
			commitments: None,
			amount: None,
			recipient: None,
			window_mode: WindowMode::default(),
		}
	}

	/// Sets the candidate commitments
	pub fn with_commitments(mut self, commitments: Vec<Commitment>) -> Self {
		self.commitments = Some(commitments);
		self
	}

	/// Sets the amount to transfer
	pub fn with_amount(mut self, amount: u128) -> Self {
		self.amount = Some(amount);
		self
	}

	/// Sets the recipient
	pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
		self.recipient = Some(recipient.into());
		self
	}

	/// Sets how the selection window advances
	pub fn with_window_mode(mut self, mode: WindowMode) -> Self {
		self.window_mode = mode;
		self
	}

	/// Selects inputs and builds the plan
	pub fn build(self) -> Result<SpendPlan, TransactionError> {
		let amount = self
			.amount
			.ok_or_else(|| TransactionError::ValidationError("amount is required".to_string()))?;
		if amount == 0 {
			return Err(TransactionError::ValidationError(
				"amount must be greater than zero".to_string(),
			));
		}
		let recipient = self
			.recipient
			.filter(|r| !r.trim().is_empty())
			.ok_or_else(|| TransactionError::ValidationError("recipient is required".to_string()))?;
		let commitments = self.commitments.unwrap_or_default();

		let available = commitments
			.iter()
			.fold(0u128, |acc, c| acc.saturating_add(c.value));
		log::debug!(
			"Selecting inputs for {} out of {} commitments worth {}",
			amount,
			commitments.len(),
			available
		);

		let selection = find_commitments(commitments, amount, self.window_mode);
		if selection.is_empty() {
			log::warn!(
				"No commitment window covers {} (spendable {}, mode {:?})",
				amount,
				available,
				self.window_mode
			);
			return Err(TransactionError::InsufficientBalance {
				requested: amount,
				available,
			});
		}

		let change = selection.total.checked_sub(amount).ok_or_else(|| {
			TransactionError::UnexpectedError(format!(
				"selection total {} below amount {}",
				selection.total, amount
			))
		})?;
		log::info!(
			"Planned spend of {} to {} from {} inputs, change {}",
			amount,
			recipient,
			selection.commitments.len(),
			change
		);

		Ok(SpendPlan {
			inputs: selection.commitments,
			total: selection.total,
			amount,
			change,
			recipient,
		})
	}
}

impl Default for SpendPlanBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::H256;

	fn notes(values: &[u128]) -> Vec<Commitment> {
		values
			.iter()
			.enumerate()
			.map(|(i, value)| Commitment {
				hash: H256([i as u8 + 1; 32]),
				value: *value,
				blinding: H256::default(),
			})
			.collect()
	}

	#[test]
	fn plans_change_from_selected_inputs() {
		let plan = SpendPlanBuilder::new()
			.with_commitments(notes(&[100, 40, 10]))
			.with_amount(70)
			.with_recipient("0xrecipient")
			.build()
			.unwrap();
		assert_eq!(plan.inputs.len(), 1);
		assert_eq!(plan.total, 100);
		assert_eq!(plan.change, 30);
		assert_eq!(plan.recipient, "0xrecipient");
	}

	#[test]
	fn uncovered_amount_is_insufficient_balance() {
		let err = SpendPlanBuilder::new()
			.with_commitments(notes(&[10, 10, 10, 10]))
			.with_amount(35)
			.with_recipient("0xrecipient")
			.build()
			.unwrap_err();
		assert!(matches!(
			err,
			TransactionError::InsufficientBalance {
				requested: 35,
				available: 40
			}
		));
	}

	#[test]
	fn rejects_missing_fields() {
		let err = SpendPlanBuilder::new()
			.with_commitments(notes(&[5]))
			.with_amount(0)
			.with_recipient("0xrecipient")
			.build()
			.unwrap_err();
		assert!(matches!(err, TransactionError::ValidationError(_)));

		let err = SpendPlanBuilder::new()
			.with_commitments(notes(&[5]))
			.with_amount(1)
			.build()
			.unwrap_err();
		assert!(matches!(err, TransactionError::ValidationError(_)));
	}
}
