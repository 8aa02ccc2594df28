//! Commitment selection for funding outgoing spends.
//!
//! Commitments are sorted by value (largest first) and a window of at most
//! [`MAX_SELECTION_INPUTS`] candidates is filled greedily until it covers the target. If a
//! window falls short, the window start advances by one and the attempt repeats.

use crate::ledger::types::Commitment;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Upper bound on inputs a single spend proof can consume.
pub const MAX_SELECTION_INPUTS: usize = 3;

/// How the candidate window is bounded as it advances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
	/// Window is `[offset, offset + 3)`: a 3-wide window slides down the sorted list.
	#[default]
	Sliding,
	/// Window is `[offset, 3)`: the end stays fixed, so the window shrinks as it advances.
	/// Matches wallets that selected inputs this way before the sliding window.
	Legacy,
}

/// Selected inputs and their cumulative value. An empty selection means the target
/// cannot be funded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
	pub commitments: Vec<Commitment>,
	pub total: u128,
}

impl Selection {
	pub fn is_empty(&self) -> bool {
		self.commitments.is_empty()
	}
}

pub fn find_commitments(commitments: Vec<Commitment>, target: u128, mode: WindowMode) -> Selection {
	let sorted = commitments
		.into_iter()
		.sorted_by(|a, b| b.value.cmp(&a.value).then_with(|| a.hash.cmp(&b.hash)))
		.collect::<Vec<_>>();

	for offset in 0..sorted.len() {
		let end = match mode {
			WindowMode::Sliding => (offset + MAX_SELECTION_INPUTS).min(sorted.len()),
			WindowMode::Legacy => MAX_SELECTION_INPUTS.min(sorted.len()),
		};
		if offset >= end {
			break;
		}

		let mut selection = Selection::default();
		for commitment in &sorted[offset..end] {
			selection.total = selection.total.saturating_add(commitment.value);
			selection.commitments.push(commitment.clone());
			if selection.total >= target {
				return selection;
			}
		}
	}

	Selection::default()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::types::H256;

	fn commitments(values: &[u128]) -> Vec<Commitment> {
		values
			.iter()
			.enumerate()
			.map(|(i, value)| Commitment {
				hash: H256([i as u8; 32]),
				value: *value,
				blinding: H256([0; 32]),
			})
			.collect()
	}

	fn values(selection: &Selection) -> Vec<u128> {
		selection.commitments.iter().map(|c| c.value).collect()
	}

	#[test]
	fn largest_commitment_covers_target() {
		for mode in [WindowMode::Sliding, WindowMode::Legacy] {
			let selection = find_commitments(commitments(&[10, 100, 40]), 70, mode);
			assert_eq!(values(&selection), vec![100]);
			assert_eq!(selection.total, 100);
		}
	}

	#[test]
	fn combines_up_to_three_inputs() {
		let selection = find_commitments(commitments(&[30, 50, 20, 5]), 95, WindowMode::Sliding);
		assert_eq!(values(&selection), vec![50, 30, 20]);
		assert_eq!(selection.total, 100);
	}

	#[test]
	fn insufficient_funds_yield_empty_selection() {
		let selection = find_commitments(commitments(&[30, 50, 20, 40]), 200, WindowMode::Sliding);
		assert!(selection.is_empty());
		assert_eq!(selection.total, 0);
		assert!(find_commitments(Vec::new(), 1, WindowMode::Sliding).is_empty());
	}

	#[test]
	fn more_than_three_inputs_are_never_used() {
		// total of all four covers the target, but no three do
		let selection = find_commitments(commitments(&[10, 10, 10, 10]), 40, WindowMode::Sliding);
		assert!(selection.is_empty());
	}

	#[test]
	fn zero_target_selects_the_largest_commitment() {
		let selection = find_commitments(commitments(&[1, 2]), 0, WindowMode::Sliding);
		assert_eq!(values(&selection), vec![2]);
	}

	#[test]
	fn legacy_window_shrinks_as_it_advances() {
		let pool = commitments(&[100, 40, 10, 5]);
		// the three largest cover 150, so both modes agree
		assert_eq!(
			find_commitments(pool.clone(), 150, WindowMode::Legacy).total,
			find_commitments(pool.clone(), 150, WindowMode::Sliding).total
		);
		// past the first three entries the legacy window is empty
		assert!(find_commitments(pool, 151, WindowMode::Legacy).is_empty());
	}
}
