/// Render a base-unit amount with `decimals` fractional digits, without float rounding.
pub fn format_token_amount(amount: u128, decimals: u32) -> String {
	if decimals == 0 {
		return amount.to_string();
	}
	let digits = format!("{:0>width$}", amount, width = decimals as usize + 1);
	let (whole, fraction) = digits.split_at(digits.len() - decimals as usize);
	format!("{}.{}", whole, fraction)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn formats_exactly() {
		assert_eq!(format_token_amount(1_234_567, 6), "1.234567");
		assert_eq!(format_token_amount(5, 6), "0.000005");
		assert_eq!(format_token_amount(0, 2), "0.00");
		assert_eq!(format_token_amount(42, 0), "42");
		assert_eq!(
			format_token_amount(u128::MAX, 18),
			"340282366920938463463.374607431768211455"
		);
	}
}
