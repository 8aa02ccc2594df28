//!
//! Utility module for the commitment ledger.
//!
//! Re-exports formatting helpers used by the demo binary and log output.
/// Utility functions for formatting and display
pub mod index;

pub use index::format_token_amount;
