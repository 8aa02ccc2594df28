//! Persistent ledger state: spendable commitments, ordered history and the input selector.
//!
//! All stores share one sled database ([`LedgerDb`]), each in its own tree.

/// Spendable commitment CRUD
pub mod commitments;
/// Chain-ordered, cursor-paginated history list
pub mod history;
/// Input selection for spends
pub mod selection;
/// Database handle and storage codec
pub mod store;
/// Ledger data model and errors
pub mod types;

pub use commitments::CommitmentStore;
pub use history::{HistoryGroup, HistoryPage, HistoryStore};
pub use selection::{Selection, WindowMode, find_commitments};
pub use store::LedgerDb;
pub use types::*;
