/// Spend plan builder for outgoing transfers
pub mod builder;

pub use builder::{SpendPlan, SpendPlanBuilder, TransactionError};
