pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{ExecutionOrigin, PlanFrequency, PlanStatus, TradeDirection, TxStatus};
pub use error::CoreError;
pub use structs::{
    AssetSnapshot, Credentials, ExecutionRequest, NewTransaction, Plan, TransactionRecord,
};
