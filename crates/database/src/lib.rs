//! # Database Crate
//!
//! Persistence layer for the DCA engine, backed by SQLite through `sqlx`.
//!
//! The crate is split into three parts:
//! - `connection`: pool construction and embedded migrations.
//! - `repository`: the `DbRepository`, the only place SQL lives.
//! - `error`: the crate's `DbError` type.
//!
//! Monetary values are stored as TEXT and parsed into `rust_decimal::Decimal`
//! at the repository boundary, never handled as floats.

pub mod connection;
pub mod error;
pub mod repository;

pub use connection::{connect, connect_in_memory, run_migrations};
pub use error::DbError;
pub use repository::{DbRepository, NewPlan, StoredCredentials, TransactionFilter};
