//! Storage collaborator boundary.
//!
//! The ledger core never owns durable state. It needs a store that offers
//! all-or-nothing multi-row transactions, atomic insert-if-absent claim rows,
//! and reads filtered by group and member. `LedgerStore` is that contract;
//! `InMemoryLedgerStore` backs tests/dev and `PostgresLedgerStore` backs
//! production.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use query::{Page, Pagination};
pub use r#trait::{
    ClaimOutcome, ClaimRecord, ClaimStatus, GroupRecord, LedgerStore, NewClaim, StoreError, UnitOfWork,
};
