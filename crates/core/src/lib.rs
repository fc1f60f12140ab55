//! `splitledger-core`: shared domain primitives.
//!
//! Identifiers, the domain error model, and integer minor-unit amounts.
//! No infrastructure concerns live here.

pub mod amount;
pub mod error;
pub mod id;

pub use amount::{Amount, split_evenly};
pub use error::{DomainError, DomainResult};
pub use id::{ActivityId, ExpenseId, GroupId, MemberId, SettlementId};
