//! Domain error model.

use thiserror::Error;

use crate::id::MemberId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only. Storage and transport concerns are
/// modelled by the layers that own them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input rejected at the write gate (bad amounts, share-sum mismatch,
    /// self-settlement).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A payer, share member or settlement party is not in the group.
    #[error("not a member of this group: {0}")]
    NotMember(MemberId),

    /// A ledger invariant does not hold (e.g. balances do not sum to zero).
    ///
    /// Always fatal for the operation that detects it.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The acting member may not perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Whether this error reflects a bug upstream rather than bad input.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}
