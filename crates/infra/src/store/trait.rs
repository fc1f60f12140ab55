use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use splitledger_core::{ExpenseId, GroupId, MemberId};
use splitledger_ledger::{Expense, GroupLog, Settlement, SettlementMode};

use super::query::{Page, Pagination};
use crate::activity::Activity;

/// Group directory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub name: String,
    pub owner: MemberId,
    pub settlement_mode: SettlementMode,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of an idempotency claim: absent → `Pending` → `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Done,
}

impl ClaimStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Done => "done",
        }
    }
}

/// A claim being attempted.
#[derive(Debug, Clone, Copy)]
pub struct NewClaim<'a> {
    pub key: &'a str,
    pub actor: &'a MemberId,
    pub operation: &'static str,
}

/// A stored idempotency claim.
///
/// `response_status`/`response_body` are set exactly when `status == Done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub key: String,
    pub actor: MemberId,
    pub operation: String,
    pub status: ClaimStatus,
    pub response_status: Option<u16>,
    pub response_body: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

/// Result of an atomic insert-if-absent on the claim table.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This caller inserted the row and owns the mutation.
    Claimed,
    /// Another attempt got there first.
    Existing(ClaimRecord),
}

/// Storage operation error.
///
/// Infrastructure failures only; domain rejections never travel through here.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A uniqueness or state precondition failed (e.g. the claim is no longer
    /// pending when the unit of work tries to finalise it).
    #[error("storage conflict: {0}")]
    Conflict(String),

    /// The backend rejected or failed the operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored row could not be decoded into a domain record.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The backend is unreachable (pool closed, lock poisoned, no runtime).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable store for groups, the transaction log, and idempotency claims.
///
/// Reads are snapshot reads of committed rows and never block writers for
/// longer than one statement. Every balance-affecting write goes through a
/// [`UnitOfWork`] obtained from [`LedgerStore::begin`].
///
/// Implementations must:
/// - make `try_claim` the sole arbiter between racing attempts on one key
///   (exactly one caller sees `Claimed`)
/// - commit claim inserts immediately so `Pending` is observable
/// - make a unit of work all-or-nothing and discard it on rollback or drop
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_group(&self, group: &GroupRecord) -> Result<(), StoreError>;

    async fn group(&self, group_id: GroupId) -> Result<Option<GroupRecord>, StoreError>;

    /// Groups `member` currently belongs to.
    async fn groups_for_member(&self, member: &MemberId) -> Result<Vec<GroupId>, StoreError>;

    /// Current members plus every expense (with shares, in declared order) and
    /// settlement of a group.
    async fn load_group_log(&self, group_id: GroupId) -> Result<GroupLog, StoreError>;

    /// Newest-first page of a group's expenses.
    async fn list_expenses(&self, group_id: GroupId, pagination: Pagination) -> Result<Page<Expense>, StoreError>;

    /// Newest-first page of activity across `group_ids`.
    async fn list_activities(&self, group_ids: &[GroupId], pagination: Pagination) -> Result<Page<Activity>, StoreError>;

    /// Atomically insert a `Pending` claim, or return the existing one.
    async fn try_claim(&self, claim: NewClaim<'_>) -> Result<ClaimOutcome, StoreError>;

    /// Delete a claim that is still `Pending`. `Done` claims are untouched.
    async fn release_claim(&self, key: &str) -> Result<(), StoreError>;

    /// Delete `Pending` claims created before `cutoff`. Returns how many.
    async fn reap_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Start a unit of work (one database transaction).
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

/// One all-or-nothing transaction over the transaction log and claim table.
///
/// Nothing staged here is visible outside until [`UnitOfWork::commit`].
/// Dropping without committing rolls back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Current members of a group (empty when the group does not exist).
    async fn members(&mut self, group_id: GroupId) -> Result<BTreeSet<MemberId>, StoreError>;

    /// The group's log as seen by this unit of work.
    async fn group_log(&mut self, group_id: GroupId) -> Result<GroupLog, StoreError>;

    /// Add a member. Returns `false` when they already belong to the group.
    async fn add_member(&mut self, group_id: GroupId, member: &MemberId) -> Result<bool, StoreError>;

    /// Remove a member. Their log entries stay. Returns `false` when they
    /// were not a member.
    async fn remove_member(&mut self, group_id: GroupId, member: &MemberId) -> Result<bool, StoreError>;

    /// Flip the group's settlement mode, returning the new mode (`None` when the
    /// group does not exist).
    async fn toggle_settlement_mode(&mut self, group_id: GroupId) -> Result<Option<SettlementMode>, StoreError>;

    /// Load an expense for modification.
    async fn expense(&mut self, expense_id: ExpenseId) -> Result<Option<Expense>, StoreError>;

    async fn insert_expense(&mut self, expense: &Expense) -> Result<(), StoreError>;

    /// Rewrite every field and the full share list of an existing expense.
    async fn replace_expense(&mut self, expense: &Expense) -> Result<(), StoreError>;

    /// Delete an expense and its shares. Returns `false` when it did not exist.
    async fn delete_expense(&mut self, expense_id: ExpenseId) -> Result<bool, StoreError>;

    async fn insert_settlement(&mut self, settlement: &Settlement) -> Result<(), StoreError>;

    async fn insert_activity(&mut self, activity: &Activity) -> Result<(), StoreError>;

    /// Move a `Pending` claim to `Done` with its recorded response.
    ///
    /// Fails with [`StoreError::Conflict`] when the claim is no longer pending.
    async fn complete_claim(&mut self, key: &str, status: u16, body: &JsonValue) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn create_group(&self, group: &GroupRecord) -> Result<(), StoreError> {
        (**self).create_group(group).await
    }

    async fn group(&self, group_id: GroupId) -> Result<Option<GroupRecord>, StoreError> {
        (**self).group(group_id).await
    }

    async fn groups_for_member(&self, member: &MemberId) -> Result<Vec<GroupId>, StoreError> {
        (**self).groups_for_member(member).await
    }

    async fn load_group_log(&self, group_id: GroupId) -> Result<GroupLog, StoreError> {
        (**self).load_group_log(group_id).await
    }

    async fn list_expenses(&self, group_id: GroupId, pagination: Pagination) -> Result<Page<Expense>, StoreError> {
        (**self).list_expenses(group_id, pagination).await
    }

    async fn list_activities(&self, group_ids: &[GroupId], pagination: Pagination) -> Result<Page<Activity>, StoreError> {
        (**self).list_activities(group_ids, pagination).await
    }

    async fn try_claim(&self, claim: NewClaim<'_>) -> Result<ClaimOutcome, StoreError> {
        (**self).try_claim(claim).await
    }

    async fn release_claim(&self, key: &str) -> Result<(), StoreError> {
        (**self).release_claim(key).await
    }

    async fn reap_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).reap_stale_claims(cutoff).await
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        (**self).begin().await
    }
}
