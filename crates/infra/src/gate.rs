//! Idempotent mutation gate.
//!
//! Every balance-affecting write (expense create/replace/delete, settlement
//! create) passes through [`MutationGate::execute`]. Per idempotency key the
//! claim moves `absent → Pending → Done`:
//!
//! ```text
//! key ──► try_claim ──► Existing(Pending) ──► MutationError::InProgress
//!             │       └► Existing(Done)    ──► stored (status, body), replayed
//!             ▼
//!          Claimed
//!             ▼
//!   begin ─► check log ─► validate ─► write rows ─► complete_claim ─► commit
//!             │             │                                          │
//!             │             └── rejection: recorded as Done (4xx)      └── any failure:
//!             └── integrity violation: 500, never recorded                 rollback + release
//! ```
//!
//! Before adding to a group's log the gate re-folds it. A log that no longer
//! balances is an integrity violation: the write is refused and the claim is
//! released rather than recorded, so a retry after repair can still succeed.
//!
//! The claim insert is the only race arbiter. Exactly one attempt per key
//! reaches the unit of work; everyone else either waits out `InProgress` or
//! receives the recorded result verbatim.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use splitledger_core::{DomainError, ExpenseId, GroupId, MemberId, SettlementId};
use splitledger_ledger::{
    Expense, ExpenseDraft, GroupLog, Settlement, SettlementDraft, ensure_headroom, group_balances, validate_expense,
    validate_settlement,
};

use crate::activity::{Activity, ActivityKind};
use crate::store::{ClaimOutcome, ClaimRecord, ClaimStatus, LedgerStore, NewClaim, StoreError, UnitOfWork};

/// A balance-affecting write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationOp {
    CreateExpense { group_id: GroupId, draft: ExpenseDraft },
    ReplaceExpense { expense_id: ExpenseId, draft: ExpenseDraft },
    DeleteExpense { expense_id: ExpenseId },
    CreateSettlement { group_id: GroupId, draft: SettlementDraft },
}

impl MutationOp {
    /// Stable operation name recorded on the claim.
    pub fn name(&self) -> &'static str {
        match self {
            MutationOp::CreateExpense { .. } => "expense.create",
            MutationOp::ReplaceExpense { .. } => "expense.replace",
            MutationOp::DeleteExpense { .. } => "expense.delete",
            MutationOp::CreateSettlement { .. } => "settlement.create",
        }
    }
}

/// Outcome of a gated mutation, suitable for writing to the wire verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse {
    pub status: u16,
    pub body: JsonValue,
    /// `true` when this is a recorded result returned for a repeated key.
    pub replayed: bool,
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("an idempotency key is required for this operation")]
    MissingKey,

    /// Another attempt holds the claim. Safe to retry after a delay.
    #[error("a request with idempotency key '{0}' is still being processed")]
    InProgress(String),

    /// The key was first used by another actor or for another operation.
    #[error("idempotency key '{key}' was already used for a different request ({operation})")]
    KeyReused { key: String, operation: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The ledger is in a state that should be impossible. Nothing was
    /// written and the claim was released.
    #[error("ledger integrity violation: {0}")]
    Integrity(String),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl MutationError {
    /// HTTP status the calling layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            MutationError::MissingKey => 400,
            MutationError::InProgress(_) => 409,
            MutationError::KeyReused { .. } => 422,
            MutationError::Store(_) | MutationError::Integrity(_) | MutationError::Encode(_) => 500,
        }
    }
}

/// Why the winning attempt did not produce a success response.
#[derive(Debug)]
enum ApplyError {
    /// Deterministic rejection; recorded on the claim.
    Rejected(DomainError),
    Store(StoreError),
    Encode(serde_json::Error),
}

impl From<DomainError> for ApplyError {
    fn from(value: DomainError) -> Self {
        ApplyError::Rejected(value)
    }
}

impl From<StoreError> for ApplyError {
    fn from(value: StoreError) -> Self {
        ApplyError::Store(value)
    }
}

impl From<serde_json::Error> for ApplyError {
    fn from(value: serde_json::Error) -> Self {
        ApplyError::Encode(value)
    }
}

/// Wraps a [`LedgerStore`] so every write has exactly-once effect per key.
#[derive(Debug, Clone)]
pub struct MutationGate<S> {
    store: S,
}

impl<S> MutationGate<S>
where
    S: LedgerStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `op` on behalf of `actor`, at most once per `key`.
    #[instrument(skip(self, op), fields(actor = %actor, operation = op.name()), err)]
    pub async fn execute(
        &self,
        actor: &MemberId,
        key: Option<&str>,
        op: MutationOp,
    ) -> Result<MutationResponse, MutationError> {
        let key = key.map(str::trim).filter(|k| !k.is_empty()).ok_or(MutationError::MissingKey)?;
        let operation = op.name();

        let claim = NewClaim { key, actor, operation };
        match self.store.try_claim(claim).await? {
            ClaimOutcome::Existing(record) => replay(record, actor, operation),
            ClaimOutcome::Claimed => self.run_claimed(key, actor, op).await,
        }
    }

    async fn run_claimed(
        &self,
        key: &str,
        actor: &MemberId,
        op: MutationOp,
    ) -> Result<MutationResponse, MutationError> {
        let mut uow = match self.store.begin().await {
            Ok(uow) => uow,
            Err(err) => return Err(self.abandon(key, None, err.into()).await),
        };

        let (status, body) = match apply(uow.as_mut(), actor, op).await {
            Ok(success) => success,
            Err(ApplyError::Rejected(err)) if err.is_integrity() => {
                error!(key, error = %err, "integrity violation while applying mutation");
                return Err(self
                    .abandon(key, Some(uow), MutationError::Integrity(err.to_string()))
                    .await);
            }
            Err(ApplyError::Rejected(err)) => {
                if let Err(rollback_err) = uow.rollback().await {
                    warn!(key, error = %rollback_err, "rollback before recording rejection failed");
                }
                return self.record_rejection(key, &err).await;
            }
            Err(ApplyError::Store(err)) => return Err(self.abandon(key, Some(uow), err.into()).await),
            Err(ApplyError::Encode(err)) => return Err(self.abandon(key, Some(uow), err.into()).await),
        };

        if let Err(err) = uow.complete_claim(key, status, &body).await {
            return Err(self.abandon(key, Some(uow), err.into()).await);
        }
        if let Err(err) = uow.commit().await {
            return Err(self.abandon(key, None, err.into()).await);
        }

        info!(key, status, "mutation committed");
        Ok(MutationResponse {
            status,
            body,
            replayed: false,
        })
    }

    /// Record a deterministic rejection as the key's final outcome.
    async fn record_rejection(&self, key: &str, err: &DomainError) -> Result<MutationResponse, MutationError> {
        let (status, body) = rejection(err);

        let mut uow = match self.store.begin().await {
            Ok(uow) => uow,
            Err(store_err) => return Err(self.abandon(key, None, store_err.into()).await),
        };
        if let Err(store_err) = uow.complete_claim(key, status, &body).await {
            return Err(self.abandon(key, Some(uow), store_err.into()).await);
        }
        if let Err(store_err) = uow.commit().await {
            return Err(self.abandon(key, None, store_err.into()).await);
        }

        info!(key, status, reason = %err, "mutation rejected");
        Ok(MutationResponse {
            status,
            body,
            replayed: false,
        })
    }

    /// Roll back (if a unit of work is still open) and release the pending
    /// claim so the key can be retried. Returns `cause` for propagation.
    async fn abandon(&self, key: &str, uow: Option<Box<dyn UnitOfWork>>, cause: MutationError) -> MutationError {
        if let Some(uow) = uow {
            if let Err(err) = uow.rollback().await {
                warn!(key, error = %err, "rollback failed");
            }
        }
        if let Err(err) = self.store.release_claim(key).await {
            // Left pending; the reaper will expire it.
            warn!(key, error = %err, "failed to release claim");
        }
        warn!(key, error = %cause, "mutation abandoned, claim released");
        cause
    }
}

fn replay(record: ClaimRecord, actor: &MemberId, operation: &str) -> Result<MutationResponse, MutationError> {
    if &record.actor != actor || record.operation != operation {
        warn!(key = %record.key, "idempotency key reused for a different request");
        return Err(MutationError::KeyReused {
            key: record.key,
            operation: record.operation,
        });
    }

    match record.status {
        ClaimStatus::Pending => {
            warn!(key = %record.key, "idempotency key still pending");
            Err(MutationError::InProgress(record.key))
        }
        ClaimStatus::Done => match (record.response_status, record.response_body) {
            (Some(status), Some(body)) => Ok(MutationResponse {
                status,
                body,
                replayed: true,
            }),
            _ => Err(StoreError::Corrupt(format!("claim '{}' is done without a recorded response", record.key)).into()),
        },
    }
}

/// Validate and stage `op`. Nothing is written before validation passes.
async fn apply(uow: &mut dyn UnitOfWork, actor: &MemberId, op: MutationOp) -> Result<(u16, JsonValue), ApplyError> {
    let now = Utc::now();
    match op {
        MutationOp::CreateExpense { group_id, draft } => {
            let members = uow.members(group_id).await?;
            if members.is_empty() {
                return Err(DomainError::not_found(format!("group {group_id}")).into());
            }
            ensure_member(&members, actor)?;
            let log = balanced_log(uow, group_id).await?;

            let shares = validate_expense(&draft, &members)?;
            ensure_headroom(&log, None, draft.total)?;
            let expense = Expense::from_validated(ExpenseId::new(), group_id, draft, shares, now);
            uow.insert_expense(&expense).await?;
            uow.insert_activity(&Activity::expense(ActivityKind::ExpenseCreate, actor, &expense))
                .await?;
            Ok((201, wrap("expense", &expense)?))
        }
        MutationOp::ReplaceExpense { expense_id, draft } => {
            let existing = load_expense(uow, expense_id).await?;
            let members = uow.members(existing.group_id).await?;
            ensure_member(&members, actor)?;
            let log = balanced_log(uow, existing.group_id).await?;

            let shares = validate_expense(&draft, &members)?;
            ensure_headroom(&log, Some(expense_id), draft.total)?;
            let replaced = existing.replaced_by(draft, shares, now);
            uow.replace_expense(&replaced).await?;
            uow.insert_activity(&Activity::expense(ActivityKind::ExpenseUpdate, actor, &replaced))
                .await?;
            Ok((200, wrap("expense", &replaced)?))
        }
        MutationOp::DeleteExpense { expense_id } => {
            // Deleting only shrinks the log, so it skips the balance check.
            let existing = load_expense(uow, expense_id).await?;
            let members = uow.members(existing.group_id).await?;
            ensure_member(&members, actor)?;

            if !uow.delete_expense(expense_id).await? {
                return Err(DomainError::not_found(format!("expense {expense_id}")).into());
            }
            uow.insert_activity(&Activity::expense(ActivityKind::ExpenseDelete, actor, &existing))
                .await?;
            Ok((200, wrap("deleted", &expense_id)?))
        }
        MutationOp::CreateSettlement { group_id, draft } => {
            let members = uow.members(group_id).await?;
            if members.is_empty() {
                return Err(DomainError::not_found(format!("group {group_id}")).into());
            }
            ensure_member(&members, actor)?;
            if &draft.from != actor && &draft.to != actor {
                return Err(DomainError::forbidden("only a party to a settlement may record it").into());
            }
            let log = balanced_log(uow, group_id).await?;

            validate_settlement(&draft, &members)?;
            ensure_headroom(&log, None, draft.amount)?;
            let settlement = Settlement::from_validated(SettlementId::new(), group_id, draft, now);
            uow.insert_settlement(&settlement).await?;
            uow.insert_activity(&Activity::settlement_created(actor, &settlement)).await?;
            Ok((201, wrap("settlement", &settlement)?))
        }
    }
}

/// The group's log, provided it still folds to balances that sum to zero.
async fn balanced_log(uow: &mut dyn UnitOfWork, group_id: GroupId) -> Result<GroupLog, ApplyError> {
    let log = uow.group_log(group_id).await?;
    group_balances(&log)?;
    Ok(log)
}

async fn load_expense(uow: &mut dyn UnitOfWork, expense_id: ExpenseId) -> Result<Expense, ApplyError> {
    uow.expense(expense_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("expense {expense_id}")).into())
}

fn ensure_member(members: &std::collections::BTreeSet<MemberId>, actor: &MemberId) -> Result<(), DomainError> {
    if members.contains(actor) {
        Ok(())
    } else {
        Err(DomainError::forbidden(format!("{actor} is not a member of this group")))
    }
}

fn wrap<T: Serialize>(field: &str, value: &T) -> Result<JsonValue, serde_json::Error> {
    let mut body = Map::new();
    body.insert(field.to_string(), serde_json::to_value(value)?);
    Ok(JsonValue::Object(body))
}

/// Status and body recorded for a deterministic rejection.
fn rejection(err: &DomainError) -> (u16, JsonValue) {
    let (status, code) = match err {
        DomainError::Validation(_) => (400, "validation_error"),
        DomainError::NotMember(_) => (400, "not_member"),
        DomainError::InvalidId(_) => (400, "invalid_id"),
        DomainError::NotFound(_) => (404, "not_found"),
        DomainError::Forbidden(_) => (403, "forbidden"),
        DomainError::InvariantViolation(_) => (500, "integrity_error"),
    };
    (status, json!({ "error": code, "message": err.to_string() }))
}
