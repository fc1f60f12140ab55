//! Postgres-backed ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Conflict` |
//! | Database (check constraint violation) | `23514` | `Backend` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / PoolTimedOut | N/A | `Unavailable` |
//! | Other | N/A | `Backend` |
//!
//! ## Claims
//!
//! `try_claim` is an `INSERT .. ON CONFLICT DO NOTHING` outside any unit of
//! work, so a `pending` row is visible to concurrent attempts as soon as the
//! statement returns. The unit of work later flips it to `done` in the same
//! transaction as the ledger writes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use splitledger_core::{ActivityId, Amount, ExpenseId, GroupId, MemberId, SettlementId};
use splitledger_ledger::{Expense, GroupLog, Settlement, SettlementMode, Share};

use super::query::{Page, Pagination};
use super::r#trait::{
    ClaimOutcome, ClaimRecord, ClaimStatus, GroupRecord, LedgerStore, NewClaim, StoreError, UnitOfWork,
};
use crate::activity::{Activity, ActivityKind};

/// Attempts before `try_claim` gives up on a key that keeps flickering
/// between inserted and released.
const CLAIM_ATTEMPTS: usize = 3;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS groups (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        simplify_debts BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_members (
        group_id UUID NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
        member_id TEXT NOT NULL,
        joined_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (group_id, member_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS expenses (
        id UUID PRIMARY KEY,
        group_id UUID NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
        description TEXT,
        payer_id TEXT NOT NULL,
        total BIGINT NOT NULL CHECK (total > 0),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS expenses_group_created_idx ON expenses (group_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS expense_shares (
        expense_id UUID NOT NULL REFERENCES expenses(id) ON DELETE CASCADE,
        position INT NOT NULL,
        member_id TEXT NOT NULL,
        amount BIGINT NOT NULL CHECK (amount >= 0),
        PRIMARY KEY (expense_id, position),
        UNIQUE (expense_id, member_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settlements (
        id UUID PRIMARY KEY,
        group_id UUID NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
        from_id TEXT NOT NULL,
        to_id TEXT NOT NULL,
        amount BIGINT NOT NULL CHECK (amount > 0),
        created_at TIMESTAMPTZ NOT NULL,
        CHECK (from_id <> to_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS settlements_group_idx ON settlements (group_id)",
    r#"
    CREATE TABLE IF NOT EXISTS activities (
        id UUID PRIMARY KEY,
        group_id UUID NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
        member_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS activities_group_created_idx ON activities (group_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS idempotency_keys (
        key TEXT PRIMARY KEY,
        actor_id TEXT NOT NULL,
        operation TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('pending', 'done')),
        response_status INT,
        response_body JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idempotency_keys_pending_idx ON idempotency_keys (created_at) WHERE status = 'pending'",
];

/// Postgres-backed ledger store.
///
/// Shares are stored with their declared position so the remainder rule of
/// even splits survives a round trip.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    async fn fetch_claim(&self, key: &str) -> Result<Option<ClaimRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT key, actor_id, operation, status, response_status, response_body, created_at
            FROM idempotency_keys
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_claim", e))?;

        row.map(|r| claim_from_row(&r)).transpose()
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self, group), fields(group_id = %group.id), err)]
    async fn create_group(&self, group: &GroupRecord) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO groups (id, name, owner_id, simplify_debts, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(group.id.as_uuid())
        .bind(&group.name)
        .bind(group.owner.as_str())
        .bind(group.settlement_mode == SettlementMode::Simplified)
        .bind(group.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_group", e))?;

        sqlx::query("INSERT INTO group_members (group_id, member_id) VALUES ($1, $2)")
            .bind(group.id.as_uuid())
            .bind(group.owner.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_owner", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(group_id = %group_id), err)]
    async fn group(&self, group_id: GroupId) -> Result<Option<GroupRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, owner_id, simplify_debts, created_at
            FROM groups
            WHERE id = $1
            "#,
        )
        .bind(group_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_group", e))?;

        row.map(|r| group_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(member = %member), err)]
    async fn groups_for_member(&self, member: &MemberId) -> Result<Vec<GroupId>, StoreError> {
        let rows = sqlx::query("SELECT group_id FROM group_members WHERE member_id = $1 ORDER BY group_id")
            .bind(member.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("groups_for_member", e))?;

        rows.iter()
            .map(|r| {
                let id: Uuid = r.try_get("group_id").map_err(corrupt)?;
                Ok(GroupId::from_uuid(id))
            })
            .collect()
    }

    #[instrument(skip(self), fields(group_id = %group_id, expense_count, settlement_count), err)]
    async fn load_group_log(&self, group_id: GroupId) -> Result<GroupLog, StoreError> {
        // One repeatable-read snapshot so balances never mix two commits.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let log = read_group_log(&mut tx, group_id).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let span = Span::current();
        span.record("expense_count", log.expenses.len());
        span.record("settlement_count", log.settlements.len());

        Ok(log)
    }

    #[instrument(skip(self), fields(group_id = %group_id, limit = pagination.limit, offset = pagination.offset), err)]
    async fn list_expenses(&self, group_id: GroupId, pagination: Pagination) -> Result<Page<Expense>, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM expenses WHERE group_id = $1")
            .bind(group_id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_expenses", e))?;

        let rows = sqlx::query(
            r#"
            SELECT id, group_id, description, payer_id, total, created_at, updated_at
            FROM expenses
            WHERE group_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(group_id.as_uuid())
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_expenses", e))?;

        let mut expenses = rows
            .iter()
            .map(expense_from_row)
            .collect::<Result<Vec<_>, StoreError>>()?;

        let ids: Vec<Uuid> = expenses.iter().map(|e| *e.id.as_uuid()).collect();
        let share_rows = sqlx::query(
            r#"
            SELECT expense_id, member_id, amount
            FROM expense_shares
            WHERE expense_id = ANY($1)
            ORDER BY expense_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_shares", e))?;

        let mut shares = shares_by_expense(&share_rows)?;
        for expense in &mut expenses {
            expense.shares = shares.remove(&expense.id).unwrap_or_default();
        }

        Ok(Page::new(expenses, total.max(0) as u64, pagination))
    }

    #[instrument(skip(self, group_ids), fields(group_count = group_ids.len(), limit = pagination.limit, offset = pagination.offset), err)]
    async fn list_activities(&self, group_ids: &[GroupId], pagination: Pagination) -> Result<Page<Activity>, StoreError> {
        let ids: Vec<Uuid> = group_ids.iter().map(|g| *g.as_uuid()).collect();

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activities WHERE group_id = ANY($1)")
            .bind(&ids)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_activities", e))?;

        let rows = sqlx::query(
            r#"
            SELECT id, group_id, member_id, kind, metadata, created_at
            FROM activities
            WHERE group_id = ANY($1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&ids)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_activities", e))?;

        let activities = rows
            .iter()
            .map(activity_from_row)
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(Page::new(activities, total.max(0) as u64, pagination))
    }

    #[instrument(skip(self, claim), fields(key = claim.key, operation = claim.operation), err)]
    async fn try_claim(&self, claim: NewClaim<'_>) -> Result<ClaimOutcome, StoreError> {
        for _ in 0..CLAIM_ATTEMPTS {
            let inserted = sqlx::query(
                r#"
                INSERT INTO idempotency_keys (key, actor_id, operation, status)
                VALUES ($1, $2, $3, 'pending')
                ON CONFLICT (key) DO NOTHING
                RETURNING key
                "#,
            )
            .bind(claim.key)
            .bind(claim.actor.as_str())
            .bind(claim.operation)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_claim", e))?;

            if inserted.is_some() {
                return Ok(ClaimOutcome::Claimed);
            }

            // The row may have been released between the insert and this read.
            if let Some(existing) = self.fetch_claim(claim.key).await? {
                return Ok(ClaimOutcome::Existing(existing));
            }
        }

        Err(StoreError::Conflict(format!(
            "claim '{}' could not be settled after {CLAIM_ATTEMPTS} attempts",
            claim.key
        )))
    }

    #[instrument(skip(self), err)]
    async fn release_claim(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND status = 'pending'")
            .bind(key)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("release_claim", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn reap_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE status = 'pending' AND created_at < $1")
            .bind(cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("reap_stale_claims", e))?;
        Ok(result.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// One Postgres transaction. Dropping it without commit rolls back.
struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn members(&mut self, group_id: GroupId) -> Result<BTreeSet<MemberId>, StoreError> {
        load_members(&mut self.tx, group_id).await
    }

    async fn group_log(&mut self, group_id: GroupId) -> Result<GroupLog, StoreError> {
        // Serializes writers per group so checks made against this log still
        // hold at commit.
        sqlx::query("SELECT id FROM groups WHERE id = $1 FOR UPDATE")
            .bind(group_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_group", e))?;

        read_group_log(&mut self.tx, group_id).await
    }

    #[instrument(skip(self), fields(group_id = %group_id, member = %member), err)]
    async fn add_member(&mut self, group_id: GroupId, member: &MemberId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO group_members (group_id, member_id)
            VALUES ($1, $2)
            ON CONFLICT (group_id, member_id) DO NOTHING
            "#,
        )
        .bind(group_id.as_uuid())
        .bind(member.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("add_member", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(group_id = %group_id, member = %member), err)]
    async fn remove_member(&mut self, group_id: GroupId, member: &MemberId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM group_members WHERE group_id = $1 AND member_id = $2")
            .bind(group_id.as_uuid())
            .bind(member.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("remove_member", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(group_id = %group_id), err)]
    async fn toggle_settlement_mode(&mut self, group_id: GroupId) -> Result<Option<SettlementMode>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE groups
            SET simplify_debts = NOT simplify_debts
            WHERE id = $1
            RETURNING simplify_debts
            "#,
        )
        .bind(group_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("toggle_settlement_mode", e))?;

        row.map(|r| {
            let simplify: bool = r.try_get("simplify_debts").map_err(corrupt)?;
            Ok(mode_from_flag(simplify))
        })
        .transpose()
    }

    async fn expense(&mut self, expense_id: ExpenseId) -> Result<Option<Expense>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, group_id, description, payer_id, total, created_at, updated_at
            FROM expenses
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(expense_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_expense", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut expense = expense_from_row(&row)?;

        let share_rows = sqlx::query(
            "SELECT expense_id, member_id, amount FROM expense_shares WHERE expense_id = $1 ORDER BY position",
        )
        .bind(expense_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_expense_shares", e))?;
        expense.shares = shares_by_expense(&share_rows)?
            .remove(&expense_id)
            .unwrap_or_default();

        Ok(Some(expense))
    }

    #[instrument(skip(self, expense), fields(expense_id = %expense.id, group_id = %expense.group_id), err)]
    async fn insert_expense(&mut self, expense: &Expense) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO expenses (id, group_id, description, payer_id, total, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(expense.id.as_uuid())
        .bind(expense.group_id.as_uuid())
        .bind(expense.description.as_deref())
        .bind(expense.payer.as_str())
        .bind(expense.total.minor())
        .bind(expense.created_at)
        .bind(expense.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_expense", e))?;

        insert_shares(&mut self.tx, expense).await
    }

    #[instrument(skip(self, expense), fields(expense_id = %expense.id), err)]
    async fn replace_expense(&mut self, expense: &Expense) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE expenses
            SET description = $2, payer_id = $3, total = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(expense.id.as_uuid())
        .bind(expense.description.as_deref())
        .bind(expense.payer.as_str())
        .bind(expense.total.minor())
        .bind(expense.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_expense", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict(format!("expense {} does not exist", expense.id)));
        }

        sqlx::query("DELETE FROM expense_shares WHERE expense_id = $1")
            .bind(expense.id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_shares", e))?;

        insert_shares(&mut self.tx, expense).await
    }

    #[instrument(skip(self), fields(expense_id = %expense_id), err)]
    async fn delete_expense(&mut self, expense_id: ExpenseId) -> Result<bool, StoreError> {
        // Shares go with the expense (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM expenses WHERE id = $1")
            .bind(expense_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_expense", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, settlement), fields(settlement_id = %settlement.id, group_id = %settlement.group_id), err)]
    async fn insert_settlement(&mut self, settlement: &Settlement) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO settlements (id, group_id, from_id, to_id, amount, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(settlement.id.as_uuid())
        .bind(settlement.group_id.as_uuid())
        .bind(settlement.from.as_str())
        .bind(settlement.to.as_str())
        .bind(settlement.amount.minor())
        .bind(settlement.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_settlement", e))?;
        Ok(())
    }

    #[instrument(skip(self, activity), fields(group_id = %activity.group_id, kind = activity.kind.as_str()), err)]
    async fn insert_activity(&mut self, activity: &Activity) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO activities (id, group_id, member_id, kind, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(activity.id.as_uuid())
        .bind(activity.group_id.as_uuid())
        .bind(activity.member.as_str())
        .bind(activity.kind.as_str())
        .bind(&activity.metadata)
        .bind(activity.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_activity", e))?;
        Ok(())
    }

    #[instrument(skip(self, body), err)]
    async fn complete_claim(&mut self, key: &str, status: u16, body: &JsonValue) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET status = 'done', response_status = $2, response_body = $3
            WHERE key = $1 AND status = 'pending'
            "#,
        )
        .bind(key)
        .bind(i32::from(status))
        .bind(body)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("complete_claim", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict(format!("claim '{key}' is no longer pending")));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

async fn load_members(
    tx: &mut Transaction<'static, Postgres>,
    group_id: GroupId,
) -> Result<BTreeSet<MemberId>, StoreError> {
    let rows = sqlx::query("SELECT member_id FROM group_members WHERE group_id = $1")
        .bind(group_id.as_uuid())
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_members", e))?;

    rows.iter()
        .map(|r| {
            let member: String = r.try_get("member_id").map_err(corrupt)?;
            Ok(MemberId::new(member))
        })
        .collect()
}

/// Members, expenses (with shares in declared order) and settlements of one
/// group, read inside `tx`.
async fn read_group_log(tx: &mut Transaction<'static, Postgres>, group_id: GroupId) -> Result<GroupLog, StoreError> {
    let members = load_members(tx, group_id).await?;

    let expense_rows = sqlx::query(
        r#"
        SELECT id, group_id, description, payer_id, total, created_at, updated_at
        FROM expenses
        WHERE group_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(group_id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("load_expenses", e))?;

    let share_rows = sqlx::query(
        r#"
        SELECT s.expense_id, s.member_id, s.amount
        FROM expense_shares s
        JOIN expenses e ON e.id = s.expense_id
        WHERE e.group_id = $1
        ORDER BY s.expense_id, s.position
        "#,
    )
    .bind(group_id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("load_shares", e))?;

    let settlement_rows = sqlx::query(
        r#"
        SELECT id, group_id, from_id, to_id, amount, created_at
        FROM settlements
        WHERE group_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(group_id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("load_settlements", e))?;

    let mut shares = shares_by_expense(&share_rows)?;
    let expenses = expense_rows
        .iter()
        .map(|r| {
            let mut expense = expense_from_row(r)?;
            expense.shares = shares.remove(&expense.id).unwrap_or_default();
            Ok(expense)
        })
        .collect::<Result<Vec<_>, StoreError>>()?;
    let settlements = settlement_rows
        .iter()
        .map(settlement_from_row)
        .collect::<Result<Vec<_>, StoreError>>()?;

    Ok(GroupLog {
        members: members.into_iter().collect(),
        expenses,
        settlements,
    })
}

async fn insert_shares(tx: &mut Transaction<'static, Postgres>, expense: &Expense) -> Result<(), StoreError> {
    for (position, share) in expense.shares.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO expense_shares (expense_id, position, member_id, amount)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(expense.id.as_uuid())
        .bind(position as i32)
        .bind(share.member.as_str())
        .bind(share.amount.minor())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_share", e))?;
    }
    Ok(())
}

// Row decoding

fn corrupt(err: sqlx::Error) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

fn mode_from_flag(simplify: bool) -> SettlementMode {
    if simplify {
        SettlementMode::Simplified
    } else {
        SettlementMode::Direct
    }
}

fn group_from_row(row: &PgRow) -> Result<GroupRecord, StoreError> {
    let id: Uuid = row.try_get("id").map_err(corrupt)?;
    let owner: String = row.try_get("owner_id").map_err(corrupt)?;
    let simplify: bool = row.try_get("simplify_debts").map_err(corrupt)?;
    Ok(GroupRecord {
        id: GroupId::from_uuid(id),
        name: row.try_get("name").map_err(corrupt)?,
        owner: MemberId::new(owner),
        settlement_mode: mode_from_flag(simplify),
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}

/// Expense header only; shares are attached by the caller.
fn expense_from_row(row: &PgRow) -> Result<Expense, StoreError> {
    let id: Uuid = row.try_get("id").map_err(corrupt)?;
    let group_id: Uuid = row.try_get("group_id").map_err(corrupt)?;
    let payer: String = row.try_get("payer_id").map_err(corrupt)?;
    let total: i64 = row.try_get("total").map_err(corrupt)?;
    Ok(Expense {
        id: ExpenseId::from_uuid(id),
        group_id: GroupId::from_uuid(group_id),
        description: row.try_get("description").map_err(corrupt)?,
        payer: MemberId::new(payer),
        total: Amount::new(total),
        shares: Vec::new(),
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
    })
}

/// Group share rows (already ordered by position) by expense.
fn shares_by_expense(rows: &[PgRow]) -> Result<HashMap<ExpenseId, Vec<Share>>, StoreError> {
    let mut shares: HashMap<ExpenseId, Vec<Share>> = HashMap::new();
    for row in rows {
        let expense_id: Uuid = row.try_get("expense_id").map_err(corrupt)?;
        let member: String = row.try_get("member_id").map_err(corrupt)?;
        let amount: i64 = row.try_get("amount").map_err(corrupt)?;
        shares
            .entry(ExpenseId::from_uuid(expense_id))
            .or_default()
            .push(Share::new(member, amount));
    }
    Ok(shares)
}

fn settlement_from_row(row: &PgRow) -> Result<Settlement, StoreError> {
    let id: Uuid = row.try_get("id").map_err(corrupt)?;
    let group_id: Uuid = row.try_get("group_id").map_err(corrupt)?;
    let from: String = row.try_get("from_id").map_err(corrupt)?;
    let to: String = row.try_get("to_id").map_err(corrupt)?;
    let amount: i64 = row.try_get("amount").map_err(corrupt)?;
    Ok(Settlement {
        id: SettlementId::from_uuid(id),
        group_id: GroupId::from_uuid(group_id),
        from: MemberId::new(from),
        to: MemberId::new(to),
        amount: Amount::new(amount),
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}

fn activity_from_row(row: &PgRow) -> Result<Activity, StoreError> {
    let id: Uuid = row.try_get("id").map_err(corrupt)?;
    let group_id: Uuid = row.try_get("group_id").map_err(corrupt)?;
    let member: String = row.try_get("member_id").map_err(corrupt)?;
    let kind: String = row.try_get("kind").map_err(corrupt)?;
    let kind = kind
        .parse::<ActivityKind>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(Activity {
        id: ActivityId::from_uuid(id),
        group_id: GroupId::from_uuid(group_id),
        member: MemberId::new(member),
        kind,
        metadata: row.try_get("metadata").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}

fn claim_from_row(row: &PgRow) -> Result<ClaimRecord, StoreError> {
    let actor: String = row.try_get("actor_id").map_err(corrupt)?;
    let status: String = row.try_get("status").map_err(corrupt)?;
    let status = match status.as_str() {
        "pending" => ClaimStatus::Pending,
        "done" => ClaimStatus::Done,
        other => return Err(StoreError::Corrupt(format!("unknown claim status '{other}'"))),
    };
    let response_status: Option<i32> = row.try_get("response_status").map_err(corrupt)?;
    let response_status = response_status
        .map(|s| u16::try_from(s).map_err(|_| StoreError::Corrupt(format!("response status {s} out of range"))))
        .transpose()?;

    Ok(ClaimRecord {
        key: row.try_get("key").map_err(corrupt)?,
        actor: MemberId::new(actor),
        operation: row.try_get("operation").map_err(corrupt)?,
        status,
        response_status,
        response_body: row.try_get("response_body").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique / foreign key violation
                Some("23505") | Some("23503") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {}", operation))
        }
        sqlx::Error::RowNotFound => StoreError::Backend(format!("unexpected row not found in {}", operation)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
