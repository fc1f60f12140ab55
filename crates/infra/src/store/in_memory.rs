use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, OwnedMutexGuard};

use splitledger_core::{ExpenseId, GroupId, MemberId};
use splitledger_ledger::{Expense, GroupLog, Settlement, SettlementMode};

use super::query::{Page, Pagination};
use super::r#trait::{
    ClaimOutcome, ClaimRecord, ClaimStatus, GroupRecord, LedgerStore, NewClaim, StoreError, UnitOfWork,
};
use crate::activity::Activity;

#[derive(Debug, Clone, Default)]
struct State {
    groups: HashMap<GroupId, GroupRecord>,
    members: HashMap<GroupId, BTreeSet<MemberId>>,
    expenses: HashMap<ExpenseId, Expense>,
    settlements: Vec<Settlement>,
    activities: Vec<Activity>,
    claims: HashMap<String, ClaimRecord>,
}

impl State {
    /// Group expenses oldest-first (creation order, id as tiebreak).
    fn group_expenses(&self, group_id: GroupId) -> Vec<Expense> {
        let mut expenses: Vec<Expense> = self
            .expenses
            .values()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect();
        expenses.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        expenses
    }

    fn group_log(&self, group_id: GroupId) -> GroupLog {
        GroupLog {
            members: self
                .members
                .get(&group_id)
                .map(|m| m.iter().cloned().collect())
                .unwrap_or_default(),
            expenses: self.group_expenses(group_id),
            settlements: self
                .settlements
                .iter()
                .filter(|s| s.group_id == group_id)
                .cloned()
                .collect(),
        }
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. A unit of work holds the store lock for its whole
/// lifetime and edits a private copy of the state, so transactions are
/// serialized and rollback is simply discarding the copy.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a claim row, for inspection in tests and tooling.
    pub async fn claim(&self, key: &str) -> Option<ClaimRecord> {
        self.state.lock().await.claims.get(key).cloned()
    }

    /// Total number of expense rows across all groups.
    pub async fn expense_count(&self) -> usize {
        self.state.lock().await.expenses.len()
    }

    /// Total number of settlement rows across all groups.
    pub async fn settlement_count(&self) -> usize {
        self.state.lock().await.settlements.len()
    }

    /// Backdate a claim's creation time (used to exercise expiry).
    pub async fn backdate_claim(&self, key: &str, created_at: DateTime<Utc>) -> bool {
        match self.state.lock().await.claims.get_mut(key) {
            Some(claim) => {
                claim.created_at = created_at;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_group(&self, group: &GroupRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.groups.contains_key(&group.id) {
            return Err(StoreError::Conflict(format!("group {} already exists", group.id)));
        }
        state.groups.insert(group.id, group.clone());
        state
            .members
            .entry(group.id)
            .or_default()
            .insert(group.owner.clone());
        Ok(())
    }

    async fn group(&self, group_id: GroupId) -> Result<Option<GroupRecord>, StoreError> {
        Ok(self.state.lock().await.groups.get(&group_id).cloned())
    }

    async fn groups_for_member(&self, member: &MemberId) -> Result<Vec<GroupId>, StoreError> {
        let state = self.state.lock().await;
        let mut groups: Vec<GroupId> = state
            .members
            .iter()
            .filter(|(_, members)| members.contains(member))
            .map(|(group_id, _)| *group_id)
            .collect();
        groups.sort();
        Ok(groups)
    }

    async fn load_group_log(&self, group_id: GroupId) -> Result<GroupLog, StoreError> {
        Ok(self.state.lock().await.group_log(group_id))
    }

    async fn list_expenses(&self, group_id: GroupId, pagination: Pagination) -> Result<Page<Expense>, StoreError> {
        let state = self.state.lock().await;
        let mut expenses = state.group_expenses(group_id);
        expenses.reverse();

        let total = expenses.len() as u64;
        let items = expenses
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();
        Ok(Page::new(items, total, pagination))
    }

    async fn list_activities(&self, group_ids: &[GroupId], pagination: Pagination) -> Result<Page<Activity>, StoreError> {
        let state = self.state.lock().await;
        let mut activities: Vec<&Activity> = state
            .activities
            .iter()
            .filter(|a| group_ids.contains(&a.group_id))
            .collect();
        activities.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let total = activities.len() as u64;
        let items = activities
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, total, pagination))
    }

    async fn try_claim(&self, claim: NewClaim<'_>) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.claims.get(claim.key) {
            return Ok(ClaimOutcome::Existing(existing.clone()));
        }
        state.claims.insert(
            claim.key.to_string(),
            ClaimRecord {
                key: claim.key.to_string(),
                actor: claim.actor.clone(),
                operation: claim.operation.to_string(),
                status: ClaimStatus::Pending,
                response_status: None,
                response_body: None,
                created_at: Utc::now(),
            },
        );
        Ok(ClaimOutcome::Claimed)
    }

    async fn release_claim(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state
            .claims
            .get(key)
            .is_some_and(|c| c.status == ClaimStatus::Pending)
        {
            state.claims.remove(key);
        }
        Ok(())
    }

    async fn reap_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.claims.len();
        state
            .claims
            .retain(|_, c| c.status == ClaimStatus::Done || c.created_at >= cutoff);
        Ok((before - state.claims.len()) as u64)
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork { guard, working }))
    }
}

/// Unit of work over a private copy of the store state.
struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn members(&mut self, group_id: GroupId) -> Result<BTreeSet<MemberId>, StoreError> {
        Ok(self.working.members.get(&group_id).cloned().unwrap_or_default())
    }

    async fn group_log(&mut self, group_id: GroupId) -> Result<GroupLog, StoreError> {
        Ok(self.working.group_log(group_id))
    }

    async fn add_member(&mut self, group_id: GroupId, member: &MemberId) -> Result<bool, StoreError> {
        if !self.working.groups.contains_key(&group_id) {
            return Err(StoreError::Conflict(format!("group {group_id} does not exist")));
        }
        Ok(self
            .working
            .members
            .entry(group_id)
            .or_default()
            .insert(member.clone()))
    }

    async fn remove_member(&mut self, group_id: GroupId, member: &MemberId) -> Result<bool, StoreError> {
        Ok(self
            .working
            .members
            .get_mut(&group_id)
            .is_some_and(|members| members.remove(member)))
    }

    async fn toggle_settlement_mode(&mut self, group_id: GroupId) -> Result<Option<SettlementMode>, StoreError> {
        Ok(self.working.groups.get_mut(&group_id).map(|group| {
            group.settlement_mode = group.settlement_mode.toggled();
            group.settlement_mode
        }))
    }

    async fn expense(&mut self, expense_id: ExpenseId) -> Result<Option<Expense>, StoreError> {
        Ok(self.working.expenses.get(&expense_id).cloned())
    }

    async fn insert_expense(&mut self, expense: &Expense) -> Result<(), StoreError> {
        if self.working.expenses.contains_key(&expense.id) {
            return Err(StoreError::Conflict(format!("expense {} already exists", expense.id)));
        }
        self.working.expenses.insert(expense.id, expense.clone());
        Ok(())
    }

    async fn replace_expense(&mut self, expense: &Expense) -> Result<(), StoreError> {
        match self.working.expenses.get_mut(&expense.id) {
            Some(slot) => {
                *slot = expense.clone();
                Ok(())
            }
            None => Err(StoreError::Conflict(format!("expense {} does not exist", expense.id))),
        }
    }

    async fn delete_expense(&mut self, expense_id: ExpenseId) -> Result<bool, StoreError> {
        Ok(self.working.expenses.remove(&expense_id).is_some())
    }

    async fn insert_settlement(&mut self, settlement: &Settlement) -> Result<(), StoreError> {
        self.working.settlements.push(settlement.clone());
        Ok(())
    }

    async fn insert_activity(&mut self, activity: &Activity) -> Result<(), StoreError> {
        self.working.activities.push(activity.clone());
        Ok(())
    }

    async fn complete_claim(&mut self, key: &str, status: u16, body: &JsonValue) -> Result<(), StoreError> {
        match self.working.claims.get_mut(key) {
            Some(claim) if claim.status == ClaimStatus::Pending => {
                claim.status = ClaimStatus::Done;
                claim.response_status = Some(status);
                claim.response_body = Some(body.clone());
                Ok(())
            }
            _ => Err(StoreError::Conflict(format!("claim '{key}' is no longer pending"))),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
