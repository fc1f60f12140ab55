//! Ledger service facade.
//!
//! The operations the calling layer (HTTP, CLI) uses. Reads recompute from the
//! committed transaction log on every call; writes go through the
//! [`MutationGate`].

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use splitledger_core::{DomainError, GroupId, MemberId};
use splitledger_ledger::{
    Balances, Expense, MemberSummary, SettlementMode, SpendingWindow, Suggestion, group_balances, suggest, summarize,
};

use crate::activity::Activity;
use crate::gate::{MutationError, MutationGate, MutationOp, MutationResponse};
use crate::store::{GroupRecord, LedgerStore, Page, Pagination, StoreError};

/// Accepted group name length, in characters.
const GROUP_NAME_LEN: core::ops::RangeInclusive<usize> = 3..=50;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The member still has nonzero pairwise balances in the group.
    #[error("{member} still has outstanding debts in this group")]
    OutstandingDebts { member: MemberId, debts: Vec<Suggestion> },
}

impl ServiceError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, ServiceError::Domain(err) if err.is_integrity())
    }
}

#[derive(Debug, Clone)]
pub struct LedgerService<S> {
    store: S,
    gate: MutationGate<S>,
}

impl<S> LedgerService<S>
where
    S: LedgerStore + Clone,
{
    pub fn new(store: S) -> Self {
        Self {
            gate: MutationGate::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[instrument(skip(self), err)]
    pub async fn create_group(&self, name: &str, owner: &MemberId) -> Result<GroupRecord, ServiceError> {
        let name = name.trim();
        if !GROUP_NAME_LEN.contains(&name.chars().count()) {
            return Err(DomainError::validation(format!(
                "group name must be between {} and {} characters",
                GROUP_NAME_LEN.start(),
                GROUP_NAME_LEN.end()
            ))
            .into());
        }

        let group = GroupRecord {
            id: GroupId::new(),
            name: name.to_string(),
            owner: owner.clone(),
            settlement_mode: SettlementMode::default(),
            created_at: Utc::now(),
        };
        self.store.create_group(&group).await?;
        info!(group_id = %group.id, "group created");
        Ok(group)
    }

    /// Add `member` to a group the requester belongs to. Returns `false` when
    /// they were already a member.
    #[instrument(skip(self), fields(group_id = %group_id), err)]
    pub async fn add_member(
        &self,
        group_id: GroupId,
        requester: &MemberId,
        member: &MemberId,
    ) -> Result<bool, ServiceError> {
        self.authorize(group_id, requester).await?;

        let mut uow = self.store.begin().await?;
        let added = uow.add_member(group_id, member).await?;
        if added {
            uow.insert_activity(&Activity::member_joined(group_id, member, requester))
                .await?;
        }
        uow.commit().await?;

        if added {
            info!(member = %member, "member added");
        }
        Ok(added)
    }

    /// Remove `member` from a group the requester belongs to.
    ///
    /// Refused for the requester themself and while the member has any
    /// nonzero pairwise balance in the group. Their log entries remain and keep
    /// counting towards balances.
    #[instrument(skip(self), fields(group_id = %group_id), err)]
    pub async fn remove_member(
        &self,
        group_id: GroupId,
        requester: &MemberId,
        member: &MemberId,
    ) -> Result<(), ServiceError> {
        self.authorize(group_id, requester).await?;
        if requester == member {
            return Err(DomainError::validation("you cannot remove yourself from a group").into());
        }

        let mut uow = self.store.begin().await?;
        if !uow.members(group_id).await?.contains(member) {
            return Err(DomainError::not_found(format!("member {member} in group {group_id}")).into());
        }

        let log = uow.group_log(group_id).await?;
        let debts = suggest(&log, member, SettlementMode::Direct).map_err(|err| integrity(group_id, err))?;
        if !debts.is_empty() {
            uow.rollback().await?;
            warn!(member = %member, counterparties = debts.len(), "member removal blocked by outstanding debts");
            return Err(ServiceError::OutstandingDebts {
                member: member.clone(),
                debts,
            });
        }

        if !uow.remove_member(group_id, member).await? {
            return Err(DomainError::not_found(format!("member {member} in group {group_id}")).into());
        }
        uow.insert_activity(&Activity::member_left(group_id, member, requester))
            .await?;
        uow.commit().await?;

        info!(member = %member, "member removed");
        Ok(())
    }

    /// Fail with `NotFound` for an unknown group and `Forbidden` when the
    /// requester is not one of its members.
    pub async fn authorize(&self, group_id: GroupId, requester: &MemberId) -> Result<GroupRecord, ServiceError> {
        let group = self
            .store
            .group(group_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("group {group_id}")))?;
        let groups = self.store.groups_for_member(requester).await?;
        if !groups.contains(&group_id) {
            return Err(DomainError::forbidden(format!("{requester} is not a member of this group")).into());
        }
        Ok(group)
    }

    /// Net balance of every current member. Sums to zero.
    #[instrument(skip(self), fields(group_id = %group_id), err)]
    pub async fn compute_balances(&self, group_id: GroupId) -> Result<Balances, ServiceError> {
        self.require_group(group_id).await?;
        let log = self.store.load_group_log(group_id).await?;
        group_balances(&log).map_err(|err| integrity(group_id, err))
    }

    /// Settle-up view of `perspective`. `mode` overrides the group's stored
    /// settlement mode.
    #[instrument(skip(self), fields(group_id = %group_id, perspective = %perspective), err)]
    pub async fn suggest_settlements(
        &self,
        group_id: GroupId,
        perspective: &MemberId,
        mode: Option<SettlementMode>,
    ) -> Result<Vec<Suggestion>, ServiceError> {
        let group = self.require_group(group_id).await?;
        let mode = mode.unwrap_or(group.settlement_mode);
        let log = self.store.load_group_log(group_id).await?;
        suggest(&log, perspective, mode).map_err(|err| integrity(group_id, err))
    }

    #[instrument(skip(self), fields(group_id = %group_id), err)]
    pub async fn toggle_settlement_mode(
        &self,
        group_id: GroupId,
        requester: &MemberId,
    ) -> Result<SettlementMode, ServiceError> {
        self.authorize(group_id, requester).await?;

        let mut uow = self.store.begin().await?;
        let mode = uow
            .toggle_settlement_mode(group_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("group {group_id}")))?;
        uow.insert_activity(&Activity::settlement_mode_changed(group_id, requester, mode))
            .await?;
        uow.commit().await?;

        info!(mode = mode.as_str(), "settlement mode changed");
        Ok(mode)
    }

    #[instrument(skip(self), fields(group_id = %group_id), err)]
    pub async fn list_expenses(&self, group_id: GroupId, pagination: Pagination) -> Result<Page<Expense>, ServiceError> {
        self.require_group(group_id).await?;
        Ok(self.store.list_expenses(group_id, pagination).await?)
    }

    /// Newest-first activity across every group `member` belongs to.
    #[instrument(skip(self), fields(member = %member), err)]
    pub async fn activities(&self, member: &MemberId, pagination: Pagination) -> Result<Page<Activity>, ServiceError> {
        let groups = self.store.groups_for_member(member).await?;
        if groups.is_empty() {
            return Ok(Page::new(Vec::new(), 0, pagination));
        }
        Ok(self.store.list_activities(&groups, pagination).await?)
    }

    /// Dashboard figures for `member` across every group they belong to.
    #[instrument(skip(self), fields(member = %member), err)]
    pub async fn member_summary(&self, member: &MemberId, window: SpendingWindow) -> Result<MemberSummary, ServiceError> {
        let mut logs = Vec::new();
        for group_id in self.store.groups_for_member(member).await? {
            logs.push(self.store.load_group_log(group_id).await?);
        }
        summarize(member, &logs, window, Utc::now()).map_err(|err| {
            if err.is_integrity() {
                error!(member = %member, error = %err, "ledger integrity violation");
            }
            ServiceError::Domain(err)
        })
    }

    /// Apply a balance-affecting write at most once per idempotency key.
    pub async fn mutate(
        &self,
        actor: &MemberId,
        idempotency_key: Option<&str>,
        op: MutationOp,
    ) -> Result<MutationResponse, MutationError> {
        self.gate.execute(actor, idempotency_key, op).await
    }

    async fn require_group(&self, group_id: GroupId) -> Result<GroupRecord, ServiceError> {
        Ok(self
            .store
            .group(group_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("group {group_id}")))?)
    }
}

fn integrity(group_id: GroupId, err: DomainError) -> ServiceError {
    if err.is_integrity() {
        error!(group_id = %group_id, error = %err, "ledger integrity violation");
    }
    ServiceError::Domain(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use splitledger_core::Amount;
    use splitledger_ledger::{Direction, ExpenseDraft, SettlementDraft, Share, Split};

    use crate::activity::ActivityKind;
    use crate::store::InMemoryLedgerStore;

    async fn trip() -> (LedgerService<InMemoryLedgerStore>, GroupId) {
        let service = LedgerService::new(InMemoryLedgerStore::new());
        let group = service.create_group("Lisbon trip", &"a".into()).await.unwrap();
        for member in ["b", "c"] {
            service.add_member(group.id, &"a".into(), &member.into()).await.unwrap();
        }
        (service, group.id)
    }

    fn even(group_id: GroupId, payer: &str, total: i64, members: &[&str]) -> MutationOp {
        MutationOp::CreateExpense {
            group_id,
            draft: ExpenseDraft {
                description: None,
                payer: payer.into(),
                total: Amount::new(total),
                split: Split::Even {
                    members: members.iter().map(|m| MemberId::from(*m)).collect(),
                },
            },
        }
    }

    #[tokio::test]
    async fn group_name_length_is_enforced() {
        let service = LedgerService::new(InMemoryLedgerStore::new());
        let err = service.create_group(" ab ", &"a".into()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation(_))));
        assert!(service.create_group(&"x".repeat(51), &"a".into()).await.is_err());
        assert!(service.create_group("abc", &"a".into()).await.is_ok());
    }

    #[tokio::test]
    async fn balances_follow_scenario_d() {
        let (service, group_id) = trip().await;
        service
            .mutate(&"a".into(), Some("e1"), even(group_id, "a", 300, &["a", "b", "c"]))
            .await
            .unwrap();
        service
            .mutate(&"b".into(), Some("e2"), even(group_id, "b", 90, &["b", "c"]))
            .await
            .unwrap();

        let balances = service.compute_balances(group_id).await.unwrap();
        assert_eq!(balances[&MemberId::from("a")], Amount::new(200));
        assert_eq!(balances[&MemberId::from("b")], Amount::new(-55));
        assert_eq!(balances[&MemberId::from("c")], Amount::new(-145));
        assert_eq!(Amount::sum(balances.values().copied()).unwrap(), Amount::ZERO);
    }

    #[tokio::test]
    async fn suggestions_use_stored_mode_unless_overridden() {
        let (service, group_id) = trip().await;
        // a paid for b, b paid for c.
        service
            .mutate(
                &"a".into(),
                Some("e1"),
                MutationOp::CreateExpense {
                    group_id,
                    draft: ExpenseDraft {
                        description: None,
                        payer: "a".into(),
                        total: Amount::new(100),
                        split: Split::Exact { shares: vec![Share::new("b", 100)] },
                    },
                },
            )
            .await
            .unwrap();
        service
            .mutate(
                &"b".into(),
                Some("e2"),
                MutationOp::CreateExpense {
                    group_id,
                    draft: ExpenseDraft {
                        description: None,
                        payer: "b".into(),
                        total: Amount::new(100),
                        split: Split::Exact { shares: vec![Share::new("c", 100)] },
                    },
                },
            )
            .await
            .unwrap();

        let direct = service.suggest_settlements(group_id, &"c".into(), None).await.unwrap();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].counterparty, MemberId::from("b"));

        let mode = service.toggle_settlement_mode(group_id, &"a".into()).await.unwrap();
        assert_eq!(mode, SettlementMode::Simplified);

        let simplified = service.suggest_settlements(group_id, &"c".into(), None).await.unwrap();
        assert_eq!(simplified.len(), 1);
        assert_eq!(simplified[0].counterparty, MemberId::from("a"));
        assert_eq!(simplified[0].direction, Direction::Payable);

        let forced = service
            .suggest_settlements(group_id, &"c".into(), Some(SettlementMode::Direct))
            .await
            .unwrap();
        assert_eq!(forced, direct);
    }

    #[tokio::test]
    async fn settlement_clears_the_debt() {
        let (service, group_id) = trip().await;
        service
            .mutate(&"a".into(), Some("e1"), even(group_id, "a", 1000, &["a", "b"]))
            .await
            .unwrap();
        let settle = MutationOp::CreateSettlement {
            group_id,
            draft: SettlementDraft {
                from: "b".into(),
                to: "a".into(),
                amount: Amount::new(500),
            },
        };
        let response = service.mutate(&"b".into(), Some("s1"), settle).await.unwrap();
        assert_eq!(response.status, 201);

        let balances = service.compute_balances(group_id).await.unwrap();
        assert!(balances.values().all(|a| a.is_zero()));
        assert!(service
            .suggest_settlements(group_id, &"b".into(), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn outsiders_cannot_manage_a_group() {
        let (service, group_id) = trip().await;
        let err = service
            .add_member(group_id, &"mallory".into(), &"eve".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Forbidden(_))));

        let err = service.toggle_settlement_mode(GroupId::new(), &"a".into()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let service = LedgerService::new(InMemoryLedgerStore::new());
        let err = service.compute_balances(GroupId::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::NotFound(_))));
        assert!(!err.is_integrity());
    }

    #[tokio::test]
    async fn summary_spans_groups() {
        let (service, trip_id) = trip().await;
        let flat = service.create_group("Flat", &"b".into()).await.unwrap();
        service.add_member(flat.id, &"b".into(), &"a".into()).await.unwrap();

        service
            .mutate(&"a".into(), Some("e1"), even(trip_id, "a", 300, &["a", "b", "c"]))
            .await
            .unwrap();
        service
            .mutate(&"b".into(), Some("e2"), even(flat.id, "b", 40, &["a", "b"]))
            .await
            .unwrap();

        let summary = service.member_summary(&"a".into(), SpendingWindow::AllTime).await.unwrap();
        // b owes 100 in the trip, a owes b 20 in the flat: net 80 from b; c owes 100.
        assert_eq!(summary.total_owed, Amount::new(180));
        assert_eq!(summary.people_owing, 2);
        assert_eq!(summary.total_owes, Amount::ZERO);
        assert_eq!(summary.total_spending, Amount::new(120));
    }

    #[tokio::test]
    async fn expenses_page_newest_first() {
        let (service, group_id) = trip().await;
        for (idx, total) in [100, 200, 300].into_iter().enumerate() {
            service
                .mutate(&"a".into(), Some(format!("e{idx}").as_str()), even(group_id, "a", total, &["a", "b"]))
                .await
                .unwrap();
        }

        let page = service
            .list_expenses(group_id, Pagination::new(Some(2), None))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.items[0].total, Amount::new(300));
    }

    fn settle(group_id: GroupId, from: &str, to: &str, amount: i64) -> MutationOp {
        MutationOp::CreateSettlement {
            group_id,
            draft: SettlementDraft {
                from: from.into(),
                to: to.into(),
                amount: Amount::new(amount),
            },
        }
    }

    #[tokio::test]
    async fn member_with_open_debts_cannot_be_removed() {
        let (service, group_id) = trip().await;
        service
            .mutate(&"a".into(), Some("e1"), even(group_id, "a", 100, &["a", "b"]))
            .await
            .unwrap();

        let err = service
            .remove_member(group_id, &"a".into(), &"b".into())
            .await
            .unwrap_err();
        match err {
            ServiceError::OutstandingDebts { member, debts } => {
                assert_eq!(member, MemberId::from("b"));
                assert_eq!(debts.len(), 1);
                assert_eq!(debts[0].counterparty, MemberId::from("a"));
                assert_eq!(debts[0].amount, Amount::new(-50));
            }
            other => panic!("expected outstanding debts, got {other:?}"),
        }

        let members = service.store().load_group_log(group_id).await.unwrap().members;
        assert!(members.contains(&MemberId::from("b")));
    }

    #[tokio::test]
    async fn removal_guards_match_membership() {
        let (service, group_id) = trip().await;

        let err = service
            .remove_member(group_id, &"a".into(), &"a".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation(_))));

        let err = service
            .remove_member(group_id, &"a".into(), &"zed".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::NotFound(_))));

        let err = service
            .remove_member(group_id, &"mallory".into(), &"b".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Forbidden(_))));
    }

    #[tokio::test]
    async fn former_member_still_counts_towards_balances() {
        let (service, group_id) = trip().await;
        service
            .mutate(&"a".into(), Some("e1"), even(group_id, "a", 100, &["a", "b"]))
            .await
            .unwrap();
        service
            .mutate(&"b".into(), Some("s1"), settle(group_id, "b", "a", 50))
            .await
            .unwrap();
        service
            .mutate(&"c".into(), Some("e2"), even(group_id, "c", 60, &["a", "c"]))
            .await
            .unwrap();

        service
            .remove_member(group_id, &"a".into(), &"b".into())
            .await
            .unwrap();

        let balances = service.compute_balances(group_id).await.unwrap();
        assert_eq!(balances.len(), 3);
        assert_eq!(balances[&MemberId::from("b")], Amount::ZERO);
        assert_eq!(balances[&MemberId::from("a")], Amount::new(-30));
        assert_eq!(balances[&MemberId::from("c")], Amount::new(30));

        // A former member can no longer be named in new records.
        let response = service
            .mutate(&"a".into(), Some("e3"), even(group_id, "a", 10, &["a", "b"]))
            .await
            .unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.body["error"], "not_member");
    }

    #[tokio::test]
    async fn activity_feed_spans_the_requesters_groups() {
        let (service, trip_id) = trip().await;
        let other = service.create_group("Other", &"z".into()).await.unwrap();
        service.add_member(other.id, &"z".into(), &"y".into()).await.unwrap();

        service
            .mutate(&"a".into(), Some("e1"), even(trip_id, "a", 90, &["a", "b", "c"]))
            .await
            .unwrap();
        service.toggle_settlement_mode(trip_id, &"b".into()).await.unwrap();

        let feed = service.activities(&"a".into(), Pagination::default()).await.unwrap();
        let kinds: Vec<ActivityKind> = feed.items.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActivityKind::SimplifyDebts,
                ActivityKind::ExpenseCreate,
                ActivityKind::GroupJoin,
                ActivityKind::GroupJoin,
            ]
        );
        assert!(feed.items.iter().all(|a| a.group_id == trip_id));

        let outsider = service.activities(&"nobody".into(), Pagination::default()).await.unwrap();
        assert_eq!(outsider.total, 0);
        assert!(outsider.items.is_empty());
    }
}
