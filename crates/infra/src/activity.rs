//! Group activity feed entries.
//!
//! One entry is written in the same unit of work as every membership change,
//! settlement-mode change and gated ledger write, so the feed never shows a
//! change that was rolled back.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use splitledger_core::{ActivityId, DomainError, GroupId, MemberId};
use splitledger_ledger::{Expense, Settlement, SettlementMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    GroupJoin,
    GroupLeave,
    ExpenseCreate,
    ExpenseUpdate,
    ExpenseDelete,
    SettlementCreate,
    SimplifyDebts,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::GroupJoin => "group_join",
            ActivityKind::GroupLeave => "group_leave",
            ActivityKind::ExpenseCreate => "expense_create",
            ActivityKind::ExpenseUpdate => "expense_update",
            ActivityKind::ExpenseDelete => "expense_delete",
            ActivityKind::SettlementCreate => "settlement_create",
            ActivityKind::SimplifyDebts => "simplify_debts",
        }
    }
}

impl FromStr for ActivityKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group_join" => Ok(ActivityKind::GroupJoin),
            "group_leave" => Ok(ActivityKind::GroupLeave),
            "expense_create" => Ok(ActivityKind::ExpenseCreate),
            "expense_update" => Ok(ActivityKind::ExpenseUpdate),
            "expense_delete" => Ok(ActivityKind::ExpenseDelete),
            "settlement_create" => Ok(ActivityKind::SettlementCreate),
            "simplify_debts" => Ok(ActivityKind::SimplifyDebts),
            other => Err(DomainError::validation(format!("unknown activity kind '{other}'"))),
        }
    }
}

/// A feed entry. `member` is who the entry is about: the member who joined or
/// left, or the actor of a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub group_id: GroupId,
    pub member: MemberId,
    pub kind: ActivityKind,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(group_id: GroupId, member: MemberId, kind: ActivityKind, metadata: JsonValue) -> Self {
        Self {
            id: ActivityId::new(),
            group_id,
            member,
            kind,
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn member_joined(group_id: GroupId, member: &MemberId, added_by: &MemberId) -> Self {
        Self::new(group_id, member.clone(), ActivityKind::GroupJoin, json!({ "added_by": added_by }))
    }

    pub fn member_left(group_id: GroupId, member: &MemberId, removed_by: &MemberId) -> Self {
        Self::new(group_id, member.clone(), ActivityKind::GroupLeave, json!({ "removed_by": removed_by }))
    }

    pub fn settlement_mode_changed(group_id: GroupId, actor: &MemberId, mode: SettlementMode) -> Self {
        Self::new(
            group_id,
            actor.clone(),
            ActivityKind::SimplifyDebts,
            json!({ "settlement_mode": mode.as_str() }),
        )
    }

    pub fn expense(kind: ActivityKind, actor: &MemberId, expense: &Expense) -> Self {
        Self::new(
            expense.group_id,
            actor.clone(),
            kind,
            json!({
                "expense_id": expense.id,
                "description": expense.description,
                "payer": expense.payer,
                "amount": expense.total,
            }),
        )
    }

    pub fn settlement_created(actor: &MemberId, settlement: &Settlement) -> Self {
        Self::new(
            settlement.group_id,
            actor.clone(),
            ActivityKind::SettlementCreate,
            json!({
                "settlement_id": settlement.id,
                "from": settlement.from,
                "to": settlement.to,
                "amount": settlement.amount,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            ActivityKind::GroupJoin,
            ActivityKind::GroupLeave,
            ActivityKind::ExpenseCreate,
            ActivityKind::ExpenseUpdate,
            ActivityKind::ExpenseDelete,
            ActivityKind::SettlementCreate,
            ActivityKind::SimplifyDebts,
        ] {
            assert_eq!(kind.as_str().parse::<ActivityKind>().unwrap(), kind);
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
        assert!("expense_moved".parse::<ActivityKind>().is_err());
    }

    #[test]
    fn membership_entries_name_who_acted() {
        let group_id = GroupId::new();
        let left = Activity::member_left(group_id, &"bob".into(), &"alice".into());
        assert_eq!(left.member, MemberId::from("bob"));
        assert_eq!(left.kind, ActivityKind::GroupLeave);
        assert_eq!(left.metadata["removed_by"], json!("alice"));
    }
}
