//! Ledger records: expenses, shares, settlements, and the drafts they are
//! created from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use splitledger_core::{Amount, DomainResult, ExpenseId, GroupId, MemberId, SettlementId, split_evenly};

/// One member's portion of an expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub member: MemberId,
    /// Non-negative amount in minor units.
    pub amount: Amount,
}

impl Share {
    pub fn new(member: impl Into<MemberId>, amount: i64) -> Self {
        Self {
            member: member.into(),
            amount: Amount::new(amount),
        }
    }
}

/// How an expense total is divided among members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Split {
    /// Caller-supplied shares, taken as-is.
    Exact { shares: Vec<Share> },
    /// Divide the total evenly among `members`, remainder to the first ones.
    Even { members: Vec<MemberId> },
}

/// Expense as submitted by a client, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseDraft {
    #[serde(default)]
    pub description: Option<String>,
    pub payer: MemberId,
    pub total: Amount,
    pub split: Split,
}

impl ExpenseDraft {
    /// Concrete share list for this draft, in declared order.
    pub fn resolve_shares(&self) -> DomainResult<Vec<Share>> {
        match &self.split {
            Split::Exact { shares } => Ok(shares.clone()),
            Split::Even { members } => {
                let amounts = split_evenly(self.total, members.len())?;
                Ok(members
                    .iter()
                    .cloned()
                    .zip(amounts)
                    .map(|(member, amount)| Share { member, amount })
                    .collect())
            }
        }
    }
}

/// A committed expense: `payer` paid `total`, each share member owes their
/// share of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub group_id: GroupId,
    pub description: Option<String>,
    pub payer: MemberId,
    pub total: Amount,
    pub shares: Vec<Share>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Expense {
    /// Build a record from a draft whose shares were already validated.
    pub fn from_validated(
        id: ExpenseId,
        group_id: GroupId,
        draft: ExpenseDraft,
        shares: Vec<Share>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            group_id,
            description: normalize_description(draft.description),
            payer: draft.payer,
            total: draft.total,
            shares,
            created_at,
            updated_at: None,
        }
    }

    /// Replace every mutable field at once, keeping identity and creation time.
    pub fn replaced_by(&self, draft: ExpenseDraft, shares: Vec<Share>, at: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            group_id: self.group_id,
            description: normalize_description(draft.description),
            payer: draft.payer,
            total: draft.total,
            shares,
            created_at: self.created_at,
            updated_at: Some(at),
        }
    }

    /// Whether `member` took part in this expense as payer or share holder.
    pub fn involves(&self, member: &MemberId) -> bool {
        &self.payer == member || self.shares.iter().any(|s| &s.member == member)
    }
}

/// Settlement as submitted by a client, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementDraft {
    pub from: MemberId,
    pub to: MemberId,
    pub amount: Amount,
}

/// A committed direct payment from `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: SettlementId,
    pub group_id: GroupId,
    pub from: MemberId,
    pub to: MemberId,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

impl Settlement {
    pub fn from_validated(
        id: SettlementId,
        group_id: GroupId,
        draft: SettlementDraft,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            group_id,
            from: draft.from,
            to: draft.to,
            amount: draft.amount,
            created_at,
        }
    }
}

/// Everything the aggregator needs for one group, read in one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupLog {
    /// Current members. Members with no activity still report a zero balance.
    pub members: Vec<MemberId>,
    pub expenses: Vec<Expense>,
    pub settlements: Vec<Settlement>,
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_split_resolves_in_declared_order() {
        let draft = ExpenseDraft {
            description: None,
            payer: "x".into(),
            total: Amount::new(100),
            split: Split::Even {
                members: vec!["x".into(), "y".into(), "z".into()],
            },
        };

        let shares = draft.resolve_shares().unwrap();
        assert_eq!(
            shares,
            vec![Share::new("x", 34), Share::new("y", 33), Share::new("z", 33)]
        );
    }

    #[test]
    fn split_uses_tagged_json() {
        let json = serde_json::json!({
            "payer": "alice",
            "total": 1000,
            "split": { "kind": "exact", "shares": [
                { "member": "alice", "amount": 500 },
                { "member": "bob", "amount": 500 }
            ]}
        });

        let draft: ExpenseDraft = serde_json::from_value(json).unwrap();
        assert_eq!(draft.description, None);
        assert_eq!(draft.resolve_shares().unwrap().len(), 2);
    }

    #[test]
    fn replacement_keeps_identity() {
        let draft = ExpenseDraft {
            description: Some("  dinner ".into()),
            payer: "a".into(),
            total: Amount::new(10),
            split: Split::Exact { shares: vec![Share::new("a", 10)] },
        };
        let shares = draft.resolve_shares().unwrap();
        let original = Expense::from_validated(
            ExpenseId::new(),
            GroupId::new(),
            draft.clone(),
            shares.clone(),
            Utc::now(),
        );
        assert_eq!(original.description.as_deref(), Some("dinner"));

        let replaced = original.replaced_by(draft, shares, Utc::now());
        assert_eq!(replaced.id, original.id);
        assert_eq!(replaced.created_at, original.created_at);
        assert!(replaced.updated_at.is_some());
    }
}
