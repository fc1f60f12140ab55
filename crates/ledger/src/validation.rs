//! Write-time validation.
//!
//! Nothing reaches the transaction log without passing through here. Amount
//! comparisons use exact integer equality; there is no tolerance.
//!
//! Two bounds keep the read path total: each record is capped at
//! [`Amount::MAX_RECORD`], and [`ensure_headroom`] keeps a group's gross
//! volume (every expense total plus every settlement amount) within `i64`.
//! Every partial sum the balance fold computes is bounded by that volume.

use std::collections::{BTreeSet, HashSet};

use splitledger_core::{Amount, DomainError, DomainResult, ExpenseId, MemberId};

use crate::model::{ExpenseDraft, GroupLog, SettlementDraft, Share};

const MAX_DESCRIPTION_LEN: usize = 255;

/// Validate an expense draft against the group's current members.
///
/// Returns the resolved share list on success.
pub fn validate_expense(draft: &ExpenseDraft, members: &BTreeSet<MemberId>) -> DomainResult<Vec<Share>> {
    if !draft.total.is_positive() {
        return Err(DomainError::validation("total amount must be positive"));
    }
    ensure_within_ceiling("total amount", draft.total)?;

    if let Some(description) = &draft.description {
        if description.trim().chars().count() > MAX_DESCRIPTION_LEN {
            return Err(DomainError::validation(format!(
                "description must be at most {MAX_DESCRIPTION_LEN} characters"
            )));
        }
    }

    let shares = draft.resolve_shares()?;
    if shares.is_empty() {
        return Err(DomainError::validation("at least one member must share the expense"));
    }

    let mut seen = HashSet::with_capacity(shares.len());
    for share in &shares {
        if share.amount.is_negative() {
            return Err(DomainError::validation(format!(
                "share for {} cannot be negative",
                share.member
            )));
        }
        if !seen.insert(&share.member) {
            return Err(DomainError::validation(format!(
                "member {} appears more than once in the split",
                share.member
            )));
        }
    }

    let sum = Amount::sum(shares.iter().map(|s| s.amount))
        .map_err(|_| DomainError::validation("sum of shares is out of range"))?;
    if sum != draft.total {
        return Err(DomainError::validation(format!(
            "total amount ({}) does not equal the sum of shares ({})",
            draft.total, sum
        )));
    }

    ensure_member(members, &draft.payer)?;
    for share in &shares {
        ensure_member(members, &share.member)?;
    }

    Ok(shares)
}

/// Validate a settlement draft against the group's current members.
pub fn validate_settlement(draft: &SettlementDraft, members: &BTreeSet<MemberId>) -> DomainResult<()> {
    if draft.from == draft.to {
        return Err(DomainError::validation("cannot settle with yourself"));
    }
    if !draft.amount.is_positive() {
        return Err(DomainError::validation("settlement amount must be positive"));
    }
    ensure_within_ceiling("settlement amount", draft.amount)?;

    ensure_member(members, &draft.from)?;
    ensure_member(members, &draft.to)?;
    Ok(())
}

/// Check that adding a record of `incoming` to the group keeps its gross
/// volume representable. `replacing` names an expense the write supersedes,
/// whose total no longer counts.
pub fn ensure_headroom(log: &GroupLog, replacing: Option<ExpenseId>, incoming: Amount) -> DomainResult<()> {
    let volume = log
        .expenses
        .iter()
        .filter(|e| Some(e.id) != replacing)
        .map(|e| e.total)
        .chain(log.settlements.iter().map(|s| s.amount))
        .chain(core::iter::once(incoming))
        .try_fold(0i64, |acc, amount| acc.checked_add(amount.minor()));

    match volume {
        Some(_) => Ok(()),
        None => Err(DomainError::validation(
            "group has reached the maximum recordable volume",
        )),
    }
}

fn ensure_within_ceiling(what: &str, amount: Amount) -> DomainResult<()> {
    if amount > Amount::MAX_RECORD {
        return Err(DomainError::validation(format!(
            "{what} must be at most {} minor units",
            Amount::MAX_RECORD
        )));
    }
    Ok(())
}

fn ensure_member(members: &BTreeSet<MemberId>, member: &MemberId) -> DomainResult<()> {
    if members.contains(member) {
        Ok(())
    } else {
        Err(DomainError::NotMember(member.clone()))
    }
}
