//! Ledger aggregation: net balances derived from the transaction log.
//!
//! For member `m`:
//!
//! ```text
//! balance(m) = Σ expense.total   where payer == m
//!            − Σ share.amount    where share.member == m
//!            + Σ settlement.amount where from == m
//!            − Σ settlement.amount where to == m
//! ```
//!
//! Positive = owed money, negative = owes money. Nothing is cached; every call
//! recomputes from the records it is given.

use std::collections::BTreeMap;

use splitledger_core::{Amount, DomainError, DomainResult, MemberId};

use crate::model::GroupLog;

/// Signed balance per member, ordered by member id.
pub type Balances = BTreeMap<MemberId, Amount>;

/// Full net balance of every member across the whole group.
///
/// Every current member is present (zero when inactive). Former members that
/// still appear in the log are reported too, so no units ever disappear.
pub fn group_balances(log: &GroupLog) -> DomainResult<Balances> {
    let mut balances: Balances = log
        .members
        .iter()
        .map(|m| (m.clone(), Amount::ZERO))
        .collect();

    for expense in &log.expenses {
        credit(&mut balances, &expense.payer, expense.total)?;
        for share in &expense.shares {
            credit(&mut balances, &share.member, -share.amount)?;
        }
    }

    for settlement in &log.settlements {
        credit(&mut balances, &settlement.from, settlement.amount)?;
        credit(&mut balances, &settlement.to, -settlement.amount)?;
    }

    ensure_zero_sum(&balances)?;
    Ok(balances)
}

/// Net position of `subject` against each counterparty it transacted with
/// directly.
///
/// Positive = the counterparty owes `subject`; negative = `subject` owes the
/// counterparty. Only records linking both parties count. Counterparties whose
/// net is zero are omitted.
pub fn pairwise_balances(log: &GroupLog, subject: &MemberId) -> DomainResult<Balances> {
    let mut net = Balances::new();

    for expense in &log.expenses {
        if &expense.payer == subject {
            for share in &expense.shares {
                if &share.member != subject {
                    credit(&mut net, &share.member, share.amount)?;
                }
            }
        } else if let Some(own) = expense.shares.iter().find(|s| &s.member == subject) {
            credit(&mut net, &expense.payer, -own.amount)?;
        }
    }

    for settlement in &log.settlements {
        if &settlement.from == subject {
            credit(&mut net, &settlement.to, settlement.amount)?;
        } else if &settlement.to == subject {
            credit(&mut net, &settlement.from, -settlement.amount)?;
        }
    }

    net.retain(|_, amount| !amount.is_zero());
    Ok(net)
}

/// Fail loudly if a balance map does not sum to exactly zero.
pub fn ensure_zero_sum(balances: &Balances) -> DomainResult<()> {
    let total = Amount::sum(balances.values().copied())?;
    if total.is_zero() {
        Ok(())
    } else {
        Err(DomainError::invariant(format!(
            "group balances sum to {total}, expected 0"
        )))
    }
}

fn credit(balances: &mut Balances, member: &MemberId, amount: Amount) -> DomainResult<()> {
    let slot = balances.entry(member.clone()).or_insert(Amount::ZERO);
    *slot = slot.checked_add(amount)?;
    Ok(())
}
