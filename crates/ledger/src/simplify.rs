//! Debt simplification.
//!
//! Deterministic greedy two-pointer merge over pre-sorted debtors and
//! creditors. Produces at most `debtors + creditors - 1` transfers. It does
//! not search for the theoretical minimum transfer count (that is an NP-hard
//! partitioning problem).

use serde::{Deserialize, Serialize};

use splitledger_core::{Amount, DomainError, DomainResult, MemberId};

use crate::balances::Balances;

/// A directed payment that, applied to the balances, moves both parties
/// towards zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: MemberId,
    pub to: MemberId,
    pub amount: Amount,
}

#[derive(Debug)]
struct Position<'a> {
    member: &'a MemberId,
    /// Remaining magnitude, always non-negative.
    remaining: i64,
}

/// Reduce a balance map to transfers that zero every entry.
///
/// Fails with an invariant violation when the balances do not net to zero
/// (debtors and creditors fail to exhaust together).
pub fn simplify(balances: &Balances) -> DomainResult<Vec<Transfer>> {
    let (debtors, creditors) = partition(balances)?;
    merge(debtors, creditors)
}

/// Split and order members. Debtors most-negative first, creditors
/// most-positive first, ties broken by member id.
fn partition(balances: &Balances) -> DomainResult<(Vec<Position<'_>>, Vec<Position<'_>>)> {
    let mut debtors = Vec::new();
    let mut creditors = Vec::new();

    for (member, balance) in balances {
        if balance.is_negative() {
            debtors.push(Position {
                member,
                remaining: balance.abs()?.minor(),
            });
        } else if balance.is_positive() {
            creditors.push(Position {
                member,
                remaining: balance.minor(),
            });
        }
    }

    let by_magnitude = |a: &Position<'_>, b: &Position<'_>| {
        b.remaining
            .cmp(&a.remaining)
            .then_with(|| a.member.cmp(b.member))
    };
    debtors.sort_by(by_magnitude);
    creditors.sort_by(by_magnitude);

    Ok((debtors, creditors))
}

fn merge(mut debtors: Vec<Position<'_>>, mut creditors: Vec<Position<'_>>) -> DomainResult<Vec<Transfer>> {
    let capacity = (debtors.len() + creditors.len()).saturating_sub(1);
    let mut transfers = Vec::with_capacity(capacity);

    let mut i = 0;
    let mut j = 0;
    while i < debtors.len() && j < creditors.len() {
        let debtor = &mut debtors[i];
        let creditor = &mut creditors[j];

        let amount = debtor.remaining.min(creditor.remaining);
        transfers.push(Transfer {
            from: debtor.member.clone(),
            to: creditor.member.clone(),
            amount: Amount::new(amount),
        });

        debtor.remaining -= amount;
        creditor.remaining -= amount;

        if debtor.remaining == 0 {
            i += 1;
        }
        if creditor.remaining == 0 {
            j += 1;
        }
    }

    if i < debtors.len() || j < creditors.len() {
        let stranded = debtors[i..]
            .iter()
            .chain(creditors[j..].iter())
            .fold(0i64, |acc, p| acc.saturating_add(p.remaining));
        return Err(DomainError::invariant(format!(
            "debtors and creditors did not exhaust together ({stranded} minor units stranded)"
        )));
    }

    Ok(transfers)
}
