//! Cross-group dashboard figures for one member.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use splitledger_core::{Amount, DomainError, DomainResult, MemberId};

use crate::balances::{Balances, pairwise_balances};
use crate::model::GroupLog;

/// Time window for the spending total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendingWindow {
    ThisMonth,
    ThisYear,
    #[default]
    AllTime,
}

impl SpendingWindow {
    /// Inclusive lower bound of the window, or `None` when unbounded.
    pub fn start(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let first_day = match self {
            SpendingWindow::ThisMonth => NaiveDate::from_ymd_opt(now.year(), now.month(), 1),
            SpendingWindow::ThisYear => NaiveDate::from_ymd_opt(now.year(), 1, 1),
            SpendingWindow::AllTime => return None,
        };
        first_day
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }
}

impl FromStr for SpendingWindow {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "this_month" => Ok(SpendingWindow::ThisMonth),
            "this_year" => Ok(SpendingWindow::ThisYear),
            "all_time" => Ok(SpendingWindow::AllTime),
            other => Err(DomainError::validation(format!("unknown window '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSummary {
    /// Sum of what others owe the member.
    pub total_owed: Amount,
    /// Sum of what the member owes others (as a magnitude).
    pub total_owes: Amount,
    /// Number of counterparties who owe the member.
    pub people_owing: usize,
    /// Number of counterparties the member owes.
    pub people_owed: usize,
    /// Member's own share of expenses created within the window.
    pub total_spending: Amount,
}

/// Summarize `member`'s position across `logs` (one per group).
///
/// Pairwise nets are combined per counterparty across groups before being
/// split into owed/owes.
pub fn summarize(
    member: &MemberId,
    logs: &[GroupLog],
    window: SpendingWindow,
    now: DateTime<Utc>,
) -> DomainResult<MemberSummary> {
    let mut combined = Balances::new();
    let mut spending = Amount::ZERO;
    let since = window.start(now);

    for log in logs {
        for (counterparty, amount) in pairwise_balances(log, member)? {
            let slot = combined.entry(counterparty).or_insert(Amount::ZERO);
            *slot = slot.checked_add(amount)?;
        }

        for expense in &log.expenses {
            if since.is_some_and(|start| expense.created_at < start) {
                continue;
            }
            for share in expense.shares.iter().filter(|s| &s.member == member) {
                spending = spending.checked_add(share.amount)?;
            }
        }
    }

    let mut summary = MemberSummary {
        total_spending: spending,
        ..MemberSummary::default()
    };
    for amount in combined.values() {
        if amount.is_positive() {
            summary.total_owed = summary.total_owed.checked_add(*amount)?;
            summary.people_owing += 1;
        } else if amount.is_negative() {
            summary.total_owes = summary.total_owes.checked_add(amount.abs()?)?;
            summary.people_owed += 1;
        }
    }

    Ok(summary)
}
