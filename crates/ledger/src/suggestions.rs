//! Settlement suggestions from one member's point of view.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use splitledger_core::{Amount, DomainError, DomainResult, MemberId};

use crate::balances::{Balances, group_balances, pairwise_balances};
use crate::model::GroupLog;
use crate::simplify::{Transfer, simplify};

/// Per-group policy for how debts are presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
    /// Only pairwise balances against members the requester transacted with.
    #[default]
    Direct,
    /// Net the whole group, then simplify. May pair members who never
    /// transacted directly.
    Simplified,
}

impl SettlementMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SettlementMode::Direct => "direct",
            SettlementMode::Simplified => "simplified",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            SettlementMode::Direct => SettlementMode::Simplified,
            SettlementMode::Simplified => SettlementMode::Direct,
        }
    }
}

impl FromStr for SettlementMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(SettlementMode::Direct),
            "simplified" => Ok(SettlementMode::Simplified),
            other => Err(DomainError::validation(format!(
                "unknown settlement mode '{other}' (expected direct or simplified)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// The requester pays the counterparty.
    Payable,
    /// The counterparty pays the requester.
    Receivable,
}

/// One line of the requester's settle-up view.
///
/// `amount` is signed from the requester's side: negative when payable,
/// positive when receivable. [`Suggestion::magnitude`] gives the amount to
/// move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub counterparty: MemberId,
    pub amount: Amount,
    pub direction: Direction,
}

impl Suggestion {
    pub fn magnitude(&self) -> DomainResult<Amount> {
        self.amount.abs()
    }
}

/// Settle-up view of `member` under `mode`.
pub fn suggest(log: &GroupLog, member: &MemberId, mode: SettlementMode) -> DomainResult<Vec<Suggestion>> {
    match mode {
        SettlementMode::Simplified => {
            let balances = group_balances(log)?;
            let transfers = simplify(&balances)?;
            Ok(from_transfers(&transfers, member))
        }
        SettlementMode::Direct => {
            let pairwise = pairwise_balances(log, member)?;
            Ok(from_pairwise(&pairwise))
        }
    }
}

/// Keep only transfers touching `member` and label them.
pub fn from_transfers(transfers: &[Transfer], member: &MemberId) -> Vec<Suggestion> {
    transfers
        .iter()
        .filter_map(|t| {
            if &t.from == member {
                Some(Suggestion {
                    counterparty: t.to.clone(),
                    amount: -t.amount,
                    direction: Direction::Payable,
                })
            } else if &t.to == member {
                Some(Suggestion {
                    counterparty: t.from.clone(),
                    amount: t.amount,
                    direction: Direction::Receivable,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Label each non-zero pairwise balance.
pub fn from_pairwise(pairwise: &Balances) -> Vec<Suggestion> {
    pairwise
        .iter()
        .filter(|(_, amount)| !amount.is_zero())
        .map(|(counterparty, amount)| Suggestion {
            counterparty: counterparty.clone(),
            amount: *amount,
            direction: if amount.is_positive() {
                Direction::Receivable
            } else {
                Direction::Payable
            },
        })
        .collect()
}
