//! Shared-expense ledger (balances, debt simplification).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod balances;
pub mod model;
pub mod simplify;
pub mod suggestions;
pub mod summary;
pub mod validation;

pub use balances::{Balances, group_balances, pairwise_balances};
pub use model::{Expense, ExpenseDraft, GroupLog, Settlement, SettlementDraft, Share, Split};
pub use simplify::{Transfer, simplify};
pub use suggestions::{Direction, SettlementMode, Suggestion, suggest};
pub use summary::{MemberSummary, SpendingWindow, summarize};
pub use validation::{ensure_headroom, validate_expense, validate_settlement};
