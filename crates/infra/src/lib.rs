//! Infrastructure layer: storage backends, the idempotent mutation gate, the
//! service facade, the activity feed, background maintenance, and
//! configuration.

pub mod activity;
pub mod config;
pub mod gate;
pub mod reaper;
pub mod service;
pub mod store;

pub use activity::{Activity, ActivityKind};
pub use config::{ConfigError, LedgerConfig};
pub use gate::{MutationError, MutationGate, MutationOp, MutationResponse};
pub use reaper::{ClaimReaper, ReaperHandle};
pub use service::{LedgerService, ServiceError};
pub use store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError, UnitOfWork};
