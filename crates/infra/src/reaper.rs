//! Background expiry of abandoned idempotency claims.
//!
//! A crash between claim insert and completion leaves the key `Pending`
//! forever, so every retry would see `InProgress`. The reaper deletes pending
//! claims older than the TTL, after which the key can be claimed again.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::store::{LedgerStore, StoreError};

#[derive(Debug, Clone)]
pub struct ClaimReaper<S> {
    store: S,
    ttl: Duration,
}

/// Handle for the running reaper task.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for the in-flight pass (if any) to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.join.await {
            warn!(error = %err, "claim reaper task ended abnormally");
        }
    }
}

impl<S> ClaimReaper<S>
where
    S: LedgerStore + 'static,
{
    pub fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Delete pending claims older than the TTL. Returns how many.
    pub async fn reap_once(&self) -> Result<u64, StoreError> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(ttl)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let reaped = self.store.reap_stale_claims(cutoff).await?;
        if reaped > 0 {
            warn!(reaped, ttl_secs = self.ttl.as_secs(), "expired abandoned idempotency claims");
        } else {
            debug!("no abandoned idempotency claims");
        }
        Ok(reaped)
    }

    /// Run [`ClaimReaper::reap_once`] every `interval` until shut down.
    /// Failures are logged and the next tick tries again.
    pub fn spawn(self, interval: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "claim reaper started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.reap_once().await {
                            warn!(error = %err, "claim reaper pass failed");
                        }
                    }
                }
            }

            info!("claim reaper stopped");
        });

        ReaperHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}
