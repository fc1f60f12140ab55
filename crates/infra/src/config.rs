//! Process configuration from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use splitledger_observability::LogFormat;

pub const BIND_ADDR_VAR: &str = "SPLITLEDGER_BIND_ADDR";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const CLAIM_TTL_VAR: &str = "SPLITLEDGER_CLAIM_TTL_SECS";
pub const REAPER_INTERVAL_VAR: &str = "SPLITLEDGER_REAPER_INTERVAL_SECS";
pub const LOG_FORMAT_VAR: &str = "SPLITLEDGER_LOG_FORMAT";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_CLAIM_TTL_SECS: u64 = 300;
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub bind_addr: SocketAddr,
    /// Postgres connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Age after which a pending idempotency claim counts as abandoned.
    pub claim_ttl: Duration,
    /// How often the reaper runs. `None` disables it.
    pub reaper_interval: Option<Duration>,
    pub log_format: LogFormat,
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = get(BIND_ADDR_VAR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid(BIND_ADDR_VAR, &bind_addr, e))?;

        let claim_ttl = seconds(CLAIM_TTL_VAR, get(CLAIM_TTL_VAR), DEFAULT_CLAIM_TTL_SECS)?;
        if claim_ttl.is_zero() {
            return Err(ConfigError::invalid(CLAIM_TTL_VAR, "0", "must be greater than zero"));
        }

        let reaper_interval = seconds(
            REAPER_INTERVAL_VAR,
            get(REAPER_INTERVAL_VAR),
            DEFAULT_REAPER_INTERVAL_SECS,
        )?;

        let log_format = match get(LOG_FORMAT_VAR) {
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|e| ConfigError::invalid(LOG_FORMAT_VAR, &raw, e))?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bind_addr,
            database_url: get(DATABASE_URL_VAR),
            claim_ttl,
            reaper_interval: (!reaper_interval.is_zero()).then_some(reaper_interval),
            log_format,
        })
    }
}

fn seconds(var: &'static str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    match raw {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::invalid(var, &raw, e)),
        None => Ok(Duration::from_secs(default)),
    }
}
