use axum::response::Response;
use serde::Deserialize;

use splitledger_core::DomainError;

use crate::app::errors;

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub member_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DebtsQuery {
    pub mode: Option<String>,
}

/// `limit`/`offset` for list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    pub window: Option<String>,
}

/// Parse a path/query value, answering 400 on failure.
pub fn parse<T>(raw: &str) -> Result<T, Response>
where
    T: core::str::FromStr<Err = DomainError>,
{
    raw.parse::<T>()
        .map_err(|e| errors::domain_error_to_response(&e))
}
