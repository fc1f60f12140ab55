use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use splitledger_core::DomainError;
use splitledger_infra::{MutationError, MutationResponse, ServiceError, StoreError};

/// Header set on responses replayed from a recorded idempotency claim.
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn domain_error_to_response(err: &DomainError) -> Response {
    let message = err.to_string();
    match err {
        DomainError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        DomainError::NotMember(_) => json_error(StatusCode::BAD_REQUEST, "not_member", message),
        DomainError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", message),
        DomainError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::Forbidden(_) => json_error(StatusCode::FORBIDDEN, "forbidden", message),
        DomainError::InvariantViolation(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "integrity_error", message)
        }
    }
}

pub fn store_error_to_response(err: &StoreError) -> Response {
    match err {
        StoreError::Unavailable(_) => json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", err.to_string()),
        _ => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string()),
    }
}

pub fn service_error_to_response(err: ServiceError) -> Response {
    match &err {
        ServiceError::Domain(e) => domain_error_to_response(e),
        ServiceError::Store(e) => store_error_to_response(e),
        ServiceError::OutstandingDebts { debts, .. } => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({
                "error": "outstanding_debts",
                "message": err.to_string(),
                "details": debts,
            })),
        )
            .into_response(),
    }
}

pub fn mutation_error_to_response(err: MutationError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let code = match &err {
        MutationError::MissingKey => "idempotency_key_required",
        MutationError::InProgress(_) => "request_in_progress",
        MutationError::KeyReused { .. } => "idempotency_key_reused",
        MutationError::Store(_) => "store_error",
        MutationError::Integrity(_) => "integrity_error",
        MutationError::Encode(_) => "encode_error",
    };
    json_error(status, code, err.to_string())
}

/// Write a gate outcome with its recorded status and body verbatim.
pub fn mutation_response(response: MutationResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut http = (status, axum::Json(response.body)).into_response();
    if response.replayed {
        http.headers_mut()
            .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    }
    http
}
