use axum::{
    Router,
    http::HeaderMap,
    routing::{delete, get, patch, post, put},
};

pub mod expenses;
pub mod groups;
pub mod me;
pub mod settlements;
pub mod system;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Router for all member-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/groups", post(groups::create_group))
        .route("/groups/:group_id/members", post(groups::add_member))
        .route("/groups/:group_id/members/:member_id", delete(groups::remove_member))
        .route("/groups/:group_id/balances", get(groups::balances))
        .route("/groups/:group_id/debts", get(groups::debts))
        .route("/groups/:group_id/simplify-debts", patch(groups::toggle_simplify))
        .route(
            "/groups/:group_id/expenses",
            get(expenses::list_expenses).post(expenses::create_expense),
        )
        .route(
            "/expenses/:expense_id",
            put(expenses::replace_expense).delete(expenses::delete_expense),
        )
        .route("/groups/:group_id/settlements", post(settlements::create_settlement))
        .route("/me/summary", get(me::summary))
        .route("/me/activities", get(me::activities))
}

/// Idempotency key from the request headers, if present and readable.
pub fn idempotency_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(IDEMPOTENCY_HEADER).and_then(|v| v.to_str().ok())
}
