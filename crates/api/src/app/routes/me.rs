use axum::{
    Json,
    extract::{Extension, Query},
    response::{IntoResponse, Response},
};
use serde_json::json;

use splitledger_infra::store::Pagination;
use splitledger_ledger::SpendingWindow;

use crate::app::{AppService, dto, errors};
use crate::context::MemberContext;

pub async fn summary(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Query(query): Query<dto::SummaryQuery>,
) -> Response {
    let window: SpendingWindow = match query.window.as_deref().map(dto::parse).transpose() {
        Ok(v) => v.unwrap_or_default(),
        Err(resp) => return resp,
    };

    match service.member_summary(member.member_id(), window).await {
        Ok(summary) => Json(json!({
            "member_id": member.member_id(),
            "window": window,
            "summary": summary,
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Recent activity across every group the member belongs to.
pub async fn activities(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Query(query): Query<dto::PageQuery>,
) -> Response {
    let pagination = Pagination::new(query.limit, query.offset);
    match service.activities(member.member_id(), pagination).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
