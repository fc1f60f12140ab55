use axum::{
    Json,
    extract::{Extension, Path},
    http::HeaderMap,
    response::Response,
};

use splitledger_core::GroupId;
use splitledger_infra::MutationOp;
use splitledger_ledger::SettlementDraft;

use crate::app::routes::idempotency_key;
use crate::app::{AppService, dto, errors};
use crate::context::MemberContext;

pub async fn create_settlement(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
    Json(draft): Json<SettlementDraft>,
) -> Response {
    let group_id: GroupId = match dto::parse(&group_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let op = MutationOp::CreateSettlement { group_id, draft };
    match service.mutate(member.member_id(), idempotency_key(&headers), op).await {
        Ok(response) => errors::mutation_response(response),
        Err(e) => errors::mutation_error_to_response(e),
    }
}
