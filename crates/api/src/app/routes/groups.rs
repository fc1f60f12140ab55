use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use splitledger_core::{GroupId, MemberId};
use splitledger_ledger::SettlementMode;

use crate::app::{AppService, dto, errors};
use crate::context::MemberContext;

pub async fn create_group(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Json(body): Json<dto::CreateGroupRequest>,
) -> Response {
    match service.create_group(&body.name, member.member_id()).await {
        Ok(group) => (StatusCode::CREATED, Json(json!({ "group": group }))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn add_member(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Path(group_id): Path<String>,
    Json(body): Json<dto::AddMemberRequest>,
) -> Response {
    let group_id: GroupId = match dto::parse(&group_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let new_member: MemberId = match dto::parse(&body.member_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match service.add_member(group_id, member.member_id(), &new_member).await {
        Ok(added) => {
            let status = if added { StatusCode::CREATED } else { StatusCode::OK };
            (
                status,
                Json(json!({
                    "group_id": group_id,
                    "member_id": new_member,
                    "added": added,
                })),
            )
                .into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn remove_member(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Path((group_id, member_id)): Path<(String, String)>,
) -> Response {
    let group_id: GroupId = match dto::parse(&group_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let removed: MemberId = match dto::parse(&member_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match service.remove_member(group_id, member.member_id(), &removed).await {
        Ok(()) => Json(json!({
            "group_id": group_id,
            "member_id": removed,
            "removed": true,
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn balances(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Path(group_id): Path<String>,
) -> Response {
    let group_id: GroupId = match dto::parse(&group_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = service.authorize(group_id, member.member_id()).await {
        return errors::service_error_to_response(e);
    }

    match service.compute_balances(group_id).await {
        Ok(balances) => Json(json!({
            "group_id": group_id,
            "balances": balances,
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn debts(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Path(group_id): Path<String>,
    Query(query): Query<dto::DebtsQuery>,
) -> Response {
    let group_id: GroupId = match dto::parse(&group_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let requested: Option<SettlementMode> = match query.mode.as_deref().map(dto::parse).transpose() {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let group = match service.authorize(group_id, member.member_id()).await {
        Ok(group) => group,
        Err(e) => return errors::service_error_to_response(e),
    };

    let mode = requested.unwrap_or(group.settlement_mode);
    match service
        .suggest_settlements(group_id, member.member_id(), Some(mode))
        .await
    {
        Ok(suggestions) => Json(json!({
            "group_id": group_id,
            "mode": mode,
            "suggestions": suggestions,
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn toggle_simplify(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Path(group_id): Path<String>,
) -> Response {
    let group_id: GroupId = match dto::parse(&group_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match service.toggle_settlement_mode(group_id, member.member_id()).await {
        Ok(mode) => Json(json!({
            "group_id": group_id,
            "settlement_mode": mode,
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
