use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use splitledger_core::{ExpenseId, GroupId};
use splitledger_infra::MutationOp;
use splitledger_infra::store::Pagination;
use splitledger_ledger::ExpenseDraft;

use crate::app::routes::idempotency_key;
use crate::app::{AppService, dto, errors};
use crate::context::MemberContext;

pub async fn list_expenses(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Path(group_id): Path<String>,
    Query(query): Query<dto::PageQuery>,
) -> Response {
    let group_id: GroupId = match dto::parse(&group_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = service.authorize(group_id, member.member_id()).await {
        return errors::service_error_to_response(e);
    }

    let pagination = Pagination::new(query.limit, query.offset);
    match service.list_expenses(group_id, pagination).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn create_expense(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
    Json(draft): Json<ExpenseDraft>,
) -> Response {
    let group_id: GroupId = match dto::parse(&group_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let op = MutationOp::CreateExpense { group_id, draft };
    match service.mutate(member.member_id(), idempotency_key(&headers), op).await {
        Ok(response) => errors::mutation_response(response),
        Err(e) => errors::mutation_error_to_response(e),
    }
}

pub async fn replace_expense(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Path(expense_id): Path<String>,
    headers: HeaderMap,
    Json(draft): Json<ExpenseDraft>,
) -> Response {
    let expense_id: ExpenseId = match dto::parse(&expense_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let op = MutationOp::ReplaceExpense { expense_id, draft };
    match service.mutate(member.member_id(), idempotency_key(&headers), op).await {
        Ok(response) => errors::mutation_response(response),
        Err(e) => errors::mutation_error_to_response(e),
    }
}

pub async fn delete_expense(
    Extension(service): Extension<AppService>,
    Extension(member): Extension<MemberContext>,
    Path(expense_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let expense_id: ExpenseId = match dto::parse(&expense_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let op = MutationOp::DeleteExpense { expense_id };
    match service.mutate(member.member_id(), idempotency_key(&headers), op).await {
        Ok(response) => errors::mutation_response(response),
        Err(e) => errors::mutation_error_to_response(e),
    }
}
