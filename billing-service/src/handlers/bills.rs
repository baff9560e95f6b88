//! Bill handlers: single bill creation, batch runs and listings.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{BatchBillRequest, BatchBillResponse, CreateBillRequest, ListBillsQuery};
use crate::middleware::TenantContext;
use crate::models::{Bill, BillStatus, BillTemplate, CreateBill, ListBillsFilter};
use crate::services::billing;
use crate::startup::AppState;

#[tracing::instrument(skip(state, request), fields(tenant_id = %ctx.tenant_id))]
pub async fn create_bill(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(request): Json<CreateBillRequest>,
) -> Result<(StatusCode, Json<Bill>), AppError> {
    let bill = billing::create_single_bill(
        &state.db,
        &ctx,
        CreateBill {
            customer_id: request.customer_id,
            assignment_id: request.assignment_id,
            bill_type: request.bill_type,
            quantity: request.quantity,
            rate_used: request.rate_used,
            total_amount: request.total_amount,
        },
        request.reference,
        request.invoice,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(bill)))
}

#[tracing::instrument(skip(state, request), fields(tenant_id = %ctx.tenant_id))]
pub async fn create_bill_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(request): Json<BatchBillRequest>,
) -> Result<Json<BatchBillResponse>, AppError> {
    request.validate()?;

    let template = BillTemplate {
        bill_type: request.bill_type,
        quantity: request.quantity,
        rate_used: request.rate_used,
        total_amount: request.total_amount,
    };

    let outcome = billing::process_batch(
        &state.db,
        &ctx,
        &request.customer_ids,
        &template,
        request.reference,
        request.create_invoice,
    )
    .await?;

    let summary = outcome.summary();

    Ok(Json(BatchBillResponse { outcome, summary }))
}

#[tracing::instrument(skip(state), fields(tenant_id = %ctx.tenant_id))]
pub async fn list_bills(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<ListBillsQuery>,
) -> Result<Json<Vec<Bill>>, AppError> {
    let filter = ListBillsFilter {
        status: query.status.as_deref().map(BillStatus::from_string),
        customer_id: query.customer_id,
        bill_ref: query.bill_ref,
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let bills = state.db.list_bills(ctx.tenant_id, &filter).await?;

    Ok(Json(bills))
}
