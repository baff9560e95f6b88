//! Invoice action handlers: reversal, correction, overpayment application
//! and the manual recalculation trigger.

use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{AdjustInvoiceRequest, ApplyOverpaymentRequest, ReverseInvoiceRequest};
use crate::middleware::TenantContext;
use crate::models::{Invoice, Meter};
use crate::services::invoice_actions::{self, OverpaymentApplication};
use crate::services::recalculation;
use crate::startup::AppState;

#[tracing::instrument(skip(state, request), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
pub async fn reverse_invoice(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<ReverseInvoiceRequest>,
) -> Result<Json<Invoice>, AppError> {
    request.validate()?;

    let invoice = invoice_actions::reverse_invoice(
        &state.db,
        &ctx,
        invoice_id,
        &request.reason,
        request.notes.as_deref(),
        request.send_sms,
        state.notifier.as_ref(),
    )
    .await?;

    Ok(Json(invoice))
}

#[tracing::instrument(skip(state, request), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
pub async fn adjust_invoice(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<AdjustInvoiceRequest>,
) -> Result<Json<Invoice>, AppError> {
    request.validate()?;

    let invoice = invoice_actions::adjust_amount(
        &state.db,
        &ctx,
        invoice_id,
        request.new_amount,
        &request.reason,
    )
    .await?;

    Ok(Json(invoice))
}

#[tracing::instrument(skip(state, request), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
pub async fn apply_overpayment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<ApplyOverpaymentRequest>,
) -> Result<Json<OverpaymentApplication>, AppError> {
    let result =
        invoice_actions::apply_overpayment(&state.db, &ctx, invoice_id, request.amount).await?;

    Ok(Json(result))
}

/// Manual recalculation trigger for one meter.
#[tracing::instrument(skip(state), fields(tenant_id = %ctx.tenant_id, meter_id = %meter_id))]
pub async fn recalculate_meter(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(meter_id): Path<Uuid>,
) -> Result<Json<Meter>, AppError> {
    let meter =
        recalculation::recalculate_meter_balances(&state.db, ctx.tenant_id, meter_id).await?;

    Ok(Json(meter))
}
