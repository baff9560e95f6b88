//! Payment handlers.
//!
//! The quick-payment action returns a structured `success: false` payload
//! for business-rule violations (reversed invoice, already-reversed
//! payment) so the admin panel can show the reason inline; validation and
//! infrastructure errors still surface as error responses.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{PaymentRequest, PaymentResponse, ReversePaymentRequest};
use crate::middleware::TenantContext;
use crate::models::{Payment, RecordPayment};
use crate::services::{invoice_actions, payments};
use crate::startup::AppState;

#[tracing::instrument(skip(state, request), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
pub async fn record_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), AppError> {
    request.validate()?;

    let result = invoice_actions::apply_payment(
        &state.db,
        &ctx,
        invoice_id,
        RecordPayment {
            amount: request.amount,
            method: request.method,
            reference: request.reference,
            payment_date: request.payment_date,
        },
        request.send_sms,
        state.notifier.as_ref(),
    )
    .await;

    match result {
        Ok((payment, invoice)) => Ok((
            StatusCode::CREATED,
            Json(PaymentResponse {
                success: true,
                message: None,
                payment: Some(payment),
                invoice: Some(invoice),
            }),
        )),
        Err(AppError::BusinessRule(e)) => Ok((
            StatusCode::OK,
            Json(PaymentResponse {
                success: false,
                message: Some(e.to_string()),
                payment: None,
                invoice: None,
            }),
        )),
        Err(e) => Err(e),
    }
}

#[tracing::instrument(skip(state, request), fields(tenant_id = %ctx.tenant_id, payment_id = %payment_id))]
pub async fn reverse_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(payment_id): Path<Uuid>,
    Json(request): Json<ReversePaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    request.validate()?;

    let payment =
        payments::reverse_payment(&state.db, &ctx, payment_id, &request.reason).await?;

    Ok(Json(payment))
}

#[tracing::instrument(skip(state), fields(tenant_id = %ctx.tenant_id, payment_id = %payment_id))]
pub async fn get_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state
        .db
        .get_payment(ctx.tenant_id, payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

    Ok(Json(payment))
}

/// Payments recorded against an invoice, for statements and exports.
#[tracing::instrument(skip(state), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
pub async fn list_invoice_payments(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>, AppError> {
    let payments = state
        .db
        .payments_for_invoice(ctx.tenant_id, invoice_id)
        .await?;

    Ok(Json(payments))
}
