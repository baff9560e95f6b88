//! Invoice handlers: generation trigger and read models.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{GenerateInvoicesResponse, ListInvoicesQuery};
use crate::middleware::TenantContext;
use crate::models::{Invoice, InvoiceStatus, ListInvoicesFilter};
use crate::services::invoicing;
use crate::startup::AppState;

/// Consolidate all pending bills into invoices, one per meter.
#[tracing::instrument(skip(state), fields(tenant_id = %ctx.tenant_id))]
pub async fn generate_invoices(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<GenerateInvoicesResponse>, AppError> {
    let invoices = invoicing::generate_batch(&state.db, &ctx).await?;
    Ok(Json(GenerateInvoicesResponse { invoices }))
}

#[tracing::instrument(skip(state), fields(tenant_id = %ctx.tenant_id))]
pub async fn list_invoices(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    let filter = ListInvoicesFilter {
        status: query.status.as_deref().map(InvoiceStatus::from_string),
        customer_id: query.customer_id,
        meter_id: query.meter_id,
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let invoices = state.db.list_invoices(ctx.tenant_id, &filter).await?;

    Ok(Json(invoices))
}

#[tracing::instrument(skip(state), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
pub async fn get_invoice(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state
        .db
        .get_invoice(ctx.tenant_id, invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    Ok(Json(invoice))
}

/// All open invoices for a customer, across all their meters.
#[tracing::instrument(skip(state), fields(tenant_id = %ctx.tenant_id, customer_id = %customer_id))]
pub async fn open_invoices_for_customer(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    let invoices = state
        .db
        .find_open_invoices_by_customer(ctx.tenant_id, customer_id)
        .await?;

    Ok(Json(invoices))
}
