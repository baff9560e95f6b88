//! Tenant setup handlers: chart of accounts, customers, meters,
//! assignments. These back the admin panel's onboarding screens.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    AccountBalanceResponse, CreateAssignmentRequest, CreateCustomerRequest, CreateMeterRequest,
    SeedAccountsResponse,
};
use crate::middleware::TenantContext;
use crate::models::{CreateAssignment, CreateCustomer, CreateMeter, Customer, Meter, MeterAssignment};
use crate::services::ledger;
use crate::startup::AppState;

/// Seed the chart of accounts for the tenant. Idempotent.
#[tracing::instrument(skip(state), fields(tenant_id = %ctx.tenant_id))]
pub async fn seed_accounts(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<(StatusCode, Json<SeedAccountsResponse>), AppError> {
    let created = ledger::ensure_chart_of_accounts(&state.db, ctx.tenant_id).await?;
    Ok((StatusCode::CREATED, Json(SeedAccountsResponse { created })))
}

/// Derived balance for one chart-of-accounts entry, used by reconciliation
/// tooling to cross-check the ledger.
#[tracing::instrument(skip(state), fields(tenant_id = %ctx.tenant_id, code = %code))]
pub async fn account_balance(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(code): Path<String>,
) -> Result<Json<AccountBalanceResponse>, AppError> {
    let balance = ledger::account_balance(&state.db, ctx.tenant_id, &code)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account '{}' not found", code)))?;

    Ok(Json(AccountBalanceResponse { code, balance }))
}

#[tracing::instrument(skip(state, request), fields(tenant_id = %ctx.tenant_id))]
pub async fn create_customer(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(request): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    request.validate()?;

    let customer = state
        .db
        .create_customer(&CreateCustomer {
            tenant_id: ctx.tenant_id,
            name: request.name,
            phone: request.phone,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(customer)))
}

#[tracing::instrument(skip(state, request), fields(tenant_id = %ctx.tenant_id))]
pub async fn create_meter(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(request): Json<CreateMeterRequest>,
) -> Result<(StatusCode, Json<Meter>), AppError> {
    request.validate()?;

    let meter = state
        .db
        .create_meter(&CreateMeter {
            tenant_id: ctx.tenant_id,
            meter_number: request.meter_number,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(meter)))
}

#[tracing::instrument(skip(state, request), fields(tenant_id = %ctx.tenant_id))]
pub async fn create_assignment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(request): Json<CreateAssignmentRequest>,
) -> Result<(StatusCode, Json<MeterAssignment>), AppError> {
    state
        .db
        .get_customer(ctx.tenant_id, request.customer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer not found")))?;
    state
        .db
        .get_meter(ctx.tenant_id, request.meter_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Meter not found")))?;

    let assignment = state
        .db
        .create_assignment(&CreateAssignment {
            tenant_id: ctx.tenant_id,
            customer_id: request.customer_id,
            meter_id: request.meter_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(assignment)))
}
