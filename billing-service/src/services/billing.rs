//! Bill creation, batch billing runs and reference generation.

use crate::middleware::TenantContext;
use crate::models::{
    BatchError, BatchOutcome, Bill, BillTemplate, CreateBill, CreatedBill, MeterAssignment,
};
use crate::services::metrics::{self, DB_QUERY_DURATION};
use crate::services::{database::Database, invoicing};
use chrono::{Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Bill reference format: 4-digit year, month abbreviation, 3-digit
/// zero-padded sequence (e.g. `2026-AUG-004`).
static REFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-([A-Z]{3})-(\d{3})$").expect("valid reference regex"));

const MONTH_ABBREVS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Whether a reference matches the `YYYY-MON-###` contract.
pub fn validate_reference_format(reference: &str) -> bool {
    match REFERENCE_RE.captures(reference) {
        Some(caps) => MONTH_ABBREVS.contains(&&caps[2]),
        None => false,
    }
}

/// The `YYYY-MON` period prefix for a date.
pub fn period_for(date: NaiveDate) -> String {
    let month = MONTH_ABBREVS[date.month0() as usize];
    format!("{:04}-{}", date.year(), month)
}

/// Sequence number of a well-formed reference belonging to `period`.
/// Malformed references yield `None` and are treated as absent.
pub fn reference_sequence(reference: &str, period: &str) -> Option<u32> {
    if !validate_reference_format(reference) {
        return None;
    }
    let (prefix, seq) = reference.rsplit_once('-')?;
    if prefix != period {
        return None;
    }
    seq.parse().ok()
}

/// Generate the next bill reference for the tenant's current period.
///
/// Scans existing references (ignoring malformed ones, so the sequence
/// continues from the highest that parses) and bumps the per-tenant-month
/// counter row. The counter upsert takes a row lock, so concurrent batch
/// submissions cannot be handed the same sequence number.
#[instrument(skip(db), fields(tenant_id = %tenant_id))]
pub async fn generate_reference(db: &Database, tenant_id: Uuid) -> Result<String, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["generate_reference"])
        .start_timer();

    let period = period_for(Utc::now().date_naive());

    let mut tx = db.pool().begin().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let existing: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT bill_ref FROM bills
        WHERE tenant_id = $1 AND bill_ref LIKE $2 || '-%'
        "#,
    )
    .bind(tenant_id)
    .bind(&period)
    .fetch_all(&mut *tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to scan references: {}", e)))?;

    let max_valid: i32 = existing
        .iter()
        .filter_map(|r| reference_sequence(r, &period))
        .max()
        .unwrap_or(0) as i32;

    let next: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO bill_reference_counters (tenant_id, period, last_seq)
        VALUES ($1, $2, $3 + 1)
        ON CONFLICT (tenant_id, period)
        DO UPDATE SET last_seq = GREATEST(bill_reference_counters.last_seq, $3) + 1
        RETURNING last_seq
        "#,
    )
    .bind(tenant_id)
    .bind(&period)
    .bind(max_valid)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to bump reference counter: {}", e)))?;

    tx.commit().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    timer.observe_duration();

    Ok(format!("{}-{:03}", period, next))
}

/// True when a bill already exists for this exact (customer, reference)
/// pair within the tenant. Batch re-runs use this to skip, not fail.
#[instrument(skip(db), fields(tenant_id = %tenant_id, customer_id = %customer_id))]
pub async fn is_duplicate(
    db: &Database,
    tenant_id: Uuid,
    customer_id: Uuid,
    reference: &str,
) -> Result<bool, AppError> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM bills
            WHERE tenant_id = $1 AND customer_id = $2 AND bill_ref = $3
        )
        "#,
    )
    .bind(tenant_id)
    .bind(customer_id)
    .bind(reference)
    .fetch_one(db.pool())
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check duplicates: {}", e)))?;

    Ok(exists)
}

fn validate_amounts(input: &CreateBill) -> Result<(), AppError> {
    if input.quantity < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Field 'quantity' must be a non-negative number"
        )));
    }
    if input.rate_used < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Field 'rate_used' must be a non-negative number"
        )));
    }
    if input.effective_total() < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Field 'total_amount' must be a non-negative number"
        )));
    }
    Ok(())
}

async fn resolve_active_assignment(
    db: &Database,
    ctx: &TenantContext,
    input: &CreateBill,
) -> Result<MeterAssignment, AppError> {
    let assignment = db
        .get_assignment(ctx.tenant_id, input.assignment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Meter assignment not found")))?;

    if assignment.customer_id != input.customer_id {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Meter assignment does not belong to customer {}",
            input.customer_id
        )));
    }
    if !assignment.active {
        return Err(AppError::BusinessRule(anyhow::anyhow!(
            "Meter assignment {} is not active",
            assignment.assignment_id
        )));
    }

    Ok(assignment)
}

async fn insert_bill(
    db: &Database,
    ctx: &TenantContext,
    input: &CreateBill,
    reference: &str,
) -> Result<Bill, AppError> {
    let bill = sqlx::query_as::<_, Bill>(
        r#"
        INSERT INTO bills (bill_id, tenant_id, customer_id, assignment_id, bill_type,
            quantity, rate_used, total_amount, status, bill_ref, generation_date, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9, $10, $11)
        RETURNING bill_id, tenant_id, customer_id, assignment_id, bill_type, quantity,
            rate_used, total_amount, status, bill_ref, generation_date, created_by, created_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(ctx.tenant_id)
    .bind(input.customer_id)
    .bind(input.assignment_id)
    .bind(input.bill_type.as_str())
    .bind(input.quantity)
    .bind(input.rate_used)
    .bind(input.effective_total())
    .bind(reference)
    .bind(Utc::now().date_naive())
    .bind(ctx.actor_id)
    .fetch_one(db.pool())
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create bill: {}", e)))?;

    metrics::record_bill_created(&ctx.tenant_id.to_string(), &bill.bill_type);

    Ok(bill)
}

/// Create one bill. When `reference` is supplied it must match the
/// reference contract; otherwise the next sequence for the current period
/// is generated. With `invoice` set the bill is consolidated into an
/// invoice immediately.
#[instrument(skip(db, ctx, input), fields(tenant_id = %ctx.tenant_id, customer_id = %input.customer_id))]
pub async fn create_single_bill(
    db: &Database,
    ctx: &TenantContext,
    input: CreateBill,
    reference: Option<String>,
    invoice: bool,
) -> Result<Bill, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["create_single_bill"])
        .start_timer();

    validate_amounts(&input)?;
    resolve_active_assignment(db, ctx, &input).await?;

    let reference = match reference {
        Some(r) => {
            if !validate_reference_format(&r) {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Invalid bill reference '{}' (expected YYYY-MON-###)",
                    r
                )));
            }
            r
        }
        None => generate_reference(db, ctx.tenant_id).await?,
    };

    let bill = insert_bill(db, ctx, &input, &reference).await?;

    info!(
        bill_id = %bill.bill_id,
        bill_ref = %bill.bill_ref,
        total_amount = %bill.total_amount,
        "Bill created"
    );

    let bill = if invoice {
        invoicing::generate_for_bills(db, ctx, vec![bill.clone()]).await?;
        db.get_bill(ctx.tenant_id, bill.bill_id)
            .await?
            .unwrap_or(bill)
    } else {
        bill
    };

    timer.observe_duration();

    Ok(bill)
}

/// Run a billing batch over a set of customers.
///
/// One bill per active meter assignment per customer. Failures are
/// collected per customer; committed bills for other customers are never
/// rolled back by a sibling's failure. A customer whose (customer,
/// reference) pair already has a bill is skipped, which makes re-submitting
/// the identical batch a no-op.
#[instrument(skip(db, ctx, template), fields(tenant_id = %ctx.tenant_id, customers = customer_ids.len()))]
pub async fn process_batch(
    db: &Database,
    ctx: &TenantContext,
    customer_ids: &[Uuid],
    template: &BillTemplate,
    reference: Option<String>,
    create_invoice: bool,
) -> Result<BatchOutcome, AppError> {
    let reference = match reference {
        Some(r) => {
            if !validate_reference_format(&r) {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Invalid bill reference '{}' (expected YYYY-MON-###)",
                    r
                )));
            }
            r
        }
        None => generate_reference(db, ctx.tenant_id).await?,
    };

    let mut outcome = BatchOutcome::new(reference.clone());

    for &customer_id in customer_ids {
        // A customer id from another tenant resolves to nothing here.
        let customer = match db.get_customer(ctx.tenant_id, customer_id).await? {
            Some(c) => c,
            None => {
                outcome.errors.push(BatchError {
                    customer_id,
                    message: format!("Customer {} not found", customer_id),
                });
                continue;
            }
        };

        if is_duplicate(db, ctx.tenant_id, customer_id, &reference).await? {
            outcome.skipped += 1;
            outcome.skipped_customers.push(customer_id);
            continue;
        }

        let assignments = db.active_assignments(ctx.tenant_id, customer_id).await?;
        if assignments.is_empty() {
            outcome.errors.push(BatchError {
                customer_id,
                message: format!(
                    "No active meter assignments found for customer {}",
                    customer.name
                ),
            });
            continue;
        }

        let mut customer_bills: Vec<Bill> = Vec::with_capacity(assignments.len());
        for assignment in &assignments {
            let input = CreateBill {
                customer_id,
                assignment_id: assignment.assignment_id,
                bill_type: template.bill_type,
                quantity: template.quantity,
                rate_used: template.rate_used,
                total_amount: template.total_amount,
            };

            if let Err(e) = validate_amounts(&input) {
                outcome.errors.push(BatchError {
                    customer_id,
                    message: e.to_string(),
                });
                continue;
            }

            match insert_bill(db, ctx, &input, &reference).await {
                Ok(bill) => {
                    outcome.created += 1;
                    outcome.created_bills.push(CreatedBill {
                        bill_id: bill.bill_id,
                        customer_id,
                        assignment_id: assignment.assignment_id,
                        meter_id: assignment.meter_id,
                        amount: bill.total_amount,
                    });
                    customer_bills.push(bill);
                }
                Err(e) => {
                    warn!(customer_id = %customer_id, error = %e, "Batch bill creation failed");
                    outcome.errors.push(BatchError {
                        customer_id,
                        message: e.to_string(),
                    });
                }
            }
        }

        // Invoice failures must not unwind bills already committed.
        if create_invoice && !customer_bills.is_empty() {
            match invoicing::generate_for_bills(db, ctx, customer_bills).await {
                Ok(invoices) => outcome.invoices_created += invoices.len() as u32,
                Err(e) => {
                    warn!(customer_id = %customer_id, error = %e, "Batch invoice generation failed");
                    outcome.invoice_errors.push(BatchError {
                        customer_id,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    info!(
        reference = %outcome.reference,
        created = outcome.created,
        skipped = outcome.skipped,
        errors = outcome.errors.len(),
        invoices_created = outcome.invoices_created,
        "Billing batch completed"
    );

    Ok(outcome)
}
