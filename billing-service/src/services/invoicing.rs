//! Invoice generation: consolidates pending bills into one invoice per
//! meter per cycle, carrying forward the prior invoice's unpaid balance.

use crate::middleware::TenantContext;
use crate::models::account::codes;
use crate::models::{Bill, BillType, Invoice, Meter, PostingLine, TransactionType};
use crate::services::metrics::{self, DB_QUERY_DURATION};
use crate::services::{database::Database, invoice_actions, ledger, recalculation};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::PgConnection;
use std::collections::HashMap;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Days until a generated invoice falls due.
const PAYMENT_TERMS_DAYS: i64 = 30;

/// Consolidate the given pending bills into invoices, one per meter.
///
/// Each meter's consolidation is one atomic transaction: closing the prior
/// open invoice, raising the new one, linking bills, posting the journal
/// group and recalculating balances either all commit or all roll back.
/// Invoices for other meters of the same customer are untouched.
#[instrument(skip(db, ctx, bills), fields(tenant_id = %ctx.tenant_id, bill_count = bills.len()))]
pub async fn generate_for_bills(
    db: &Database,
    ctx: &TenantContext,
    bills: Vec<Bill>,
) -> Result<Vec<Invoice>, AppError> {
    let pending: Vec<Bill> = bills
        .into_iter()
        .filter(|b| b.status == "pending")
        .collect();

    if pending.is_empty() {
        return Ok(Vec::new());
    }

    let groups = group_by_meter(db, ctx.tenant_id, pending).await?;

    let mut invoices = Vec::with_capacity(groups.len());
    for (meter_id, meter_bills) in groups {
        let invoice_id = consolidate_meter(db, ctx, meter_id, &meter_bills).await?;
        if let Some(invoice) = db.get_invoice(ctx.tenant_id, invoice_id).await? {
            invoices.push(invoice);
        }
    }

    Ok(invoices)
}

/// Consolidate every pending bill for the tenant, grouped per meter.
/// Pending bills for the same meter are always merged into a single
/// invoice, regardless of how many billing runs produced them. A failing
/// meter is logged and skipped so the rest of the run completes.
#[instrument(skip(db, ctx), fields(tenant_id = %ctx.tenant_id))]
pub async fn generate_batch(db: &Database, ctx: &TenantContext) -> Result<Vec<Invoice>, AppError> {
    let pending = db.pending_bills(ctx.tenant_id).await?;
    if pending.is_empty() {
        return Ok(Vec::new());
    }

    let groups = group_by_meter(db, ctx.tenant_id, pending).await?;

    let mut invoices = Vec::with_capacity(groups.len());
    for (meter_id, meter_bills) in groups {
        match consolidate_meter(db, ctx, meter_id, &meter_bills).await {
            Ok(invoice_id) => {
                if let Some(invoice) = db.get_invoice(ctx.tenant_id, invoice_id).await? {
                    invoices.push(invoice);
                }
            }
            Err(e) => {
                metrics::record_error("invoice_generation", "generate_batch");
                error!(meter_id = %meter_id, error = %e, "Invoice generation failed for meter");
            }
        }
    }

    info!(invoices = invoices.len(), "Invoice batch completed");

    Ok(invoices)
}

/// Resolve each bill's assignment to its meter and group the bills.
async fn group_by_meter(
    db: &Database,
    tenant_id: Uuid,
    bills: Vec<Bill>,
) -> Result<Vec<(Uuid, Vec<Bill>)>, AppError> {
    let assignment_ids: Vec<Uuid> = bills.iter().map(|b| b.assignment_id).collect();

    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        r#"
        SELECT assignment_id, meter_id
        FROM meter_assignments
        WHERE tenant_id = $1 AND assignment_id = ANY($2)
        "#,
    )
    .bind(tenant_id)
    .bind(&assignment_ids)
    .fetch_all(db.pool())
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to resolve assignments: {}", e)))?;

    let meter_by_assignment: HashMap<Uuid, Uuid> = rows.into_iter().collect();

    let mut groups: HashMap<Uuid, Vec<Bill>> = HashMap::new();
    for bill in bills {
        let meter_id = meter_by_assignment
            .get(&bill.assignment_id)
            .copied()
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Meter assignment {} not found for bill {}",
                    bill.assignment_id,
                    bill.bill_id
                ))
            })?;
        groups.entry(meter_id).or_default().push(bill);
    }

    Ok(groups.into_iter().collect())
}

/// One meter's consolidation, as a single transaction.
async fn consolidate_meter(
    db: &Database,
    ctx: &TenantContext,
    meter_id: Uuid,
    bills: &[Bill],
) -> Result<Uuid, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["consolidate_meter"])
        .start_timer();

    let mut tx = db.pool().begin().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    // The meter row lock serializes invoice generation per meter.
    let meter = sqlx::query_as::<_, Meter>(
        r#"
        SELECT meter_id, tenant_id, meter_number, total_billed, total_paid, balance,
            overpayment, last_invoice_date, created_utc
        FROM meters
        WHERE tenant_id = $1 AND meter_id = $2
        FOR UPDATE
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(meter_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock meter: {}", e)))?
    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Meter {} not found", meter_id)))?;

    let customer_id = bills[0].customer_id;

    let invoice_id =
        consolidate_locked(&mut tx, ctx, &meter, customer_id, bills).await?;

    recalculation::recalculate_customer(&mut tx, ctx.tenant_id, customer_id).await?;

    tx.commit().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    metrics::record_invoice_generated(&ctx.tenant_id.to_string());

    timer.observe_duration();

    Ok(invoice_id)
}

async fn consolidate_locked(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    meter: &Meter,
    customer_id: Uuid,
    bills: &[Bill],
) -> Result<Uuid, AppError> {
    // Close the prior open invoice and capture its unpaid balance. At most
    // one open invoice exists per (customer, meter).
    let prior = sqlx::query_as::<_, Invoice>(
        r#"
        SELECT invoice_id, tenant_id, customer_id, meter_id, invoice_number, invoice_date,
            due_date, balance_brought_forward, amount, total_amount, paid_amount,
            overpayment_applied, balance, status, state, notes, created_by, created_utc
        FROM invoices
        WHERE tenant_id = $1 AND meter_id = $2 AND customer_id = $3 AND state = 'open'
        ORDER BY created_utc DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(meter.meter_id)
    .bind(customer_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock open invoice: {}", e)))?;

    let mut balance_brought_forward = Decimal::ZERO;
    let mut prior_number: Option<String> = None;

    if let Some(ref prior) = prior {
        balance_brought_forward = prior.balance;
        prior_number = Some(prior.invoice_number.clone());

        sqlx::query(
            r#"
            UPDATE invoices
            SET state = 'closed', status = 'cleared', balance = 0
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(prior.invoice_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to close prior invoice: {}", e))
        })?;
    }

    let amount: Decimal = bills.iter().map(|b| b.total_amount).sum();
    let total_amount = balance_brought_forward + amount;

    let invoice_number: String = sqlx::query_scalar("SELECT next_invoice_number($1)")
        .bind(ctx.tenant_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to generate invoice number: {}", e))
        })?;

    let invoice_date = Utc::now().date_naive();
    let due_date = invoice_date + Duration::days(PAYMENT_TERMS_DAYS);
    let invoice_id = Uuid::new_v4();

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        INSERT INTO invoices (invoice_id, tenant_id, customer_id, meter_id, invoice_number,
            invoice_date, due_date, balance_brought_forward, amount, total_amount,
            paid_amount, overpayment_applied, balance, status, state, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, 0, $10, 'not_paid', 'open', $11)
        RETURNING invoice_id, tenant_id, customer_id, meter_id, invoice_number, invoice_date,
            due_date, balance_brought_forward, amount, total_amount, paid_amount,
            overpayment_applied, balance, status, state, notes, created_by, created_utc
        "#,
    )
    .bind(invoice_id)
    .bind(ctx.tenant_id)
    .bind(customer_id)
    .bind(meter.meter_id)
    .bind(&invoice_number)
    .bind(invoice_date)
    .bind(due_date)
    .bind(balance_brought_forward)
    .bind(amount)
    .bind(total_amount)
    .bind(ctx.actor_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)))?;

    for bill in bills {
        sqlx::query(
            r#"
            INSERT INTO invoice_bills (invoice_bill_id, tenant_id, invoice_id, bill_id, amount)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ctx.tenant_id)
        .bind(invoice_id)
        .bind(bill.bill_id)
        .bind(bill.total_amount)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to link bill to invoice: {}", e))
        })?;
    }

    let bill_ids: Vec<Uuid> = bills.iter().map(|b| b.bill_id).collect();
    sqlx::query(
        r#"
        UPDATE bills SET status = 'invoiced'
        WHERE tenant_id = $1 AND bill_id = ANY($2)
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(&bill_ids)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to mark bills invoiced: {}", e)))?;

    // Debit AR for the invoice total, credit revenue per bill type. The
    // balance brought forward is an AR-to-AR transfer from the cleared
    // invoice, so it is credited back against the old document.
    let mut lines = vec![PostingLine::debit(codes::AR_CONTROL, total_amount)];
    for (bill_type, type_amount) in sum_by_type(bills)? {
        if type_amount > Decimal::ZERO {
            lines.push(PostingLine::credit(
                bill_type.revenue_account_code(),
                type_amount,
            ));
        }
    }
    if balance_brought_forward > Decimal::ZERO {
        let prior_number = prior_number.as_deref().unwrap_or("previous invoice");
        lines.push(
            PostingLine::credit(codes::AR_CONTROL, balance_brought_forward)
                .describe(format!("Balance brought forward from {}", prior_number)),
        );
    }

    // Nothing to post for an all-zero document.
    if total_amount > Decimal::ZERO {
        ledger::post_entries(
            conn,
            ctx.tenant_id,
            invoice_id,
            TransactionType::Invoice,
            &lines,
            &invoice_number,
            &format!("Invoice {} for meter {}", invoice_number, meter.meter_number),
        )
        .await?;
    }

    info!(
        invoice_id = %invoice_id,
        invoice_number = %invoice_number,
        amount = %amount,
        balance_brought_forward = %balance_brought_forward,
        "Invoice generated"
    );

    // Available meter credit is applied as part of invoice creation rather
    // than waiting for a manual action.
    if meter.overpayment > Decimal::ZERO {
        invoice_actions::apply_overpayment_locked(conn, ctx, &invoice, meter.overpayment).await?;
    }

    Ok(invoice_id)
}

fn sum_by_type(bills: &[Bill]) -> Result<Vec<(BillType, Decimal)>, AppError> {
    let mut sums: Vec<(BillType, Decimal)> = Vec::new();
    for bill in bills {
        let bill_type = bill.parsed_type().ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Unknown bill type '{}'", bill.bill_type))
        })?;
        match sums.iter_mut().find(|(t, _)| *t == bill_type) {
            Some((_, sum)) => *sum += bill.total_amount,
            None => sums.push((bill_type, bill.total_amount)),
        }
    }
    Ok(sums)
}
