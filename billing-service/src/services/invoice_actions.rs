//! Invoice actions: reversal, amount correction and overpayment
//! application. Every action preserves audit history (notes are appended,
//! journal rows are offset, never edited) and runs as one transaction.

use crate::middleware::TenantContext;
use crate::models::account::codes;
use crate::models::{
    BillType, Invoice, InvoiceStatus, Journal, Payment, PostingLine, RecordPayment,
    TransactionType,
};
use crate::services::metrics::{self, DB_QUERY_DURATION};
use crate::services::notifier::{NotificationKind, NotificationRequest, Notifier};
use crate::services::payments::lock_invoice;
use crate::services::{database::Database, ledger, notifier, payments, recalculation};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Result of applying overpayment credit to an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverpaymentApplication {
    pub applied_amount: Decimal,
    pub remaining_overpayment: Decimal,
    pub invoice_cleared: bool,
    pub message: String,
}

/// Reverse an unpaid invoice.
///
/// The original keeps its history: notes gain the reversal reason, a paired
/// `REV-` invoice documents the undo, and offsetting journal rows cancel
/// the original posting without touching it.
#[instrument(skip(db, ctx, notifier), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
pub async fn reverse_invoice(
    db: &Database,
    ctx: &TenantContext,
    invoice_id: Uuid,
    reason: &str,
    notes: Option<&str>,
    send_sms: bool,
    notifier: &dyn Notifier,
) -> Result<Invoice, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["reverse_invoice"])
        .start_timer();

    let mut tx = db.pool().begin().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let invoice = lock_invoice(&mut tx, ctx.tenant_id, invoice_id).await?;

    if !invoice.can_be_reversed() {
        return Err(AppError::BusinessRule(anyhow::anyhow!(
            "Invoice {} cannot be reversed (status: {})",
            invoice.invoice_number,
            invoice.parsed_status().label()
        )));
    }

    let mut reversal_note = format!("Reversed: {}", reason);
    if let Some(notes) = notes.filter(|n| !n.is_empty()) {
        reversal_note.push_str(". ");
        reversal_note.push_str(notes);
    }
    let new_notes = match invoice.notes.as_deref().filter(|n| !n.is_empty()) {
        Some(existing) => format!("{}\n{}", existing, reversal_note),
        None => reversal_note,
    };

    let updated = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET status = 'reversed', state = 'closed', balance = 0, notes = $3
        WHERE tenant_id = $1 AND invoice_id = $2
        RETURNING invoice_id, tenant_id, customer_id, meter_id, invoice_number, invoice_date,
            due_date, balance_brought_forward, amount, total_amount, paid_amount,
            overpayment_applied, balance, status, state, notes, created_by, created_utc
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(invoice_id)
    .bind(&new_notes)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to reverse invoice: {}", e)))?;

    // Paired reversal document.
    let reversal_number = format!("REV-{}", invoice.invoice_number);
    sqlx::query(
        r#"
        INSERT INTO invoices (invoice_id, tenant_id, customer_id, meter_id, invoice_number,
            invoice_date, due_date, balance_brought_forward, amount, total_amount,
            paid_amount, overpayment_applied, balance, status, state, notes, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, 0, 0, 'reversed', 'closed', $11, $12)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(ctx.tenant_id)
    .bind(invoice.customer_id)
    .bind(invoice.meter_id)
    .bind(&reversal_number)
    .bind(Utc::now().date_naive())
    .bind(invoice.due_date)
    .bind(invoice.balance_brought_forward)
    .bind(invoice.amount)
    .bind(invoice.total_amount)
    .bind(format!("Reversal of {}: {}", invoice.invoice_number, reason))
    .bind(ctx.actor_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to create reversal invoice: {}", e))
    })?;

    // Offset the original invoice posting row for row.
    let original_rows = invoice_journal_rows(&mut tx, ctx.tenant_id, invoice_id).await?;
    if original_rows.is_empty() {
        warn!(invoice_id = %invoice_id, "No invoice journal rows found to offset");
    } else {
        let code_by_account = ledger::account_codes_by_id(&mut tx, ctx.tenant_id).await?;
        let inverse = ledger::inverse_lines(&original_rows, &code_by_account);

        ledger::post_entries(
            &mut tx,
            ctx.tenant_id,
            invoice_id,
            TransactionType::InvoiceReversal,
            &inverse,
            &reversal_number,
            &format!("Reversal of invoice {}: {}", invoice.invoice_number, reason),
        )
        .await?;
    }

    recalculation::recalculate_customer(&mut tx, ctx.tenant_id, invoice.customer_id).await?;

    tx.commit().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    metrics::record_invoice_action(&ctx.tenant_id.to_string(), "reversal");

    timer.observe_duration();

    info!(
        invoice_number = %invoice.invoice_number,
        reversal_number = %reversal_number,
        "Invoice reversed"
    );

    if send_sms {
        notifier::dispatch(
            notifier,
            NotificationRequest {
                kind: NotificationKind::InvoiceReversed,
                tenant_id: ctx.tenant_id,
                customer_id: invoice.customer_id,
                reference: invoice.invoice_number.clone(),
                amount: invoice.total_amount,
                balance: Decimal::ZERO,
            },
        )
        .await;
    }

    Ok(updated)
}

/// Correct an invoice's amount: reversal of the old amount plus a posting
/// of the new one, with both figures recorded in the notes.
#[instrument(skip(db, ctx), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id, new_amount = %new_amount))]
pub async fn adjust_amount(
    db: &Database,
    ctx: &TenantContext,
    invoice_id: Uuid,
    new_amount: Decimal,
    reason: &str,
) -> Result<Invoice, AppError> {
    if new_amount < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Corrected amount must not be negative"
        )));
    }

    let timer = DB_QUERY_DURATION
        .with_label_values(&["adjust_amount"])
        .start_timer();

    let mut tx = db.pool().begin().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let invoice = lock_invoice(&mut tx, ctx.tenant_id, invoice_id).await?;

    if !invoice.can_be_corrected() {
        return Err(AppError::BusinessRule(anyhow::anyhow!(
            "Invoice {} cannot be corrected (status: {})",
            invoice.invoice_number,
            invoice.parsed_status().label()
        )));
    }

    if new_amount == invoice.total_amount {
        tx.rollback().await.ok();
        return Ok(invoice);
    }

    let old_amount = invoice.total_amount;
    let adjustment_account = BillType::Adjustment.revenue_account_code();

    // Reverse the old AR position, raise the new one. The adjustment
    // revenue account is the contra side of both legs so each correction
    // group stays balanced.
    let mut lines = Vec::with_capacity(4);
    if old_amount > Decimal::ZERO {
        lines.push(PostingLine::credit(codes::AR_CONTROL, old_amount));
        lines.push(PostingLine::debit(adjustment_account, old_amount));
    }
    if new_amount > Decimal::ZERO {
        lines.push(PostingLine::debit(codes::AR_CONTROL, new_amount));
        lines.push(PostingLine::credit(adjustment_account, new_amount));
    }

    if !lines.is_empty() {
        ledger::post_entries(
            &mut tx,
            ctx.tenant_id,
            invoice_id,
            TransactionType::InvoiceCorrection,
            &lines,
            &invoice.invoice_number,
            &format!(
                "Correction of invoice {} from {} to {}",
                invoice.invoice_number, old_amount, new_amount
            ),
        )
        .await?;
    }

    let correction_note = format!(
        "Amount corrected from {} to {}: {}",
        old_amount, new_amount, reason
    );
    let new_notes = match invoice.notes.as_deref().filter(|n| !n.is_empty()) {
        Some(existing) => format!("{}\n{}", existing, correction_note),
        None => correction_note,
    };

    let updated = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET total_amount = $3, balance = $3, notes = $4
        WHERE tenant_id = $1 AND invoice_id = $2
        RETURNING invoice_id, tenant_id, customer_id, meter_id, invoice_number, invoice_date,
            due_date, balance_brought_forward, amount, total_amount, paid_amount,
            overpayment_applied, balance, status, state, notes, created_by, created_utc
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(invoice_id)
    .bind(new_amount)
    .bind(&new_notes)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to correct invoice: {}", e)))?;

    recalculation::recalculate_customer(&mut tx, ctx.tenant_id, invoice.customer_id).await?;

    tx.commit().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    metrics::record_invoice_action(&ctx.tenant_id.to_string(), "correction");

    timer.observe_duration();

    info!(
        invoice_number = %invoice.invoice_number,
        old_amount = %old_amount,
        new_amount = %new_amount,
        "Invoice amount corrected"
    );

    Ok(updated)
}

/// Thin wrapper so the admin "process payment" action and the payment API
/// share one implementation.
pub async fn apply_payment(
    db: &Database,
    ctx: &TenantContext,
    invoice_id: Uuid,
    input: RecordPayment,
    send_sms: bool,
    notifier: &dyn Notifier,
) -> Result<(Payment, Invoice), AppError> {
    payments::handle_payment(db, ctx, invoice_id, input, send_sms, notifier).await
}

/// Apply available overpayment credit to an invoice.
///
/// Safe to invoke repeatedly: once the invoice is paid, further calls are
/// reported no-ops. A posting failure (e.g. missing prepayment account)
/// rolls back the invoice mutation with it.
#[instrument(skip(db, ctx), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id, amount = %overpayment_amount))]
pub async fn apply_overpayment(
    db: &Database,
    ctx: &TenantContext,
    invoice_id: Uuid,
    overpayment_amount: Decimal,
) -> Result<OverpaymentApplication, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["apply_overpayment"])
        .start_timer();

    let mut tx = db.pool().begin().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let invoice = lock_invoice(&mut tx, ctx.tenant_id, invoice_id).await?;

    let result = apply_overpayment_locked(&mut tx, ctx, &invoice, overpayment_amount).await?;

    if result.applied_amount > Decimal::ZERO {
        recalculation::recalculate_customer(&mut tx, ctx.tenant_id, invoice.customer_id).await?;
        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;
        metrics::record_invoice_action(&ctx.tenant_id.to_string(), "overpayment_application");
    } else {
        tx.rollback().await.ok();
    }

    timer.observe_duration();

    Ok(result)
}

/// Allocation core, run on the caller's transaction against an
/// already-locked invoice row. Invoice generation uses this directly to
/// apply meter credit as part of raising a new invoice.
pub(crate) async fn apply_overpayment_locked(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    invoice: &Invoice,
    overpayment_amount: Decimal,
) -> Result<OverpaymentApplication, AppError> {
    if overpayment_amount <= Decimal::ZERO {
        return Ok(OverpaymentApplication {
            applied_amount: Decimal::ZERO,
            remaining_overpayment: overpayment_amount.max(Decimal::ZERO),
            invoice_cleared: false,
            message: "No overpayment to apply".to_string(),
        });
    }

    if invoice.balance <= Decimal::ZERO || invoice.parsed_status() == InvoiceStatus::FullyPaid {
        return Ok(OverpaymentApplication {
            applied_amount: Decimal::ZERO,
            remaining_overpayment: overpayment_amount,
            invoice_cleared: false,
            message: "Invoice already paid".to_string(),
        });
    }

    let applied = overpayment_amount.min(invoice.balance);
    let new_paid = (invoice.paid_amount + applied).min(invoice.total_amount);
    let new_balance = (invoice.total_amount - new_paid).max(Decimal::ZERO);
    let cleared = new_balance == Decimal::ZERO;

    let (status, state) = if cleared {
        (InvoiceStatus::FullyPaid.as_str(), "closed")
    } else {
        (InvoiceStatus::PartialPayment.as_str(), "open")
    };

    sqlx::query(
        r#"
        UPDATE invoices
        SET paid_amount = $3,
            overpayment_applied = overpayment_applied + $4,
            balance = $5,
            status = $6,
            state = $7
        WHERE tenant_id = $1 AND invoice_id = $2
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(invoice.invoice_id)
    .bind(new_paid)
    .bind(applied)
    .bind(new_balance)
    .bind(status)
    .bind(state)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to apply overpayment: {}", e)))?;

    let reference = format!("OVP-{}", invoice.invoice_number);
    let lines = vec![
        PostingLine::debit(codes::CUSTOMER_PREPAYMENT, applied),
        PostingLine::credit(codes::AR_CONTROL, applied),
    ];

    ledger::post_entries(
        conn,
        ctx.tenant_id,
        invoice.invoice_id,
        TransactionType::OverpaymentApplication,
        &lines,
        &reference,
        &format!(
            "Overpayment applied to invoice {}",
            invoice.invoice_number
        ),
    )
    .await?;

    info!(
        invoice_number = %invoice.invoice_number,
        applied = %applied,
        cleared = cleared,
        "Overpayment applied"
    );

    Ok(OverpaymentApplication {
        applied_amount: applied,
        remaining_overpayment: overpayment_amount - applied,
        invoice_cleared: cleared,
        message: format!("Applied {} to invoice {}", applied, invoice.invoice_number),
    })
}

async fn invoice_journal_rows(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<Vec<Journal>, AppError> {
    sqlx::query_as::<_, Journal>(
        r#"
        SELECT journal_id, tenant_id, account_id, transaction_id, transaction_type,
            amount, direction, reference, description, posted_utc
        FROM journals
        WHERE tenant_id = $1 AND transaction_id = $2 AND transaction_type = 'invoice'
        ORDER BY posted_utc, journal_id
        "#,
    )
    .bind(tenant_id)
    .bind(invoice_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load journals: {}", e)))
}
