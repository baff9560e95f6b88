//! Payment application and reversal.
//!
//! A payment is one atomic unit: the payment row, its journal group and the
//! invoice mutation commit together or not at all. The invoice row is
//! locked for the duration so concurrent payments always split against the
//! latest committed balance.

use crate::middleware::TenantContext;
use crate::models::account::codes;
use crate::models::{Invoice, InvoiceStatus, Payment, PostingLine, RecordPayment, TransactionType};
use crate::services::metrics::{self, DB_QUERY_DURATION};
use crate::services::notifier::{self, NotificationKind, NotificationRequest, Notifier};
use crate::services::{database::Database, ledger, recalculation};
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Split a received amount into the portion applied to the invoice balance
/// and the overpayment remainder.
pub fn allocate(amount: Decimal, invoice_balance: Decimal) -> (Decimal, Decimal) {
    let applied = amount.min(invoice_balance).max(Decimal::ZERO);
    (applied, amount - applied)
}

/// Apply a payment to an invoice.
///
/// Retrying with the same `(invoice, reference)` returns the already
/// recorded payment instead of double-applying. Amounts beyond the invoice
/// balance become customer prepayment credit; `paid_amount` never exceeds
/// `total_amount` and `balance` never goes negative.
#[instrument(skip(db, ctx, input, notifier), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id, amount = %input.amount))]
pub async fn handle_payment(
    db: &Database,
    ctx: &TenantContext,
    invoice_id: Uuid,
    input: RecordPayment,
    send_sms: bool,
    notifier: &dyn Notifier,
) -> Result<(Payment, Invoice), AppError> {
    if input.amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Payment amount must be greater than zero"
        )));
    }

    let timer = DB_QUERY_DURATION
        .with_label_values(&["handle_payment"])
        .start_timer();

    let mut tx = db.pool().begin().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let invoice = lock_invoice(&mut tx, ctx.tenant_id, invoice_id).await?;

    if invoice.parsed_status() == InvoiceStatus::Reversed {
        return Err(AppError::BusinessRule(anyhow::anyhow!(
            "Cannot receive payment on reversed invoice {}",
            invoice.invoice_number
        )));
    }

    // Same (invoice, reference) retry: hand back the recorded payment.
    let existing = sqlx::query_as::<_, Payment>(
        r#"
        SELECT payment_id, tenant_id, customer_id, invoice_id, meter_id, amount, method,
            reference, status, payment_date, reversal_reason, reversed_utc, reversed_by,
            created_by, created_utc
        FROM payments
        WHERE tenant_id = $1 AND invoice_id = $2 AND reference = $3 AND status = 'completed'
        LIMIT 1
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(invoice_id)
    .bind(&input.reference)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check payment: {}", e)))?;

    if let Some(existing) = existing {
        tx.rollback().await.ok();
        info!(payment_id = %existing.payment_id, "Duplicate payment submission, returning existing");
        return Ok((existing, invoice));
    }

    let (applied, overpayment_portion) = allocate(input.amount, invoice.balance);

    let payment_date = input.payment_date.unwrap_or_else(|| Utc::now().date_naive());
    let payment_id = Uuid::new_v4();

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (payment_id, tenant_id, customer_id, invoice_id, meter_id,
            amount, method, reference, status, payment_date, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'completed', $9, $10)
        RETURNING payment_id, tenant_id, customer_id, invoice_id, meter_id, amount, method,
            reference, status, payment_date, reversal_reason, reversed_utc, reversed_by,
            created_by, created_utc
        "#,
    )
    .bind(payment_id)
    .bind(ctx.tenant_id)
    .bind(invoice.customer_id)
    .bind(invoice.invoice_id)
    .bind(invoice.meter_id)
    .bind(input.amount)
    .bind(input.method.as_str())
    .bind(&input.reference)
    .bind(payment_date)
    .bind(ctx.actor_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record payment: {}", e)))?;

    // Debit bank for the full amount; credit AR for what the invoice
    // absorbs; the excess goes to the prepayment liability.
    let mut lines = vec![PostingLine::debit(codes::BANK, input.amount)];
    if applied > Decimal::ZERO {
        lines.push(PostingLine::credit(codes::AR_CONTROL, applied));
    }
    if overpayment_portion > Decimal::ZERO {
        lines.push(
            PostingLine::credit(codes::CUSTOMER_PREPAYMENT, overpayment_portion)
                .tagged(TransactionType::Overpayment)
                .describe(format!(
                    "Overpayment on invoice {}",
                    invoice.invoice_number
                )),
        );
    }

    ledger::post_entries(
        &mut tx,
        ctx.tenant_id,
        payment_id,
        TransactionType::Payment,
        &lines,
        &payment.reference,
        &format!(
            "Payment {} against invoice {}",
            payment.reference, invoice.invoice_number
        ),
    )
    .await?;

    let invoice = if applied > Decimal::ZERO {
        apply_to_invoice(&mut tx, &invoice, applied).await?
    } else {
        invoice
    };

    recalculation::recalculate_customer(&mut tx, ctx.tenant_id, invoice.customer_id).await?;

    tx.commit().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    metrics::record_payment(&ctx.tenant_id.to_string(), &payment.method);

    timer.observe_duration();

    info!(
        payment_id = %payment.payment_id,
        applied = %applied,
        overpayment = %overpayment_portion,
        invoice_status = %invoice.status,
        "Payment applied"
    );

    if send_sms {
        notifier::dispatch(
            notifier,
            NotificationRequest {
                kind: NotificationKind::PaymentReceipt,
                tenant_id: ctx.tenant_id,
                customer_id: invoice.customer_id,
                reference: payment.reference.clone(),
                amount: payment.amount,
                balance: invoice.balance,
            },
        )
        .await;
    }

    Ok((payment, invoice))
}

async fn apply_to_invoice(
    conn: &mut PgConnection,
    invoice: &Invoice,
    applied: Decimal,
) -> Result<Invoice, AppError> {
    let new_paid = (invoice.paid_amount + applied).min(invoice.total_amount);
    let new_balance = (invoice.total_amount - new_paid).max(Decimal::ZERO);

    let (status, state) = if new_balance == Decimal::ZERO {
        (InvoiceStatus::FullyPaid, "closed")
    } else {
        (InvoiceStatus::PartialPayment, "open")
    };

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET paid_amount = $3, balance = $4, status = $5, state = $6
        WHERE tenant_id = $1 AND invoice_id = $2
        RETURNING invoice_id, tenant_id, customer_id, meter_id, invoice_number, invoice_date,
            due_date, balance_brought_forward, amount, total_amount, paid_amount,
            overpayment_applied, balance, status, state, notes, created_by, created_utc
        "#,
    )
    .bind(invoice.tenant_id)
    .bind(invoice.invoice_id)
    .bind(new_paid)
    .bind(new_balance)
    .bind(status.as_str())
    .bind(state)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

    Ok(invoice)
}

/// Reverse a recorded payment: offsetting journal rows, the invoice reopens
/// by the amount that had been applied, and the payment is flagged in place
/// (never deleted).
#[instrument(skip(db, ctx), fields(tenant_id = %ctx.tenant_id, payment_id = %payment_id))]
pub async fn reverse_payment(
    db: &Database,
    ctx: &TenantContext,
    payment_id: Uuid,
    reason: &str,
) -> Result<Payment, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["reverse_payment"])
        .start_timer();

    let mut tx = db.pool().begin().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
    })?;

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        SELECT payment_id, tenant_id, customer_id, invoice_id, meter_id, amount, method,
            reference, status, payment_date, reversal_reason, reversed_utc, reversed_by,
            created_by, created_utc
        FROM payments
        WHERE tenant_id = $1 AND payment_id = $2
        FOR UPDATE
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(payment_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock payment: {}", e)))?
    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

    if payment.is_reversed() {
        return Err(AppError::BusinessRule(anyhow::anyhow!(
            "Payment {} is already reversed",
            payment.reference
        )));
    }

    let original_rows = sqlx::query_as::<_, crate::models::Journal>(
        r#"
        SELECT journal_id, tenant_id, account_id, transaction_id, transaction_type,
            amount, direction, reference, description, posted_utc
        FROM journals
        WHERE tenant_id = $1 AND transaction_id = $2
        ORDER BY posted_utc, journal_id
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(payment_id)
    .fetch_all(&mut *tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load journals: {}", e)))?;

    let code_by_account = ledger::account_codes_by_id(&mut tx, ctx.tenant_id).await?;
    let inverse = ledger::inverse_lines(&original_rows, &code_by_account);

    if inverse.is_empty() {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Payment {} has no journal rows to reverse",
            payment.reference
        )));
    }

    ledger::post_entries(
        &mut tx,
        ctx.tenant_id,
        payment_id,
        TransactionType::PaymentReversal,
        &inverse,
        &format!("REV-{}", payment.reference),
        &format!("Reversal of payment {}: {}", payment.reference, reason),
    )
    .await?;

    // Reopen the invoice by the portion this payment had applied.
    if let Some(invoice_id) = payment.invoice_id {
        let invoice = lock_invoice(&mut tx, ctx.tenant_id, invoice_id).await?;
        let status = invoice.parsed_status();
        if status == InvoiceStatus::Reversed || status == InvoiceStatus::Cleared {
            warn!(
                invoice_id = %invoice_id,
                status = %invoice.status,
                "Skipping invoice reopen for terminal invoice"
            );
        } else {
            let applied: Decimal = original_rows
                .iter()
                .filter(|r| {
                    r.direction == "credit"
                        && code_by_account.get(&r.account_id).map(String::as_str)
                            == Some(codes::AR_CONTROL)
                })
                .map(|r| r.amount)
                .sum();

            let new_paid = (invoice.paid_amount - applied).max(Decimal::ZERO);
            let new_balance = (invoice.total_amount - new_paid).max(Decimal::ZERO);
            let new_status = if new_balance == Decimal::ZERO {
                InvoiceStatus::FullyPaid
            } else if new_paid > Decimal::ZERO {
                InvoiceStatus::PartialPayment
            } else {
                InvoiceStatus::NotPaid
            };
            let new_state = if new_balance == Decimal::ZERO {
                "closed"
            } else {
                "open"
            };

            sqlx::query(
                r#"
                UPDATE invoices
                SET paid_amount = $3, balance = $4, status = $5, state = $6
                WHERE tenant_id = $1 AND invoice_id = $2
                "#,
            )
            .bind(ctx.tenant_id)
            .bind(invoice_id)
            .bind(new_paid)
            .bind(new_balance)
            .bind(new_status.as_str())
            .bind(new_state)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to reopen invoice: {}", e))
            })?;
        }
    }

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET status = 'reversed', reversal_reason = $3, reversed_utc = NOW(), reversed_by = $4
        WHERE tenant_id = $1 AND payment_id = $2
        RETURNING payment_id, tenant_id, customer_id, invoice_id, meter_id, amount, method,
            reference, status, payment_date, reversal_reason, reversed_utc, reversed_by,
            created_by, created_utc
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(payment_id)
    .bind(reason)
    .bind(ctx.actor_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update payment: {}", e)))?;

    recalculation::recalculate_customer(&mut tx, ctx.tenant_id, payment.customer_id).await?;

    tx.commit().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
    })?;

    metrics::record_invoice_action(&ctx.tenant_id.to_string(), "payment_reversal");

    timer.observe_duration();

    info!(payment_id = %payment.payment_id, "Payment reversed");

    Ok(payment)
}

pub(crate) async fn lock_invoice(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<Invoice, AppError> {
    sqlx::query_as::<_, Invoice>(
        r#"
        SELECT invoice_id, tenant_id, customer_id, meter_id, invoice_number, invoice_date,
            due_date, balance_brought_forward, amount, total_amount, paid_amount,
            overpayment_applied, balance, status, state, notes, created_by, created_utc
        FROM invoices
        WHERE tenant_id = $1 AND invoice_id = $2
        FOR UPDATE
        "#,
    )
    .bind(tenant_id)
    .bind(invoice_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?
    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))
}
