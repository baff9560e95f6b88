//! Financial recalculation: meter and customer running balances.
//!
//! Balances are always rewritten from the full invoice and payment history
//! rather than patched incrementally, so a second run without intervening
//! writes is a no-op and manual data corrections converge on the next
//! mutation.

use crate::models::{Customer, Meter};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::database::Database;

/// Recompute a meter's denormalized totals from its invoices and payments.
///
/// Reversed invoices (and their `REV-` counterparts) drop out of the billed
/// total; reversed payments drop out of the paid total.
#[instrument(skip(conn), fields(tenant_id = %tenant_id, meter_id = %meter_id))]
pub async fn recalculate_meter(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    meter_id: Uuid,
) -> Result<Meter, AppError> {
    let (total_billed, last_invoice_date): (Decimal, Option<NaiveDate>) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(total_amount), 0), MAX(invoice_date)
        FROM invoices
        WHERE tenant_id = $1 AND meter_id = $2 AND status <> 'reversed'
        "#,
    )
    .bind(tenant_id)
    .bind(meter_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum invoices: {}", e)))?;

    let total_paid: Decimal = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(amount), 0)
        FROM payments
        WHERE tenant_id = $1 AND meter_id = $2 AND status = 'completed'
        "#,
    )
    .bind(tenant_id)
    .bind(meter_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum payments: {}", e)))?;

    let balance = (total_billed - total_paid).max(Decimal::ZERO);
    let overpayment = (total_paid - total_billed).max(Decimal::ZERO);

    let meter = sqlx::query_as::<_, Meter>(
        r#"
        UPDATE meters
        SET total_billed = $3,
            total_paid = $4,
            balance = $5,
            overpayment = $6,
            last_invoice_date = $7
        WHERE tenant_id = $1 AND meter_id = $2
        RETURNING meter_id, tenant_id, meter_number, total_billed, total_paid, balance,
            overpayment, last_invoice_date, created_utc
        "#,
    )
    .bind(tenant_id)
    .bind(meter_id)
    .bind(total_billed)
    .bind(total_paid)
    .bind(balance)
    .bind(overpayment)
    .bind(last_invoice_date)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update meter: {}", e)))?
    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Meter {} not found", meter_id)))?;

    debug!(
        total_billed = %total_billed,
        total_paid = %total_paid,
        balance = %balance,
        overpayment = %overpayment,
        "Meter balance recalculated"
    );

    Ok(meter)
}

/// Recalculate every meter ever assigned to the customer, then rewrite the
/// customer's totals as the sum over meters on *active* assignments only.
#[instrument(skip(conn), fields(tenant_id = %tenant_id, customer_id = %customer_id))]
pub async fn recalculate_customer(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    customer_id: Uuid,
) -> Result<Customer, AppError> {
    let meter_ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT meter_id
        FROM meter_assignments
        WHERE tenant_id = $1 AND customer_id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(customer_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list meters: {}", e)))?;

    for meter_id in meter_ids {
        recalculate_meter(conn, tenant_id, meter_id).await?;
    }

    let (balance, overpayment): (Decimal, Decimal) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(m.balance), 0), COALESCE(SUM(m.overpayment), 0)
        FROM meters m
        JOIN meter_assignments ma ON ma.meter_id = m.meter_id AND ma.tenant_id = m.tenant_id
        WHERE m.tenant_id = $1 AND ma.customer_id = $2 AND ma.active
        "#,
    )
    .bind(tenant_id)
    .bind(customer_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum meter balances: {}", e)))?;

    let customer = sqlx::query_as::<_, Customer>(
        r#"
        UPDATE customers
        SET balance = $3, overpayment = $4
        WHERE tenant_id = $1 AND customer_id = $2
        RETURNING customer_id, tenant_id, name, phone, balance, overpayment, created_utc
        "#,
    )
    .bind(tenant_id)
    .bind(customer_id)
    .bind(balance)
    .bind(overpayment)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update customer: {}", e)))?
    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id)))?;

    Ok(customer)
}

/// Pool-level entry point for the admin recalculate trigger.
#[instrument(skip(db), fields(tenant_id = %tenant_id, meter_id = %meter_id))]
pub async fn recalculate_meter_balances(
    db: &Database,
    tenant_id: Uuid,
    meter_id: Uuid,
) -> Result<Meter, AppError> {
    let mut conn = db.pool().acquire().await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
    })?;
    recalculate_meter(&mut conn, tenant_id, meter_id).await
}
