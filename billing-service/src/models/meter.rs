//! Meter and meter-assignment models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Physical meter. Balance fields are denormalized aggregates rewritten by
/// full recalculation, never patched incrementally.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Meter {
    pub meter_id: Uuid,
    pub tenant_id: Uuid,
    pub meter_number: String,
    pub total_billed: Decimal,
    pub total_paid: Decimal,
    pub balance: Decimal,
    pub overpayment: Decimal,
    pub last_invoice_date: Option<NaiveDate>,
    pub created_utc: DateTime<Utc>,
}

/// Input for registering a meter.
#[derive(Debug, Clone)]
pub struct CreateMeter {
    pub tenant_id: Uuid,
    pub meter_number: String,
}

/// Active link between a customer and a meter. Billing is always scoped to
/// an assignment, not directly to a customer.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MeterAssignment {
    pub assignment_id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub meter_id: Uuid,
    pub active: bool,
    pub assigned_utc: DateTime<Utc>,
}

/// Input for assigning a meter to a customer.
#[derive(Debug, Clone)]
pub struct CreateAssignment {
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub meter_id: Uuid,
}
