//! Customer model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Customer. `balance`/`overpayment` are sums over the meters on the
/// customer's active assignments, rewritten by recalculation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub balance: Decimal,
    pub overpayment: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Input for registering a customer.
#[derive(Debug, Clone)]
pub struct CreateCustomer {
    pub tenant_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
}
