//! Bill model: one charge line before consolidation into an invoice.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Charge type. Each variant maps to a fixed revenue account so a typo can
/// no longer surface as a missing-account failure at posting time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillType {
    Consumption,
    ServiceFee,
    Penalty,
    Adjustment,
}

impl BillType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillType::Consumption => "consumption",
            BillType::ServiceFee => "service_fee",
            BillType::Penalty => "penalty",
            BillType::Adjustment => "adjustment",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "consumption" => Some(BillType::Consumption),
            "service_fee" => Some(BillType::ServiceFee),
            "penalty" => Some(BillType::Penalty),
            "adjustment" => Some(BillType::Adjustment),
            _ => None,
        }
    }

    /// Revenue account credited when a bill of this type is invoiced.
    pub fn revenue_account_code(&self) -> &'static str {
        match self {
            BillType::Consumption => "REV-CONSUMPTION",
            BillType::ServiceFee => "REV-SERVICE-FEE",
            BillType::Penalty => "REV-PENALTY",
            BillType::Adjustment => "REV-ADJUSTMENT",
        }
    }
}

impl std::fmt::Display for BillType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bill status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Pending,
    Invoiced,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Pending => "pending",
            BillStatus::Invoiced => "invoiced",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "invoiced" => BillStatus::Invoiced,
            _ => BillStatus::Pending,
        }
    }
}

/// One charge line.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Bill {
    pub bill_id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub assignment_id: Uuid,
    pub bill_type: String,
    pub quantity: Decimal,
    pub rate_used: Decimal,
    pub total_amount: Decimal,
    pub status: String,
    pub bill_ref: String,
    pub generation_date: NaiveDate,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl Bill {
    pub fn parsed_type(&self) -> Option<BillType> {
        BillType::from_string(&self.bill_type)
    }

    pub fn parsed_status(&self) -> BillStatus {
        BillStatus::from_string(&self.status)
    }
}

/// Input for creating a bill.
#[derive(Debug, Clone)]
pub struct CreateBill {
    pub customer_id: Uuid,
    pub assignment_id: Uuid,
    pub bill_type: BillType,
    pub quantity: Decimal,
    pub rate_used: Decimal,
    /// Total charge. Callers may supply it (imported bills); otherwise it
    /// defaults to `quantity * rate_used`.
    pub total_amount: Option<Decimal>,
}

impl CreateBill {
    pub fn effective_total(&self) -> Decimal {
        self.total_amount
            .unwrap_or_else(|| self.quantity * self.rate_used)
    }
}

/// Filter parameters for listing bills.
#[derive(Debug, Clone, Default)]
pub struct ListBillsFilter {
    pub status: Option<BillStatus>,
    pub customer_id: Option<Uuid>,
    pub bill_ref: Option<String>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
