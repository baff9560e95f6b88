//! Payment model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Mpesa,
    BankTransfer,
    Cheque,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Mpesa => "mpesa",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cheque => "cheque",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "mpesa" => PaymentMethod::Mpesa,
            "bank_transfer" => PaymentMethod::BankTransfer,
            "cheque" => PaymentMethod::Cheque,
            _ => PaymentMethod::Cash,
        }
    }
}

/// Payment status. Payments are never deleted, only reversed in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
    Reversed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Completed => "completed",
            PaymentStatus::Reversed => "reversed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "reversed" => PaymentStatus::Reversed,
            _ => PaymentStatus::Completed,
        }
    }
}

/// Money received. `invoice_id` is null for advance/unallocated payments.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub meter_id: Option<Uuid>,
    pub amount: Decimal,
    pub method: String,
    pub reference: String,
    pub status: String,
    pub payment_date: NaiveDate,
    pub reversal_reason: Option<String>,
    pub reversed_utc: Option<DateTime<Utc>>,
    pub reversed_by: Option<Uuid>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl Payment {
    pub fn parsed_status(&self) -> PaymentStatus {
        PaymentStatus::from_string(&self.status)
    }

    pub fn is_reversed(&self) -> bool {
        self.parsed_status() == PaymentStatus::Reversed
    }
}

/// Input for recording a payment against an invoice.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: String,
    pub payment_date: Option<NaiveDate>,
}
