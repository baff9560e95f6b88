//! Journal model: append-only double-entry ledger rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Entry direction (debit or credit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "debit",
            Direction::Credit => "credit",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(Direction::Debit),
            "credit" => Some(Direction::Credit),
            _ => None,
        }
    }

    /// The offsetting side, used when posting reversals.
    pub fn inverse(&self) -> Self {
        match self {
            Direction::Debit => Direction::Credit,
            Direction::Credit => Direction::Debit,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What kind of financial document a journal group belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Invoice,
    Payment,
    Overpayment,
    InvoiceReversal,
    InvoiceCorrection,
    PaymentReversal,
    OverpaymentApplication,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Invoice => "invoice",
            TransactionType::Payment => "payment",
            TransactionType::Overpayment => "overpayment",
            TransactionType::InvoiceReversal => "invoice_reversal",
            TransactionType::InvoiceCorrection => "invoice_correction",
            TransactionType::PaymentReversal => "payment_reversal",
            TransactionType::OverpaymentApplication => "overpayment_application",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "invoice" => Some(TransactionType::Invoice),
            "payment" => Some(TransactionType::Payment),
            "overpayment" => Some(TransactionType::Overpayment),
            "invoice_reversal" => Some(TransactionType::InvoiceReversal),
            "invoice_correction" => Some(TransactionType::InvoiceCorrection),
            "payment_reversal" => Some(TransactionType::PaymentReversal),
            "overpayment_application" => Some(TransactionType::OverpaymentApplication),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Single ledger row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Journal {
    pub journal_id: Uuid,
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub transaction_id: Uuid,
    pub transaction_type: String,
    pub amount: Decimal,
    pub direction: String,
    pub reference: String,
    pub description: Option<String>,
    pub posted_utc: DateTime<Utc>,
}

impl Journal {
    pub fn parsed_direction(&self) -> Option<Direction> {
        Direction::from_string(&self.direction)
    }

    /// Signed amount (positive for debit, negative for credit).
    pub fn signed_amount(&self) -> Decimal {
        match self.parsed_direction() {
            Some(Direction::Debit) => self.amount,
            Some(Direction::Credit) => -self.amount,
            None => Decimal::ZERO,
        }
    }
}

/// One side of a posting, addressed by account code. Codes are resolved to
/// account ids inside the posting transaction.
#[derive(Debug, Clone)]
pub struct PostingLine {
    pub account_code: String,
    pub amount: Decimal,
    pub direction: Direction,
    /// Overrides the group's transaction type for this row. The overpayment
    /// portion of a payment is tagged `overpayment` while sharing the
    /// payment's transaction id and reference.
    pub transaction_type: Option<TransactionType>,
    /// Row-level description; falls back to the group description.
    pub description: Option<String>,
}

impl PostingLine {
    pub fn debit(account_code: &str, amount: Decimal) -> Self {
        Self {
            account_code: account_code.to_string(),
            amount,
            direction: Direction::Debit,
            transaction_type: None,
            description: None,
        }
    }

    pub fn credit(account_code: &str, amount: Decimal) -> Self {
        Self {
            account_code: account_code.to_string(),
            amount,
            direction: Direction::Credit,
            transaction_type: None,
            description: None,
        }
    }

    pub fn tagged(mut self, transaction_type: TransactionType) -> Self {
        self.transaction_type = Some(transaction_type);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
