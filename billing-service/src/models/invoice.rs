//! Invoice model: the consolidated billing document per meter per cycle.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    NotPaid,
    PartialPayment,
    FullyPaid,
    Reversed,
    /// Unpaid balance rolled forward into the next cycle's invoice.
    Cleared,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::NotPaid => "not_paid",
            InvoiceStatus::PartialPayment => "partial_payment",
            InvoiceStatus::FullyPaid => "fully_paid",
            InvoiceStatus::Reversed => "reversed",
            InvoiceStatus::Cleared => "cleared",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "partial_payment" => InvoiceStatus::PartialPayment,
            "fully_paid" => InvoiceStatus::FullyPaid,
            "reversed" => InvoiceStatus::Reversed,
            "cleared" => InvoiceStatus::Cleared,
            _ => InvoiceStatus::NotPaid,
        }
    }

    /// Human-readable form used in notes and notification payloads.
    pub fn label(&self) -> &'static str {
        match self {
            InvoiceStatus::NotPaid => "Not Paid",
            InvoiceStatus::PartialPayment => "Partial Payment",
            InvoiceStatus::FullyPaid => "Fully Paid",
            InvoiceStatus::Reversed => "Reversed",
            InvoiceStatus::Cleared => "Cleared",
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invoice state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    Open,
    Closed,
}

impl InvoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceState::Open => "open",
            InvoiceState::Closed => "closed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "closed" => InvoiceState::Closed,
            _ => InvoiceState::Open,
        }
    }
}

/// Invoice document.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub meter_id: Uuid,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub balance_brought_forward: Decimal,
    /// Current-cycle charges: sum of the linked bills' totals.
    pub amount: Decimal,
    /// `balance_brought_forward + amount`.
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub overpayment_applied: Decimal,
    /// `total_amount - paid_amount`, clamped at zero.
    pub balance: Decimal,
    pub status: String,
    pub state: String,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn parsed_status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn parsed_state(&self) -> InvoiceState {
        InvoiceState::from_string(&self.state)
    }

    pub fn can_be_reversed(&self) -> bool {
        !matches!(
            self.parsed_status(),
            InvoiceStatus::FullyPaid | InvoiceStatus::Reversed
        )
    }

    pub fn can_be_corrected(&self) -> bool {
        self.can_be_reversed()
    }

    pub fn can_receive_payment(&self) -> bool {
        self.balance > Decimal::ZERO && self.parsed_status() != InvoiceStatus::Reversed
    }
}

/// Join row linking a bill to the invoice that consolidated it.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InvoiceBill {
    pub invoice_bill_id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
    pub bill_id: Uuid,
    pub amount: Decimal,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<Uuid>,
    pub meter_id: Option<Uuid>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice_with(status: InvoiceStatus, balance: Decimal) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            meter_id: Uuid::new_v4(),
            invoice_number: "INV-000001".to_string(),
            invoice_date: chrono::Utc::now().date_naive(),
            due_date: chrono::Utc::now().date_naive(),
            balance_brought_forward: Decimal::ZERO,
            amount: balance,
            total_amount: balance,
            paid_amount: Decimal::ZERO,
            overpayment_applied: Decimal::ZERO,
            balance,
            status: status.as_str().to_string(),
            state: InvoiceState::Open.as_str().to_string(),
            notes: None,
            created_by: Uuid::new_v4(),
            created_utc: chrono::Utc::now(),
        }
    }

    #[test]
    fn unpaid_invoice_can_be_reversed_and_corrected() {
        let inv = invoice_with(InvoiceStatus::NotPaid, Decimal::new(1000, 0));
        assert!(inv.can_be_reversed());
        assert!(inv.can_be_corrected());
        assert!(inv.can_receive_payment());
    }

    #[test]
    fn fully_paid_invoice_cannot_be_reversed() {
        let inv = invoice_with(InvoiceStatus::FullyPaid, Decimal::ZERO);
        assert!(!inv.can_be_reversed());
        assert!(!inv.can_be_corrected());
        assert!(!inv.can_receive_payment());
    }

    #[test]
    fn reversed_invoice_cannot_receive_payment_even_with_balance() {
        let inv = invoice_with(InvoiceStatus::Reversed, Decimal::new(500, 0));
        assert!(!inv.can_receive_payment());
        assert!(!inv.can_be_reversed());
    }

    #[test]
    fn partial_payment_invoice_can_still_be_reversed() {
        let inv = invoice_with(InvoiceStatus::PartialPayment, Decimal::new(300, 0));
        assert!(inv.can_be_reversed());
        assert!(inv.can_receive_payment());
    }
}
