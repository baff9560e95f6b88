//! Request/response shapes for the admin HTTP API.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{BatchOutcome, BatchSummary, BillType, Invoice, Payment, PaymentMethod};

// -----------------------------------------------------------------------------
// Setup
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SeedAccountsResponse {
    pub created: u32,
}

#[derive(Debug, Serialize)]
pub struct AccountBalanceResponse {
    pub code: String,
    pub balance: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCustomerRequest {
    #[validate(length(min = 1, message = "Customer name must not be empty"))]
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMeterRequest {
    #[validate(length(min = 1, message = "Meter number must not be empty"))]
    pub meter_number: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAssignmentRequest {
    pub customer_id: Uuid,
    pub meter_id: Uuid,
}

// -----------------------------------------------------------------------------
// Bills
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateBillRequest {
    pub customer_id: Uuid,
    pub assignment_id: Uuid,
    pub bill_type: BillType,
    pub quantity: Decimal,
    pub rate_used: Decimal,
    pub total_amount: Option<Decimal>,
    pub reference: Option<String>,
    /// Consolidate into an invoice immediately.
    #[serde(default)]
    pub invoice: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchBillRequest {
    #[validate(length(min = 1, message = "At least one customer is required"))]
    pub customer_ids: Vec<Uuid>,
    pub bill_type: BillType,
    pub quantity: Decimal,
    pub rate_used: Decimal,
    pub total_amount: Option<Decimal>,
    pub reference: Option<String>,
    #[serde(default)]
    pub create_invoice: bool,
}

#[derive(Debug, Serialize)]
pub struct BatchBillResponse {
    pub outcome: BatchOutcome,
    pub summary: BatchSummary,
}

#[derive(Debug, Deserialize)]
pub struct ListBillsQuery {
    pub status: Option<String>,
    pub customer_id: Option<Uuid>,
    pub bill_ref: Option<String>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

// -----------------------------------------------------------------------------
// Invoices
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct GenerateInvoicesResponse {
    pub invoices: Vec<Invoice>,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub status: Option<String>,
    pub customer_id: Option<Uuid>,
    pub meter_id: Option<Uuid>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

// -----------------------------------------------------------------------------
// Payments
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[validate(length(min = 1, message = "Payment reference must not be empty"))]
    pub reference: String,
    pub payment_date: Option<NaiveDate>,
    #[serde(default)]
    pub send_sms: bool,
}

/// Structured outcome for the quick-payment action: business-rule
/// violations come back as `success: false` with the reason instead of an
/// error status.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<Invoice>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReversePaymentRequest {
    #[validate(length(min = 1, message = "Reversal reason must not be empty"))]
    pub reason: String,
}

// -----------------------------------------------------------------------------
// Invoice actions
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct ReverseInvoiceRequest {
    #[validate(length(min = 1, message = "Reversal reason must not be empty"))]
    pub reason: String,
    pub notes: Option<String>,
    #[serde(default)]
    pub send_sms: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdjustInvoiceRequest {
    pub new_amount: Decimal,
    #[validate(length(min = 1, message = "Correction reason must not be empty"))]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ApplyOverpaymentRequest {
    pub amount: Decimal,
}
