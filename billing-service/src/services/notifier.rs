//! Notification trigger interface.
//!
//! The engine only decides *that* a customer should be notified and with
//! which identifiers and amounts; message templating and SMS transport
//! belong to the platform's notification service. Failures are logged and
//! never fail the financial operation that triggered them.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::services::metrics;

/// What happened, for template selection downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    PaymentReceipt,
    InvoiceIssued,
    InvoiceReversed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PaymentReceipt => "payment_receipt",
            NotificationKind::InvoiceIssued => "invoice_issued",
            NotificationKind::InvoiceReversed => "invoice_reversed",
        }
    }
}

/// Identifiers and amounts handed to the notification service for
/// template substitution.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub kind: NotificationKind,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    /// Source document reference (invoice number or payment reference).
    pub reference: String,
    pub amount: Decimal,
    pub balance: Decimal,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Notifier is not enabled")]
    NotEnabled,
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), NotifierError>;

    fn is_enabled(&self) -> bool;
}

/// Default notifier: logs the trigger and counts it. Stands in until the
/// deployment wires a transport-backed implementation.
pub struct LogNotifier {
    enabled: bool,
}

impl LogNotifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), NotifierError> {
        if !self.enabled {
            return Err(NotifierError::NotEnabled);
        }

        tracing::info!(
            kind = request.kind.as_str(),
            customer_id = %request.customer_id,
            reference = %request.reference,
            amount = %request.amount,
            balance = %request.balance,
            "Notification triggered"
        );

        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Counting notifier for tests.
pub struct CountingNotifier {
    sent: AtomicU64,
}

impl CountingNotifier {
    pub fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
        }
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

impl Default for CountingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(&self, _request: &NotificationRequest) -> Result<(), NotifierError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Fire-and-forget dispatch used by the financial operations after commit.
pub async fn dispatch(notifier: &dyn Notifier, request: NotificationRequest) {
    metrics::record_notification(&request.tenant_id.to_string(), request.kind.as_str());

    match notifier.notify(&request).await {
        Ok(()) => {}
        Err(NotifierError::NotEnabled) => {
            tracing::debug!(kind = request.kind.as_str(), "Notifier disabled, skipping");
        }
        Err(e) => {
            metrics::record_error("notification", request.kind.as_str());
            tracing::warn!(error = %e, kind = request.kind.as_str(), "Notification failed");
        }
    }
}
