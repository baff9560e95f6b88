//! Batch billing run models and reporting shapes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bill::BillType;

/// Charge template applied to every active assignment in a batch run.
#[derive(Debug, Clone)]
pub struct BillTemplate {
    pub bill_type: BillType,
    pub quantity: Decimal,
    pub rate_used: Decimal,
    pub total_amount: Option<Decimal>,
}

/// One bill successfully created during a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedBill {
    pub bill_id: Uuid,
    pub customer_id: Uuid,
    pub assignment_id: Uuid,
    pub meter_id: Uuid,
    pub amount: Decimal,
}

/// A per-customer failure collected during a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchError {
    pub customer_id: Uuid,
    pub message: String,
}

/// Aggregated result of a batch billing run. Failures are isolated per
/// customer; whatever succeeded stays committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub created: u32,
    pub skipped: u32,
    pub skipped_customers: Vec<Uuid>,
    pub errors: Vec<BatchError>,
    pub created_bills: Vec<CreatedBill>,
    pub invoices_created: u32,
    pub invoice_errors: Vec<BatchError>,
    pub reference: String,
}

impl BatchOutcome {
    pub fn new(reference: String) -> Self {
        Self {
            created: 0,
            skipped: 0,
            skipped_customers: Vec::new(),
            errors: Vec::new(),
            created_bills: Vec::new(),
            invoices_created: 0,
            invoice_errors: Vec::new(),
            reference,
        }
    }

    /// Flat reporting shape for run summaries.
    pub fn summary(&self) -> BatchSummary {
        let attempts = self.created + self.errors.len() as u32;
        let success_rate = if self.errors.is_empty() || attempts == 0 {
            100.0
        } else {
            f64::from(self.created) / f64::from(attempts) * 100.0
        };

        BatchSummary {
            reference: self.reference.clone(),
            created: self.created,
            skipped: self.skipped,
            failed: self.errors.len() as u32,
            invoices_created: self.invoices_created,
            invoice_failures: self.invoice_errors.len() as u32,
            success_rate,
            skipped_customers: self.skipped_customers.clone(),
        }
    }
}

/// Flat batch report consumed by run logs and the admin panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub reference: String,
    pub created: u32,
    pub skipped: u32,
    pub failed: u32,
    pub invoices_created: u32,
    pub invoice_failures: u32,
    pub success_rate: f64,
    pub skipped_customers: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reports_full_success_rate_with_no_failures() {
        let mut outcome = BatchOutcome::new("2026-AUG-001".to_string());
        outcome.created = 5;
        outcome.skipped = 2;

        let summary = outcome.summary();
        assert_eq!(summary.success_rate, 100.0);
        assert_eq!(summary.created, 5);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn summary_computes_rate_from_created_and_failed() {
        let mut outcome = BatchOutcome::new("2026-AUG-002".to_string());
        outcome.created = 3;
        outcome.errors.push(BatchError {
            customer_id: Uuid::new_v4(),
            message: "No active meter assignments found for customer".to_string(),
        });

        let summary = outcome.summary();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.success_rate, 75.0);
    }

    #[test]
    fn empty_run_reports_full_success_rate() {
        let outcome = BatchOutcome::new("2026-AUG-003".to_string());
        assert_eq!(outcome.summary().success_rate, 100.0);
    }
}
