//! Metrics module for billing-service.
//! Provides Prometheus metrics for financial operations and per-tenant metering.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Bills created counter (per-tenant metering)
pub static BILLS_CREATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Invoices generated counter (per-tenant metering)
pub static INVOICES_GENERATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Payments recorded counter (per-tenant metering)
pub static PAYMENTS_RECORDED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Journal rows posted counter
pub static JOURNAL_ROWS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Invoice actions counter (reversal, correction, overpayment application)
pub static INVOICE_ACTIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Notifications triggered counter
pub static NOTIFICATIONS_TRIGGERED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    BILLS_CREATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_bills_created_total",
                "Total bills created by tenant and bill type"
            ),
            &["tenant_id", "bill_type"]
        )
        .expect("Failed to register BILLS_CREATED_TOTAL")
    });

    INVOICES_GENERATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_invoices_generated_total",
                "Total invoices generated by tenant"
            ),
            &["tenant_id"]
        )
        .expect("Failed to register INVOICES_GENERATED_TOTAL")
    });

    PAYMENTS_RECORDED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_payments_recorded_total",
                "Total payments recorded by tenant and method"
            ),
            &["tenant_id", "method"]
        )
        .expect("Failed to register PAYMENTS_RECORDED_TOTAL")
    });

    JOURNAL_ROWS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_journal_rows_total",
                "Total journal rows posted by tenant and transaction type"
            ),
            &["tenant_id", "transaction_type"]
        )
        .expect("Failed to register JOURNAL_ROWS_TOTAL")
    });

    INVOICE_ACTIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_invoice_actions_total",
                "Total invoice actions by tenant and action"
            ),
            &["tenant_id", "action"]
        )
        .expect("Failed to register INVOICE_ACTIONS_TOTAL")
    });

    NOTIFICATIONS_TRIGGERED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_notifications_triggered_total",
                "Total notifications triggered by kind"
            ),
            &["tenant_id", "kind"]
        )
        .expect("Failed to register NOTIFICATIONS_TRIGGERED_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a bill created.
pub fn record_bill_created(tenant_id: &str, bill_type: &str) {
    if let Some(counter) = BILLS_CREATED_TOTAL.get() {
        counter.with_label_values(&[tenant_id, bill_type]).inc();
    }
}

/// Record an invoice generated.
pub fn record_invoice_generated(tenant_id: &str) {
    if let Some(counter) = INVOICES_GENERATED_TOTAL.get() {
        counter.with_label_values(&[tenant_id]).inc();
    }
}

/// Record a payment.
pub fn record_payment(tenant_id: &str, method: &str) {
    if let Some(counter) = PAYMENTS_RECORDED_TOTAL.get() {
        counter.with_label_values(&[tenant_id, method]).inc();
    }
}

/// Record posted journal rows.
pub fn record_journal_rows(tenant_id: &str, transaction_type: &str, rows: u64) {
    if let Some(counter) = JOURNAL_ROWS_TOTAL.get() {
        counter
            .with_label_values(&[tenant_id, transaction_type])
            .inc_by(rows);
    }
}

/// Record an invoice action.
pub fn record_invoice_action(tenant_id: &str, action: &str) {
    if let Some(counter) = INVOICE_ACTIONS_TOTAL.get() {
        counter.with_label_values(&[tenant_id, action]).inc();
    }
}

/// Record a triggered notification.
pub fn record_notification(tenant_id: &str, kind: &str) {
    if let Some(counter) = NOTIFICATIONS_TRIGGERED_TOTAL.get() {
        counter.with_label_values(&[tenant_id, kind]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
