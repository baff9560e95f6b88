pub mod billing;
pub mod database;
pub mod invoice_actions;
pub mod invoicing;
pub mod ledger;
pub mod metrics;
pub mod notifier;
pub mod payments;
pub mod recalculation;

pub use database::Database;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{LogNotifier, Notifier};
