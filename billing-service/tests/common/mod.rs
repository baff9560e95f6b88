//! Common test utilities for billing-service integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use billing_service::middleware::TenantContext;
use billing_service::models::{
    Bill, BillType, CreateAssignment, CreateBill, CreateCustomer, CreateMeter, Customer, Invoice,
    Meter, MeterAssignment,
};
use billing_service::services::{billing, invoicing, ledger, Database};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,billing_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Connect to the test database and apply migrations.
pub async fn test_db() -> Database {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run database-backed tests");

    let db = Database::new(&database_url, 5, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations()
        .await
        .expect("Failed to run migrations");
    db
}

/// Fresh tenant context with a seeded chart of accounts.
pub async fn setup_tenant(db: &Database) -> TenantContext {
    let ctx = TenantContext::new(Uuid::new_v4(), Uuid::new_v4());
    ledger::ensure_chart_of_accounts(db, ctx.tenant_id)
        .await
        .expect("Failed to seed chart of accounts");
    ctx
}

/// Customer with one active meter assignment.
pub async fn setup_customer_with_meter(
    db: &Database,
    ctx: &TenantContext,
) -> (Customer, Meter, MeterAssignment) {
    let customer = db
        .create_customer(&CreateCustomer {
            tenant_id: ctx.tenant_id,
            name: format!("Customer {}", &Uuid::new_v4().to_string()[..8]),
            phone: Some("+254700000000".to_string()),
        })
        .await
        .expect("Failed to create customer");

    let (meter, assignment) = add_meter(db, ctx, customer.customer_id).await;

    (customer, meter, assignment)
}

/// Additional meter assigned to an existing customer.
pub async fn add_meter(
    db: &Database,
    ctx: &TenantContext,
    customer_id: Uuid,
) -> (Meter, MeterAssignment) {
    let meter = db
        .create_meter(&CreateMeter {
            tenant_id: ctx.tenant_id,
            meter_number: format!("MTR-{}", &Uuid::new_v4().to_string()[..8]),
        })
        .await
        .expect("Failed to create meter");

    let assignment = db
        .create_assignment(&CreateAssignment {
            tenant_id: ctx.tenant_id,
            customer_id,
            meter_id: meter.meter_id,
        })
        .await
        .expect("Failed to create assignment");

    (meter, assignment)
}

/// One pending consumption bill for the given total.
pub async fn create_pending_bill(
    db: &Database,
    ctx: &TenantContext,
    customer_id: Uuid,
    assignment_id: Uuid,
    total: Decimal,
) -> Bill {
    billing::create_single_bill(
        db,
        ctx,
        CreateBill {
            customer_id,
            assignment_id,
            bill_type: BillType::Consumption,
            quantity: total,
            rate_used: Decimal::ONE,
            total_amount: Some(total),
        },
        None,
        false,
    )
    .await
    .expect("Failed to create bill")
}

/// Bill + consolidation: one open invoice for the given amount.
pub async fn create_open_invoice(
    db: &Database,
    ctx: &TenantContext,
    customer_id: Uuid,
    assignment_id: Uuid,
    total: Decimal,
) -> Invoice {
    let bill = create_pending_bill(db, ctx, customer_id, assignment_id, total).await;
    let invoices = invoicing::generate_for_bills(db, ctx, vec![bill])
        .await
        .expect("Failed to generate invoice");
    assert_eq!(invoices.len(), 1, "Expected exactly one invoice");
    invoices.into_iter().next().unwrap()
}

pub fn dec(value: i64) -> Decimal {
    Decimal::new(value, 0)
}

/// Assert that every journal group posted for a source document balances
/// and carries at least one debit and one credit.
pub async fn assert_balanced_journal(db: &Database, ctx: &TenantContext, transaction_id: Uuid) {
    let rows = db
        .journals_for_transaction(ctx.tenant_id, transaction_id)
        .await
        .expect("Failed to load journals");

    assert!(
        !rows.is_empty(),
        "Expected journal rows for transaction {}",
        transaction_id
    );

    let mut debits = Decimal::ZERO;
    let mut credits = Decimal::ZERO;
    let mut debit_count = 0;
    let mut credit_count = 0;

    for row in &rows {
        match row.direction.as_str() {
            "debit" => {
                debits += row.amount;
                debit_count += 1;
            }
            "credit" => {
                credits += row.amount;
                credit_count += 1;
            }
            other => panic!("Unexpected journal direction '{}'", other),
        }
    }

    assert!(debit_count >= 1, "Journal group must have a debit row");
    assert!(credit_count >= 1, "Journal group must have a credit row");
    assert_eq!(
        debits, credits,
        "Journal group for {} is unbalanced",
        transaction_id
    );
}

/// Sum journal rows for a transaction, grouped by (account code, direction).
pub async fn journal_totals_by_account(
    db: &Database,
    ctx: &TenantContext,
    transaction_id: Uuid,
) -> HashMap<(String, String), Decimal> {
    let rows = db
        .journals_for_transaction(ctx.tenant_id, transaction_id)
        .await
        .expect("Failed to load journals");

    let mut conn = db.pool().acquire().await.expect("Failed to acquire conn");
    let codes = ledger::account_codes_by_id(&mut conn, ctx.tenant_id)
        .await
        .expect("Failed to load account codes");

    let mut totals: HashMap<(String, String), Decimal> = HashMap::new();
    for row in rows {
        let code = codes
            .get(&row.account_id)
            .cloned()
            .unwrap_or_else(|| row.account_id.to_string());
        *totals
            .entry((code, row.direction.clone()))
            .or_insert(Decimal::ZERO) += row.amount;
    }
    totals
}
