//! Balance recalculation tests. Require TEST_DATABASE_URL.

mod common;

use billing_service::models::{PaymentMethod, RecordPayment};
use billing_service::services::notifier::CountingNotifier;
use billing_service::services::payments::handle_payment;
use billing_service::services::recalculation::recalculate_meter_balances;
use common::{add_meter, create_open_invoice, dec, setup_customer_with_meter, setup_tenant, test_db};
use rust_decimal::Decimal;

#[tokio::test]
#[ignore]
async fn recalculation_is_idempotent() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, meter, assignment) = setup_customer_with_meter(&db, &ctx).await;

    let invoice = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(800),
    )
    .await;

    let notifier = CountingNotifier::new();
    handle_payment(
        &db,
        &ctx,
        invoice.invoice_id,
        RecordPayment {
            amount: dec(300),
            method: PaymentMethod::Cash,
            reference: "RECALC-1".to_string(),
            payment_date: None,
        },
        false,
        &notifier,
    )
    .await
    .unwrap();

    let first = recalculate_meter_balances(&db, ctx.tenant_id, meter.meter_id)
        .await
        .unwrap();
    let second = recalculate_meter_balances(&db, ctx.tenant_id, meter.meter_id)
        .await
        .unwrap();

    assert_eq!(first.total_billed, second.total_billed);
    assert_eq!(first.total_paid, second.total_paid);
    assert_eq!(first.balance, second.balance);
    assert_eq!(first.overpayment, second.overpayment);

    assert_eq!(first.total_billed, dec(800));
    assert_eq!(first.total_paid, dec(300));
    assert_eq!(first.balance, dec(500));
    assert_eq!(first.overpayment, Decimal::ZERO);
    assert_eq!(first.last_invoice_date, Some(invoice.invoice_date));
}

#[tokio::test]
#[ignore]
async fn manual_edits_converge_on_recalculation() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, meter, assignment) = setup_customer_with_meter(&db, &ctx).await;

    create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(250),
    )
    .await;

    // Corrupt the denormalized fields, as a hand edit would.
    sqlx::query("UPDATE meters SET balance = 99999, overpayment = 42 WHERE meter_id = $1")
        .bind(meter.meter_id)
        .execute(db.pool())
        .await
        .unwrap();

    let recalculated = recalculate_meter_balances(&db, ctx.tenant_id, meter.meter_id)
        .await
        .unwrap();
    assert_eq!(recalculated.balance, dec(250));
    assert_eq!(recalculated.overpayment, Decimal::ZERO);
}

#[tokio::test]
#[ignore]
async fn customer_totals_cover_only_active_assignments() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, _meter_a, assignment_a) = setup_customer_with_meter(&db, &ctx).await;
    let (_meter_b, assignment_b) = add_meter(&db, &ctx, customer.customer_id).await;

    create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment_a.assignment_id,
        dec(400),
    )
    .await;
    create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment_b.assignment_id,
        dec(100),
    )
    .await;

    let customer_after = db
        .get_customer(ctx.tenant_id, customer.customer_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(customer_after.balance, dec(500));

    // Deactivate meter B's assignment; its balance drops out of the
    // customer totals on the next recalculation.
    sqlx::query("UPDATE meter_assignments SET active = FALSE WHERE assignment_id = $1")
        .bind(assignment_b.assignment_id)
        .execute(db.pool())
        .await
        .unwrap();

    let mut conn = db.pool().acquire().await.unwrap();
    let recalculated = billing_service::services::recalculation::recalculate_customer(
        &mut conn,
        ctx.tenant_id,
        customer.customer_id,
    )
    .await
    .unwrap();

    assert_eq!(recalculated.balance, dec(400));
}
