//! Payment application tests. Require TEST_DATABASE_URL.

mod common;

use billing_service::models::account::codes;
use billing_service::models::{BillType, PaymentMethod, RecordPayment};
use billing_service::services::ledger;
use billing_service::services::notifier::CountingNotifier;
use billing_service::services::payments::{handle_payment, reverse_payment};
use common::{
    assert_balanced_journal, create_open_invoice, dec, journal_totals_by_account,
    setup_customer_with_meter, setup_tenant, test_db,
};
use rust_decimal::Decimal;
use service_core::error::AppError;

fn payment(amount: Decimal, reference: &str) -> RecordPayment {
    RecordPayment {
        amount,
        method: PaymentMethod::Mpesa,
        reference: reference.to_string(),
        payment_date: None,
    }
}

#[tokio::test]
#[ignore]
async fn exact_payment_closes_invoice() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, _meter, assignment) = setup_customer_with_meter(&db, &ctx).await;
    let invoice = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(1000),
    )
    .await;

    let notifier = CountingNotifier::new();
    let (recorded, updated) = handle_payment(
        &db,
        &ctx,
        invoice.invoice_id,
        payment(dec(1000), "TXN-EXACT"),
        true,
        &notifier,
    )
    .await
    .unwrap();

    assert_eq!(recorded.amount, dec(1000));
    assert_eq!(updated.paid_amount, dec(1000));
    assert_eq!(updated.balance, Decimal::ZERO);
    assert_eq!(updated.status, "fully_paid");
    assert_eq!(updated.state, "closed");
    assert_eq!(notifier.sent_count(), 1);

    assert_balanced_journal(&db, &ctx, recorded.payment_id).await;
    let totals = journal_totals_by_account(&db, &ctx, recorded.payment_id).await;
    assert_eq!(
        totals[&(codes::BANK.to_string(), "debit".to_string())],
        dec(1000)
    );
    assert_eq!(
        totals[&(codes::AR_CONTROL.to_string(), "credit".to_string())],
        dec(1000)
    );
    assert!(
        !totals.contains_key(&(codes::CUSTOMER_PREPAYMENT.to_string(), "credit".to_string())),
        "No overpayment row for an exact payment"
    );
}

#[tokio::test]
#[ignore]
async fn excess_payment_becomes_meter_overpayment() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, meter, assignment) = setup_customer_with_meter(&db, &ctx).await;
    let invoice = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(500),
    )
    .await;

    let notifier = CountingNotifier::new();
    let (recorded, updated) = handle_payment(
        &db,
        &ctx,
        invoice.invoice_id,
        payment(dec(800), "TXN-EXCESS"),
        false,
        &notifier,
    )
    .await
    .unwrap();

    // paid_amount caps at the invoice total; the rest is prepayment credit.
    assert_eq!(updated.paid_amount, dec(500));
    assert_eq!(updated.balance, Decimal::ZERO);
    assert_eq!(updated.status, "fully_paid");

    let totals = journal_totals_by_account(&db, &ctx, recorded.payment_id).await;
    assert_eq!(
        totals[&(codes::AR_CONTROL.to_string(), "credit".to_string())],
        dec(500)
    );
    assert_eq!(
        totals[&(codes::CUSTOMER_PREPAYMENT.to_string(), "credit".to_string())],
        dec(300)
    );

    let meter_after = db
        .get_meter(ctx.tenant_id, meter.meter_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meter_after.overpayment, dec(300));

    let customer_after = db
        .get_customer(ctx.tenant_id, customer.customer_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(customer_after.overpayment, dec(300));
}

#[tokio::test]
#[ignore]
async fn zero_and_negative_amounts_are_rejected() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, _meter, assignment) = setup_customer_with_meter(&db, &ctx).await;
    let invoice = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(100),
    )
    .await;

    let notifier = CountingNotifier::new();
    for amount in [Decimal::ZERO, dec(-50)] {
        let err = handle_payment(
            &db,
            &ctx,
            invoice.invoice_id,
            payment(amount, "TXN-BAD"),
            false,
            &notifier,
        )
        .await
        .unwrap_err();
        assert!(
            err.to_string().contains("must be greater than zero"),
            "Got: {}",
            err
        );
    }

    // Nothing was recorded.
    let payments = db
        .payments_for_invoice(ctx.tenant_id, invoice.invoice_id)
        .await
        .unwrap();
    assert!(payments.is_empty());
}

#[tokio::test]
#[ignore]
async fn retry_with_same_reference_is_idempotent() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, _meter, assignment) = setup_customer_with_meter(&db, &ctx).await;
    let invoice = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(400),
    )
    .await;

    let notifier = CountingNotifier::new();
    let (first, _) = handle_payment(
        &db,
        &ctx,
        invoice.invoice_id,
        payment(dec(200), "TXN-RETRY"),
        false,
        &notifier,
    )
    .await
    .unwrap();

    let (second, updated) = handle_payment(
        &db,
        &ctx,
        invoice.invoice_id,
        payment(dec(200), "TXN-RETRY"),
        false,
        &notifier,
    )
    .await
    .unwrap();

    assert_eq!(first.payment_id, second.payment_id);
    assert_eq!(updated.paid_amount, dec(200), "Not applied twice");
    assert_eq!(updated.balance, dec(200));

    let payments = db
        .payments_for_invoice(ctx.tenant_id, invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
}

#[tokio::test]
#[ignore]
async fn same_reference_for_different_customers_is_allowed() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer_a, _m1, assignment_a) = setup_customer_with_meter(&db, &ctx).await;
    let (customer_b, _m2, assignment_b) = setup_customer_with_meter(&db, &ctx).await;

    let invoice_a = create_open_invoice(
        &db,
        &ctx,
        customer_a.customer_id,
        assignment_a.assignment_id,
        dec(100),
    )
    .await;
    let invoice_b = create_open_invoice(
        &db,
        &ctx,
        customer_b.customer_id,
        assignment_b.assignment_id,
        dec(100),
    )
    .await;

    let notifier = CountingNotifier::new();
    let (pay_a, _) = handle_payment(
        &db,
        &ctx,
        invoice_a.invoice_id,
        payment(dec(100), "SHARED-REF"),
        false,
        &notifier,
    )
    .await
    .unwrap();
    let (pay_b, _) = handle_payment(
        &db,
        &ctx,
        invoice_b.invoice_id,
        payment(dec(100), "SHARED-REF"),
        false,
        &notifier,
    )
    .await
    .unwrap();

    assert_ne!(pay_a.payment_id, pay_b.payment_id);
    assert_eq!(pay_a.reference, pay_b.reference);
}

#[tokio::test]
#[ignore]
async fn sequential_partial_payments_compound() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, _meter, assignment) = setup_customer_with_meter(&db, &ctx).await;
    let invoice = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(900),
    )
    .await;

    let notifier = CountingNotifier::new();
    let (_, after_first) = handle_payment(
        &db,
        &ctx,
        invoice.invoice_id,
        payment(dec(300), "TXN-P1"),
        false,
        &notifier,
    )
    .await
    .unwrap();
    assert_eq!(after_first.status, "partial_payment");
    assert_eq!(after_first.state, "open");
    assert_eq!(after_first.balance, dec(600));

    let (_, after_second) = handle_payment(
        &db,
        &ctx,
        invoice.invoice_id,
        payment(dec(600), "TXN-P2"),
        false,
        &notifier,
    )
    .await
    .unwrap();
    assert_eq!(after_second.status, "fully_paid");
    assert_eq!(after_second.balance, Decimal::ZERO);
}

#[tokio::test]
#[ignore]
async fn very_large_payment_keeps_invoice_capped() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, meter, assignment) = setup_customer_with_meter(&db, &ctx).await;
    let invoice = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(100),
    )
    .await;

    let huge = dec(1_000_000_000);
    let notifier = CountingNotifier::new();
    let (_, updated) = handle_payment(
        &db,
        &ctx,
        invoice.invoice_id,
        payment(huge, "TXN-HUGE"),
        false,
        &notifier,
    )
    .await
    .unwrap();

    assert_eq!(updated.paid_amount, dec(100));
    assert_eq!(updated.balance, Decimal::ZERO);

    let meter_after = db
        .get_meter(ctx.tenant_id, meter.meter_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meter_after.overpayment, huge - dec(100));
    assert!(meter_after.balance >= Decimal::ZERO);
}

#[tokio::test]
#[ignore]
async fn account_balances_follow_the_ledger() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, _meter, assignment) = setup_customer_with_meter(&db, &ctx).await;
    let invoice = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(1000),
    )
    .await;

    let notifier = CountingNotifier::new();
    handle_payment(
        &db,
        &ctx,
        invoice.invoice_id,
        payment(dec(400), "TXN-LEDGER"),
        false,
        &notifier,
    )
    .await
    .unwrap();

    // Invoice debited AR 1000; the payment moved 400 of it into the bank.
    let ar = ledger::account_balance(&db, ctx.tenant_id, codes::AR_CONTROL)
        .await
        .unwrap()
        .unwrap();
    let bank = ledger::account_balance(&db, ctx.tenant_id, codes::BANK)
        .await
        .unwrap()
        .unwrap();
    let revenue = ledger::account_balance(
        &db,
        ctx.tenant_id,
        BillType::Consumption.revenue_account_code(),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(ar, dec(600));
    assert_eq!(bank, dec(400));
    assert_eq!(revenue, dec(1000), "Credit-normal balance reads positive");
}

#[tokio::test]
#[ignore]
async fn reversing_a_payment_reopens_the_invoice() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, meter, assignment) = setup_customer_with_meter(&db, &ctx).await;
    let invoice = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(500),
    )
    .await;

    let notifier = CountingNotifier::new();
    let (recorded, _) = handle_payment(
        &db,
        &ctx,
        invoice.invoice_id,
        payment(dec(500), "TXN-REVERSE-ME"),
        false,
        &notifier,
    )
    .await
    .unwrap();

    let reversed = reverse_payment(&db, &ctx, recorded.payment_id, "posted in error")
        .await
        .unwrap();
    assert_eq!(reversed.status, "reversed");
    assert_eq!(reversed.reversal_reason.as_deref(), Some("posted in error"));
    assert!(reversed.reversed_utc.is_some());

    let invoice_after = db
        .get_invoice(ctx.tenant_id, invoice.invoice_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invoice_after.paid_amount, Decimal::ZERO);
    assert_eq!(invoice_after.balance, dec(500));
    assert_eq!(invoice_after.status, "not_paid");
    assert_eq!(invoice_after.state, "open");

    // Offsetting rows keep the payment's journal group balanced.
    assert_balanced_journal(&db, &ctx, recorded.payment_id).await;

    let meter_after = db
        .get_meter(ctx.tenant_id, meter.meter_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meter_after.balance, dec(500));
    assert_eq!(meter_after.total_paid, Decimal::ZERO);

    // Reversing twice is a business-rule violation, not a crash.
    let err = reverse_payment(&db, &ctx, recorded.payment_id, "again")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BusinessRule(_)));
}
