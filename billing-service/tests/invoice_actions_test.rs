//! Invoice action tests: reversal, correction, overpayment application.
//! Require TEST_DATABASE_URL.

mod common;

use billing_service::models::account::codes;
use billing_service::models::{
    AccountType, CreateAccount, ListInvoicesFilter, PaymentMethod, RecordPayment,
};
use billing_service::services::invoice_actions::{
    adjust_amount, apply_overpayment, reverse_invoice,
};
use billing_service::services::notifier::CountingNotifier;
use billing_service::services::payments::handle_payment;
use billing_service::services::{billing, invoicing, ledger};
use common::{
    assert_balanced_journal, create_open_invoice, create_pending_bill, dec,
    journal_totals_by_account, setup_customer_with_meter, setup_tenant, test_db,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

#[tokio::test]
#[ignore]
async fn reversal_preserves_audit_trail() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, meter, assignment) = setup_customer_with_meter(&db, &ctx).await;
    let invoice = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(750),
    )
    .await;

    // Seed some prior notes that must survive the reversal.
    sqlx::query("UPDATE invoices SET notes = 'original note' WHERE invoice_id = $1")
        .bind(invoice.invoice_id)
        .execute(db.pool())
        .await
        .unwrap();

    let notifier = CountingNotifier::new();
    let reversed = reverse_invoice(
        &db,
        &ctx,
        invoice.invoice_id,
        "billed wrong meter",
        Some("reading belonged to neighbour"),
        true,
        &notifier,
    )
    .await
    .unwrap();

    assert_eq!(reversed.status, "reversed");
    assert_eq!(reversed.state, "closed");
    assert_eq!(reversed.balance, Decimal::ZERO);
    let notes = reversed.notes.as_deref().unwrap();
    assert!(notes.contains("original note"), "Got: {}", notes);
    assert!(notes.contains("billed wrong meter"), "Got: {}", notes);
    assert!(notes.contains("reading belonged to neighbour"), "Got: {}", notes);
    assert_eq!(notifier.sent_count(), 1);

    // Paired REV- document exists.
    let rev_number = format!("REV-{}", invoice.invoice_number);
    let all = db
        .list_invoices(
            ctx.tenant_id,
            &ListInvoicesFilter {
                customer_id: Some(customer.customer_id),
                page_size: 50,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let rev = all
        .iter()
        .find(|i| i.invoice_number == rev_number)
        .expect("Reversal invoice missing");
    assert_eq!(rev.status, "reversed");
    assert_eq!(rev.total_amount, dec(750));

    // Offsetting rows cancel the original posting and the combined group
    // still balances.
    assert_balanced_journal(&db, &ctx, invoice.invoice_id).await;
    let totals = journal_totals_by_account(&db, &ctx, invoice.invoice_id).await;
    assert_eq!(
        totals[&(codes::AR_CONTROL.to_string(), "debit".to_string())],
        totals[&(codes::AR_CONTROL.to_string(), "credit".to_string())],
        "AR position is fully offset"
    );

    // The meter no longer owes the reversed amount.
    let meter_after = db
        .get_meter(ctx.tenant_id, meter.meter_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meter_after.balance, Decimal::ZERO);
    assert_eq!(meter_after.total_billed, Decimal::ZERO);
}

#[tokio::test]
#[ignore]
async fn paid_invoice_cannot_be_reversed() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, _meter, assignment) = setup_customer_with_meter(&db, &ctx).await;
    let invoice = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(200),
    )
    .await;

    let notifier = CountingNotifier::new();
    handle_payment(
        &db,
        &ctx,
        invoice.invoice_id,
        RecordPayment {
            amount: dec(200),
            method: PaymentMethod::Cash,
            reference: "PAID-UP".to_string(),
            payment_date: None,
        },
        false,
        &notifier,
    )
    .await
    .unwrap();

    let err = reverse_invoice(
        &db,
        &ctx,
        invoice.invoice_id,
        "too late",
        None,
        false,
        &notifier,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BusinessRule(_)), "Got: {}", err);

    // And the already-reversed guard holds too.
    let fresh = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(50),
    )
    .await;
    reverse_invoice(&db, &ctx, fresh.invoice_id, "first", None, false, &notifier)
        .await
        .unwrap();
    let err = reverse_invoice(&db, &ctx, fresh.invoice_id, "second", None, false, &notifier)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BusinessRule(_)));
}

#[tokio::test]
#[ignore]
async fn correction_posts_reversal_and_new_amount() {
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

    let corrected = adjust_amount(&db, &ctx, invoice.invoice_id, dec(800), "meter misread")
        .await
        .unwrap();

    assert_eq!(corrected.total_amount, dec(800));
    assert_eq!(corrected.balance, dec(800));
    let notes = corrected.notes.as_deref().unwrap();
    assert!(notes.contains("1000"), "Got: {}", notes);
    assert!(notes.contains("800"), "Got: {}", notes);
    assert!(notes.contains("meter misread"), "Got: {}", notes);

    // AR shows one correction credit of the old amount and one correction
    // debit of the new amount.
    let rows = db
        .journals_for_transaction(ctx.tenant_id, invoice.invoice_id)
        .await
        .unwrap();
    let correction_rows: Vec<_> = rows
        .iter()
        .filter(|r| r.transaction_type == "invoice_correction")
        .collect();
    assert!(!correction_rows.is_empty());

    let mut conn = db.pool().acquire().await.unwrap();
    let code_by_account = ledger::account_codes_by_id(&mut conn, ctx.tenant_id)
        .await
        .unwrap();
    let ar_credit: Decimal = correction_rows
        .iter()
        .filter(|r| {
            r.direction == "credit"
                && code_by_account.get(&r.account_id).map(String::as_str)
                    == Some(codes::AR_CONTROL)
        })
        .map(|r| r.amount)
        .sum();
    let ar_debit: Decimal = correction_rows
        .iter()
        .filter(|r| {
            r.direction == "debit"
                && code_by_account.get(&r.account_id).map(String::as_str)
                    == Some(codes::AR_CONTROL)
        })
        .map(|r| r.amount)
        .sum();
    assert_eq!(ar_credit, dec(1000));
    assert_eq!(ar_debit, dec(800));

    assert_balanced_journal(&db, &ctx, invoice.invoice_id).await;
}

#[tokio::test]
#[ignore]
async fn correction_with_unchanged_amount_is_a_noop() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, _meter, assignment) = setup_customer_with_meter(&db, &ctx).await;
    let invoice = create_open_invoice(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(300),
    )
    .await;

    let before = db
        .journals_for_transaction(ctx.tenant_id, invoice.invoice_id)
        .await
        .unwrap()
        .len();

    let unchanged = adjust_amount(&db, &ctx, invoice.invoice_id, dec(300), "same")
        .await
        .unwrap();
    assert_eq!(unchanged.total_amount, dec(300));

    let after = db
        .journals_for_transaction(ctx.tenant_id, invoice.invoice_id)
        .await
        .unwrap()
        .len();
    assert_eq!(before, after, "No correction rows for a no-op");
}

#[tokio::test]
#[ignore]
async fn overpayment_application_clears_and_then_noops() {
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

    // Credit of 1500 against a 1000 balance.
    let first = apply_overpayment(&db, &ctx, invoice.invoice_id, dec(1500))
        .await
        .unwrap();
    assert_eq!(first.applied_amount, dec(1000));
    assert_eq!(first.remaining_overpayment, dec(500));
    assert!(first.invoice_cleared);

    let after = db
        .get_invoice(ctx.tenant_id, invoice.invoice_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, "fully_paid");
    assert_eq!(after.state, "closed");
    assert_eq!(after.overpayment_applied, dec(1000));
    assert_eq!(after.balance, Decimal::ZERO);

    // Prepayment liability was drawn down against AR.
    let totals = journal_totals_by_account(&db, &ctx, invoice.invoice_id).await;
    assert_eq!(
        totals[&(codes::CUSTOMER_PREPAYMENT.to_string(), "debit".to_string())],
        dec(1000)
    );
    assert_balanced_journal(&db, &ctx, invoice.invoice_id).await;

    // Second application is a reported no-op.
    let second = apply_overpayment(&db, &ctx, invoice.invoice_id, dec(500))
        .await
        .unwrap();
    assert_eq!(second.applied_amount, Decimal::ZERO);
    assert_eq!(second.message, "Invoice already paid");
    assert!(!second.invoice_cleared);
}

#[tokio::test]
#[ignore]
async fn zero_overpayment_reports_nothing_to_apply() {
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

    let result = apply_overpayment(&db, &ctx, invoice.invoice_id, Decimal::ZERO)
        .await
        .unwrap();
    assert_eq!(result.applied_amount, Decimal::ZERO);
    assert_eq!(result.message, "No overpayment to apply");
}

#[tokio::test]
#[ignore]
async fn overpayment_application_rolls_back_when_account_missing() {
    let db = test_db().await;
    // Hand-seeded tenant without the prepayment account.
    let ctx = billing_service::middleware::TenantContext::new(Uuid::new_v4(), Uuid::new_v4());
    for (code, account_type) in [
        (codes::BANK, AccountType::Asset),
        (codes::AR_CONTROL, AccountType::Asset),
        ("REV-CONSUMPTION", AccountType::Revenue),
    ] {
        db.create_account(&CreateAccount {
            tenant_id: ctx.tenant_id,
            code: code.to_string(),
            name: code.to_string(),
            account_type,
        })
        .await
        .unwrap();
    }

    let (customer, _meter, assignment) = setup_customer_with_meter(&db, &ctx).await;
    let bill = create_pending_bill(
        &db,
        &ctx,
        customer.customer_id,
        assignment.assignment_id,
        dec(400),
    )
    .await;
    let invoice = invoicing::generate_for_bills(&db, &ctx, vec![bill])
        .await
        .unwrap()
        .remove(0);

    let err = apply_overpayment(&db, &ctx, invoice.invoice_id, dec(400))
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("CUSTOMER-PREPAYMENT"),
        "Got: {}",
        err
    );

    // The failed posting left the invoice and ledger untouched.
    let after = db
        .get_invoice(ctx.tenant_id, invoice.invoice_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.paid_amount, Decimal::ZERO);
    assert_eq!(after.overpayment_applied, Decimal::ZERO);
    assert_eq!(after.balance, dec(400));
    assert_eq!(after.status, "not_paid");

    let rows = db
        .journals_for_transaction(ctx.tenant_id, invoice.invoice_id)
        .await
        .unwrap();
    assert!(
        rows.iter()
            .all(|r| r.transaction_type != "overpayment_application"),
        "No overpayment rows survive the rollback"
    );
}

#[tokio::test]
#[ignore]
async fn reference_validation_rejects_bad_supplied_reference() {
    let db = test_db().await;
    let ctx = setup_tenant(&db).await;
    let (customer, _meter, assignment) = setup_customer_with_meter(&db, &ctx).await;

    let err = billing::create_single_bill(
        &db,
        &ctx,
        billing_service::models::CreateBill {
            customer_id: customer.customer_id,
            assignment_id: assignment.assignment_id,
            bill_type: billing_service::models::BillType::Consumption,
            quantity: dec(10),
            rate_used: dec(5),
            total_amount: None,
        },
        Some("NOT-A-REF".to_string()),
        false,
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("YYYY-MON-###"), "Got: {}", err);
}
