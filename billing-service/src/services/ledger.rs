//! Double-entry ledger postings.
//!
//! Every financial operation funnels its journal rows through
//! [`post_entries`], which enforces the balanced-group invariant before any
//! row is written. Posting always runs on the caller's transaction so a
//! failed posting rolls the whole operation back.

use crate::models::account::codes;
use crate::models::{AccountType, BillType, CreateAccount, Direction, PostingLine, TransactionType};
use crate::services::metrics;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::PgConnection;
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

use super::database::Database;

/// Post a balanced group of ledger rows for one source document.
///
/// Validates that the group carries at least one debit and one credit, that
/// every amount is positive and that debits equal credits. Account codes
/// are resolved within the caller's transaction; a missing chart-of-accounts
/// entry aborts the posting (and therefore the enclosing operation).
#[instrument(skip(conn, lines), fields(tenant_id = %tenant_id, transaction_id = %transaction_id, line_count = lines.len()))]
pub async fn post_entries(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    transaction_id: Uuid,
    transaction_type: TransactionType,
    lines: &[PostingLine],
    reference: &str,
    description: &str,
) -> Result<Vec<Uuid>, AppError> {
    if lines.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Journal posting must have at least one debit and one credit"
        )));
    }

    let mut debit_sum = Decimal::ZERO;
    let mut credit_sum = Decimal::ZERO;
    let mut has_debit = false;
    let mut has_credit = false;

    for line in lines {
        if line.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Journal amount must be positive"
            )));
        }
        match line.direction {
            Direction::Debit => {
                debit_sum += line.amount;
                has_debit = true;
            }
            Direction::Credit => {
                credit_sum += line.amount;
                has_credit = true;
            }
        }
    }

    if !has_debit || !has_credit {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Journal posting must have at least one debit and one credit"
        )));
    }

    if debit_sum != credit_sum {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Double-entry violation: debits ({}) != credits ({})",
            debit_sum,
            credit_sum
        )));
    }

    let account_ids = resolve_account_codes(conn, tenant_id, lines).await?;

    let mut journal_ids = Vec::with_capacity(lines.len());
    for line in lines {
        let account_id = account_ids
            .get(line.account_code.as_str())
            .copied()
            .expect("account codes resolved above");
        let journal_id = Uuid::new_v4();
        let row_type = line.transaction_type.unwrap_or(transaction_type);

        sqlx::query(
            r#"
            INSERT INTO journals (journal_id, tenant_id, account_id, transaction_id,
                transaction_type, amount, direction, reference, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(journal_id)
        .bind(tenant_id)
        .bind(account_id)
        .bind(transaction_id)
        .bind(row_type.as_str())
        .bind(line.amount)
        .bind(line.direction.as_str())
        .bind(reference)
        .bind(line.description.as_deref().unwrap_or(description))
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to post journal row: {}", e)))?;

        journal_ids.push(journal_id);
    }

    metrics::record_journal_rows(
        &tenant_id.to_string(),
        transaction_type.as_str(),
        journal_ids.len() as u64,
    );

    info!(
        transaction_type = %transaction_type,
        total_amount = %debit_sum,
        rows = journal_ids.len(),
        "Journal group posted"
    );

    Ok(journal_ids)
}

async fn resolve_account_codes(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    lines: &[PostingLine],
) -> Result<HashMap<String, Uuid>, AppError> {
    let mut codes: Vec<String> = lines.iter().map(|l| l.account_code.clone()).collect();
    codes.sort();
    codes.dedup();

    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT account_id, code
        FROM accounts
        WHERE tenant_id = $1 AND code = ANY($2)
        "#,
    )
    .bind(tenant_id)
    .bind(&codes)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to resolve accounts: {}", e)))?;

    let map: HashMap<String, Uuid> = rows.into_iter().map(|(id, code)| (code, id)).collect();

    for code in &codes {
        if !map.contains_key(code) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Missing chart-of-accounts entry '{}' for tenant",
                code
            )));
        }
    }

    Ok(map)
}

/// Inverse lines for a set of posted journal rows, used by reversals.
/// Account ids are mapped back to codes by the caller-supplied lookup.
pub fn inverse_lines(
    rows: &[crate::models::Journal],
    code_by_account: &HashMap<Uuid, String>,
) -> Vec<PostingLine> {
    rows.iter()
        .filter_map(|row| {
            let direction = row.parsed_direction()?.inverse();
            let code = code_by_account.get(&row.account_id)?;
            Some(PostingLine {
                account_code: code.clone(),
                amount: row.amount,
                direction,
                transaction_type: None,
                description: None,
            })
        })
        .collect()
}

/// Map account ids to codes for a tenant.
pub async fn account_codes_by_id(
    conn: &mut PgConnection,
    tenant_id: Uuid,
) -> Result<HashMap<Uuid, String>, AppError> {
    let rows: Vec<(Uuid, String)> =
        sqlx::query_as("SELECT account_id, code FROM accounts WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to load accounts: {}", e))
            })?;

    Ok(rows.into_iter().collect())
}

/// Derived balance for an account, sign-normalised by account type so that
/// liability/revenue balances read positive when in their normal credit
/// position.
#[instrument(skip(db), fields(tenant_id = %tenant_id, code = %code))]
pub async fn account_balance(
    db: &Database,
    tenant_id: Uuid,
    code: &str,
) -> Result<Option<Decimal>, AppError> {
    let account = match db.get_account_by_code(tenant_id, code).await? {
        Some(a) => a,
        None => return Ok(None),
    };

    let raw: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT COALESCE(
            SUM(CASE WHEN direction = 'debit' THEN amount ELSE -amount END),
            0
        )
        FROM journals
        WHERE tenant_id = $1 AND account_id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(account.account_id)
    .fetch_one(db.pool())
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get balance: {}", e)))?;

    let raw = raw.unwrap_or(Decimal::ZERO);
    let balance = if account.parsed_type().is_debit_normal() {
        raw
    } else {
        -raw
    };

    Ok(Some(balance))
}

/// Seed the chart of accounts the financial operations post against.
/// Idempotent: existing codes are left untouched. Returns how many accounts
/// were newly created.
#[instrument(skip(db), fields(tenant_id = %tenant_id))]
pub async fn ensure_chart_of_accounts(db: &Database, tenant_id: Uuid) -> Result<u32, AppError> {
    let defaults: Vec<(&str, &str, AccountType)> = vec![
        (codes::BANK, "Bank", AccountType::Asset),
        (codes::AR_CONTROL, "Accounts Receivable Control", AccountType::Asset),
        (
            codes::CUSTOMER_PREPAYMENT,
            "Customer Prepayments",
            AccountType::Liability,
        ),
        (
            BillType::Consumption.revenue_account_code(),
            "Water Consumption Revenue",
            AccountType::Revenue,
        ),
        (
            BillType::ServiceFee.revenue_account_code(),
            "Service Fee Revenue",
            AccountType::Revenue,
        ),
        (
            BillType::Penalty.revenue_account_code(),
            "Penalty Revenue",
            AccountType::Revenue,
        ),
        (
            BillType::Adjustment.revenue_account_code(),
            "Billing Adjustment Revenue",
            AccountType::Revenue,
        ),
    ];

    let mut created = 0;
    for (code, name, account_type) in defaults {
        if db.get_account_by_code(tenant_id, code).await?.is_none() {
            db.create_account(&CreateAccount {
                tenant_id,
                code: code.to_string(),
                name: name.to_string(),
                account_type,
            })
            .await?;
            created += 1;
        }
    }

    if created > 0 {
        info!(created = created, "Chart of accounts seeded");
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Journal;
    use chrono::Utc;

    fn row(account_id: Uuid, amount: i64, direction: &str) -> Journal {
        Journal {
            journal_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            account_id,
            transaction_id: Uuid::new_v4(),
            transaction_type: "invoice".to_string(),
            amount: Decimal::new(amount, 0),
            direction: direction.to_string(),
            reference: "INV-000001".to_string(),
            description: None,
            posted_utc: Utc::now(),
        }
    }

    #[test]
    fn inverse_lines_flip_direction_and_keep_amounts() {
        let ar = Uuid::new_v4();
        let revenue = Uuid::new_v4();
        let mut code_by_account = HashMap::new();
        code_by_account.insert(ar, "AR-CONTROL".to_string());
        code_by_account.insert(revenue, "REV-CONSUMPTION".to_string());

        let rows = vec![row(ar, 400, "debit"), row(revenue, 400, "credit")];
        let inverse = inverse_lines(&rows, &code_by_account);

        assert_eq!(inverse.len(), 2);
        assert_eq!(inverse[0].account_code, "AR-CONTROL");
        assert_eq!(inverse[0].direction, Direction::Credit);
        assert_eq!(inverse[0].amount, Decimal::new(400, 0));
        assert_eq!(inverse[1].direction, Direction::Debit);
    }

    #[test]
    fn rows_without_a_known_account_are_dropped() {
        let known = Uuid::new_v4();
        let mut code_by_account = HashMap::new();
        code_by_account.insert(known, "BANK-001".to_string());

        let rows = vec![row(known, 100, "debit"), row(Uuid::new_v4(), 100, "credit")];
        assert_eq!(inverse_lines(&rows, &code_by_account).len(), 1);
    }
}
