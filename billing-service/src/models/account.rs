//! Chart-of-accounts model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Well-known account codes the financial operations post against.
pub mod codes {
    /// Cash/bank asset account debited on payment receipt.
    pub const BANK: &str = "BANK-001";
    /// Accounts-receivable control: debited when invoices are raised,
    /// credited when they are paid.
    pub const AR_CONTROL: &str = "AR-CONTROL";
    /// Liability account holding customer credit from overpayments.
    pub const CUSTOMER_PREPAYMENT: &str = "CUSTOMER-PREPAYMENT";
}

/// Account type (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Revenue,
    Equity,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Revenue => "revenue",
            AccountType::Equity => "equity",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "liability" => AccountType::Liability,
            "revenue" => AccountType::Revenue,
            "equity" => AccountType::Equity,
            _ => AccountType::Asset,
        }
    }

    /// Asset accounts carry a debit-normal balance; the rest credit-normal.
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, AccountType::Asset)
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Chart-of-accounts entry. Balances are derived from journal rows.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub tenant_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: String,
    pub created_utc: DateTime<Utc>,
}

impl Account {
    pub fn parsed_type(&self) -> AccountType {
        AccountType::from_str(&self.account_type)
    }
}

/// Input for creating an account.
#[derive(Debug, Clone)]
pub struct CreateAccount {
    pub tenant_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
}
