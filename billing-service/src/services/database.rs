//! Database service for billing-service.
//!
//! Pool management plus the entity CRUD and read models. The financial
//! operations (invoice generation, payment application, reversals) own
//! their multi-row transactions in the sibling service modules.

use crate::models::{
    Account, Bill, CreateAccount, CreateAssignment, CreateCustomer, CreateMeter, Customer,
    Invoice, InvoiceBill, Journal, ListBillsFilter, ListInvoicesFilter, Meter, MeterAssignment,
    Payment,
};
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Account Operations
    // -------------------------------------------------------------------------

    /// Create a chart-of-accounts entry.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, code = %input.code))]
    pub async fn create_account(&self, input: &CreateAccount) -> Result<Account, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (account_id, tenant_id, code, name, account_type)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING account_id, tenant_id, code, name, account_type, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(&input.code)
        .bind(&input.name)
        .bind(input.account_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Account with code '{}' already exists for tenant",
                    input.code
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create account: {}", e)),
        })?;

        timer.observe_duration();

        info!(account_id = %account.account_id, code = %account.code, "Account created");

        Ok(account)
    }

    /// Get an account by code for a tenant.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, code = %code))]
    pub async fn get_account_by_code(
        &self,
        tenant_id: Uuid,
        code: &str,
    ) -> Result<Option<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account_by_code"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, tenant_id, code, name, account_type, created_utc
            FROM accounts
            WHERE tenant_id = $1 AND code = $2
            "#,
        )
        .bind(tenant_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get account: {}", e)))?;

        timer.observe_duration();

        Ok(account)
    }

    // -------------------------------------------------------------------------
    // Customer Operations
    // -------------------------------------------------------------------------

    /// Register a customer.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    pub async fn create_customer(&self, input: &CreateCustomer) -> Result<Customer, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(
            r#"
            INSERT INTO customers (customer_id, tenant_id, name, phone)
            VALUES ($1, $2, $3, $4)
            RETURNING customer_id, tenant_id, name, phone, balance, overpayment, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.phone)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create customer: {}", e)))?;

        timer.observe_duration();

        info!(customer_id = %customer.customer_id, "Customer created");

        Ok(customer)
    }

    /// Get a customer by ID for a tenant.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, customer_id = %customer_id))]
    pub async fn get_customer(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT customer_id, tenant_id, name, phone, balance, overpayment, created_utc
            FROM customers
            WHERE tenant_id = $1 AND customer_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get customer: {}", e)))?;

        timer.observe_duration();

        Ok(customer)
    }

    // -------------------------------------------------------------------------
    // Meter Operations
    // -------------------------------------------------------------------------

    /// Register a meter.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, meter_number = %input.meter_number))]
    pub async fn create_meter(&self, input: &CreateMeter) -> Result<Meter, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_meter"])
            .start_timer();

        let meter = sqlx::query_as::<_, Meter>(
            r#"
            INSERT INTO meters (meter_id, tenant_id, meter_number)
            VALUES ($1, $2, $3)
            RETURNING meter_id, tenant_id, meter_number, total_billed, total_paid, balance,
                overpayment, last_invoice_date, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(&input.meter_number)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Meter '{}' already exists for tenant",
                    input.meter_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create meter: {}", e)),
        })?;

        timer.observe_duration();

        info!(meter_id = %meter.meter_id, "Meter created");

        Ok(meter)
    }

    /// Get a meter by ID for a tenant.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, meter_id = %meter_id))]
    pub async fn get_meter(
        &self,
        tenant_id: Uuid,
        meter_id: Uuid,
    ) -> Result<Option<Meter>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_meter"])
            .start_timer();

        let meter = sqlx::query_as::<_, Meter>(
            r#"
            SELECT meter_id, tenant_id, meter_number, total_billed, total_paid, balance,
                overpayment, last_invoice_date, created_utc
            FROM meters
            WHERE tenant_id = $1 AND meter_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(meter_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get meter: {}", e)))?;

        timer.observe_duration();

        Ok(meter)
    }

    // -------------------------------------------------------------------------
    // Meter Assignment Operations
    // -------------------------------------------------------------------------

    /// Assign a meter to a customer.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, customer_id = %input.customer_id, meter_id = %input.meter_id))]
    pub async fn create_assignment(
        &self,
        input: &CreateAssignment,
    ) -> Result<MeterAssignment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_assignment"])
            .start_timer();

        let assignment = sqlx::query_as::<_, MeterAssignment>(
            r#"
            INSERT INTO meter_assignments (assignment_id, tenant_id, customer_id, meter_id)
            VALUES ($1, $2, $3, $4)
            RETURNING assignment_id, tenant_id, customer_id, meter_id, active, assigned_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(input.customer_id)
        .bind(input.meter_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create assignment: {}", e))
        })?;

        timer.observe_duration();

        info!(assignment_id = %assignment.assignment_id, "Meter assignment created");

        Ok(assignment)
    }

    /// Get a meter assignment by ID for a tenant.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, assignment_id = %assignment_id))]
    pub async fn get_assignment(
        &self,
        tenant_id: Uuid,
        assignment_id: Uuid,
    ) -> Result<Option<MeterAssignment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_assignment"])
            .start_timer();

        let assignment = sqlx::query_as::<_, MeterAssignment>(
            r#"
            SELECT assignment_id, tenant_id, customer_id, meter_id, active, assigned_utc
            FROM meter_assignments
            WHERE tenant_id = $1 AND assignment_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(assignment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get assignment: {}", e)))?;

        timer.observe_duration();

        Ok(assignment)
    }

    /// Active meter assignments for a customer.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, customer_id = %customer_id))]
    pub async fn active_assignments(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<MeterAssignment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["active_assignments"])
            .start_timer();

        let assignments = sqlx::query_as::<_, MeterAssignment>(
            r#"
            SELECT assignment_id, tenant_id, customer_id, meter_id, active, assigned_utc
            FROM meter_assignments
            WHERE tenant_id = $1 AND customer_id = $2 AND active
            ORDER BY assigned_utc
            "#,
        )
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list assignments: {}", e))
        })?;

        timer.observe_duration();

        Ok(assignments)
    }

    // -------------------------------------------------------------------------
    // Bill Read Models
    // -------------------------------------------------------------------------

    /// Get a bill by ID for a tenant.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, bill_id = %bill_id))]
    pub async fn get_bill(&self, tenant_id: Uuid, bill_id: Uuid) -> Result<Option<Bill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_bill"])
            .start_timer();

        let bill = sqlx::query_as::<_, Bill>(
            r#"
            SELECT bill_id, tenant_id, customer_id, assignment_id, bill_type, quantity,
                rate_used, total_amount, status, bill_ref, generation_date, created_by, created_utc
            FROM bills
            WHERE tenant_id = $1 AND bill_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(bill_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get bill: {}", e)))?;

        timer.observe_duration();

        Ok(bill)
    }

    /// List bills for a tenant with optional filters.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn list_bills(
        &self,
        tenant_id: Uuid,
        filter: &ListBillsFilter,
    ) -> Result<Vec<Bill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_bills"])
            .start_timer();

        let limit = i64::from(filter.page_size.clamp(1, 100));

        let bills = sqlx::query_as::<_, Bill>(
            r#"
            SELECT bill_id, tenant_id, customer_id, assignment_id, bill_type, quantity,
                rate_used, total_amount, status, bill_ref, generation_date, created_by, created_utc
            FROM bills
            WHERE tenant_id = $1
              AND ($2::varchar IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR customer_id = $3)
              AND ($4::varchar IS NULL OR bill_ref = $4)
              AND ($5::uuid IS NULL OR bill_id > $5)
            ORDER BY bill_id
            LIMIT $6
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.customer_id)
        .bind(&filter.bill_ref)
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list bills: {}", e)))?;

        timer.observe_duration();

        Ok(bills)
    }

    /// All pending bills for a tenant, oldest first.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn pending_bills(&self, tenant_id: Uuid) -> Result<Vec<Bill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["pending_bills"])
            .start_timer();

        let bills = sqlx::query_as::<_, Bill>(
            r#"
            SELECT bill_id, tenant_id, customer_id, assignment_id, bill_type, quantity,
                rate_used, total_amount, status, bill_ref, generation_date, created_by, created_utc
            FROM bills
            WHERE tenant_id = $1 AND status = 'pending'
            ORDER BY created_utc
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list pending bills: {}", e)))?;

        timer.observe_duration();

        Ok(bills)
    }

    // -------------------------------------------------------------------------
    // Invoice Read Models
    // -------------------------------------------------------------------------

    /// Get an invoice by ID for a tenant.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenant_id, customer_id, meter_id, invoice_number, invoice_date,
                due_date, balance_brought_forward, amount, total_amount, paid_amount,
                overpayment_applied, balance, status, state, notes, created_by, created_utc
            FROM invoices
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// List invoices for a tenant with optional filters.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = i64::from(filter.page_size.clamp(1, 100));

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenant_id, customer_id, meter_id, invoice_number, invoice_date,
                due_date, balance_brought_forward, amount, total_amount, paid_amount,
                overpayment_applied, balance, status, state, notes, created_by, created_utc
            FROM invoices
            WHERE tenant_id = $1
              AND ($2::varchar IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR customer_id = $3)
              AND ($4::uuid IS NULL OR meter_id = $4)
              AND ($5::uuid IS NULL OR invoice_id > $5)
            ORDER BY invoice_id
            LIMIT $6
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.customer_id)
        .bind(filter.meter_id)
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// All open invoices for a customer, across all their meters.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, customer_id = %customer_id))]
    pub async fn find_open_invoices_by_customer(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_open_invoices_by_customer"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenant_id, customer_id, meter_id, invoice_number, invoice_date,
                due_date, balance_brought_forward, amount, total_amount, paid_amount,
                overpayment_applied, balance, status, state, notes, created_by, created_utc
            FROM invoices
            WHERE tenant_id = $1 AND customer_id = $2 AND state = 'open'
            ORDER BY invoice_date, created_utc
            "#,
        )
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find open invoices: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Join rows linking an invoice to its bills.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn invoice_bills(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceBill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["invoice_bills"])
            .start_timer();

        let rows = sqlx::query_as::<_, InvoiceBill>(
            r#"
            SELECT invoice_bill_id, tenant_id, invoice_id, bill_id, amount
            FROM invoice_bills
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY invoice_bill_id
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice bills: {}", e)))?;

        timer.observe_duration();

        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Payment Read Models
    // -------------------------------------------------------------------------

    /// Get a payment by ID for a tenant.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    pub async fn get_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, tenant_id, customer_id, invoice_id, meter_id, amount, method,
                reference, status, payment_date, reversal_reason, reversed_utc, reversed_by,
                created_by, created_utc
            FROM payments
            WHERE tenant_id = $1 AND payment_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        timer.observe_duration();

        Ok(payment)
    }

    /// Payments recorded against an invoice.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn payments_for_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["payments_for_invoice"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, tenant_id, customer_id, invoice_id, meter_id, amount, method,
                reference, status, payment_date, reversal_reason, reversed_utc, reversed_by,
                created_by, created_utc
            FROM payments
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY created_utc
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        timer.observe_duration();

        Ok(payments)
    }

    // -------------------------------------------------------------------------
    // Journal Read Models
    // -------------------------------------------------------------------------

    /// All ledger rows posted for a source document.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, transaction_id = %transaction_id))]
    pub async fn journals_for_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Vec<Journal>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["journals_for_transaction"])
            .start_timer();

        let journals = sqlx::query_as::<_, Journal>(
            r#"
            SELECT journal_id, tenant_id, account_id, transaction_id, transaction_type,
                amount, direction, reference, description, posted_utc
            FROM journals
            WHERE tenant_id = $1 AND transaction_id = $2
            ORDER BY posted_utc, journal_id
            "#,
        )
        .bind(tenant_id)
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get journals: {}", e)))?;

        timer.observe_duration();

        Ok(journals)
    }
}
