//! Application startup and lifecycle management.

use crate::config::BillingConfig;
use crate::handlers;
use crate::services::{get_metrics, init_metrics, Database, LogNotifier, Notifier};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get,
    routing::post, Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub db: Arc<Database>,
    pub notifier: Arc<dyn Notifier>,
}

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    db: Arc<Database>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "billing-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "billing-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let notifier: Arc<dyn Notifier> =
            Arc::new(LogNotifier::new(config.notifications.sms_enabled));

        let state = AppState {
            config: config.clone(),
            db: Arc::new(db),
            notifier,
        };

        let listener = TcpListener::bind((config.common.host.as_str(), config.common.port))
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    host = %config.common.host,
                    port = config.common.port,
                    "Failed to bind HTTP listener"
                );
                AppError::from(e)
            })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Billing service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_state = HealthState {
            db: self.state.db.clone(),
        };

        let api_router = Router::new()
            .route("/setup/accounts", post(handlers::setup::seed_accounts))
            .route("/customers", post(handlers::setup::create_customer))
            .route("/meters", post(handlers::setup::create_meter))
            .route("/assignments", post(handlers::setup::create_assignment))
            .route(
                "/bills",
                post(handlers::bills::create_bill).get(handlers::bills::list_bills),
            )
            .route("/bills/batch", post(handlers::bills::create_bill_batch))
            .route(
                "/invoices/generate",
                post(handlers::invoices::generate_invoices),
            )
            .route("/invoices", get(handlers::invoices::list_invoices))
            .route("/invoices/:id", get(handlers::invoices::get_invoice))
            .route(
                "/customers/:id/invoices/open",
                get(handlers::invoices::open_invoices_for_customer),
            )
            .route(
                "/invoices/:id/payments",
                post(handlers::payments::record_payment)
                    .get(handlers::payments::list_invoice_payments),
            )
            .route("/payments/:id", get(handlers::payments::get_payment))
            .route(
                "/payments/:id/reverse",
                post(handlers::payments::reverse_payment),
            )
            .route(
                "/accounts/:code/balance",
                get(handlers::setup::account_balance),
            )
            .route(
                "/invoices/:id/reverse",
                post(handlers::actions::reverse_invoice),
            )
            .route(
                "/invoices/:id/adjust",
                post(handlers::actions::adjust_invoice),
            )
            .route(
                "/invoices/:id/apply-overpayment",
                post(handlers::actions::apply_overpayment),
            )
            .route(
                "/meters/:id/recalculate",
                post(handlers::actions::recalculate_meter),
            )
            .with_state(self.state.clone());

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .with_state(health_state)
            .nest("/api/v1", api_router)
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware));

        tracing::info!(
            service = "billing-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await
    }
}
