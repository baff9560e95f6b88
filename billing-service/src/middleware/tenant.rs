//! Tenant context extractor for multi-tenancy support.
//!
//! Extracts the tenant and acting user from request headers. These headers
//! are set by the platform's authentication gateway after validating the
//! session; the engine never reads ambient auth state. Every core operation
//! takes the context explicitly, which also keeps batch jobs and tests
//! honest about who they act as.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// Tenant and actor for one request. All writes are scoped to `tenant_id`
/// and attributed to `actor_id`.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid, actor_id: Uuid) -> Self {
        Self {
            tenant_id,
            actor_id,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = header_uuid(parts, "X-Tenant-ID")?;
        let actor_id = header_uuid(parts, "X-Actor-ID")?;

        let span = tracing::Span::current();
        span.record("tenant_id", tenant_id.to_string());
        span.record("actor_id", actor_id.to_string());

        Ok(TenantContext::new(tenant_id, actor_id))
    }
}

fn header_uuid(parts: &Parts, name: &str) -> Result<Uuid, AppError> {
    let value = parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::AuthError(anyhow::anyhow!(
                "Missing {} header (required from auth gateway)",
                name
            ))
        })?;

    value.parse().map_err(|_| {
        AppError::AuthError(anyhow::anyhow!("Header {} is not a valid UUID", name))
    })
}
