//! Tenant context extracted from gateway headers.
//!
//! `X-Tenant-ID` and `X-User-ID` are set by the trusted gateway after it has
//! authenticated the caller; this service never authenticates on its own.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const TENANT_HEADER: &str = "X-Tenant-ID";
pub const USER_HEADER: &str = "X-User-ID";

#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing X-Tenant-ID header")))?;

        let tenant_id = Uuid::parse_str(tenant.trim()).map_err(|_| {
            AppError::AuthError(anyhow::anyhow!("X-Tenant-ID must be a UUID"))
        })?;

        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing X-User-ID header")))?;

        let span = tracing::Span::current();
        span.record("tenant_id", tracing::field::display(tenant_id));
        span.record("user_id", user_id);

        Ok(TenantContext {
            tenant_id,
            user_id: user_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Result<TenantContext, AppError> {
        let (mut parts, _) = req.into_parts();
        TenantContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_extracts_tenant_and_user() {
        let tenant = Uuid::new_v4();
        let req = Request::builder()
            .header(TENANT_HEADER, tenant.to_string())
            .header(USER_HEADER, "preparer-1")
            .body(())
            .unwrap();

        let ctx = extract(req).await.unwrap();
        assert_eq!(ctx.tenant_id, tenant);
        assert_eq!(ctx.user_id, "preparer-1");
    }

    #[tokio::test]
    async fn test_missing_or_malformed_headers_are_auth_errors() {
        let req = Request::builder()
            .header(USER_HEADER, "preparer-1")
            .body(())
            .unwrap();
        assert!(matches!(extract(req).await, Err(AppError::AuthError(_))));

        let req = Request::builder()
            .header(TENANT_HEADER, "not-a-uuid")
            .header(USER_HEADER, "preparer-1")
            .body(())
            .unwrap();
        assert!(matches!(extract(req).await, Err(AppError::AuthError(_))));

        let req = Request::builder()
            .header(TENANT_HEADER, Uuid::new_v4().to_string())
            .header(USER_HEADER, "  ")
            .body(())
            .unwrap();
        assert!(matches!(extract(req).await, Err(AppError::AuthError(_))));
    }
}
