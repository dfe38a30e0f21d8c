//! Caller identity extracted from gateway-forwarded headers.
//!
//! The API gateway in front of this service authenticates the user and
//! forwards `X-User-ID`, `X-User-Role` and, for employees, `X-Partner-ID`.

use crate::models::{Actor, Role};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_ROLE_HEADER: &str = "X-User-Role";
pub const PARTNER_ID_HEADER: &str = "X-Partner-ID";

/// Authenticated caller of an admin or partner endpoint.
#[derive(Debug, Clone)]
pub struct ActorContext(pub Actor);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header"))
        })?;

        let role = header(parts, USER_ROLE_HEADER)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing X-User-Role header")))?
            .parse::<Role>()
            .map_err(|e| AppError::Forbidden(anyhow::anyhow!(e)))?;

        let partner_id = header(parts, PARTNER_ID_HEADER).map(str::to_string);
        if role == Role::Employee && partner_id.is_none() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Employees must carry an X-Partner-ID header"
            )));
        }

        let span = tracing::Span::current();
        span.record("user_id", user_id);

        Ok(ActorContext(Actor::new(user_id, role, partner_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(builder: axum::http::request::Builder) -> Result<ActorContext, AppError> {
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        ActorContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_partner_headers() {
        let ActorContext(actor) = extract(
            Request::builder()
                .header(USER_ID_HEADER, "p-1")
                .header(USER_ROLE_HEADER, "Partner"),
        )
        .await
        .unwrap();

        assert_eq!(actor.role, Role::Partner);
        assert_eq!(actor.owning_partner(), Some("p-1"));
    }

    #[tokio::test]
    async fn test_missing_user_is_unauthorized() {
        let err = extract(Request::builder().header(USER_ROLE_HEADER, "master"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_system_role_cannot_be_claimed() {
        let err = extract(
            Request::builder()
                .header(USER_ID_HEADER, "x")
                .header(USER_ROLE_HEADER, "system"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_employee_needs_partner() {
        let err = extract(
            Request::builder()
                .header(USER_ID_HEADER, "e-1")
                .header(USER_ROLE_HEADER, "employee"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
