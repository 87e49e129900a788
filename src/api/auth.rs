//! Caller identity. Sign-in happens at the identity provider; the proxy in
//! front of this service forwards the authenticated user id in a header,
//! which is trusted verbatim.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::api::routes::ApiState;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

#[async_trait]
impl FromRequestParts<ApiState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(state.auth_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(AppError::Unauthenticated)?;

        Ok(AuthUser { user_id: user_id.to_string() })
    }
}
