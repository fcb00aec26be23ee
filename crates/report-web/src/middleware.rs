//! Bearer-token extraction (replaces the teacher's cookie-JWT `require_auth`).
//! Tokens originate externally; this layer only inspects claims, it never
//! mints or validates a signature.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    Json,
};
use report_core::token::{self, TokenClaims};

pub struct AuthContext {
    pub claims: TokenClaims,
    pub bearer_token: String,
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("missing Authorization header"))?;

        let bearer_token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| unauthorized("Authorization header must carry a Bearer token"))?
            .to_string();

        let claims = token::inspect(&bearer_token).map_err(|e| unauthorized(&e.to_string()))?;

        Ok(Self { claims, bearer_token })
    }
}

fn unauthorized(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": message })))
}
