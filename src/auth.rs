use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::error::ApiError;

/// Cookie carrying the caller's access token.
pub const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

/// Resolves the calling identity from request credentials. Every route that
/// produces a side effect authenticates through this before touching storage
/// or the repository.
#[async_trait]
pub trait AuthGate: Send + Sync {
    async fn resolve_user(&self, access_token: &str) -> Result<AuthUser, ApiError>;
}

/// Auth gate backed by the Supabase auth endpoint.
pub struct SupabaseAuth {
    client: ApiClient,
    base_url: String,
    anon_key: String,
}

impl SupabaseAuth {
    pub fn new(client: ApiClient, base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            anon_key: anon_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct AuthErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
}

#[async_trait]
impl AuthGate for SupabaseAuth {
    async fn resolve_user(&self, access_token: &str) -> Result<AuthUser, ApiError> {
        let request = self
            .client
            .http()
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token);
        let response = self.client.send(request).await?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<AuthUser>()
                .await
                .map_err(|err| ApiError::Upstream(format!("malformed auth response: {err}")));
        }

        let message = response
            .json::<AuthErrorBody>()
            .await
            .ok()
            .and_then(|body| body.msg.or(body.message).or(body.error_description))
            .unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            if is_session_expired(&message) {
                return Err(ApiError::SessionExpired);
            }
            return Err(ApiError::Unauthenticated);
        }
        Err(ApiError::Upstream(format!(
            "auth lookup failed: {status} {message}"
        )))
    }
}

/// Side-channel expiry messages the auth backend reports through otherwise
/// generic errors. These must surface as `Unauthenticated` with a
/// clear-credentials hint, not as upstream failures.
pub fn is_session_expired(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("session missing") || lowered.contains("refresh_token_not_found")
        || lowered.contains("refresh token not found")
}

/// Pulls the access token out of the `Cookie` header, if present.
pub fn access_token_from_cookies(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(axum::http::header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            let Some((name, token)) = pair.split_once('=') else {
                continue;
            };
            if name.trim() == ACCESS_TOKEN_COOKIE && !token.trim().is_empty() {
                return Some(token.trim().to_string());
            }
        }
    }
    None
}
