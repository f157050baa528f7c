use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use shared::domain::{SessionUser, UserId};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{error_message, SupabaseConfig};

const AUTHENTICATED_AUDIENCE: &str = "authenticated";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no access token presented")]
    MissingToken,
    #[error("invalid session: {0}")]
    InvalidSession(String),
    #[error("auth service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: UserId,
    #[serde(default)]
    email: Option<String>,
}

/// Resolves access tokens issued by Supabase Auth to the identity they carry.
#[derive(Clone)]
pub struct SupabaseAuth {
    http: Client,
    config: SupabaseConfig,
}

impl SupabaseAuth {
    pub fn new(http: Client, config: SupabaseConfig) -> Self {
        Self { http, config }
    }

    pub async fn resolve(&self, access_token: &str) -> Result<SessionUser, AuthError> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        match self.config.jwt_secret.as_deref() {
            Some(secret) => verify_locally(secret, access_token),
            None => self.fetch_user(access_token).await,
        }
    }

    async fn fetch_user(&self, access_token: &str) -> Result<SessionUser, AuthError> {
        let response = self
            .http
            .get(self.config.endpoint("/auth/v1/user"))
            .header("apikey", &self.config.api_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::InvalidSession(error_message(&body)));
        }
        if !status.is_success() {
            return Err(AuthError::Unavailable(format!("auth server returned {status}")));
        }

        let user: AuthUser = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        debug!(user_id = %user.id, "resolved session via auth server");
        Ok(SessionUser {
            id: user.id,
            email: user.email,
        })
    }

    /// Revokes the session upstream. Failures only matter to the log; the
    /// caller drops its copy of the token either way.
    pub async fn sign_out(&self, access_token: &str) {
        let result = self
            .http
            .post(self.config.endpoint("/auth/v1/logout"))
            .header("apikey", &self.config.api_key)
            .bearer_auth(access_token)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!("session revoked");
            }
            Ok(response) => {
                warn!(status = %response.status(), "auth server refused sign-out");
            }
            Err(error) => {
                warn!(%error, "failed to reach auth server for sign-out");
            }
        }
    }
}

fn verify_locally(secret: &str, access_token: &str) -> Result<SessionUser, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[AUTHENTICATED_AUDIENCE]);

    let data = decode::<AccessClaims>(
        access_token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| AuthError::InvalidSession(e.to_string()))?;

    if data.claims.sub.trim().is_empty() {
        return Err(AuthError::InvalidSession("token has no subject".to_string()));
    }
    Ok(SessionUser {
        id: UserId(data.claims.sub),
        email: data.claims.email,
    })
}
