use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

/// Slack applied before the stated expiry so a token is never used in its
/// final moments.
const EXPIRY_SKEW_SECS: i64 = 30;

/// An opaque auth token and its validity window.
///
/// Owned by the credential manager and handed out read-only; never mutated,
/// only replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    /// `None` for server-validity tokens without a stated expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        Self {
            token,
            expires_at: expires_in_secs.map(|s| Utc::now() + Duration::seconds(s as i64)),
        }
    }

    /// Whether the token is still usable, with a skew margin.
    pub fn is_valid(&self) -> bool {
        match self.expires_at {
            Some(expiry) => Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) < expiry,
            None => true,
        }
    }
}

/// Errors from token acquisition.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The auth endpoint answered with a non-success HTTP status.
    #[error("auth endpoint returned status {status}: {message}")]
    Endpoint { status: u16, message: String },

    /// Network-layer failure reaching the auth endpoint.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A refresh performed on our behalf failed; all waiters of that refresh
    /// observe the same message.
    #[error("token refresh failed: {0}")]
    Refresh(String),
}

/// The single operation the credential manager needs from the auth service.
#[async_trait]
pub trait AuthEndpoint: Send + Sync {
    async fn acquire_token(&self) -> Result<Credential, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// reqwest-backed [`AuthEndpoint`] posting client credentials.
pub struct HttpAuthEndpoint {
    http: Client,
    auth_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpAuthEndpoint {
    pub fn new(http: Client, auth_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            http,
            auth_url,
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl AuthEndpoint for HttpAuthEndpoint {
    async fn acquire_token(&self) -> Result<Credential, AuthError> {
        let response = self
            .http
            .post(&self.auth_url)
            .json(&serde_json::json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AuthError::Endpoint {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<TokenResponse>().await?;
        Ok(Credential::new(body.token, body.expires_in))
    }
}
