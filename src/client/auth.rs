//! Bearer token credentials for the management API.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::error::{ProviderError, Result};

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Source of bearer tokens for management API requests.
#[async_trait]
pub trait TokenCredential: Send + Sync + fmt::Debug {
    /// Return a token valid for at least the next request.
    async fn token(&self, http: &reqwest::Client) -> Result<String>;
}

/// A pre-issued token, e.g. from `az account get-access-token`.
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap an existing access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticToken").field(&"<redacted>").finish()
    }
}

#[async_trait]
impl TokenCredential for StaticToken {
    async fn token(&self, _http: &reqwest::Client) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// OAuth2 client-credentials flow for a service principal with a secret.
pub struct ClientSecretCredential {
    token_url: Url,
    client_id: String,
    client_secret: String,
    scope: String,
    cache: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for ClientSecretCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretCredential")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    // v1 endpoints send this as a string
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl ClientSecretCredential {
    /// Create a credential for `tenant_id` at `authority_host`, scoped to `resource`.
    pub fn new(
        authority_host: &Url,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        resource: &Url,
    ) -> Result<Self> {
        let token_url = authority_host
            .join(&format!("{}/oauth2/v2.0/token", tenant_id))
            .map_err(|e| {
                ProviderError::Configuration(format!(
                    "cannot build token URL from authority {:?}: {}",
                    authority_host.as_str(),
                    e
                ))
            })?;
        let scope = format!("{}/.default", resource.as_str().trim_end_matches('/'));

        Ok(Self {
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope,
            cache: Mutex::new(None),
        })
    }

    async fn fetch(&self, http: &reqwest::Client) -> Result<CachedToken> {
        debug!(token_url = %self.token_url, client_id = %self.client_id, "Requesting access token");
        let response = http
            .post(self.token_url.clone())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::PermissionDenied(format!(
                "token request for client {:?} failed with status {}: {}",
                self.client_id,
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = token
            .expires_in
            .as_ref()
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));

        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn token(&self, http: &reqwest::Client) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.access_token.clone());
            }
        }

        let fresh = self.fetch(http).await?;
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}
