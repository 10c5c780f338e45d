//! Azure Resource Manager REST client.
//!
//! [`ArmClient`] signs every request with a bearer token from its
//! [`TokenCredential`](auth::TokenCredential), appends the `api-version` query
//! parameter, and maps the ARM error envelope onto [`ProviderError`].

pub mod auth;
pub mod id;
pub mod poller;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use self::auth::TokenCredential;
use self::poller::LongRunningOperation;
use crate::error::{ProviderError, Result};

/// Public cloud management endpoint.
pub const DEFAULT_RESOURCE_MANAGER_ENDPOINT: &str = "https://management.azure.com/";

/// Default wait between status polls when the service sends no `Retry-After`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("azurerm-provider/", env!("CARGO_PKG_VERSION"));

/// The `error` object of an ARM error response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArmErrorBody {
    /// Machine-readable code, e.g. `ResourceNotFound`.
    #[serde(default)]
    pub code: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ArmErrorEnvelope {
    error: ArmErrorBody,
}

/// Client for the Azure Resource Manager API of one subscription.
#[derive(Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    endpoint: Url,
    subscription_id: String,
    credential: Arc<dyn TokenCredential>,
    poll_interval: Duration,
}

impl fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArmClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("subscription_id", &self.subscription_id)
            .field("credential", &self.credential)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl ArmClient {
    /// Create a client for `subscription_id` at `endpoint`.
    pub fn new(
        endpoint: Url,
        subscription_id: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            endpoint,
            subscription_id: subscription_id.into(),
            credential,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override the interval between long-running operation polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The subscription this client manages.
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// The management endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Interval between long-running operation polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Build the URL for a resource path with its `api-version`.
    ///
    /// Each `/`-separated segment of `path` is percent-encoded, so a name
    /// containing `?`, `#` or `%` stays inside its own segment.
    pub fn url(&self, path: &str, api_version: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ProviderError::Configuration(format!(
                    "management endpoint {} cannot carry a path",
                    self.endpoint
                ))
            })?
            .pop_if_empty()
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    /// Send an authorized request to an absolute URL.
    pub(crate) async fn send_to(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Response> {
        let token = self.credential.token(&self.http).await?;
        trace!(%method, %url, "Sending request");

        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> Result<Response> {
        let url = self.url(path, api_version)?;
        self.send_to(method, url, body).await
    }

    /// GET a resource.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, api_version: &str) -> Result<T> {
        let response = self.send(Method::GET, path, api_version, None).await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    /// GET a resource, mapping `404 Not Found` to `None`.
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        api_version: &str,
    ) -> Result<Option<T>> {
        match self.get(path, api_version).await {
            Ok(found) => Ok(Some(found)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// PUT a resource whose creation completes synchronously.
    pub async fn put(&self, path: &str, api_version: &str, body: &Value) -> Result<()> {
        let response = self.send(Method::PUT, path, api_version, Some(body)).await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        debug!(path, status = response.status().as_u16(), "PUT completed");
        Ok(())
    }

    /// DELETE a resource whose removal completes synchronously.
    pub async fn delete(&self, path: &str, api_version: &str) -> Result<()> {
        let response = self.send(Method::DELETE, path, api_version, None).await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        debug!(path, status = response.status().as_u16(), "DELETE completed");
        Ok(())
    }

    /// PUT a resource and wait for the long-running operation to finish.
    pub async fn put_long_running(&self, path: &str, api_version: &str, body: &Value) -> Result<()> {
        let response = self.send(Method::PUT, path, api_version, Some(body)).await?;
        self.wait_for_completion(response).await
    }

    /// DELETE a resource and wait for the long-running operation to finish.
    ///
    /// A `204 No Content` (already gone) completes immediately.
    pub async fn delete_long_running(&self, path: &str, api_version: &str) -> Result<()> {
        let response = self.send(Method::DELETE, path, api_version, None).await?;
        self.wait_for_completion(response).await
    }

    async fn wait_for_completion(&self, response: Response) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }
        if !matches!(status, StatusCode::CREATED | StatusCode::ACCEPTED) {
            return Ok(());
        }

        match LongRunningOperation::from_headers(response.headers())? {
            Some(operation) => {
                debug!(target = ?operation.target(), "Waiting for long-running operation");
                operation.wait(self).await
            },
            None => Ok(()),
        }
    }
}

/// Map a non-success response to a [`ProviderError`].
pub(crate) async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ArmErrorEnvelope>(&text)
        .map(|envelope| envelope.error)
        .unwrap_or_else(|_| ArmErrorBody {
            code: status
                .canonical_reason()
                .unwrap_or("Unknown")
                .replace(' ', ""),
            message: text,
        });
    error_from_status(status, body)
}

fn error_from_status(status: StatusCode, body: ArmErrorBody) -> ProviderError {
    let detail = if body.code.is_empty() {
        body.message.clone()
    } else {
        format!("{}: {}", body.code, body.message)
    };

    match status.as_u16() {
        404 => ProviderError::NotFound(detail),
        401 | 403 => ProviderError::PermissionDenied(detail),
        429 => ProviderError::ResourceExhausted(detail),
        500..=599 => ProviderError::Unavailable(format!("status {}: {}", status.as_u16(), detail)),
        code => ProviderError::Api {
            status: code,
            code: body.code,
            message: body.message,
        },
    }
}
