//! Long-running operation polling.
//!
//! ARM answers an asynchronous PUT or DELETE with `201 Created` or
//! `202 Accepted` and one of two headers:
//!
//! - `Azure-AsyncOperation`: a status monitor whose body is
//!   `{"status": "InProgress" | "Succeeded" | "Failed" | "Canceled", "error": {...}}`
//! - `Location`: a URL that answers `202` while the operation runs and
//!   `200`/`204` once it is done
//!
//! Both may carry `Retry-After` (seconds). The poller waits until a terminal
//! state; the caller bounds the wait with its own deadline.

use std::time::Duration;

use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{error_from_response, ArmClient, ArmErrorBody};
use crate::error::{ProviderError, Result};

const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";

/// Where to poll for the outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollTarget {
    /// An `Azure-AsyncOperation` status monitor.
    AsyncOperation(Url),
    /// A `Location` URL.
    Location(Url),
}

/// An accepted operation that has not yet reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongRunningOperation {
    target: PollTarget,
    retry_after: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct OperationStatus {
    status: String,
    #[serde(default)]
    error: Option<ArmErrorBody>,
}

impl LongRunningOperation {
    /// Extract the poll target from an initial response's headers.
    ///
    /// Returns `None` when the response carries no polling header, meaning
    /// the operation already completed.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>> {
        let target = if let Some(url) = header_url(headers, AZURE_ASYNC_OPERATION)? {
            PollTarget::AsyncOperation(url)
        } else if let Some(url) = header_url(headers, LOCATION.as_str())? {
            PollTarget::Location(url)
        } else {
            return Ok(None);
        };

        Ok(Some(Self {
            target,
            retry_after: retry_after(headers),
        }))
    }

    /// The URL being polled.
    pub fn target(&self) -> &PollTarget {
        &self.target
    }

    /// Poll until the operation succeeds or fails.
    pub async fn wait(mut self, client: &ArmClient) -> Result<()> {
        let mut polls = 0u32;
        loop {
            let delay = self.retry_after.unwrap_or_else(|| client.poll_interval());
            tokio::time::sleep(delay).await;
            polls += 1;

            match self.poll_once(client).await? {
                Some(next_retry_after) => {
                    debug!(target = ?self.target, polls, "Operation still in progress");
                    self.retry_after = next_retry_after;
                },
                None => {
                    debug!(target = ?self.target, polls, "Operation completed");
                    return Ok(());
                },
            }
        }
    }

    /// One status request. `Ok(Some(retry_after))` means still running.
    async fn poll_once(&self, client: &ArmClient) -> Result<Option<Option<Duration>>> {
        match &self.target {
            PollTarget::AsyncOperation(url) => {
                let response = client.send_to(reqwest::Method::GET, url.clone(), None).await?;
                if !response.status().is_success() {
                    return Err(error_from_response(response).await);
                }
                let next = retry_after(response.headers());
                let status: OperationStatus = response.json().await?;

                if status.status.eq_ignore_ascii_case("Succeeded") {
                    Ok(None)
                } else if status.status.eq_ignore_ascii_case("Failed")
                    || status.status.eq_ignore_ascii_case("Canceled")
                {
                    let detail = status
                        .error
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_else(|| "no error details returned".to_string());
                    warn!(url = %url, status = %status.status, "Operation did not succeed");
                    Err(ProviderError::OperationFailed(format!(
                        "operation finished with status {:?}: {}",
                        status.status, detail
                    )))
                } else {
                    Ok(Some(next))
                }
            },
            PollTarget::Location(url) => {
                let response = client.send_to(reqwest::Method::GET, url.clone(), None).await?;
                match response.status() {
                    StatusCode::ACCEPTED => Ok(Some(retry_after(response.headers()))),
                    status if status.is_success() => Ok(None),
                    _ => Err(error_from_response(response)
                        .await
                        .context("long-running operation failed")),
                }
            },
        }
    }
}

fn header_url(headers: &HeaderMap, name: &str) -> Result<Option<Url>> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let raw = value.to_str().map_err(|e| {
        ProviderError::InvalidRequest(format!("{} header is not valid text: {}", name, e))
    })?;
    Url::parse(raw).map(Some).map_err(|e| {
        ProviderError::InvalidRequest(format!("{} header {:?} is not a URL: {}", name, raw, e))
    })
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_from_headers_prefers_async_operation() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Azure-AsyncOperation",
            HeaderValue::from_static("https://management.azure.com/operations/op1"),
        );
        headers.insert(
            LOCATION,
            HeaderValue::from_static("https://management.azure.com/results/op1"),
        );
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));

        let op = LongRunningOperation::from_headers(&headers).unwrap().unwrap();
        assert!(matches!(op.target(), PollTarget::AsyncOperation(u) if u.path() == "/operations/op1"));
        assert_eq!(op.retry_after, Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_from_headers_location_only() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LOCATION,
            HeaderValue::from_static("https://management.azure.com/results/op2"),
        );
        let op = LongRunningOperation::from_headers(&headers).unwrap().unwrap();
        assert!(matches!(op.target(), PollTarget::Location(_)));
        assert_eq!(op.retry_after, None);
    }

    #[test]
    fn test_from_headers_none_means_done() {
        assert!(LongRunningOperation::from_headers(&HeaderMap::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_from_headers_rejects_bad_url() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("not a url"));
        assert!(LongRunningOperation::from_headers(&headers).is_err());
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 0 "));
        assert_eq!(retry_after(&headers), Some(Duration::ZERO));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }
}
