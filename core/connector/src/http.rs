//! Shared HTTP plumbing for the platform collaborators.

use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

use crmsync_common::{Error, Result};

use crate::provider::WriteResponse;
use crate::retry::RetryConfig;

/// Transport settings shared by the HTTP collaborators.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Timeout for a single HTTP request.
    pub request_timeout: Duration,
    /// Retry policy for reads and property creation.
    pub retry: RetryConfig,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            user_agent: concat!("crmsync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpSettings {
    /// Build a reqwest client honouring these settings.
    pub fn build_client(&self) -> Result<Client> {
        Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))
    }
}

/// Map a reqwest send failure to a transport error.
pub(crate) fn send_error(action: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Transport(format!("{} timed out: {}", action, err))
    } else {
        Error::Transport(format!("{} failed: {}", action, err))
    }
}

/// Error for a non-success status on a read.
pub(crate) fn status_error(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Auth(format!("{} - {}", status, body))
        }
        StatusCode::TOO_MANY_REQUESTS => Error::Transport(format!("Rate limited: {}", body)),
        _ => Error::Transport(format!("API error: {} - {}", status, body)),
    }
}

/// Decode a successful JSON body or turn the status into an error.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();

    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Failed to parse response: {}", e)))
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

/// Classify the response to a record write.
///
/// Credentials problems stay errors; everything else the destination says
/// is reported back as the record's verdict.
pub(crate) async fn read_write_response(
    response: Response,
    fallback_id: Option<&str>,
) -> Result<WriteResponse> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(status_error(status, &body));
    }

    if !status.is_success() {
        return Ok(WriteResponse::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let id = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str().map(str::to_string)))
        .or_else(|| fallback_id.map(str::to_string));

    match id {
        Some(id) => Ok(WriteResponse::Accepted { id }),
        None => Err(Error::Transport(format!(
            "Write accepted with {} but response carried no record id",
            status
        ))),
    }
}
