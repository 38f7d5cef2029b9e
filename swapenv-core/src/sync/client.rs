//! HTTP client for the device-code endpoints of the swapenv server.

use crate::sync::auth::{AuthError, DeviceAuthorizer, DeviceCode, PollOutcome};
use crate::sync::credentials::Credentials;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

const DEVICE_CODE_PATH: &str = "/auth/device/";
const POLL_PATH: &str = "/auth/poll/";

/// Device-flow client bound to one server.
pub struct HttpDeviceClient {
    client: reqwest::Client,
    server_url: String,
}

impl HttpDeviceClient {
    pub fn new(server_url: &str) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }
}

#[async_trait]
impl DeviceAuthorizer for HttpDeviceClient {
    async fn request_code(&self) -> Result<DeviceCode, AuthError> {
        let resp = self
            .client
            .post(self.url(DEVICE_CODE_PATH))
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(AuthError::Rejected(format!("server returned {}", status)));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        serde_json::from_slice(&body)
            .map_err(|e| AuthError::InvalidResponse(format!("device code: {}", e)))
    }

    async fn poll_once(&self, device_code: &str) -> Result<PollOutcome, AuthError> {
        let resp = self
            .client
            .post(self.url(POLL_PATH))
            .json(&serde_json::json!({ "device_code": device_code }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        interpret_poll(status, &body)
    }
}

#[derive(Deserialize)]
struct PollStatus {
    #[serde(default)]
    status: String,
}

/// Map a poll response to its outcome.
///
/// `202` means still waiting; its body says `pending` or `slow_down`.
/// `200` carries the credential. Anything else is fatal.
fn interpret_poll(status: StatusCode, body: &[u8]) -> Result<PollOutcome, AuthError> {
    match status {
        StatusCode::ACCEPTED => {
            let waiting: PollStatus = serde_json::from_slice(body).unwrap_or(PollStatus {
                status: String::new(),
            });
            if waiting.status == "slow_down" {
                Ok(PollOutcome::SlowDown)
            } else {
                Ok(PollOutcome::Pending)
            }
        }
        StatusCode::OK => {
            let credentials: Credentials = serde_json::from_slice(body)
                .map_err(|e| AuthError::InvalidResponse(format!("credentials: {}", e)))?;
            if credentials.token.is_empty() {
                return Err(AuthError::InvalidResponse("empty token".to_string()));
            }
            Ok(PollOutcome::Authorized(credentials))
        }
        other => Err(AuthError::Rejected(format!("server returned {}", other))),
    }
}
