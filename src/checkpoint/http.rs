//! HTTP client for a visual-diff backend.
//!
//! Every request carries the API key in the `x-api-key` header.
//!
//! | Call  | Request                                   |
//! |-------|-------------------------------------------|
//! | open  | `POST /api/v1/sessions`                   |
//! | check | `POST /api/v1/sessions/{id}/checkpoints`  |
//! | close | `POST /api/v1/sessions/{id}/close`        |
//! | poll  | `GET /api/v1/sessions/{id}/results`       |

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{
    BackendSessionId, CheckpointError, CheckpointUpload, ClientResult, CloseReport, Environment,
    StepReport, VisualBackend,
};
use crate::harness::types::TestIdentity;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenRequest<'a> {
    app_name: &'a str,
    test_name: &'a str,
    #[serde(flatten)]
    environment: &'a Environment,
}

#[derive(Debug, Deserialize)]
struct OpenResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    label: &'a str,
    /// Base64-encoded PNG
    image: String,
    width: u32,
    height: u32,
}

/// Visual backend reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    server_url: String,
    api_key: String,
    client: Client,
}

impl HttpBackend {
    /// Create a client for the backend at `server_url`.
    ///
    /// The key is only checked for being non-empty.
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> ClientResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(CheckpointError::Auth("API key is empty".to_string()));
        }

        let client = Client::builder()
            .build()
            .map_err(|e| CheckpointError::Unavailable(e.to_string()))?;

        Ok(Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.server_url, path)
    }

    /// Send an authenticated request and decode the JSON answer
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> ClientResult<T> {
        let response = request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(operation, status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| CheckpointError::Protocol(format!("{}: undecodable response: {}", operation, e)))
    }
}

#[async_trait]
impl VisualBackend for HttpBackend {
    async fn open(
        &self,
        identity: &TestIdentity,
        environment: &Environment,
    ) -> ClientResult<BackendSessionId> {
        let body = OpenRequest {
            app_name: identity.app_name(),
            test_name: identity.test_name(),
            environment,
        };
        let request = self.client.post(self.endpoint("sessions")).json(&body);

        let response: OpenResponse = self.send("open", request).await?;
        debug!(session = %response.id, "Backend session created");
        Ok(BackendSessionId(response.id))
    }

    async fn check(
        &self,
        session: &BackendSessionId,
        upload: &CheckpointUpload,
    ) -> ClientResult<StepReport> {
        let body = CheckRequest {
            label: &upload.label,
            image: base64::engine::general_purpose::STANDARD.encode(&upload.image),
            width: upload.width,
            height: upload.height,
        };
        let request = self
            .client
            .post(self.endpoint(&format!("sessions/{}/checkpoints", session)))
            .json(&body);

        self.send("check", request).await
    }

    async fn close(&self, session: &BackendSessionId) -> ClientResult<CloseReport> {
        let request = self
            .client
            .post(self.endpoint(&format!("sessions/{}/close", session)));

        self.send("close", request).await
    }

    async fn poll(&self, session: &BackendSessionId) -> ClientResult<CloseReport> {
        let request = self
            .client
            .get(self.endpoint(&format!("sessions/{}/results", session)));

        self.send("poll", request).await
    }
}

/// Classify a failure to get any HTTP answer
fn transport_error(operation: &str, err: reqwest::Error) -> CheckpointError {
    if err.is_timeout() {
        CheckpointError::Timeout(format!("{}: {}", operation, err))
    } else {
        CheckpointError::Unavailable(format!("{}: {}", operation, err))
    }
}

/// Classify a non-success HTTP status
fn status_error(operation: &str, status: StatusCode, body: &str) -> CheckpointError {
    let message = if body.is_empty() {
        format!("{} returned {}", operation, status)
    } else {
        format!("{} returned {}: {}", operation, status, body)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CheckpointError::Auth(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => CheckpointError::Timeout(message),
        s if s.is_server_error() => CheckpointError::Unavailable(message),
        _ => CheckpointError::Protocol(message),
    }
}
