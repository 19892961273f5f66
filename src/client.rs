//! HTTP client for a running `cluck serve` daemon, used by the CLI

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorResponse;
use crate::http::{StartRecordingRequest, StartRecordingResponse};
use crate::session::{SessionId, SessionStatus};

#[derive(Error, Debug)]
pub enum ClientError {
    /// The daemon answered with an error body
    #[error("{}: {}", .0.code, .0.message)]
    Api(ErrorResponse),

    #[error("daemon unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn start(
        &self,
        request: &StartRecordingRequest,
    ) -> Result<StartRecordingResponse, ClientError> {
        let response = self
            .client
            .post(self.url("/sessions/start"))
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn stop(&self, id: &SessionId) -> Result<SessionStatus, ClientError> {
        let response = self
            .client
            .post(self.url(&format!("/sessions/{}/stop", id)))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn status(&self, id: &SessionId) -> Result<SessionStatus, ClientError> {
        let response = self
            .client
            .get(self.url(&format!("/sessions/{}/status", id)))
            .send()
            .await?;
        decode(response).await
    }

    /// Status of the active session, `None` when the daemon is idle
    pub async fn current(&self) -> Result<Option<SessionStatus>, ClientError> {
        let response = self.client.get(self.url("/sessions/current")).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    debug!("{} {}", status, response.url());

    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await?;
    let error = serde_json::from_str(&body).unwrap_or_else(|_| ErrorResponse {
        code: status.as_u16().to_string(),
        message: body,
    });
    Err(ClientError::Api(error))
}
