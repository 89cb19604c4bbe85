use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use common::StreamStatusResponse;

use crate::error::ApiError;

/// Backend stream endpoints consumed by the console.
///
/// Kept behind a trait so the recovery logic can be exercised without a
/// live backend.
#[async_trait]
pub trait StreamApi: Send + Sync {
    async fn start_stream(&self, camera_id: &str) -> Result<(), ApiError>;
    async fn stop_stream(&self, camera_id: &str) -> Result<(), ApiError>;
    async fn stream_status(&self, camera_id: &str) -> Result<StreamStatusResponse, ApiError>;
    /// One JPEG frame; used by the poll loop and one-shot capture downloads.
    async fn fetch_snapshot(&self, camera_id: &str) -> Result<Vec<u8>, ApiError>;
    async fn start_detection(&self, camera_id: &str) -> Result<(), ApiError>;
    async fn stop_detection(&self, camera_id: &str) -> Result<(), ApiError>;
    /// Media source URL for the platform player, carrying the bearer token
    /// as a query parameter when the transport requires it.
    fn video_url(&self, camera_id: &str) -> String;
}

pub struct HttpStreamApi {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpStreamApi {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_expect_ok(&self, url: String) -> Result<(), ApiError> {
        let mut request = self.client.post(&url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            debug!(%url, status = status.as_u16(), "backend call rejected");
            Err(ApiError::from_status(status.as_u16()))
        }
    }
}

#[async_trait]
impl StreamApi for HttpStreamApi {
    async fn start_stream(&self, camera_id: &str) -> Result<(), ApiError> {
        self.post_expect_ok(self.url(&format!("/stream/{camera_id}/start")))
            .await
    }

    async fn stop_stream(&self, camera_id: &str) -> Result<(), ApiError> {
        self.post_expect_ok(self.url(&format!("/stream/{camera_id}/stop")))
            .await
    }

    async fn stream_status(&self, camera_id: &str) -> Result<StreamStatusResponse, ApiError> {
        let mut request = self.client.get(self.url(&format!("/stream/{camera_id}/status")));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16()));
        }
        response
            .json::<StreamStatusResponse>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn fetch_snapshot(&self, camera_id: &str) -> Result<Vec<u8>, ApiError> {
        let mut request = self
            .client
            .get(self.url(&format!("/stream/{camera_id}/snapshot")));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn start_detection(&self, camera_id: &str) -> Result<(), ApiError> {
        self.post_expect_ok(self.url(&format!("/cameras/{camera_id}/start-detection")))
            .await
    }

    async fn stop_detection(&self, camera_id: &str) -> Result<(), ApiError> {
        self.post_expect_ok(self.url(&format!("/cameras/{camera_id}/stop-detection")))
            .await
    }

    fn video_url(&self, camera_id: &str) -> String {
        let url = self.url(&format!("/stream/{camera_id}/video"));
        match &self.auth_token {
            Some(token) => format!("{url}?token={token}"),
            None => url,
        }
    }
}
