use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// Source reference handed to the platform media element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaSource {
    pub camera_id: String,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("authentication required")]
    Unauthorized,
    #[error("media source unreachable: {0}")]
    Unreachable(String),
    #[error("playback failed: {0}")]
    Playback(String),
}

/// Attachment point for the decoded media output.
///
/// The real console backs this with the platform's native media element;
/// `attach` resolves once the element reports ready to play.
#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn attach(&self, source: &MediaSource) -> Result<(), MediaError>;
    /// Tears down the current attachment. Safe to call repeatedly.
    async fn detach(&self);
}

/// Readiness probe used by the headless monitor: a successful GET of the
/// video URL stands in for the media element's ready signal.
pub struct HttpMediaProbe {
    client: Client,
}

impl HttpMediaProbe {
    pub fn new() -> Result<Self, MediaError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MediaError::Unreachable(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaSink for HttpMediaProbe {
    async fn attach(&self, source: &MediaSource) -> Result<(), MediaError> {
        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .map_err(|e| MediaError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(MediaError::Unauthorized);
        }
        if !status.is_success() {
            return Err(MediaError::Playback(format!(
                "media endpoint returned {status}"
            )));
        }
        debug!(camera_id = %source.camera_id, "media source reachable");
        Ok(())
    }

    async fn detach(&self) {
        // The probe holds no pipeline; nothing to release.
    }
}
