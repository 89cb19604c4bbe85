use thiserror::Error;

/// Errors returned by the backend stream API client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,
    #[error("request timed out")]
    Timeout,
    #[error("backend returned status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn from_status(status: u16) -> Self {
        if status == 401 {
            ApiError::Unauthorized
        } else {
            ApiError::Status(status)
        }
    }

    /// Transient failures are retried by the caller's policy; everything
    /// else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Timeout | ApiError::Transport(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Push-channel failures. Non-fatal to sessions; the supervisor retries
/// and eventually degrades to polling.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("channel closed")]
    Closed,
}

/// Terminal, user-visible session failures. Announced once and kept as
/// `last_error` on the session; never re-announced per failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("authentication required")]
    AuthRequired,
    #[error("connection to camera lost")]
    ConnectionLost,
    #[error("playback failed after {attempts} attempts: {reason}")]
    PlaybackFailed { attempts: u32, reason: String },
    #[error("backend rejected {op}: {reason}")]
    Rejected { op: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_maps_to_unauthorized() {
        assert!(ApiError::from_status(401).is_auth());
        assert!(matches!(ApiError::from_status(503), ApiError::Status(503)));
    }

    #[test]
    fn transient_classification() {
        assert!(ApiError::Timeout.is_transient());
        assert!(ApiError::Transport("reset".into()).is_transient());
        assert!(!ApiError::Unauthorized.is_transient());
        assert!(!ApiError::Status(500).is_transient());
    }
}
