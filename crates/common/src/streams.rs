use serde::{Deserialize, Serialize};

/// Locally known configuration for one camera, as loaded by the console.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraConfig {
    pub id: String,
    pub name: String,
    /// Frame rate the camera is configured to produce.
    pub stream_fps: f32,
    pub resolution: String,
    pub streaming_enabled: bool,
    pub detection_enabled: bool,
}

impl CameraConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            stream_fps: 25.0,
            resolution: "1280x720".to_string(),
            streaming_enabled: true,
            detection_enabled: false,
        }
    }
}

/// Lifecycle state of one camera's live-view session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Playing,
    Retrying,
    Error,
    Stopped,
}

impl SessionStatus {
    /// True while the session is connected or still trying to connect.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Connecting | SessionStatus::Playing | SessionStatus::Retrying
        )
    }
}

/// Snapshot of current stream health.
///
/// Immutable value, replaced wholesale on every update; never patched in
/// place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamStats {
    pub bitrate_kbps: u32,
    pub fps: f32,
    pub resolution: String,
    pub viewers_count: u32,
    pub uptime_seconds: u64,
    /// Packet loss over the last sampling window, in percent.
    pub packets_lost: f32,
    pub buffer_health_percent: f32,
    pub latency_ms: u32,
    /// Backend-computed health score; `None` when the backend omits it and
    /// the console has to derive one.
    #[serde(default)]
    pub quality_score: Option<u8>,
    pub is_streaming: bool,
    pub is_recording: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_kbps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u64>,
}

impl StreamStats {
    /// Best-effort baseline derived from camera configuration, used when the
    /// backend has not reported real numbers yet.
    pub fn baseline(fps: f32, resolution: impl Into<String>) -> Self {
        Self {
            bitrate_kbps: 0,
            fps,
            resolution: resolution.into(),
            viewers_count: 0,
            uptime_seconds: 0,
            packets_lost: 0.0,
            buffer_health_percent: 100.0,
            latency_ms: 0,
            quality_score: None,
            is_streaming: true,
            is_recording: false,
            bandwidth_kbps: None,
            frame_count: None,
        }
    }
}

/// Wire shape of `GET /stream/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStatusResponse {
    pub is_streaming: bool,
    pub is_recording: bool,
    #[serde(default)]
    pub viewers_count: u32,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub frame_rate: f32,
    #[serde(default)]
    pub resolution: Option<String>,
}
