use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detections::DetectionEvent;
use crate::streams::StreamStats;

/// Envelope for every message delivered over the push channel.
///
/// Wire form: `{"type": "...", "data": {...}, "timestamp": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    #[serde(flatten)]
    pub payload: PushPayload,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushPayload {
    StreamStats(StatsUpdate),
    DetectionAlert(DetectionEvent),
    CameraStatus(CameraStatusUpdate),
    Error(ChannelFault),
}

impl PushPayload {
    /// Camera the payload is scoped to, when it carries one.
    pub fn camera_id(&self) -> Option<&str> {
        match self {
            PushPayload::StreamStats(update) => Some(&update.camera_id),
            PushPayload::DetectionAlert(event) => Some(&event.camera_id),
            PushPayload::CameraStatus(update) => Some(&update.camera_id),
            PushPayload::Error(fault) => fault.camera_id.as_deref(),
        }
    }
}

/// Stats snapshot pushed by the backend for one camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsUpdate {
    pub camera_id: String,
    #[serde(flatten)]
    pub stats: StreamStats,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CameraPhase {
    Online,
    Streaming,
    Stopped,
    Offline,
    Error,
}

/// Out-of-band camera state change; authoritative over any stats snapshot
/// that arrived earlier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStatusUpdate {
    pub camera_id: String,
    pub status: CameraPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Server-reported channel fault, optionally scoped to one camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFault {
    #[serde(default)]
    pub camera_id: Option<String>,
    pub message: String,
}
