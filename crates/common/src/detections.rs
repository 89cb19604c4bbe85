use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rectangle marking a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    KnownPerson,
    Stranger,
}

impl std::fmt::Display for DetectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionType::KnownPerson => write!(f, "known_person"),
            DetectionType::Stranger => write!(f, "stranger"),
        }
    }
}

/// One face-recognition event as delivered over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub id: String,
    pub camera_id: String,
    pub timestamp: DateTime<Utc>,
    pub person_name: String,
    /// Recognition confidence in `0.0..=1.0`.
    pub confidence: f32,
    pub bounding_box: BoundingBox,
    pub detection_type: DetectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_image_ref: Option<String>,
}

impl DetectionEvent {
    pub fn new(
        camera_id: impl Into<String>,
        person_name: impl Into<String>,
        confidence: f32,
        bounding_box: BoundingBox,
        detection_type: DetectionType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            camera_id: camera_id.into(),
            timestamp: Utc::now(),
            person_name: person_name.into(),
            confidence,
            bounding_box,
            detection_type,
            similarity_score: None,
            face_image_ref: None,
        }
    }
}

/// Newest-first buffer of the latest detections for one camera view.
///
/// Bounded at `capacity`; pushing past the bound drops the oldest entry.
#[derive(Debug, Clone)]
pub struct RecentDetections {
    capacity: usize,
    events: VecDeque<DetectionEvent>,
}

impl RecentDetections {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: DetectionEvent) {
        self.events.push_front(event);
        self.events.truncate(self.capacity);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectionEvent> {
        self.events.iter()
    }

    pub fn snapshot(&self) -> Vec<DetectionEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
