pub mod detections;
pub mod events;
pub mod streams;

pub use detections::{BoundingBox, DetectionEvent, DetectionType, RecentDetections};
pub use events::{CameraPhase, CameraStatusUpdate, ChannelFault, PushEnvelope, PushPayload, StatsUpdate};
pub use streams::{CameraConfig, SessionStatus, StreamStats, StreamStatusResponse};
