//! Stream session core for the Argus surveillance console.
//!
//! Everything around this crate is CRUD glue over the backend REST API;
//! this is the part with real lifecycle, concurrency, and failure
//! handling: per-camera stream sessions, the shared push channel with
//! bounded reconnection, the snapshot-polling fallback with its circuit
//! breaker, detection overlay rendering, and stream quality estimation.

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod media;
pub mod metrics;
pub mod overlay;
pub mod poller;
pub mod quality;
pub mod registry;
pub mod retry;

pub use channel::{CameraEvent, ChannelHealth, EventChannelSupervisor, PushTransport, WsTransport};
pub use client::{HttpStreamApi, StreamApi};
pub use config::{Config, SessionPolicy};
pub use error::{ApiError, ChannelError, SessionError};
pub use lifecycle::{SessionSnapshot, StreamLifecycleController};
pub use media::{HttpMediaProbe, MediaError, MediaSink, MediaSource};
pub use overlay::{Color, ColorClass, DetectionOverlayRenderer, DrawSurface};
pub use poller::{Frame, FramePoller, PollerEvent};
pub use registry::SessionRegistry;
pub use retry::{RetryPolicy, RetryState};
