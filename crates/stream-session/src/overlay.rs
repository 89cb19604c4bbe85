//! Detection overlay rendering against an abstract 2D surface.
//!
//! The console sizes the surface to the video's native resolution, paints a
//! labeled bounding box per detection, and wipes the surface after a fixed
//! TTL unless a newer detection supersedes the pending clear.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use common::{BoundingBox, DetectionEvent, DetectionType};

use crate::metrics::DETECTIONS_RENDERED_TOTAL;

const HIGH_CONFIDENCE: f32 = 0.8;
const FADE_OPACITY: f32 = 0.5;
const FILL_ALPHA: f32 = 0.2;
const LABEL_BG_ALPHA: f32 = 0.85;
const BORDER_WIDTH: f32 = 2.0;
const LABEL_HEIGHT: f32 = 20.0;
const CAPTION_OFFSET: f32 = 14.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f32,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn with_alpha(self, a: f32) -> Self {
        Self {
            r: self.r,
            g: self.g,
            b: self.b,
            a,
        }
    }
}

const TEXT_COLOR: Color = Color::rgb(255, 255, 255);

/// The four fixed overlay color classes. The mapping from detection type
/// and confidence is a rendering contract, not a cosmetic choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorClass {
    KnownHigh,
    KnownLow,
    StrangerHigh,
    StrangerLow,
}

impl ColorClass {
    pub fn for_detection(detection_type: DetectionType, confidence: f32) -> Self {
        match (detection_type, confidence > HIGH_CONFIDENCE) {
            (DetectionType::KnownPerson, true) => ColorClass::KnownHigh,
            (DetectionType::KnownPerson, false) => ColorClass::KnownLow,
            (DetectionType::Stranger, true) => ColorClass::StrangerHigh,
            (DetectionType::Stranger, false) => ColorClass::StrangerLow,
        }
    }

    pub fn color(self) -> Color {
        match self {
            ColorClass::KnownHigh => Color::rgb(0, 200, 83),
            ColorClass::KnownLow => Color::rgb(255, 193, 7),
            ColorClass::StrangerHigh => Color::rgb(213, 0, 0),
            ColorClass::StrangerLow => Color::rgb(255, 109, 0),
        }
    }
}

/// Capability surface the renderer draws against, so the logic stays
/// independent of any concrete 2D graphics context.
pub trait DrawSurface: Send {
    /// Native pixel size of the backing video, when known.
    fn native_video_size(&self) -> Option<(u32, u32)>;
    fn resize(&mut self, width: u32, height: u32);
    /// Dims existing contents to leave a short decay trail.
    fn fade(&mut self, opacity: f32);
    fn fill_rect(&mut self, rect: BoundingBox, color: Color);
    fn stroke_rect(&mut self, rect: BoundingBox, color: Color, line_width: f32);
    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Color);
    fn clear(&mut self);
}

pub struct DetectionOverlayRenderer {
    surface: Arc<Mutex<Box<dyn DrawSurface>>>,
    ttl: Duration,
    clear_epoch: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl DetectionOverlayRenderer {
    pub fn new(surface: Box<dyn DrawSurface>, ttl: Duration) -> Self {
        Self {
            surface: Arc::new(Mutex::new(surface)),
            ttl,
            clear_epoch: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    /// Paints one detection and schedules the TTL clear. Silently skips
    /// when the video has no usable dimensions yet, leaving the previous
    /// overlay as-is.
    pub async fn render(&self, event: &DetectionEvent) {
        {
            let mut surface = self.surface.lock().await;
            let Some((width, height)) = surface.native_video_size() else {
                debug!(camera_id = %event.camera_id, "video dimensions unknown, skipping overlay");
                return;
            };
            if width == 0 || height == 0 {
                debug!(camera_id = %event.camera_id, "video not ready, skipping overlay");
                return;
            }

            surface.resize(width, height);
            surface.fade(FADE_OPACITY);

            let color = ColorClass::for_detection(event.detection_type, event.confidence).color();
            let bbox = event.bounding_box;

            surface.fill_rect(bbox, color.with_alpha(FILL_ALPHA));
            surface.stroke_rect(bbox, color, BORDER_WIDTH);

            let label = format!("{} {:.0}%", event.person_name, event.confidence * 100.0);
            let label_bg = BoundingBox::new(
                bbox.x,
                bbox.y - LABEL_HEIGHT,
                label.len() as f32 * 7.0 + 8.0,
                LABEL_HEIGHT,
            );
            surface.fill_rect(label_bg, color.with_alpha(LABEL_BG_ALPHA));
            surface.fill_text(&label, bbox.x + 4.0, bbox.y - 6.0, TEXT_COLOR);

            if let Some(similarity) = event.similarity_score {
                let caption = format!("similarity {:.1}%", similarity * 100.0);
                surface.fill_text(&caption, bbox.x, bbox.y + bbox.height + CAPTION_OFFSET, color);
            }
        }

        DETECTIONS_RENDERED_TOTAL.inc();

        // One outstanding clear per surface: a newer draw bumps the epoch
        // and the stale timer becomes a no-op.
        let epoch = self.clear_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let surface = self.surface.clone();
        let clear_epoch = self.clear_epoch.clone();
        let ttl = self.ttl;
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = time::sleep(ttl) => {
                    if clear_epoch.load(Ordering::SeqCst) == epoch {
                        surface.lock().await.clear();
                    }
                }
            }
        });
    }

    /// Immediate wipe, cancelling any pending TTL clear.
    pub async fn clear_now(&self) {
        self.clear_epoch.fetch_add(1, Ordering::SeqCst);
        self.surface.lock().await.clear();
    }

    /// Stops any scheduled clears; used on view teardown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
