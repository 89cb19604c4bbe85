use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{debug, info, warn};

use common::{BoundingBox, CameraConfig};
use stream_session::{
    ChannelHealth, Color, Config, DetectionOverlayRenderer, DrawSurface, EventChannelSupervisor,
    HttpMediaProbe, HttpStreamApi, SessionPolicy, SessionRegistry, WsTransport,
};

/// Surface for the headless monitor: draws become log lines instead of
/// pixels.
struct TraceSurface {
    size: (u32, u32),
}

impl DrawSurface for TraceSurface {
    fn native_video_size(&self) -> Option<(u32, u32)> {
        Some(self.size)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn fade(&mut self, _opacity: f32) {}

    fn fill_rect(&mut self, rect: BoundingBox, _color: Color) {
        debug!(x = rect.x, y = rect.y, w = rect.width, h = rect.height, "overlay box");
    }

    fn stroke_rect(&mut self, _rect: BoundingBox, _color: Color, _line_width: f32) {}

    fn fill_text(&mut self, text: &str, _x: f32, _y: f32, _color: Color) {
        info!(%text, "overlay label");
    }

    fn clear(&mut self) {
        debug!("overlay cleared");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_with_service("stream-session");

    let config = Config::from_env()?;
    let policy = SessionPolicy::default();
    info!(api = %config.api_base_url, camera_id = %config.camera_id, "starting headless stream monitor");

    let api = Arc::new(HttpStreamApi::new(
        &config.api_base_url,
        config.auth_token.clone(),
    )?);
    let supervisor = Arc::new(EventChannelSupervisor::new(
        Arc::new(WsTransport),
        policy.reconnect,
    ));
    let registry = SessionRegistry::new(
        api,
        supervisor.clone(),
        config.push_channel_url.clone(),
        policy,
    );

    let camera = CameraConfig::new(config.camera_id.clone(), config.camera_name.clone());
    let media = Arc::new(HttpMediaProbe::new()?);
    let overlay = Arc::new(DetectionOverlayRenderer::new(
        Box::new(TraceSurface { size: (1280, 720) }),
        policy.overlay_ttl,
    ));

    let controller = registry.open(camera, media, Some(overlay)).await;

    // Log every aggregate state change.
    let mut updates = controller.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow().clone();
            info!(
                status = ?snapshot.status,
                live = snapshot.is_live(),
                retries = snapshot.retry_count,
                detections = snapshot.recent_detections.len(),
                "session update"
            );
        }
    });

    // Degrade to snapshot polling if the push channel goes down for good.
    {
        let controller = controller.clone();
        let mut health = supervisor.health();
        let fps = config.snapshot_fps;
        tokio::spawn(async move {
            while health.changed().await.is_ok() {
                if *health.borrow() == ChannelHealth::Down {
                    warn!("push channel down, falling back to snapshot polling");
                    controller.start_polling(fps).await;
                }
            }
        });
    }

    {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller.start().await;
        });
    }

    if controller.camera().detection_enabled {
        if let Err(e) = controller.enable_detection().await {
            warn!(error = %e, "could not enable detection");
        }
    }

    signal::ctrl_c().await?;
    info!("shutting down");
    registry.shutdown().await;
    debug!(counters = %stream_session::metrics::render(), "final session metrics");
    Ok(())
}
