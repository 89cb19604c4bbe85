use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use common::CameraConfig;

use crate::channel::EventChannelSupervisor;
use crate::client::StreamApi;
use crate::config::SessionPolicy;
use crate::lifecycle::StreamLifecycleController;
use crate::media::MediaSink;
use crate::metrics::SESSIONS_ACTIVE;
use crate::overlay::DetectionOverlayRenderer;

/// Owned registry of live camera sessions, keyed by camera id.
///
/// Exactly one session exists per camera per view context; opening the
/// same camera twice hands back the existing handle. Session state is
/// mutated only through the controller's transition methods, never from
/// outside.
pub struct SessionRegistry {
    api: Arc<dyn StreamApi>,
    supervisor: Arc<EventChannelSupervisor>,
    push_url: Option<String>,
    policy: SessionPolicy,
    sessions: RwLock<HashMap<String, Arc<StreamLifecycleController>>>,
}

impl SessionRegistry {
    pub fn new(
        api: Arc<dyn StreamApi>,
        supervisor: Arc<EventChannelSupervisor>,
        push_url: Option<String>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            api,
            supervisor,
            push_url,
            policy,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Opens (or returns) the single session for a camera and wires its
    /// push-event queue.
    pub async fn open(
        &self,
        camera: CameraConfig,
        media: Arc<dyn MediaSink>,
        overlay: Option<Arc<DetectionOverlayRenderer>>,
    ) -> Arc<StreamLifecycleController> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&camera.id) {
            debug!(camera_id = %camera.id, "session already open, reusing");
            return existing.clone();
        }

        // The single push connection comes up with the first camera that
        // has streaming enabled; later mounts share it read-only.
        if camera.streaming_enabled {
            self.supervisor.connect(self.push_url.as_deref());
        }

        let controller = Arc::new(StreamLifecycleController::new(
            camera.clone(),
            self.api.clone(),
            media,
            overlay,
            self.policy,
        ));

        let mut events = self.supervisor.subscribe(&camera.id).await;
        let cancel = controller.cancel_token();
        let pump = controller.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => pump.apply_event(event).await,
                        None => break,
                    }
                }
            }
        });

        SESSIONS_ACTIVE.inc();
        info!(camera_id = %camera.id, "session opened");
        sessions.insert(camera.id.clone(), controller.clone());
        controller
    }

    pub async fn get(&self, camera_id: &str) -> Option<Arc<StreamLifecycleController>> {
        self.sessions.read().await.get(camera_id).cloned()
    }

    /// Closes one camera view: stops the stream and cancels all of the
    /// session's timers. Never touches the shared push channel, which
    /// other views may still be reading.
    pub async fn close(&self, camera_id: &str) {
        let controller = self.sessions.write().await.remove(camera_id);
        if let Some(controller) = controller {
            controller.stop().await;
            controller.close().await;
            SESSIONS_ACTIVE.dec();
            debug!(camera_id, "session closed and removed");
        }
    }

    /// Application-level teardown (logout): closes every session and only
    /// then the shared push channel.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.close(&id).await;
        }
        self.supervisor.shutdown();
        info!("session registry shut down");
    }
}
