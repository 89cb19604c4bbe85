//! Per-camera live-view lifecycle.
//!
//! Orchestrates backend start/stop, media attachment, bounded playback
//! retries, periodic stats refresh, and the application of push-channel
//! events. All timers and continuations carry the session generation that
//! was current when they were scheduled; a stale generation is a no-op, so
//! a retry firing after an explicit stop can never resurrect the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::{
    CameraConfig, CameraPhase, DetectionEvent, RecentDetections, SessionStatus, StreamStats,
    StreamStatusResponse,
};

use crate::channel::CameraEvent;
use crate::client::StreamApi;
use crate::config::SessionPolicy;
use crate::error::{ApiError, SessionError};
use crate::media::{MediaError, MediaSink, MediaSource};
use crate::metrics::PLAYBACK_RETRIES_TOTAL;
use crate::overlay::DetectionOverlayRenderer;
use crate::poller::{Frame, FramePoller, PollerEvent};
use crate::quality;
use crate::retry::RetryState;

const RECENT_DETECTIONS_CAPACITY: usize = 10;

/// Aggregate session state as reported to the UI layer.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub camera_id: String,
    pub status: SessionStatus,
    pub retry_count: u32,
    pub last_error: Option<SessionError>,
    pub stats: Option<StreamStats>,
    pub recent_detections: Vec<DetectionEvent>,
}

impl SessionSnapshot {
    pub fn is_streaming(&self) -> bool {
        self.status == SessionStatus::Playing
    }

    /// Whether the "Live" badge shows: playing, and the backend has not
    /// contradicted it.
    pub fn is_live(&self) -> bool {
        self.status == SessionStatus::Playing
            && self.stats.as_ref().map_or(true, |s| s.is_streaming)
    }
}

struct SessionInner {
    status: SessionStatus,
    retry: RetryState,
    last_error: Option<SessionError>,
    stats: Option<StreamStats>,
    detections: RecentDetections,
    offline_polls: u32,
    stats_cancel: Option<CancellationToken>,
    start_in_flight: bool,
    poller: Option<Arc<FramePoller>>,
}

enum ConnectOutcome {
    Ready,
    Auth,
    Rejected { op: &'static str, reason: String },
    Playback(String),
}

/// State machine driving one camera's live view.
pub struct StreamLifecycleController {
    camera: CameraConfig,
    api: Arc<dyn StreamApi>,
    media: Arc<dyn MediaSink>,
    overlay: Option<Arc<DetectionOverlayRenderer>>,
    policy: SessionPolicy,
    inner: Arc<Mutex<SessionInner>>,
    updates: Arc<watch::Sender<SessionSnapshot>>,
    generation: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl StreamLifecycleController {
    pub fn new(
        camera: CameraConfig,
        api: Arc<dyn StreamApi>,
        media: Arc<dyn MediaSink>,
        overlay: Option<Arc<DetectionOverlayRenderer>>,
        policy: SessionPolicy,
    ) -> Self {
        let initial = SessionSnapshot {
            camera_id: camera.id.clone(),
            status: SessionStatus::Idle,
            retry_count: 0,
            last_error: None,
            stats: None,
            recent_detections: Vec::new(),
        };
        let (updates, _) = watch::channel(initial);
        let inner = SessionInner {
            status: SessionStatus::Idle,
            retry: RetryState::default(),
            last_error: None,
            stats: None,
            detections: RecentDetections::new(RECENT_DETECTIONS_CAPACITY),
            offline_polls: 0,
            stats_cancel: None,
            start_in_flight: false,
            poller: None,
        };
        Self {
            camera,
            api,
            media,
            overlay,
            policy,
            inner: Arc::new(Mutex::new(inner)),
            updates: Arc::new(updates),
            generation: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        snapshot_of(&self.camera, &inner)
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Begins playback. No-op while a start is in flight or the session is
    /// already active; concurrent callers coalesce into the one attempt.
    pub async fn start(&self) {
        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.start_in_flight || inner.status.is_active() {
                debug!(camera_id = %self.camera.id, "start coalesced into in-flight attempt");
                return;
            }
            inner.start_in_flight = true;
            inner.status = SessionStatus::Connecting;
            inner.retry.reset();
            inner.last_error = None;
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.publish().await;

        self.drive_connect(generation).await;

        self.inner.lock().await.start_in_flight = false;
    }

    /// Explicit stop. Idempotent: from `Stopped` or `Idle` this makes no
    /// backend call and changes nothing. Local cleanup always succeeds;
    /// backend refusal is logged, never surfaced.
    pub async fn stop(&self) {
        {
            let mut inner = self.inner.lock().await;
            if matches!(inner.status, SessionStatus::Stopped | SessionStatus::Idle) {
                debug!(camera_id = %self.camera.id, "stop on inactive session ignored");
                return;
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(cancel) = inner.stats_cancel.take() {
                cancel.cancel();
            }
            inner.status = SessionStatus::Stopped;
            inner.stats = None;
            inner.detections.clear();
            inner.offline_polls = 0;
        }
        self.stop_polling().await;
        self.media.detach().await;
        if let Some(overlay) = &self.overlay {
            overlay.clear_now().await;
        }
        self.publish().await;

        if let Err(e) = self.api.stop_stream(&self.camera.id).await {
            warn!(camera_id = %self.camera.id, error = %e, "backend stop failed, local teardown already done");
        }
        info!(camera_id = %self.camera.id, "stream stopped");
    }

    /// View unmount: cancels every pending timer, poller, and overlay
    /// clear, and releases the media source.
    pub async fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        self.stop_polling().await;
        {
            let mut inner = self.inner.lock().await;
            if let Some(cancel) = inner.stats_cancel.take() {
                cancel.cancel();
            }
        }
        self.media.detach().await;
        if let Some(overlay) = &self.overlay {
            overlay.shutdown();
        }
        debug!(camera_id = %self.camera.id, "session closed");
    }

    /// Starts the snapshot polling fallback for this camera.
    pub async fn start_polling(&self, fps: f32) {
        let poller = {
            let mut inner = self.inner.lock().await;
            match &inner.poller {
                Some(existing) => existing.clone(),
                None => {
                    let (poller, events) = FramePoller::new(
                        self.api.clone(),
                        self.camera.id.clone(),
                        self.policy.poll_failure_threshold,
                    );
                    let poller = Arc::new(poller);
                    inner.poller = Some(poller.clone());
                    self.spawn_poller_pump(events);
                    poller
                }
            }
        };
        poller.start(fps).await;
    }

    pub async fn stop_polling(&self) {
        let poller = self.inner.lock().await.poller.clone();
        if let Some(poller) = poller {
            poller.stop().await;
        }
    }

    /// Latest-frame slot of the polling fallback, when polling has been
    /// started for this camera.
    pub async fn frames(&self) -> Option<watch::Receiver<Option<Frame>>> {
        self.inner.lock().await.poller.as_ref().map(|p| p.frames())
    }

    /// Applies one push-channel event, in receipt order. Events tagged for
    /// other cameras never reach this session; the channel supervisor
    /// routes by camera id.
    pub async fn apply_event(&self, event: CameraEvent) {
        match event {
            CameraEvent::Stats(update) => {
                let mut inner = self.inner.lock().await;
                if inner.status != SessionStatus::Playing {
                    // Late stats for a session that is no longer playing;
                    // camera_status is authoritative.
                    return;
                }
                let mut stats = update.stats;
                if stats.quality_score.is_none() {
                    stats.quality_score = Some(quality::score_stats(&stats));
                }
                inner.stats = Some(stats);
                publish_locked(&self.camera, &inner, &self.updates);
            }
            CameraEvent::Detection(detection) => {
                {
                    let mut inner = self.inner.lock().await;
                    if !inner.status.is_active() {
                        return;
                    }
                    inner.detections.push(detection.clone());
                    publish_locked(&self.camera, &inner, &self.updates);
                }
                if let Some(overlay) = &self.overlay {
                    overlay.render(&detection).await;
                }
            }
            CameraEvent::Status(update) => {
                let mut inner = self.inner.lock().await;
                let live = matches!(update.status, CameraPhase::Online | CameraPhase::Streaming);
                if let CameraPhase::Error = update.status {
                    warn!(
                        camera_id = %self.camera.id,
                        message = ?update.message,
                        "camera reported an error"
                    );
                }
                if let Some(current) = inner.stats.as_ref() {
                    if current.is_streaming != live {
                        let mut stats = current.clone();
                        stats.is_streaming = live;
                        inner.stats = Some(stats);
                        publish_locked(&self.camera, &inner, &self.updates);
                    }
                }
            }
            CameraEvent::Fault(message) => {
                // Channel-level fault; degraded freshness, not a camera error.
                warn!(camera_id = %self.camera.id, %message, "push channel fault");
            }
        }
    }

    pub async fn enable_detection(&self) -> Result<(), SessionError> {
        self.api
            .start_detection(&self.camera.id)
            .await
            .map_err(|e| classify_command_error("start-detection", e))
    }

    pub async fn disable_detection(&self) -> Result<(), SessionError> {
        self.api
            .stop_detection(&self.camera.id)
            .await
            .map_err(|e| classify_command_error("stop-detection", e))
    }

    /// One-shot frame capture, e.g. for a download button.
    pub async fn capture_snapshot(&self) -> Result<Vec<u8>, SessionError> {
        self.api
            .fetch_snapshot(&self.camera.id)
            .await
            .map_err(|e| classify_command_error("snapshot", e))
    }

    async fn drive_connect(&self, generation: u64) {
        loop {
            if self.stale(generation) {
                return;
            }

            match self.connect_once().await {
                ConnectOutcome::Ready => {
                    if self.stale(generation) {
                        // Stopped while attaching; do not resurrect.
                        self.media.detach().await;
                        return;
                    }
                    let stats_cancel = self.cancel.child_token();
                    {
                        let mut inner = self.inner.lock().await;
                        inner.status = SessionStatus::Playing;
                        inner.retry.record_success();
                        inner.last_error = None;
                        inner.offline_polls = 0;
                        if let Some(old) = inner.stats_cancel.replace(stats_cancel.clone()) {
                            old.cancel();
                        }
                    }
                    info!(camera_id = %self.camera.id, "stream playing");
                    self.publish().await;
                    self.spawn_stats_refresh(generation, stats_cancel);
                    return;
                }
                ConnectOutcome::Auth => {
                    self.fail_terminal(SessionError::AuthRequired).await;
                    return;
                }
                ConnectOutcome::Rejected { op, reason } => {
                    // Backend said no; terminal without touching the
                    // playback retry budget.
                    self.fail_terminal(SessionError::Rejected { op, reason }).await;
                    return;
                }
                ConnectOutcome::Playback(reason) => {
                    let failures = self.inner.lock().await.retry.attempt;
                    match self.policy.playback.delay_before(failures) {
                        Some(delay) => {
                            {
                                let mut inner = self.inner.lock().await;
                                inner.status = SessionStatus::Retrying;
                                inner.retry.attempt += 1;
                            }
                            PLAYBACK_RETRIES_TOTAL.inc();
                            warn!(
                                camera_id = %self.camera.id,
                                attempt = failures + 1,
                                error = %reason,
                                "playback failed, retrying"
                            );
                            self.publish().await;

                            tokio::select! {
                                _ = self.cancel.cancelled() => return,
                                _ = time::sleep(delay) => {}
                            }
                            if self.stale(generation) {
                                return;
                            }
                            self.inner.lock().await.status = SessionStatus::Connecting;
                            self.publish().await;
                        }
                        None => {
                            self.fail_terminal(SessionError::PlaybackFailed {
                                attempts: failures,
                                reason,
                            })
                            .await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn connect_once(&self) -> ConnectOutcome {
        match self.api.start_stream(&self.camera.id).await {
            Ok(()) => {}
            Err(ApiError::Unauthorized) => return ConnectOutcome::Auth,
            Err(e) if e.is_transient() => return ConnectOutcome::Playback(e.to_string()),
            Err(e) => {
                return ConnectOutcome::Rejected {
                    op: "start",
                    reason: e.to_string(),
                }
            }
        }

        let source = MediaSource {
            camera_id: self.camera.id.clone(),
            url: self.api.video_url(&self.camera.id),
        };
        match self.media.attach(&source).await {
            Ok(()) => ConnectOutcome::Ready,
            Err(MediaError::Unauthorized) => ConnectOutcome::Auth,
            Err(e) => ConnectOutcome::Playback(e.to_string()),
        }
    }

    async fn fail_terminal(&self, error: SessionError) {
        {
            let mut inner = self.inner.lock().await;
            if let Some(cancel) = inner.stats_cancel.take() {
                cancel.cancel();
            }
            inner.status = SessionStatus::Error;
            inner.retry.trip();
            inner.last_error = Some(error.clone());
        }
        warn!(camera_id = %self.camera.id, error = %error, "session terminal");
        self.publish().await;
    }

    fn spawn_stats_refresh(&self, generation: u64, cancel: CancellationToken) {
        tokio::spawn(stats_refresh_loop(
            self.api.clone(),
            self.camera.clone(),
            self.policy,
            self.inner.clone(),
            self.updates.clone(),
            self.generation.clone(),
            generation,
            cancel,
        ));
    }

    fn spawn_poller_pump(&self, mut events: mpsc::UnboundedReceiver<PollerEvent>) {
        let camera = self.camera.clone();
        let inner = self.inner.clone();
        let updates = self.updates.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => return,
                    },
                };

                let mut guard = inner.lock().await;
                if guard.status == SessionStatus::Stopped {
                    continue;
                }
                match event {
                    PollerEvent::Recovered => {
                        guard.last_error = None;
                    }
                    PollerEvent::CircuitOpen => {
                        if let Some(stats_cancel) = guard.stats_cancel.take() {
                            stats_cancel.cancel();
                        }
                        guard.status = SessionStatus::Error;
                        guard.retry.trip();
                        guard.last_error = Some(SessionError::ConnectionLost);
                        warn!(camera_id = %camera.id, "poll circuit open, session in error");
                    }
                    PollerEvent::AuthExpired => {
                        if let Some(stats_cancel) = guard.stats_cancel.take() {
                            stats_cancel.cancel();
                        }
                        guard.status = SessionStatus::Error;
                        guard.retry.trip();
                        guard.last_error = Some(SessionError::AuthRequired);
                        warn!(camera_id = %camera.id, "poll unauthorized, session in error");
                    }
                }
                publish_locked(&camera, &guard, &updates);
            }
        });
    }

    async fn publish(&self) {
        let inner = self.inner.lock().await;
        publish_locked(&self.camera, &inner, &self.updates);
    }

    fn stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }
}

fn classify_command_error(op: &'static str, error: ApiError) -> SessionError {
    match error {
        ApiError::Unauthorized => SessionError::AuthRequired,
        other => SessionError::Rejected {
            op,
            reason: other.to_string(),
        },
    }
}

fn snapshot_of(camera: &CameraConfig, inner: &SessionInner) -> SessionSnapshot {
    SessionSnapshot {
        camera_id: camera.id.clone(),
        status: inner.status,
        retry_count: inner.retry.attempt,
        last_error: inner.last_error.clone(),
        stats: inner.stats.clone(),
        recent_detections: inner.detections.snapshot(),
    }
}

fn publish_locked(
    camera: &CameraConfig,
    inner: &SessionInner,
    updates: &watch::Sender<SessionSnapshot>,
) {
    updates.send_replace(snapshot_of(camera, inner));
}

#[allow(clippy::too_many_arguments)]
async fn stats_refresh_loop(
    api: Arc<dyn StreamApi>,
    camera: CameraConfig,
    policy: SessionPolicy,
    inner: Arc<Mutex<SessionInner>>,
    updates: Arc<watch::Sender<SessionSnapshot>>,
    session_generation: Arc<AtomicU64>,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(policy.stats_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if session_generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let status = api.stream_status(&camera.id).await;

        let mut guard = inner.lock().await;
        if guard.status != SessionStatus::Playing {
            return;
        }
        match status {
            Ok(response) => {
                if response.is_streaming {
                    guard.offline_polls = 0;
                } else {
                    guard.offline_polls += 1;
                }
                let live = response.is_streaming
                    || guard.offline_polls < policy.offline_poll_threshold;
                let mut stats = stats_from_status(&camera, &response, live);
                if stats.quality_score.is_none() {
                    stats.quality_score = Some(quality::score_stats(&stats));
                }
                guard.stats = Some(stats);
            }
            Err(e) => {
                debug!(camera_id = %camera.id, error = %e, "status poll failed");
                if guard.stats.is_none() {
                    // Never leave the stats panel blank while nominally
                    // playing; synthesize from camera configuration.
                    let mut stats =
                        StreamStats::baseline(camera.stream_fps, camera.resolution.clone());
                    stats.quality_score = Some(quality::score_stats(&stats));
                    guard.stats = Some(stats);
                }
            }
        }
        publish_locked(&camera, &guard, &updates);
    }
}

fn stats_from_status(
    camera: &CameraConfig,
    response: &StreamStatusResponse,
    live: bool,
) -> StreamStats {
    StreamStats {
        bitrate_kbps: 0,
        fps: if response.frame_rate > 0.0 {
            response.frame_rate
        } else {
            camera.stream_fps
        },
        resolution: response
            .resolution
            .clone()
            .unwrap_or_else(|| camera.resolution.clone()),
        viewers_count: response.viewers_count,
        uptime_seconds: response.uptime,
        packets_lost: 0.0,
        buffer_health_percent: 100.0,
        latency_ms: 0,
        quality_score: None,
        is_streaming: live,
        is_recording: response.is_recording,
        bandwidth_kbps: None,
        frame_count: None,
    }
}
