// Push-channel supervision: bounded reconnects, routing isolation, and
// degraded (not failed) sessions when the channel is gone for good.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time;

use common::{CameraConfig, SessionStatus, StreamStatusResponse};
use stream_session::{
    ApiError, CameraEvent, ChannelError, ChannelHealth, EventChannelSupervisor, MediaError,
    MediaSink, MediaSource, PushTransport, RetryPolicy, SessionPolicy, SessionRegistry, StreamApi,
};

enum Dial {
    Fail,
    Open,
}

#[derive(Default)]
struct ScriptedTransport {
    dials: AtomicUsize,
    script: Mutex<VecDeque<Dial>>,
    live: Mutex<Vec<mpsc::Sender<String>>>,
}

impl ScriptedTransport {
    async fn push_dials(&self, dials: impl IntoIterator<Item = Dial>) {
        self.script.lock().await.extend(dials);
    }

    async fn send(&self, frame: impl Into<String>) {
        let senders = self.live.lock().await;
        let sender = senders.last().expect("an open connection");
        sender.send(frame.into()).await.expect("frame delivered");
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn open(&self, _url: &str) -> Result<mpsc::Receiver<String>, ChannelError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().await.pop_front().unwrap_or(Dial::Fail) {
            Dial::Fail => Err(ChannelError::Connect("connection refused".into())),
            Dial::Open => {
                let (tx, rx) = mpsc::channel(16);
                self.live.lock().await.push(tx);
                Ok(rx)
            }
        }
    }
}

fn reconnect_policy() -> RetryPolicy {
    RetryPolicy::new(5, Duration::from_millis(3_000))
}

async fn wait_for_health(
    health: &mut tokio::sync::watch::Receiver<ChannelHealth>,
    wanted: ChannelHealth,
) {
    loop {
        if *health.borrow_and_update() == wanted {
            return;
        }
        health.changed().await.expect("supervisor alive");
    }
}

fn stats_frame(camera_id: &str) -> String {
    serde_json::json!({
        "type": "stream_stats",
        "data": {
            "camera_id": camera_id,
            "bitrate_kbps": 1800,
            "fps": 25.0,
            "resolution": "1280x720",
            "viewers_count": 1,
            "uptime_seconds": 30,
            "packets_lost": 0.2,
            "buffer_health_percent": 95.0,
            "latency_ms": 40,
            "is_streaming": true,
            "is_recording": false
        },
        "timestamp": "2026-05-11T10:00:00Z"
    })
    .to_string()
}

fn detection_frame(camera_id: &str, person: &str) -> String {
    serde_json::json!({
        "type": "detection_alert",
        "data": {
            "id": uuid::Uuid::new_v4().to_string(),
            "camera_id": camera_id,
            "timestamp": "2026-05-11T10:00:01Z",
            "person_name": person,
            "confidence": 0.93,
            "bounding_box": {"x": 10.0, "y": 10.0, "width": 50.0, "height": 70.0},
            "detection_type": "known_person"
        },
        "timestamp": "2026-05-11T10:00:01Z"
    })
    .to_string()
}

#[tokio::test(start_paused = true)]
async fn reconnect_budget_spent_latches_channel_down() {
    let transport = Arc::new(ScriptedTransport::default());
    let supervisor = EventChannelSupervisor::new(transport.clone(), reconnect_policy());
    let mut subscriber = supervisor.subscribe("cam-1").await;
    let mut health = supervisor.health();

    let started = time::Instant::now();
    supervisor.connect(Some("ws://backend/events"));
    wait_for_health(&mut health, ChannelHealth::Down).await;
    let elapsed = started.elapsed();

    // Initial dial plus five redials at 3000ms spacing.
    assert_eq!(transport.dials.load(Ordering::SeqCst), 6);
    assert!(
        elapsed >= Duration::from_millis(15_000) && elapsed < Duration::from_millis(15_500),
        "unexpected reconnect spacing: {elapsed:?}"
    );

    // Subscribers are degraded, not disconnected or errored.
    assert!(matches!(
        subscriber.try_recv(),
        Err(mpsc::error::TryRecvError::Empty)
    ));

    // Latched: no further dials even as time passes.
    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.dials.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn successful_dial_resets_the_reconnect_counter() {
    let transport = Arc::new(ScriptedTransport::default());
    transport
        .push_dials([Dial::Fail, Dial::Fail, Dial::Open])
        .await;
    let supervisor = EventChannelSupervisor::new(transport.clone(), reconnect_policy());
    let mut health = supervisor.health();

    supervisor.connect(Some("ws://backend/events"));
    wait_for_health(&mut health, ChannelHealth::Connected).await;

    assert_eq!(transport.dials.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn connect_is_idempotent() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push_dials([Dial::Open]).await;
    let supervisor = EventChannelSupervisor::new(transport.clone(), reconnect_policy());
    let mut health = supervisor.health();

    supervisor.connect(Some("ws://backend/events"));
    supervisor.connect(Some("ws://backend/events"));
    wait_for_health(&mut health, ChannelHealth::Connected).await;
    time::sleep(Duration::from_millis(100)).await;

    assert_eq!(transport.dials.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn events_route_only_to_their_camera() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push_dials([Dial::Open]).await;
    let supervisor = EventChannelSupervisor::new(transport.clone(), reconnect_policy());
    let mut rx_a = supervisor.subscribe("cam-a").await;
    let mut rx_b = supervisor.subscribe("cam-b").await;
    let mut health = supervisor.health();

    supervisor.connect(Some("ws://backend/events"));
    wait_for_health(&mut health, ChannelHealth::Connected).await;

    transport.send(stats_frame("cam-a")).await;

    let event = time::timeout(Duration::from_secs(5), rx_a.recv())
        .await
        .expect("event within timeout")
        .expect("channel open");
    match event {
        CameraEvent::Stats(update) => assert_eq!(update.camera_id, "cam-a"),
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(matches!(
        rx_b.try_recv(),
        Err(mpsc::error::TryRecvError::Empty)
    ));
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped_not_fatal() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push_dials([Dial::Open]).await;
    let supervisor = EventChannelSupervisor::new(transport.clone(), reconnect_policy());
    let mut rx = supervisor.subscribe("cam-a").await;
    let mut health = supervisor.health();

    supervisor.connect(Some("ws://backend/events"));
    wait_for_health(&mut health, ChannelHealth::Connected).await;

    transport.send("{ this is not json").await;
    transport
        .send(r#"{"type": "telepathy", "data": {}, "timestamp": "2026-05-11T10:00:00Z"}"#)
        .await;
    transport.send(detection_frame("cam-a", "Grace")).await;

    let event = time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within timeout")
        .expect("channel open");
    match event {
        CameraEvent::Detection(detection) => assert_eq!(detection.person_name, "Grace"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        rx.try_recv(),
        Err(mpsc::error::TryRecvError::Empty)
    ));
}

// Registry-level scenario: the channel dying for good degrades freshness
// but never errors out a playing session.

#[derive(Default)]
struct OkApi;

#[async_trait]
impl StreamApi for OkApi {
    async fn start_stream(&self, _camera_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn stop_stream(&self, _camera_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn stream_status(&self, _camera_id: &str) -> Result<StreamStatusResponse, ApiError> {
        Ok(StreamStatusResponse {
            is_streaming: true,
            is_recording: false,
            viewers_count: 1,
            uptime: 10,
            frame_rate: 25.0,
            resolution: Some("1280x720".to_string()),
        })
    }

    async fn fetch_snapshot(&self, _camera_id: &str) -> Result<Vec<u8>, ApiError> {
        Ok(vec![0xFF, 0xD8])
    }

    async fn start_detection(&self, _camera_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn stop_detection(&self, _camera_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    fn video_url(&self, camera_id: &str) -> String {
        format!("http://backend/stream/{camera_id}/video")
    }
}

#[derive(Default)]
struct OkMedia;

#[async_trait]
impl MediaSink for OkMedia {
    async fn attach(&self, _source: &MediaSource) -> Result<(), MediaError> {
        Ok(())
    }

    async fn detach(&self) {}
}

#[tokio::test(start_paused = true)]
async fn channel_down_degrades_without_erroring_sessions() {
    let transport = Arc::new(ScriptedTransport::default());
    let supervisor = Arc::new(EventChannelSupervisor::new(
        transport.clone(),
        reconnect_policy(),
    ));
    let registry = SessionRegistry::new(
        Arc::new(OkApi),
        supervisor.clone(),
        Some("ws://backend/events".to_string()),
        SessionPolicy::default(),
    );
    let mut health = supervisor.health();

    let session = registry
        .open(CameraConfig::new("cam-1", "Lobby"), Arc::new(OkMedia), None)
        .await;
    session.start().await;
    assert_eq!(session.snapshot().await.status, SessionStatus::Playing);

    wait_for_health(&mut health, ChannelHealth::Down).await;

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.status, SessionStatus::Playing);
    assert!(snapshot.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn registry_routes_detections_to_the_right_session_only() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push_dials([Dial::Open]).await;
    let supervisor = Arc::new(EventChannelSupervisor::new(
        transport.clone(),
        reconnect_policy(),
    ));
    let registry = SessionRegistry::new(
        Arc::new(OkApi),
        supervisor.clone(),
        Some("ws://backend/events".to_string()),
        SessionPolicy::default(),
    );
    let mut health = supervisor.health();

    let session_a = registry
        .open(CameraConfig::new("cam-a", "Lobby"), Arc::new(OkMedia), None)
        .await;
    let session_b = registry
        .open(CameraConfig::new("cam-b", "Loading dock"), Arc::new(OkMedia), None)
        .await;
    session_a.start().await;
    session_b.start().await;
    wait_for_health(&mut health, ChannelHealth::Connected).await;

    transport.send(detection_frame("cam-a", "Ada")).await;

    let mut updates_a = session_a.subscribe();
    time::timeout(Duration::from_secs(5), async {
        loop {
            if !session_a.snapshot().await.recent_detections.is_empty() {
                break;
            }
            updates_a.changed().await.expect("session alive");
        }
    })
    .await
    .expect("detection applied");

    assert_eq!(session_a.snapshot().await.recent_detections.len(), 1);
    assert!(session_b.snapshot().await.recent_detections.is_empty());
}

#[tokio::test(start_paused = true)]
async fn opening_the_same_camera_twice_reuses_the_session() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push_dials([Dial::Open]).await;
    let supervisor = Arc::new(EventChannelSupervisor::new(
        transport.clone(),
        reconnect_policy(),
    ));
    let registry = SessionRegistry::new(
        Arc::new(OkApi),
        supervisor,
        Some("ws://backend/events".to_string()),
        SessionPolicy::default(),
    );

    let first = registry
        .open(CameraConfig::new("cam-1", "Lobby"), Arc::new(OkMedia), None)
        .await;
    let second = registry
        .open(CameraConfig::new("cam-1", "Lobby"), Arc::new(OkMedia), None)
        .await;

    assert!(Arc::ptr_eq(&first, &second));

    registry.close("cam-1").await;
    assert!(registry.get("cam-1").await.is_none());
}
