//! Push-channel ownership and fan-out.
//!
//! One duplex channel per authenticated user; inbound messages are routed
//! to interested camera sessions by the `camera_id` carried in the payload.
//! Channel failures are never fatal to a session: after the reconnect
//! budget is spent the channel latches down and sessions fall back to
//! polling freshness.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::{CameraStatusUpdate, DetectionEvent, PushEnvelope, PushPayload, StatsUpdate};

use crate::error::ChannelError;
use crate::metrics::CHANNEL_RECONNECTS_TOTAL;
use crate::retry::RetryPolicy;

/// Connectivity as seen by subscribed sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelHealth {
    Disconnected,
    Connected,
    Reconnecting,
    /// Reconnect budget spent; the channel stays down for the rest of the
    /// authenticated session and subscribers live with polling freshness.
    Down,
}

/// Typed event delivered to one camera's session queue.
#[derive(Clone, Debug)]
pub enum CameraEvent {
    Stats(StatsUpdate),
    Detection(DetectionEvent),
    Status(CameraStatusUpdate),
    Fault(String),
}

/// Raw frame source behind the supervisor, so reconnect logic runs the
/// same against real sockets and test doubles.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Dials the channel and returns the stream of raw text frames; the
    /// receiver ending means the connection closed.
    async fn open(&self, url: &str) -> Result<mpsc::Receiver<String>, ChannelError>;
}

/// Production transport over a websocket.
pub struct WsTransport;

#[async_trait]
impl PushTransport for WsTransport {
    async fn open(&self, url: &str) -> Result<mpsc::Receiver<String>, ChannelError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        let (tx, rx) = mpsc::channel(64);
        let (_write, mut read) = socket.split();
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });
        Ok(rx)
    }
}

type SubscriberMap = HashMap<String, Vec<mpsc::UnboundedSender<CameraEvent>>>;

/// Owns the single push channel and demultiplexes inbound messages.
///
/// Never mutates session state directly; it only enqueues events.
pub struct EventChannelSupervisor {
    transport: Arc<dyn PushTransport>,
    policy: RetryPolicy,
    subscribers: Arc<RwLock<SubscriberMap>>,
    health_tx: Arc<watch::Sender<ChannelHealth>>,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl EventChannelSupervisor {
    pub fn new(transport: Arc<dyn PushTransport>, policy: RetryPolicy) -> Self {
        let (health_tx, _) = watch::channel(ChannelHealth::Disconnected);
        Self {
            transport,
            policy,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            health_tx: Arc::new(health_tx),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Opens the channel. No-op without a URL or when already running.
    pub fn connect(&self, url: Option<&str>) {
        let Some(url) = url else {
            debug!("push channel not configured, console stays on polling");
            return;
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let transport = self.transport.clone();
        let subscribers = self.subscribers.clone();
        let health = self.health_tx.clone();
        let policy = self.policy;
        let cancel = self.cancel.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            run_channel(transport, url, policy, subscribers, health, cancel).await;
        });
    }

    /// Event queue for one camera. Messages tagged for other cameras are
    /// never delivered here. Dropping the receiver unsubscribes.
    pub async fn subscribe(&self, camera_id: &str) -> mpsc::UnboundedReceiver<CameraEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .await
            .entry(camera_id.to_string())
            .or_default()
            .push(tx);
        rx
    }

    pub fn health(&self) -> watch::Receiver<ChannelHealth> {
        self.health_tx.subscribe()
    }

    /// Application-level teardown (logout). Camera views must never call
    /// this on behalf of each other.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn run_channel(
    transport: Arc<dyn PushTransport>,
    url: String,
    policy: RetryPolicy,
    subscribers: Arc<RwLock<SubscriberMap>>,
    health: Arc<watch::Sender<ChannelHealth>>,
    cancel: CancellationToken,
) {
    let mut attempts: u32 = 0;

    loop {
        match transport.open(&url).await {
            Ok(mut frames) => {
                attempts = 0;
                info!(%url, "push channel connected");
                health.send_replace(ChannelHealth::Connected);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            health.send_replace(ChannelHealth::Disconnected);
                            return;
                        }
                        frame = frames.recv() => match frame {
                            Some(raw) => dispatch(&subscribers, &raw).await,
                            None => break,
                        }
                    }
                }
                warn!("push channel closed");
            }
            Err(e) => warn!(error = %e, "push channel connect failed"),
        }

        match policy.delay_before(attempts) {
            Some(delay) => {
                attempts += 1;
                CHANNEL_RECONNECTS_TOTAL.inc();
                health.send_replace(ChannelHealth::Reconnecting);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        health.send_replace(ChannelHealth::Disconnected);
                        return;
                    }
                    _ = time::sleep(delay) => {}
                }
            }
            None => {
                // Budget spent. Subscribers keep their queues and see
                // reduced freshness, not a per-camera error.
                warn!(attempts, "push channel reconnect attempts exhausted");
                health.send_replace(ChannelHealth::Down);
                return;
            }
        }
    }
}

async fn dispatch(subscribers: &RwLock<SubscriberMap>, raw: &str) {
    let envelope: PushEnvelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "dropping malformed push message");
            return;
        }
    };

    let Some(camera_id) = envelope.payload.camera_id().map(str::to_string) else {
        if let PushPayload::Error(fault) = envelope.payload {
            warn!(message = %fault.message, "push channel fault");
        }
        return;
    };

    let event = match envelope.payload {
        PushPayload::StreamStats(update) => CameraEvent::Stats(update),
        PushPayload::DetectionAlert(detection) => CameraEvent::Detection(detection),
        PushPayload::CameraStatus(update) => CameraEvent::Status(update),
        PushPayload::Error(fault) => CameraEvent::Fault(fault.message),
    };

    let mut map = subscribers.write().await;
    if let Some(queues) = map.get_mut(&camera_id) {
        queues.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
