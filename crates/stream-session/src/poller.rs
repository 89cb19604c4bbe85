//! Active polling fallback: repeatedly pulls single frames for one camera
//! when no push/stream path is available, with a consecutive-error circuit
//! breaker so a dead camera cannot spin the console forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::StreamApi;
use crate::metrics::{POLL_CIRCUIT_OPEN_TOTAL, POLL_FAILURES_TOTAL};
use crate::retry::RetryState;

/// One fetched snapshot. Published through a `watch` slot so only the
/// latest frame is ever retained; the previous buffer drops on replace.
#[derive(Clone, Debug)]
pub struct Frame {
    pub camera_id: String,
    pub seq: u64,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollerEvent {
    /// Success after one or more failures; any displayed error clears.
    Recovered,
    /// Consecutive-failure threshold reached; polling has stopped.
    CircuitOpen,
    /// 401 from the snapshot endpoint; terminal without waiting for the
    /// threshold.
    AuthExpired,
}

type RunSlot = Mutex<Option<(u64, CancellationToken)>>;

pub struct FramePoller {
    camera_id: String,
    api: Arc<dyn StreamApi>,
    threshold: u32,
    state: Arc<Mutex<RetryState>>,
    frames_tx: Arc<watch::Sender<Option<Frame>>>,
    events_tx: mpsc::UnboundedSender<PollerEvent>,
    run_slot: Arc<RunSlot>,
    run_generation: AtomicU64,
}

impl FramePoller {
    pub fn new(
        api: Arc<dyn StreamApi>,
        camera_id: impl Into<String>,
        threshold: u32,
    ) -> (Self, mpsc::UnboundedReceiver<PollerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, _) = watch::channel(None);
        (
            Self {
                camera_id: camera_id.into(),
                api,
                threshold,
                state: Arc::new(Mutex::new(RetryState::default())),
                frames_tx: Arc::new(frames_tx),
                events_tx,
                run_slot: Arc::new(Mutex::new(None)),
                run_generation: AtomicU64::new(0),
            },
            events_rx,
        )
    }

    /// Poll period for a requested rate.
    pub fn interval_for(fps: f32) -> Duration {
        if fps <= 0.0 {
            return Duration::from_millis(1_000);
        }
        Duration::from_millis(((1_000.0 / fps).floor() as u64).max(1))
    }

    /// Begins polling at `fps`. One immediate fetch, then the interval.
    /// Rate changes require `stop` + `start`. Refused while the circuit is
    /// open; use [`FramePoller::restart`] for a manual reset.
    pub async fn start(&self, fps: f32) {
        let mut slot = self.run_slot.lock().await;
        if slot.is_some() {
            warn!(camera_id = %self.camera_id, "poller already running, rate change needs stop+start");
            return;
        }
        if self.state.lock().await.circuit_open {
            warn!(camera_id = %self.camera_id, "poll circuit open, explicit restart required");
            return;
        }

        let generation = self.run_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        *slot = Some((generation, cancel.clone()));
        drop(slot);

        debug!(camera_id = %self.camera_id, fps, "starting snapshot polling");
        tokio::spawn(poll_loop(
            self.api.clone(),
            self.camera_id.clone(),
            Self::interval_for(fps),
            self.threshold,
            self.state.clone(),
            self.frames_tx.clone(),
            self.events_tx.clone(),
            self.run_slot.clone(),
            generation,
            cancel,
        ));
    }

    /// Cancels the interval and any in-flight request. Idempotent.
    pub async fn stop(&self) {
        if let Some((_, cancel)) = self.run_slot.lock().await.take() {
            cancel.cancel();
            debug!(camera_id = %self.camera_id, "snapshot polling stopped");
        }
    }

    /// Manual restart: the only path that closes an open circuit.
    pub async fn restart(&self, fps: f32) {
        self.stop().await;
        self.state.lock().await.reset();
        self.start(fps).await;
    }

    /// Latest-frame slot; replaced wholesale on every successful poll.
    pub fn frames(&self) -> watch::Receiver<Option<Frame>> {
        self.frames_tx.subscribe()
    }

    pub async fn circuit_open(&self) -> bool {
        self.state.lock().await.circuit_open
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_loop(
    api: Arc<dyn StreamApi>,
    camera_id: String,
    period: Duration,
    threshold: u32,
    state: Arc<Mutex<RetryState>>,
    frames: Arc<watch::Sender<Option<Frame>>>,
    events: mpsc::UnboundedSender<PollerEvent>,
    run_slot: Arc<RunSlot>,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(period);
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = api.fetch_snapshot(&camera_id) => fetched,
        };

        match fetched {
            Ok(data) => {
                seq += 1;
                let recovered = {
                    let mut retry = state.lock().await;
                    let had_failures = retry.consecutive_failures > 0;
                    retry.record_success();
                    had_failures
                };
                frames.send_replace(Some(Frame {
                    camera_id: camera_id.clone(),
                    seq,
                    data,
                }));
                if recovered {
                    let _ = events.send(PollerEvent::Recovered);
                }
            }
            Err(e) if e.is_auth() => {
                warn!(camera_id = %camera_id, "snapshot poll unauthorized, stopping");
                state.lock().await.trip();
                let _ = events.send(PollerEvent::AuthExpired);
                break;
            }
            Err(e) => {
                POLL_FAILURES_TOTAL.inc();
                // Transient; per-tick failures stay quiet, only the
                // circuit-open transition is user-visible.
                debug!(camera_id = %camera_id, error = %e, "snapshot poll failed");
                let tripped = state.lock().await.record_failure(threshold);
                if tripped {
                    POLL_CIRCUIT_OPEN_TOTAL.inc();
                    warn!(camera_id = %camera_id, "snapshot polling circuit opened");
                    let _ = events.send(PollerEvent::CircuitOpen);
                    break;
                }
            }
        }
    }

    // Clear our registration unless a newer run already took the slot.
    let mut slot = run_slot.lock().await;
    if slot.as_ref().map(|(g, _)| *g) == Some(generation) {
        slot.take();
    }
}
