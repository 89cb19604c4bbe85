use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("sessions_active", "Number of open camera sessions").unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub static PLAYBACK_RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("playback_retries_total", "Total automatic playback restarts").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static POLL_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("snapshot_poll_failures_total", "Total failed snapshot polls").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static POLL_CIRCUIT_OPEN_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "snapshot_poll_circuit_open_total",
        "Times the snapshot poll circuit breaker opened",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static CHANNEL_RECONNECTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "push_channel_reconnects_total",
        "Total push-channel reconnect attempts",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static DETECTIONS_RENDERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "detections_rendered_total",
        "Total detection overlays drawn",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn render() -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    let mfs = REGISTRY.gather();
    encoder.encode(&mfs, &mut buf).ok();
    String::from_utf8(buf).unwrap_or_default()
}
