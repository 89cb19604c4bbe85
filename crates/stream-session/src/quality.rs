//! Derived stream-health scoring, used when the backend does not supply a
//! precomputed quality score.

use common::StreamStats;

/// Inputs for the derived health score.
#[derive(Clone, Copy, Debug)]
pub struct QualitySample {
    pub latency_ms: u32,
    pub packet_loss_percent: f32,
    pub buffer_health_percent: f32,
    pub fps: f32,
}

/// Weighted-penalty score in `0..=100`. Deterministic, no side effects.
pub fn score(sample: &QualitySample) -> u8 {
    let mut score: i32 = 100;

    score -= if sample.latency_ms > 100 {
        20
    } else if sample.latency_ms > 50 {
        10
    } else {
        0
    };

    score -= if sample.packet_loss_percent > 5.0 {
        30
    } else if sample.packet_loss_percent > 1.0 {
        15
    } else {
        0
    };

    score -= if sample.buffer_health_percent < 50.0 {
        25
    } else if sample.buffer_health_percent < 75.0 {
        10
    } else {
        0
    };

    score -= if sample.fps < 15.0 {
        20
    } else if sample.fps < 25.0 {
        10
    } else {
        0
    };

    score.clamp(0, 100) as u8
}

pub fn score_stats(stats: &StreamStats) -> u8 {
    score(&QualitySample {
        latency_ms: stats.latency_ms,
        packet_loss_percent: stats.packets_lost,
        buffer_health_percent: stats.buffer_health_percent,
        fps: stats.fps,
    })
}
