use std::env;
use std::time::Duration;

use anyhow::Result;

use crate::retry::RetryPolicy;

/// Runtime configuration for the console session core.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_base_url: String,
    /// Push-channel endpoint; `None` disables the channel and leaves the
    /// console on polling only.
    pub push_channel_url: Option<String>,
    pub auth_token: Option<String>,
    pub camera_id: String,
    pub camera_name: String,
    pub snapshot_fps: f32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_base_url: env::var("CONSOLE_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080/api".to_string()),
            push_channel_url: env::var("CONSOLE_WS_URL").ok(),
            auth_token: env::var("CONSOLE_AUTH_TOKEN").ok(),
            camera_id: env::var("CAMERA_ID").unwrap_or_else(|_| "cam-001".to_string()),
            camera_name: env::var("CAMERA_NAME").unwrap_or_else(|_| "Front entrance".to_string()),
            snapshot_fps: env::var("SNAPSHOT_FPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
        })
    }
}

pub(crate) fn env_u32(key: &str, def: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(def)
}

pub(crate) fn env_u64(key: &str, def: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(def)
}

/// Timing and ceiling knobs for session recovery.
#[derive(Clone, Copy, Debug)]
pub struct SessionPolicy {
    /// Automatic playback restarts before a session goes terminal.
    pub playback: RetryPolicy,
    /// Consecutive snapshot failures before the poll circuit opens.
    pub poll_failure_threshold: u32,
    /// Push-channel redials before the channel is latched down.
    pub reconnect: RetryPolicy,
    pub stats_interval: Duration,
    /// Consecutive `is_streaming=false` status polls before the live flag
    /// is dropped.
    pub offline_poll_threshold: u32,
    pub overlay_ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            playback: RetryPolicy::new(
                env_u32("PLAYBACK_MAX_RETRIES", 3),
                Duration::from_millis(env_u64("PLAYBACK_RETRY_DELAY_MS", 2_000)),
            ),
            poll_failure_threshold: env_u32("POLL_FAILURE_THRESHOLD", 3),
            reconnect: RetryPolicy::new(
                env_u32("CHANNEL_MAX_RECONNECTS", 5),
                Duration::from_millis(env_u64("CHANNEL_RECONNECT_MS", 3_000)),
            ),
            stats_interval: Duration::from_millis(env_u64("STATS_REFRESH_MS", 5_000)),
            offline_poll_threshold: env_u32("OFFLINE_POLL_THRESHOLD", 3),
            overlay_ttl: Duration::from_millis(env_u64("OVERLAY_TTL_MS", 5_000)),
        }
    }
}
