//! Push Engine — spec §4.9.
//!
//! `Pusher` is the capability set every destination transport implements;
//! concrete pushers are actors in the sense of §5 — callers serialize
//! access to a single instance, typically by owning it behind a task.

pub mod bandwidth;
pub mod http;
pub mod multi;
pub mod rtmp;
pub mod srt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Running counters for one pusher instance (spec §4.9.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PushStats {
    pub total_bytes_pushed: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub average_latency: f64,
    pub last_latency: f64,
    pub estimated_bandwidth: f64,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub retry_count: u64,
    pub circuit_breaker_open: bool,
}

impl Default for PushStats {
    fn default() -> Self {
        Self {
            total_bytes_pushed: 0,
            success_count: 0,
            failure_count: 0,
            average_latency: 0.0,
            last_latency: 0.0,
            estimated_bandwidth: 0.0,
            last_success_time: None,
            last_failure_time: None,
            retry_count: 0,
            circuit_breaker_open: false,
        }
    }
}

impl PushStats {
    pub fn record_success(&mut self, bytes: u64, latency: f64) {
        self.total_bytes_pushed += bytes;
        let n = self.success_count as f64;
        self.average_latency = (self.average_latency * n + latency) / (n + 1.0);
        self.success_count += 1;
        self.last_latency = latency;
        self.estimated_bandwidth = if latency > 0.0 { bytes as f64 / latency } else { 0.0 };
        self.last_success_time = Some(Utc::now());
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(Utc::now());
    }
}

/// One destination the packager can push completed media to.
#[async_trait]
pub trait Pusher: Send + Sync {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    /// `duration_secs` is the segment's presentation duration; pushers
    /// that need monotonic media timestamps (e.g. RTMP) derive them from
    /// it instead of wall-clock time.
    async fn push_segment(&mut self, data: &[u8], duration_secs: f64, filename: &str) -> Result<()>;
    async fn push_partial(&mut self, data: &[u8], duration_secs: f64, filename: &str) -> Result<()>;
    async fn push_playlist(&mut self, text: &str, filename: &str) -> Result<()>;
    async fn push_init_segment(&mut self, data: &[u8], filename: &str) -> Result<()>;
    fn connection_state(&self) -> ConnectionState;
    fn stats(&self) -> PushStats;
}

/// Join a base URL/path and a filename, collapsing a trailing slash on the
/// base before appending exactly one `/`.
pub fn join_url(base: &str, filename: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_collapses_trailing_slash() {
        assert_eq!(join_url("http://h/live/", "seg0.mp4"), "http://h/live/seg0.mp4");
        assert_eq!(join_url("http://h/live", "seg0.mp4"), "http://h/live/seg0.mp4");
    }

    #[test]
    fn stats_average_latency_is_running_mean() {
        let mut stats = PushStats::default();
        stats.record_success(100, 0.1);
        stats.record_success(100, 0.3);
        assert!((stats.average_latency - 0.2).abs() < 1e-9);
        assert_eq!(stats.success_count, 2);
    }
}
