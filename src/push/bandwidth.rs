//! Bandwidth Monitor — spec §4.9.6.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthAlert {
    Sufficient,
    Insufficient,
    Critical,
    Recovered,
}

struct Sample {
    at: Instant,
    bytes: u64,
    duration: f64,
}

/// Sliding-window throughput estimator with a state machine over
/// `{Sufficient, Insufficient, Critical, Recovered}`. The monitor never
/// errors — callers observe alerts via [`BandwidthMonitor::poll_alert`].
pub struct BandwidthMonitor {
    window: Duration,
    required_bps: f64,
    alert_threshold: f64,
    critical_threshold: f64,
    minimum_samples: usize,
    samples: VecDeque<Sample>,
    state: Option<BandwidthAlert>,
}

impl BandwidthMonitor {
    pub fn new(
        window_duration: Duration,
        required_bps: f64,
        alert_threshold: f64,
        critical_threshold: f64,
        minimum_samples: usize,
    ) -> Self {
        Self {
            window: window_duration,
            required_bps,
            alert_threshold,
            critical_threshold,
            minimum_samples,
            samples: VecDeque::new(),
            state: None,
        }
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.saturating_duration_since(front.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record_push(&mut self, bytes: u64, duration: Duration) {
        let now = Instant::now();
        self.samples.push_back(Sample {
            at: now,
            bytes,
            duration: duration.as_secs_f64(),
        });
        self.evict_stale(now);
    }

    fn estimated_bandwidth_bps(&self) -> f64 {
        let total_bytes: u64 = self.samples.iter().map(|s| s.bytes).sum();
        let total_secs: f64 = self.samples.iter().map(|s| s.duration).sum();
        if total_secs <= 0.0 {
            return 0.0;
        }
        (total_bytes as f64 * 8.0) / total_secs
    }

    /// Recompute the alert state and return it only if it changed since
    /// the previous call (a transition). `None` means no new alert to
    /// surface — either insufficient samples, or the state is unchanged.
    pub fn poll_alert(&mut self) -> Option<BandwidthAlert> {
        if self.samples.len() < self.minimum_samples {
            return None;
        }
        let ratio = self.estimated_bandwidth_bps() / self.required_bps;
        let new_state = if ratio >= self.alert_threshold {
            BandwidthAlert::Sufficient
        } else if ratio >= self.critical_threshold {
            BandwidthAlert::Insufficient
        } else {
            BandwidthAlert::Critical
        };

        let emitted = match self.state {
            None => Some(new_state),
            Some(prev) if prev == new_state => None,
            Some(prev) => {
                let recovering = matches!(prev, BandwidthAlert::Insufficient | BandwidthAlert::Critical)
                    && new_state == BandwidthAlert::Sufficient;
                Some(if recovering { BandwidthAlert::Recovered } else { new_state })
            }
        };
        self.state = Some(new_state);
        emitted
    }

    pub fn estimated_bandwidth(&self) -> f64 {
        self.estimated_bandwidth_bps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_minimum_samples_reports_nothing() {
        let mut mon = BandwidthMonitor::new(Duration::from_secs(10), 1_000_000.0, 0.9, 0.5, 3);
        mon.record_push(100_000, Duration::from_secs_f64(0.5));
        assert_eq!(mon.poll_alert(), None);
    }

    #[test]
    fn alert_fires_only_on_state_transitions() {
        let mut mon = BandwidthMonitor::new(Duration::from_secs(10), 1_000_000.0, 0.9, 0.5, 1);
        // well below required -> Critical
        mon.record_push(1_000, Duration::from_secs_f64(1.0));
        assert_eq!(mon.poll_alert(), Some(BandwidthAlert::Critical));
        // second poll with same samples: no transition
        assert_eq!(mon.poll_alert(), None);
    }

    #[test]
    fn recovered_fires_once_on_transition_back_to_sufficient() {
        let mut mon = BandwidthMonitor::new(Duration::from_secs(10), 1_000.0, 0.9, 0.5, 1);
        mon.record_push(10, Duration::from_secs_f64(1.0)); // 80bps, ratio 0.08 -> Critical
        assert_eq!(mon.poll_alert(), Some(BandwidthAlert::Critical));
        mon.record_push(10_000, Duration::from_secs_f64(1.0)); // now plenty of bandwidth
        assert_eq!(mon.poll_alert(), Some(BandwidthAlert::Recovered));
        assert_eq!(mon.poll_alert(), None);
    }

    #[test]
    fn zero_duration_sample_contributes_bytes_not_duration() {
        let mut mon = BandwidthMonitor::new(Duration::from_secs(10), 1.0, 0.5, 0.1, 1);
        mon.record_push(1_000, Duration::from_secs_f64(0.0));
        mon.record_push(1_000, Duration::from_secs_f64(1.0));
        // total bytes 2000*8 bits over 1s of duration => 16000 bps
        assert!((mon.estimated_bandwidth() - 16_000.0).abs() < 1.0);
    }
}
