//! HTTP pusher — spec §4.9.2. Retry + circuit breaker around a `reqwest`
//! client, grounded in the teacher's egress retry loops.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;

use crate::error::{PackagerError, Result};
use crate::push::{join_url, ConnectionState, PushStats, Pusher};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub request_timeout: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_interval: Duration,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_interval: Duration::from_secs(30),
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// Delay applied before attempt `k` (`k` = attempts already made; the
    /// first attempt, `k == 0`, waits 0). The `k`-th retry waits
    /// `base_delay × multiplier^(k-1)`, i.e. the first retry (`k == 1`)
    /// waits exactly `base_delay`.
    fn delay_for(&self, k: u32) -> Duration {
        if k == 0 {
            return Duration::ZERO;
        }
        let scaled = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi((k - 1) as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

pub struct HttpPusher {
    base_url: String,
    method: Method,
    headers: Vec<(String, String)>,
    policy: RetryPolicy,
    client: reqwest::Client,
    state: ConnectionState,
    stats: PushStats,
    consecutive_failures: u32,
    breaker_opened_at: Option<Instant>,
}

impl HttpPusher {
    pub fn new(base_url: String, method: Method, headers: Vec<(String, String)>, policy: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .build()
            .expect("reqwest client builder never fails with these options");
        Self {
            base_url,
            method,
            headers,
            policy,
            client,
            state: ConnectionState::Disconnected,
            stats: PushStats::default(),
            consecutive_failures: 0,
            breaker_opened_at: None,
        }
    }

    fn breaker_open(&mut self) -> bool {
        if let Some(opened_at) = self.breaker_opened_at {
            if opened_at.elapsed() >= self.policy.circuit_breaker_reset_interval {
                self.consecutive_failures = 0;
                self.breaker_opened_at = None;
                return false;
            }
            return true;
        }
        false
    }

    async fn send_with_retry(&mut self, body: Vec<u8>, filename: &str) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(PackagerError::NotConnected);
        }
        if self.breaker_open() {
            return Err(PackagerError::CircuitBreakerOpen {
                failures: self.consecutive_failures,
            });
        }

        let url = join_url(&self.base_url, filename);
        let mut last_error = String::new();
        let mut attempts = 0u32;

        loop {
            if attempts > 0 {
                tokio::time::sleep(self.policy.delay_for(attempts)).await;
            }
            attempts += 1;

            let started = Instant::now();
            let mut request = self.client.request(self.method.clone(), &url).body(body.clone());
            for (k, v) in &self.headers {
                request = request.header(k, v);
            }

            let outcome = request.send().await;
            let latency = started.elapsed().as_secs_f64();

            match outcome {
                Ok(resp) if resp.status().is_success() => {
                    self.stats.record_success(body.len() as u64, latency);
                    self.consecutive_failures = 0;
                    self.stats.circuit_breaker_open = false;
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    last_error = format!("http {status}");
                    self.stats.record_failure();
                    self.consecutive_failures += 1;
                    if self.consecutive_failures >= self.policy.circuit_breaker_threshold {
                        self.stats.circuit_breaker_open = true;
                        self.breaker_opened_at = Some(Instant::now());
                    }
                    let retryable = self.policy.retryable_status_codes.contains(&status);
                    if !retryable {
                        return Err(PackagerError::HttpError {
                            status,
                            message: resp.text().await.ok(),
                        });
                    }
                    if attempts > self.policy.max_retries {
                        return Err(PackagerError::RetriesExhausted {
                            attempts,
                            last_error,
                        });
                    }
                    self.stats.retry_count += 1;
                }
                Err(e) => {
                    last_error = PackagerError::from(e).to_string();
                    self.stats.record_failure();
                    self.consecutive_failures += 1;
                    if self.consecutive_failures >= self.policy.circuit_breaker_threshold {
                        self.stats.circuit_breaker_open = true;
                        self.breaker_opened_at = Some(Instant::now());
                    }
                    if attempts > self.policy.max_retries {
                        return Err(PackagerError::RetriesExhausted {
                            attempts,
                            last_error,
                        });
                    }
                    self.stats.retry_count += 1;
                }
            }
        }
    }
}

#[async_trait]
impl Pusher for HttpPusher {
    async fn connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state = ConnectionState::Disconnected;
        self.consecutive_failures = 0;
        self.breaker_opened_at = None;
        self.stats.circuit_breaker_open = false;
        Ok(())
    }

    async fn push_segment(&mut self, data: &[u8], _duration_secs: f64, filename: &str) -> Result<()> {
        self.send_with_retry(data.to_vec(), filename).await
    }

    async fn push_partial(&mut self, data: &[u8], _duration_secs: f64, filename: &str) -> Result<()> {
        self.send_with_retry(data.to_vec(), filename).await
    }

    async fn push_playlist(&mut self, text: &str, filename: &str) -> Result<()> {
        self.send_with_retry(text.as_bytes().to_vec(), filename).await
    }

    async fn push_init_segment(&mut self, data: &[u8], filename: &str) -> Result<()> {
        self.send_with_retry(data.to_vec(), filename).await
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    fn stats(&self) -> PushStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_formula_scales_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(30),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(30)); // capped (40 -> 30)
    }

    #[tokio::test]
    async fn push_before_connect_fails() {
        let mut pusher = HttpPusher::new(
            "http://localhost:1".into(),
            Method::PUT,
            Vec::new(),
            RetryPolicy::default(),
        );
        let err = pusher.push_segment(b"data", 2.0, "seg0.mp4").await.unwrap_err();
        assert!(matches!(err, PackagerError::NotConnected));
    }
}
