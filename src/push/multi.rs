//! Multi-destination pusher — spec §4.9.5.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::error::{PackagerError, Result};
use crate::push::{ConnectionState, PushStats, Pusher};

#[derive(Debug, Clone)]
pub enum FanOutPolicy {
    ContinueOnFailure,
    FailOnPrimary { primary_id: String },
    RequireAll,
}

/// Owns an ordered set of `(id, Pusher)` destinations and fans operations
/// out to all of them, in parallel, resolving the aggregate outcome per
/// `policy`.
pub struct MultiPusher {
    destinations: Vec<(String, Box<dyn Pusher>)>,
    policy: FanOutPolicy,
}

impl MultiPusher {
    pub fn new(policy: FanOutPolicy) -> Self {
        Self {
            destinations: Vec::new(),
            policy,
        }
    }

    pub fn add_destination(&mut self, id: impl Into<String>, pusher: Box<dyn Pusher>) {
        self.destinations.push((id.into(), pusher));
    }

    fn aggregate(&self, results: &HashMap<String, Result<()>>) -> Result<()> {
        match &self.policy {
            FanOutPolicy::ContinueOnFailure => {
                if results.values().any(|r| r.is_ok()) {
                    Ok(())
                } else {
                    Err(PackagerError::RetriesExhausted {
                        attempts: results.len() as u32,
                        last_error: "all destinations failed".to_string(),
                    })
                }
            }
            FanOutPolicy::FailOnPrimary { primary_id } => match results.get(primary_id) {
                Some(Ok(())) => Ok(()),
                Some(Err(e)) => Err(clone_err(e)),
                None => Err(PackagerError::InvalidConfig(format!(
                    "unknown primary destination {primary_id}"
                ))),
            },
            FanOutPolicy::RequireAll => {
                for r in results.values() {
                    if let Err(e) = r {
                        return Err(clone_err(e));
                    }
                }
                Ok(())
            }
        }
    }

    /// Dispatch a push of `data` to every destination in parallel and
    /// return the full per-destination result map, regardless of what
    /// the aggregate policy would decide.
    pub async fn push_with_results(
        &mut self,
        data: &[u8],
        duration_secs: f64,
        filename: &str,
    ) -> HashMap<String, Result<()>> {
        let futures: Vec<_> = self
            .destinations
            .iter_mut()
            .map(|(id, pusher)| {
                let id = id.clone();
                async move { (id, pusher.push_segment(data, duration_secs, filename).await) }
            })
            .collect();
        join_all(futures).await.into_iter().collect()
    }

    pub async fn push_segment(&mut self, data: &[u8], duration_secs: f64, filename: &str) -> Result<()> {
        let results = self.push_with_results(data, duration_secs, filename).await;
        self.aggregate(&results)
    }

    pub async fn connect_all(&mut self) -> HashMap<String, Result<()>> {
        let futures: Vec<_> = self
            .destinations
            .iter_mut()
            .map(|(id, pusher)| {
                let id = id.clone();
                async move { (id, pusher.connect().await) }
            })
            .collect();
        join_all(futures).await.into_iter().collect()
    }

    pub async fn disconnect_all(&mut self) -> HashMap<String, Result<()>> {
        let futures: Vec<_> = self
            .destinations
            .iter_mut()
            .map(|(id, pusher)| {
                let id = id.clone();
                async move { (id, pusher.disconnect().await) }
            })
            .collect();
        join_all(futures).await.into_iter().collect()
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.destinations.is_empty() {
            return ConnectionState::Disconnected;
        }
        let any_connected = self
            .destinations
            .iter()
            .any(|(_, p)| p.connection_state() == ConnectionState::Connected);
        if any_connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn stats_by_destination(&self) -> HashMap<String, PushStats> {
        self.destinations
            .iter()
            .map(|(id, p)| (id.clone(), p.stats()))
            .collect()
    }
}

fn clone_err(e: &PackagerError) -> PackagerError {
    // `PackagerError` is not `Clone` (thiserror enums commonly aren't);
    // re-derive an equivalent error from its rendered message for
    // aggregation purposes.
    PackagerError::InvalidConfig(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::{ConnectionState as CS, PushStats as Stats};

    struct FakePusher {
        fail: bool,
        calls: std::sync::Arc<std::sync::atomic::AtomicU32>,
        state: ConnectionState,
    }

    #[async_trait]
    impl Pusher for FakePusher {
        async fn connect(&mut self) -> Result<()> {
            self.state = CS::Connected;
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            self.state = CS::Disconnected;
            Ok(())
        }
        async fn push_segment(&mut self, _data: &[u8], _duration_secs: f64, _filename: &str) -> Result<()> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.fail {
                Err(PackagerError::ConnectionFailed("boom".into()))
            } else {
                Ok(())
            }
        }
        async fn push_partial(&mut self, _data: &[u8], _duration_secs: f64, _filename: &str) -> Result<()> {
            Ok(())
        }
        async fn push_playlist(&mut self, _text: &str, _filename: &str) -> Result<()> {
            Ok(())
        }
        async fn push_init_segment(&mut self, _data: &[u8], _filename: &str) -> Result<()> {
            Ok(())
        }
        fn connection_state(&self) -> ConnectionState {
            self.state
        }
        fn stats(&self) -> Stats {
            Stats::default()
        }
    }

    #[tokio::test]
    async fn continue_on_failure_succeeds_with_one_success() {
        let calls_a = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls_b = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut multi = MultiPusher::new(FanOutPolicy::ContinueOnFailure);
        multi.add_destination(
            "a",
            Box::new(FakePusher { fail: true, calls: calls_a.clone(), state: CS::Connected }),
        );
        multi.add_destination(
            "b",
            Box::new(FakePusher { fail: false, calls: calls_b.clone(), state: CS::Connected }),
        );

        let result = multi.push_segment(b"data", 2.0, "seg0.mp4").await;
        assert!(result.is_ok());
        assert_eq!(calls_a.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn require_all_fails_if_any_destination_fails() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut multi = MultiPusher::new(FanOutPolicy::RequireAll);
        multi.add_destination("a", Box::new(FakePusher { fail: true, calls: calls.clone(), state: CS::Connected }));
        let result = multi.push_segment(b"data", 2.0, "seg0.mp4").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fail_on_primary_ignores_secondary_failures() {
        let calls_a = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls_b = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut multi = MultiPusher::new(FanOutPolicy::FailOnPrimary { primary_id: "primary".into() });
        multi.add_destination(
            "primary",
            Box::new(FakePusher { fail: false, calls: calls_a.clone(), state: CS::Connected }),
        );
        multi.add_destination(
            "backup",
            Box::new(FakePusher { fail: true, calls: calls_b.clone(), state: CS::Connected }),
        );
        let result = multi.push_segment(b"data", 2.0, "seg0.mp4").await;
        assert!(result.is_ok());
    }
}
