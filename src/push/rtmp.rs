//! RTMP pusher — spec §4.9.3.

use async_trait::async_trait;

use crate::error::{PackagerError, Result};
use crate::push::{join_url, ConnectionState, PushStats, Pusher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio = 8,
    Video = 9,
    Script = 18,
}

/// Transport abstraction the RTMP pusher drives; production code backs
/// this with a real RTMP client, tests back it with a recording fake.
#[async_trait]
pub trait RtmpTransport: Send + Sync {
    async fn connect(&mut self, url: &str) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn send(&mut self, data: &[u8], timestamp_ms: u64, tag_type: FlvTagType) -> Result<()>;
}

pub struct RtmpPusher<T: RtmpTransport> {
    server_url: String,
    stream_key: String,
    transport: T,
    state: ConnectionState,
    stats: PushStats,
    next_timestamp_ms: u64,
}

impl<T: RtmpTransport> RtmpPusher<T> {
    pub fn new(server_url: String, stream_key: String, transport: T) -> Self {
        Self {
            server_url,
            stream_key,
            transport,
            state: ConnectionState::Disconnected,
            stats: PushStats::default(),
            next_timestamp_ms: 0,
        }
    }

    async fn send_timed(&mut self, data: &[u8], duration_secs: f64, tag_type: FlvTagType) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(PackagerError::NotConnected);
        }
        let ts = self.next_timestamp_ms;
        self.next_timestamp_ms += (duration_secs * 1000.0) as u64;
        let started = std::time::Instant::now();
        let result = self.transport.send(data, ts, tag_type).await;
        match result {
            Ok(()) => {
                self.stats.record_success(data.len() as u64, started.elapsed().as_secs_f64());
                Ok(())
            }
            Err(e) => {
                self.stats.record_failure();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<T: RtmpTransport> Pusher for RtmpPusher<T> {
    async fn connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        let url = join_url(&self.server_url, &self.stream_key);
        match self.transport.connect(&url).await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.transport.disconnect().await?;
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    async fn push_segment(&mut self, data: &[u8], duration_secs: f64, _filename: &str) -> Result<()> {
        self.send_timed(data, duration_secs, FlvTagType::Video).await
    }

    async fn push_partial(&mut self, data: &[u8], duration_secs: f64, _filename: &str) -> Result<()> {
        self.send_timed(data, duration_secs, FlvTagType::Video).await
    }

    async fn push_playlist(&mut self, _text: &str, _filename: &str) -> Result<()> {
        Ok(())
    }

    async fn push_init_segment(&mut self, data: &[u8], _filename: &str) -> Result<()> {
        self.send_timed(data, 0.0, FlvTagType::Script).await
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
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<(u64, FlvTagType)>>>,
    }

    #[async_trait]
    impl RtmpTransport for RecordingTransport {
        async fn connect(&mut self, _url: &str) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn send(&mut self, data: &[u8], timestamp_ms: u64, tag_type: FlvTagType) -> Result<()> {
            self.sent.lock().unwrap().push((timestamp_ms, tag_type));
            let _ = data;
            Ok(())
        }
    }

    #[tokio::test]
    async fn timestamps_accumulate_by_segment_duration() {
        let transport = RecordingTransport::default();
        let sent = transport.sent.clone();
        let mut pusher = RtmpPusher::new("rtmp://h/live".into(), "key".into(), transport);
        pusher.connect().await.unwrap();
        pusher.push_segment(b"a", 2.0, "seg0.mp4").await.unwrap();
        pusher.push_segment(b"b", 1.5, "seg1.mp4").await.unwrap();
        let recorded = sent.lock().unwrap();
        assert_eq!(recorded[0].0, 0);
        assert_eq!(recorded[1].0, 2000);
    }

    #[tokio::test]
    async fn connect_url_joins_server_and_stream_key() {
        struct CapturingTransport(Arc<Mutex<Option<String>>>);
        #[async_trait]
        impl RtmpTransport for CapturingTransport {
            async fn connect(&mut self, url: &str) -> Result<()> {
                *self.0.lock().unwrap() = Some(url.to_string());
                Ok(())
            }
            async fn disconnect(&mut self) -> Result<()> {
                Ok(())
            }
            async fn send(&mut self, _: &[u8], _: u64, _: FlvTagType) -> Result<()> {
                Ok(())
            }
        }
        let captured = Arc::new(Mutex::new(None));
        let transport = CapturingTransport(captured.clone());
        let mut pusher = RtmpPusher::new("rtmp://host/live/".into(), "stream123".into(), transport);
        pusher.connect().await.unwrap();
        assert_eq!(captured.lock().unwrap().as_deref(), Some("rtmp://host/live/stream123"));
    }

    #[tokio::test]
    async fn push_before_connect_fails() {
        let mut pusher = RtmpPusher::new("rtmp://h/live".into(), "key".into(), RecordingTransport::default());
        let err = pusher.push_segment(b"a", 2.0, "seg0.mp4").await.unwrap_err();
        assert!(matches!(err, PackagerError::NotConnected));
    }
}
