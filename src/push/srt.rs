//! SRT pusher — spec §4.9.4.

use async_trait::async_trait;

use crate::error::{PackagerError, Result};
use crate::push::{ConnectionState, PushStats, Pusher};

#[derive(Debug, Clone)]
pub struct SrtOptions {
    pub latency_ms: u32,
    pub passphrase: Option<String>,
    pub max_bandwidth: Option<u64>,
    pub stream_id: Option<String>,
}

impl SrtOptions {
    /// `passphrase`, when set, must be a valid SRT key length (128/192/256 bits).
    pub fn validate(&self) -> Result<()> {
        if let Some(p) = &self.passphrase {
            let bits = p.len() * 8;
            if !matches!(bits, 128 | 192 | 256) {
                return Err(PackagerError::InvalidConfig(format!(
                    "SRT passphrase must be 128/192/256 bits, got {bits}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SrtNetworkStats {
    pub rtt: f64,
    pub bandwidth: f64,
    pub packet_loss_rate: f64,
    pub retransmit_rate: f64,
}

#[async_trait]
pub trait SrtTransport: Send + Sync {
    async fn connect(&mut self, host: &str, port: u16, options: &SrtOptions) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn send(&mut self, data: &[u8]) -> Result<()>;
    async fn network_stats(&self) -> Option<SrtNetworkStats>;
}

pub struct SrtPusher<T: SrtTransport> {
    host: String,
    port: u16,
    options: SrtOptions,
    transport: T,
    state: ConnectionState,
    stats: PushStats,
}

impl<T: SrtTransport> SrtPusher<T> {
    pub fn new(host: String, port: u16, options: SrtOptions, transport: T) -> Self {
        Self {
            host,
            port,
            options,
            transport,
            state: ConnectionState::Disconnected,
            stats: PushStats::default(),
        }
    }

    pub async fn network_stats(&self) -> Option<SrtNetworkStats> {
        self.transport.network_stats().await
    }

    async fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(PackagerError::NotConnected);
        }
        let started = std::time::Instant::now();
        match self.transport.send(data).await {
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
impl<T: SrtTransport> Pusher for SrtPusher<T> {
    async fn connect(&mut self) -> Result<()> {
        self.options.validate()?;
        self.state = ConnectionState::Connecting;
        match self.transport.connect(&self.host, self.port, &self.options).await {
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

    async fn push_segment(&mut self, data: &[u8], _duration_secs: f64, _filename: &str) -> Result<()> {
        self.send_bytes(data).await
    }

    async fn push_partial(&mut self, data: &[u8], _duration_secs: f64, _filename: &str) -> Result<()> {
        self.send_bytes(data).await
    }

    async fn push_playlist(&mut self, text: &str, _filename: &str) -> Result<()> {
        self.send_bytes(text.as_bytes()).await
    }

    async fn push_init_segment(&mut self, data: &[u8], _filename: &str) -> Result<()> {
        self.send_bytes(data).await
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

    struct NullTransport;

    #[async_trait]
    impl SrtTransport for NullTransport {
        async fn connect(&mut self, _host: &str, _port: u16, _options: &SrtOptions) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn send(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn network_stats(&self) -> Option<SrtNetworkStats> {
            None
        }
    }

    fn options() -> SrtOptions {
        SrtOptions {
            latency_ms: 120,
            passphrase: None,
            max_bandwidth: None,
            stream_id: None,
        }
    }

    #[test]
    fn rejects_invalid_passphrase_length() {
        let opts = SrtOptions {
            passphrase: Some("short".into()),
            ..options()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn accepts_128_bit_passphrase() {
        let opts = SrtOptions {
            passphrase: Some("0123456789abcdef".into()), // 16 bytes = 128 bits
            ..options()
        };
        assert!(opts.validate().is_ok());
    }

    #[tokio::test]
    async fn connect_then_push_succeeds() {
        let mut pusher = SrtPusher::new("127.0.0.1".into(), 9000, options(), NullTransport);
        pusher.connect().await.unwrap();
        pusher.push_segment(b"abc", 2.0, "seg0.ts").await.unwrap();
        assert_eq!(pusher.stats().success_count, 1);
    }
}
