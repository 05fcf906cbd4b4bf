//! Configuration — loaded via the `config` crate (TOML file + `APP_`
//! environment overrides), matching the teacher's `Config::builder()` idiom.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory packaged segments and playlists are written to before
    /// (optionally) being pushed to remote destinations.
    pub output_dir: String,

    pub segmentation: SegmentationSettings,
    pub encryption: EncryptionSettings,
    pub llhls: LLHLSSettings,
    pub push: PushSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationSettings {
    pub target_duration: f64,
    pub container: ContainerFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    Fmp4,
    Ts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionSettings {
    pub method: String, // "none" | "aes-128" | "sample-aes"
    pub key_hex: Option<String>,
    pub key_uri: Option<String>,
    pub rotation_interval: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLHLSSettings {
    pub enabled: bool,
    pub part_target_duration: f64,
    pub max_partials_per_segment: u32,
    pub max_retained_segments: usize,
    pub can_block_reload: bool,
    pub hold_back: Option<f64>,
    pub part_hold_back: Option<f64>,
    pub can_skip_until: Option<f64>,
    pub blocking_reload_timeout: f64,
}

impl Default for LLHLSSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            part_target_duration: 0.5,
            max_partials_per_segment: 8,
            max_retained_segments: 6,
            can_block_reload: true,
            hold_back: None,
            part_hold_back: None,
            can_skip_until: None,
            blocking_reload_timeout: 6.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSettings {
    pub destinations: Vec<PushDestination>,
    pub fan_out_policy: String, // "continue_on_failure" | "require_all" | "fail_on_primary"
    pub primary_destination_id: Option<String>,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushDestination {
    pub id: String,
    pub kind: String, // "http" | "rtmp" | "srt"
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_interval_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
            request_timeout_ms: 10_000,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_interval_ms: 30_000,
        }
    }
}

impl Settings {
    /// Load from `config.toml` in the working directory, overridable by
    /// `APP_*` environment variables — the teacher's layering order.
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;
        Ok(builder.try_deserialize()?)
    }
}
