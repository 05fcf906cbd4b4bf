//! Typed error surface for the packaging and delivery pipeline (spec §7).
//!
//! Grounded in the pack's `hr3lxphr6j-ncd` HLS downloader, which defines a
//! single `thiserror`-derived `Error` enum for its crate rather than the
//! teacher's `anyhow`-everywhere style; this crate does the same for its
//! library surface and leaves `anyhow` for the CLI binary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackagerError {
    // ---- configuration ----
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid key size: {0} bytes")]
    InvalidKeySize(usize),
    #[error("invalid iv size: {0} bytes")]
    InvalidIVSize(usize),
    #[error("unsupported encryption method: {0}")]
    UnsupportedMethod(String),
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    // ---- source ----
    #[error("invalid mp4: {0}")]
    InvalidMP4(String),
    #[error("invalid avc config: {0}")]
    InvalidAVCConfig(String),
    #[error("invalid audio config: {0}")]
    InvalidAudioConfig(String),
    #[error("no media tracks")]
    NoMediaTracks,
    #[error("sample index {index} out of bounds (total {total})")]
    SampleIndexOutOfBounds { index: usize, total: usize },

    // ---- transport ----
    #[error("io error: {0}")]
    Io(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("timeout after {0}s")]
    Timeout(f64),
    #[error("http error {status}: {message:?}")]
    HttpError {
        status: u16,
        message: Option<String>,
    },
    #[error("circuit breaker open after {failures} failures")]
    CircuitBreakerOpen { failures: u32 },
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("pusher not connected")]
    NotConnected,
    #[error("cancelled")]
    Cancelled,

    // ---- LL-HLS ----
    #[error("stream already ended")]
    StreamAlreadyEnded,
    #[error("first partial of a segment must be independent")]
    FirstPartialMustBeIndependent,
    #[error("partial duration {actual} exceeds target {target}")]
    PartialDurationExceedsTarget { actual: f64, target: f64 },
    #[error("segment not in progress")]
    SegmentNotInProgress,
    #[error("request timed out: msn={msn} part={part:?} timeout={timeout}")]
    RequestTimeout {
        msn: u64,
        part: Option<u32>,
        timeout: f64,
    },

    // ---- parsing ----
    #[error("empty manifest")]
    EmptyManifest,
    #[error("missing #EXTM3U header")]
    MissingHeader,
    #[error("ambiguous playlist type")]
    AmbiguousPlaylistType,
    #[error("missing required tag: {0}")]
    MissingRequiredTag(String),
    #[error("missing required attribute {attr} on {tag}")]
    MissingRequiredAttribute { tag: String, attr: String },
    #[error("invalid attribute value: {tag}.{attr} = {value:?}")]
    InvalidAttributeValue {
        tag: String,
        attr: String,
        value: String,
    },
    #[error("invalid tag format: {tag} at line {line}")]
    InvalidTagFormat { tag: String, line: usize },
    #[error("invalid duration at line {line}")]
    InvalidDuration { line: usize },
    #[error("missing URI after {after} at line {line}")]
    MissingURI { after: String, line: usize },
    #[error("invalid version: {0}")]
    InvalidVersion(String),
    #[error("parsing failed: {reason} (line {line:?})")]
    ParsingFailed {
        reason: String,
        line: Option<usize>,
    },
}

pub type Result<T> = std::result::Result<T, PackagerError>;

impl From<std::io::Error> for PackagerError {
    fn from(e: std::io::Error) -> Self {
        PackagerError::Io(e.to_string())
    }
}

impl From<reqwest::Error> for PackagerError {
    fn from(e: reqwest::Error) -> Self {
        PackagerError::ConnectionFailed(e.to_string())
    }
}

/// Non-fatal violations surfaced alongside a successful operation (spec
/// §4.6.1: partial duration overruns do not fail `add_partial`).
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    PartialDurationExceedsTarget { actual: f64, target: f64 },
}
