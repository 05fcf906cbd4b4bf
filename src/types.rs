//! Data model shared across the packaging and delivery pipeline (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Video/image pixel dimensions. Both fields are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// A `EXT-X-BYTERANGE` sub-range of a resource. `offset` absent means
/// "immediately after the previous sub-range".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub length: u64,
    pub offset: Option<u64>,
}

/// Encryption method advertised in `EXT-X-KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionMethod {
    None,
    Aes128,
    SampleAes,
    SampleAesCtr,
}

impl EncryptionMethod {
    pub fn as_tag_str(&self) -> &'static str {
        match self {
            EncryptionMethod::None => "NONE",
            EncryptionMethod::Aes128 => "AES-128",
            EncryptionMethod::SampleAes => "SAMPLE-AES",
            EncryptionMethod::SampleAesCtr => "SAMPLE-AES-CTR",
        }
    }
}

/// `{method, uri?, iv?, key_format?, key_format_versions?}`. When `method`
/// is `None` every other field must be absent — enforced by
/// [`EncryptionKey::none`] being the only constructor that produces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub method: EncryptionMethod,
    pub uri: Option<String>,
    pub iv: Option<[u8; 16]>,
    pub key_format: Option<String>,
    pub key_format_versions: Option<String>,
}

impl EncryptionKey {
    pub fn none() -> Self {
        Self {
            method: EncryptionMethod::None,
            uri: None,
            iv: None,
            key_format: None,
            key_format_versions: None,
        }
    }
}

/// One media segment as it appears in a rendered playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub duration: f64,
    pub uri: String,
    pub title: Option<String>,
    pub byte_range: Option<ByteRange>,
    pub key: Option<EncryptionKey>,
    pub map: Option<MapTag>,
    pub program_date_time: Option<DateTime<Utc>>,
    pub discontinuity: bool,
    pub is_gap: bool,
    pub bitrate: Option<u64>,
    /// `EXT-X-PART` lines retained for this (already-completed) segment,
    /// rendered ahead of its `EXTINF` while it is still within the LL-HLS
    /// retention window.
    pub partials: Vec<PartialSegment>,
}

/// `EXT-X-MAP` initialization section reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapTag {
    pub uri: String,
    pub byte_range: Option<ByteRange>,
}

/// A partial segment as it appears in the rendered media playlist
/// (`EXT-X-PART`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialSegment {
    pub uri: String,
    pub duration: f64,
    pub independent: bool,
    pub byte_range: Option<ByteRange>,
    pub is_gap: bool,
}

/// A partial segment as tracked by the live pipeline before it is frozen
/// into a completed segment. Identity is `(segment_index, partial_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLPartialSegment {
    pub segment_index: u64,
    pub partial_index: u32,
    pub part: PartialSegment,
    pub created_at: DateTime<Utc>,
}

/// A completed live segment handed off by the muxer/encryptor to egress.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSegment {
    pub index: u64,
    pub data: Vec<u8>,
    pub duration: f64,
    pub timestamp: DateTime<Utc>,
    pub is_independent: bool,
    pub discontinuity: bool,
    pub program_date_time: Option<DateTime<Utc>>,
    pub filename: String,
    pub frame_count: u32,
    pub codecs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaylistType {
    Vod,
    Event,
}

/// `EXT-X-PRELOAD-HINT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadHint {
    pub hint_type: PreloadHintType,
    pub uri: String,
    pub byte_range_start: Option<u64>,
    pub byte_range_length: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreloadHintType {
    Part,
    Map,
}

/// `EXT-X-RENDITION-REPORT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenditionReport {
    pub uri: String,
    pub last_msn: u64,
    pub last_part: Option<u32>,
}

/// `{can_block_reload, hold_back?, part_hold_back?, can_skip_until?,
/// can_skip_date_ranges}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerControlConfig {
    pub can_block_reload: bool,
    pub hold_back: Option<f64>,
    pub part_hold_back: Option<f64>,
    pub can_skip_until: Option<f64>,
    pub can_skip_date_ranges: bool,
}

impl ServerControlConfig {
    /// Effective hold-back: `hold_back ?? 3 * target_duration`.
    pub fn effective_hold_back(&self, target_duration: f64) -> f64 {
        self.hold_back.unwrap_or(3.0 * target_duration)
    }

    /// Effective part hold-back: `part_hold_back ?? 3 * part_target_duration`.
    pub fn effective_part_hold_back(&self, part_target_duration: f64) -> f64 {
        self.part_hold_back.unwrap_or(3.0 * part_target_duration)
    }

    /// Recommended `CAN-SKIP-UNTIL`: `6 * target_duration`.
    pub fn recommended_can_skip_until(target_duration: f64) -> f64 {
        6.0 * target_duration
    }
}

/// A fully assembled media playlist, ready to render or freshly parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaPlaylist {
    pub version: u32,
    pub target_duration: u32,
    pub media_sequence: u64,
    pub discontinuity_sequence: u64,
    pub playlist_type: Option<PlaylistType>,
    pub has_endlist: bool,
    pub independent_segments: bool,
    pub segments: Vec<Segment>,
    pub part_target_duration: Option<f64>,
    pub server_control: Option<ServerControlConfig>,
    pub partial_segments: Vec<PartialSegment>,
    pub preload_hints: Vec<PreloadHint>,
    pub rendition_reports: Vec<RenditionReport>,
    pub skip: Option<SkipTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipTag {
    pub skipped_segments: u64,
    pub recently_removed_dateranges: bool,
}

/// A rendition group entry (`EXT-X-MEDIA`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    pub media_type: RenditionType,
    pub group_id: String,
    pub name: String,
    pub uri: Option<String>,
    pub language: Option<String>,
    pub default: bool,
    pub autoselect: bool,
    pub forced: bool,
    pub channels: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenditionType {
    Audio,
    Video,
    Subtitles,
    ClosedCaptions,
}

impl RenditionType {
    pub fn as_tag_str(&self) -> &'static str {
        match self {
            RenditionType::Audio => "AUDIO",
            RenditionType::Video => "VIDEO",
            RenditionType::Subtitles => "SUBTITLES",
            RenditionType::ClosedCaptions => "CLOSED-CAPTIONS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStream {
    pub uri: String,
    pub bandwidth: u64,
    pub average_bandwidth: Option<u64>,
    pub codecs: Option<String>,
    pub resolution: Option<Resolution>,
    pub frame_rate: Option<u32>,
    pub audio_group: Option<String>,
    pub video_group: Option<String>,
    pub subtitles_group: Option<String>,
    pub closed_captions_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IFrameVariantStream {
    pub uri: String,
    pub bandwidth: u64,
    pub codecs: Option<String>,
    pub resolution: Option<Resolution>,
    pub video_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub data_id: String,
    pub value: Option<String>,
    pub uri: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    pub key: EncryptionKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSteering {
    pub server_uri: String,
    pub pathway_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterPlaylist {
    pub version: u32,
    pub variants: Vec<VariantStream>,
    pub i_frame_variants: Vec<IFrameVariantStream>,
    pub renditions: Vec<Rendition>,
    pub session_data: Vec<SessionData>,
    pub session_keys: Vec<SessionKey>,
    pub content_steering: Option<ContentSteering>,
    pub independent_segments: bool,
    pub start_offset: Option<f64>,
    pub definitions: Vec<(String, String)>,
}

/// Supported video codecs for the TS codec-config extractor (spec §4.3/4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoStreamType {
    H264,
    H265,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioStreamType {
    Aac,
}

/// `{sps?, pps?, vps?, aac_config?, video_stream_type?, audio_stream_type?,
/// nal_length_size}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsCodecConfig {
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
    pub vps: Vec<Vec<u8>>,
    pub aac_config: Option<AudioSpecificConfig>,
    pub video_stream_type: Option<VideoStreamType>,
    pub audio_stream_type: Option<AudioStreamType>,
    /// Length, in bytes, of the NAL-unit length prefix used by the source's
    /// AVCC/HVCC sample data (`lengthSizeMinusOne + 1`).
    pub nal_length_size: u8,
}

impl Default for TsCodecConfig {
    fn default() -> Self {
        Self {
            sps: Vec::new(),
            pps: Vec::new(),
            vps: Vec::new(),
            aac_config: None,
            video_stream_type: None,
            audio_stream_type: None,
            nal_length_size: 4,
        }
    }
}

/// Decoded MPEG-4 `AudioSpecificConfig` fields relevant to ADTS framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    /// ADTS `profile` is `object_type - 1`.
    pub fn adts_profile(&self) -> u8 {
        self.object_type.saturating_sub(1)
    }
}
