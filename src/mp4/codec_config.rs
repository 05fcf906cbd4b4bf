//! Codec Config Extractor (TS only) — spec §4.4.
//!
//! Locates `avcC`/`hvcC` under a visual sample entry and `esds` (directly,
//! or nested one level under a `wave` box) under an audio sample entry,
//! bounds-checking every offset; a read past the end of the buffer is
//! surfaced as `InvalidAVCConfig`/`InvalidAudioConfig` per spec.

use crate::error::{PackagerError, Result};
use crate::mp4::boxes::*;
use crate::types::{AudioSpecificConfig, AudioStreamType, TsCodecConfig, VideoStreamType};

const AVCC: [u8; 4] = *b"avcC";
const HVCC: [u8; 4] = *b"hvcC";
const ESDS: [u8; 4] = *b"esds";
const WAVE: [u8; 4] = *b"wave";

/// Offset from the start of a sample-description entry (header included)
/// to its child box, for visual sample entries (spec: "78 bytes after the
/// entry header").
const VISUAL_ENTRY_HEADER_LEN: usize = 8;
const VISUAL_SAMPLE_ENTRY_BASE_LEN: usize = 78;

const AUDIO_ENTRY_HEADER_LEN: usize = 8;
const AUDIO_SAMPLE_ENTRY_BASE_LEN: usize = 28;

/// Parse a video (AVC/HEVC) sample-description entry's `avcC`/`hvcC`.
pub fn extract_video_config(entry: &[u8], is_hevc: bool) -> Result<TsCodecConfig> {
    let child_start = VISUAL_ENTRY_HEADER_LEN + VISUAL_SAMPLE_ENTRY_BASE_LEN;
    if child_start >= entry.len() {
        return Err(PackagerError::InvalidAVCConfig(
            "sample entry too short for visual base".into(),
        ));
    }
    let children = iter_boxes(entry, child_start, entry.len())
        .map_err(|_| PackagerError::InvalidAVCConfig("malformed child boxes".into()))?;

    let mut cfg = TsCodecConfig::default();
    if is_hevc {
        let hvcc = find_box(&children, &HVCC)
            .ok_or_else(|| PackagerError::InvalidAVCConfig("missing hvcC".into()))?;
        parse_hvcc(entry, hvcc.payload_start, hvcc.payload_end, &mut cfg)?;
        cfg.video_stream_type = Some(VideoStreamType::H265);
    } else {
        let avcc = find_box(&children, &AVCC)
            .ok_or_else(|| PackagerError::InvalidAVCConfig("missing avcC".into()))?;
        parse_avcc(entry, avcc.payload_start, avcc.payload_end, &mut cfg)?;
        cfg.video_stream_type = Some(VideoStreamType::H264);
    }
    Ok(cfg)
}

fn parse_avcc(data: &[u8], start: usize, end: usize, cfg: &mut TsCodecConfig) -> Result<()> {
    // configurationVersion(1) AVCProfileIndication(1) profile_compat(1) AVCLevel(1)
    // reserved+lengthSizeMinusOne(1) reserved+numOfSPS(1)
    let length_size_minus_one = read_u8(data, start + 4)
        .map_err(|_| PackagerError::InvalidAVCConfig("truncated avcC header".into()))?
        & 0x03;
    cfg.nal_length_size = length_size_minus_one + 1;
    let mut pos = start + 5;
    let num_sps = read_u8(data, pos)
        .map_err(|_| PackagerError::InvalidAVCConfig("truncated avcC".into()))?
        & 0x1F;
    pos += 1;
    for _ in 0..num_sps {
        let len = read_u16(data, pos)
            .map_err(|_| PackagerError::InvalidAVCConfig("truncated SPS length".into()))?
            as usize;
        pos += 2;
        let nal = slice(data, pos, pos + len)
            .map_err(|_| PackagerError::InvalidAVCConfig("truncated SPS".into()))?;
        cfg.sps.push(nal.to_vec());
        pos += len;
    }
    let num_pps = read_u8(data, pos)
        .map_err(|_| PackagerError::InvalidAVCConfig("truncated avcC pps count".into()))?;
    pos += 1;
    for _ in 0..num_pps {
        let len = read_u16(data, pos)
            .map_err(|_| PackagerError::InvalidAVCConfig("truncated PPS length".into()))?
            as usize;
        pos += 2;
        let nal = slice(data, pos, pos + len)
            .map_err(|_| PackagerError::InvalidAVCConfig("truncated PPS".into()))?;
        cfg.pps.push(nal.to_vec());
        pos += len;
    }
    if pos > end {
        return Err(PackagerError::InvalidAVCConfig("avcC overran box".into()));
    }
    Ok(())
}

/// Minimal HEVCDecoderConfigurationRecord walker: skip the fixed 22-byte
/// header then iterate `numOfArrays` NAL arrays, each holding `numNalus`
/// length-prefixed NAL units tagged by `NAL_unit_type` (SPS=33, PPS=34,
/// VPS=32).
fn parse_hvcc(data: &[u8], start: usize, end: usize, cfg: &mut TsCodecConfig) -> Result<()> {
    let length_size_minus_one = read_u8(data, start + 21)
        .map_err(|_| PackagerError::InvalidAVCConfig("truncated hvcC header".into()))?
        & 0x03;
    cfg.nal_length_size = length_size_minus_one + 1;
    let mut pos = start + 22;
    let num_arrays = read_u8(data, pos)
        .map_err(|_| PackagerError::InvalidAVCConfig("truncated hvcC".into()))?;
    pos += 1;
    for _ in 0..num_arrays {
        let nal_unit_type = read_u8(data, pos)
            .map_err(|_| PackagerError::InvalidAVCConfig("truncated hvcC array".into()))?
            & 0x3F;
        pos += 1;
        let num_nalus = read_u16(data, pos)
            .map_err(|_| PackagerError::InvalidAVCConfig("truncated hvcC nalu count".into()))?;
        pos += 2;
        for _ in 0..num_nalus {
            let len = read_u16(data, pos)
                .map_err(|_| PackagerError::InvalidAVCConfig("truncated hvcC nalu length".into()))?
                as usize;
            pos += 2;
            let nal = slice(data, pos, pos + len)
                .map_err(|_| PackagerError::InvalidAVCConfig("truncated hvcC nalu".into()))?;
            pos += len;
            match nal_unit_type {
                32 => cfg.vps.push(nal.to_vec()),
                33 => cfg.sps.push(nal.to_vec()),
                34 => cfg.pps.push(nal.to_vec()),
                _ => {}
            }
        }
    }
    if pos > end {
        return Err(PackagerError::InvalidAVCConfig("hvcC overran box".into()));
    }
    Ok(())
}

/// Parse an AAC sample-description entry's `esds` (directly, or nested one
/// level under a `wave` box for the QuickTime path).
pub fn extract_aac_config(entry: &[u8]) -> Result<TsCodecConfig> {
    let version = read_u16(entry, AUDIO_ENTRY_HEADER_LEN + 6)
        .map_err(|_| PackagerError::InvalidAudioConfig("truncated audio sample entry".into()))?;
    let extra = match version {
        0 => 0,
        1 => 16,
        2 => 36,
        _ => 0,
    };
    let child_start = AUDIO_ENTRY_HEADER_LEN + AUDIO_SAMPLE_ENTRY_BASE_LEN + extra;
    if child_start >= entry.len() {
        return Err(PackagerError::InvalidAudioConfig(
            "sample entry too short for audio base".into(),
        ));
    }
    let children = iter_boxes(entry, child_start, entry.len())
        .map_err(|_| PackagerError::InvalidAudioConfig("malformed child boxes".into()))?;

    let esds = if let Some(e) = find_box(&children, &ESDS) {
        *e
    } else if let Some(wave) = find_box(&children, &WAVE) {
        let wave_children = iter_boxes(entry, wave.payload_start, wave.payload_end)
            .map_err(|_| PackagerError::InvalidAudioConfig("malformed wave box".into()))?;
        *find_box(&wave_children, &ESDS)
            .ok_or_else(|| PackagerError::InvalidAudioConfig("missing esds under wave".into()))?
    } else {
        return Err(PackagerError::InvalidAudioConfig("missing esds".into()));
    };

    let dsi = parse_esds_decoder_specific_info(entry, esds.payload_start, esds.payload_end)?;
    let asc = parse_audio_specific_config(&dsi)?;

    let mut cfg = TsCodecConfig::default();
    cfg.audio_stream_type = Some(AudioStreamType::Aac);
    cfg.aac_config = Some(asc);
    Ok(cfg)
}

/// Walk the MPEG-4 descriptor chain inside `esds` (full box) to find tag
/// `0x05` (DecoderSpecificInfo) nested under tag `0x03`/`0x04`.
fn parse_esds_decoder_specific_info(data: &[u8], start: usize, end: usize) -> Result<Vec<u8>> {
    // full box header: version(1) + flags(3)
    let mut pos = start + 4;
    while pos < end {
        let tag = read_u8(data, pos)
            .map_err(|_| PackagerError::InvalidAudioConfig("truncated descriptor".into()))?;
        pos += 1;
        let (len, len_bytes) = read_descriptor_length(data, pos)?;
        pos += len_bytes;
        let body_end = pos
            .checked_add(len)
            .ok_or_else(|| PackagerError::InvalidAudioConfig("descriptor length overflow".into()))?;
        if body_end > end {
            return Err(PackagerError::InvalidAudioConfig(
                "descriptor extends past esds".into(),
            ));
        }
        match tag {
            0x03 => {
                // ES_DescrTag: ES_ID(2) + flags(1) [+ dependsOn/url/ocr fields]
                pos += 2;
                let flags = read_u8(data, pos)
                    .map_err(|_| PackagerError::InvalidAudioConfig("truncated ES descriptor".into()))?;
                pos += 1;
                if flags & 0x80 != 0 {
                    pos += 2;
                }
                if flags & 0x40 != 0 {
                    let url_len = read_u8(data, pos)
                        .map_err(|_| PackagerError::InvalidAudioConfig("truncated url length".into()))?
                        as usize;
                    pos += 1 + url_len;
                }
                if flags & 0x20 != 0 {
                    pos += 2;
                }
                // descend into this descriptor's remaining content
                continue;
            }
            0x04 => {
                // DecoderConfigDescrTag: objectTypeIndication(1) + streamType/upStream/reserved(1)
                // + bufferSizeDB(3) + maxBitrate(4) + avgBitrate(4), then nested descriptors
                pos += 1 + 1 + 3 + 4 + 4;
                continue;
            }
            0x05 => {
                // DecoderSpecificInfoTag: raw AudioSpecificConfig bytes
                return Ok(slice(data, pos, body_end)?.to_vec());
            }
            _ => {
                pos = body_end;
            }
        }
    }
    Err(PackagerError::InvalidAudioConfig(
        "DecoderSpecificInfo not found".into(),
    ))
}

/// MPEG-4 descriptor length is a base-128 varint, up to 4 bytes, each byte's
/// top bit signalling continuation.
fn read_descriptor_length(data: &[u8], mut pos: usize) -> Result<(usize, usize)> {
    let mut len = 0usize;
    let mut consumed = 0usize;
    loop {
        let b = read_u8(data, pos)
            .map_err(|_| PackagerError::InvalidAudioConfig("truncated descriptor length".into()))?;
        len = (len << 7) | (b & 0x7F) as usize;
        pos += 1;
        consumed += 1;
        if b & 0x80 == 0 || consumed >= 4 {
            break;
        }
    }
    Ok((len, consumed))
}

/// Decode the first 2 bytes of `AudioSpecificConfig`: 5-bit object type,
/// 4-bit sampling-frequency index, 4-bit channel configuration.
fn parse_audio_specific_config(bytes: &[u8]) -> Result<AudioSpecificConfig> {
    if bytes.len() < 2 {
        return Err(PackagerError::InvalidAudioConfig(
            "AudioSpecificConfig too short".into(),
        ));
    }
    let object_type = bytes[0] >> 3;
    let sampling_frequency_index = ((bytes[0] & 0x07) << 1) | (bytes[1] >> 7);
    let channel_configuration = (bytes[1] >> 3) & 0x0F;
    Ok(AudioSpecificConfig {
        object_type,
        sampling_frequency_index,
        channel_configuration,
    })
}

/// Sample rates indexed by the 4-bit `sampling_frequency_index` (MPEG-4
/// Table 1.16), used for ADTS header synthesis.
pub const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn build_esds_with_dsi(dsi: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&[0, 0, 0, 0]); // full box version/flags
        // ES_DescrTag
        out.push(0x03);
        let es_body_len = 3 + (2 + dsi.len()) + 2; // approximate, recomputed below
        // Build DecoderConfigDescr body first.
        let mut dcd = Vec::new();
        dcd.push(0x40); // objectTypeIndication
        dcd.push(0x15); // streamType/upStream/reserved
        dcd.extend_from_slice(&[0, 0, 0]); // bufferSizeDB
        dcd.extend_from_slice(&[0, 0, 0, 0]); // maxBitrate
        dcd.extend_from_slice(&[0, 0, 0, 0]); // avgBitrate
        dcd.push(0x05); // DecoderSpecificInfoTag
        dcd.push(dsi.len() as u8);
        dcd.extend_from_slice(dsi);

        let mut es_body = Vec::new();
        es_body.extend_from_slice(&[0, 0]); // ES_ID
        es_body.push(0x00); // flags
        es_body.push(0x04); // DecoderConfigDescrTag
        es_body.push(dcd.len() as u8);
        es_body.extend_from_slice(&dcd);

        out.push(es_body.len() as u8);
        out.extend_from_slice(&es_body);
        let _ = es_body_len;
        out
    }

    #[test]
    fn extracts_decoder_specific_info() {
        // 44100Hz (index 4), object type 2 (AAC LC), stereo (2 channels)
        let dsi = [(2u8 << 3) | (4u8 >> 1), ((4u8 & 1) << 7) | (2u8 << 3)];
        let esds_payload = build_esds_with_dsi(&dsi);
        let got = parse_esds_decoder_specific_info(&esds_payload, 0, esds_payload.len()).unwrap();
        assert_eq!(got, dsi.to_vec());
        let asc = parse_audio_specific_config(&got).unwrap();
        assert_eq!(asc.object_type, 2);
        assert_eq!(asc.sampling_frequency_index, 4);
        assert_eq!(asc.channel_configuration, 2);
        assert_eq!(AAC_SAMPLE_RATES[asc.sampling_frequency_index as usize], 44100);
    }

    #[test]
    fn adts_profile_is_object_type_minus_one() {
        let asc = AudioSpecificConfig {
            object_type: 2,
            sampling_frequency_index: 4,
            channel_configuration: 2,
        };
        assert_eq!(asc.adts_profile(), 1);
    }
}
