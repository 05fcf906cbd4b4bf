//! MPEG-TS Writer — spec §4.3.
//!
//! Emits self-contained 188-byte-packet TS segments: a `PAT`/`PMT` pair at
//! the start of every segment, video rewritten from AVCC/HVCC to Annex-B
//! with parameter sets prepended to keyframes, audio framed as ADTS, a PCR
//! on the video PID at the segment boundary, and per-PID continuity
//! counters.

use crate::error::{PackagerError, Result};
use crate::mp4::codec_config::AAC_SAMPLE_RATES;
use crate::types::{AudioStreamType, TsCodecConfig, VideoStreamType};

const TS_PACKET_SIZE: usize = 188;
const PAT_PID: u16 = 0x0000;
const PMT_PID: u16 = 0x1000;
const VIDEO_PID: u16 = 0x0100;
const AUDIO_PID: u16 = 0x0101;
const PCR_90K_TO_27M: u64 = 300;

/// One access unit to mux: timestamps are in the track's own timescale.
pub struct TsSampleUnit<'a> {
    pub pts: i64,
    pub dts: i64,
    pub is_sync: bool,
    /// AVCC/HVCC length-prefixed NAL data for video, or raw AAC frame
    /// bytes (no ADTS header) for audio.
    pub data: &'a [u8],
}

pub struct TsWriter {
    video_config: Option<TsCodecConfig>,
    audio_config: Option<TsCodecConfig>,
    video_timescale: u32,
    audio_timescale: u32,
    pat_cc: u8,
    pmt_cc: u8,
    video_cc: u8,
    audio_cc: u8,
}

impl TsWriter {
    pub fn new(
        video_config: Option<TsCodecConfig>,
        audio_config: Option<TsCodecConfig>,
        video_timescale: u32,
        audio_timescale: u32,
    ) -> Result<Self> {
        if video_config.is_none() && audio_config.is_none() {
            return Err(PackagerError::NoMediaTracks);
        }
        if let Some(v) = &video_config {
            match v.video_stream_type {
                Some(VideoStreamType::H264) | Some(VideoStreamType::H265) => {}
                None => return Err(PackagerError::UnsupportedCodec("unknown video codec".into())),
            }
        }
        if let Some(a) = &audio_config {
            if a.audio_stream_type != Some(AudioStreamType::Aac) {
                return Err(PackagerError::UnsupportedCodec("unknown audio codec".into()));
            }
            if a.aac_config.is_none() {
                return Err(PackagerError::InvalidAudioConfig(
                    "missing AudioSpecificConfig".into(),
                ));
            }
        }
        Ok(Self {
            video_config,
            audio_config,
            video_timescale,
            audio_timescale,
            pat_cc: 0,
            pmt_cc: 0,
            video_cc: 0,
            audio_cc: 0,
        })
    }

    /// Write one self-contained TS segment muxing the given access units,
    /// which must already be in presentation order per track.
    pub fn write_segment(
        &mut self,
        video_samples: &[TsSampleUnit],
        audio_samples: &[TsSampleUnit],
    ) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_pat(&mut out);
        self.write_pmt(&mut out)?;

        let mut first_video_pcr_written = false;
        let mut vi = 0usize;
        let mut ai = 0usize;

        loop {
            let video_next = video_samples.get(vi);
            let audio_next = audio_samples.get(ai);
            let take_video = match (video_next, audio_next) {
                (Some(v), Some(a)) => self.rescale(v.dts, self.video_timescale) <= self.rescale(a.dts, self.audio_timescale),
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };

            if take_video {
                let sample = &video_samples[vi];
                let cfg = self
                    .video_config
                    .as_ref()
                    .ok_or_else(|| PackagerError::UnsupportedCodec("no video config".into()))?;
                let payload = annex_b_payload(cfg, sample)?;
                let pcr = if !first_video_pcr_written {
                    first_video_pcr_written = true;
                    Some(self.rescale(sample.dts, self.video_timescale) * PCR_90K_TO_27M)
                } else {
                    None
                };
                let pes = build_pes(
                    0xE0,
                    self.rescale(sample.pts, self.video_timescale),
                    Some(self.rescale(sample.dts, self.video_timescale)),
                    &payload,
                );
                self.write_pes_packets(&mut out, VIDEO_PID, &pes, pcr);
                vi += 1;
            } else {
                let sample = &audio_samples[ai];
                let cfg = self
                    .audio_config
                    .as_ref()
                    .ok_or_else(|| PackagerError::UnsupportedCodec("no audio config".into()))?;
                let framed = adts_frame(cfg, sample.data)?;
                let pes = build_pes(
                    0xC0,
                    self.rescale(sample.pts, self.audio_timescale),
                    None,
                    &framed,
                );
                self.write_pes_packets(&mut out, AUDIO_PID, &pes, None);
                ai += 1;
            }
        }

        Ok(out)
    }

    fn rescale(&self, ticks: i64, timescale: u32) -> u64 {
        ((ticks as i128 * 90_000i128) / timescale as i128).max(0) as u64
    }

    fn write_pat(&mut self, out: &mut Vec<u8>) {
        let mut section = Vec::new();
        section.push(0x00); // table_id: program_association_section
        // section_length placeholder
        section.extend_from_slice(&[0, 0]);
        section.extend_from_slice(&[0, 1]); // transport_stream_id
        section.push(0xC1); // reserved|version_number|current_next_indicator
        section.push(0x00); // section_number
        section.push(0x00); // last_section_number
        section.extend_from_slice(&1u16.to_be_bytes()); // program_number
        section.extend_from_slice(&(0xE000 | PMT_PID).to_be_bytes());
        finish_section(&mut section);
        let cc = self.pat_cc;
        self.pat_cc = (self.pat_cc + 1) % 16;
        write_single_packet_section(out, PAT_PID, &section, cc);
    }

    fn write_pmt(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let mut section = Vec::new();
        section.push(0x02); // table_id: TS_program_map_section
        section.extend_from_slice(&[0, 0]); // section_length placeholder
        section.extend_from_slice(&1u16.to_be_bytes()); // program_number
        section.push(0xC1);
        section.push(0x00);
        section.push(0x00);
        section.extend_from_slice(&(0xE000 | VIDEO_PID).to_be_bytes()); // PCR_PID
        section.extend_from_slice(&0xF000u16.to_be_bytes()); // program_info_length = 0

        if let Some(v) = &self.video_config {
            let stream_type = match v.video_stream_type {
                Some(VideoStreamType::H264) => 0x1B,
                Some(VideoStreamType::H265) => 0x24,
                None => return Err(PackagerError::UnsupportedCodec("unknown video codec".into())),
            };
            section.push(stream_type);
            section.extend_from_slice(&(0xE000 | VIDEO_PID).to_be_bytes());
            section.extend_from_slice(&0xF000u16.to_be_bytes()); // ES_info_length = 0
        }
        if self.audio_config.is_some() {
            section.push(0x0F); // ADTS AAC
            section.extend_from_slice(&(0xE000 | AUDIO_PID).to_be_bytes());
            section.extend_from_slice(&0xF000u16.to_be_bytes());
        }
        finish_section(&mut section);
        let cc = self.pmt_cc;
        self.pmt_cc = (self.pmt_cc + 1) % 16;
        write_single_packet_section(out, PMT_PID, &section, cc);
        Ok(())
    }

    fn write_pes_packets(&mut self, out: &mut Vec<u8>, pid: u16, pes: &[u8], pcr_27m: Option<u64>) {
        let cc = if pid == VIDEO_PID {
            &mut self.video_cc
        } else {
            &mut self.audio_cc
        };
        write_pes_as_ts(out, pid, pes, pcr_27m, cc);
    }
}

/// Fill in `section_length` (bits 11:0 of bytes[1..3]) and append the
/// MPEG-2 CRC32 over the section from `table_id` through the field before
/// CRC, per ISO/IEC 13818-1.
fn finish_section(section: &mut Vec<u8>) {
    let length = (section.len() - 3 + 4) as u16; // everything after length field, plus 4-byte CRC
    section[1] = 0xB0 | ((length >> 8) as u8 & 0x0F);
    section[2] = (length & 0xFF) as u8;
    let crc = crc32_mpeg2(section);
    section.extend_from_slice(&crc.to_be_bytes());
}

fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFFFFFF;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Write a single PSI section (PAT/PMT) as one TS packet with the
/// pointer_field convention (payload starts right after a leading
/// `0x00` pointer byte).
fn write_single_packet_section(out: &mut Vec<u8>, pid: u16, section: &[u8], cc: u8) {
    let mut packet = Vec::with_capacity(TS_PACKET_SIZE);
    packet.push(0x47);
    packet.push(0x40 | ((pid >> 8) as u8 & 0x1F)); // PUSI=1
    packet.push((pid & 0xFF) as u8);
    packet.push(0x10 | (cc & 0x0F)); // no adaptation field, payload only
    packet.push(0x00); // pointer_field
    packet.extend_from_slice(section);
    pad_packet(&mut packet);
    out.extend_from_slice(&packet);
}

fn pad_packet(packet: &mut Vec<u8>) {
    while packet.len() < TS_PACKET_SIZE {
        packet.push(0xFF);
    }
}

/// Build a PES packet (header + payload) for one elementary stream access
/// unit. `dts_90k` is `None` when it equals `pts_90k` (audio, or video with
/// no B-frames).
fn build_pes(stream_id: u8, pts_90k: u64, dts_90k: Option<u64>, payload: &[u8]) -> Vec<u8> {
    let mut pes = Vec::new();
    pes.extend_from_slice(&[0x00, 0x00, 0x01]);
    pes.push(stream_id);
    pes.extend_from_slice(&[0, 0]); // PES_packet_length = 0 (unbounded, video) — fine for audio too here
    pes.push(0x80); // marker bits + no scrambling
    let has_dts = dts_90k.is_some() && dts_90k != Some(pts_90k);
    pes.push(if has_dts { 0xC0 } else { 0x80 }); // PTS (and DTS) flags
    pes.push(if has_dts { 10 } else { 5 }); // PES_header_data_length
    write_pts_dts(&mut pes, 0x2, pts_90k);
    if has_dts {
        write_pts_dts(&mut pes, 0x1, dts_90k.unwrap());
    }
    pes.extend_from_slice(payload);
    pes
}

fn write_pts_dts(buf: &mut Vec<u8>, marker: u8, ts: u64) {
    let ts = ts & 0x1_FFFF_FFFF;
    buf.push((marker << 4) | (((ts >> 30) as u8) << 1) | 1);
    buf.push((ts >> 22) as u8);
    buf.push((((ts >> 15) as u8) << 1) | 1);
    buf.push((ts >> 7) as u8);
    buf.push((((ts as u8) << 1)) | 1);
}

/// Split `pes` into 188-byte TS packets on `pid`, setting PUSI on the
/// first packet and carrying `pcr_27m` (if any) in that packet's
/// adaptation field.
fn write_pes_as_ts(out: &mut Vec<u8>, pid: u16, pes: &[u8], pcr_27m: Option<u64>, cc: &mut u8) {
    const HEADER_LEN: usize = 4;
    const FULL_PAYLOAD: usize = TS_PACKET_SIZE - HEADER_LEN;

    let mut offset = 0usize;
    let mut first = true;
    while offset < pes.len() {
        let remaining = pes.len() - offset;
        let pcr_here = if first { pcr_27m } else { None };
        let pcr_bytes = if pcr_here.is_some() { 7 } else { 0 }; // flags(1) + PCR(6)

        // Room for payload if we only reserve what PCR needs (no stuffing).
        let payload_with_pcr_only = FULL_PAYLOAD - 1 - pcr_bytes;
        let needs_stuffing = remaining < payload_with_pcr_only;

        let mut packet = Vec::with_capacity(TS_PACKET_SIZE);
        packet.push(0x47);
        packet.push((if first { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F));
        packet.push((pid & 0xFF) as u8);

        let take;
        if pcr_bytes > 0 || needs_stuffing {
            let payload_len = remaining.min(payload_with_pcr_only);
            let stuffing = payload_with_pcr_only - payload_len;
            let adaptation_field_length = pcr_bytes + stuffing;

            packet.push(0x30 | (*cc & 0x0F)); // adaptation field + payload
            packet.push(adaptation_field_length as u8);
            if adaptation_field_length > 0 {
                packet.push(if pcr_here.is_some() { 0x10 } else { 0x00 });
                if let Some(pcr) = pcr_here {
                    write_pcr(&mut packet, pcr);
                }
                for _ in 0..stuffing {
                    packet.push(0xFF);
                }
            }
            take = payload_len;
        } else {
            packet.push(0x10 | (*cc & 0x0F)); // payload only
            take = remaining.min(FULL_PAYLOAD);
        }

        packet.extend_from_slice(&pes[offset..offset + take]);
        offset += take;

        pad_packet(&mut packet);
        out.extend_from_slice(&packet);
        *cc = (*cc + 1) % 16;
        first = false;
    }
}

fn write_pcr(buf: &mut Vec<u8>, pcr_27m: u64) {
    let base = (pcr_27m / 300) & 0x1_FFFF_FFFF;
    let ext = (pcr_27m % 300) & 0x1FF;
    buf.push((base >> 25) as u8);
    buf.push((base >> 17) as u8);
    buf.push((base >> 9) as u8);
    buf.push((base >> 1) as u8);
    buf.push((((base & 1) as u8) << 7) | 0x7E | ((ext >> 8) as u8));
    buf.push((ext & 0xFF) as u8);
}

/// Convert one AVCC/HVCC length-prefixed access unit to Annex-B, prepending
/// VPS/SPS/PPS before the first NAL when `is_sync`.
fn annex_b_payload(cfg: &TsCodecConfig, sample: &TsSampleUnit) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if sample.is_sync {
        for vps in &cfg.vps {
            write_start_code_nal(&mut out, vps);
        }
        for sps in &cfg.sps {
            write_start_code_nal(&mut out, sps);
        }
        for pps in &cfg.pps {
            write_start_code_nal(&mut out, pps);
        }
    }
    let len_size = cfg.nal_length_size as usize;
    let mut pos = 0usize;
    while pos + len_size <= sample.data.len() {
        let nal_len = read_nal_length(&sample.data[pos..pos + len_size])?;
        pos += len_size;
        if pos + nal_len > sample.data.len() {
            return Err(PackagerError::InvalidAVCConfig(
                "NAL length exceeds sample data".into(),
            ));
        }
        write_start_code_nal(&mut out, &sample.data[pos..pos + nal_len]);
        pos += nal_len;
    }
    Ok(out)
}

fn read_nal_length(bytes: &[u8]) -> Result<usize> {
    let v = match bytes.len() {
        1 => bytes[0] as usize,
        2 => u16::from_be_bytes([bytes[0], bytes[1]]) as usize,
        4 => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize,
        n => {
            return Err(PackagerError::InvalidAVCConfig(format!(
                "unsupported NAL length size {n}"
            )))
        }
    };
    Ok(v)
}

fn write_start_code_nal(out: &mut Vec<u8>, nal: &[u8]) {
    out.extend_from_slice(&[0, 0, 0, 1]);
    out.extend_from_slice(nal);
}

/// Prepend a 7-byte ADTS header (no CRC) to a raw AAC frame.
fn adts_frame(cfg: &TsCodecConfig, raw_frame: &[u8]) -> Result<Vec<u8>> {
    let asc = cfg
        .aac_config
        .ok_or_else(|| PackagerError::InvalidAudioConfig("missing AudioSpecificConfig".into()))?;
    if asc.sampling_frequency_index as usize >= AAC_SAMPLE_RATES.len() {
        return Err(PackagerError::InvalidAudioConfig(
            "sampling frequency index out of range".into(),
        ));
    }
    let frame_len = raw_frame.len() + 7;
    if frame_len > 0x1FFF {
        return Err(PackagerError::InvalidAudioConfig(
            "AAC frame too large for ADTS".into(),
        ));
    }
    let mut out = Vec::with_capacity(frame_len);
    out.push(0xFF);
    out.push(0xF1); // MPEG-4, layer 0, no CRC
    let profile = asc.adts_profile();
    out.push((profile << 6) | (asc.sampling_frequency_index << 2) | (asc.channel_configuration >> 2));
    out.push(((asc.channel_configuration & 0x3) << 6) | ((frame_len as u16 >> 11) as u8));
    out.push(((frame_len as u16 >> 3) & 0xFF) as u8);
    out.push((((frame_len as u16 & 0x7) << 5) as u8) | 0x1F);
    out.push(0xFC);
    out.extend_from_slice(raw_frame);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioSpecificConfig;

    fn video_cfg() -> TsCodecConfig {
        TsCodecConfig {
            sps: vec![vec![0x67, 1, 2, 3]],
            pps: vec![vec![0x68, 1]],
            video_stream_type: Some(VideoStreamType::H264),
            nal_length_size: 4,
            ..Default::default()
        }
    }

    fn audio_cfg() -> TsCodecConfig {
        TsCodecConfig {
            audio_stream_type: Some(AudioStreamType::Aac),
            aac_config: Some(AudioSpecificConfig {
                object_type: 2,
                sampling_frequency_index: 4,
                channel_configuration: 2,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn annex_b_prepends_parameter_sets_on_keyframe() {
        let cfg = video_cfg();
        let nal = [0x65u8, 0xAA, 0xBB];
        let mut data = Vec::new();
        data.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        data.extend_from_slice(&nal);
        let sample = TsSampleUnit {
            pts: 0,
            dts: 0,
            is_sync: true,
            data: &data,
        };
        let out = annex_b_payload(&cfg, &sample).unwrap();
        assert_eq!(&out[0..4], &[0, 0, 0, 1]);
        assert_eq!(out[4], 0x67); // SPS first
    }

    #[test]
    fn adts_header_has_sync_word() {
        let cfg = audio_cfg();
        let raw = [0u8; 10];
        let framed = adts_frame(&cfg, &raw).unwrap();
        assert_eq!(framed[0], 0xFF);
        assert_eq!(framed[1] & 0xF0, 0xF0);
        assert_eq!(framed.len(), 17);
    }

    #[test]
    fn segment_packets_are_188_bytes_and_start_with_sync_byte() {
        let mut writer = TsWriter::new(Some(video_cfg()), Some(audio_cfg()), 30, 48000).unwrap();
        let vnal = [0x65u8, 1, 2, 3, 4];
        let mut vdata = Vec::new();
        vdata.extend_from_slice(&(vnal.len() as u32).to_be_bytes());
        vdata.extend_from_slice(&vnal);
        let video = vec![TsSampleUnit {
            pts: 0,
            dts: 0,
            is_sync: true,
            data: &vdata,
        }];
        let adata = [0u8; 20];
        let audio = vec![TsSampleUnit {
            pts: 0,
            dts: 0,
            is_sync: true,
            data: &adata,
        }];
        let out = writer.write_segment(&video, &audio).unwrap();
        assert_eq!(out.len() % TS_PACKET_SIZE, 0);
        for chunk in out.chunks(TS_PACKET_SIZE) {
            assert_eq!(chunk[0], 0x47);
        }
    }
}
