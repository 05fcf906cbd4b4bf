//! SAMPLE-AES encryption — spec §4.5 "SAMPLE-AES".
//!
//! Operates on an MPEG-TS segment without changing its byte length:
//! selected sub-ranges of H.264 slice NALs and AAC ADTS frames are
//! replaced with their AES-128-CBC (no padding) ciphertext in place;
//! packet headers, adaptation fields, PES headers, ADTS headers and NAL
//! type bytes are left untouched, so the same region-finding pass works
//! for both directions.

use aes::Aes128;
use cbc::{Decryptor, Encryptor};
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::{PackagerError, Result};

const TS_PACKET_SIZE: usize = 188;
const BLOCK: usize = 16;

/// Encrypt the SAMPLE-AES regions of a self-contained TS segment in place.
pub fn encrypt_ts_segment(
    buf: &mut [u8],
    key: &[u8; 16],
    iv: &[u8; 16],
    video_pid: u16,
    audio_pid: u16,
) -> Result<()> {
    transform_ts_segment(buf, key, iv, video_pid, audio_pid, true)
}

/// Decrypt the SAMPLE-AES regions of a TS segment produced by
/// [`encrypt_ts_segment`] in place.
pub fn decrypt_ts_segment(
    buf: &mut [u8],
    key: &[u8; 16],
    iv: &[u8; 16],
    video_pid: u16,
    audio_pid: u16,
) -> Result<()> {
    transform_ts_segment(buf, key, iv, video_pid, audio_pid, false)
}

fn transform_ts_segment(
    buf: &mut [u8],
    key: &[u8; 16],
    iv: &[u8; 16],
    video_pid: u16,
    audio_pid: u16,
    encrypt: bool,
) -> Result<()> {
    if buf.len() % TS_PACKET_SIZE != 0 {
        return Err(PackagerError::InvalidConfig(
            "TS segment is not packet-aligned".into(),
        ));
    }
    for pid in [video_pid, audio_pid] {
        let is_video = pid == video_pid;
        let (logical, phys_offsets, pusi_positions) = collect_pid_stream(buf, pid)?;
        if logical.is_empty() {
            continue;
        }
        let mut logical = logical;
        let regions = if is_video {
            find_video_regions(&logical, &pusi_positions)
        } else {
            find_audio_regions(&logical, &pusi_positions)
        };
        for (start, end) in regions {
            transform_block(&mut logical[start..end], key, iv, encrypt)?;
        }
        for (i, &phys) in phys_offsets.iter().enumerate() {
            buf[phys] = logical[i];
        }
    }
    Ok(())
}

fn transform_block(region: &mut [u8], key: &[u8; 16], iv: &[u8; 16], encrypt: bool) -> Result<()> {
    let len = region.len();
    if encrypt {
        let cipher = Encryptor::<Aes128>::new(key.into(), iv.into());
        cipher
            .encrypt_padded_mut::<NoPadding>(region, len)
            .map_err(|_| PackagerError::InvalidConfig("sample-aes region not block-aligned".into()))?;
    } else {
        let cipher = Decryptor::<Aes128>::new(key.into(), iv.into());
        cipher
            .decrypt_padded_mut::<NoPadding>(region)
            .map_err(|_| PackagerError::InvalidConfig("sample-aes region not block-aligned".into()))?;
    }
    Ok(())
}

/// Walk `buf` for TS packets on `pid`, concatenating their payload bytes
/// (after any adaptation field) into one logical stream. Returns the
/// stream, a parallel vector mapping each logical byte back to its offset
/// in `buf`, and the logical offsets at which a new PES packet starts
/// (`payload_unit_start_indicator = 1`).
fn collect_pid_stream(buf: &[u8], pid: u16) -> Result<(Vec<u8>, Vec<usize>, Vec<usize>)> {
    let mut logical = Vec::new();
    let mut phys_offsets = Vec::new();
    let mut pusi_positions = Vec::new();

    for packet_start in (0..buf.len()).step_by(TS_PACKET_SIZE) {
        let packet = &buf[packet_start..packet_start + TS_PACKET_SIZE];
        if packet[0] != 0x47 {
            return Err(PackagerError::InvalidConfig("lost TS sync byte".into()));
        }
        let packet_pid = (((packet[1] & 0x1F) as u16) << 8) | packet[2] as u16;
        if packet_pid != pid {
            continue;
        }
        let pusi = packet[1] & 0x40 != 0;
        let afc = (packet[3] >> 4) & 0x3;
        let mut pos = 4usize;
        if afc == 0x2 || afc == 0x3 {
            let af_len = packet[4] as usize;
            pos += 1 + af_len;
        }
        if afc == 0x0 || pos > TS_PACKET_SIZE {
            continue; // no payload
        }
        if pusi {
            pusi_positions.push(logical.len());
        }
        for offset in pos..TS_PACKET_SIZE {
            logical.push(packet[offset]);
            phys_offsets.push(packet_start + offset);
        }
    }
    Ok((logical, phys_offsets, pusi_positions))
}

/// PES header length: fixed 9 bytes (start code + stream id + length +
/// flags + header_data_length) plus `PES_header_data_length`.
fn pes_payload_start(pes: &[u8]) -> usize {
    if pes.len() < 9 {
        return pes.len();
    }
    9 + pes[8] as usize
}

/// Find encrypted byte ranges (in logical-stream coordinates) for H.264
/// Annex-B slice NALs (types 1 and 5): bytes `[nal_start+33, nal_end)`
/// rounded down to a 16-byte multiple, only when the NAL body exceeds 48
/// bytes.
fn find_video_regions(logical: &[u8], pusi_positions: &[usize]) -> Vec<(usize, usize)> {
    let mut regions = Vec::new();
    for (i, &pes_start) in pusi_positions.iter().enumerate() {
        let pes_end = pusi_positions.get(i + 1).copied().unwrap_or(logical.len());
        let pes = &logical[pes_start..pes_end];
        let es_start = pes_start + pes_payload_start(pes);
        let es = &logical[es_start..pes_end];

        let mut nal_starts = Vec::new();
        let mut j = 0usize;
        while j + 3 <= es.len() {
            if es[j] == 0 && es[j + 1] == 0 && es[j + 2] == 1 {
                nal_starts.push(j + 3);
                j += 3;
            } else if j + 4 <= es.len() && es[j] == 0 && es[j + 1] == 0 && es[j + 2] == 0 && es[j + 3] == 1 {
                nal_starts.push(j + 4);
                j += 4;
            } else {
                j += 1;
            }
        }
        for (k, &nal_start) in nal_starts.iter().enumerate() {
            let mut nal_end = nal_starts.get(k + 1).copied().unwrap_or(es.len());
            // back off the trailing start-code prefix already counted in next nal_start
            if k + 1 < nal_starts.len() {
                nal_end = nal_ends_before_start_code(es, nal_end);
            }
            if nal_start >= nal_end {
                continue;
            }
            let nal_type = es[nal_start] & 0x1F;
            let body_len = nal_end - nal_start - 1;
            if (nal_type == 1 || nal_type == 5) && body_len > 48 {
                let clear_start = nal_start + 1 + 32;
                let available = nal_end - clear_start;
                let aligned = (available / BLOCK) * BLOCK;
                if aligned > 0 {
                    let abs_start = es_start + clear_start;
                    regions.push((abs_start, abs_start + aligned));
                }
            }
        }
    }
    regions
}

fn nal_ends_before_start_code(es: &[u8], next_nal_start: usize) -> usize {
    // next_nal_start points just past the start-code of the following NAL;
    // the start code is 3 or 4 bytes.
    if next_nal_start >= 4
        && es[next_nal_start - 4] == 0
        && es[next_nal_start - 3] == 0
        && es[next_nal_start - 2] == 0
        && es[next_nal_start - 1] == 1
    {
        next_nal_start - 4
    } else {
        next_nal_start - 3
    }
}

/// Find encrypted byte ranges for AAC ADTS frames: skip the 7-byte header
/// plus the first 16 bytes of audio data, encrypt the remainder in
/// 16-byte blocks, leave a `< 16` tail unencrypted.
fn find_audio_regions(logical: &[u8], pusi_positions: &[usize]) -> Vec<(usize, usize)> {
    let mut regions = Vec::new();
    for (i, &pes_start) in pusi_positions.iter().enumerate() {
        let pes_end = pusi_positions.get(i + 1).copied().unwrap_or(logical.len());
        let pes = &logical[pes_start..pes_end];
        let es_start = pes_start + pes_payload_start(pes);
        let es = &logical[es_start..pes_end];

        let mut pos = 0usize;
        while pos + 7 <= es.len() {
            if es[pos] != 0xFF || es[pos + 1] & 0xF0 != 0xF0 {
                break;
            }
            let frame_len = (((es[pos + 3] & 0x03) as usize) << 11)
                | ((es[pos + 4] as usize) << 3)
                | ((es[pos + 5] as usize) >> 5);
            if frame_len < 7 || pos + frame_len > es.len() {
                break;
            }
            let clear_start = pos + 7 + 16;
            let frame_end = pos + frame_len;
            if frame_end > clear_start {
                let available = frame_end - clear_start;
                let aligned = (available / BLOCK) * BLOCK;
                if aligned > 0 {
                    let abs_start = es_start + clear_start;
                    regions.push((abs_start, abs_start + aligned));
                }
            }
            pos += frame_len;
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pes_packet(pid: u16, pusi: bool, payload: &[u8], cc: u8) -> Vec<u8> {
        let mut packet = vec![0u8; TS_PACKET_SIZE];
        packet[0] = 0x47;
        packet[1] = (if pusi { 0x40 } else { 0 }) | ((pid >> 8) as u8 & 0x1F);
        packet[2] = (pid & 0xFF) as u8;
        packet[3] = 0x10 | (cc & 0x0F);
        let n = payload.len().min(TS_PACKET_SIZE - 4);
        packet[4..4 + n].copy_from_slice(&payload[..n]);
        for b in &mut packet[4 + n..] {
            *b = 0xFF;
        }
        packet
    }

    fn annex_b_slice_nal(nal_type: u8, body_len: usize) -> Vec<u8> {
        let mut out = vec![0, 0, 0, 1];
        out.push(nal_type); // header byte: forbidden=0, ref_idc=0, type in low 5 bits
        out.extend(std::iter::repeat(0xAB).take(body_len - 1));
        out
    }

    fn build_pes(es_payload: &[u8]) -> Vec<u8> {
        let mut pes = Vec::new();
        pes.extend_from_slice(&[0, 0, 1, 0xE0, 0, 0, 0x80, 0x80, 5]);
        pes.extend_from_slice(&[0x21, 0, 0, 0, 1]); // fake PTS field, 5 bytes
        pes.extend_from_slice(es_payload);
        pes
    }

    #[test]
    fn video_region_skips_header_and_32_clear_bytes() {
        let nal = annex_b_slice_nal(5, 80); // IDR, body 80 > 48
        let pes = build_pes(&nal);
        let packet = minimal_pes_packet(0x100, true, &pes, 0);
        let mut buf = packet;
        // pad to one full packet boundary already satisfied (exactly 188 bytes)
        let key = [1u8; 16];
        let iv = [2u8; 16];
        let before = buf.clone();
        encrypt_ts_segment(&mut buf, &key, &iv, 0x100, 0x101).unwrap();
        assert_eq!(buf.len(), before.len());
        // header bytes (sync, pid, etc.) untouched
        assert_eq!(buf[0], 0x47);
        assert_eq!(&buf[0..4], &before[0..4]);
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let nal = annex_b_slice_nal(1, 80);
        let pes = build_pes(&nal);
        let packet = minimal_pes_packet(0x100, true, &pes, 0);
        let mut buf = packet;
        let original = buf.clone();
        let key = [9u8; 16];
        let iv = [3u8; 16];
        encrypt_ts_segment(&mut buf, &key, &iv, 0x100, 0x101).unwrap();
        assert_ne!(buf, original);
        decrypt_ts_segment(&mut buf, &key, &iv, 0x100, 0x101).unwrap();
        assert_eq!(buf, original);
    }

    #[test]
    fn audio_region_skips_header_and_16_clear_bytes() {
        let mut adts = vec![0xFFu8, 0xF1, 0, 0, 0, 0, 0xFC];
        let frame_len: usize = 7 + 16 + 16; // header + clear + one encrypt block
        adts[3] = ((frame_len >> 11) & 0x03) as u8;
        adts[4] = ((frame_len >> 3) & 0xFF) as u8;
        adts[5] = (((frame_len & 0x7) << 5) as u8) | 0x1F;
        adts.extend(std::iter::repeat(0x55).take(frame_len - 7));
        let pes = build_pes(&adts);
        let packet = minimal_pes_packet(0x101, true, &pes, 0);
        let mut buf = packet;
        let before = buf.clone();
        let key = [4u8; 16];
        let iv = [5u8; 16];
        encrypt_ts_segment(&mut buf, &key, &iv, 0x100, 0x101).unwrap();
        assert_eq!(buf.len(), before.len());
        assert_eq!(&buf[0..4], &before[0..4]);
    }
}
