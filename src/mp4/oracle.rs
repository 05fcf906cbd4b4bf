//! The `MediaSource` oracle: per-track codec id, timescale, sample
//! description payload, and per-sample `(file_offset, size, dts, pts,
//! duration, is_sync)` (spec §2 step 1, §9 "MediaSource").
//!
//! This is external/plumbing per spec §1; the concrete `Mp4File` below
//! walks real ISO-BMFF boxes so the planner/writers/extractor have genuine
//! numbers to operate on, but is not the focus of engineering effort.

use crate::error::{PackagerError, Result};
use crate::mp4::boxes::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
    Other,
}

/// One decoded sample's position and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub file_offset: u64,
    pub size: u32,
    pub dts: i64,
    pub pts: i64,
    pub duration: u32,
    pub is_sync: bool,
}

#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_id: u32,
    pub kind: TrackKind,
    pub timescale: u32,
    /// Raw bytes of the single sample-description entry payload (the
    /// content of `stsd`'s entry, header included) used by the codec
    /// config extractor.
    pub sample_description: Vec<u8>,
    pub samples: Vec<SampleInfo>,
}

impl TrackInfo {
    pub fn duration_in_seconds(&self) -> f64 {
        let total: u64 = self.samples.iter().map(|s| s.duration as u64).sum();
        total as f64 / self.timescale as f64
    }
}

/// Aggregated boxes/file info exposed by the oracle (spec §3 `MP4Analysis`).
#[derive(Debug, Clone)]
pub struct MP4Analysis {
    pub tracks: Vec<TrackInfo>,
}

/// The external media-source capability (spec §9 design notes).
pub trait MediaSource {
    fn analyze(&self) -> Result<MP4Analysis>;
}

const FTYP: [u8; 4] = *b"ftyp";
const MOOV: [u8; 4] = *b"moov";
const TRAK: [u8; 4] = *b"trak";
const TKHD: [u8; 4] = *b"tkhd";
const MDIA: [u8; 4] = *b"mdia";
const MDHD: [u8; 4] = *b"mdhd";
const HDLR: [u8; 4] = *b"hdlr";
const MINF: [u8; 4] = *b"minf";
const STBL: [u8; 4] = *b"stbl";
const STSD: [u8; 4] = *b"stsd";
const STTS: [u8; 4] = *b"stts";
const CTTS: [u8; 4] = *b"ctts";
const STSZ: [u8; 4] = *b"stsz";
const STSC: [u8; 4] = *b"stsc";
const STCO: [u8; 4] = *b"stco";
const CO64: [u8; 4] = *b"co64";
const STSS: [u8; 4] = *b"stss";

/// A source MP4 loaded fully into memory, parsed on demand.
pub struct Mp4File {
    data: Vec<u8>,
}

impl Mp4File {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    fn top_level_boxes(&self) -> Result<Vec<BoxHeader>> {
        iter_boxes(&self.data, 0, self.data.len())
    }

    /// Concatenate the raw sample bytes for `samples` (in order) out of
    /// the source file, for handing to a container writer's fragment.
    pub fn sample_bytes(&self, samples: &[SampleInfo]) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples.iter().map(|s| s.size as usize).sum());
        for s in samples {
            let start = s.file_offset as usize;
            let end = start + s.size as usize;
            out.extend_from_slice(&self.data[start..end]);
        }
        out
    }
}

impl MediaSource for Mp4File {
    fn analyze(&self) -> Result<MP4Analysis> {
        let top = self.top_level_boxes()?;
        if find_box(&top, &FTYP).is_none() {
            return Err(PackagerError::InvalidMP4("missing ftyp box".into()));
        }
        let moov = find_box(&top, &MOOV)
            .ok_or_else(|| PackagerError::InvalidMP4("missing moov box".into()))?;
        let trak_boxes: Vec<BoxHeader> = iter_boxes(&self.data, moov.payload_start, moov.payload_end)?
            .into_iter()
            .filter(|b| b.is(&TRAK))
            .collect();
        if trak_boxes.is_empty() {
            return Err(PackagerError::NoMediaTracks);
        }
        let mut tracks = Vec::new();
        for trak in &trak_boxes {
            if let Some(t) = self.parse_track(trak)? {
                tracks.push(t);
            }
        }
        if tracks.is_empty() {
            return Err(PackagerError::NoMediaTracks);
        }
        Ok(MP4Analysis { tracks })
    }
}

impl Mp4File {
    fn parse_track(&self, trak: &BoxHeader) -> Result<Option<TrackInfo>> {
        let data = &self.data;
        let trak_children = iter_boxes(data, trak.payload_start, trak.payload_end)?;
        let tkhd = find_box(&trak_children, &TKHD)
            .ok_or_else(|| PackagerError::InvalidMP4("missing tkhd".into()))?;
        let track_id = self.read_tkhd_track_id(tkhd)?;

        let mdia = find_box(&trak_children, &MDIA)
            .ok_or_else(|| PackagerError::InvalidMP4("missing mdia".into()))?;
        let mdia_children = iter_boxes(data, mdia.payload_start, mdia.payload_end)?;

        let mdhd = find_box(&mdia_children, &MDHD)
            .ok_or_else(|| PackagerError::InvalidMP4("missing mdhd".into()))?;
        let timescale = self.read_mdhd_timescale(mdhd)?;

        let kind = find_box(&mdia_children, &HDLR)
            .map(|h| self.read_hdlr_kind(h))
            .transpose()?
            .unwrap_or(TrackKind::Other);

        let (stbl_start, stbl_end) = descend(data, mdia.payload_start, mdia.payload_end, &[&MINF, &STBL])?
            .ok_or_else(|| PackagerError::InvalidMP4("missing minf/stbl".into()))?;
        let stbl_children = iter_boxes(data, stbl_start, stbl_end)?;

        let stsd = find_box(&stbl_children, &STSD)
            .ok_or_else(|| PackagerError::InvalidMP4("missing stsd".into()))?;
        let sample_description = self.read_first_stsd_entry(stsd)?;

        let stts = find_box(&stbl_children, &STTS);
        let ctts = find_box(&stbl_children, &CTTS);
        let stsz = find_box(&stbl_children, &STSZ);
        let stsc = find_box(&stbl_children, &STSC);
        let stco = find_box(&stbl_children, &STCO);
        let co64 = find_box(&stbl_children, &CO64);
        let stss = find_box(&stbl_children, &STSS);

        let (Some(stts), Some(stsz), Some(stsc)) = (stts, stsz, stsc) else {
            return Ok(None);
        };
        if stco.is_none() && co64.is_none() {
            return Ok(None);
        }

        let durations = self.read_stts(stts)?;
        let ctts_offsets = ctts.map(|b| self.read_ctts(b)).transpose()?;
        let sizes = self.read_stsz(stsz)?;
        let chunk_offsets = if let Some(b) = stco {
            self.read_stco(b)?
        } else {
            self.read_co64(co64.unwrap())?
        };
        let samples_per_chunk = self.read_stsc(stsc, chunk_offsets.len())?;
        let sync_samples = stss.map(|b| self.read_stss(b)).transpose()?;

        let samples = build_sample_table(
            &durations,
            ctts_offsets.as_deref(),
            &sizes,
            &chunk_offsets,
            &samples_per_chunk,
            sync_samples.as_deref(),
        )?;

        Ok(Some(TrackInfo {
            track_id,
            kind,
            timescale,
            sample_description,
            samples,
        }))
    }

    fn read_tkhd_track_id(&self, b: &BoxHeader) -> Result<u32> {
        let version = read_u8(&self.data, b.payload_start)?;
        let id_offset = if version == 1 {
            b.payload_start + 4 + 8 + 8 + 4
        } else {
            b.payload_start + 4 + 4 + 4 + 4
        };
        read_u32(&self.data, id_offset)
    }

    fn read_mdhd_timescale(&self, b: &BoxHeader) -> Result<u32> {
        let version = read_u8(&self.data, b.payload_start)?;
        let ts_offset = if version == 1 {
            b.payload_start + 4 + 8 + 8
        } else {
            b.payload_start + 4 + 4 + 4
        };
        let ts = read_u32(&self.data, ts_offset)?;
        if ts == 0 {
            return Err(PackagerError::InvalidMP4("zero timescale".into()));
        }
        Ok(ts)
    }

    fn read_hdlr_kind(&self, b: &BoxHeader) -> Result<TrackKind> {
        // full box header (4) + pre_defined (4) + handler_type (4)
        let ht = read4(&self.data, b.payload_start + 8)?;
        Ok(match &ht {
            b"vide" => TrackKind::Video,
            b"soun" => TrackKind::Audio,
            _ => TrackKind::Other,
        })
    }

    /// Returns the first sample entry's full bytes (header + payload),
    /// which the codec config extractor parses per its own offsets.
    fn read_first_stsd_entry(&self, stsd: &BoxHeader) -> Result<Vec<u8>> {
        // full box header(4) + entry_count(4)
        let entries_start = stsd.payload_start + 8;
        if entries_start > stsd.payload_end {
            return Err(PackagerError::InvalidMP4("truncated stsd".into()));
        }
        let entry_size = read_u32(&self.data, entries_start)? as usize;
        let entry_end = entries_start
            .checked_add(entry_size)
            .ok_or_else(|| PackagerError::InvalidMP4("stsd entry overflow".into()))?;
        if entry_end > stsd.payload_end {
            return Err(PackagerError::InvalidMP4("stsd entry extends past box".into()));
        }
        Ok(slice(&self.data, entries_start, entry_end)?.to_vec())
    }

    fn read_stts(&self, b: &BoxHeader) -> Result<Vec<(u32, u32)>> {
        let mut pos = b.payload_start + 4;
        let count = read_u32(&self.data, pos)?;
        pos += 4;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let sample_count = read_u32(&self.data, pos)?;
            let sample_delta = read_u32(&self.data, pos + 4)?;
            out.push((sample_count, sample_delta));
            pos += 8;
        }
        Ok(out)
    }

    fn read_ctts(&self, b: &BoxHeader) -> Result<Vec<(u32, i32)>> {
        let mut pos = b.payload_start + 4;
        let count = read_u32(&self.data, pos)?;
        pos += 4;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let sample_count = read_u32(&self.data, pos)?;
            let offset = read_u32(&self.data, pos + 4)? as i32;
            out.push((sample_count, offset));
            pos += 8;
        }
        Ok(out)
    }

    fn read_stsz(&self, b: &BoxHeader) -> Result<Vec<u32>> {
        let mut pos = b.payload_start + 4;
        let sample_size = read_u32(&self.data, pos)?;
        pos += 4;
        let count = read_u32(&self.data, pos)?;
        pos += 4;
        if sample_size != 0 {
            return Ok(vec![sample_size; count as usize]);
        }
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(read_u32(&self.data, pos)?);
            pos += 4;
        }
        Ok(out)
    }

    fn read_stco(&self, b: &BoxHeader) -> Result<Vec<u64>> {
        let mut pos = b.payload_start + 4;
        let count = read_u32(&self.data, pos)?;
        pos += 4;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(read_u32(&self.data, pos)? as u64);
            pos += 4;
        }
        Ok(out)
    }

    fn read_co64(&self, b: &BoxHeader) -> Result<Vec<u64>> {
        let mut pos = b.payload_start + 4;
        let count = read_u32(&self.data, pos)?;
        pos += 4;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(read_u64(&self.data, pos)?);
            pos += 8;
        }
        Ok(out)
    }

    /// Expands `stsc` into "samples in chunk #i" for every chunk, given the
    /// total chunk count from `stco`/`co64`.
    fn read_stsc(&self, b: &BoxHeader, chunk_count: usize) -> Result<Vec<u32>> {
        let mut pos = b.payload_start + 4;
        let count = read_u32(&self.data, pos)?;
        pos += 4;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let first_chunk = read_u32(&self.data, pos)?;
            let samples_per_chunk = read_u32(&self.data, pos + 4)?;
            entries.push((first_chunk, samples_per_chunk));
            pos += 12;
        }
        let mut out = vec![0u32; chunk_count];
        for (i, (first_chunk, _)) in entries.iter().enumerate() {
            let samples_per_chunk = entries[i].1;
            let next_first_chunk = entries
                .get(i + 1)
                .map(|e| e.0)
                .unwrap_or(chunk_count as u32 + 1);
            let mut chunk = *first_chunk;
            while chunk < next_first_chunk && (chunk as usize) <= chunk_count {
                if chunk >= 1 {
                    out[chunk as usize - 1] = samples_per_chunk;
                }
                chunk += 1;
            }
        }
        Ok(out)
    }

    fn read_stss(&self, b: &BoxHeader) -> Result<Vec<u32>> {
        let mut pos = b.payload_start + 4;
        let count = read_u32(&self.data, pos)?;
        pos += 4;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(read_u32(&self.data, pos)?);
            pos += 4;
        }
        Ok(out)
    }
}

/// Assembles the per-sample table from the decoded stbl sub-tables.
/// Sample numbers in `stss` are 1-based.
fn build_sample_table(
    durations: &[(u32, u32)],
    ctts: Option<&[(u32, i32)]>,
    sizes: &[u32],
    chunk_offsets: &[u64],
    samples_per_chunk: &[u32],
    sync_samples: Option<&[u32]>,
) -> Result<Vec<SampleInfo>> {
    let total_samples = sizes.len();
    let mut durations_flat = Vec::with_capacity(total_samples);
    for (count, delta) in durations {
        for _ in 0..*count {
            durations_flat.push(*delta);
        }
    }
    let mut ctts_flat = Vec::with_capacity(total_samples);
    if let Some(ctts) = ctts {
        for (count, off) in ctts {
            for _ in 0..*count {
                ctts_flat.push(*off);
            }
        }
    }

    let mut offsets = Vec::with_capacity(total_samples);
    let mut sample_idx = 0usize;
    for (chunk_idx, &chunk_offset) in chunk_offsets.iter().enumerate() {
        let n = *samples_per_chunk.get(chunk_idx).unwrap_or(&0) as usize;
        let mut running = chunk_offset;
        for _ in 0..n {
            if sample_idx >= total_samples {
                break;
            }
            offsets.push(running);
            running += *sizes.get(sample_idx).unwrap_or(&0) as u64;
            sample_idx += 1;
        }
    }

    if offsets.len() != total_samples || durations_flat.len() != total_samples {
        return Err(PackagerError::InvalidMP4(
            "sample table component length mismatch".into(),
        ));
    }

    let sync_set: Option<std::collections::HashSet<u32>> =
        sync_samples.map(|v| v.iter().copied().collect());

    let mut out = Vec::with_capacity(total_samples);
    let mut dts: i64 = 0;
    for i in 0..total_samples {
        let duration = durations_flat[i];
        let cts = ctts_flat.get(i).copied().unwrap_or(0) as i64;
        let is_sync = match &sync_set {
            Some(set) => set.contains(&((i as u32) + 1)),
            None => true, // absence of stss means every sample is a sync sample
        };
        out.push(SampleInfo {
            file_offset: offsets[i],
            size: sizes[i],
            dts,
            pts: dts + cts,
            duration,
            is_sync,
        });
        dts += duration as i64;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stsc_expansion_single_entry() {
        // 3 chunks, one stsc entry: first_chunk=1, samples_per_chunk=4
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0, 0, 0, 0]); // version/flags
        buf.extend_from_slice(&1u32.to_be_bytes()); // entry_count
        buf.extend_from_slice(&1u32.to_be_bytes()); // first_chunk
        buf.extend_from_slice(&4u32.to_be_bytes()); // samples_per_chunk
        buf.extend_from_slice(&1u32.to_be_bytes()); // sample_description_index
        let header = BoxHeader {
            box_type: *b"stsc",
            payload_start: 0,
            payload_end: buf.len(),
        };
        let file = Mp4File { data: buf };
        let out = file.read_stsc(&header, 3).unwrap();
        assert_eq!(out, vec![4, 4, 4]);
    }

    #[test]
    fn sample_table_dts_accumulates() {
        let durations = vec![(3u32, 1000u32)];
        let sizes = vec![100u32, 100, 100];
        let chunk_offsets = vec![0u64];
        let samples_per_chunk = vec![3u32];
        let samples = build_sample_table(&durations, None, &sizes, &chunk_offsets, &samples_per_chunk, None).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].dts, 0);
        assert_eq!(samples[1].dts, 1000);
        assert_eq!(samples[2].dts, 2000);
        assert!(samples.iter().all(|s| s.is_sync));
    }
}
