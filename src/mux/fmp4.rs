//! Fragmented-MP4 Writer — spec §4.2.
//!
//! Emits one init segment (`ftyp` + `moov`) per session and one media
//! segment (`styp` + `moof` + `mdat`) per planned segment. Sequence
//! numbers are 1-based and strictly monotonic. Muxed segments interleave
//! video and audio as two `traf` fragments sharing one `mdat`.

use crate::error::{PackagerError, Result};
use crate::mp4::{SampleInfo, TrackKind};
use crate::mux::boxwriter::*;

#[derive(Debug, Clone)]
pub struct TrackMeta {
    pub track_id: u32,
    pub timescale: u32,
    pub kind: TrackKind,
    /// Raw sample-description entry (header included) copied verbatim
    /// from the source oracle, so `avcC`/`hvcC`/`esds` parameters survive
    /// without being re-derived.
    pub stsd_entry: Vec<u8>,
}

/// One track's samples contributing to a single media segment, plus the
/// concatenated sample bytes (already sliced from the source by offset).
pub struct TrackFragment<'a> {
    pub track_id: u32,
    pub samples: &'a [SampleInfo],
    pub sample_data: &'a [u8],
}

/// A record of where a segment landed when segments are concatenated into
/// a single byte-range output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentByteRange {
    pub offset: u64,
    pub length: u64,
}

pub struct FmP4Writer {
    next_sequence: u32,
}

impl FmP4Writer {
    pub fn new() -> Self {
        Self { next_sequence: 1 }
    }

    pub fn write_init_segment(&self, tracks: &[TrackMeta]) -> Result<Vec<u8>> {
        if tracks.is_empty() {
            return Err(PackagerError::NoMediaTracks);
        }
        let mut out = Vec::new();
        write_box(&mut out, b"ftyp", |b| {
            b.extend_from_slice(b"isom");
            put_u32(b, 512);
            b.extend_from_slice(b"isom");
            b.extend_from_slice(b"iso6");
            b.extend_from_slice(b"mp41");
        });
        write_box(&mut out, b"moov", |b| {
            write_mvhd(b, tracks);
            for t in tracks {
                write_trak(b, t);
            }
            write_mvex(b, tracks);
        });
        Ok(out)
    }

    /// Write one media segment for the given track fragments. Returns the
    /// encoded bytes; the caller is responsible for recording the
    /// `(offset, length)` if concatenating into a single output file.
    pub fn write_media_segment(&mut self, fragments: &[TrackFragment]) -> Result<Vec<u8>> {
        if fragments.is_empty() {
            return Err(PackagerError::InvalidMP4("no track fragments".into()));
        }
        let sequence_number = self.next_sequence;
        self.next_sequence = self
            .next_sequence
            .checked_add(1)
            .ok_or_else(|| PackagerError::InvalidMP4("sequence number overflow".into()))?;

        let mut out = Vec::new();
        write_box(&mut out, b"styp", |b| {
            b.extend_from_slice(b"msdh");
            put_u32(b, 0);
            b.extend_from_slice(b"msdh");
            b.extend_from_slice(b"msix");
        });

        // moof size must be known before computing each traf's data_offset,
        // so render moof first with placeholder offsets, then patch.
        let moof_start_in_out = out.len();
        let mut moof = Vec::new();
        write_box(&mut moof, b"moof", |b| {
            write_mfhd(b, sequence_number);
            for f in fragments {
                write_traf(b, f, 0);
            }
        });
        out.extend_from_slice(&moof);
        let moof_len = moof.len();

        // mdat immediately follows moof; data_offset in each trun is
        // relative to the start of moof, so it equals moof_len + 8 (mdat
        // header) + running offset into mdat.
        let mdat_header_len = 8usize;
        let mut running = moof_len + mdat_header_len;
        let mut data_offsets = Vec::with_capacity(fragments.len());
        for f in fragments {
            data_offsets.push(running as i32);
            running += f.sample_data.len();
        }

        // Re-render moof with the real data_offsets.
        let mut moof2 = Vec::new();
        write_box(&mut moof2, b"moof", |b| {
            write_mfhd(b, sequence_number);
            for (f, off) in fragments.iter().zip(&data_offsets) {
                write_traf(b, f, *off);
            }
        });
        out.truncate(moof_start_in_out);
        out.extend_from_slice(&moof2);

        write_box(&mut out, b"mdat", |b| {
            for f in fragments {
                b.extend_from_slice(f.sample_data);
            }
        });

        Ok(out)
    }
}

fn write_mvhd(b: &mut Vec<u8>, tracks: &[TrackMeta]) {
    write_box(b, b"mvhd", |b| {
        put_full_box_header(b, 0, 0);
        put_u32(b, 0); // creation_time
        put_u32(b, 0); // modification_time
        put_u32(b, 1000); // timescale
        put_u32(b, 0); // duration (fragmented; unknown up front)
        put_u32(b, 0x00010000); // rate 1.0
        put_u16(b, 0x0100); // volume 1.0
        put_u16(b, 0); // reserved
        put_u32(b, 0);
        put_u32(b, 0); // reserved[2]
        // unity matrix
        for v in [0x00010000i32, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000] {
            put_i32(b, v);
        }
        for _ in 0..6 {
            put_u32(b, 0); // pre_defined
        }
        put_u32(b, tracks.last().map(|t| t.track_id).unwrap_or(0) + 1); // next_track_ID
    });
}

fn write_trak(b: &mut Vec<u8>, t: &TrackMeta) {
    write_box(b, b"trak", |b| {
        write_box(b, b"tkhd", |b| {
            put_full_box_header(b, 0, 0x000007); // enabled+in_movie+in_preview
            put_u32(b, 0);
            put_u32(b, 0);
            put_u32(b, t.track_id);
            put_u32(b, 0); // reserved
            put_u32(b, 0); // duration
            put_u64(b, 0); // reserved[2]
            put_u16(b, 0); // layer
            put_u16(b, 0); // alternate_group
            put_u16(b, if t.kind == TrackKind::Audio { 0x0100 } else { 0 });
            put_u16(b, 0);
            for v in [0x00010000i32, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000] {
                put_i32(b, v);
            }
            put_u32(b, 0); // width (fixed-point; 0 when unknown here)
            put_u32(b, 0); // height
        });
        write_box(b, b"mdia", |b| {
            write_box(b, b"mdhd", |b| {
                put_full_box_header(b, 0, 0);
                put_u32(b, 0);
                put_u32(b, 0);
                put_u32(b, t.timescale);
                put_u32(b, 0); // duration
                put_u16(b, 0x55c4); // language 'und'
                put_u16(b, 0);
            });
            write_box(b, b"hdlr", |b| {
                put_full_box_header(b, 0, 0);
                put_u32(b, 0); // pre_defined
                b.extend_from_slice(match t.kind {
                    TrackKind::Video => b"vide",
                    TrackKind::Audio => b"soun",
                    TrackKind::Other => b"meta",
                });
                put_u32(b, 0);
                put_u32(b, 0);
                put_u32(b, 0);
                b.push(0); // empty name, NUL-terminated
            });
            write_box(b, b"minf", |b| {
                match t.kind {
                    TrackKind::Video => write_box(b, b"vmhd", |b| {
                        put_full_box_header(b, 0, 1);
                        put_u16(b, 0);
                        put_u16(b, 0);
                        put_u16(b, 0);
                        put_u16(b, 0);
                    }),
                    _ => write_box(b, b"smhd", |b| {
                        put_full_box_header(b, 0, 0);
                        put_u16(b, 0);
                        put_u16(b, 0);
                    }),
                }
                write_box(b, b"dinf", |b| {
                    write_box(b, b"dref", |b| {
                        put_full_box_header(b, 0, 0);
                        put_u32(b, 1);
                        write_box(b, b"url ", |b| {
                            put_full_box_header(b, 0, 1);
                        });
                    });
                });
                write_box(b, b"stbl", |b| {
                    write_box(b, b"stsd", |b| {
                        put_full_box_header(b, 0, 0);
                        put_u32(b, 1);
                        b.extend_from_slice(&t.stsd_entry);
                    });
                    write_box(b, b"stts", |b| {
                        put_full_box_header(b, 0, 0);
                        put_u32(b, 0);
                    });
                    write_box(b, b"stsc", |b| {
                        put_full_box_header(b, 0, 0);
                        put_u32(b, 0);
                    });
                    write_box(b, b"stsz", |b| {
                        put_full_box_header(b, 0, 0);
                        put_u32(b, 0);
                        put_u32(b, 0);
                    });
                    write_box(b, b"stco", |b| {
                        put_full_box_header(b, 0, 0);
                        put_u32(b, 0);
                    });
                });
            });
        });
    });
}

fn write_mvex(b: &mut Vec<u8>, tracks: &[TrackMeta]) {
    write_box(b, b"mvex", |b| {
        for t in tracks {
            write_box(b, b"trex", |b| {
                put_full_box_header(b, 0, 0);
                put_u32(b, t.track_id);
                put_u32(b, 1); // default_sample_description_index
                put_u32(b, 0); // default_sample_duration
                put_u32(b, 0); // default_sample_size
                put_u32(b, 0); // default_sample_flags
            });
        }
    });
}

fn write_mfhd(b: &mut Vec<u8>, sequence_number: u32) {
    write_box(b, b"mfhd", |b| {
        put_full_box_header(b, 0, 0);
        put_u32(b, sequence_number);
    });
}

/// `trun` sample flags: non-key frames get the "not sync sample" bit;
/// sync samples are marked fully independent/non-redundant.
fn sample_flags(is_sync: bool) -> u32 {
    if is_sync {
        0x0200_0000
    } else {
        0x0101_0000
    }
}

fn write_traf(b: &mut Vec<u8>, f: &TrackFragment, data_offset: i32) {
    write_box(b, b"traf", |b| {
        write_box(b, b"tfhd", |b| {
            // flags: default-base-is-moof
            put_full_box_header(b, 0, 0x020000);
            put_u32(b, f.track_id);
        });
        write_box(b, b"tfdt", |b| {
            put_full_box_header(b, 1, 0);
            let base_dts = f.samples.first().map(|s| s.dts).unwrap_or(0);
            put_u64(b, base_dts as u64);
        });
        write_box(b, b"trun", |b| {
            // flags: data-offset-present | sample-duration | sample-size |
            // sample-flags | sample-composition-time-offsets
            put_full_box_header(b, 1, 0x000F01);
            put_u32(b, f.samples.len() as u32);
            put_i32(b, data_offset);
            for s in f.samples {
                put_u32(b, s.duration);
                put_u32(b, s.size);
                put_u32(b, sample_flags(s.is_sync));
                put_i32(b, (s.pts - s.dts) as i32);
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::SampleInfo;

    fn meta(track_id: u32) -> TrackMeta {
        TrackMeta {
            track_id,
            timescale: 30,
            kind: TrackKind::Video,
            stsd_entry: vec![0u8; 16],
        }
    }

    #[test]
    fn init_segment_starts_with_ftyp_then_moov() {
        let writer = FmP4Writer::new();
        let out = writer.write_init_segment(&[meta(1)]).unwrap();
        assert_eq!(&out[4..8], b"ftyp");
        let ftyp_len = u32::from_be_bytes(out[0..4].try_into().unwrap()) as usize;
        assert_eq!(&out[ftyp_len + 4..ftyp_len + 8], b"moov");
    }

    #[test]
    fn media_segment_sequence_numbers_increment() {
        let mut writer = FmP4Writer::new();
        let samples = vec![SampleInfo {
            file_offset: 0,
            size: 4,
            dts: 0,
            pts: 0,
            duration: 30,
            is_sync: true,
        }];
        let data = [1u8, 2, 3, 4];
        let frag = TrackFragment {
            track_id: 1,
            samples: &samples,
            sample_data: &data,
        };
        let seg1 = writer.write_media_segment(&[frag]).unwrap();
        let frag2 = TrackFragment {
            track_id: 1,
            samples: &samples,
            sample_data: &data,
        };
        let seg2 = writer.write_media_segment(&[frag2]).unwrap();
        assert_eq!(&seg1[4..8], b"styp");
        // sequence numbers are encoded inside moof/mfhd; just assert writer advanced
        assert_eq!(writer.next_sequence, 3);
        assert_ne!(seg1, seg2);
    }
}
