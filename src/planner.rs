//! Segment Planner — spec §4.1.
//!
//! Groups a track's samples into segments bounded by keyframes and a
//! target duration, and produces the audio-aligned companion segmentation
//! for muxed output.

use crate::mp4::SampleInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    pub first_sample: usize,
    pub sample_count: usize,
    pub duration: u64,
}

/// Plan segments over `samples` (already in DTS order) so that every
/// segment but the last begins at a sync sample and has duration ≥
/// `target_duration_ticks` unless it is the final tail. A sync sample
/// landing exactly at the target closes the current segment (a tie).
pub fn plan_segments(samples: &[SampleInfo], timescale: u32, target_duration: f64) -> Vec<SegmentInfo> {
    if samples.is_empty() {
        return Vec::new();
    }
    let target_ticks = (target_duration * timescale as f64).round() as u64;

    let mut out = Vec::new();
    let mut seg_start = 0usize;
    let mut seg_duration: u64 = 0;

    for i in 0..samples.len() {
        seg_duration += samples[i].duration as u64;
        let next_is_sync = samples.get(i + 1).map(|s| s.is_sync).unwrap_or(false);
        let is_last = i + 1 == samples.len();

        if is_last {
            out.push(SegmentInfo {
                first_sample: seg_start,
                sample_count: i + 1 - seg_start,
                duration: seg_duration,
            });
            break;
        }

        if seg_duration >= target_ticks && next_is_sync {
            out.push(SegmentInfo {
                first_sample: seg_start,
                sample_count: i + 1 - seg_start,
                duration: seg_duration,
            });
            seg_start = i + 1;
            seg_duration = 0;
        }
    }
    out
}

/// Given a video segment `[a_v, b_v)` expressed in the video track's
/// timescale, find the smallest prefix of `audio_samples` (in the audio
/// track's own timescale) whose DTS range, rescaled into video-timescale
/// units, fully covers `[a_v, b_v)`.
pub fn plan_audio_aligned_segment(
    audio_samples: &[SampleInfo],
    audio_timescale: u32,
    video_range: (u64, u64),
    video_timescale: u32,
    start_from: usize,
) -> SegmentInfo {
    let (a_v, b_v) = video_range;
    let rescale = |dts: i64| -> i64 {
        ((dts as i128 * video_timescale as i128) / audio_timescale as i128) as i64
    };

    let mut i = start_from;
    // advance to the first audio sample covering a_v
    while i < audio_samples.len() {
        let end_v = rescale(audio_samples[i].dts + audio_samples[i].duration as i64);
        if end_v as u64 > a_v || i + 1 == audio_samples.len() {
            break;
        }
        i += 1;
    }
    let first_sample = i;
    let mut count = 0usize;
    let mut duration_ticks = 0u64;
    while i < audio_samples.len() {
        duration_ticks += audio_samples[i].duration as u64;
        count += 1;
        let covered_v = rescale(audio_samples[i].dts + audio_samples[i].duration as i64) as u64;
        i += 1;
        if covered_v >= b_v {
            break;
        }
    }
    SegmentInfo {
        first_sample,
        sample_count: count,
        duration: duration_ticks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dts: i64, duration: u32, is_sync: bool) -> SampleInfo {
        SampleInfo {
            file_offset: 0,
            size: 100,
            dts,
            pts: dts,
            duration,
            is_sync,
        }
    }

    #[test]
    fn splits_at_sync_samples_past_target() {
        // 30fps, timescale 30, 2s keyframe interval (60 samples/GOP), 6s target.
        let mut samples = Vec::new();
        let mut dts = 0i64;
        for gop in 0..4 {
            for f in 0..60u32 {
                samples.push(sample(dts, 1, f == 0));
                dts += 1;
                let _ = gop;
            }
        }
        let segs = plan_segments(&samples, 30, 6.0);
        // GOPs land every 2s; 6s target closes every 3rd GOP boundary (180 ticks)
        assert_eq!(segs.len(), 4 / 3 + if 4 % 3 != 0 { 1 } else { 0 });
        assert!(segs.iter().all(|s| s.first_sample % 60 == 0));
        let total: usize = segs.iter().map(|s| s.sample_count).sum();
        assert_eq!(total, samples.len());
    }

    #[test]
    fn final_segment_is_tail_even_if_short() {
        let samples = vec![sample(0, 30, true), sample(30, 30, true), sample(60, 5, true)];
        let segs = plan_segments(&samples, 30, 1.0);
        assert_eq!(segs.last().unwrap().sample_count, 1);
        let total: usize = segs.iter().map(|s| s.sample_count).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn audio_segment_covers_full_video_range() {
        let audio_timescale = 48000u32;
        let video_timescale = 30u32;
        // 1024-sample AAC frames ~ 21.3ms each
        let mut audio = Vec::new();
        let mut dts = 0i64;
        for _ in 0..100 {
            audio.push(sample(dts, 1024, true));
            dts += 1024;
        }
        // video segment spanning 2 seconds = 60 ticks @30fps
        let seg = plan_audio_aligned_segment(&audio, audio_timescale, (0, 60), video_timescale, 0);
        let covered_v = ((audio[seg.first_sample + seg.sample_count - 1].dts
            + audio[seg.first_sample + seg.sample_count - 1].duration as i64) as i128
            * video_timescale as i128
            / audio_timescale as i128) as u64;
        assert!(covered_v >= 60);
    }
}
