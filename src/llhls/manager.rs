//! LLHLSManager — spec §4.6.2.
//!
//! Single-writer actor: all mutation flows through `&mut self` methods and
//! the owning task is expected to serialize calls the way the teacher's
//! ingress handlers serialize access to connection state. Events are
//! published on an unbounded channel so subscribers (push engine, metrics)
//! never block the publisher.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use crate::error::{PackagerError, Result, Violation};
use crate::llhls::blocking::BlockingPlaylistHandler;
use crate::llhls::delta::DeltaUpdateGenerator;
use crate::llhls::event::LLHLSEvent;
use crate::llhls::partial::PartialSegmentManager;
use crate::types::{
    LiveSegment, MediaPlaylist, PartialSegment, PreloadHint, PreloadHintType, Segment,
    ServerControlConfig,
};

struct CompletedSegment {
    segment: Segment,
    duration: f64,
}

pub struct LLHLSManager {
    partials: PartialSegmentManager,
    delta: Option<DeltaUpdateGenerator>,
    segment_target_duration: f64,
    part_target_duration: f64,
    server_control: ServerControlConfig,
    retained_segments: VecDeque<CompletedSegment>,
    max_retained_segments: usize,
    media_sequence: u64,
    discontinuity_sequence: u64,
    ended: bool,
    rendition_reports: Vec<crate::types::RenditionReport>,
    events_tx: UnboundedSender<LLHLSEvent>,
}

impl LLHLSManager {
    pub fn new(
        segment_target_duration: f64,
        part_target_duration: f64,
        max_partials_per_segment: u32,
        max_retained_segments: usize,
        server_control: ServerControlConfig,
        delta_enabled: bool,
    ) -> (Self, UnboundedReceiver<LLHLSEvent>) {
        let (events_tx, events_rx) = unbounded_channel();
        let delta = delta_enabled.then(|| DeltaUpdateGenerator::new(server_control.can_skip_until));
        let manager = Self {
            partials: PartialSegmentManager::new(
                part_target_duration,
                max_retained_segments,
                max_partials_per_segment,
            ),
            delta,
            segment_target_duration,
            part_target_duration,
            server_control,
            retained_segments: VecDeque::new(),
            max_retained_segments,
            media_sequence: 0,
            discontinuity_sequence: 0,
            ended: false,
            rendition_reports: Vec::new(),
            events_tx,
        };
        (manager, events_rx)
    }

    /// Construct the manager behind a shared `Arc<Mutex<_>>` together with
    /// a [`BlockingPlaylistHandler`] holding a weak, lookup-only reference
    /// to it, per spec §9's design note on resolving blocking reload
    /// requests against live manager state. The owning task locks `shared`
    /// to mutate it and calls `handler.notify(..)` afterwards to resolve
    /// any waiters the mutation satisfied.
    pub fn new_shared(
        segment_target_duration: f64,
        part_target_duration: f64,
        max_partials_per_segment: u32,
        max_retained_segments: usize,
        server_control: ServerControlConfig,
        delta_enabled: bool,
        blocking_timeout_secs: f64,
    ) -> (Arc<Mutex<Self>>, BlockingPlaylistHandler, UnboundedReceiver<LLHLSEvent>) {
        let (manager, events_rx) = Self::new(
            segment_target_duration,
            part_target_duration,
            max_partials_per_segment,
            max_retained_segments,
            server_control,
            delta_enabled,
        );
        let shared = Arc::new(Mutex::new(manager));
        let handler = BlockingPlaylistHandler::new(blocking_timeout_secs, Arc::downgrade(&shared));
        (shared, handler, events_rx)
    }

    fn check_not_ended(&self) -> Result<()> {
        if self.ended {
            Err(PackagerError::StreamAlreadyEnded)
        } else {
            Ok(())
        }
    }

    pub fn add_partial(&mut self, part: PartialSegment) -> Result<Option<Violation>> {
        self.check_not_ended()?;
        let (entry, violation) = self.partials.add_partial(part)?;
        let _ = self.events_tx.send(LLHLSEvent::PartialAdded(entry));
        let hint = self.partials.next_partial_hint();
        let _ = self.events_tx.send(LLHLSEvent::PreloadHintUpdated(PreloadHint {
            hint_type: PreloadHintType::Part,
            uri: format!("seg{}.{}.mp4", hint.segment_index, hint.partial_index),
            byte_range_start: None,
            byte_range_length: None,
        }));
        Ok(violation)
    }

    /// Freeze the current in-progress partials into `segment` and advance
    /// LL-HLS bookkeeping. `segment.partials` is overwritten with the
    /// manager's own record of the segment's completed partials.
    pub fn complete_segment(&mut self, mut segment: Segment, live: LiveSegment) -> Result<()> {
        self.check_not_ended()?;
        let completed_partials: Vec<PartialSegment> = self
            .partials
            .current_partials()
            .iter()
            .map(|p| p.part.clone())
            .collect();
        segment.partials = completed_partials;
        if segment.discontinuity {
            self.discontinuity_sequence += 1;
        }

        self.partials.complete_segment();
        self.retained_segments.push_back(CompletedSegment {
            segment,
            duration: live.duration,
        });
        while self.retained_segments.len() > self.max_retained_segments {
            self.retained_segments.pop_front();
            self.media_sequence += 1;
        }

        let _ = self.events_tx.send(LLHLSEvent::SegmentCompleted(live));
        Ok(())
    }

    fn target_duration(&self) -> u32 {
        let longest = self
            .retained_segments
            .iter()
            .map(|s| s.duration)
            .fold(self.segment_target_duration, f64::max);
        longest.ceil() as u32
    }

    fn base_playlist(&self) -> MediaPlaylist {
        let current_partials: Vec<PartialSegment> = self
            .partials
            .current_partials()
            .iter()
            .map(|p| p.part.clone())
            .collect();
        let preload_hint = {
            let hint = self.partials.next_partial_hint();
            PreloadHint {
                hint_type: PreloadHintType::Part,
                uri: format!("seg{}.{}.mp4", hint.segment_index, hint.partial_index),
                byte_range_start: None,
                byte_range_length: None,
            }
        };
        MediaPlaylist {
            version: 9,
            target_duration: self.target_duration(),
            media_sequence: self.media_sequence,
            discontinuity_sequence: self.discontinuity_sequence,
            playlist_type: None,
            has_endlist: self.ended,
            independent_segments: true,
            segments: self.retained_segments.iter().map(|s| s.segment.clone()).collect(),
            part_target_duration: Some(self.part_target_duration),
            server_control: Some(self.server_control),
            partial_segments: current_partials,
            preload_hints: if self.ended { Vec::new() } else { vec![preload_hint] },
            rendition_reports: self.rendition_reports.clone(),
            skip: None,
        }
    }

    pub fn render_playlist(&self) -> String {
        crate::playlist::render_media_playlist(&self.base_playlist())
    }

    pub fn render_delta_playlist(&self, skip_request: bool) -> String {
        if !skip_request {
            return self.render_playlist();
        }
        match &self.delta {
            Some(delta) => {
                let durations: Vec<f64> = self.retained_segments.iter().map(|s| s.duration).collect();
                match delta.skippable_count(&durations, self.target_duration() as f64) {
                    Some(n) if n > 0 => {
                        let mut pl = self.base_playlist();
                        pl.skip = Some(crate::types::SkipTag {
                            skipped_segments: n as u64,
                            recently_removed_dateranges: false,
                        });
                        pl.segments.drain(0..n);
                        crate::playlist::render_media_playlist(&pl)
                    }
                    _ => self.render_playlist(),
                }
            }
            None => self.render_playlist(),
        }
    }

    pub fn end_stream(&mut self) -> Result<()> {
        self.check_not_ended()?;
        self.ended = true;
        let _ = self.events_tx.send(LLHLSEvent::StreamEnded);
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn latest_media_sequence(&self) -> u64 {
        self.media_sequence + self.retained_segments.len() as u64
    }

    pub fn latest_partial_index(&self) -> Option<u32> {
        let count = self.partials.current_partial_count();
        if count == 0 {
            None
        } else {
            Some(count - 1)
        }
    }

    pub fn set_rendition_reports(&mut self, reports: Vec<crate::types::RenditionReport>) {
        self.rendition_reports = reports;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sc() -> ServerControlConfig {
        ServerControlConfig {
            can_block_reload: true,
            hold_back: Some(3.0),
            part_hold_back: Some(1.0),
            can_skip_until: None,
            can_skip_date_ranges: false,
        }
    }

    fn live(index: u64) -> LiveSegment {
        LiveSegment {
            index,
            data: Vec::new(),
            duration: 2.0,
            timestamp: Utc::now(),
            is_independent: true,
            discontinuity: false,
            program_date_time: None,
            filename: format!("seg{index}.mp4"),
            frame_count: 1,
            codecs: vec!["avc1".into()],
        }
    }

    fn seg(uri: &str, discontinuity: bool) -> Segment {
        Segment {
            duration: 2.0,
            uri: uri.into(),
            title: None,
            byte_range: None,
            key: None,
            map: None,
            program_date_time: None,
            discontinuity,
            is_gap: false,
            bitrate: None,
            partials: Vec::new(),
        }
    }

    #[test]
    fn mutation_after_end_stream_fails() {
        let (mut mgr, _rx) = LLHLSManager::new(2.0, 0.5, 4, 3, sc(), false);
        mgr.end_stream().unwrap();
        let err = mgr
            .add_partial(PartialSegment {
                uri: "p.mp4".into(),
                duration: 0.4,
                independent: true,
                byte_range: None,
                is_gap: false,
            })
            .unwrap_err();
        assert!(matches!(err, PackagerError::StreamAlreadyEnded));
    }

    #[test]
    fn discontinuity_sequence_increments_on_discontinuous_segment() {
        let (mut mgr, _rx) = LLHLSManager::new(2.0, 0.5, 4, 3, sc(), false);
        mgr.complete_segment(seg("seg0.mp4", false), live(0)).unwrap();
        mgr.complete_segment(seg("seg1.mp4", true), live(1)).unwrap();
        assert_eq!(mgr.discontinuity_sequence, 1);
    }

    #[test]
    fn media_sequence_increments_only_on_eviction() {
        let (mut mgr, _rx) = LLHLSManager::new(2.0, 0.5, 4, 2, sc(), false);
        for i in 0..4 {
            mgr.complete_segment(seg(&format!("seg{i}.mp4"), false), live(i)).unwrap();
        }
        assert_eq!(mgr.media_sequence, 2);
    }
}
