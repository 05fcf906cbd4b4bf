//! Partial Segment Manager — spec §4.6.1.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;

use crate::error::{PackagerError, Result, Violation};
use crate::types::{LLPartialSegment, PartialSegment};

#[derive(Debug, Clone)]
pub struct PreloadHintUri {
    pub segment_index: u64,
    pub partial_index: u32,
}

pub struct PartialSegmentManager {
    part_target_duration: f64,
    max_retained_segments: usize,
    max_partials_per_segment: u32,
    current_segment: u64,
    current_partials: Vec<LLPartialSegment>,
    retained: HashMap<u64, Vec<LLPartialSegment>>,
    retained_order: VecDeque<u64>,
}

impl PartialSegmentManager {
    pub fn new(part_target_duration: f64, max_retained_segments: usize, max_partials_per_segment: u32) -> Self {
        Self {
            part_target_duration,
            max_retained_segments,
            max_partials_per_segment,
            current_segment: 0,
            current_partials: Vec::new(),
            retained: HashMap::new(),
            retained_order: VecDeque::new(),
        }
    }

    pub fn current_segment_index(&self) -> u64 {
        self.current_segment
    }

    pub fn current_partial_count(&self) -> u32 {
        self.current_partials.len() as u32
    }

    /// Append a partial to the current in-progress segment. Returns a
    /// non-fatal violation when the partial overruns the recommended
    /// duration; fails with `FirstPartialMustBeIndependent` when partial
    /// `0` is not independent.
    pub fn add_partial(&mut self, part: PartialSegment) -> Result<(LLPartialSegment, Option<Violation>)> {
        let partial_index = self.current_partials.len() as u32;
        if partial_index == 0 && !part.independent {
            return Err(PackagerError::FirstPartialMustBeIndependent);
        }
        let violation = if part.duration > 1.5 * self.part_target_duration {
            Some(Violation::PartialDurationExceedsTarget {
                actual: part.duration,
                target: self.part_target_duration,
            })
        } else {
            None
        };
        let entry = LLPartialSegment {
            segment_index: self.current_segment,
            partial_index,
            part,
            created_at: Utc::now(),
        };
        self.current_partials.push(entry.clone());
        Ok((entry, violation))
    }

    /// URI coordinates of the next expected partial, per the preload-hint
    /// rule: stay in the current segment until `max_partials_per_segment`
    /// is reached, then roll over to partial 0 of the next segment.
    pub fn next_partial_hint(&self) -> PreloadHintUri {
        if self.current_partial_count() < self.max_partials_per_segment {
            PreloadHintUri {
                segment_index: self.current_segment,
                partial_index: self.current_partial_count(),
            }
        } else {
            PreloadHintUri {
                segment_index: self.current_segment + 1,
                partial_index: 0,
            }
        }
    }

    /// Freeze the current partials into the retained map, evict the
    /// oldest retained segment past `max_retained_segments`, and advance
    /// to the next segment. Returns the evicted segment index, if any.
    pub fn complete_segment(&mut self) -> Option<u64> {
        let completed = std::mem::take(&mut self.current_partials);
        self.retained.insert(self.current_segment, completed);
        self.retained_order.push_back(self.current_segment);
        self.current_segment += 1;

        let mut evicted = None;
        while self.retained_order.len() > self.max_retained_segments {
            if let Some(oldest) = self.retained_order.pop_front() {
                self.retained.remove(&oldest);
                evicted = Some(oldest);
            }
        }
        evicted
    }

    pub fn current_partials(&self) -> &[LLPartialSegment] {
        &self.current_partials
    }

    pub fn retained_partials(&self, segment_index: u64) -> Option<&[LLPartialSegment]> {
        self.retained.get(&segment_index).map(|v| v.as_slice())
    }

    pub fn retained_segment_indices(&self) -> impl Iterator<Item = &u64> {
        self.retained_order.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(duration: f64, independent: bool) -> PartialSegment {
        PartialSegment {
            uri: "p.mp4".into(),
            duration,
            independent,
            byte_range: None,
            is_gap: false,
        }
    }

    #[test]
    fn first_partial_must_be_independent() {
        let mut mgr = PartialSegmentManager::new(1.0, 5, 10);
        let err = mgr.add_partial(part(0.3, false)).unwrap_err();
        assert!(matches!(err, PackagerError::FirstPartialMustBeIndependent));
    }

    #[test]
    fn overrun_reports_non_fatal_violation() {
        let mut mgr = PartialSegmentManager::new(1.0, 5, 10);
        let (_, violation) = mgr.add_partial(part(1.6, true)).unwrap();
        assert!(violation.is_some());
    }

    #[test]
    fn eviction_respects_retention_bound() {
        let mut mgr = PartialSegmentManager::new(1.0, 2, 10);
        for _ in 0..4 {
            mgr.add_partial(part(0.3, true)).unwrap();
            mgr.complete_segment();
        }
        assert_eq!(mgr.retained_segment_indices().count(), 2);
    }

    #[test]
    fn preload_hint_rolls_over_segment() {
        let mut mgr = PartialSegmentManager::new(1.0, 5, 2);
        mgr.add_partial(part(0.3, true)).unwrap();
        mgr.add_partial(part(0.3, false)).unwrap();
        let hint = mgr.next_partial_hint();
        assert_eq!(hint.segment_index, 1);
        assert_eq!(hint.partial_index, 0);
    }
}
