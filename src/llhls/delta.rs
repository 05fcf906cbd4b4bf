//! Delta Update Generator — spec §4.6.4.

pub struct DeltaUpdateGenerator {
    can_skip_until: Option<f64>,
}

impl DeltaUpdateGenerator {
    pub fn new(can_skip_until: Option<f64>) -> Self {
        Self { can_skip_until }
    }

    /// Number of oldest segments, among `segment_durations` (oldest first),
    /// that can be skipped while leaving at least `can_skip_until` seconds
    /// of playback at the end. Returns `None` when delta updates are
    /// disabled (`can_skip_until` unset).
    pub fn skippable_count(&self, segment_durations: &[f64], _target_duration: f64) -> Option<usize> {
        let can_skip_until = self.can_skip_until?;
        let mut kept_duration = 0.0;
        let mut keep_count = 0usize;
        for &d in segment_durations.iter().rev() {
            if kept_duration >= can_skip_until {
                break;
            }
            kept_duration += d;
            keep_count += 1;
        }
        Some(segment_durations.len() - keep_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_can_skip_until() {
        let gen = DeltaUpdateGenerator::new(None);
        assert_eq!(gen.skippable_count(&[2.0, 2.0, 2.0], 2.0), None);
    }

    #[test]
    fn skips_oldest_segments_within_budget() {
        let gen = DeltaUpdateGenerator::new(Some(6.0));
        let durations = vec![2.0, 2.0, 2.0, 2.0, 2.0];
        // keep the newest 6s (3 segments), skip the oldest 2.
        assert_eq!(gen.skippable_count(&durations, 2.0), Some(2));
    }

    #[test]
    fn skips_nothing_when_total_is_within_budget() {
        let gen = DeltaUpdateGenerator::new(Some(60.0));
        let durations = vec![2.0, 2.0];
        assert_eq!(gen.skippable_count(&durations, 2.0), Some(0));
    }
}
