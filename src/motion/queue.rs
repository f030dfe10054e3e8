//! Translation of a profile into MCU `queue_step` commands.

use super::profile::{MotionProfile, Segment};

/// Largest step count a single `queue_step` command can carry.
pub const MAX_QUEUE_COUNT: u32 = 65535;

/// Arguments of one `queue_step` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueStep {
    /// Interval before the first step, in MCU ticks.
    pub interval: u32,
    /// Number of steps (1-65535).
    pub count: u16,
    /// Change in interval per step.
    pub add: i32,
}

/// Iterator over the `queue_step` commands of a profile.
///
/// Long segments are split into chunks of at most [`MAX_QUEUE_COUNT`] steps,
/// with each chunk's start interval advanced by `count * add`. Empty segments
/// produce no commands.
#[derive(Debug, Clone)]
pub struct QueueSteps<'a> {
    segments: &'a [Segment],
    /// Index of the segment being emitted.
    index: usize,
    /// Steps of the current segment already emitted.
    emitted: u32,
    /// Start interval of the next chunk.
    interval: i64,
}

impl<'a> QueueSteps<'a> {
    fn new(segments: &'a [Segment]) -> Self {
        Self {
            segments,
            index: 0,
            emitted: 0,
            interval: segments.first().map_or(0, |s| s.interval as i64),
        }
    }

    /// Get the number of steps not yet emitted.
    pub fn steps_remaining(&self) -> u64 {
        self.segments
            .iter()
            .skip(self.index)
            .map(|s| s.steps as u64)
            .sum::<u64>()
            - self.emitted as u64
    }
}

impl Iterator for QueueSteps<'_> {
    type Item = QueueStep;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let segment = self.segments.get(self.index)?;
            let remaining = segment.steps - self.emitted;
            if remaining == 0 {
                self.index += 1;
                self.emitted = 0;
                if let Some(next) = self.segments.get(self.index) {
                    self.interval = next.interval as i64;
                }
                continue;
            }

            let count = remaining.min(MAX_QUEUE_COUNT);
            let step = QueueStep {
                interval: self.interval as u32,
                count: count as u16,
                add: segment.add,
            };
            self.emitted += count;
            self.interval += count as i64 * segment.add as i64;
            return Some(step);
        }
    }
}

impl MotionProfile {
    /// `queue_step` commands that execute this profile.
    pub fn queue_steps(&self) -> QueueSteps<'_> {
        QueueSteps::new(&self.segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::MotionPlanner;

    #[test]
    fn test_short_move_one_command_per_phase() {
        let profile = MotionPlanner::new(400.0, 16e6).plan(50.0, 10.0, 100.0).unwrap();
        let steps: Vec<_> = profile.queue_steps().collect();

        assert_eq!(
            steps,
            vec![
                QueueStep { interval: 12000, count: 200, add: -40 },
                QueueStep { interval: 4000, count: 19600, add: 0 },
                QueueStep { interval: 4000, count: 200, add: 40 },
            ]
        );
    }

    #[test]
    fn test_long_segment_is_split() {
        let segments = [Segment {
            steps: 140_000,
            interval: 300_000,
            add: -2,
            ticks: 0,
        }];
        let steps: Vec<_> = QueueSteps::new(&segments).collect();

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], QueueStep { interval: 300_000, count: 65535, add: -2 });
        assert_eq!(steps[1], QueueStep { interval: 300_000 - 131_070, count: 65535, add: -2 });
        assert_eq!(u32::from(steps[2].count), 140_000 - 2 * 65535);
        assert_eq!(steps[2].interval, 300_000 - 262_140);
    }

    #[test]
    fn test_empty_segments_skipped() {
        let profile = MotionProfile::zero();
        let mut steps = profile.queue_steps();
        assert_eq!(steps.steps_remaining(), 0);
        assert!(steps.next().is_none());
    }

    #[test]
    fn test_steps_remaining_tracks_progress() {
        let profile = MotionPlanner::new(400.0, 16e6).plan(2.0, 5.0, 100.0).unwrap();
        let mut steps = profile.queue_steps();
        assert_eq!(steps.steps_remaining(), 800);
        steps.next();
        assert_eq!(steps.steps_remaining(), 750);
    }
}
