//! Bounded loss and bitrate logs

use std::collections::VecDeque;
use std::time::Instant;

/// Cumulative loss counters observed at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossSample {
    pub timestamp: Instant,
    pub audio_lost: u64,
    pub video_lost: u64,
}

impl LossSample {
    pub fn new(timestamp: Instant, audio_lost: u64, video_lost: u64) -> Self {
        Self {
            timestamp,
            audio_lost,
            video_lost,
        }
    }

    pub fn total(&self) -> u64 {
        self.audio_lost.saturating_add(self.video_lost)
    }

    /// Whether the counters differ from another sample's
    pub fn counters_differ(&self, audio_lost: u64, video_lost: u64) -> bool {
        self.audio_lost != audio_lost || self.video_lost != video_lost
    }
}

/// Bitrate put into effect at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateSample {
    pub timestamp: Instant,
    pub bitrate: u32,
}

impl BitrateSample {
    pub fn new(timestamp: Instant, bitrate: u32) -> Self {
        Self { timestamp, bitrate }
    }
}

/// Append-only log that drops its oldest entries past `capacity`
#[derive(Debug, Clone)]
pub struct History<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T> History<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: T) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn last(&self) -> Option<&T> {
        self.samples.back()
    }

    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.samples.back_mut()
    }

    /// Newest first
    pub fn iter_rev(&self) -> impl Iterator<Item = &T> {
        self.samples.iter().rev()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl History<LossSample> {
    /// Loss accumulated across audio and video since `since`
    ///
    /// Scans backward from the newest sample and stops at the first sample
    /// older than `since`; the delta is taken against the oldest sample still
    /// inside the window, so loss between that sample and its predecessor is
    /// not counted.
    pub fn lost_since(&self, since: Instant) -> u64 {
        let Some(latest) = self.samples.back() else {
            return 0;
        };

        let mut base = latest;
        for sample in self.samples.iter().rev() {
            if sample.timestamp < since {
                break;
            }
            base = sample;
        }

        latest.total().saturating_sub(base.total())
    }
}
