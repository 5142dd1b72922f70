//! Linear backoff strategy
//!
//! Shrinks the bitrate by ~0.707 whenever sustained loss is seen, never
//! below a quarter of nominal, and grows it back by ~1.415 after a full
//! minute without loss or rate changes.

use std::time::Duration;

use crate::state::ConditionerCore;
use crate::strategy::{loss_window_start, scale_bitrate, RateStrategy};

const SHRINK_NUMERATOR: u64 = 1000;
const SHRINK_DENOMINATOR: u64 = 1414;
const GROWTH_NUMERATOR: u64 = 1415;
const GROWTH_DENOMINATOR: u64 = 1000;

/// Loss right after a change is attributed to the change itself
pub const NORMALIZATION_DELAY: Duration = Duration::from_millis(1500);
pub const LOSS_WINDOW: Duration = Duration::from_millis(10_000);
/// Lost packets within the window that trigger a shrink
pub const LOSS_TOLERANCE: u64 = 4;
/// Clean signal required before growing again
pub const RECOVERY_INTERVAL: Duration = Duration::from_millis(60_000);

/// Floor as a fraction of nominal
const FLOOR_DIVISOR: u32 = 4;

#[derive(Debug, Default)]
pub struct LinearBackoffStrategy {
    floor: u32,
}

impl LinearBackoffStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn floor(&self) -> u32 {
        self.floor
    }
}

impl RateStrategy for LinearBackoffStrategy {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn loss_window(&self) -> Duration {
        LOSS_WINDOW
    }

    fn floor_bitrate(&self, nominal: u32) -> u32 {
        nominal / FLOOR_DIVISOR
    }

    fn on_start(&mut self, core: &mut ConditionerCore) {
        self.floor = self.floor_bitrate(core.nominal_bitrate());
    }

    fn evaluate(&mut self, core: &mut ConditionerCore, audio_lost: u64, video_lost: u64) {
        let now = core.now();
        let (Some(last_loss), Some(last_change)) = (core.last_loss_sample(), core.last_change_time())
        else {
            return;
        };
        let current = core.get_bitrate();

        if last_loss.counters_differ(audio_lost, video_lost) {
            if current <= self.floor {
                tracing::debug!("Loss ignored, already at floor {} bps", self.floor);
                return;
            }
            if now.duration_since(last_change) < NORMALIZATION_DELAY {
                tracing::debug!("Loss ignored, bitrate changed {:?} ago", now.duration_since(last_change));
                return;
            }

            core.record_loss(audio_lost, video_lost);
            let since = loss_window_start(now, LOSS_WINDOW, last_change, NORMALIZATION_DELAY);
            let lost = core.count_lost_for_interval(since);
            if lost >= LOSS_TOLERANCE {
                let reduced = scale_bitrate(current, SHRINK_NUMERATOR, SHRINK_DENOMINATOR)
                    .max(self.floor);
                tracing::info!("{} packets lost in window, shrinking bitrate", lost);
                core.change_bitrate(reduced);
            }
        } else if current < core.initial_bitrate() {
            let quiet_since = last_change.max(last_loss.timestamp);
            if now.duration_since(quiet_since) >= RECOVERY_INTERVAL {
                let grown = scale_bitrate(current, GROWTH_NUMERATOR, GROWTH_DENOMINATOR)
                    .min(core.nominal_bitrate());
                core.change_bitrate(grown);
            }
        }
    }
}
