//! Decision policy seam

use std::time::{Duration, Instant};

use crate::config::PollTiming;
use crate::state::ConditionerCore;

/// A bitrate decision policy
///
/// Polling, history bookkeeping and fps scaling live in
/// [`ConditionerCore`]; a strategy only decides when to move the rate.
pub trait RateStrategy: Send {
    fn name(&self) -> &'static str;

    /// Default polling cadence for this strategy
    fn poll_timing(&self) -> PollTiming {
        PollTiming::default()
    }

    /// Longest lookback the strategy applies to the loss log
    fn loss_window(&self) -> Duration;

    /// Lowest bitrate the strategy will ever command for `nominal`
    fn floor_bitrate(&self, nominal: u32) -> u32;

    /// Called right after the core has started a session
    fn on_start(&mut self, _core: &mut ConditionerCore) {}

    fn on_pause(&mut self, _core: &mut ConditionerCore) {}

    /// Called after the core has returned to the nominal rate
    fn on_resume(&mut self, _core: &mut ConditionerCore) {}

    /// React to the loss totals read on this tick
    fn evaluate(&mut self, core: &mut ConditionerCore, audio_lost: u64, video_lost: u64);
}

/// Start of the window in which loss is trusted
///
/// Bounded below by the end of the normalization period following the last
/// bitrate change.
pub(crate) fn loss_window_start(
    now: Instant,
    window: Duration,
    last_change: Instant,
    normalization_delay: Duration,
) -> Instant {
    let settled = last_change + normalization_delay;
    match now.checked_sub(window) {
        Some(window_start) => window_start.max(settled),
        None => settled,
    }
}

/// Scale a bitrate by `numerator / denominator` in integer arithmetic
pub(crate) fn scale_bitrate(bitrate: u32, numerator: u64, denominator: u64) -> u32 {
    let scaled = bitrate as u64 * numerator / denominator;
    scaled.min(u32::MAX as u64) as u32
}
