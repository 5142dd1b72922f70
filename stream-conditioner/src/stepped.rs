//! Stepped strategy
//!
//! The bitrate moves between seven fixed fractions of nominal, one level
//! at a time. Sessions start at the third level. Recovery gets slower the
//! more often the link has recently dropped: each of the last three drop
//! events must have aged past its own tier before the next level up is
//! tried. Drops close together count as a single event.

use std::time::{Duration, Instant};

use crate::config::PollTiming;
use crate::history::{BitrateSample, History};
use crate::state::ConditionerCore;
use crate::strategy::{loss_window_start, RateStrategy};

/// Levels as fractions of nominal, lowest first
pub const STEPS: [f64; 7] = [0.20, 0.25, 0.333, 0.450, 0.600, 0.780, 1.000];

/// Level a session starts at
pub const START_STEP: usize = 2;

const TOP_STEP: usize = STEPS.len() - 1;

pub const NORMALIZATION_DELAY: Duration = Duration::from_millis(2000);
pub const LOSS_WINDOW: Duration = Duration::from_millis(10_000);

/// One packet of loss is tolerated per this many bits per second
const BPS_PER_TOLERATED_PACKET: u64 = 300_000;

/// Quiet time required after the 1st, 2nd and 3rd+ most recent drop event
pub const RECOVERY_INTERVALS: [Duration; 3] = [
    Duration::from_millis(15_000),
    Duration::from_millis(60_000),
    Duration::from_millis(180_000),
];

/// Drops closer together than this merge into one event
pub const DROP_MERGE_WINDOW: Duration =
    Duration::from_millis(2 * STEPS.len() as u64 * NORMALIZATION_DELAY.as_millis() as u64);

const POLL_TIMING: PollTiming = PollTiming::from_millis(2000, 2000);

#[derive(Debug)]
pub struct SteppedStrategy {
    step: usize,
}

impl SteppedStrategy {
    pub fn new() -> Self {
        Self { step: START_STEP }
    }

    /// Current level index, 0 is the lowest
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn bitrate_for(nominal: u32, step: usize) -> u32 {
        let fraction = STEPS[step.min(TOP_STEP)];
        (nominal as f64 * fraction).round() as u32
    }

    /// Lost packets within the window that trigger a drop at `bitrate`, at least one
    fn loss_tolerance(bitrate: u32) -> u64 {
        (bitrate as u64 / BPS_PER_TOLERATED_PACKET).max(1)
    }

    fn move_to(&mut self, core: &mut ConditionerCore, step: usize) {
        self.step = step;
        core.change_bitrate(Self::bitrate_for(core.nominal_bitrate(), step));
    }
}

impl Default for SteppedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

/// Times of the most recent drop events, newest first
///
/// Walks the whole bitrate log backward. Upward steps are skipped, every
/// downward transition is a drop. A drop within `merge_window` of the next
/// newer drop joins that drop's event; an event is timed by its newest drop.
/// At most one event per recovery tier is returned.
pub fn drop_events(history: &History<BitrateSample>, merge_window: Duration) -> Vec<Instant> {
    let samples: Vec<&BitrateSample> = history.iter_rev().collect();
    let mut events = Vec::with_capacity(RECOVERY_INTERVALS.len());
    let mut newer_drop: Option<Instant> = None;

    for pair in samples.windows(2) {
        let (newer, older) = (pair[0], pair[1]);
        if newer.bitrate >= older.bitrate {
            continue;
        }
        let merges = newer_drop
            .map(|t| t.saturating_duration_since(newer.timestamp) <= merge_window)
            .unwrap_or(false);
        if !merges {
            if events.len() == RECOVERY_INTERVALS.len() {
                break;
            }
            events.push(newer.timestamp);
        }
        newer_drop = Some(newer.timestamp);
    }

    events
}

/// Whether the link has been quiet long enough to try the next level up
///
/// The newest drop event must be older than the first tier, the one before
/// it older than the second and the one before that older than the third.
/// Without any drops on record recovery is always allowed.
pub fn can_try_to_recover(history: &History<BitrateSample>, now: Instant) -> bool {
    drop_events(history, DROP_MERGE_WINDOW)
        .iter()
        .zip(RECOVERY_INTERVALS.iter())
        .all(|(dropped_at, tier)| now.saturating_duration_since(*dropped_at) >= *tier)
}

impl RateStrategy for SteppedStrategy {
    fn name(&self) -> &'static str {
        "stepped"
    }

    fn poll_timing(&self) -> PollTiming {
        POLL_TIMING
    }

    fn loss_window(&self) -> Duration {
        LOSS_WINDOW
    }

    fn floor_bitrate(&self, nominal: u32) -> u32 {
        Self::bitrate_for(nominal, 0)
    }

    fn on_start(&mut self, core: &mut ConditionerCore) {
        self.step = START_STEP;
        let bitrate = Self::bitrate_for(core.nominal_bitrate(), START_STEP);
        tracing::info!("Stepped conditioner starting at level {} ({} bps)", START_STEP, bitrate);
        core.change_bitrate_quietly(bitrate);
    }

    fn on_resume(&mut self, _core: &mut ConditionerCore) {
        self.step = TOP_STEP;
    }

    fn evaluate(&mut self, core: &mut ConditionerCore, audio_lost: u64, video_lost: u64) {
        let now = core.now();
        let (Some(last_loss), Some(last_change)) = (core.last_loss_sample(), core.last_change_time())
        else {
            return;
        };

        if last_loss.counters_differ(audio_lost, video_lost) {
            if self.step == 0 {
                tracing::debug!("Loss ignored, already at the lowest level");
                return;
            }
            if now.saturating_duration_since(last_change) < NORMALIZATION_DELAY {
                tracing::debug!("Loss ignored, bitrate changed {:?} ago", now.saturating_duration_since(last_change));
                return;
            }

            core.record_loss(audio_lost, video_lost);
            let since = loss_window_start(now, LOSS_WINDOW, last_change, NORMALIZATION_DELAY);
            let lost = core.count_lost_for_interval(since);
            let tolerance = Self::loss_tolerance(core.get_bitrate());
            if lost >= tolerance {
                tracing::info!(
                    "{} packets lost in window (tolerance {}), dropping to level {}",
                    lost,
                    tolerance,
                    self.step - 1
                );
                self.move_to(core, self.step - 1);
            }
        } else if self.step < TOP_STEP && can_try_to_recover(core.bitrate_history(), now) {
            tracing::info!("Link quiet, raising to level {}", self.step + 1);
            self.move_to(core, self.step + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::conditioner::Conditioner;
    use crate::config::{ConditionerConfig, ConditionerMode};
    use crate::sim::SimulatedTransport;
    use std::sync::Arc;

    const TICK_MS: u64 = 2000;

    fn setup(nominal: u32) -> (Conditioner, ManualClock, Arc<SimulatedTransport>) {
        let clock = ManualClock::new();
        let transport = Arc::new(SimulatedTransport::new());
        transport.add_connection(1);
        let mut conditioner = Conditioner::new(
            ConditionerConfig::new(ConditionerMode::Stepped),
            Box::new(SteppedStrategy::new()),
            Arc::new(clock.clone()),
        );
        conditioner.start(transport.clone(), nominal, [1]);
        (conditioner, clock, transport)
    }

    fn tick(conditioner: &mut Conditioner, clock: &ManualClock) {
        clock.advance_millis(TICK_MS);
        conditioner.tick();
    }

    fn lossy_tick(conditioner: &mut Conditioner, clock: &ManualClock, transport: &SimulatedTransport) {
        transport.inject_loss(1, 0, 10, 0);
        tick(conditioner, clock);
    }

    fn bitrate_log(origin: Instant, entries: &[(u64, u32)]) -> History<BitrateSample> {
        let mut history = History::with_capacity(16);
        for &(secs, bitrate) in entries {
            history.push(BitrateSample::new(origin + Duration::from_secs(secs), bitrate));
        }
        history
    }

    #[test]
    fn test_constants() {
        assert_eq!(DROP_MERGE_WINDOW, Duration::from_millis(28_000));
        assert_eq!(SteppedStrategy::bitrate_for(1_000_000, 0), 200_000);
        assert_eq!(SteppedStrategy::bitrate_for(1_000_000, 2), 333_000);
        assert_eq!(SteppedStrategy::bitrate_for(1_000_000, 6), 1_000_000);
        assert_eq!(SteppedStrategy::bitrate_for(2_000_000, 3), 900_000);
    }

    #[test]
    fn test_start_at_third_level_quietly() {
        let (conditioner, _clock, transport) = setup(1_000_000);
        assert_eq!(conditioner.get_bitrate(), 333_000);
        assert_eq!(transport.bitrate_commands(), vec![1_000_000, 333_000]);
        assert_eq!(conditioner.core().bitrate_history().len(), 1);
        assert_eq!(conditioner.floor_bitrate(), 200_000);
    }

    #[test]
    fn test_clean_session_climbs_each_poll() {
        let (mut conditioner, clock, transport) = setup(1_000_000);
        for expected in [450_000, 600_000, 780_000, 1_000_000] {
            tick(&mut conditioner, &clock);
            assert_eq!(conditioner.get_bitrate(), expected);
        }

        // Top level reached: nothing more to do
        for _ in 0..10 {
            tick(&mut conditioner, &clock);
        }
        assert_eq!(conditioner.core().bitrate_history().len(), 5);
        assert_eq!(transport.last_bitrate(), Some(1_000_000));
    }

    #[test]
    fn test_drop_on_loss_above_tolerance() {
        let (mut conditioner, clock, transport) = setup(1_000_000);
        // First sample only anchors the window
        lossy_tick(&mut conditioner, &clock, &transport);
        assert_eq!(conditioner.get_bitrate(), 333_000);

        lossy_tick(&mut conditioner, &clock, &transport);
        assert_eq!(conditioner.get_bitrate(), 250_000);
        assert_eq!(transport.last_bitrate(), Some(250_000));
    }

    #[test]
    fn test_loss_below_tolerance_keeps_level() {
        let (mut conditioner, clock, transport) = setup(3_000_000);
        // 999 kbps: three lost packets in the window drop a level
        transport.inject_loss(1, 1, 0, 0);
        tick(&mut conditioner, &clock);
        transport.inject_loss(1, 1, 1, 0);
        tick(&mut conditioner, &clock);
        assert_eq!(conditioner.get_bitrate(), 999_000);

        transport.inject_loss(1, 0, 1, 0);
        tick(&mut conditioner, &clock);
        assert_eq!(conditioner.get_bitrate(), 750_000);
    }

    #[test]
    fn test_tolerance_is_whole_packets() {
        assert_eq!(SteppedStrategy::loss_tolerance(999_000), 3);
        assert_eq!(SteppedStrategy::loss_tolerance(600_000), 2);
        assert_eq!(SteppedStrategy::loss_tolerance(250_000), 1);
    }

    #[test]
    fn test_normalization_delay_allows_one_drop() {
        let (mut conditioner, clock, transport) = setup(1_000_000);
        lossy_tick(&mut conditioner, &clock, &transport);
        lossy_tick(&mut conditioner, &clock, &transport);
        assert_eq!(conditioner.get_bitrate(), 250_000);

        // Loss 0.5s and 1.5s after the drop is blamed on the drop itself
        for _ in 0..2 {
            clock.advance_millis(500);
            transport.inject_loss(1, 0, 50, 0);
            conditioner.tick();
            clock.advance_millis(500);
        }
        assert_eq!(conditioner.get_bitrate(), 250_000);
        assert_eq!(transport.bitrate_commands(), vec![1_000_000, 333_000, 250_000]);
    }

    #[test]
    fn test_floor_reached_and_held() {
        let (mut conditioner, clock, transport) = setup(1_000_000);
        for _ in 0..40 {
            lossy_tick(&mut conditioner, &clock, &transport);
            assert!(conditioner.get_bitrate() >= 200_000);
        }
        assert_eq!(conditioner.get_bitrate(), 200_000);
        assert_eq!(
            transport.bitrate_commands(),
            vec![1_000_000, 333_000, 250_000, 200_000]
        );
    }

    #[test]
    fn test_three_merged_drops_gate_as_one_event() {
        let (mut conditioner, clock, transport) = setup(1_000_000);

        // Clean ramp to the top level at 8s
        for _ in 0..4 {
            tick(&mut conditioner, &clock);
        }
        assert_eq!(conditioner.get_bitrate(), 1_000_000);

        // Loss from 10s to 20s: drops at 12s, 16s and 20s
        for _ in 0..6 {
            lossy_tick(&mut conditioner, &clock, &transport);
        }
        assert_eq!(conditioner.get_bitrate(), 450_000);
        assert_eq!(
            drop_events(conditioner.core().bitrate_history(), DROP_MERGE_WINDOW).len(),
            1
        );

        // One event gates at 15s: still waiting at 34s
        for _ in 0..7 {
            tick(&mut conditioner, &clock);
        }
        assert_eq!(conditioner.get_bitrate(), 450_000);

        // 36s: recovery allowed
        tick(&mut conditioner, &clock);
        assert_eq!(conditioner.get_bitrate(), 600_000);
    }

    #[test]
    fn test_repeated_drops_escalate_recovery_tiers() {
        let (mut conditioner, clock, transport) = setup(1_000_000);
        for _ in 0..4 {
            tick(&mut conditioner, &clock);
        }
        assert_eq!(conditioner.get_bitrate(), 1_000_000);

        // First drop at 12s, back up 15s later
        lossy_tick(&mut conditioner, &clock, &transport);
        lossy_tick(&mut conditioner, &clock, &transport);
        assert_eq!(conditioner.get_bitrate(), 780_000);
        for _ in 0..7 {
            tick(&mut conditioner, &clock);
        }
        assert_eq!(conditioner.get_bitrate(), 780_000);
        tick(&mut conditioner, &clock);
        assert_eq!(conditioner.get_bitrate(), 1_000_000);

        // Second drop at 48s, too far from the first to merge
        for _ in 0..8 {
            tick(&mut conditioner, &clock);
        }
        lossy_tick(&mut conditioner, &clock, &transport);
        lossy_tick(&mut conditioner, &clock, &transport);
        assert_eq!(conditioner.get_bitrate(), 780_000);

        // 64s..70s: newest drop is old enough, the 12s one is not 60s old yet
        for _ in 0..11 {
            tick(&mut conditioner, &clock);
        }
        assert_eq!(conditioner.get_bitrate(), 780_000);
        tick(&mut conditioner, &clock);
        assert_eq!(conditioner.get_bitrate(), 1_000_000);

        // Third drop at 84s: the 12s drop now needs 180s
        for _ in 0..4 {
            tick(&mut conditioner, &clock);
        }
        lossy_tick(&mut conditioner, &clock, &transport);
        lossy_tick(&mut conditioner, &clock, &transport);
        assert_eq!(conditioner.get_bitrate(), 780_000);
        assert_eq!(
            drop_events(conditioner.core().bitrate_history(), DROP_MERGE_WINDOW).len(),
            3
        );

        for _ in 0..53 {
            tick(&mut conditioner, &clock);
        }
        assert_eq!(conditioner.get_bitrate(), 780_000);
        tick(&mut conditioner, &clock);
        assert_eq!(conditioner.get_bitrate(), 1_000_000);
    }

    #[test]
    fn test_drop_events_merge_and_split() {
        let origin = Instant::now();

        // Drops at 100s and 110s merge, the one at 40s stands alone
        let history = bitrate_log(
            origin,
            &[(0, 1_000), (40, 780), (100, 600), (110, 450)],
        );
        let events = drop_events(&history, DROP_MERGE_WINDOW);
        assert_eq!(
            events,
            vec![origin + Duration::from_secs(110), origin + Duration::from_secs(40)]
        );

        // Upward steps are skipped, earlier drops still count
        let history = bitrate_log(origin, &[(0, 780), (10, 600), (50, 780), (90, 600)]);
        assert_eq!(
            drop_events(&history, DROP_MERGE_WINDOW),
            vec![origin + Duration::from_secs(90), origin + Duration::from_secs(10)]
        );
    }

    #[test]
    fn test_drop_before_up_step_still_gates() {
        let origin = Instant::now();
        let at = |secs: u64| origin + Duration::from_secs(secs);
        let history = bitrate_log(origin, &[(0, 1_000), (1, 780), (16, 1_000), (30, 780)]);

        // The 1s drop is 45s old at 46s and needs 60s
        assert!(!can_try_to_recover(&history, at(46)));
        assert!(!can_try_to_recover(&history, at(60)));
        assert!(can_try_to_recover(&history, at(61)));
    }

    #[test]
    fn test_no_drops_allows_recovery() {
        let origin = Instant::now();
        let history = bitrate_log(origin, &[(0, 333), (2, 450)]);
        assert!(drop_events(&history, DROP_MERGE_WINDOW).is_empty());
        assert!(can_try_to_recover(&history, origin + Duration::from_secs(2)));
    }

    #[test]
    fn test_only_three_events_considered() {
        let origin = Instant::now();
        let history = bitrate_log(
            origin,
            &[(0, 1_000), (1, 780), (100, 600), (200, 450), (300, 333)],
        );
        let events = drop_events(&history, DROP_MERGE_WINDOW);
        assert_eq!(
            events,
            vec![
                origin + Duration::from_secs(300),
                origin + Duration::from_secs(200),
                origin + Duration::from_secs(100),
            ]
        );
    }

    #[test]
    fn test_recovery_tiers() {
        let origin = Instant::now();
        // Three separate drop events at 0s, 100s and 200s
        let history = bitrate_log(
            origin,
            &[(0, 1_000), (1, 780), (100, 600), (200, 450)],
        );
        assert_eq!(drop_events(&history, DROP_MERGE_WINDOW).len(), 3);

        let at = |secs: u64| origin + Duration::from_secs(secs);

        // Newest drop 15s old, second 115s old (needs 60s), third 214s old (needs 180s)
        assert!(can_try_to_recover(&history, at(215)));
        assert!(!can_try_to_recover(&history, at(214)));

        // Tighter spacing: second tier binds
        let history = bitrate_log(
            origin,
            &[(0, 1_000), (100, 780), (140, 600), (170, 450)],
        );
        assert_eq!(drop_events(&history, DROP_MERGE_WINDOW).len(), 3);
        // 15s after the newest drop, the one at 140s is only 45s old
        assert!(!can_try_to_recover(&history, at(185)));
        // 200s: 140s drop is 60s old, 100s drop is only 100s old (needs 180s)
        assert!(!can_try_to_recover(&history, at(200)));
        assert!(can_try_to_recover(&history, at(280)));
    }

    #[test]
    fn test_resume_sets_top_level() {
        let (mut conditioner, clock, transport) = setup(1_000_000);
        lossy_tick(&mut conditioner, &clock, &transport);
        lossy_tick(&mut conditioner, &clock, &transport);
        assert_eq!(conditioner.get_bitrate(), 250_000);

        conditioner.pause();
        assert!(conditioner.resume());
        assert_eq!(conditioner.get_bitrate(), 1_000_000);

        // A later drop steps down from the top level
        for _ in 0..3 {
            lossy_tick(&mut conditioner, &clock, &transport);
        }
        assert_eq!(conditioner.get_bitrate(), 780_000);
    }
}
