//! Strategy-agnostic conditioner state
//!
//! Owns the loss and bitrate logs, the frame-rate state and the transport
//! reference. Strategies read from it and change the rate only through
//! [`ConditionerCore::change_bitrate`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::ConditionerConfig;
use crate::error::TransportError;
use crate::fps::{self, FpsRange, FpsTable};
use crate::history::{BitrateSample, History, LossSample};
use crate::transport::{ConnectionId, StreamTransport};

/// Number of bitrate changes kept for recovery lookback
pub const BITRATE_HISTORY_CAPACITY: usize = 64;

/// Loss entries needed to cover `window` when polling every `interval`
pub fn loss_history_capacity(window: Duration, interval: Duration) -> usize {
    if interval.is_zero() {
        return 8;
    }
    let per_window = window.as_millis() / interval.as_millis().max(1);
    (per_window as usize + 4).max(8)
}

/// Loss summed across all active connections for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LossTotals {
    pub audio_lost: u64,
    /// Video plus transport-level (UDP) loss
    pub video_lost: u64,
}

pub struct ConditionerCore {
    config: ConditionerConfig,
    clock: Arc<dyn Clock>,
    transport: Option<Arc<dyn StreamTransport>>,
    connections: BTreeSet<ConnectionId>,
    current_bitrate: u32,
    nominal_bitrate: u32,
    initial_bitrate: u32,
    current_fps: f64,
    current_fps_range: FpsRange,
    fps_table: FpsTable,
    loss_history: History<LossSample>,
    bitrate_history: History<BitrateSample>,
}

impl ConditionerCore {
    pub fn new(config: ConditionerConfig, clock: Arc<dyn Clock>, loss_capacity: usize) -> Self {
        let max_fps = config.max_fps;
        Self {
            config,
            clock,
            transport: None,
            connections: BTreeSet::new(),
            current_bitrate: 0,
            nominal_bitrate: 0,
            initial_bitrate: 0,
            current_fps: max_fps as f64,
            current_fps_range: FpsRange::fixed(max_fps),
            fps_table: FpsTable::default(),
            loss_history: History::with_capacity(loss_capacity),
            bitrate_history: History::with_capacity(BITRATE_HISTORY_CAPACITY),
        }
    }

    /// Begin conditioning a stream at `initial_bitrate`
    ///
    /// Any state from a previous session is discarded.
    pub fn start(
        &mut self,
        transport: Arc<dyn StreamTransport>,
        initial_bitrate: u32,
        connections: impl IntoIterator<Item = ConnectionId>,
    ) {
        let now = self.clock.now();

        self.connections = connections.into_iter().collect();
        self.current_bitrate = initial_bitrate;
        self.nominal_bitrate = initial_bitrate;
        self.initial_bitrate = initial_bitrate;

        self.loss_history.clear();
        self.loss_history.push(LossSample::new(now, 0, 0));
        self.bitrate_history.clear();
        self.bitrate_history.push(BitrateSample::new(now, initial_bitrate));

        self.fps_table = FpsTable::new(transport.supported_fps_ranges());
        self.current_fps_range = self.fps_table.ceiling(self.config.max_fps);
        self.current_fps = self.current_fps_range.max as f64;

        tracing::info!(
            "Conditioner started at {} bps on {} connection(s), fps range {}",
            initial_bitrate,
            self.connections.len(),
            self.current_fps_range
        );

        transport.change_bitrate(initial_bitrate);
        self.transport = Some(transport);
    }

    /// Go idle, restoring the full frame rate first
    pub fn stop(&mut self) {
        if self.nominal_bitrate != 0 {
            self.update_fps(self.nominal_bitrate);
        }
        if self.current_bitrate != 0 {
            tracing::info!("Conditioner stopped at {} bps", self.current_bitrate);
        }
        self.current_bitrate = 0;
        self.connections.clear();
        self.transport = None;
    }

    /// Return to the nominal rate after a pause
    ///
    /// Returns false when idle (never started or already stopped).
    pub fn resume(&mut self) -> bool {
        if self.current_bitrate == 0 {
            return false;
        }
        let Some(transport) = self.transport.clone() else {
            return false;
        };

        self.current_bitrate = self.nominal_bitrate;
        self.bitrate_history
            .push(BitrateSample::new(self.clock.now(), self.nominal_bitrate));

        self.fps_table = FpsTable::new(transport.supported_fps_ranges());
        let ceiling = self.fps_table.ceiling(self.config.max_fps);
        self.current_fps = ceiling.max as f64;
        if ceiling != self.current_fps_range {
            self.current_fps_range = ceiling;
            transport.change_fps_range(ceiling);
        }

        tracing::info!("Conditioner resumed at {} bps", self.nominal_bitrate);
        transport.change_bitrate(self.nominal_bitrate);
        true
    }

    pub fn add_connection(&mut self, connection: ConnectionId) {
        if self.connections.insert(connection) {
            tracing::debug!("Conditioner watching connection {}", connection);
        }
    }

    pub fn remove_connection(&mut self, connection: ConnectionId) {
        if self.connections.remove(&connection) {
            tracing::debug!("Conditioner no longer watching connection {}", connection);
        }
    }

    /// Put a new bitrate into effect
    ///
    /// Records the change, rescales the frame rate when adaptive fps is on
    /// and commands the transport. Never exceeds the nominal rate.
    pub fn change_bitrate(&mut self, new_bitrate: u32) {
        let new_bitrate = new_bitrate.min(self.nominal_bitrate);
        self.bitrate_history
            .push(BitrateSample::new(self.clock.now(), new_bitrate));

        if self.config.adaptive_fps {
            self.update_fps(new_bitrate);
        }

        tracing::info!(
            "Bitrate {} -> {} bps ({:.0}% of nominal)",
            self.current_bitrate,
            new_bitrate,
            percent_of(new_bitrate, self.nominal_bitrate)
        );

        if let Some(transport) = &self.transport {
            transport.change_bitrate(new_bitrate);
        }
        self.current_bitrate = new_bitrate;
    }

    /// Command a bitrate without logging it as a change
    ///
    /// The newest bitrate entry is rewritten in place so lookback sees the
    /// rate actually in effect. Frame rate is left alone.
    pub fn change_bitrate_quietly(&mut self, bitrate: u32) {
        let bitrate = bitrate.min(self.nominal_bitrate);
        if let Some(last) = self.bitrate_history.last_mut() {
            last.bitrate = bitrate;
        }
        if let Some(transport) = &self.transport {
            transport.change_bitrate(bitrate);
        }
        self.current_bitrate = bitrate;
    }

    /// Rescale the frame rate for `new_bitrate`
    pub fn update_fps(&mut self, new_bitrate: u32) {
        if self.fps_table.is_empty() {
            return;
        }
        let target = fps::target_fps(new_bitrate, self.nominal_bitrate, self.config.max_fps);
        self.apply_fps_target(target);
    }

    pub(crate) fn apply_fps_target(&mut self, target: f64) {
        if fps::is_debounced(self.current_fps, target) {
            return;
        }
        let Some(range) = self.fps_table.nearest(target) else {
            return;
        };

        self.current_fps = range.max as f64;
        if range == self.current_fps_range {
            return;
        }

        tracing::info!(
            "Fps range {} -> {} (target {:.0} fps)",
            self.current_fps_range,
            range,
            target
        );
        self.current_fps_range = range;
        if let Some(transport) = &self.transport {
            transport.change_fps_range(range);
        }
    }

    /// Read and sum the loss counters of every active connection
    ///
    /// `Ok(None)` when there is nothing to poll. Any failed read fails the
    /// whole poll so no partial totals are ever used.
    pub fn poll_loss(&self) -> Result<Option<LossTotals>, TransportError> {
        let Some(transport) = &self.transport else {
            return Ok(None);
        };
        if self.connections.is_empty() {
            return Ok(None);
        }

        let mut totals = LossTotals::default();
        for &connection in &self.connections {
            let audio = transport.audio_packets_lost(connection)?;
            let video = transport.video_packets_lost(connection)?;
            let udp = transport.udp_packets_lost(connection)?;
            totals.audio_lost = totals.audio_lost.saturating_add(audio);
            totals.video_lost = totals.video_lost.saturating_add(video).saturating_add(udp);
        }
        Ok(Some(totals))
    }

    /// Append a loss observation
    pub fn record_loss(&mut self, audio_lost: u64, video_lost: u64) {
        let now = self.clock.now();
        self.loss_history
            .push(LossSample::new(now, audio_lost, video_lost));
    }

    /// Loss accumulated since `since`, see [`History::lost_since`]
    pub fn count_lost_for_interval(&self, since: Instant) -> u64 {
        self.loss_history.lost_since(since)
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn get_bitrate(&self) -> u32 {
        self.current_bitrate
    }

    pub fn nominal_bitrate(&self) -> u32 {
        self.nominal_bitrate
    }

    /// First bitrate recorded for this session
    pub fn initial_bitrate(&self) -> u32 {
        self.initial_bitrate
    }

    pub fn is_running(&self) -> bool {
        self.current_bitrate != 0
    }

    pub fn current_fps(&self) -> f64 {
        self.current_fps
    }

    pub fn current_fps_range(&self) -> FpsRange {
        self.current_fps_range
    }

    pub fn fps_table(&self) -> &FpsTable {
        &self.fps_table
    }

    pub fn config(&self) -> &ConditionerConfig {
        &self.config
    }

    pub fn transport(&self) -> Option<&Arc<dyn StreamTransport>> {
        self.transport.as_ref()
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.iter().copied()
    }

    pub fn last_loss_sample(&self) -> Option<LossSample> {
        self.loss_history.last().copied()
    }

    /// When the bitrate last changed (or the session started)
    pub fn last_change_time(&self) -> Option<Instant> {
        self.bitrate_history.last().map(|s| s.timestamp)
    }

    pub fn loss_history(&self) -> &History<LossSample> {
        &self.loss_history
    }

    pub fn bitrate_history(&self) -> &History<BitrateSample> {
        &self.bitrate_history
    }
}

fn percent_of(value: u32, of: u32) -> f64 {
    if of == 0 {
        0.0
    } else {
        value as f64 * 100.0 / of as f64
    }
}
