//! In-memory transport for tests and link simulation
//!
//! Keeps per-connection counters that callers drive by hand (or from a
//! loss model) and records every command the conditioner issues.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::TransportError;
use crate::fps::FpsRange;
use crate::transport::{ConnectionId, StreamTransport};

/// Cumulative counters of one simulated connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCounters {
    pub audio_sent: u64,
    pub video_sent: u64,
    pub udp_sent: u64,
    pub audio_lost: u64,
    pub video_lost: u64,
    pub udp_lost: u64,
}

#[derive(Default)]
struct SimState {
    counters: HashMap<ConnectionId, LinkCounters>,
    fps_ranges: Vec<FpsRange>,
    failing: bool,
    bitrate_commands: Vec<u32>,
    fps_commands: Vec<FpsRange>,
}

#[derive(Default)]
pub struct SimulatedTransport {
    state: Mutex<SimState>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport advertising the given frame-rate ranges
    pub fn with_fps_ranges(ranges: impl IntoIterator<Item = FpsRange>) -> Self {
        let transport = Self::new();
        transport.lock().fps_ranges = ranges.into_iter().collect();
        transport
    }

    pub fn add_connection(&self, connection: ConnectionId) {
        self.lock().counters.entry(connection).or_default();
    }

    pub fn remove_connection(&self, connection: ConnectionId) {
        self.lock().counters.remove(&connection);
    }

    /// Add lost packets to a connection, creating it if needed
    pub fn inject_loss(&self, connection: ConnectionId, audio: u64, video: u64, udp: u64) {
        let mut state = self.lock();
        let counters = state.counters.entry(connection).or_default();
        counters.audio_lost += audio;
        counters.video_lost += video;
        counters.udp_lost += udp;
    }

    /// Add sent packets to a connection, creating it if needed
    pub fn record_sent(&self, connection: ConnectionId, audio: u64, video: u64, udp: u64) {
        let mut state = self.lock();
        let counters = state.counters.entry(connection).or_default();
        counters.audio_sent += audio;
        counters.video_sent += video;
        counters.udp_sent += udp;
    }

    /// Make every counter read fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub fn counters(&self, connection: ConnectionId) -> Option<LinkCounters> {
        self.lock().counters.get(&connection).copied()
    }

    pub fn bitrate_commands(&self) -> Vec<u32> {
        self.lock().bitrate_commands.clone()
    }

    pub fn fps_commands(&self) -> Vec<FpsRange> {
        self.lock().fps_commands.clone()
    }

    /// Bitrate most recently commanded
    pub fn last_bitrate(&self) -> Option<u32> {
        self.lock().bitrate_commands.last().copied()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read(
        &self,
        connection: ConnectionId,
        field: impl Fn(&LinkCounters) -> u64,
    ) -> Result<u64, TransportError> {
        let state = self.lock();
        if state.failing {
            return Err(TransportError::Unavailable("simulated read failure".into()));
        }
        state
            .counters
            .get(&connection)
            .map(field)
            .ok_or(TransportError::UnknownConnection(connection))
    }
}

impl StreamTransport for SimulatedTransport {
    fn audio_packets_lost(&self, connection: ConnectionId) -> Result<u64, TransportError> {
        self.read(connection, |c| c.audio_lost)
    }

    fn video_packets_lost(&self, connection: ConnectionId) -> Result<u64, TransportError> {
        self.read(connection, |c| c.video_lost)
    }

    fn udp_packets_lost(&self, connection: ConnectionId) -> Result<u64, TransportError> {
        self.read(connection, |c| c.udp_lost)
    }

    fn audio_packets_sent(&self, connection: ConnectionId) -> Result<u64, TransportError> {
        self.read(connection, |c| c.audio_sent)
    }

    fn video_packets_sent(&self, connection: ConnectionId) -> Result<u64, TransportError> {
        self.read(connection, |c| c.video_sent)
    }

    fn udp_packets_sent(&self, connection: ConnectionId) -> Result<u64, TransportError> {
        self.read(connection, |c| c.udp_sent)
    }

    fn change_bitrate(&self, bits_per_second: u32) {
        self.lock().bitrate_commands.push(bits_per_second);
    }

    fn change_fps_range(&self, range: FpsRange) {
        self.lock().fps_commands.push(range);
    }

    fn supported_fps_ranges(&self) -> Vec<FpsRange> {
        self.lock().fps_ranges.clone()
    }
}
