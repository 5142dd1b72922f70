//! Link statistics from sent/lost counters
//!
//! Separate from the control loop: the conditioner only reacts to loss
//! deltas, this module reports loss as a share of traffic.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::TransportError;
use crate::transport::{ConnectionId, StreamTransport};

/// Sent and lost counters summed across connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub audio_sent: u64,
    pub video_sent: u64,
    pub udp_sent: u64,
    pub audio_lost: u64,
    pub video_lost: u64,
    pub udp_lost: u64,
}

impl LinkStats {
    /// Read every counter of every connection; any failed read fails the snapshot
    pub fn collect(
        transport: &dyn StreamTransport,
        connections: impl IntoIterator<Item = ConnectionId>,
    ) -> Result<Self, TransportError> {
        let mut stats = Self::default();
        for connection in connections {
            stats.audio_sent += transport.audio_packets_sent(connection)?;
            stats.video_sent += transport.video_packets_sent(connection)?;
            stats.udp_sent += transport.udp_packets_sent(connection)?;
            stats.audio_lost += transport.audio_packets_lost(connection)?;
            stats.video_lost += transport.video_packets_lost(connection)?;
            stats.udp_lost += transport.udp_packets_lost(connection)?;
        }
        Ok(stats)
    }

    pub fn sent(&self) -> u64 {
        self.audio_sent + self.video_sent + self.udp_sent
    }

    pub fn lost(&self) -> u64 {
        self.audio_lost + self.video_lost + self.udp_lost
    }

    /// Lost packets as a percentage of sent, 0 when nothing was sent
    pub fn loss_percent(&self) -> f64 {
        let sent = self.sent();
        if sent > 0 {
            (self.lost() as f64 / sent as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Counter growth since `earlier`
    pub fn since(&self, earlier: &LinkStats) -> LinkStats {
        LinkStats {
            audio_sent: self.audio_sent.saturating_sub(earlier.audio_sent),
            video_sent: self.video_sent.saturating_sub(earlier.video_sent),
            udp_sent: self.udp_sent.saturating_sub(earlier.udp_sent),
            audio_lost: self.audio_lost.saturating_sub(earlier.audio_lost),
            video_lost: self.video_lost.saturating_sub(earlier.video_lost),
            udp_lost: self.udp_lost.saturating_sub(earlier.udp_lost),
        }
    }
}

/// One statistics report
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub name: String,
    pub taken_at: DateTime<Utc>,
    pub totals: LinkStats,
    /// Growth since the previous report, absent on the first one
    pub interval: Option<LinkStats>,
}

impl fmt::Display for StatsReport {
    /// `[stats:uplink] loss=1.2% (12/1000 pkts) interval_loss=3.0%`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[stats:{}] loss={:.1}% ({}/{} pkts)",
            self.name,
            self.totals.loss_percent(),
            self.totals.lost(),
            self.totals.sent()
        )?;
        if let Some(interval) = &self.interval {
            write!(f, " interval_loss={:.1}%", interval.loss_percent())?;
        }
        Ok(())
    }
}

/// Periodic reporter remembering the previous snapshot
pub struct StatsReporter {
    name: String,
    previous: Option<LinkStats>,
}

impl StatsReporter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            previous: None,
        }
    }

    /// Snapshot the counters, log the report and return it
    pub fn report(
        &mut self,
        transport: &dyn StreamTransport,
        connections: impl IntoIterator<Item = ConnectionId>,
    ) -> Result<StatsReport, TransportError> {
        let totals = LinkStats::collect(transport, connections)?;
        let interval = self.previous.map(|previous| totals.since(&previous));
        self.previous = Some(totals);

        let report = StatsReport {
            name: self.name.clone(),
            taken_at: Utc::now(),
            totals,
            interval,
        };
        tracing::info!("{}", report);
        Ok(report)
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}
