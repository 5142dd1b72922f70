//! Transport collaborator interface
//!
//! The conditioner never owns the transport. It reads cumulative loss
//! counters from it and issues fire-and-forget rate commands.

use crate::error::TransportError;
use crate::fps::FpsRange;

/// Identifier of one transport connection carrying the stream
pub type ConnectionId = u64;

/// Transport-level counters and rate controls for one live stream
///
/// Counters are cumulative and monotonically non-decreasing per connection
/// for the life of that connection.
pub trait StreamTransport: Send + Sync {
    fn audio_packets_lost(&self, connection: ConnectionId) -> Result<u64, TransportError>;
    fn video_packets_lost(&self, connection: ConnectionId) -> Result<u64, TransportError>;
    fn udp_packets_lost(&self, connection: ConnectionId) -> Result<u64, TransportError>;

    fn audio_packets_sent(&self, connection: ConnectionId) -> Result<u64, TransportError>;
    fn video_packets_sent(&self, connection: ConnectionId) -> Result<u64, TransportError>;
    fn udp_packets_sent(&self, connection: ConnectionId) -> Result<u64, TransportError>;

    /// Set the encoder bitrate in bits per second
    fn change_bitrate(&self, bits_per_second: u32);

    /// Set the encoder frame-rate range
    fn change_fps_range(&self, range: FpsRange);

    /// Frame-rate ranges the encoder supports, empty when not advertised
    fn supported_fps_ranges(&self) -> Vec<FpsRange> {
        Vec::new()
    }
}
