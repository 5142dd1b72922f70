//! Loss-driven Stream Conditioning
//!
//! This crate adjusts the encoder bitrate (and optionally the capture frame
//! rate) of a live audio/video stream from the packet-loss counters its
//! transport reports. It lowers the rate when loss exceeds a tolerance and
//! climbs back towards the nominal rate once the link has been clean for
//! long enough.
//!
//! # Components
//!
//! - [`state`]: Strategy-agnostic state, loss/bitrate logs and fps scaling
//! - [`linear`]: Multiplicative backoff with a fixed recovery interval
//! - [`stepped`]: Fixed bitrate ladder with escalating recovery gates
//! - [`conditioner`]: Strategy assembly, polling handle and factory
//! - [`ticker`]: Repeating tick schedules (tokio task or manual)
//! - [`stats`]: Sent/lost statistics reporting
//! - [`sim`]: In-memory transport for tests and link simulation

mod clock;
mod conditioner;
mod config;
mod error;
mod fps;
mod history;
mod linear;
mod sim;
mod state;
mod stats;
mod stepped;
mod strategy;
mod ticker;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conditioner::{create_conditioner, strategy_for, Conditioner, ConditionerHandle};
pub use config::{ConditionerConfig, ConditionerMode, PollTiming};
pub use error::{ConditionerError, TransportError};
pub use fps::{FpsRange, FpsTable};
pub use history::{BitrateSample, History, LossSample};
pub use linear::LinearBackoffStrategy;
pub use sim::{LinkCounters, SimulatedTransport};
pub use state::{ConditionerCore, LossTotals};
pub use stats::{LinkStats, StatsReport, StatsReporter};
pub use stepped::SteppedStrategy;
pub use strategy::RateStrategy;
pub use ticker::{ManualTicker, TickFn, Ticker, TokioTicker};
pub use transport::{ConnectionId, StreamTransport};
