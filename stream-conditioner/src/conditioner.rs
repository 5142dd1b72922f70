//! Conditioner assembly: core + strategy, polling and factory
//!
//! [`Conditioner`] is the synchronous control loop. [`ConditionerHandle`]
//! owns one behind a mutex together with a [`Ticker`] that drives its
//! polling, so lifecycle calls and ticks are always serialized.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::clock::Clock;
use crate::config::{ConditionerConfig, ConditionerMode, PollTiming};
use crate::state::{loss_history_capacity, ConditionerCore};
use crate::linear::LinearBackoffStrategy;
use crate::stepped::SteppedStrategy;
use crate::strategy::RateStrategy;
use crate::ticker::Ticker;
use crate::transport::{ConnectionId, StreamTransport};

/// Build the strategy for a mode, `None` for [`ConditionerMode::Off`]
pub fn strategy_for(mode: ConditionerMode) -> Option<Box<dyn RateStrategy>> {
    match mode {
        ConditionerMode::Off => None,
        ConditionerMode::Linear => Some(Box::new(LinearBackoffStrategy::new())),
        ConditionerMode::Stepped => Some(Box::new(SteppedStrategy::new())),
    }
}

pub struct Conditioner {
    core: ConditionerCore,
    strategy: Box<dyn RateStrategy>,
    timing: PollTiming,
}

impl Conditioner {
    pub fn new(
        config: ConditionerConfig,
        strategy: Box<dyn RateStrategy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let timing = config.poll_timing(strategy.poll_timing());
        let capacity = loss_history_capacity(strategy.loss_window(), timing.interval);
        Self {
            core: ConditionerCore::new(config, clock, capacity),
            strategy,
            timing,
        }
    }

    /// Conditioner for `config.mode`, `None` when conditioning is off
    pub fn from_config(config: ConditionerConfig, clock: Arc<dyn Clock>) -> Option<Self> {
        let strategy = strategy_for(config.mode)?;
        Some(Self::new(config, strategy, clock))
    }

    pub fn start(
        &mut self,
        transport: Arc<dyn StreamTransport>,
        initial_bitrate: u32,
        connections: impl IntoIterator<Item = ConnectionId>,
    ) {
        self.core.start(transport, initial_bitrate, connections);
        self.strategy.on_start(&mut self.core);
    }

    pub fn stop(&mut self) {
        self.core.stop();
    }

    pub fn pause(&mut self) {
        self.strategy.on_pause(&mut self.core);
    }

    /// Returns false when idle
    pub fn resume(&mut self) -> bool {
        if !self.core.resume() {
            return false;
        }
        self.strategy.on_resume(&mut self.core);
        true
    }

    pub fn add_connection(&mut self, connection: ConnectionId) {
        self.core.add_connection(connection);
    }

    pub fn remove_connection(&mut self, connection: ConnectionId) {
        self.core.remove_connection(connection);
    }

    pub fn get_bitrate(&self) -> u32 {
        self.core.get_bitrate()
    }

    /// One poll: read loss across active connections and let the strategy decide
    pub fn tick(&mut self) {
        match self.core.poll_loss() {
            Ok(Some(totals)) => {
                self.strategy
                    .evaluate(&mut self.core, totals.audio_lost, totals.video_lost);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Skipping {} conditioner tick: {}", self.strategy.name(), e);
            }
        }
    }

    pub fn poll_timing(&self) -> PollTiming {
        self.timing
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Lowest bitrate the strategy will command for the current session
    pub fn floor_bitrate(&self) -> u32 {
        self.strategy.floor_bitrate(self.core.nominal_bitrate())
    }

    pub fn core(&self) -> &ConditionerCore {
        &self.core
    }
}

/// A conditioner with its polling schedule
pub struct ConditionerHandle {
    inner: Arc<Mutex<Conditioner>>,
    ticker: Box<dyn Ticker>,
}

impl ConditionerHandle {
    pub fn new(conditioner: Conditioner, ticker: Box<dyn Ticker>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conditioner)),
            ticker,
        }
    }

    /// Start conditioning and begin polling
    pub fn start(
        &mut self,
        transport: Arc<dyn StreamTransport>,
        initial_bitrate: u32,
        connections: impl IntoIterator<Item = ConnectionId>,
    ) {
        self.lock().start(transport, initial_bitrate, connections);
        self.start_polling();
    }

    /// Stop conditioning and cancel polling
    pub fn stop(&mut self) {
        self.lock().stop();
        self.ticker.cancel();
    }

    /// Suspend polling, keeping all history
    pub fn pause(&mut self) {
        self.lock().pause();
        self.ticker.cancel();
    }

    /// Return to the nominal rate and poll again; a no-op when idle
    pub fn resume(&mut self) {
        let resumed = self.lock().resume();
        if resumed {
            self.start_polling();
        }
    }

    pub fn add_connection(&self, connection: ConnectionId) {
        self.lock().add_connection(connection);
    }

    pub fn remove_connection(&self, connection: ConnectionId) {
        self.lock().remove_connection(connection);
    }

    pub fn get_bitrate(&self) -> u32 {
        self.lock().get_bitrate()
    }

    pub fn is_polling(&self) -> bool {
        self.ticker.is_running()
    }

    /// Exclusive access to the conditioner, blocking ticks while held
    pub fn lock(&self) -> MutexGuard<'_, Conditioner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_polling(&mut self) {
        let (timing, name) = {
            let conditioner = self.lock();
            (conditioner.poll_timing(), conditioner.strategy_name())
        };
        if !timing.is_enabled() {
            tracing::debug!("Polling disabled for {} conditioner", name);
            self.ticker.cancel();
            return;
        }

        let weak: Weak<Mutex<Conditioner>> = Arc::downgrade(&self.inner);
        self.ticker.start(
            timing.delay,
            timing.interval,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().unwrap_or_else(|e| e.into_inner()).tick();
                }
            }),
        );
    }
}

/// Conditioner for `config.mode` driven by `ticker`, `None` when off
pub fn create_conditioner(
    config: ConditionerConfig,
    clock: Arc<dyn Clock>,
    ticker: Box<dyn Ticker>,
) -> Option<ConditionerHandle> {
    let conditioner = Conditioner::from_config(config, clock)?;
    tracing::debug!("Created {} conditioner", conditioner.strategy_name());
    Some(ConditionerHandle::new(conditioner, ticker))
}
