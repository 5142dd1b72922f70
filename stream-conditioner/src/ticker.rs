//! Repeating tick schedules
//!
//! A ticker fires a callback once after an initial delay and then at a
//! fixed interval until cancelled. Ticks never overlap.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::ConditionerError;

/// Callback run on every tick
pub type TickFn = Box<dyn FnMut() + Send + 'static>;

pub trait Ticker: Send {
    /// Schedule `on_tick`, replacing any schedule already running
    fn start(&mut self, delay: Duration, interval: Duration, on_tick: TickFn);

    /// Stop firing; a no-op when nothing is scheduled
    fn cancel(&mut self);

    fn is_running(&self) -> bool;
}

/// Ticker driven by a task on a tokio runtime
pub struct TokioTicker {
    runtime: Handle,
    task: Option<JoinHandle<()>>,
}

impl TokioTicker {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            task: None,
        }
    }

    /// Ticker on the runtime the caller is running in
    pub fn current() -> Result<Self, ConditionerError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| ConditionerError::NoRuntime)
    }
}

impl Ticker for TokioTicker {
    fn start(&mut self, delay: Duration, interval: Duration, mut on_tick: TickFn) {
        self.cancel();
        let task = self.runtime.spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + delay, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                on_tick();
            }
        });
        self.task = Some(task);
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for TokioTicker {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Default)]
struct ManualState {
    on_tick: Option<TickFn>,
    schedule: Option<(Duration, Duration)>,
    generation: u64,
    starts: usize,
}

/// Ticker that only fires when told to
///
/// Clones share one schedule, so a test can keep a clone while the
/// conditioner owns the original.
#[derive(Clone, Default)]
pub struct ManualTicker {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the scheduled callback once, returns false when nothing is scheduled
    pub fn fire(&self) -> bool {
        let (callback, generation) = {
            let mut state = self.lock();
            (state.on_tick.take(), state.generation)
        };
        let Some(mut callback) = callback else {
            return false;
        };

        callback();

        // Put it back unless the callback cancelled or replaced the schedule
        let mut state = self.lock();
        if state.generation == generation && state.schedule.is_some() {
            state.on_tick = Some(callback);
        }
        true
    }

    /// Delay and interval of the active schedule
    pub fn schedule(&self) -> Option<(Duration, Duration)> {
        self.lock().schedule
    }

    /// How many times a schedule has been started
    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Ticker for ManualTicker {
    fn start(&mut self, delay: Duration, interval: Duration, on_tick: TickFn) {
        let mut state = self.lock();
        state.generation += 1;
        state.starts += 1;
        state.schedule = Some((delay, interval));
        state.on_tick = Some(on_tick);
    }

    fn cancel(&mut self) {
        let mut state = self.lock();
        state.generation += 1;
        state.schedule = None;
        state.on_tick = None;
    }

    fn is_running(&self) -> bool {
        self.lock().schedule.is_some()
    }
}
