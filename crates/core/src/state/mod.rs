//! Process-wide state shared by the poller, the engine and the UI thread.
//!
//! Config values are plain atomics written only on explicit user action. The
//! only synchronisation point between poller and engine is [`TriggerSignal`].

use std::{
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering},
        Condvar, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use crate::{config, Result, TimerConfig, TimerError};

/// Lifecycle of the whole process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    ShuttingDown,
}

impl RunState {
    fn to_u8(self) -> u8 {
        match self {
            RunState::Running => 0,
            RunState::Paused => 1,
            RunState::ShuttingDown => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::Running,
            1 => RunState::Paused,
            _ => RunState::ShuttingDown,
        }
    }
}

/// Single-slot wake-up condition carrying the timestamp of the latest
/// trigger. Setting it twice before it is consumed keeps only the newest
/// timestamp.
#[derive(Debug, Default)]
pub struct TriggerSignal {
    slot: Mutex<Option<Instant>>,
    ready: Condvar,
}

impl TriggerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, at: Instant) -> Result<()> {
        let mut slot = self.lock()?;
        let latest = match *slot {
            Some(pending) if pending > at => pending,
            _ => at,
        };
        *slot = Some(latest);
        self.ready.notify_all();
        Ok(())
    }

    /// Blocks for at most `timeout` and consumes the pending trigger, if any.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<Instant>> {
        let slot = self.lock()?;
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |pending| pending.is_none())
            .map_err(|_| TimerError::poisoned("trigger signal"))?;
        Ok(slot.take())
    }

    pub fn take(&self) -> Result<Option<Instant>> {
        Ok(self.lock()?.take())
    }

    pub fn is_set(&self) -> Result<bool> {
        Ok(self.lock()?.is_some())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Instant>>> {
        self.slot
            .lock()
            .map_err(|_| TimerError::poisoned("trigger signal"))
    }
}

/// Result of a recognised action-button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressOutcome {
    Triggered { count: u64 },
    IgnoredPaused,
    IgnoredShuttingDown,
}

/// Plain-data view of the shared state for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub delay_secs: f64,
    pub target_button: Option<u32>,
    pub run_state: RunState,
    pub presses: u64,
    pub capture_active: bool,
    pub sound_enabled: bool,
}

const NO_BUTTON: i64 = -1;

/// Shared context handed to every component instead of module globals.
#[derive(Debug)]
pub struct TimerContext {
    delay_bits: AtomicU64,
    target_button: AtomicI64,
    run_state: AtomicU8,
    sound_enabled: AtomicBool,
    presses: AtomicU64,
    trigger: TriggerSignal,
    last_trigger: Mutex<Option<Instant>>,
    capture_deadline: Mutex<Option<Instant>>,
}

impl TimerContext {
    pub fn new(config: &TimerConfig) -> Result<Self> {
        config::validate_delay(config.delay_secs)?;
        Ok(Self {
            delay_bits: AtomicU64::new(config.delay_secs.to_bits()),
            target_button: AtomicI64::new(encode_button(config.target_button)),
            run_state: AtomicU8::new(RunState::Running.to_u8()),
            sound_enabled: AtomicBool::new(config.sound_enabled),
            presses: AtomicU64::new(0),
            trigger: TriggerSignal::new(),
            last_trigger: Mutex::new(None),
            capture_deadline: Mutex::new(None),
        })
    }

    pub fn delay_secs(&self) -> f64 {
        f64::from_bits(self.delay_bits.load(Ordering::Acquire))
    }

    pub fn delay(&self) -> Duration {
        config::saturating_duration(self.delay_secs())
    }

    /// Applies a new delay. On rejection the previous value stays in place.
    pub fn set_delay(&self, seconds: f64) -> Result<()> {
        config::validate_delay(seconds)?;
        self.delay_bits.store(seconds.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn target_button(&self) -> Option<u32> {
        decode_button(self.target_button.load(Ordering::Acquire))
    }

    pub fn set_target_button(&self, button: Option<u32>) {
        self.target_button
            .store(encode_button(button), Ordering::Release);
    }

    pub fn run_state(&self) -> RunState {
        RunState::from_u8(self.run_state.load(Ordering::Acquire))
    }

    pub fn is_paused(&self) -> bool {
        self.run_state() == RunState::Paused
    }

    pub fn is_shutting_down(&self) -> bool {
        self.run_state() == RunState::ShuttingDown
    }

    /// Returns `true` if the state changed.
    pub fn pause(&self) -> bool {
        self.transition(RunState::Running, RunState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition(RunState::Paused, RunState::Running)
    }

    /// Marks the process as shutting down and wakes a waiting engine.
    pub fn begin_shutdown(&self) {
        self.run_state
            .store(RunState::ShuttingDown.to_u8(), Ordering::Release);
        if let Err(err) = self.trigger.set(Instant::now()) {
            tracing::warn!(%err, "could not wake the timer engine");
        }
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        self.run_state
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn sound_enabled(&self) -> bool {
        self.sound_enabled.load(Ordering::Acquire)
    }

    pub fn set_sound_enabled(&self, enabled: bool) {
        self.sound_enabled.store(enabled, Ordering::Release);
    }

    pub fn presses(&self) -> u64 {
        self.presses.load(Ordering::Acquire)
    }

    pub fn trigger(&self) -> &TriggerSignal {
        &self.trigger
    }

    pub fn last_trigger(&self) -> Result<Option<Instant>> {
        Ok(*lock(&self.last_trigger, "last trigger")?)
    }

    /// Records an action press stamped at `at`. Presses while paused are
    /// dropped rather than queued.
    pub fn register_press(&self, at: Instant) -> Result<PressOutcome> {
        match self.run_state() {
            RunState::Paused => return Ok(PressOutcome::IgnoredPaused),
            RunState::ShuttingDown => return Ok(PressOutcome::IgnoredShuttingDown),
            RunState::Running => {}
        }
        *lock(&self.last_trigger, "last trigger")? = Some(at);
        let count = self.presses.fetch_add(1, Ordering::AcqRel) + 1;
        self.trigger.set(at)?;
        Ok(PressOutcome::Triggered { count })
    }

    pub fn begin_capture(&self, now: Instant, timeout: Duration) -> Result<()> {
        let deadline = now.checked_add(timeout).ok_or_else(|| {
            TimerError::InvalidConfig(format!("capture timeout of {timeout:?} is too long"))
        })?;
        *lock(&self.capture_deadline, "capture deadline")? = Some(deadline);
        Ok(())
    }

    pub fn capture_active(&self) -> Result<bool> {
        Ok(lock(&self.capture_deadline, "capture deadline")?.is_some())
    }

    /// Consumes an active capture with `button` as the new target.
    /// Returns `false` when no capture was active.
    pub fn complete_capture(&self, button: u32) -> Result<bool> {
        let mut deadline = lock(&self.capture_deadline, "capture deadline")?;
        if deadline.take().is_none() {
            return Ok(false);
        }
        self.set_target_button(Some(button));
        Ok(true)
    }

    /// Cancels a capture whose deadline has passed. Returns `true` if one was
    /// cancelled.
    pub fn expire_capture(&self, now: Instant) -> Result<bool> {
        let mut deadline = lock(&self.capture_deadline, "capture deadline")?;
        match *deadline {
            Some(until) if now >= until => {
                *deadline = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn cancel_capture(&self) -> Result<bool> {
        Ok(lock(&self.capture_deadline, "capture deadline")?
            .take()
            .is_some())
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            delay_secs: self.delay_secs(),
            target_button: self.target_button(),
            run_state: self.run_state(),
            presses: self.presses(),
            capture_active: self.capture_active()?,
            sound_enabled: self.sound_enabled(),
        })
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| TimerError::poisoned(what))
}

fn encode_button(button: Option<u32>) -> i64 {
    button.map(i64::from).unwrap_or(NO_BUTTON)
}

fn decode_button(raw: i64) -> Option<u32> {
    u32::try_from(raw).ok()
}
