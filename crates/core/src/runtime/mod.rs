//! Owns the background threads and exposes the controls the presentation
//! layer calls into.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;

use crate::{
    config, InputBackend, InputPoller, Notification, Notifier, PressOutcome, Result, Snapshot,
    SoundSink, Status, TimerConfig, TimerContext, TimerEngine, TimerError,
};

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Which background threads exited inside the join timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub poller_joined: bool,
    pub engine_joined: bool,
}

impl ShutdownReport {
    pub fn clean(&self) -> bool {
        self.poller_joined && self.engine_joined
    }
}

pub struct Runtime {
    ctx: Arc<TimerContext>,
    sound: Option<Arc<dyn SoundSink>>,
    notifier: Notifier,
    capture_timeout: Duration,
    join_timeout: Duration,
    poller_wake: Option<Sender<()>>,
    poller: Option<JoinHandle<()>>,
    engine: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("ctx", &self.ctx)
            .field("has_sound", &self.sound.is_some())
            .field("capture_timeout", &self.capture_timeout)
            .field("join_timeout", &self.join_timeout)
            .field("running", &(self.poller.is_some() || self.engine.is_some()))
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Spawns the input poller and the timer engine.
    ///
    /// `open_input` runs on the poller thread, so backends that are not
    /// `Send` work. If it fails the poller runs degraded and the timer can
    /// still be driven with [`Runtime::simulate_trigger`].
    pub fn start<B, F>(
        config: &TimerConfig,
        open_input: F,
        sound: Option<Arc<dyn SoundSink>>,
        notifier: Notifier,
    ) -> Result<Self>
    where
        B: InputBackend + 'static,
        F: FnOnce() -> Result<B> + Send + 'static,
    {
        config.validate()?;
        let ctx = Arc::new(TimerContext::new(config)?);
        notifier.send(Notification::DelayApplied(ctx.delay_secs()));
        notifier.send(Notification::TargetButton(ctx.target_button()));
        if ctx.target_button().is_none() {
            notifier.status(Status::NoTargetButton);
        }

        let engine = {
            let engine = TimerEngine::new(ctx.clone(), sound.clone(), notifier.clone());
            thread::Builder::new()
                .name("timer-engine".into())
                .spawn(move || engine.run())?
        };

        let (poller_wake, wake_rx) = crossbeam_channel::bounded::<()>(1);
        let poller = {
            let ctx = ctx.clone();
            let notifier = notifier.clone();
            let interval = config.poll_interval();
            thread::Builder::new()
                .name("input-poller".into())
                .spawn(move || {
                    let mut poller = InputPoller::new(open_input(), ctx, notifier);
                    poller.run(interval, wake_rx);
                })
        };
        let poller = match poller {
            Ok(handle) => handle,
            Err(err) => {
                ctx.begin_shutdown();
                let _ = join_within(engine, Instant::now() + config.join_timeout());
                return Err(err.into());
            }
        };

        tracing::info!(
            delay_secs = ctx.delay_secs(),
            target = ?ctx.target_button(),
            "runtime started"
        );
        Ok(Self {
            ctx,
            sound,
            notifier,
            capture_timeout: config.capture_timeout(),
            join_timeout: config.join_timeout(),
            poller_wake: Some(poller_wake),
            poller: Some(poller),
            engine: Some(engine),
        })
    }

    pub fn context(&self) -> &Arc<TimerContext> {
        &self.ctx
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.ctx.snapshot()
    }

    /// Applies a new delay. The running countdown picks it up on its next
    /// reset.
    pub fn set_delay(&self, seconds: f64) -> Result<()> {
        match self.ctx.set_delay(seconds) {
            Ok(()) => {
                tracing::info!(delay_secs = seconds, "delay updated");
                self.notifier.status(Status::DelayUpdated(seconds));
                self.notifier.send(Notification::DelayApplied(seconds));
                Ok(())
            }
            Err(err) => Err(self.reject_delay(err)),
        }
    }

    /// Parses and applies delay text typed by the user.
    pub fn apply_delay_text(&self, text: &str) -> Result<f64> {
        let seconds = config::parse_delay(text).map_err(|err| self.reject_delay(err))?;
        self.set_delay(seconds)?;
        Ok(seconds)
    }

    fn reject_delay(&self, err: TimerError) -> TimerError {
        let previous = self.ctx.delay_secs();
        tracing::warn!(%err, previous, "delay rejected");
        self.notifier.status(Status::DelayRejected {
            reason: err.to_string(),
            previous,
        });
        self.notifier.send(Notification::DelayApplied(previous));
        err
    }

    pub fn set_target_button(&self, button: Option<u32>) -> Result<()> {
        if self.ctx.cancel_capture()? {
            self.notifier.send(Notification::CaptureEnded {
                target: button,
                captured: false,
            });
        }
        self.ctx.set_target_button(button);
        tracing::info!(?button, "target button set");
        self.notifier.status(Status::TargetButtonSet(button));
        self.notifier.send(Notification::TargetButton(button));
        Ok(())
    }

    /// Binds the next button press as the watched button. Cancels itself
    /// after the configured capture timeout.
    pub fn request_capture(&self) -> Result<()> {
        self.ctx.begin_capture(Instant::now(), self.capture_timeout)?;
        tracing::info!(
            timeout_ms = self.capture_timeout.as_millis() as u64,
            "button capture requested"
        );
        self.notifier.status(Status::CaptureStarted {
            timeout_secs: self.capture_timeout.as_secs_f64(),
        });
        Ok(())
    }

    pub fn pause(&self) {
        if self.ctx.pause() {
            self.notifier.status(Status::Paused);
        }
    }

    pub fn resume(&self) {
        if self.ctx.resume() {
            self.notifier.status(Status::Resumed);
        }
    }

    pub fn toggle_pause(&self) {
        if self.ctx.is_paused() {
            self.resume();
        } else {
            self.pause();
        }
    }

    /// Acts as if the watched button had been pressed now.
    pub fn simulate_trigger(&self) -> Result<()> {
        match self.ctx.register_press(Instant::now())? {
            PressOutcome::Triggered { count } => {
                self.notifier.send(Notification::Presses(count));
            }
            PressOutcome::IgnoredPaused => {
                self.notifier.status(Status::TriggerWhilePaused);
            }
            PressOutcome::IgnoredShuttingDown => {}
        }
        Ok(())
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        config::validate_volume(volume)?;
        let Some(sound) = self.sound.as_ref() else {
            return Err(TimerError::AudioUnavailable("no sound loaded".into()));
        };
        sound.set_volume(volume)?;
        self.notifier.status(Status::VolumeChanged(volume));
        Ok(())
    }

    pub fn set_sound_enabled(&self, enabled: bool) {
        self.ctx.set_sound_enabled(enabled);
        self.notifier.status(Status::SoundToggled(enabled));
    }

    /// Stops both loops and waits for them up to the join timeout. Safe to
    /// call more than once.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.poller.is_none() && self.engine.is_none() {
            return ShutdownReport {
                poller_joined: true,
                engine_joined: true,
            };
        }

        tracing::info!("shutting down");
        self.notifier.status(Status::ShuttingDown);
        self.ctx.begin_shutdown();
        self.poller_wake.take();

        let deadline = Instant::now() + self.join_timeout;
        let report = ShutdownReport {
            poller_joined: self
                .poller
                .take()
                .map_or(true, |handle| join_within(handle, deadline)),
            engine_joined: self
                .engine
                .take()
                .map_or(true, |handle| join_within(handle, deadline)),
        };
        if !report.clean() {
            tracing::warn!(?report, "background threads did not stop in time");
        }
        self.notifier.send(Notification::Stopped);
        report
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Joins `handle` if it finishes before `deadline`. A thread still running at
/// the deadline is left detached.
fn join_within(handle: JoinHandle<()>, deadline: Instant) -> bool {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        tracing::error!("background thread panicked");
    }
    true
}
