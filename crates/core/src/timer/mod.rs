use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    error::panic_message, Notification, Notifier, Result, SoundSink, Status, TimerContext,
};

/// Longest single wait inside a countdown. Keeps resets and pause responsive.
pub const TICK: Duration = Duration::from_millis(100);
/// Longest wait while idle before rechecking for shutdown.
pub const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Countdown arithmetic, free of threads and clocks so it can be tested with
/// synthetic instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    activation: Instant,
    delay: Duration,
    frozen_elapsed: Option<Duration>,
}

impl Countdown {
    pub fn start(activation: Instant, delay: Duration) -> Self {
        Self {
            activation,
            delay,
            frozen_elapsed: None,
        }
    }

    /// Restarts from `activation` with a possibly updated delay. A frozen
    /// countdown stays frozen at zero elapsed time.
    pub fn reset(&mut self, activation: Instant, delay: Duration) {
        self.activation = activation;
        self.delay = delay;
        if self.frozen_elapsed.is_some() {
            self.frozen_elapsed = Some(Duration::ZERO);
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_elapsed.is_some()
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.frozen_elapsed
            .unwrap_or_else(|| now.saturating_duration_since(self.activation))
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.delay.saturating_sub(self.elapsed(now))
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        !self.is_frozen() && self.remaining(now).is_zero()
    }

    pub fn freeze(&mut self, now: Instant) {
        if self.frozen_elapsed.is_none() {
            self.frozen_elapsed = Some(self.elapsed(now));
        }
    }

    /// Continues from the frozen remaining time by moving the activation
    /// point to `now - elapsed`.
    pub fn resume(&mut self, now: Instant) {
        if let Some(elapsed) = self.frozen_elapsed.take() {
            self.activation = now.checked_sub(elapsed).unwrap_or(now);
        }
    }
}

/// How a single countdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEnd {
    Expired,
    Interrupted,
}

/// The timer/sound loop: waits for triggers, counts down, plays the sound.
pub struct TimerEngine {
    ctx: Arc<TimerContext>,
    sound: Option<Arc<dyn SoundSink>>,
    notifier: Notifier,
}

impl std::fmt::Debug for TimerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerEngine")
            .field("ctx", &self.ctx)
            .field("has_sound", &self.sound.is_some())
            .finish_non_exhaustive()
    }
}

impl TimerEngine {
    pub fn new(
        ctx: Arc<TimerContext>,
        sound: Option<Arc<dyn SoundSink>>,
        notifier: Notifier,
    ) -> Self {
        Self {
            ctx,
            sound,
            notifier,
        }
    }

    /// Runs until the context is shutting down. Errors and panics inside a
    /// countdown are reported and the engine returns to idle.
    pub fn run(&self) {
        tracing::info!("timer engine started");
        self.notifier.status(Status::WaitingForTrigger);

        while !self.ctx.is_shutting_down() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.idle_cycle()));
            let fault = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(payload) => Some(panic_message(payload.as_ref())),
            };
            if let Some(message) = fault {
                tracing::error!(%message, "timer engine fault, returning to idle");
                self.notifier.status(Status::ThreadFault {
                    thread: "timer",
                    message,
                });
            }
        }

        tracing::info!("timer engine stopped");
    }

    fn idle_cycle(&self) -> Result<()> {
        let Some(stamp) = self.ctx.trigger().wait_timeout(IDLE_WAIT)? else {
            return Ok(());
        };
        if self.ctx.is_shutting_down() {
            return Ok(());
        }
        if self.ctx.is_paused() {
            self.notifier.status(Status::TriggerWhilePaused);
            return Ok(());
        }

        if self.run_countdown(stamp)? == CountdownEnd::Expired {
            self.finish();
            if !self.ctx.is_shutting_down() {
                self.notifier.status(Status::WaitingForTrigger);
            }
        }
        Ok(())
    }

    /// Counts down from `activation`, restarting on every new trigger.
    pub fn run_countdown(&self, activation: Instant) -> Result<CountdownEnd> {
        let mut countdown = Countdown::start(activation, self.ctx.delay());
        tracing::debug!(delay_secs = countdown.delay().as_secs_f64(), "countdown started");
        self.notifier.status(Status::CountdownStarted {
            delay_secs: countdown.delay().as_secs_f64(),
        });

        loop {
            if self.ctx.is_shutting_down() {
                self.notifier.status(Status::Interrupted);
                return Ok(CountdownEnd::Interrupted);
            }

            let now = Instant::now();
            if self.ctx.is_paused() && !countdown.is_frozen() {
                countdown.freeze(now);
                tracing::debug!(
                    remaining_secs = countdown.remaining(now).as_secs_f64(),
                    "countdown frozen"
                );
            } else if !self.ctx.is_paused() && countdown.is_frozen() {
                countdown.resume(now);
                tracing::debug!(
                    remaining_secs = countdown.remaining(now).as_secs_f64(),
                    "countdown resumed"
                );
            }

            self.report_remaining(&countdown, now);
            if countdown.is_expired(now) {
                return Ok(CountdownEnd::Expired);
            }

            let wait = if countdown.is_frozen() {
                TICK
            } else {
                countdown.remaining(now).min(TICK)
            };
            if let Some(stamp) = self.ctx.trigger().wait_timeout(wait)? {
                if self.ctx.is_shutting_down() {
                    continue;
                }
                if self.ctx.is_paused() {
                    self.notifier.status(Status::TriggerWhilePaused);
                    continue;
                }
                countdown.reset(stamp, self.ctx.delay());
                self.notifier.status(Status::CountdownReset {
                    delay_secs: countdown.delay().as_secs_f64(),
                });
            }
        }
    }

    fn report_remaining(&self, countdown: &Countdown, now: Instant) {
        self.notifier.send(Notification::Countdown {
            remaining: countdown.remaining(now),
            delay: countdown.delay(),
            frozen: countdown.is_frozen(),
        });
    }

    fn finish(&self) {
        // Shutdown may land between the last loop check and expiry.
        if self.ctx.is_shutting_down() {
            self.notifier.status(Status::Interrupted);
            return;
        }
        if self.ctx.is_paused() {
            self.notifier.status(Status::FinishedDuringPause);
            return;
        }
        if !self.ctx.sound_enabled() {
            self.notifier.status(Status::FinishedSoundOff);
            return;
        }
        let Some(sound) = self.sound.as_ref() else {
            self.notifier.status(Status::NoSound);
            return;
        };

        self.notifier.status(Status::Finished);
        if let Err(err) = sound.play() {
            tracing::error!(%err, "sound playback failed");
            self.notifier.status(Status::PlaybackFailed(err.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{TimerConfig, TimerError};

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn remaining_counts_down_from_activation() {
        let t0 = Instant::now();
        let countdown = Countdown::start(t0, ms(5_200));

        assert_eq!(countdown.remaining(t0), ms(5_200));
        assert_eq!(countdown.remaining(t0 + ms(1_200)), ms(4_000));
        assert!(!countdown.is_expired(t0 + ms(5_199)));
        assert!(countdown.is_expired(t0 + ms(5_200)));
        assert_eq!(countdown.remaining(t0 + ms(9_000)), Duration::ZERO);
    }

    #[test]
    fn consecutive_resets_measure_from_the_reset_stamp() {
        let t0 = Instant::now();
        let mut countdown = Countdown::start(t0, ms(1_000));

        countdown.reset(t0 + ms(600), ms(1_000));
        assert_eq!(countdown.remaining(t0 + ms(1_000)), ms(600));

        countdown.reset(t0 + ms(1_200), ms(2_000));
        assert_eq!(countdown.remaining(t0 + ms(1_500)), ms(1_700));

        countdown.reset(t0 + ms(3_000), ms(500));
        assert_eq!(countdown.remaining(t0 + ms(3_000)), ms(500));
        assert!(countdown.is_expired(t0 + ms(3_500)));
    }

    #[test]
    fn freeze_holds_remaining_and_resume_continues_from_it() {
        let t0 = Instant::now();
        let mut countdown = Countdown::start(t0, ms(5_000));

        countdown.freeze(t0 + ms(2_000));
        assert_eq!(countdown.remaining(t0 + ms(2_000)), ms(3_000));
        assert_eq!(countdown.remaining(t0 + ms(60_000)), ms(3_000));
        assert!(!countdown.is_expired(t0 + ms(60_000)));

        countdown.resume(t0 + ms(60_000));
        assert_eq!(countdown.remaining(t0 + ms(60_000)), ms(3_000));
        assert_eq!(countdown.remaining(t0 + ms(61_000)), ms(2_000));
        assert!(countdown.is_expired(t0 + ms(63_000)));
    }

    #[test]
    fn freezing_twice_keeps_the_first_value() {
        let t0 = Instant::now();
        let mut countdown = Countdown::start(t0, ms(1_000));
        countdown.freeze(t0 + ms(100));
        countdown.freeze(t0 + ms(900));
        assert_eq!(countdown.remaining(t0 + ms(900)), ms(900));
    }

    #[derive(Default)]
    struct CountingSink {
        plays: AtomicUsize,
        fail: bool,
    }

    impl SoundSink for CountingSink {
        fn play(&self) -> Result<()> {
            if self.fail {
                return Err(TimerError::AudioUnavailable("device gone".into()));
            }
            self.plays.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn set_volume(&self, _volume: f32) -> Result<()> {
            Ok(())
        }

        fn volume(&self) -> f32 {
            1.0
        }
    }

    type Harness = (
        TimerEngine,
        Arc<TimerContext>,
        crossbeam_channel::Receiver<Notification>,
    );

    fn engine(delay_secs: f64, sink: Option<Arc<CountingSink>>) -> Harness {
        let config = TimerConfig {
            delay_secs,
            ..TimerConfig::default()
        };
        let ctx = Arc::new(TimerContext::new(&config).unwrap());
        let (notifier, rx) = Notifier::channel();
        let sound = sink.map(|sink| sink as Arc<dyn SoundSink>);
        (TimerEngine::new(ctx.clone(), sound, notifier), ctx, rx)
    }

    fn statuses(rx: &crossbeam_channel::Receiver<Notification>) -> Vec<Status> {
        rx.try_iter()
            .filter_map(|n| match n {
                Notification::Status(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn countdown_expires_after_delay() {
        let (engine, _ctx, _rx) = engine(0.05, None);
        let started = Instant::now();

        let end = engine.run_countdown(started).unwrap();

        assert_eq!(end, CountdownEnd::Expired);
        assert!(started.elapsed() >= ms(50));
        assert!(started.elapsed() < ms(500));
    }

    #[test]
    fn shutdown_interrupts_countdown() {
        let (engine, ctx, rx) = engine(5.0, None);
        ctx.begin_shutdown();

        let end = engine.run_countdown(Instant::now()).unwrap();

        assert_eq!(end, CountdownEnd::Interrupted);
        assert!(statuses(&rx).contains(&Status::Interrupted));
    }

    #[test]
    fn finish_plays_sound_when_enabled() {
        let sink = Arc::new(CountingSink::default());
        let (engine, _ctx, rx) = engine(1.0, Some(sink.clone()));

        engine.finish();

        assert_eq!(sink.plays.load(Ordering::SeqCst), 1);
        assert_eq!(statuses(&rx), vec![Status::Finished]);
    }

    #[test]
    fn finish_stays_silent_once_shutdown_has_begun() {
        let sink = Arc::new(CountingSink::default());
        let (engine, ctx, rx) = engine(1.0, Some(sink.clone()));

        ctx.begin_shutdown();
        engine.finish();

        assert_eq!(sink.plays.load(Ordering::SeqCst), 0);
        assert_eq!(statuses(&rx), vec![Status::Interrupted]);
    }

    #[test]
    fn finish_suppresses_sound_when_paused_or_disabled() {
        let sink = Arc::new(CountingSink::default());
        let (engine, ctx, rx) = engine(1.0, Some(sink.clone()));

        ctx.pause();
        engine.finish();
        ctx.resume();
        ctx.set_sound_enabled(false);
        engine.finish();

        assert_eq!(sink.plays.load(Ordering::SeqCst), 0);
        assert_eq!(
            statuses(&rx),
            vec![Status::FinishedDuringPause, Status::FinishedSoundOff]
        );
    }

    #[test]
    fn finish_without_clip_or_with_failing_device_reports_status() {
        let (silent, _ctx, rx) = engine(1.0, None);
        silent.finish();
        assert_eq!(statuses(&rx), vec![Status::NoSound]);

        let failing = Arc::new(CountingSink {
            fail: true,
            ..CountingSink::default()
        });
        let (engine, _ctx, rx) = engine(1.0, Some(failing));
        engine.finish();
        let reported = statuses(&rx);
        assert!(matches!(reported.last(), Some(Status::PlaybackFailed(_))));
    }
}
