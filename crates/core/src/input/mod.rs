//! Controller polling: turns device events into trigger signals, captured
//! buttons and connection status.

mod gamepad;

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};

pub use gamepad::{button_index, GilrsInput};

use crate::{
    error::panic_message, ControllerStatus, Notification, Notifier, PressOutcome, Result,
    Status, TimerContext,
};

/// Identifier of a controller as reported by the backend.
pub type DeviceId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
}

/// Raw events produced by one poll of the input subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    ButtonDown { device: DeviceId, button: u32 },
    DeviceAdded(DeviceId),
    DeviceRemoved(DeviceId),
}

/// Source of controller events.
pub trait InputBackend {
    /// Controllers currently connected.
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Opens a controller for watching. Returns `None` if it is gone.
    fn open(&mut self, id: DeviceId) -> Option<DeviceInfo>;

    /// Drains the events that arrived since the last call.
    fn poll(&mut self) -> Vec<InputEvent>;
}

/// Watches one controller and feeds presses into the shared context.
pub struct InputPoller<B> {
    backend: Option<B>,
    attached: Option<DeviceInfo>,
    ctx: Arc<TimerContext>,
    notifier: Notifier,
}

impl<B> std::fmt::Debug for InputPoller<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputPoller")
            .field("degraded", &self.backend.is_none())
            .field("attached", &self.attached)
            .finish_non_exhaustive()
    }
}

impl<B: InputBackend> InputPoller<B> {
    /// Creates a poller. A failed backend leaves the poller in degraded mode
    /// where it only services capture timeouts.
    pub fn new(backend: Result<B>, ctx: Arc<TimerContext>, notifier: Notifier) -> Self {
        let backend = match backend {
            Ok(backend) => Some(backend),
            Err(err) => {
                tracing::error!(%err, "input subsystem unavailable");
                notifier.status(Status::InputUnavailable(err.to_string()));
                notifier.send(Notification::Controller(ControllerStatus::Unavailable(
                    err.to_string(),
                )));
                None
            }
        };
        let mut poller = Self {
            backend,
            attached: None,
            ctx,
            notifier,
        };
        if poller.backend.is_some() {
            poller.attach_any();
        }
        poller
    }

    pub fn attached(&self) -> Option<&DeviceInfo> {
        self.attached.as_ref()
    }

    /// Polls every `interval` until shutdown. `wake` disconnecting ends the
    /// wait early.
    pub fn run(&mut self, interval: Duration, wake: Receiver<()>) {
        tracing::info!(interval_ms = interval.as_millis() as u64, "input poller started");

        while !self.ctx.is_shutting_down() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.cycle(Instant::now())));
            let fault = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(payload) => Some(panic_message(payload.as_ref())),
            };
            if let Some(message) = fault {
                tracing::error!(%message, "input poller fault, resuming");
                self.notifier.status(Status::ThreadFault {
                    thread: "input",
                    message,
                });
            }

            match wake.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) | Ok(()) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.attached = None;
        tracing::info!("input poller stopped");
    }

    /// One poll: expire a stale capture, then handle every pending event.
    pub fn cycle(&mut self, now: Instant) -> Result<()> {
        if self.ctx.expire_capture(now)? {
            let target = self.ctx.target_button();
            tracing::info!(?target, "button capture timed out");
            self.notifier.status(Status::CaptureTimedOut);
            self.notifier.send(Notification::CaptureEnded {
                target,
                captured: false,
            });
        }

        let events = match self.backend.as_mut() {
            Some(backend) => backend.poll(),
            None => return Ok(()),
        };
        for event in events {
            self.handle_event(event, now)?;
        }
        Ok(())
    }

    pub fn handle_event(&mut self, event: InputEvent, now: Instant) -> Result<()> {
        match event {
            InputEvent::DeviceAdded(id) => {
                tracing::debug!(id, "controller added");
                if self.attached.is_none() {
                    self.attach(id);
                }
            }
            InputEvent::DeviceRemoved(id) => {
                tracing::debug!(id, "controller removed");
                if self.attached.as_ref().is_some_and(|device| device.id == id) {
                    self.attached = None;
                    self.attach_any();
                }
            }
            InputEvent::ButtonDown { device, button } => {
                if self.attached.as_ref().map(|d| d.id) != Some(device) {
                    return Ok(());
                }
                tracing::debug!(button, "controller button pressed");
                self.handle_button(button, now)?;
            }
        }
        Ok(())
    }

    fn handle_button(&mut self, button: u32, now: Instant) -> Result<()> {
        if self.ctx.complete_capture(button)? {
            tracing::info!(button, "captured target button");
            self.notifier.status(Status::ButtonCaptured(button));
            self.notifier.send(Notification::TargetButton(Some(button)));
            self.notifier.send(Notification::CaptureEnded {
                target: Some(button),
                captured: true,
            });
            return Ok(());
        }

        if self.ctx.target_button() != Some(button) {
            return Ok(());
        }
        match self.ctx.register_press(now)? {
            PressOutcome::Triggered { count } => {
                self.notifier.send(Notification::Presses(count));
            }
            PressOutcome::IgnoredPaused => self.notifier.status(Status::TriggerWhilePaused),
            PressOutcome::IgnoredShuttingDown => {}
        }
        Ok(())
    }

    fn attach_any(&mut self) {
        let candidates = self
            .backend
            .as_ref()
            .map(|backend| backend.devices())
            .unwrap_or_default();
        for device in candidates {
            if self.attach(device.id) {
                return;
            }
        }
        tracing::info!("no controller detected");
        self.notifier
            .send(Notification::Controller(ControllerStatus::Disconnected));
    }

    fn attach(&mut self, id: DeviceId) -> bool {
        let Some(device) = self.backend.as_mut().and_then(|backend| backend.open(id)) else {
            return false;
        };
        tracing::info!(id = device.id, name = %device.name, "controller attached");
        self.notifier
            .send(Notification::Controller(ControllerStatus::Connected {
                id: device.id,
                name: device.name.clone(),
            }));
        self.attached = Some(device);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::{TimerConfig, TimerError};

    #[derive(Default)]
    struct ScriptedInput {
        connected: Vec<DeviceInfo>,
        pending: VecDeque<InputEvent>,
    }

    impl ScriptedInput {
        fn with_devices(ids: &[DeviceId]) -> Self {
            Self {
                connected: ids
                    .iter()
                    .map(|id| DeviceInfo {
                        id: *id,
                        name: format!("pad {id}"),
                    })
                    .collect(),
                pending: VecDeque::new(),
            }
        }
    }

    impl InputBackend for ScriptedInput {
        fn devices(&self) -> Vec<DeviceInfo> {
            self.connected.clone()
        }

        fn open(&mut self, id: DeviceId) -> Option<DeviceInfo> {
            self.connected.iter().find(|d| d.id == id).cloned()
        }

        fn poll(&mut self) -> Vec<InputEvent> {
            self.pending.drain(..).collect()
        }
    }

    fn poller(
        backend: Result<ScriptedInput>,
        target: Option<u32>,
    ) -> (
        InputPoller<ScriptedInput>,
        Arc<TimerContext>,
        Receiver<Notification>,
    ) {
        let config = TimerConfig {
            target_button: target,
            ..TimerConfig::default()
        };
        let ctx = Arc::new(TimerContext::new(&config).unwrap());
        let (notifier, rx) = Notifier::channel();
        (InputPoller::new(backend, ctx.clone(), notifier), ctx, rx)
    }

    fn press(device: DeviceId, button: u32) -> InputEvent {
        InputEvent::ButtonDown { device, button }
    }

    #[test]
    fn attaches_to_first_device_on_start() {
        let (poller, _ctx, rx) = poller(Ok(ScriptedInput::with_devices(&[3, 4])), None);

        assert_eq!(poller.attached().map(|d| d.id), Some(3));
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::Controller(ControllerStatus::Connected {
                id: 3,
                name: "pad 3".into()
            })
        );
    }

    #[test]
    fn target_press_triggers_and_counts() {
        let (mut poller, ctx, rx) = poller(Ok(ScriptedInput::with_devices(&[0])), Some(5));
        let now = Instant::now();

        poller.handle_event(press(0, 5), now).unwrap();
        poller.handle_event(press(0, 2), now).unwrap();

        assert_eq!(ctx.presses(), 1);
        assert_eq!(ctx.trigger().take().unwrap(), Some(now));
        assert!(rx.try_iter().any(|n| n == Notification::Presses(1)));
    }

    #[test]
    fn presses_from_other_devices_are_ignored() {
        let (mut poller, ctx, _rx) = poller(Ok(ScriptedInput::with_devices(&[0, 1])), Some(5));

        poller.handle_event(press(1, 5), Instant::now()).unwrap();

        assert_eq!(ctx.presses(), 0);
        assert!(!ctx.trigger().is_set().unwrap());
    }

    #[test]
    fn press_while_paused_reports_status_without_trigger() {
        let (mut poller, ctx, rx) = poller(Ok(ScriptedInput::with_devices(&[0])), Some(5));
        ctx.pause();

        poller.handle_event(press(0, 5), Instant::now()).unwrap();

        assert!(!ctx.trigger().is_set().unwrap());
        assert!(rx
            .try_iter()
            .any(|n| n == Notification::Status(Status::TriggerWhilePaused)));
    }

    #[test]
    fn capture_consumes_exactly_the_next_press() {
        let (mut poller, ctx, rx) = poller(Ok(ScriptedInput::with_devices(&[0])), Some(5));
        let now = Instant::now();
        ctx.begin_capture(now, Duration::from_secs(10)).unwrap();

        poller.handle_event(press(0, 2), now).unwrap();
        assert_eq!(ctx.target_button(), Some(2));
        assert!(!ctx.capture_active().unwrap());
        assert!(!ctx.trigger().is_set().unwrap());
        assert!(rx.try_iter().any(|n| n
            == Notification::CaptureEnded {
                target: Some(2),
                captured: true
            }));

        poller.handle_event(press(0, 2), now).unwrap();
        assert_eq!(ctx.presses(), 1);
    }

    #[test]
    fn capture_times_out_and_keeps_previous_target() {
        let (mut poller, ctx, rx) = poller(Ok(ScriptedInput::with_devices(&[0])), Some(5));
        let now = Instant::now();
        ctx.begin_capture(now, Duration::from_millis(50)).unwrap();

        poller.cycle(now + Duration::from_millis(10)).unwrap();
        assert!(ctx.capture_active().unwrap());

        poller.cycle(now + Duration::from_millis(60)).unwrap();
        assert!(!ctx.capture_active().unwrap());
        assert_eq!(ctx.target_button(), Some(5));
        let notifications: Vec<_> = rx.try_iter().collect();
        assert!(notifications.contains(&Notification::Status(Status::CaptureTimedOut)));
        assert!(notifications.contains(&Notification::CaptureEnded {
            target: Some(5),
            captured: false
        }));
    }

    #[test]
    fn removal_of_attached_device_reattaches_to_another() {
        let (mut poller, _ctx, _rx) = poller(Ok(ScriptedInput::with_devices(&[0, 1])), None);
        poller.backend.as_mut().unwrap().connected.remove(0);

        poller
            .handle_event(InputEvent::DeviceRemoved(0), Instant::now())
            .unwrap();

        assert_eq!(poller.attached().map(|d| d.id), Some(1));
    }

    #[test]
    fn removal_of_last_device_detaches_and_addition_reattaches() {
        let (mut poller, _ctx, rx) = poller(Ok(ScriptedInput::with_devices(&[0])), None);
        poller.backend.as_mut().unwrap().connected.clear();

        poller
            .handle_event(InputEvent::DeviceRemoved(0), Instant::now())
            .unwrap();
        assert!(poller.attached().is_none());
        assert!(rx
            .try_iter()
            .any(|n| n == Notification::Controller(ControllerStatus::Disconnected)));

        let backend = poller.backend.as_mut().unwrap();
        backend.connected.push(DeviceInfo {
            id: 7,
            name: "pad 7".into(),
        });
        backend.pending.push_back(InputEvent::DeviceAdded(7));
        poller.cycle(Instant::now()).unwrap();
        assert_eq!(poller.attached().map(|d| d.id), Some(7));
    }

    #[test]
    fn failed_backend_degrades_but_still_expires_capture() {
        let (mut poller, ctx, rx) = poller(
            Err(TimerError::InputUnavailable("no gamepad subsystem".into())),
            None,
        );
        assert!(rx
            .try_iter()
            .any(|n| matches!(n, Notification::Status(Status::InputUnavailable(_)))));

        let now = Instant::now();
        ctx.begin_capture(now, Duration::from_millis(1)).unwrap();
        poller.cycle(now + Duration::from_millis(5)).unwrap();
        assert!(!ctx.capture_active().unwrap());
    }

    #[test]
    fn run_returns_when_wake_channel_disconnects() {
        let (mut poller, _ctx, _rx) = poller(Ok(ScriptedInput::default()), None);
        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<()>(0);
        drop(wake_tx);

        let started = Instant::now();
        poller.run(Duration::from_secs(5), wake_rx);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
