//! Notifications from the background threads to the presentation layer.
//!
//! Workers never touch the UI. They push [`Notification`] values onto a
//! channel and the UI thread drains it on its own schedule.

use std::{fmt, time::Duration};

use crossbeam_channel::{Receiver, Sender};

/// Connection state of the watched controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerStatus {
    Connected { id: usize, name: String },
    Disconnected,
    Unavailable(String),
}

/// Human readable status line updates.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Starting,
    WaitingForTrigger,
    NoTargetButton,
    CountdownStarted { delay_secs: f64 },
    CountdownReset { delay_secs: f64 },
    Paused,
    Resumed,
    TriggerWhilePaused,
    Finished,
    FinishedDuringPause,
    FinishedSoundOff,
    NoSound,
    PlaybackFailed(String),
    DelayUpdated(f64),
    DelayRejected { reason: String, previous: f64 },
    CaptureStarted { timeout_secs: f64 },
    ButtonCaptured(u32),
    CaptureTimedOut,
    TargetButtonSet(Option<u32>),
    SoundLoaded,
    SoundFallback,
    AudioUnavailable(String),
    InputUnavailable(String),
    VolumeChanged(f32),
    SoundToggled(bool),
    ThreadFault { thread: &'static str, message: String },
    Interrupted,
    ShuttingDown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Starting => write!(f, "Starting..."),
            Status::WaitingForTrigger => write!(f, "Waiting for button..."),
            Status::NoTargetButton => write!(f, "No button set. Use `capture` or `button <n>`."),
            Status::CountdownStarted { delay_secs } => {
                write!(f, "Button! {delay_secs:.1}s timer started.")
            }
            Status::CountdownReset { delay_secs } => {
                write!(f, "Reset! New {delay_secs:.1}s timer.")
            }
            Status::Paused => write!(f, "Paused."),
            Status::Resumed => write!(f, "Resumed."),
            Status::TriggerWhilePaused => write!(f, "Paused: button press ignored."),
            Status::Finished => write!(f, "Timer finished. Playing sound..."),
            Status::FinishedDuringPause => write!(f, "Timer finished during pause. Sound suppressed."),
            Status::FinishedSoundOff => write!(f, "Timer finished (sound off)."),
            Status::NoSound => write!(f, "Timer finished. No sound to play."),
            Status::PlaybackFailed(reason) => write!(f, "Error playing sound: {reason}"),
            Status::DelayUpdated(secs) => write!(f, "Delay updated to {secs:.1}s"),
            Status::DelayRejected { reason, previous } => {
                write!(f, "{reason}. Keeping {previous:.1}s")
            }
            Status::CaptureStarted { timeout_secs } => {
                write!(f, "Press the button to watch ({timeout_secs:.0}s)...")
            }
            Status::ButtonCaptured(button) => write!(f, "Watching button {button}."),
            Status::CaptureTimedOut => write!(f, "No button pressed. Capture cancelled."),
            Status::TargetButtonSet(Some(button)) => write!(f, "Watching button {button}."),
            Status::TargetButtonSet(None) => write!(f, "Button cleared."),
            Status::SoundLoaded => write!(f, "Sound loaded."),
            Status::SoundFallback => write!(f, "Sound file unavailable. Using default beep."),
            Status::AudioUnavailable(reason) => write!(f, "No audio: {reason}"),
            Status::InputUnavailable(reason) => write!(f, "No controller support: {reason}"),
            Status::VolumeChanged(volume) => write!(f, "Volume {:.0}%", volume * 100.0),
            Status::SoundToggled(true) => write!(f, "Sound on."),
            Status::SoundToggled(false) => write!(f, "Sound off."),
            Status::ThreadFault { thread, message } => write!(f, "Error in {thread}: {message}"),
            Status::Interrupted => write!(f, "Timer interrupted (shutting down)."),
            Status::ShuttingDown => write!(f, "Closing..."),
        }
    }
}

/// Everything the core reports to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Status(Status),
    Countdown {
        remaining: Duration,
        delay: Duration,
        frozen: bool,
    },
    Controller(ControllerStatus),
    Presses(u64),
    TargetButton(Option<u32>),
    DelayApplied(f64),
    /// Capture mode finished. The "set button" control can be re-enabled.
    CaptureEnded { target: Option<u32>, captured: bool },
    /// Both background loops have exited.
    Stopped,
}

/// Sending half of the notification queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, Receiver<Notification>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    /// Queues a notification. A closed UI is not an error for the workers.
    pub fn send(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }

    pub fn status(&self, status: Status) {
        tracing::info!("status: {status}");
        self.send(Notification::Status(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_logged_and_queued() {
        let (notifier, rx) = Notifier::channel();
        notifier.status(Status::DelayUpdated(3.0));

        let received = rx.try_recv().unwrap();
        assert_eq!(received, Notification::Status(Status::DelayUpdated(3.0)));
    }

    #[test]
    fn sending_after_receiver_dropped_is_silent() {
        let (notifier, rx) = Notifier::channel();
        drop(rx);
        notifier.status(Status::Finished);
    }

    #[test]
    fn status_text_is_readable() {
        assert_eq!(
            Status::CountdownStarted { delay_secs: 5.2 }.to_string(),
            "Button! 5.2s timer started."
        );
        assert_eq!(
            Status::DelayRejected {
                reason: "bad".into(),
                previous: 5.2
            }
            .to_string(),
            "bad. Keeping 5.2s"
        );
    }
}
