//! Core library for the RB Timer controller reminder.
//!
//! A background poller watches a gamepad for the configured button, a timer
//! engine counts down after each press and plays a sound when the countdown
//! expires. The presentation layer drives both through [`Runtime`] and
//! receives [`Notification`]s over a channel.

pub mod audio;
pub mod config;
pub mod error;
pub mod input;
pub mod notify;
pub mod runtime;
pub mod state;
pub mod timer;

pub use audio::{load_clip, select_clip, synthesize_beep, AudioPlayer, Clip, SoundSink};
pub use config::{parse_delay, BeepConfig, TimerConfig};
pub use error::{Result, TimerError};
pub use input::{
    button_index, DeviceId, DeviceInfo, GilrsInput, InputBackend, InputEvent, InputPoller,
};
pub use notify::{ControllerStatus, Notification, Notifier, Status};
pub use runtime::{Runtime, ShutdownReport};
pub use state::{PressOutcome, RunState, Snapshot, TimerContext, TriggerSignal};
pub use timer::{Countdown, CountdownEnd, TimerEngine};
