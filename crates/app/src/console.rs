//! Console presentation layer. Runs on the main thread, renders core
//! notifications and turns typed commands into runtime calls.

use std::{
    io::{self, BufRead, Write},
    thread,
    time::Duration,
};

use crossbeam_channel::{select, Receiver};
use rb_timer_core::{ControllerStatus, Notification, RunState, Runtime, Status};

const BAR_WIDTH: usize = 20;

const HELP: &str = "\
commands:
  <enter> | trigger   start or reset the countdown by hand
  delay <seconds>     set the countdown length
  button <n|none>     watch button n
  capture             watch the next button you press
  pause | resume | p  pause, resume or toggle
  volume <0..1>       set the sound volume
  sound on|off        enable or mute the sound
  status              show current settings
  quit                exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Trigger,
    Delay(String),
    Button(Option<u32>),
    Capture,
    Pause,
    Resume,
    TogglePause,
    Volume(f32),
    Sound(bool),
    Status,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(Command::Trigger);
        };
        let argument = words.next();

        let command = match (name.to_ascii_lowercase().as_str(), argument) {
            ("trigger" | "t", _) => Command::Trigger,
            ("delay" | "d", Some(value)) => Command::Delay(value.to_string()),
            ("button" | "b", Some("none")) => Command::Button(None),
            ("button" | "b", Some(value)) => Command::Button(Some(
                value
                    .parse()
                    .map_err(|_| format!("`{value}` is not a button index"))?,
            )),
            ("capture" | "c", _) => Command::Capture,
            ("pause", _) => Command::Pause,
            ("resume", _) => Command::Resume,
            ("p", _) => Command::TogglePause,
            ("volume" | "v", Some(value)) => Command::Volume(
                value
                    .parse()
                    .map_err(|_| format!("`{value}` is not a volume"))?,
            ),
            ("sound", Some("on")) => Command::Sound(true),
            ("sound", Some("off")) => Command::Sound(false),
            ("sound", Some(other)) => return Err(format!("`{other}` is not `on` or `off`")),
            ("status" | "s", _) => Command::Status,
            ("help" | "h" | "?", _) => Command::Help,
            ("quit" | "q" | "exit", _) => Command::Quit,
            ("delay" | "d" | "button" | "b" | "volume" | "v" | "sound", None) => {
                return Err(format!("`{name}` needs a value. Type `help`."))
            }
            _ => return Err(format!("unknown command `{name}`. Type `help`.")),
        };
        Ok(command)
    }
}

/// Everything the console displays, updated only from notifications.
#[derive(Debug, Default)]
pub struct ConsoleView {
    pub status: String,
    pub controller: String,
    pub presses: u64,
    pub target: Option<u32>,
    pub delay_secs: f64,
    pub capture_pending: bool,
    pub countdown: Option<(Duration, Duration, bool)>,
}

/// What the console should print after applying a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Message(String),
    Progress(String),
}

impl ConsoleView {
    pub fn apply(&mut self, notification: Notification) -> Option<Line> {
        match notification {
            Notification::Status(status) => {
                match status {
                    Status::CaptureStarted { .. } => self.capture_pending = true,
                    Status::WaitingForTrigger | Status::Interrupted => self.countdown = None,
                    _ => {}
                }
                self.status = status.to_string();
                Some(Line::Message(self.status.clone()))
            }
            Notification::Countdown {
                remaining,
                delay,
                frozen,
            } => {
                self.countdown = Some((remaining, delay, frozen));
                Some(Line::Progress(progress_bar(remaining, delay, frozen)))
            }
            Notification::Controller(status) => {
                self.controller = match status {
                    ControllerStatus::Connected { id, name } => format!("{name} (#{id})"),
                    ControllerStatus::Disconnected => "no controller".to_string(),
                    ControllerStatus::Unavailable(reason) => format!("unavailable: {reason}"),
                };
                Some(Line::Message(format!("Controller: {}", self.controller)))
            }
            Notification::Presses(count) => {
                self.presses = count;
                None
            }
            Notification::TargetButton(target) => {
                self.target = target;
                None
            }
            Notification::DelayApplied(seconds) => {
                self.delay_secs = seconds;
                None
            }
            Notification::CaptureEnded { target, .. } => {
                self.capture_pending = false;
                self.target = target;
                None
            }
            Notification::Stopped => Some(Line::Message("Stopped.".to_string())),
        }
    }
}

/// Renders `[#####-----] 2.6s / 5.2s`.
pub fn progress_bar(remaining: Duration, delay: Duration, frozen: bool) -> String {
    let total = delay.as_secs_f64();
    let left = remaining.as_secs_f64().min(total);
    let done = if total > 0.0 { 1.0 - left / total } else { 1.0 };
    let filled = ((done * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
    let mut bar = format!(
        "[{}{}] {left:.1}s / {total:.1}s",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled)
    );
    if frozen {
        bar.push_str(" (paused)");
    }
    bar
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct Console {
    runtime: Runtime,
    notifications: Receiver<Notification>,
    view: ConsoleView,
    progress_visible: bool,
    confirming_quit: bool,
}

impl Console {
    pub fn new(runtime: Runtime, notifications: Receiver<Notification>) -> Self {
        Self {
            runtime,
            notifications,
            view: ConsoleView::default(),
            progress_visible: false,
            confirming_quit: false,
        }
    }

    /// Runs until the user quits or stdin closes, then shuts the runtime down.
    pub fn run(mut self) -> rb_timer_core::Result<()> {
        let lines = spawn_stdin_reader()?;
        let notifications = self.notifications.clone();
        println!("RB Timer. Type `help` for commands.");

        loop {
            select! {
                recv(notifications) -> notification => match notification {
                    Ok(notification) => self.render(notification),
                    Err(_) => break,
                },
                recv(lines) -> line => match line {
                    Ok(line) => {
                        if self.handle_line(&line) == Flow::Quit {
                            break;
                        }
                    }
                    Err(_) => {
                        tracing::info!("stdin closed");
                        break;
                    }
                },
            }
        }

        let report = self.runtime.shutdown();
        let pending: Vec<_> = self.notifications.try_iter().collect();
        for notification in pending {
            self.render(notification);
        }
        if !report.clean() {
            tracing::warn!(?report, "exiting with background threads still running");
        }
        Ok(())
    }

    fn render(&mut self, notification: Notification) {
        match self.view.apply(notification) {
            Some(Line::Message(text)) => {
                self.clear_progress();
                println!("{text}");
            }
            Some(Line::Progress(bar)) => {
                print!("\r{bar}   ");
                let _ = io::stdout().flush();
                self.progress_visible = true;
            }
            None => {}
        }
    }

    fn clear_progress(&mut self) {
        if self.progress_visible {
            println!();
            self.progress_visible = false;
        }
    }

    fn say(&mut self, text: &str) {
        self.clear_progress();
        println!("{text}");
    }

    fn handle_line(&mut self, line: &str) -> Flow {
        if self.confirming_quit {
            self.confirming_quit = false;
            if matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
                return Flow::Quit;
            }
            self.say("Quit cancelled.");
            return Flow::Continue;
        }

        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(message) => {
                self.say(&message);
                return Flow::Continue;
            }
        };
        tracing::debug!(?command, "console command");

        let result = match command {
            Command::Trigger => self.runtime.simulate_trigger(),
            Command::Delay(text) => {
                // Rejections are reported through the status channel.
                let _ = self.runtime.apply_delay_text(&text);
                Ok(())
            }
            Command::Button(button) => self.runtime.set_target_button(button),
            Command::Capture => {
                if self.view.capture_pending {
                    self.say("Already waiting for a button.");
                    Ok(())
                } else {
                    self.runtime.request_capture()
                }
            }
            Command::Pause => {
                self.runtime.pause();
                Ok(())
            }
            Command::Resume => {
                self.runtime.resume();
                Ok(())
            }
            Command::TogglePause => {
                self.runtime.toggle_pause();
                Ok(())
            }
            Command::Volume(volume) => self.runtime.set_volume(volume),
            Command::Sound(enabled) => {
                self.runtime.set_sound_enabled(enabled);
                Ok(())
            }
            Command::Status => {
                self.print_status();
                Ok(())
            }
            Command::Help => {
                self.say(HELP);
                Ok(())
            }
            Command::Quit => {
                self.confirming_quit = true;
                self.say("Quit? [y/N]");
                Ok(())
            }
        };

        if let Err(err) = result {
            self.say(&format!("error: {err}"));
        }
        Flow::Continue
    }

    fn print_status(&mut self) {
        let text = match self.runtime.snapshot() {
            Ok(snapshot) => {
                let state = match snapshot.run_state {
                    RunState::Running => "running",
                    RunState::Paused => "paused",
                    RunState::ShuttingDown => "closing",
                };
                let button = snapshot
                    .target_button
                    .map_or_else(|| "none".to_string(), |b| b.to_string());
                let remaining = self
                    .view
                    .countdown
                    .map(|(remaining, delay, frozen)| progress_bar(remaining, delay, frozen))
                    .unwrap_or_else(|| "idle".to_string());
                format!(
                    "state: {state}\ndelay: {:.1}s\nbutton: {button}\npresses: {}\nsound: {}\ncontroller: {}\ncountdown: {remaining}",
                    snapshot.delay_secs,
                    snapshot.presses,
                    if snapshot.sound_enabled { "on" } else { "off" },
                    self.view.controller,
                )
            }
            Err(err) => format!("error: {err}"),
        };
        self.say(&text);
    }
}

fn spawn_stdin_reader() -> io::Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse(""), Ok(Command::Trigger));
        assert_eq!(Command::parse("delay 4.5"), Ok(Command::Delay("4.5".into())));
        assert_eq!(Command::parse("delay abc"), Ok(Command::Delay("abc".into())));
        assert_eq!(Command::parse("button 5"), Ok(Command::Button(Some(5))));
        assert_eq!(Command::parse("button none"), Ok(Command::Button(None)));
        assert_eq!(Command::parse("P"), Ok(Command::TogglePause));
        assert_eq!(Command::parse("volume 0.3"), Ok(Command::Volume(0.3)));
        assert_eq!(Command::parse("sound off"), Ok(Command::Sound(false)));
        assert_eq!(Command::parse("quit"), Ok(Command::Quit));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(Command::parse("button x").is_err());
        assert!(Command::parse("delay").is_err());
        assert!(Command::parse("dance").is_err());
    }

    #[test]
    fn progress_bar_fills_as_time_passes() {
        let delay = Duration::from_secs(4);
        assert_eq!(
            progress_bar(delay, delay, false),
            "[--------------------] 4.0s / 4.0s"
        );
        assert_eq!(
            progress_bar(Duration::from_secs(1), delay, true),
            "[###############-----] 1.0s / 4.0s (paused)"
        );
        assert!(progress_bar(Duration::ZERO, delay, false).starts_with("[####################]"));
    }

    #[test]
    fn view_tracks_capture_and_rejected_delay() {
        let mut view = ConsoleView::default();
        view.apply(Notification::DelayApplied(5.2));
        view.apply(Notification::Status(Status::CaptureStarted { timeout_secs: 10.0 }));
        assert!(view.capture_pending);

        view.apply(Notification::CaptureEnded {
            target: Some(3),
            captured: true,
        });
        assert!(!view.capture_pending);
        assert_eq!(view.target, Some(3));

        let line = view.apply(Notification::Status(Status::DelayRejected {
            reason: "bad".into(),
            previous: 5.2,
        }));
        view.apply(Notification::DelayApplied(5.2));
        assert_eq!(line, Some(Line::Message("bad. Keeping 5.2s".into())));
        assert_eq!(view.delay_secs, 5.2);
    }

    #[test]
    fn counters_update_silently() {
        let mut view = ConsoleView::default();
        assert_eq!(view.apply(Notification::Presses(4)), None);
        assert_eq!(view.presses, 4);
    }
}
