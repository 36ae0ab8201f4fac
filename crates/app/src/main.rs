use std::{fs::File, path::Path, path::PathBuf, sync::Arc, sync::Mutex, thread, time::Duration};

use clap::{Args, Parser, Subcommand};
use rb_timer_core::{
    AudioPlayer, GilrsInput, InputBackend, Notification, Notifier, Runtime, SoundSink,
    TimerConfig, TimerError,
};
use tracing_subscriber::EnvFilter;

mod console;

fn main() -> rb_timer_core::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let config = cli.overrides.resolve(cli.config.as_deref())?;
    tracing::debug!(?config, "effective configuration");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_timer(config),
        Commands::Devices => list_devices(),
        Commands::Beep => play_once(&config),
        Commands::Config => {
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }
    }
}

fn run_timer(config: TimerConfig) -> rb_timer_core::Result<()> {
    tracing::info!(delay_secs = config.delay_secs, "starting timer");

    let (notifier, notifications) = Notifier::channel();
    let sound = AudioPlayer::from_config(&config, &notifier)
        .map(|player| Arc::new(player) as Arc<dyn SoundSink>);
    let runtime = Runtime::start(&config, GilrsInput::new, sound, notifier)?;

    console::Console::new(runtime, notifications).run()
}

fn list_devices() -> rb_timer_core::Result<()> {
    let input = GilrsInput::new()?;
    let devices = input.devices();
    if devices.is_empty() {
        println!("No controllers detected.");
    }
    for device in devices {
        println!("{:>3}  {}", device.id, device.name);
    }
    Ok(())
}

fn play_once(config: &TimerConfig) -> rb_timer_core::Result<()> {
    let (notifier, notifications) = Notifier::channel();
    let clip = rb_timer_core::select_clip(config, &notifier)
        .ok_or_else(|| TimerError::AudioUnavailable("no sound to play".into()))?;
    let length = clip.duration();
    let player = AudioPlayer::start(clip, config.volume)?;
    player.play()?;

    for notification in notifications.try_iter() {
        if let Notification::Status(status) = notification {
            println!("{status}");
        }
    }
    thread::sleep(length + Duration::from_millis(150));
    Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> rb_timer_core::Result<()> {
    // The console owns stdout, so terminal logging stays quiet unless asked.
    let default_level = if log_file.is_some() { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true);

    let _ = match log_file {
        Some(path) => {
            let file = File::create(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Reminds you to repeat a controller action", long_about = None)]
struct Cli {
    /// JSON configuration file read at start.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Write diagnostics to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the controller and run the reminder timer (default).
    Run,
    /// List connected controllers.
    Devices,
    /// Play the reminder sound once.
    Beep,
    /// Print the effective configuration as JSON.
    Config,
}

#[derive(Args, Debug, Default)]
struct Overrides {
    /// Countdown length in seconds.
    #[arg(short, long, global = true)]
    delay: Option<f64>,
    /// Button index to watch (5 is RB on XInput-style pads).
    #[arg(short, long, global = true)]
    button: Option<u32>,
    /// Sound file to play when the countdown expires.
    #[arg(long, global = true)]
    sound: Option<PathBuf>,
    /// Start with the sound muted.
    #[arg(long, global = true)]
    mute: bool,
    /// Playback volume between 0 and 1.
    #[arg(long, global = true)]
    volume: Option<f32>,
    /// Controller poll interval in milliseconds.
    #[arg(long, global = true)]
    poll_ms: Option<u64>,
    /// Seconds to wait for a button during capture.
    #[arg(long, global = true)]
    capture_timeout: Option<f64>,
}

impl Overrides {
    fn resolve(self, file: Option<&Path>) -> rb_timer_core::Result<TimerConfig> {
        let mut config = match file {
            Some(path) => TimerConfig::from_json_file(path)?,
            None => TimerConfig::default(),
        };
        if let Some(delay) = self.delay {
            config.delay_secs = delay;
        }
        if self.button.is_some() {
            config.target_button = self.button;
        }
        if let Some(sound) = self.sound {
            config.sound_path = Some(sound);
        }
        if self.mute {
            config.sound_enabled = false;
        }
        if let Some(volume) = self.volume {
            config.volume = volume;
        }
        if let Some(poll_ms) = self.poll_ms {
            config.poll_interval_ms = poll_ms;
        }
        if let Some(timeout) = self.capture_timeout {
            config.capture_timeout_secs = timeout;
        }
        config.validate()?;
        Ok(config)
    }
}
