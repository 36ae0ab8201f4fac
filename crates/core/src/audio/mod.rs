use std::{
    f32::consts::PI,
    fs::File,
    io::BufReader,
    path::Path,
    sync::atomic::{AtomicU32, Ordering},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use rodio::{buffer::SamplesBuffer, Decoder, OutputStream, Sink, Source};

use crate::{
    config::{validate_volume, BeepConfig},
    Notifier, Result, Status, TimerConfig, TimerError,
};

const OUTPUT_OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Decoded PCM clip held in memory so playback never touches the disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl Clip {
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() as f64 / f64::from(self.channels.max(1));
        Duration::from_secs_f64(frames / f64::from(self.sample_rate.max(1)))
    }

    fn to_source(&self) -> SamplesBuffer<f32> {
        SamplesBuffer::new(self.channels, self.sample_rate, self.samples.clone())
    }
}

/// Decodes an audio file into a [`Clip`].
pub fn load_clip(path: &Path) -> Result<Clip> {
    let file = File::open(path).map_err(|err| {
        TimerError::AudioUnavailable(format!("cannot open {}: {err}", path.display()))
    })?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|err| {
        TimerError::AudioUnavailable(format!("cannot decode {}: {err}", path.display()))
    })?;
    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<f32> = decoder.convert_samples().collect();
    if samples.is_empty() {
        return Err(TimerError::AudioUnavailable(format!(
            "{} contains no audio",
            path.display()
        )));
    }

    Ok(Clip {
        channels,
        sample_rate,
        samples,
    })
}

/// Builds a stereo sine beep used when no clip file is available.
pub fn synthesize_beep(beep: &BeepConfig) -> Result<Clip> {
    beep.validate()?;
    let frames = (u64::from(beep.sample_rate) * u64::from(beep.duration_ms) / 1000) as usize;
    let rate = beep.sample_rate as f32;
    let mut samples = Vec::with_capacity(frames * 2);
    for frame in 0..frames {
        let t = frame as f32 / rate;
        let value = (2.0 * PI * beep.frequency_hz * t).sin();
        samples.push(value);
        samples.push(value);
    }

    Ok(Clip {
        channels: 2,
        sample_rate: beep.sample_rate,
        samples,
    })
}

/// Picks the configured clip, falling back to a synthesized beep. Returns
/// `None` when neither is usable.
pub fn select_clip(config: &TimerConfig, notifier: &Notifier) -> Option<Clip> {
    if let Some(path) = config.sound_path.as_deref() {
        match load_clip(path) {
            Ok(clip) => {
                tracing::info!(path = %path.display(), "sound file loaded");
                notifier.status(Status::SoundLoaded);
                return Some(clip);
            }
            Err(err) => {
                tracing::warn!(%err, "falling back to synthesized beep");
                notifier.status(Status::SoundFallback);
            }
        }
    }

    match synthesize_beep(&config.beep) {
        Ok(clip) => Some(clip),
        Err(err) => {
            tracing::error!(%err, "failed to synthesize beep");
            notifier.status(Status::AudioUnavailable(err.to_string()));
            None
        }
    }
}

/// Something that can play the reminder sound.
pub trait SoundSink: Send + Sync {
    /// Starts playback and returns immediately.
    fn play(&self) -> Result<()>;

    /// Sets the playback volume. Values are clamped to `[0, 1]`.
    fn set_volume(&self, volume: f32) -> Result<()>;

    fn volume(&self) -> f32;
}

enum AudioCommand {
    Play,
    SetVolume(f32),
    Shutdown,
}

/// Plays a [`Clip`] on the default output device.
///
/// The rodio output stream is not `Send`, so it lives on a dedicated thread
/// that receives commands over a channel.
pub struct AudioPlayer {
    commands: Sender<AudioCommand>,
    volume_bits: AtomicU32,
    thread: Option<JoinHandle<()>>,
}

impl AudioPlayer {
    pub fn start(clip: Clip, volume: f32) -> Result<Self> {
        validate_volume(volume)?;
        let (commands, rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let thread = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || run_output(clip, volume, rx, ready_tx))?;

        match ready_rx.recv_timeout(OUTPUT_OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                commands,
                volume_bits: AtomicU32::new(volume.to_bits()),
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => Err(TimerError::AudioUnavailable(
                "audio output did not open in time".into(),
            )),
        }
    }

    /// Loads the configured sound and opens the output device, reporting
    /// every degradation step as a status.
    pub fn from_config(config: &TimerConfig, notifier: &Notifier) -> Option<Self> {
        let clip = select_clip(config, notifier)?;
        match Self::start(clip, config.volume) {
            Ok(player) => Some(player),
            Err(err) => {
                tracing::error!(%err, "audio output unavailable, running silent");
                notifier.status(Status::AudioUnavailable(err.to_string()));
                None
            }
        }
    }

    fn send(&self, command: AudioCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| TimerError::AudioUnavailable("audio output thread has stopped".into()))
    }
}

impl SoundSink for AudioPlayer {
    fn play(&self) -> Result<()> {
        self.send(AudioCommand::Play)
    }

    fn set_volume(&self, volume: f32) -> Result<()> {
        let volume = volume.clamp(0.0, 1.0);
        self.volume_bits.store(volume.to_bits(), Ordering::Release);
        self.send(AudioCommand::SetVolume(volume))
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Acquire))
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        let _ = self.commands.send(AudioCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for AudioPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPlayer")
            .field("volume", &self.volume())
            .finish()
    }
}

fn run_output(
    clip: Clip,
    volume: f32,
    commands: Receiver<AudioCommand>,
    ready: Sender<Result<()>>,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(output) => output,
        Err(err) => {
            let _ = ready.send(Err(TimerError::AudioUnavailable(err.to_string())));
            return;
        }
    };
    let sink = match Sink::try_new(&handle) {
        Ok(sink) => sink,
        Err(err) => {
            let _ = ready.send(Err(TimerError::AudioUnavailable(err.to_string())));
            return;
        }
    };
    sink.set_volume(volume);
    let _ = ready.send(Ok(()));
    tracing::debug!(duration_ms = clip.duration().as_millis() as u64, "audio output ready");

    while let Ok(command) = commands.recv() {
        match command {
            AudioCommand::Play => sink.append(clip.to_source()),
            AudioCommand::SetVolume(volume) => sink.set_volume(volume),
            AudioCommand::Shutdown => break,
        }
    }
    sink.stop();
    tracing::debug!("audio output closed");
}
