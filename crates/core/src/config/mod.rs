use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{Result, TimerError};

pub const DEFAULT_DELAY_SECS: f64 = 5.2;

/// Top-level configuration for the timer. Every field has a default so a
/// partial JSON file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub delay_secs: f64,
    pub target_button: Option<u32>,
    pub poll_interval_ms: u64,
    pub capture_timeout_secs: f64,
    pub join_timeout_ms: u64,
    pub sound_path: Option<PathBuf>,
    pub sound_enabled: bool,
    pub volume: f32,
    pub beep: BeepConfig,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            delay_secs: DEFAULT_DELAY_SECS,
            target_button: None,
            poll_interval_ms: 20,
            capture_timeout_secs: 10.0,
            join_timeout_ms: 2_000,
            sound_path: Some(PathBuf::from("beep.wav")),
            sound_enabled: true,
            volume: 1.0,
            beep: BeepConfig::default(),
        }
    }
}

impl TimerConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        validate_delay(self.delay_secs)?;
        if self.poll_interval_ms == 0 {
            return Err(TimerError::InvalidConfig(
                "poll interval must be at least 1ms".into(),
            ));
        }
        let capture = seconds_to_duration(self.capture_timeout_secs, "capture timeout")?;
        if Instant::now().checked_add(capture).is_none() {
            return Err(TimerError::InvalidConfig(format!(
                "capture timeout of {}s is too long",
                self.capture_timeout_secs
            )));
        }
        validate_volume(self.volume)?;
        self.beep.validate()
    }

    pub fn delay(&self) -> Duration {
        saturating_duration(self.delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        saturating_duration(self.capture_timeout_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Parameters of the fallback beep synthesized when no clip can be loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeepConfig {
    pub frequency_hz: f32,
    pub duration_ms: u32,
    pub sample_rate: u32,
}

impl Default for BeepConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 440.0,
            duration_ms: 200,
            sample_rate: 44_100,
        }
    }
}

impl BeepConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0) {
            return Err(TimerError::InvalidConfig(format!(
                "beep frequency must be positive, got {}",
                self.frequency_hz
            )));
        }
        if self.duration_ms == 0 || self.sample_rate == 0 {
            return Err(TimerError::InvalidConfig(
                "beep duration and sample rate must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Parses user supplied delay text such as `"5.2"`.
pub fn parse_delay(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    let value: f64 = trimmed.parse().map_err(|_| {
        TimerError::InvalidConfig(format!("`{trimmed}` is not a valid number"))
    })?;
    validate_delay(value)?;
    Ok(value)
}

pub fn validate_delay(seconds: f64) -> Result<()> {
    seconds_to_duration(seconds, "delay").map(|_| ())
}

/// Converts a positive number of seconds that fits in a `Duration`.
fn seconds_to_duration(seconds: f64, what: &str) -> Result<Duration> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) if seconds > 0.0 => Ok(duration),
        _ => Err(TimerError::InvalidConfig(format!(
            "{what} must be a positive number of seconds, got {seconds}"
        ))),
    }
}

/// Unvalidated values clamp instead of panicking.
pub(crate) fn saturating_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(if seconds > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

pub fn validate_volume(volume: f32) -> Result<()> {
    if (0.0..=1.0).contains(&volume) {
        Ok(())
    } else {
        Err(TimerError::InvalidConfig(format!(
            "volume must be between 0 and 1, got {volume}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TimerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.delay_secs, 5.2);
        assert_eq!(config.target_button, None);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: TimerConfig =
            serde_json::from_str(r#"{ "delay_secs": 3.5, "target_button": 5 }"#).unwrap();
        assert_eq!(config.delay_secs, 3.5);
        assert_eq!(config.target_button, Some(5));
        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.beep.frequency_hz, 440.0);
    }

    #[test]
    fn parses_delay_text() {
        assert_eq!(parse_delay(" 7.25 ").unwrap(), 7.25);
    }

    #[test]
    fn rejects_zero_negative_and_garbage_delays() {
        for text in ["0", "-1", "abc", "", "NaN", "inf"] {
            let err = parse_delay(text).unwrap_err();
            assert!(matches!(err, TimerError::InvalidConfig(_)), "{text}: {err}");
        }
    }

    #[test]
    fn rejects_delays_too_long_for_a_duration() {
        for text in ["1e30", "1.8e308"] {
            assert!(matches!(
                parse_delay(text),
                Err(TimerError::InvalidConfig(_))
            ));
        }
        assert!(validate_delay(f64::MAX).is_err());
        assert!(validate_delay(86_400.0).is_ok());
    }

    #[test]
    fn oversized_capture_timeout_is_rejected() {
        for capture_timeout_secs in [1e30, f64::MAX, 0.0, f64::NAN] {
            let config = TimerConfig {
                capture_timeout_secs,
                ..TimerConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(TimerError::InvalidConfig(_))),
                "{capture_timeout_secs}"
            );
        }
    }

    #[test]
    fn duration_accessors_clamp_unvalidated_values() {
        let config = TimerConfig {
            delay_secs: 1e30,
            capture_timeout_secs: -1.0,
            ..TimerConfig::default()
        };
        assert_eq!(config.delay(), Duration::MAX);
        assert_eq!(config.capture_timeout(), Duration::ZERO);
    }

    #[test]
    fn rejects_out_of_range_volume() {
        let config = TimerConfig {
            volume: 1.5,
            ..TimerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn reads_config_file() {
        let path = std::env::temp_dir().join(format!("rb-timer-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "delay_secs": 9.0, "volume": 0.5 }"#).unwrap();

        let config = TimerConfig::from_json_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.delay_secs, 9.0);
        assert_eq!(config.volume, 0.5);
    }

    #[test]
    fn config_file_with_bad_delay_is_rejected() {
        let path = std::env::temp_dir().join(format!("rb-timer-bad-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "delay_secs": 0 }"#).unwrap();

        let err = TimerConfig::from_json_file(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);

        assert!(matches!(err, TimerError::InvalidConfig(_)));
    }
}
