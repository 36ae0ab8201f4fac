use std::any::Any;

/// Result alias that carries the custom [`TimerError`] type.
pub type Result<T> = std::result::Result<T, TimerError>;

/// Common error type for the core crate.
///
/// Nothing in here is fatal to the process on its own: callers degrade to a
/// status message and keep running.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    /// No controller subsystem or no device could be opened.
    #[error("input unavailable: {0}")]
    InputUnavailable(String),
    /// The sound clip or the audio output could not be loaded.
    #[error("audio unavailable: {0}")]
    AudioUnavailable(String),
    /// A configuration value was rejected. The previous value stays applied.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A background loop hit an unexpected failure and recovered.
    #[error("thread fault: {0}")]
    ThreadFault(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl TimerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        Self::ThreadFault(format!("{what} has been poisoned"))
    }
}

impl From<&str> for TimerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for TimerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
