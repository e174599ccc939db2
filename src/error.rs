use thiserror::Error;

/// Why a track could not be turned into a playable buffer.
///
/// Load errors never escape the engine: the deck that requested the load
/// logs them, clears its loading flag and records the message in its
/// snapshot's `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Retrieving the bytes failed (bad status, offline, missing file).
    #[error("Fetch failed for '{url}': {reason}")]
    Fetch { url: String, reason: String },

    /// Bytes arrived but could not be interpreted as audio.
    #[error("Decode failed for '{url}': {reason}")]
    Decode { url: String, reason: String },

    #[error("No audio track found in '{url}'")]
    NoAudioTrack { url: String },
}

impl LoadError {
    pub fn fetch(url: &str, reason: impl ToString) -> Self {
        LoadError::Fetch { url: url.to_string(), reason: reason.to_string() }
    }

    pub fn decode(url: &str, reason: impl ToString) -> Self {
        LoadError::Decode { url: url.to_string(), reason: reason.to_string() }
    }

    pub fn url(&self) -> &str {
        match self {
            LoadError::Fetch { url, .. }
            | LoadError::Decode { url, .. }
            | LoadError::NoAudioTrack { url } => url,
        }
    }
}

/// Failures surfaced by engine construction and initialisation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No Tokio runtime available to run track decodes")]
    NoRuntime,

    #[error("Audio output error: {0}")]
    Output(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Track load failed: {0}")]
    Load(String),

    /// The render thread has not caught up with earlier commands.
    #[error("Render command queue full")]
    CommandQueueFull,
}
