use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{audio::crossfade::CrossfadeLaw, error::EngineError};

/// Where the master bus goes once the engine is initialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputBackend {
    /// A cpal output device; the device callback drives rendering.
    #[default]
    Device,
    /// No device. The host pulls frames with `DjEngine::render`.
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub backend: OutputBackend,
    /// Sample rate of the offline backend (the device backend uses the
    /// device's default rate).
    pub offline_sample_rate: u32,
    /// Output device to open by name; the host's default device when unset.
    pub device_name: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { backend: OutputBackend::Device, offline_sample_rate: 48_000, device_name: None }
    }
}

/// Frequency analyser settings. Defaults match a browser `AnalyserNode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// FFT window length in frames; must be a power of two in 32..=32768.
    pub fft_size: usize,
    /// Temporal smoothing between successive spectra, 0.0 – 1.0.
    pub smoothing: f32,
    /// Level mapped to byte 0.
    pub min_db: f32,
    /// Level mapped to byte 255.
    pub max_db: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self { fft_size: 2048, smoothing: 0.8, min_db: -100.0, max_db: -30.0 }
    }
}

/// Engine-wide settings, loaded once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub default_deck_volume: f32,
    pub default_master_volume: f32,
    pub crossfade_law: CrossfadeLaw,
    /// Seeks clamp to `duration - seek_epsilon_secs` so a seek never lands
    /// exactly on the end of the buffer.
    pub seek_epsilon_secs: f64,
    pub analyzer: AnalyzerConfig,
    pub output: OutputConfig,
    /// Slots in the control → render command queue.
    pub command_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_deck_volume: 0.8,
            default_master_volume: 0.7,
            crossfade_law: CrossfadeLaw::Linear,
            seek_epsilon_secs: 0.01,
            analyzer: AnalyzerConfig::default(),
            output: OutputConfig::default(),
            command_queue_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(text)
            .map_err(|e| EngineError::Config(format!("Parse error: {e}")))?;
        Ok(config.sanitized())
    }

    /// Clamp every field into the range the engine can work with.
    pub fn sanitized(mut self) -> Self {
        self.default_deck_volume = clamp_unit(self.default_deck_volume);
        self.default_master_volume = clamp_unit(self.default_master_volume);
        if !self.seek_epsilon_secs.is_finite() || self.seek_epsilon_secs < 0.0 {
            self.seek_epsilon_secs = 0.0;
        }

        let fft = self.analyzer.fft_size.clamp(32, 32_768);
        self.analyzer.fft_size = if fft.is_power_of_two() { fft } else { fft.next_power_of_two() };
        self.analyzer.smoothing = clamp_unit(self.analyzer.smoothing);
        if !(self.analyzer.max_db > self.analyzer.min_db) {
            let defaults = AnalyzerConfig::default();
            self.analyzer.min_db = defaults.min_db;
            self.analyzer.max_db = defaults.max_db;
        }

        if self.output.offline_sample_rate == 0 {
            self.output.offline_sample_rate = OutputConfig::default().offline_sample_rate;
        }
        self.command_queue_capacity = self.command_queue_capacity.max(16);
        self
    }
}

/// Clamp to [0, 1]; NaN becomes 0.
pub(crate) fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
