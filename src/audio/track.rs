use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Track descriptor supplied by the caller. Holds no audio; the deck fills
/// in the decoded buffer after a successful load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub url: String,
}

impl Track {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self { id: id.into(), title: title.into(), artist: artist.into(), url: url.into() }
    }
}

/// Decoded PCM, interleaved stereo f32 (L R L R …) at the file's own rate.
///
/// Mono sources are duplicated to both channels; channels past the second
/// are dropped. `source_channels` keeps the original count for display.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    source_channels: u16,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, source_channels: u16) -> Self {
        debug_assert!(samples.len() % 2 == 0, "interleaved stereo expected");
        Self { samples, sample_rate, source_channels }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn source_channels(&self) -> u16 {
        self.source_channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Stereo frame at `index`, silence past the end.
    #[inline]
    pub fn frame(&self, index: usize) -> (f32, f32) {
        let i = index * 2;
        match self.samples.get(i..i + 2) {
            Some(s) => (s[0], s[1]),
            None => (0.0, 0.0),
        }
    }
}

/// A track together with its decoded audio. Shared between the deck that
/// owns it and any playback voice reading from it.
#[derive(Debug, Clone)]
pub struct LoadedTrack {
    pub track: Track,
    pub pcm: Arc<PcmBuffer>,
    pub duration_secs: f64,
}

impl LoadedTrack {
    pub fn new(track: Track, pcm: PcmBuffer) -> Self {
        let duration_secs = pcm.duration_secs();
        Self { track, pcm: Arc::new(pcm), duration_secs }
    }

    pub fn id(&self) -> &str {
        &self.track.id
    }
}
