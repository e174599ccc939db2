use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, Stream, StreamConfig,
};
use ringbuf::{
    traits::{Consumer as _, Producer as _, Split},
    HeapRb,
};

use super::{
    analyzer::{read_spectrum, FrequencyAnalyzer, SpectrumHandle},
    crossfade::DeckSide,
    deck::PlaybackTarget,
    mixer::{GainGraph, GainParams},
    renderer::{RenderCommand, RenderEvent, Renderer, VoiceId},
    track::PcmBuffer,
};
use crate::{
    config::{EngineConfig, OutputBackend},
    error::EngineError,
};

/// Output clock: frames rendered so far over the output sample rate.
/// Advances only as audio is actually produced.
#[derive(Debug, Clone)]
pub struct OutputClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl OutputClock {
    fn new(sample_rate: u32) -> Self {
        Self { frames: Arc::new(AtomicU64::new(0)), sample_rate }
    }

    #[inline]
    pub fn now_secs(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate.max(1) as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// The initialised audio graph: renderer, its command/event queues, the
/// analyser tap and, for the device backend, the running cpal stream.
pub struct AudioOutput {
    // Held only to keep the device callback alive.
    _stream: Option<Stream>,
    backend: OutputBackend,
    renderer: Arc<Mutex<Renderer>>,
    cmd_tx: ringbuf::HeapProd<RenderCommand>,
    event_rx: ringbuf::HeapCons<RenderEvent>,
    params: Arc<GainParams>,
    clock: OutputClock,
    spectrum: SpectrumHandle,
    channels: usize,
    next_voice: VoiceId,
}

impl AudioOutput {
    const EVENT_RING_SIZE: usize = 64;

    /// Build the graph and start the configured backend.
    pub fn open(config: &EngineConfig, graph: GainGraph) -> Result<Self, EngineError> {
        match config.output.backend {
            OutputBackend::Offline => {
                Self::build(config, graph, config.output.offline_sample_rate, 2, |_| Ok(None))
            }
            OutputBackend::Device => {
                let host = cpal::default_host();
                let device = match &config.output.device_name {
                    Some(name) => host
                        .output_devices()
                        .map_err(|e| EngineError::Output(format!("Failed to enumerate output devices: {e}")))?
                        .find(|d| d.name().ok().as_deref() == Some(name.as_str()))
                        .ok_or_else(|| EngineError::Output(format!("Output device '{name}' not found")))?,
                    None => host
                        .default_output_device()
                        .ok_or_else(|| EngineError::Output("No default audio output device found".into()))?,
                };
                let supported = device
                    .default_output_config()
                    .map_err(|e| EngineError::Output(format!("Default config error: {e}")))?;

                let sample_rate = supported.sample_rate().0;
                let channels = supported.channels() as usize;
                log::info!(
                    "Audio device: {} | sample rate: {} | channels: {}",
                    device.name().unwrap_or_default(),
                    sample_rate,
                    channels
                );
                let stream_config: StreamConfig = supported.into();
                Self::build(config, graph, sample_rate, channels, |renderer| {
                    let stream = build_stream(&device, &stream_config, renderer, channels)?;
                    stream.play().map_err(|e| EngineError::Output(format!("Stream play error: {e}")))?;
                    Ok(Some(stream))
                })
            }
        }
    }

    fn build(
        config: &EngineConfig,
        graph: GainGraph,
        sample_rate: u32,
        channels: usize,
        start: impl FnOnce(Arc<Mutex<Renderer>>) -> Result<Option<Stream>, EngineError>,
    ) -> Result<Self, EngineError> {
        let (cmd_tx, cmd_rx) = HeapRb::<RenderCommand>::new(config.command_queue_capacity).split();
        let (event_tx, event_rx) = HeapRb::<RenderEvent>::new(Self::EVENT_RING_SIZE).split();

        let clock = OutputClock::new(sample_rate);
        let analyzer = FrequencyAnalyzer::new(&config.analyzer);
        let spectrum = analyzer.handle();
        let params = Arc::new(GainParams::from_graph(&graph));
        let renderer = Arc::new(Mutex::new(Renderer::new(
            graph,
            Arc::clone(&params),
            analyzer,
            sample_rate,
            cmd_rx,
            event_tx,
            Arc::clone(&clock.frames),
        )));

        let stream = start(Arc::clone(&renderer))?;

        Ok(Self {
            _stream: stream,
            backend: config.output.backend,
            renderer,
            cmd_tx,
            event_rx,
            params,
            clock,
            spectrum,
            channels,
            next_voice: 0,
        })
    }

    pub fn backend(&self) -> OutputBackend {
        self.backend
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    /// Gain controls read by the renderer at the start of every buffer.
    pub fn gains(&self) -> &GainParams {
        &self.params
    }

    fn send(&mut self, cmd: RenderCommand) -> Result<(), EngineError> {
        self.cmd_tx.try_push(cmd).map_err(|_| EngineError::CommandQueueFull)
    }

    /// Next render notification, if any.
    pub fn poll_event(&mut self) -> Option<RenderEvent> {
        self.event_rx.try_pop()
    }

    /// Latest analyser spectrum.
    pub fn frequency_data(&self) -> Vec<u8> {
        read_spectrum(&self.spectrum)
    }

    /// Pull one buffer through the graph. Only the offline backend renders on
    /// demand; with a device attached the callback owns rendering and this
    /// returns `false`.
    pub fn render(&self, output: &mut [f32]) -> bool {
        if self.backend != OutputBackend::Offline {
            return false;
        }
        let mut renderer = match self.renderer.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        renderer.render(output, self.channels);
        true
    }
}

impl PlaybackTarget for AudioOutput {
    fn now(&self) -> f64 {
        self.clock.now_secs()
    }

    fn start_voice(&mut self, side: DeckSide, pcm: Arc<PcmBuffer>, offset_secs: f64) -> Result<VoiceId, EngineError> {
        let voice = self.next_voice + 1;
        self.send(RenderCommand::StartVoice { side, voice, pcm, offset_secs })?;
        self.next_voice = voice;
        Ok(voice)
    }

    fn stop_voice(&mut self, side: DeckSide, voice: VoiceId) -> Result<(), EngineError> {
        self.send(RenderCommand::StopVoice { side, voice })
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        if self.send(RenderCommand::StopAll).is_err() {
            log::debug!("Render command queue full on shutdown");
        }
    }
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    renderer: Arc<Mutex<Renderer>>,
    channels: usize,
) -> Result<Stream, EngineError> {
    let err_fn = |e| log::error!("CPAL stream error: {e}");

    device
        .build_output_stream(
            config,
            move |output: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                // If the control thread holds the lock, output silence rather
                // than block the real-time thread.
                match renderer.try_lock() {
                    Ok(mut r) => r.render(output, channels),
                    Err(_) => output.fill(0.0),
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| EngineError::Output(format!("Build stream error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::crossfade::CrossfadeLaw;

    fn offline_with_capacity(rate: u32, capacity: usize) -> AudioOutput {
        let mut config = EngineConfig::default();
        config.output.backend = OutputBackend::Offline;
        config.output.offline_sample_rate = rate;
        config.command_queue_capacity = capacity;
        AudioOutput::open(&config, GainGraph::new(1.0, 1.0, CrossfadeLaw::Linear)).unwrap()
    }

    fn offline(rate: u32) -> AudioOutput {
        offline_with_capacity(rate, EngineConfig::default().command_queue_capacity)
    }

    #[test]
    fn clock_advances_with_rendered_frames() {
        let out = offline(1_000);
        assert_eq!(out.now(), 0.0);
        let mut buf = vec![0.0; 2 * 250];
        assert!(out.render(&mut buf));
        assert!((out.now() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn voice_ids_are_unique_and_end_is_reported() {
        let mut out = offline(100);
        let pcm = Arc::new(PcmBuffer::new(vec![0.5; 2 * 10], 100, 2));
        let a = out.start_voice(DeckSide::Left, Arc::clone(&pcm), 0.0).unwrap();
        out.stop_voice(DeckSide::Left, a).unwrap();
        let b = out.start_voice(DeckSide::Left, pcm, 0.0).unwrap();
        assert_ne!(a, b);

        out.render(&mut vec![0.0; 2 * 20]);
        assert_eq!(out.poll_event(), Some(RenderEvent::VoiceEnded { side: DeckSide::Left, voice: b }));
        assert_eq!(out.poll_event(), None);
    }

    #[test]
    fn spectrum_starts_silent() {
        let out = offline(8_000);
        let data = out.frequency_data();
        assert_eq!(data.len(), EngineConfig::default().analyzer.fft_size / 2);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn full_queue_rejects_voice_commands_until_rendered() {
        let mut out = offline_with_capacity(100, 4);
        let pcm = Arc::new(PcmBuffer::new(vec![0.5; 2 * 100], 100, 2));
        let mut last = 0;
        for _ in 0..4 {
            last = out.start_voice(DeckSide::Left, Arc::clone(&pcm), 0.0).unwrap();
        }
        assert!(matches!(
            out.start_voice(DeckSide::Left, Arc::clone(&pcm), 0.0),
            Err(EngineError::CommandQueueFull)
        ));
        assert!(matches!(out.stop_voice(DeckSide::Left, last), Err(EngineError::CommandQueueFull)));

        out.render(&mut [0.0; 2]);
        let next = out.start_voice(DeckSide::Left, pcm, 0.0).unwrap();
        assert_eq!(next, last + 1, "a rejected start does not consume a voice id");
    }

    #[test]
    fn gain_changes_bypass_the_command_queue() {
        let mut out = offline_with_capacity(100, 2);
        for i in 0..500 {
            out.gains().set_crossfader(if i % 2 == 0 { 1.0 } else { -1.0 });
            out.gains().set_deck_volume(DeckSide::Left, 0.5);
            out.gains().set_master_volume(0.9);
        }
        let pcm = Arc::new(PcmBuffer::new(vec![0.5; 2 * 10], 100, 2));
        assert!(out.start_voice(DeckSide::Left, pcm, 0.0).is_ok());
    }
}
