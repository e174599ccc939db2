use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use ringbuf::traits::{Consumer as _, Producer as _};

use super::{
    analyzer::FrequencyAnalyzer,
    crossfade::DeckSide,
    mixer::{GainGraph, GainParams},
    track::PcmBuffer,
};

/// Identifies one playback voice. A deck gets a fresh id every time it
/// starts a voice, so an end report for a replaced voice can be ignored.
pub type VoiceId = u64;

/// Control → render thread commands. Gain changes travel through
/// [`GainParams`] instead.
pub enum RenderCommand {
    /// Start a voice on `side`, replacing whatever that side was playing.
    StartVoice { side: DeckSide, voice: VoiceId, pcm: Arc<PcmBuffer>, offset_secs: f64 },
    StopVoice { side: DeckSide, voice: VoiceId },
    StopAll,
}

/// Render → control thread notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEvent {
    /// The voice played to the end of its buffer without being stopped.
    VoiceEnded { side: DeckSide, voice: VoiceId },
}

/// One buffer being read from a start offset until it runs out.
struct Voice {
    id: VoiceId,
    pcm: Arc<PcmBuffer>,
    /// Read position in source frames (fractional when rates differ).
    position: f64,
    /// Source frames per output frame.
    step: f64,
}

impl Voice {
    fn new(id: VoiceId, pcm: Arc<PcmBuffer>, offset_secs: f64, output_rate: u32) -> Self {
        let source_rate = pcm.sample_rate() as f64;
        Self {
            id,
            position: (offset_secs.max(0.0) * source_rate).max(0.0),
            step: source_rate / output_rate.max(1) as f64,
            pcm,
        }
    }

    /// Fill `out` (interleaved stereo). Returns `false` once the buffer is
    /// exhausted; the remainder of `out` is silence.
    fn render(&mut self, out: &mut [f32]) -> bool {
        let len = self.pcm.frames() as f64;
        if self.position >= len {
            out.fill(0.0);
            return false;
        }
        for (i, frame) in out.chunks_exact_mut(2).enumerate() {
            let idx = self.position as usize;
            let frac = (self.position - idx as f64) as f32;
            let (l0, r0) = self.pcm.frame(idx);
            let (l1, r1) = if frac > 0.0 { self.pcm.frame(idx + 1) } else { (l0, r0) };
            frame[0] = l0 + (l1 - l0) * frac;
            frame[1] = r0 + (r1 - r0) * frac;

            self.position += self.step;
            if self.position >= len {
                out[(i + 1) * 2..].fill(0.0);
                return false;
            }
        }
        true
    }
}

/// Everything the output callback touches: the two deck voices, the gain
/// graph, the analyser tap and scratch buffers.
///
/// Lives behind `Arc<Mutex<_>>`; the device callback only ever `try_lock`s it.
pub struct Renderer {
    graph: GainGraph,
    params: Arc<GainParams>,
    voices: [Option<Voice>; 2],
    analyzer: FrequencyAnalyzer,
    sample_rate: u32,
    commands: ringbuf::HeapCons<RenderCommand>,
    events: ringbuf::HeapProd<RenderEvent>,
    frames_rendered: Arc<AtomicU64>,
    // Per-deck scratch buffers (avoid alloc in callback)
    buf_left: Vec<f32>,
    buf_right: Vec<f32>,
    buf_master: Vec<f32>,
}

impl Renderer {
    pub fn new(
        graph: GainGraph,
        params: Arc<GainParams>,
        analyzer: FrequencyAnalyzer,
        sample_rate: u32,
        commands: ringbuf::HeapCons<RenderCommand>,
        events: ringbuf::HeapProd<RenderEvent>,
        frames_rendered: Arc<AtomicU64>,
    ) -> Self {
        Self {
            graph,
            params,
            voices: [None, None],
            analyzer,
            sample_rate,
            commands,
            events,
            frames_rendered,
            buf_left: Vec::new(),
            buf_right: Vec::new(),
            buf_master: Vec::new(),
        }
    }

    pub fn graph(&self) -> &GainGraph {
        &self.graph
    }

    pub fn active_voice(&self, side: DeckSide) -> Option<VoiceId> {
        self.voices[side.index()].as_ref().map(|v| v.id)
    }

    /// Render one device buffer with `channels` interleaved channels.
    /// Stereo goes to the first two channels; a mono device gets the average.
    ///
    /// Called on the real-time audio thread — no allocations except the first
    /// call per buffer size.
    pub fn render(&mut self, output: &mut [f32], channels: usize) {
        self.process_commands();
        self.graph.apply(&self.params);

        let channels = channels.max(1);
        let frames = output.len() / channels;
        let len = frames * 2;
        if self.buf_master.len() != len {
            self.buf_left.resize(len, 0.0);
            self.buf_right.resize(len, 0.0);
            self.buf_master.resize(len, 0.0);
        }

        for side in DeckSide::ALL {
            let buf = match side {
                DeckSide::Left => &mut self.buf_left,
                DeckSide::Right => &mut self.buf_right,
            };
            let slot = &mut self.voices[side.index()];
            let ended = match slot {
                Some(voice) => !voice.render(buf),
                None => {
                    buf.fill(0.0);
                    false
                }
            };
            if ended {
                if let Some(voice) = slot.take() {
                    let _ = self.events.try_push(RenderEvent::VoiceEnded { side, voice: voice.id });
                }
            }
        }

        self.graph.mix_into(&mut self.buf_master, &self.buf_left, &self.buf_right);
        self.analyzer.push_stereo(&self.buf_master);

        for (out, frame) in output.chunks_exact_mut(channels).zip(self.buf_master.chunks_exact(2)) {
            if channels == 1 {
                out[0] = 0.5 * (frame[0] + frame[1]);
            } else {
                out[0] = frame[0];
                out[1] = frame[1];
                out[2..].fill(0.0);
            }
        }

        self.frames_rendered.fetch_add(frames as u64, Ordering::Release);
    }

    /// Drain pending commands from the ring buffer and apply them.
    fn process_commands(&mut self) {
        while let Some(cmd) = self.commands.try_pop() {
            match cmd {
                RenderCommand::StartVoice { side, voice, pcm, offset_secs } => {
                    self.voices[side.index()] = Some(Voice::new(voice, pcm, offset_secs, self.sample_rate));
                }
                RenderCommand::StopVoice { side, voice } => {
                    let slot = &mut self.voices[side.index()];
                    if slot.as_ref().is_some_and(|v| v.id == voice) {
                        *slot = None;
                    }
                }
                RenderCommand::StopAll => {
                    self.voices = [None, None];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::crossfade::CrossfadeLaw, config::AnalyzerConfig};
    use ringbuf::{
        traits::{Consumer as _, Producer as _, Split},
        HeapRb,
    };

    struct Rig {
        renderer: Renderer,
        commands: ringbuf::HeapProd<RenderCommand>,
        events: ringbuf::HeapCons<RenderEvent>,
        frames: Arc<AtomicU64>,
        params: Arc<GainParams>,
    }

    fn rig(rate: u32) -> Rig {
        let (cmd_prod, cmd_cons) = HeapRb::<RenderCommand>::new(32).split();
        let (ev_prod, ev_cons) = HeapRb::<RenderEvent>::new(32).split();
        let frames = Arc::new(AtomicU64::new(0));
        let analyzer = FrequencyAnalyzer::new(&AnalyzerConfig { fft_size: 64, ..AnalyzerConfig::default() });
        let graph = GainGraph::new(1.0, 1.0, CrossfadeLaw::Linear);
        let params = Arc::new(GainParams::from_graph(&graph));
        let renderer = Renderer::new(
            graph,
            Arc::clone(&params),
            analyzer,
            rate,
            cmd_cons,
            ev_prod,
            Arc::clone(&frames),
        );
        Rig { renderer, commands: cmd_prod, events: ev_cons, frames, params }
    }

    fn dc(frames: usize, rate: u32, level: f32) -> Arc<PcmBuffer> {
        Arc::new(PcmBuffer::new(vec![level; frames * 2], rate, 2))
    }

    #[test]
    fn voice_plays_through_gain_stages() {
        let mut r = rig(100);
        r.commands
            .try_push(RenderCommand::StartVoice { side: DeckSide::Left, voice: 1, pcm: dc(50, 100, 1.0), offset_secs: 0.0 })
            .ok();
        let mut out = vec![0.0; 20];
        r.renderer.render(&mut out, 2);
        // Centre crossfader: left stage 0.5
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert_eq!(r.frames.load(Ordering::Acquire), 10);
        assert_eq!(r.renderer.active_voice(DeckSide::Left), Some(1));
    }

    #[test]
    fn natural_end_reports_once_and_silences() {
        let mut r = rig(100);
        r.commands
            .try_push(RenderCommand::StartVoice { side: DeckSide::Right, voice: 7, pcm: dc(10, 100, 1.0), offset_secs: 0.0 })
            .ok();
        let mut out = vec![0.0; 2 * 16];
        r.renderer.render(&mut out, 2);
        assert!(out[..20].iter().all(|&s| s > 0.0));
        assert!(out[20..].iter().all(|&s| s == 0.0));
        assert_eq!(r.events.try_pop(), Some(RenderEvent::VoiceEnded { side: DeckSide::Right, voice: 7 }));

        r.renderer.render(&mut out, 2);
        assert_eq!(r.events.try_pop(), None);
        assert_eq!(r.renderer.active_voice(DeckSide::Right), None);
    }

    #[test]
    fn exact_length_buffer_ends_in_same_callback() {
        let mut r = rig(100);
        r.commands
            .try_push(RenderCommand::StartVoice { side: DeckSide::Left, voice: 3, pcm: dc(8, 100, 1.0), offset_secs: 0.0 })
            .ok();
        let mut out = vec![0.0; 16];
        r.renderer.render(&mut out, 2);
        assert_eq!(r.events.try_pop(), Some(RenderEvent::VoiceEnded { side: DeckSide::Left, voice: 3 }));
    }

    #[test]
    fn stop_ignores_other_voice_ids() {
        let mut r = rig(100);
        r.commands
            .try_push(RenderCommand::StartVoice { side: DeckSide::Left, voice: 2, pcm: dc(100, 100, 1.0), offset_secs: 0.0 })
            .ok();
        r.commands.try_push(RenderCommand::StopVoice { side: DeckSide::Left, voice: 1 }).ok();
        let mut out = vec![0.0; 4];
        r.renderer.render(&mut out, 2);
        assert_eq!(r.renderer.active_voice(DeckSide::Left), Some(2));

        r.commands.try_push(RenderCommand::StopVoice { side: DeckSide::Left, voice: 2 }).ok();
        r.renderer.render(&mut out, 2);
        assert_eq!(r.renderer.active_voice(DeckSide::Left), None);
        assert_eq!(r.events.try_pop(), None, "explicit stop is not a natural end");
    }

    #[test]
    fn offset_and_rate_conversion() {
        let mut r = rig(200);
        // 100 Hz source at a 200 Hz output advances half a frame per output frame.
        let pcm = Arc::new(PcmBuffer::new((0..20).flat_map(|i| [i as f32, i as f32]).collect(), 100, 2));
        r.commands
            .try_push(RenderCommand::StartVoice { side: DeckSide::Left, voice: 1, pcm, offset_secs: 0.05 })
            .ok();
        r.params.set_crossfader(-1.0);
        let mut out = vec![0.0; 6];
        r.renderer.render(&mut out, 2);
        assert!((out[0] - 5.0).abs() < 1e-5);
        assert!((out[2] - 5.5).abs() < 1e-5);
        assert!((out[4] - 6.0).abs() < 1e-5);
    }

    #[test]
    fn gain_params_reach_graph() {
        let mut r = rig(100);
        r.params.set_deck_volume(DeckSide::Right, 0.25);
        r.params.set_crossfader(1.0);
        r.params.set_master_volume(0.5);
        r.renderer.render(&mut [0.0; 2], 2);
        let g = r.renderer.graph();
        assert_eq!(g.right.fader, 0.25);
        assert_eq!(g.crossfader(), 1.0);
        assert_eq!(g.master_gain, 0.5);
    }

    #[test]
    fn multichannel_and_mono_devices() {
        let mut r = rig(100);
        r.commands
            .try_push(RenderCommand::StartVoice { side: DeckSide::Left, voice: 1, pcm: dc(50, 100, 1.0), offset_secs: 0.0 })
            .ok();
        let mut quad = vec![9.0; 8];
        r.renderer.render(&mut quad, 4);
        assert_eq!(&quad[..4], &[0.5, 0.5, 0.0, 0.0]);

        let mut mono = vec![0.0; 3];
        r.renderer.render(&mut mono, 1);
        assert!(mono.iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert_eq!(r.frames.load(Ordering::Acquire), 5);
    }

    #[test]
    fn start_replaces_the_running_voice() {
        let mut r = rig(100);
        r.commands
            .try_push(RenderCommand::StartVoice { side: DeckSide::Left, voice: 1, pcm: dc(4, 100, 1.0), offset_secs: 0.0 })
            .ok();
        r.commands
            .try_push(RenderCommand::StartVoice { side: DeckSide::Left, voice: 2, pcm: dc(100, 100, 1.0), offset_secs: 0.0 })
            .ok();
        r.renderer.render(&mut vec![0.0; 2 * 10], 2);
        assert_eq!(r.renderer.active_voice(DeckSide::Left), Some(2));
        assert_eq!(r.events.try_pop(), None, "replaced voice never reports an end");
    }
}
