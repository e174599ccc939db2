use std::sync::Arc;

use tokio::{
    runtime::Handle,
    sync::{mpsc, watch},
};

use super::{
    crossfade::{clamp_crossfader, DeckSide},
    deck::{DeckController, LoadStart, LoadTicket, PlaybackTarget, Step},
    decoder::{fetch_and_decode, Fetcher},
    mixer::GainGraph,
    output::AudioOutput,
    renderer::{RenderEvent, VoiceId},
    track::{LoadedTrack, PcmBuffer, Track},
};
use crate::{
    config::{clamp_unit, EngineConfig},
    error::{EngineError, LoadError},
    state::EngineState,
};

/// A finished decode on its way back to the deck that asked for it.
struct LoadCompletion {
    ticket: LoadTicket,
    result: Result<LoadedTrack, LoadError>,
}

/// Stand-in target while no output exists: the clock stays at zero and every
/// voice command is refused, so no deck can enter the playing phase.
struct SilentTarget;

impl PlaybackTarget for SilentTarget {
    fn now(&self) -> f64 {
        0.0
    }

    fn start_voice(
        &mut self,
        _side: DeckSide,
        _pcm: Arc<PcmBuffer>,
        _offset_secs: f64,
    ) -> Result<VoiceId, EngineError> {
        Err(EngineError::Output("No audio output".into()))
    }

    fn stop_voice(&mut self, _side: DeckSide, _voice: VoiceId) -> Result<(), EngineError> {
        Err(EngineError::Output("No audio output".into()))
    }
}

/// The two-deck mixing engine. Owns the gain graph (inside the output) and
/// both decks, and publishes an [`EngineState`] after every change.
///
/// The engine is driven from one control thread. Decodes run on the Tokio
/// runtime that was current at construction; their results are applied the
/// next time the engine is pumped.
pub struct DjEngine {
    config: EngineConfig,
    fetcher: Arc<dyn Fetcher>,
    runtime: Handle,
    decks: [DeckController; 2],
    crossfader: f32,
    master_volume: f32,
    output: Option<AudioOutput>,
    completions_tx: mpsc::UnboundedSender<LoadCompletion>,
    completions_rx: mpsc::UnboundedReceiver<LoadCompletion>,
    state_tx: watch::Sender<EngineState>,
}

impl DjEngine {
    /// Create an uninitialised engine. Must be called inside a Tokio runtime.
    pub fn new(config: EngineConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let config = config.sanitized();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(EngineState::default());

        let mut engine = Self {
            decks: [
                DeckController::new(DeckSide::Left, config.default_deck_volume),
                DeckController::new(DeckSide::Right, config.default_deck_volume),
            ],
            crossfader: 0.0,
            master_volume: config.default_master_volume,
            config,
            fetcher,
            runtime,
            output: None,
            completions_tx,
            completions_rx,
            state_tx,
        };
        engine.publish();
        Ok(engine)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Build the gain graph and open the output. Idempotent.
    pub fn init(&mut self) -> Result<(), EngineError> {
        if self.output.is_some() {
            return Ok(());
        }
        let mut graph = GainGraph::new(
            self.decks[DeckSide::Left.index()].volume(),
            self.master_volume,
            self.config.crossfade_law,
        );
        graph.set_deck_volume(DeckSide::Right, self.decks[DeckSide::Right.index()].volume());
        graph.set_crossfader(self.crossfader);

        let output = AudioOutput::open(&self.config, graph)?;
        log::info!(
            "Audio engine initialised ({:?}, {} Hz, {} ch)",
            output.backend(),
            output.sample_rate(),
            output.channels()
        );
        self.output = Some(output);
        self.publish();
        Ok(())
    }

    /// Hook for the first user interaction; initialises lazily.
    pub fn on_user_gesture(&mut self) {
        self.ensure_init();
    }

    /// Stop everything, close the output and return to the freshly
    /// constructed state. Loads still in flight are discarded when they land.
    pub fn dispose(&mut self) {
        self.output = None;
        let volume = self.config.default_deck_volume;
        for deck in &mut self.decks {
            deck.reset(volume);
        }
        self.crossfader = 0.0;
        self.master_volume = self.config.default_master_volume;
        log::info!("Audio engine disposed");
        self.publish();
    }

    pub fn is_initialized(&self) -> bool {
        self.output.is_some()
    }

    // ── Deck control ─────────────────────────────────────────────────────

    /// Load `track` onto `side`: replaces a stopped deck's track, queues
    /// behind a playing one, or dequeues it if it is already queued.
    pub fn load_track(&mut self, track: Track, side: DeckSide) {
        self.ensure_init();
        self.drain();
        match self.decks[side.index()].begin_load(&track) {
            LoadStart::Dequeued => {}
            LoadStart::Pending(ticket) => self.spawn_load(ticket, track),
        }
        self.publish();
    }

    /// Play/pause `side`, or cut over to its queued track. Without an open
    /// output this only logs.
    pub fn toggle_playback(&mut self, side: DeckSide) {
        self.ensure_init();
        self.drain();
        match self.output.as_mut() {
            Some(out) => {
                self.decks[side.index()].toggle_playback(out);
            }
            None => log::warn!("No audio output; toggle on {side} deck ignored"),
        }
        self.publish();
    }

    pub fn seek(&mut self, side: DeckSide, seconds: f64) {
        self.drain();
        let epsilon = self.config.seek_epsilon_secs;
        self.with_target(side, |deck, target| deck.seek(seconds, epsilon, target));
        self.publish();
    }

    /// Load the track after the current one in `playlist`, wrapping.
    pub fn next(&mut self, side: DeckSide, playlist: &[Track]) {
        self.navigate(side, playlist, Step::Next);
    }

    /// Load the track before the current one in `playlist`, wrapping.
    pub fn previous(&mut self, side: DeckSide, playlist: &[Track]) {
        self.navigate(side, playlist, Step::Previous);
    }

    // ── Gain controls ────────────────────────────────────────────────────

    pub fn set_crossfader(&mut self, value: f32) {
        self.drain();
        self.crossfader = clamp_crossfader(value);
        if let Some(out) = &self.output {
            out.gains().set_crossfader(self.crossfader);
        }
        self.publish();
    }

    pub fn set_deck_volume(&mut self, side: DeckSide, volume: f32) {
        self.drain();
        let volume = self.decks[side.index()].set_volume(volume);
        if let Some(out) = &self.output {
            out.gains().set_deck_volume(side, volume);
        }
        self.publish();
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.drain();
        self.master_volume = clamp_unit(volume);
        if let Some(out) = &self.output {
            out.gains().set_master_volume(self.master_volume);
        }
        self.publish();
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Fraction of `side`'s current track played, 0.0 – 1.0.
    #[inline]
    pub fn progress(&self, side: DeckSide) -> f64 {
        self.decks[side.index()].progress(self.now())
    }

    /// Byte spectrum of the master output; all zeros before init.
    pub fn frequency_data(&self) -> Vec<u8> {
        match &self.output {
            Some(out) => out.frequency_data(),
            None => vec![0; self.config.analyzer.fft_size / 2],
        }
    }

    pub fn state(&self) -> EngineState {
        let now = self.now();
        EngineState {
            left_deck: self.decks[DeckSide::Left.index()].snapshot(now),
            right_deck: self.decks[DeckSide::Right.index()].snapshot(now),
            crossfader_value: self.crossfader,
            master_volume: self.master_volume,
            initialized: self.is_initialized(),
        }
    }

    /// Receiver that sees a fresh snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    /// Output sample rate, once initialised.
    pub fn sample_rate(&self) -> Option<u32> {
        self.output.as_ref().map(AudioOutput::sample_rate)
    }

    // ── Event plumbing ───────────────────────────────────────────────────

    /// Apply finished loads and natural track ends. Returns whether anything
    /// changed; a change is published.
    pub fn pump(&mut self) -> bool {
        let changed = self.drain();
        if changed {
            self.publish();
        }
        changed
    }

    /// Wait until no deck has a load in flight, applying each result.
    pub async fn settle(&mut self) {
        self.drain();
        while self.decks.iter().any(DeckController::has_pending_load) {
            match self.completions_rx.recv().await {
                Some(completion) => {
                    self.apply_completion(completion);
                }
                None => break,
            }
        }
        self.drain();
        self.publish();
    }

    /// Pull one interleaved buffer through the offline output, then pump.
    /// Returns `false` (and leaves `output` untouched) unless the engine is
    /// initialised with the offline backend.
    pub fn render(&mut self, output: &mut [f32]) -> bool {
        let rendered = self.output.as_ref().is_some_and(|out| out.render(output));
        if rendered {
            self.pump();
        }
        rendered
    }

    // ── Private helpers ──────────────────────────────────────────────────

    fn now(&self) -> f64 {
        self.output.as_ref().map_or(0.0, PlaybackTarget::now)
    }

    fn ensure_init(&mut self) {
        if let Err(e) = self.init() {
            log::error!("Audio init failed: {e}");
        }
    }

    fn with_target<R>(
        &mut self,
        side: DeckSide,
        f: impl FnOnce(&mut DeckController, &mut dyn PlaybackTarget) -> R,
    ) -> R {
        let deck = &mut self.decks[side.index()];
        match self.output.as_mut() {
            Some(out) => f(deck, out as &mut dyn PlaybackTarget),
            None => f(deck, &mut SilentTarget as &mut dyn PlaybackTarget),
        }
    }

    fn navigate(&mut self, side: DeckSide, playlist: &[Track], step: Step) {
        self.drain();
        if let Some((ticket, track)) = self.decks[side.index()].begin_navigate(playlist, step) {
            self.spawn_load(ticket, track);
        }
        self.publish();
    }

    fn spawn_load(&self, ticket: LoadTicket, track: Track) {
        log::info!("Loading '{}' on {} deck ({:?})", track.title, ticket.side, ticket.kind);
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.completions_tx.clone();
        self.runtime.spawn(async move {
            let result = fetch_and_decode(fetcher, track).await;
            // Receiver gone means the engine was dropped.
            let _ = tx.send(LoadCompletion { ticket, result });
        });
    }

    fn drain(&mut self) -> bool {
        let mut changed = false;
        if let Some(out) = self.output.as_mut() {
            while let Some(RenderEvent::VoiceEnded { side, voice }) = out.poll_event() {
                changed |= self.decks[side.index()].on_voice_ended(voice);
            }
        }
        while let Ok(completion) = self.completions_rx.try_recv() {
            changed |= self.apply_completion(completion);
        }
        changed
    }

    fn apply_completion(&mut self, completion: LoadCompletion) -> bool {
        let LoadCompletion { ticket, result } = completion;
        self.with_target(ticket.side, |deck, target| deck.complete_load(ticket, result, target))
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state());
    }
}
