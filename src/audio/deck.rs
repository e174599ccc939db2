use std::sync::Arc;

use super::{
    crossfade::DeckSide,
    renderer::VoiceId,
    track::{LoadedTrack, PcmBuffer, Track},
    transport::TransportClock,
};
use crate::{
    config::clamp_unit,
    error::{EngineError, LoadError},
    state::{DeckSnapshot, TrackSnapshot},
};

/// What a deck needs from the output: the clock and voice start/stop.
///
/// Both voice calls fail when the command could not be handed to the render
/// thread; the deck then keeps its previous phase.
pub trait PlaybackTarget {
    /// Output clock in seconds.
    fn now(&self) -> f64;
    /// Start reading `pcm` from `offset_secs` on `side`'s volume stage,
    /// replacing whatever that side was playing.
    fn start_voice(&mut self, side: DeckSide, pcm: Arc<PcmBuffer>, offset_secs: f64)
        -> Result<VoiceId, EngineError>;
    fn stop_voice(&mut self, side: DeckSide, voice: VoiceId) -> Result<(), EngineError>;
}

/// Which branch a load took when it was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// Deck was not playing: the decoded track replaces the current one.
    Replace,
    /// Deck was playing: the decoded track becomes the queued one.
    Queue,
    /// Next/previous: the decoded track replaces the current one and
    /// inherits the playing state.
    Navigate,
}

/// Identifies one in-flight decode. Only the newest ticket per deck is honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub side: DeckSide,
    pub generation: u64,
    pub kind: LoadKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStart {
    /// The track was the queued one; it has been dequeued.
    Dequeued,
    /// A decode must be run; report it back with `complete_load`.
    Pending(LoadTicket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Next,
    Previous,
}

/// Deck lifecycle. Playing always carries its voice, so "playing with no
/// track" or "playing with no voice" cannot be expressed.
#[derive(Debug, Clone, Default)]
enum DeckPhase {
    #[default]
    Empty,
    Paused {
        current: Arc<LoadedTrack>,
        queued: Option<Arc<LoadedTrack>>,
    },
    Playing {
        current: Arc<LoadedTrack>,
        queued: Option<Arc<LoadedTrack>>,
        voice: VoiceId,
    },
}

/// Playback control for one deck: current and queued track, play/pause,
/// position accounting and the queue-while-playing rules.
#[derive(Debug)]
pub struct DeckController {
    side: DeckSide,
    phase: DeckPhase,
    transport: TransportClock,
    volume: f32,
    /// Newest outstanding decode, if any.
    pending: Option<LoadTicket>,
    generation: u64,
    last_error: Option<String>,
}

impl DeckController {
    pub fn new(side: DeckSide, volume: f32) -> Self {
        Self {
            side,
            phase: DeckPhase::Empty,
            transport: TransportClock::new(),
            volume: clamp_unit(volume),
            pending: None,
            generation: 0,
            last_error: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.phase, DeckPhase::Playing { .. })
    }

    /// A replace or next/previous decode is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self.pending, Some(t) if t.kind != LoadKind::Queue)
    }

    /// A queue decode is in flight.
    pub fn is_queue_loading(&self) -> bool {
        matches!(self.pending, Some(t) if t.kind == LoadKind::Queue)
    }

    pub fn has_pending_load(&self) -> bool {
        self.pending.is_some()
    }

    pub fn current(&self) -> Option<&LoadedTrack> {
        match &self.phase {
            DeckPhase::Empty => None,
            DeckPhase::Paused { current, .. } | DeckPhase::Playing { current, .. } => Some(current),
        }
    }

    pub fn queued(&self) -> Option<&LoadedTrack> {
        match &self.phase {
            DeckPhase::Empty => None,
            DeckPhase::Paused { queued, .. } | DeckPhase::Playing { queued, .. } => queued.as_deref(),
        }
    }

    pub fn active_voice(&self) -> Option<VoiceId> {
        match self.phase {
            DeckPhase::Playing { voice, .. } => Some(voice),
            _ => None,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Store the deck volume; returns the clamped value.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = clamp_unit(volume);
        self.volume
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    // ── Loading ──────────────────────────────────────────────────────────

    /// Start loading `track`.
    ///
    /// Selecting the queued track again dequeues it. Otherwise a playing deck
    /// queues the track and a stopped deck replaces its current one once the
    /// decode finishes.
    pub fn begin_load(&mut self, track: &Track) -> LoadStart {
        if self.queued().is_some_and(|q| q.id() == track.id) {
            self.take_queued();
            log::info!("Dequeued '{}' from {} deck", track.title, self.side);
            return LoadStart::Dequeued;
        }
        let kind = if self.is_playing() { LoadKind::Queue } else { LoadKind::Replace };
        LoadStart::Pending(self.issue(kind))
    }

    /// Pick the playlist neighbour of the current track (wrapping) and issue a
    /// load for it. `None` when the deck is empty, loading, or its current
    /// track is not in `playlist`.
    pub fn begin_navigate(&mut self, playlist: &[Track], step: Step) -> Option<(LoadTicket, Track)> {
        if self.is_loading() {
            log::debug!("{} deck busy loading; {step:?} ignored", self.side);
            return None;
        }
        let current_id = self.current()?.id();
        let Some(index) = playlist.iter().position(|t| t.id == current_id) else {
            log::debug!("Current track '{current_id}' not in playlist; {step:?} ignored");
            return None;
        };
        let len = playlist.len();
        let target = match step {
            Step::Next => (index + 1) % len,
            Step::Previous => (index + len - 1) % len,
        };
        let track = playlist[target].clone();
        Some((self.issue(LoadKind::Navigate), track))
    }

    /// Apply a finished decode. Returns `false` when the ticket was superseded
    /// and the result dropped.
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<LoadedTrack, LoadError>,
        target: &mut dyn PlaybackTarget,
    ) -> bool {
        if self.pending != Some(ticket) {
            log::debug!(
                "Dropping stale load #{} on {} deck (newest: {:?})",
                ticket.generation,
                self.side,
                self.pending.map(|t| t.generation)
            );
            return false;
        }
        self.pending = None;

        let loaded = match result {
            Ok(loaded) => Arc::new(loaded),
            Err(e) => {
                log::warn!("Failed to load track on {} deck: {e}", self.side);
                self.last_error = Some(e.to_string());
                return true;
            }
        };
        self.last_error = None;

        match ticket.kind {
            LoadKind::Queue => {
                log::info!("Queued '{}' on {} deck", loaded.track.title, self.side);
                match &mut self.phase {
                    DeckPhase::Paused { queued, .. } | DeckPhase::Playing { queued, .. } => {
                        *queued = Some(loaded);
                    }
                    DeckPhase::Empty => {
                        self.transport.reset();
                        self.phase = DeckPhase::Paused { current: loaded, queued: None };
                    }
                }
            }
            LoadKind::Replace | LoadKind::Navigate => {
                log::info!("Loaded '{}' on {} deck", loaded.track.title, self.side);
                self.switch_current(loaded, target);
            }
        }
        true
    }

    // ── Transport ────────────────────────────────────────────────────────

    /// Play/pause, or cut over to the queued track while playing.
    /// Returns `false` when it was a no-op.
    pub fn toggle_playback(&mut self, target: &mut dyn PlaybackTarget) -> bool {
        if self.is_loading() {
            log::debug!("{} deck busy loading; toggle ignored", self.side);
            return false;
        }
        let side = self.side;
        let now = target.now();

        match &self.phase {
            DeckPhase::Empty => {
                log::debug!("{side} deck has nothing to play");
                false
            }
            DeckPhase::Playing { queued: Some(next), .. } => {
                let next = Arc::clone(next);
                let Some(voice) = self.accepted(target.start_voice(side, Arc::clone(&next.pcm), 0.0), "cut-over")
                else {
                    return false;
                };
                self.transport.reset();
                self.transport.play(now);
                log::info!("Transitioned to queued '{}' on {side} deck", next.track.title);
                self.phase = DeckPhase::Playing { current: next, queued: None, voice };
                true
            }
            DeckPhase::Playing { current, queued: None, voice } => {
                let current = Arc::clone(current);
                if self.accepted(target.stop_voice(side, *voice), "pause").is_none() {
                    return false;
                }
                self.transport.pause(now);
                self.phase = DeckPhase::Paused { current, queued: None };
                true
            }
            DeckPhase::Paused { current, queued } => {
                // A queued track is promoted and starts from zero.
                let (track, offset) = match queued {
                    Some(next) => (Arc::clone(next), 0.0),
                    None => (Arc::clone(current), self.transport.offset()),
                };
                let promoted = queued.is_some();
                let Some(voice) = self.accepted(target.start_voice(side, Arc::clone(&track.pcm), offset), "play")
                else {
                    return false;
                };
                if promoted {
                    self.transport.reset();
                }
                self.transport.play(now);
                self.phase = DeckPhase::Playing { current: track, queued: None, voice };
                true
            }
        }
    }

    /// Move the playhead to `seconds`, clamped to `[0, duration - epsilon]`.
    /// A playing deck restarts its voice there; a paused deck starts there on
    /// the next play.
    pub fn seek(&mut self, seconds: f64, epsilon: f64, target: &mut dyn PlaybackTarget) -> bool {
        if self.is_loading() {
            log::debug!("{} deck busy loading; seek ignored", self.side);
            return false;
        }
        let Some(duration) = self.current().map(|t| t.duration_secs) else {
            return false;
        };
        let position = clamp_seek(seconds, duration, epsilon);
        let side = self.side;
        let now = target.now();

        if let DeckPhase::Playing { current, voice, .. } = &mut self.phase {
            match target.start_voice(side, Arc::clone(&current.pcm), position) {
                Ok(restarted) => *voice = restarted,
                Err(e) => {
                    log::warn!("{side} deck: seek not applied: {e}");
                    return false;
                }
            }
        }
        self.transport.seek(position, now);
        true
    }

    /// The render thread reports that `voice` played to its end. Acts like a
    /// pause at the very end followed by a rewind to zero.
    pub fn on_voice_ended(&mut self, voice: VoiceId) -> bool {
        if self.active_voice() != Some(voice) {
            return false;
        }
        if let DeckPhase::Playing { current, queued, .. } = std::mem::take(&mut self.phase) {
            log::info!("'{}' finished on {} deck", current.track.title, self.side);
            self.phase = DeckPhase::Paused { current, queued };
        }
        self.transport.reset();
        true
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Playhead in seconds at clock reading `now`.
    pub fn position(&self, now: f64) -> f64 {
        match self.current() {
            Some(t) => self.transport.elapsed(now).min(t.duration_secs),
            None => 0.0,
        }
    }

    /// Fraction of the current track played, 0.0 – 1.0. Allocation-free.
    #[inline]
    pub fn progress(&self, now: f64) -> f64 {
        let duration = match self.current() {
            Some(t) => t.duration_secs,
            None => return 0.0,
        };
        if duration <= 0.0 {
            return 0.0;
        }
        (self.transport.elapsed(now) / duration).clamp(0.0, 1.0)
    }

    pub fn snapshot(&self, now: f64) -> DeckSnapshot {
        DeckSnapshot {
            current_track: self.current().map(TrackSnapshot::from),
            queued_track: self.queued().map(TrackSnapshot::from),
            is_playing: self.is_playing(),
            volume: self.volume,
            is_loading: self.is_loading(),
            is_queue_loading: self.is_queue_loading(),
            position_secs: self.position(now),
            duration_secs: self.current().map(|t| t.duration_secs).unwrap_or(0.0),
            last_error: self.last_error.clone(),
        }
    }

    /// Back to empty. Outstanding decodes are forgotten; the generation
    /// counter keeps counting so their late results stay stale.
    pub fn reset(&mut self, volume: f32) {
        self.phase = DeckPhase::Empty;
        self.transport.reset();
        self.volume = clamp_unit(volume);
        self.pending = None;
        self.last_error = None;
    }

    // ── Private helpers ──────────────────────────────────────────────────

    fn issue(&mut self, kind: LoadKind) -> LoadTicket {
        self.generation += 1;
        let ticket = LoadTicket { side: self.side, generation: self.generation, kind };
        if let Some(old) = self.pending.replace(ticket) {
            log::debug!("Load #{} on {} deck superseded by #{}", old.generation, self.side, ticket.generation);
        }
        ticket
    }

    /// Log a voice command the output refused; `Some` when it was queued.
    fn accepted<T>(&self, result: Result<T, EngineError>, action: &str) -> Option<T> {
        result.map_err(|e| log::warn!("{} deck: {action} not applied: {e}", self.side)).ok()
    }

    fn take_queued(&mut self) -> Option<Arc<LoadedTrack>> {
        match &mut self.phase {
            DeckPhase::Empty => None,
            DeckPhase::Paused { queued, .. } | DeckPhase::Playing { queued, .. } => queued.take(),
        }
    }

    /// Make `loaded` current from zero, keeping the queued track and the
    /// playing/paused state. A playing deck whose new voice is refused keeps
    /// its old track and records the failure.
    fn switch_current(&mut self, loaded: Arc<LoadedTrack>, target: &mut dyn PlaybackTarget) {
        let side = self.side;
        self.phase = match std::mem::take(&mut self.phase) {
            DeckPhase::Empty => {
                self.transport.reset();
                DeckPhase::Paused { current: loaded, queued: None }
            }
            DeckPhase::Paused { queued, .. } => {
                self.transport.reset();
                DeckPhase::Paused { current: loaded, queued }
            }
            DeckPhase::Playing { current, queued, voice } => {
                match target.start_voice(side, Arc::clone(&loaded.pcm), 0.0) {
                    Ok(voice) => {
                        self.transport.reset();
                        self.transport.play(target.now());
                        DeckPhase::Playing { current: loaded, queued, voice }
                    }
                    Err(e) => {
                        log::warn!("'{}' not started on {side} deck: {e}", loaded.track.title);
                        self.last_error = Some(format!("{e}; '{}' not started", loaded.track.title));
                        DeckPhase::Playing { current, queued, voice }
                    }
                }
            }
        };
    }
}

/// Clamp a seek target into `[0, duration - epsilon]`; NaN seeks to zero.
pub fn clamp_seek(seconds: f64, duration: f64, epsilon: f64) -> f64 {
    let max = (duration - epsilon).max(0.0);
    if seconds.is_nan() {
        0.0
    } else {
        seconds.clamp(0.0, max)
    }
}
