use serde::{Deserialize, Serialize};

use crate::audio::{crossfade::DeckSide, track::LoadedTrack};

/// Track metadata as shown to observers; no audio attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub url: String,
    pub duration_secs: f64,
}

impl From<&LoadedTrack> for TrackSnapshot {
    fn from(loaded: &LoadedTrack) -> Self {
        Self {
            id: loaded.track.id.clone(),
            title: loaded.track.title.clone(),
            artist: loaded.track.artist.clone(),
            url: loaded.track.url.clone(),
            duration_secs: loaded.duration_secs,
        }
    }
}

/// Observable state of one deck.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeckSnapshot {
    pub current_track: Option<TrackSnapshot>,
    pub queued_track: Option<TrackSnapshot>,
    pub is_playing: bool,
    pub volume: f32,
    pub is_loading: bool,
    pub is_queue_loading: bool,
    /// Playhead when the snapshot was taken.
    pub position_secs: f64,
    pub duration_secs: f64,
    /// Message of the last failed load; cleared by the next successful one.
    pub last_error: Option<String>,
}

/// Everything a UI needs to draw the mixer, published on every change.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineState {
    pub left_deck: DeckSnapshot,
    pub right_deck: DeckSnapshot,
    pub crossfader_value: f32,
    pub master_volume: f32,
    pub initialized: bool,
}

impl EngineState {
    pub fn deck(&self, side: DeckSide) -> &DeckSnapshot {
        match side {
            DeckSide::Left => &self.left_deck,
            DeckSide::Right => &self.right_deck,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_field_names() {
        let state = EngineState { crossfader_value: -0.5, master_volume: 0.7, ..EngineState::default() };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["crossfader_value"], -0.5);
        assert_eq!(json["left_deck"]["is_playing"], false);
        assert!(json["right_deck"]["current_track"].is_null());
    }

    #[test]
    fn deck_lookup_by_side() {
        let mut state = EngineState::default();
        state.right_deck.volume = 0.25;
        assert_eq!(state.deck(DeckSide::Right).volume, 0.25);
        assert_eq!(state.deck(DeckSide::Left).volume, 0.0);
    }
}
