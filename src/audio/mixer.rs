use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use super::crossfade::{clamp_crossfader, CrossfadeLaw, DeckSide};
use crate::config::clamp_unit;

/// Gain stages for one deck: volume fader → crossfade stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStrip {
    /// Deck volume 0.0 – 1.0 (linear; 1.0 = unity).
    pub fader: f32,
    /// Crossfade-stage coefficient derived from the crossfader position.
    pub crossfade: f32,
}

impl ChannelStrip {
    #[inline]
    pub fn gain(&self) -> f32 {
        self.fader * self.crossfade
    }
}

impl Default for ChannelStrip {
    fn default() -> Self {
        Self { fader: 1.0, crossfade: 0.5 }
    }
}

/// The fixed mixing topology:
///
/// ```text
/// left deck  → [left volume]  → [left crossfade]  ┐
///                                                 ├→ [master] → analyser → output
/// right deck → [right volume] → [right crossfade] ┘
/// ```
///
/// All buffers are interleaved stereo f32 (L R L R …). Gain changes apply
/// immediately on the next buffer; there is no ramping.
#[derive(Debug, Clone, PartialEq)]
pub struct GainGraph {
    pub left: ChannelStrip,
    pub right: ChannelStrip,
    pub master_gain: f32,
    crossfader: f32,
    law: CrossfadeLaw,
}

impl Default for GainGraph {
    fn default() -> Self {
        Self::new(1.0, 1.0, CrossfadeLaw::Linear)
    }
}

impl GainGraph {
    pub fn new(deck_volume: f32, master_volume: f32, law: CrossfadeLaw) -> Self {
        let mut graph = Self {
            left: ChannelStrip::default(),
            right: ChannelStrip::default(),
            master_gain: 1.0,
            crossfader: 0.0,
            law,
        };
        graph.set_deck_volume(DeckSide::Left, deck_volume);
        graph.set_deck_volume(DeckSide::Right, deck_volume);
        graph.set_master_volume(master_volume);
        graph.set_crossfader(0.0);
        graph
    }

    pub fn channel_mut(&mut self, side: DeckSide) -> &mut ChannelStrip {
        match side {
            DeckSide::Left => &mut self.left,
            DeckSide::Right => &mut self.right,
        }
    }

    /// Set a deck's volume stage; returns the clamped value.
    pub fn set_deck_volume(&mut self, side: DeckSide, volume: f32) -> f32 {
        let v = clamp_unit(volume);
        self.channel_mut(side).fader = v;
        v
    }

    /// Set the crossfader position and recompute both crossfade stages;
    /// returns the clamped position.
    pub fn set_crossfader(&mut self, value: f32) -> f32 {
        let x = clamp_crossfader(value);
        let (l, r) = self.law.gains(x);
        self.crossfader = x;
        self.left.crossfade = l;
        self.right.crossfade = r;
        x
    }

    pub fn set_master_volume(&mut self, volume: f32) -> f32 {
        self.master_gain = clamp_unit(volume);
        self.master_gain
    }

    pub fn crossfader(&self) -> f32 {
        self.crossfader
    }

    /// Pull the latest control values into the gain stages.
    #[inline]
    pub fn apply(&mut self, params: &GainParams) {
        self.set_deck_volume(DeckSide::Left, params.deck_volume(DeckSide::Left));
        self.set_deck_volume(DeckSide::Right, params.deck_volume(DeckSide::Right));
        self.set_master_volume(params.master_volume());
        if params.crossfader() != self.crossfader {
            self.set_crossfader(params.crossfader());
        }
    }

    /// Sum both deck buffers into `master_buf` through their gain stages,
    /// then apply the master gain.
    ///
    /// **Called on the real-time audio thread — no allocations.**
    pub fn mix_into(&self, master_buf: &mut [f32], left_buf: &[f32], right_buf: &[f32]) {
        debug_assert_eq!(master_buf.len(), left_buf.len());
        debug_assert_eq!(master_buf.len(), right_buf.len());

        master_buf.fill(0.0);

        Self::accumulate(master_buf, left_buf, self.left.gain());
        Self::accumulate(master_buf, right_buf, self.right.gain());

        if (self.master_gain - 1.0).abs() > 1e-6 {
            for s in master_buf.iter_mut() {
                *s *= self.master_gain;
            }
        }
    }

    #[inline]
    fn accumulate(dest: &mut [f32], src: &[f32], gain: f32) {
        if gain == 0.0 {
            return;
        }
        for (&s, d) in src.iter().zip(dest.iter_mut()) {
            *d += s * gain;
        }
    }
}

// ── GainParams ───────────────────────────────────────────────────────────────

/// Control values shared with the render thread as f32 bit patterns.
///
/// Only the latest value of each control matters, so the control thread
/// overwrites them in place and the renderer reads them once per buffer.
#[derive(Debug)]
pub struct GainParams {
    left: AtomicU32,
    right: AtomicU32,
    crossfader: AtomicU32,
    master: AtomicU32,
}

impl GainParams {
    pub fn from_graph(graph: &GainGraph) -> Self {
        Self {
            left: AtomicU32::new(graph.left.fader.to_bits()),
            right: AtomicU32::new(graph.right.fader.to_bits()),
            crossfader: AtomicU32::new(graph.crossfader.to_bits()),
            master: AtomicU32::new(graph.master_gain.to_bits()),
        }
    }

    fn slot(&self, side: DeckSide) -> &AtomicU32 {
        match side {
            DeckSide::Left => &self.left,
            DeckSide::Right => &self.right,
        }
    }

    pub fn set_deck_volume(&self, side: DeckSide, volume: f32) {
        self.slot(side).store(clamp_unit(volume).to_bits(), Ordering::Relaxed);
    }

    pub fn set_crossfader(&self, value: f32) {
        self.crossfader.store(clamp_crossfader(value).to_bits(), Ordering::Relaxed);
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.master.store(clamp_unit(volume).to_bits(), Ordering::Relaxed);
    }

    pub fn deck_volume(&self, side: DeckSide) -> f32 {
        f32::from_bits(self.slot(side).load(Ordering::Relaxed))
    }

    pub fn crossfader(&self) -> f32 {
        f32::from_bits(self.crossfader.load(Ordering::Relaxed))
    }

    pub fn master_volume(&self) -> f32 {
        f32::from_bits(self.master.load(Ordering::Relaxed))
    }
}
