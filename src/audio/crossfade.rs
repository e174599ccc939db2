use serde::{Deserialize, Serialize};
use std::{f32::consts::FRAC_PI_2, fmt, str::FromStr};

// ── DeckSide ──────────────────────────────────────────────────────────────────

/// One of the two playback decks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeckSide {
    Left,
    Right,
}

impl DeckSide {
    pub const ALL: [DeckSide; 2] = [DeckSide::Left, DeckSide::Right];

    /// Index into two-element per-deck arrays.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            DeckSide::Left => 0,
            DeckSide::Right => 1,
        }
    }
}

impl fmt::Display for DeckSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeckSide::Left => write!(f, "left"),
            DeckSide::Right => write!(f, "right"),
        }
    }
}

impl FromStr for DeckSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(DeckSide::Left),
            "right" => Ok(DeckSide::Right),
            _ => Err(format!("Unknown deck: {s}")),
        }
    }
}

// ── CrossfadeLaw ──────────────────────────────────────────────────────────────

/// How the crossfader position maps to the two crossfade-stage gains.
///
/// `Linear` is the shipped behaviour: the gains always sum to 1.0, which
/// dips perceived loudness around the centre. `ConstantPower` keeps
/// `left² + right² = 1` and is only used when configured explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadeLaw {
    #[default]
    Linear,
    ConstantPower,
}

impl CrossfadeLaw {
    /// Gains `(left, right)` for crossfader position `value` ∈ [-1, 1].
    ///
    /// `-1` is fully left, `0` centre, `1` fully right. Out-of-range input
    /// is clamped; NaN is treated as centre.
    pub fn gains(self, value: f32) -> (f32, f32) {
        let x = clamp_crossfader(value);
        match self {
            CrossfadeLaw::Linear => (left_gain(x), right_gain(x)),
            CrossfadeLaw::ConstantPower => {
                let t = (x + 1.0) / 2.0;
                ((t * FRAC_PI_2).cos().max(0.0), (t * FRAC_PI_2).sin().max(0.0))
            }
        }
    }
}

/// Clamp a crossfader position to [-1, 1]; NaN becomes centre.
pub fn clamp_crossfader(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

/// Linear left-stage gain: `max(0, (1 - x) / 2)`.
#[inline]
pub fn left_gain(x: f32) -> f32 {
    ((1.0 - x) / 2.0).max(0.0)
}

/// Linear right-stage gain: `max(0, (1 + x) / 2)`.
#[inline]
pub fn right_gain(x: f32) -> f32 {
    ((1.0 + x) / 2.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Linear law ───────────────────────────────────────────────────────

    #[test]
    fn linear_gain_boundaries() {
        let law = CrossfadeLaw::Linear;
        let (l, r) = law.gains(-1.0);
        assert!((l - 1.0).abs() < 1e-6, "full left: left gain should be 1.0");
        assert!(r.abs() < 1e-6, "full left: right gain should be 0.0");

        let (l, r) = law.gains(0.0);
        assert!((l - 0.5).abs() < 1e-6, "centre: left gain should be 0.5");
        assert!((r - 0.5).abs() < 1e-6, "centre: right gain should be 0.5");

        let (l, r) = law.gains(1.0);
        assert!(l.abs() < 1e-6, "full right: left gain should be 0.0");
        assert!((r - 1.0).abs() < 1e-6, "full right: right gain should be 1.0");
    }

    #[test]
    fn linear_law_matches_formula_across_range() {
        for i in 0..=40 {
            let x = -1.0 + i as f32 / 20.0;
            let (l, r) = CrossfadeLaw::Linear.gains(x);
            assert!((l - ((1.0 - x) / 2.0).max(0.0)).abs() < 1e-6, "left at x={x}");
            assert!((r - ((1.0 + x) / 2.0).max(0.0)).abs() < 1e-6, "right at x={x}");
            assert!((l + r - 1.0).abs() < 1e-5, "linear gains should sum to 1 at x={x}");
        }
    }

    #[test]
    fn clamp_outside_range() {
        assert_eq!(clamp_crossfader(-5.0), -1.0);
        assert_eq!(clamp_crossfader(5.0), 1.0);
        assert_eq!(clamp_crossfader(f32::NAN), 0.0);
        assert_eq!(CrossfadeLaw::Linear.gains(7.0), CrossfadeLaw::Linear.gains(1.0));
        assert_eq!(CrossfadeLaw::Linear.gains(-7.0), CrossfadeLaw::Linear.gains(-1.0));
    }

    // ── Constant power law ───────────────────────────────────────────────

    #[test]
    fn constant_power_unity_sum() {
        for i in 0..=20 {
            let x = -1.0 + i as f32 / 10.0;
            let (l, r) = CrossfadeLaw::ConstantPower.gains(x);
            assert!(
                (l * l + r * r - 1.0).abs() < 1e-5,
                "ConstantPower: l²+r² should be 1.0 at x={x}, got {}",
                l * l + r * r
            );
        }
    }

    #[test]
    fn constant_power_endpoints() {
        let (l, r) = CrossfadeLaw::ConstantPower.gains(-1.0);
        assert!((l - 1.0).abs() < 1e-6 && r.abs() < 1e-6);
        let (l, r) = CrossfadeLaw::ConstantPower.gains(1.0);
        assert!(l.abs() < 1e-6 && (r - 1.0).abs() < 1e-6);
    }

    // ── DeckSide ─────────────────────────────────────────────────────────

    #[test]
    fn deck_side_parses_and_displays() {
        assert_eq!("left".parse::<DeckSide>(), Ok(DeckSide::Left));
        assert_eq!("right".parse::<DeckSide>(), Ok(DeckSide::Right));
        assert!("centre".parse::<DeckSide>().is_err());
        assert_eq!(DeckSide::Left.to_string(), "left");
        assert_eq!(DeckSide::Right.index(), 1);
    }

    #[test]
    fn law_serializes_snake_case() {
        let json = serde_json::to_string(&CrossfadeLaw::ConstantPower).unwrap();
        assert_eq!(json, "\"constant_power\"");
    }
}
