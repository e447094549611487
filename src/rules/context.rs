// Interpretation context - per-note parameter bundle for rule application
// Derives the biased acceleration/delay window from rubato and the conductor's bias

use serde::{Deserialize, Serialize};

/// The four expressive strengths, each in [0.0, 1.0]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionStrengths {
    /// Overall expressiveness, drives the conductor's structural emphasis
    pub expressiveness: f64,

    /// Timing flexibility
    pub rubato: f64,

    /// Length shaping (shortening / lengthening)
    pub articulation: f64,

    /// Velocity shaping
    pub dynamics: f64,
}

impl Default for ExpressionStrengths {
    fn default() -> Self {
        ExpressionStrengths {
            expressiveness: 0.5,
            rubato: 0.6,
            articulation: 0.7,
            dynamics: 0.7,
        }
    }
}

impl ExpressionStrengths {
    /// Names and values, for range validation
    pub fn named(&self) -> [(&'static str, f64); 4] {
        [
            ("expressiveness", self.expressiveness),
            ("rubato", self.rubato),
            ("articulation", self.articulation),
            ("dynamics", self.dynamics),
        ]
    }
}

/// Default timing window: a tenth of a beat at full rubato
pub const DEFAULT_TIMING_RANGE_BEATS: f64 = 0.1;

/// Parameters a rule sees when applied to one note
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpretationContext {
    pub ticks_per_beat: u32,

    pub strengths: ExpressionStrengths,

    /// Conductor bias for the note's measure [-1.0, 1.0]
    /// Positive leans toward delay, negative toward acceleration
    pub timing_direction_bias: f64,

    /// Largest unbiased timing change in ticks
    pub max_timing_change: i64,

    /// Largest acceleration in ticks (zero or negative)
    pub max_acceleration: i64,

    /// Largest delay in ticks (zero or positive)
    pub max_delay: i64,
}

impl InterpretationContext {
    pub fn new(ticks_per_beat: u32, strengths: ExpressionStrengths, timing_direction_bias: f64) -> Self {
        Self::with_timing_range(ticks_per_beat, strengths, timing_direction_bias, DEFAULT_TIMING_RANGE_BEATS)
    }

    /// Build a context with a custom timing window (in beats at full rubato)
    pub fn with_timing_range(
        ticks_per_beat: u32,
        strengths: ExpressionStrengths,
        timing_direction_bias: f64,
        timing_range_beats: f64,
    ) -> Self {
        let bias = if timing_direction_bias.is_finite() {
            timing_direction_bias.clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let base = (ticks_per_beat as f64 * timing_range_beats * strengths.rubato.clamp(0.0, 1.0)).round();
        let mut max_acceleration = -base;
        let mut max_delay = base;

        if bias > 0.0 {
            max_acceleration *= 1.0 - bias;
        } else if bias < 0.0 {
            max_delay *= 1.0 + bias;
        }

        InterpretationContext {
            ticks_per_beat,
            strengths,
            timing_direction_bias: bias,
            max_timing_change: base as i64,
            max_acceleration: max_acceleration.round() as i64,
            max_delay: max_delay.round() as i64,
        }
    }

    /// Convert a signed timing factor into ticks
    ///
    /// Negative factors scale the acceleration window, positive factors
    /// the delay window; both are already reshaped by the bias.
    pub fn timing_adjustment(&self, factor: f64) -> i64 {
        if !factor.is_finite() {
            return 0;
        }
        if factor < 0.0 {
            (self.max_acceleration as f64 * -factor).round() as i64
        } else {
            (self.max_delay as f64 * factor).round() as i64
        }
    }

    pub fn tpb(&self) -> f64 {
        self.ticks_per_beat as f64
    }

    pub fn articulation(&self) -> f64 {
        self.strengths.articulation
    }

    pub fn dynamics(&self) -> f64 {
        self.strengths.dynamics
    }

    pub fn rubato(&self) -> f64 {
        self.strengths.rubato
    }
}
