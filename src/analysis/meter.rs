// Meter - time signature and metric position helpers
// Converts tick positions into measures, beats and downbeat flags

use serde::{Deserialize, Serialize};

/// Musical time signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSignature {
    /// 4/4 time (4 beats per measure, strong beats 1 and 3)
    #[default]
    FourFour,

    /// 3/4 time (3 beats per measure, strong beat 1)
    ThreeFour,
}

impl TimeSignature {
    /// Number of beats per measure
    pub fn beats_per_measure(&self) -> u32 {
        match self {
            TimeSignature::FourFour => 4,
            TimeSignature::ThreeFour => 3,
        }
    }

    /// Zero-based beats that count as downbeats
    pub fn strong_beats(&self) -> &'static [f64] {
        match self {
            TimeSignature::FourFour => &[0.0, 2.0],
            TimeSignature::ThreeFour => &[0.0],
        }
    }
}

/// Position of a tick in musical time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPosition {
    /// Measure number (0-indexed)
    pub measure: u32,

    /// Beat within the measure, fractional, 0-indexed
    pub beat_in_measure: f64,

    /// Fraction of the measure elapsed [0.0, 1.0)
    pub fraction: f64,
}

/// Metric grid over a tick resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Meter {
    pub time_signature: TimeSignature,
    pub ticks_per_beat: u32,
}

impl Meter {
    pub fn new(time_signature: TimeSignature, ticks_per_beat: u32) -> Self {
        Meter {
            time_signature,
            ticks_per_beat,
        }
    }

    /// Common-time meter used by the interpreter
    pub fn common(ticks_per_beat: u32) -> Self {
        Meter::new(TimeSignature::FourFour, ticks_per_beat)
    }

    /// Length of one measure in ticks
    pub fn measure_ticks(&self) -> i64 {
        (self.ticks_per_beat.max(1) * self.time_signature.beats_per_measure()) as i64
    }

    /// Measure index containing `tick`
    pub fn measure_of(&self, tick: i64) -> u32 {
        (tick.max(0) / self.measure_ticks()) as u32
    }

    /// Full metric position of `tick`
    pub fn position(&self, tick: i64) -> MetricPosition {
        let measure_ticks = self.measure_ticks();
        let tick = tick.max(0);
        let offset = tick % measure_ticks;

        MetricPosition {
            measure: (tick / measure_ticks) as u32,
            beat_in_measure: offset as f64 / self.ticks_per_beat.max(1) as f64,
            fraction: offset as f64 / measure_ticks as f64,
        }
    }

    /// True if `tick` lies within `tolerance` beats of a strong beat
    pub fn is_downbeat(&self, tick: i64, tolerance: f64) -> bool {
        let beat = self.position(tick).beat_in_measure;
        self.time_signature
            .strong_beats()
            .iter()
            .any(|strong| (beat - strong).abs() < tolerance)
    }
}
