// Expression curves - per-voice controller curves for loudness contour
// Score-phrase and organic strategies share smoothing and reduction

pub mod organic;
pub mod reduce;
pub mod score;
pub mod smooth;

pub use organic::{organic_curve, velocity_to_cc, OrganicConfig};
pub use reduce::{important_points, reduce, RateTier, ReductionThresholds};
pub use score::{score_curve, Anchor, Score, ScoreCurveConfig, ScoreNote, ScorePart};
pub use smooth::smooth;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::model::{Voice, VoiceKey, MIDI_MAX};
use crate::pipeline::{Stage, TraceBuilder, TraceSink};

/// Modulation wheel
pub const DEFAULT_CONTROLLER: u8 = 1;

/// Value of a flat fallback curve
pub const DEFAULT_CURVE_VALUE: u8 = 60;

/// Errors while building one curve
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CurveError {
    #[error("No notes to build a curve from")]
    Empty,

    #[error("Non-finite {what} in curve input")]
    NonFinite { what: &'static str },

    #[error("Curve resolution must be positive, got {0}")]
    InvalidResolution(f64),

    #[error("Curve would need {count} samples, limit is {max}")]
    TooManySamples { count: f64, max: usize },
}

/// Curve settings shared by both strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveConfig {
    /// Sampling step of the score strategy in beats
    pub resolution_beats: f64,

    /// Controller number written for every curve
    pub controller: u8,

    /// Value of flat fallback curves
    pub default_value: u8,

    pub smoothing_passes: usize,

    /// Neighbors on each side checked for important points
    pub importance_window: usize,

    pub score: ScoreCurveConfig,
    pub organic: OrganicConfig,
}

impl Default for CurveConfig {
    fn default() -> Self {
        CurveConfig {
            resolution_beats: 0.1,
            controller: DEFAULT_CONTROLLER,
            default_value: DEFAULT_CURVE_VALUE,
            smoothing_passes: 2,
            importance_window: 5,
            score: ScoreCurveConfig::default(),
            organic: OrganicConfig::default(),
        }
    }
}

/// One controller value at an absolute tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub tick: i64,
    pub value: u8,
}

/// Controller curve of one voice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionCurve {
    pub voice: VoiceKey,
    pub controller: u8,
    pub points: Vec<CurvePoint>,
}

impl ExpressionCurve {
    /// Constant curve from tick 0 to `end_tick`
    pub fn flat(voice: VoiceKey, controller: u8, value: u8, end_tick: i64) -> Self {
        let mut points = vec![CurvePoint { tick: 0, value }];
        if end_tick > 0 {
            points.push(CurvePoint { tick: end_tick, value });
        }
        ExpressionCurve {
            voice,
            controller,
            points,
        }
    }

    /// Round times to ticks, clamp values and order by tick
    fn from_points(voice: VoiceKey, controller: u8, points: &[(f64, u8)], ticks_per_unit: f64) -> Self {
        let mut points: Vec<CurvePoint> = points
            .iter()
            .map(|&(time, value)| CurvePoint {
                tick: ((time * ticks_per_unit).round() as i64).max(0),
                value: value.min(MIDI_MAX),
            })
            .collect();
        points.sort_by_key(|p| p.tick);
        ExpressionCurve {
            voice,
            controller,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn end_tick(&self) -> i64 {
        self.points.last().map_or(0, |p| p.tick)
    }
}

/// Builds expression curves with one configuration
#[derive(Debug, Clone, Default)]
pub struct ExpressionCompiler {
    config: CurveConfig,
}

impl ExpressionCompiler {
    pub fn new(config: CurveConfig) -> Self {
        ExpressionCompiler { config }
    }

    pub fn config(&self) -> &CurveConfig {
        &self.config
    }

    /// One curve per score part from its phrase structure
    pub fn compile_score(&self, score: &Score, ticks_per_beat: u32, sink: &mut dyn TraceSink) -> Vec<ExpressionCurve> {
        let end_tick = (score.total_beats * ticks_per_beat as f64).round() as i64;
        score
            .parts
            .iter()
            .map(|part| match score_curve(part, score, &self.config) {
                Ok(points) => {
                    let curve =
                        ExpressionCurve::from_points(part.voice, self.config.controller, &points, ticks_per_beat as f64);
                    self.report(&curve, "score", sink);
                    curve
                }
                Err(e) => self.fallback(part.voice, end_tick, &e, sink),
            })
            .collect()
    }

    /// One curve per voice from its interpreted notes
    pub fn compile_organic(
        &self,
        voices: &[Voice],
        ticks_per_beat: u32,
        rng: &mut impl Rng,
        sink: &mut dyn TraceSink,
    ) -> Vec<ExpressionCurve> {
        voices
            .iter()
            .map(|voice| match organic_curve(voice, ticks_per_beat, &self.config, rng) {
                Ok(points) => {
                    let curve = ExpressionCurve::from_points(voice.key, self.config.controller, &points, 1.0);
                    self.report(&curve, "organic", sink);
                    curve
                }
                Err(e) => self.fallback(voice.key, voice.end_tick(), &e, sink),
            })
            .collect()
    }

    fn report(&self, curve: &ExpressionCurve, strategy: &str, sink: &mut dyn TraceSink) {
        sink.record(
            TraceBuilder::stage(Stage::Curves)
                .debug(format!(
                    "Built {} curve with {} points for track {} channel {}",
                    strategy,
                    curve.len(),
                    curve.voice.track,
                    curve.voice.channel
                ))
                .with_data(json!({ "end_tick": curve.end_tick() })),
        );
    }

    fn fallback(&self, voice: VoiceKey, end_tick: i64, error: &CurveError, sink: &mut dyn TraceSink) -> ExpressionCurve {
        sink.record(
            TraceBuilder::stage(Stage::Curves)
                .warn(format!("Curve generation failed, using flat curve: {}", error))
                .with_data(json!({
                    "track": voice.track,
                    "channel": voice.channel,
                    "value": self.config.default_value,
                })),
        );
        ExpressionCurve::flat(voice, self.config.controller, self.config.default_value, end_tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{TimeSignature, VoiceAnalyzer};
    use crate::model::Note;
    use crate::pipeline::{MemorySink, TraceLevel};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn melody() -> Voice {
        let notes = [72u8, 74, 76, 79, 77, 76, 74, 72]
            .iter()
            .enumerate()
            .map(|(i, &p)| Note::new(p, 70 + i as u8 * 3, i as i64 * 480, 420, 0, 0))
            .collect();
        let mut voice = Voice::with_notes(VoiceKey::new(0, 0), notes);
        VoiceAnalyzer::default().analyze(&mut voice, 480).unwrap();
        voice
    }

    #[test]
    fn test_flat_curve() {
        let curve = ExpressionCurve::flat(VoiceKey::new(2, 1), 1, 60, 1920);
        assert_eq!(curve.points, vec![CurvePoint { tick: 0, value: 60 }, CurvePoint { tick: 1920, value: 60 }]);
        assert_eq!(ExpressionCurve::flat(VoiceKey::new(0, 0), 1, 60, 0).len(), 1);
    }

    #[test]
    fn test_empty_voice_falls_back_to_flat() {
        let compiler = ExpressionCompiler::default();
        let mut sink = MemorySink::new();
        let empty = Voice::new(VoiceKey::new(3, 0));
        let curves = compiler.compile_organic(&[empty], 480, &mut StdRng::seed_from_u64(1), &mut sink);

        assert_eq!(curves.len(), 1);
        assert_eq!(curves[0].points, vec![CurvePoint { tick: 0, value: 60 }]);
        assert_eq!(sink.at_least(TraceLevel::Warn).count(), 1);
    }

    #[test]
    fn test_organic_curves_are_ordered_and_bounded() {
        let compiler = ExpressionCompiler::default();
        let curves = compiler.compile_organic(&[melody()], 480, &mut StdRng::seed_from_u64(4), &mut MemorySink::new());
        let curve = &curves[0];

        assert_eq!(curve.controller, 1);
        assert!(curve.len() > 8);
        assert!(curve.points.windows(2).all(|w| w[0].tick <= w[1].tick));
        assert!(curve.points.iter().all(|p| (30..=115).contains(&p.value)));
    }

    #[test]
    fn test_score_curve_in_ticks() {
        let voice = melody();
        let score = Score::from_voices(&[voice], 480, TimeSignature::FourFour);
        let compiler = ExpressionCompiler::default();
        let curves = compiler.compile_score(&score, 480, &mut MemorySink::new());

        let curve = &curves[0];
        assert_eq!(curve.points.first().map(|p| p.tick), Some(0));
        assert_eq!(curve.end_tick(), (score.total_beats * 480.0).round() as i64);
        assert!(curve.points.windows(2).all(|w| w[0].tick <= w[1].tick));
    }

    #[test]
    fn test_score_without_notes_is_flat() {
        let score = Score {
            parts: vec![ScorePart {
                voice: VoiceKey::new(0, 0),
                notes: Vec::new(),
            }],
            time_signature: TimeSignature::FourFour,
            total_beats: 8.0,
        };
        let curves = ExpressionCompiler::default().compile_score(&score, 480, &mut MemorySink::new());
        assert_eq!(curves[0].points, vec![CurvePoint { tick: 0, value: 60 }, CurvePoint { tick: 3840, value: 60 }]);
    }
}
