// Score-phrase curves - dynamic anchors from phrase apexes of a symbolic score
// Anchors are pruned, interpolated at a fixed beat resolution, smoothed and reduced

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;

use super::reduce::{reduce, ReductionThresholds};
use super::smooth::smooth;
use super::{CurveConfig, CurveError};
use crate::analysis::TimeSignature;
use crate::model::{Voice, VoiceKey};

/// One note of a score part, timed in beats
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreNote {
    pub pitch: u8,

    /// Start from the top of the piece in beats
    pub offset: f64,
    pub duration: f64,

    /// Beat within the measure, 1-based and fractional
    pub beat: f64,
}

impl ScoreNote {
    pub fn end(&self) -> f64 {
        self.offset + self.duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorePart {
    pub voice: VoiceKey,
    pub notes: Vec<ScoreNote>,
}

/// Symbolic score the phrase strategy reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub parts: Vec<ScorePart>,
    pub time_signature: TimeSignature,

    /// Length of the piece in beats
    pub total_beats: f64,
}

impl Score {
    /// Score view of voices at their original timing
    pub fn from_voices(voices: &[Voice], ticks_per_beat: u32, time_signature: TimeSignature) -> Self {
        let tpb = ticks_per_beat.max(1) as f64;
        let beats_per_measure = time_signature.beats_per_measure() as f64;

        let parts = voices
            .iter()
            .map(|voice| ScorePart {
                voice: voice.key,
                notes: voice
                    .notes
                    .iter()
                    .map(|note| {
                        let offset = note.original_start() as f64 / tpb;
                        ScoreNote {
                            pitch: note.pitch,
                            offset,
                            duration: note.original_duration() as f64 / tpb,
                            beat: offset.rem_euclid(beats_per_measure) + 1.0,
                        }
                    })
                    .collect(),
            })
            .collect();

        let total_beats = voices.iter().map(Voice::end_tick).max().unwrap_or(0) as f64 / tpb;
        Score {
            parts,
            time_signature,
            total_beats,
        }
    }

    /// Metric weight of a beat; off-beat positions get the default weight
    pub fn beat_weight(&self, beat: f64) -> f64 {
        if (beat - beat.round()).abs() > 1e-6 {
            return DEFAULT_BEAT_WEIGHT;
        }
        let weights: &[f64] = match self.time_signature {
            TimeSignature::FourFour => &[1.2, 0.6, 0.9, 0.7],
            TimeSignature::ThreeFour => &[1.2, 0.7, 0.6],
        };
        let index = beat.round() as i64 - 1;
        usize::try_from(index)
            .ok()
            .and_then(|i| weights.get(i))
            .copied()
            .unwrap_or(DEFAULT_BEAT_WEIGHT)
    }
}

/// Weight of beats missing from the metric table
pub const DEFAULT_BEAT_WEIGHT: f64 = 0.8;

/// Upper bound on sampled points per score curve
pub const MAX_CURVE_SAMPLES: usize = 1_000_000;

/// A curve value at a time in beats
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub beat: f64,
    pub value: f64,
}

impl Anchor {
    pub fn new(beat: f64, value: f64) -> Self {
        Anchor { beat, value }
    }
}

/// Phrase detection and anchor shaping of the score strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreCurveConfig {
    /// A previous note at least this long (beats) closes the phrase
    pub phrase_long_note_beats: f64,

    /// A rest longer than this (beats) closes the phrase
    pub phrase_gap_beats: f64,

    /// A leap wider than this closes the phrase
    pub phrase_leap_semitones: u8,

    /// A phrase this long closes on the next downbeat
    pub phrase_downbeat_notes: usize,

    pub apex_base: f64,
    pub apex_span: f64,
    pub center_boost: f64,
    pub apex_min: f64,
    pub apex_max: f64,

    pub start_floor: f64,
    pub start_drop: f64,
    pub end_floor: f64,
    pub end_drop: f64,

    /// Anchors at the top and the end of the piece
    pub open_value: f64,
    pub close_value: f64,

    /// Closing anchor added when the last one ends early
    pub tail_floor: f64,
    pub tail_drop: f64,

    /// Anchors closer than this (beats) are merged
    pub prune_beats: f64,

    /// A close anchor replaces the previous one above this difference
    pub prune_replace_diff: f64,

    /// Anchor gaps above this (beats) get one midpoint
    pub midpoint_gap_beats: f64,

    /// Value spans below this are stretched to expand_low..expand_high
    pub expand_min_span: f64,
    pub expand_low: f64,
    pub expand_high: f64,

    /// Gaps above this (beats) with a change above transition_min_diff get soft transitions
    pub transition_gap_beats: f64,
    pub transition_min_diff: f64,

    /// Neighbors on each side checked for accented anchors
    pub accent_window: usize,
}

impl Default for ScoreCurveConfig {
    fn default() -> Self {
        ScoreCurveConfig {
            phrase_long_note_beats: 2.5,
            phrase_gap_beats: 1.5,
            phrase_leap_semitones: 9,
            phrase_downbeat_notes: 6,
            apex_base: 60.0,
            apex_span: 45.0,
            center_boost: 10.0,
            apex_min: 45.0,
            apex_max: 110.0,
            start_floor: 55.0,
            start_drop: 20.0,
            end_floor: 45.0,
            end_drop: 25.0,
            open_value: 70.0,
            close_value: 65.0,
            tail_floor: 40.0,
            tail_drop: 10.0,
            prune_beats: 1.0,
            prune_replace_diff: 10.0,
            midpoint_gap_beats: 8.0,
            expand_min_span: 50.0,
            expand_low: 30.0,
            expand_high: 115.0,
            transition_gap_beats: 2.0,
            transition_min_diff: 10.0,
            accent_window: 10,
        }
    }
}

/// Split notes into phrases
pub fn detect_phrases(notes: &[ScoreNote], config: &ScoreCurveConfig) -> Vec<Range<usize>> {
    let mut phrases = Vec::new();
    if notes.is_empty() {
        return phrases;
    }

    let mut start = 0;
    for i in 1..notes.len() {
        let prev = &notes[i - 1];
        let note = &notes[i];

        let long_note = prev.duration >= config.phrase_long_note_beats;
        let rest = note.offset - prev.end() > config.phrase_gap_beats;
        let leap = note.pitch.abs_diff(prev.pitch) > config.phrase_leap_semitones;
        let downbeat = (note.beat - 1.0).abs() < 1e-6 && i - start >= config.phrase_downbeat_notes;

        if long_note || rest || leap || downbeat {
            phrases.push(start..i);
            start = i;
        }
    }
    phrases.push(start..notes.len());
    phrases
}

/// Apex, start and end anchors of every phrase plus the piece boundaries
pub fn phrase_anchors(notes: &[ScoreNote], score: &Score, config: &ScoreCurveConfig) -> Vec<Anchor> {
    let mut anchors = vec![
        Anchor::new(0.0, config.open_value),
        Anchor::new(score.total_beats, config.close_value),
    ];
    let (Some(min_pitch), Some(max_pitch)) = (
        notes.iter().map(|n| n.pitch).min(),
        notes.iter().map(|n| n.pitch).max(),
    ) else {
        return anchors;
    };
    let range = (max_pitch - min_pitch) as f64;

    let phrases = detect_phrases(notes, config);
    let center = phrases.len() / 2;

    for (i, phrase) in phrases.iter().enumerate() {
        let members = &notes[phrase.clone()];
        let (Some(first), Some(last)) = (members.first(), members.last()) else {
            continue;
        };
        let apex = members
            .iter()
            .fold(first, |best, n| if n.pitch > best.pitch { n } else { best });

        let pitch_factor = if range > 0.0 {
            (apex.pitch - min_pitch) as f64 / range
        } else {
            0.5
        };
        let mut value = config.apex_base + (pitch_factor * config.apex_span).round();
        value = (value * score.beat_weight(apex.beat)).trunc();
        if i == center {
            value += config.center_boost;
        }
        let value = value.clamp(config.apex_min, config.apex_max);

        anchors.push(Anchor::new(apex.offset, value));
        anchors.push(Anchor::new(first.offset, config.start_floor.max(value - config.start_drop)));
        anchors.push(Anchor::new(last.end(), config.end_floor.max(value - config.end_drop)));
    }

    anchors.sort_by(|a, b| a.beat.total_cmp(&b.beat));
    anchors
}

/// Merge anchors closer than the prune distance
///
/// A close anchor replaces the previous one when their values differ by
/// more than the replace threshold; otherwise it is dropped.
pub fn prune_anchors(anchors: &[Anchor], config: &ScoreCurveConfig) -> Vec<Anchor> {
    let mut kept: Vec<Anchor> = Vec::new();
    let mut last_beat = f64::NEG_INFINITY;

    for anchor in anchors {
        if anchor.beat - last_beat >= config.prune_beats {
            kept.push(*anchor);
            last_beat = anchor.beat;
        } else if let Some(last) = kept.last_mut() {
            if (last.value - anchor.value).abs() > config.prune_replace_diff {
                *last = *anchor;
                last_beat = anchor.beat;
            }
        }
    }

    kept
}

/// Add exactly one midpoint inside every gap wider than `max_gap` beats
pub fn insert_midpoints(anchors: &[Anchor], max_gap: f64) -> Vec<Anchor> {
    let mut out = anchors.to_vec();
    for pair in anchors.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let gap = next.beat - prev.beat;
        if gap > max_gap {
            out.push(Anchor::new(
                prev.beat + gap / 2.0,
                (prev.value + (next.value - prev.value) / 2.0).trunc(),
            ));
        }
    }
    out.sort_by(|a, b| a.beat.total_cmp(&b.beat));
    out
}

/// Close the curve at the piece end and stretch a narrow value range
fn prepare_anchors(mut anchors: Vec<Anchor>, total: f64, config: &ScoreCurveConfig) -> Vec<Anchor> {
    if let Some(last) = anchors.last().copied() {
        if last.beat < total {
            anchors.push(Anchor::new(total, config.tail_floor.max(last.value - config.tail_drop)));
        }
    }
    anchors.retain(|a| a.beat <= total);
    if anchors.len() == 1 {
        let only = anchors[0];
        anchors.push(Anchor::new(total, only.value));
    }

    let min = anchors.iter().map(|a| a.value).fold(f64::INFINITY, f64::min);
    let max = anchors.iter().map(|a| a.value).fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    if anchors.len() > 1 && span < config.expand_min_span {
        let width = config.expand_high - config.expand_low;
        for anchor in anchors.iter_mut() {
            anchor.value = config.expand_low + (anchor.value - min) / span.max(1.0) * width;
        }
    }

    anchors
}

/// Soft transition points inside wide, steep anchor gaps
fn add_transitions(anchors: &[Anchor], config: &ScoreCurveConfig) -> Vec<Anchor> {
    if anchors.len() < 3 {
        return anchors.to_vec();
    }

    let mut out = Vec::with_capacity(anchors.len() * 2);
    for pair in anchors.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        out.push(prev);
        let gap = next.beat - prev.beat;
        let diff = next.value - prev.value;
        if gap > config.transition_gap_beats && diff.abs() > config.transition_min_diff {
            out.push(Anchor::new(prev.beat + gap * 0.3, prev.value + diff * 0.15));
            out.push(Anchor::new(prev.beat + gap * 0.7, prev.value + diff * 0.85));
        }
    }
    out.extend(anchors.last().copied());
    out
}

/// Sample times from 0 to `total` inclusive
fn sample_times(total: f64, resolution: f64) -> Vec<f64> {
    let count = (total / resolution + 1e-9).floor() as usize + 1;
    let mut times: Vec<f64> = (0..count).map(|i| i as f64 * resolution).collect();
    match times.last_mut() {
        Some(last) if (*last - total).abs() <= 1e-9 => *last = total,
        _ => times.push(total),
    }
    times
}

/// Piecewise-linear value at `t`, held constant beyond the ends
fn interpolate(anchors: &[Anchor], t: f64) -> f64 {
    let (Some(first), Some(last)) = (anchors.first(), anchors.last()) else {
        return 0.0;
    };
    if t <= first.beat {
        return first.value;
    }
    if t >= last.beat {
        return last.value;
    }
    for pair in anchors.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if t <= b.beat {
            if b.beat - a.beat <= f64::EPSILON {
                return b.value;
            }
            return a.value + (b.value - a.value) * (t - a.beat) / (b.beat - a.beat);
        }
    }
    last.value
}

/// Emphasize sampled values around an anchor extremum
fn accent(values: &mut [f64], index: usize, is_max: bool, config: &ScoreCurveConfig) {
    let high = config.expand_high;
    let low = config.expand_low;
    let (ramp, center, before, after): (usize, f64, f64, f64) = if is_max {
        (5, 1.15, 0.15, 0.05)
    } else {
        (4, 0.85, -0.05, -0.03)
    };

    let bound = |v: f64| if is_max { v.min(high) } else { v.max(low) };
    values[index] = bound(values[index] * center);
    for j in 1..=ramp {
        let weight = (ramp - j) as f64 / ramp as f64;
        if let Some(i) = index.checked_sub(j) {
            values[i] = bound(values[i] * (1.0 + before * weight));
        }
        if let Some(v) = values.get_mut(index + j) {
            *v = bound(*v * (1.0 + after * weight));
        }
    }
}

/// Accent strict anchor extrema and return their sample indices
fn accent_extrema(anchors: &[Anchor], times: &[f64], values: &mut [f64], config: &ScoreCurveConfig) -> BTreeSet<usize> {
    let mut important = BTreeSet::new();
    let window = config.accent_window;
    if window == 0 || anchors.len() <= 2 * window {
        return important;
    }

    for i in window..anchors.len() - window {
        let current = anchors[i].value;
        let neighbors = anchors[i - window..=i + window]
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != window)
            .map(|(_, a)| a.value);
        let (mut is_max, mut is_min) = (true, true);
        for v in neighbors {
            is_max &= v < current;
            is_min &= v > current;
        }
        if !(is_max || is_min) {
            continue;
        }

        let nearest = times
            .iter()
            .enumerate()
            .min_by(|a, b| (a.1 - anchors[i].beat).abs().total_cmp(&(b.1 - anchors[i].beat).abs()))
            .map(|(index, _)| index);
        if let Some(index) = nearest {
            important.insert(index);
            accent(values, index, is_max, config);
        }
    }

    important
}

/// Reduced (beat, value) curve of one part
pub fn score_curve(part: &ScorePart, score: &Score, config: &CurveConfig) -> Result<Vec<(f64, u8)>, CurveError> {
    let resolution = config.resolution_beats;
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(CurveError::InvalidResolution(resolution));
    }
    if !score.total_beats.is_finite() {
        return Err(CurveError::NonFinite { what: "score length" });
    }
    if part.notes.is_empty() {
        return Err(CurveError::Empty);
    }
    if part
        .notes
        .iter()
        .any(|n| !(n.offset.is_finite() && n.duration.is_finite() && n.beat.is_finite()))
    {
        return Err(CurveError::NonFinite { what: "note timing" });
    }

    let shaping = &config.score;
    let mut notes = part.notes.clone();
    notes.sort_by(|a, b| a.offset.total_cmp(&b.offset));

    let anchors = phrase_anchors(&notes, score, shaping);
    let anchors = prune_anchors(&anchors, shaping);
    let anchors = insert_midpoints(&anchors, shaping.midpoint_gap_beats);

    let total = score.total_beats.max(0.0);
    let count = total / resolution;
    if count > MAX_CURVE_SAMPLES as f64 {
        return Err(CurveError::TooManySamples {
            count,
            max: MAX_CURVE_SAMPLES,
        });
    }
    let anchors = prepare_anchors(anchors, total, shaping);
    let anchors = add_transitions(&anchors, shaping);

    let times = sample_times(total, resolution);
    let mut values: Vec<f64> = times.iter().map(|&t| interpolate(&anchors, t)).collect();
    let important = accent_extrema(&anchors, &times, &mut values, shaping);
    let values = smooth(&values, &important, config.smoothing_passes);

    let points: Vec<(f64, u8)> = times
        .iter()
        .zip(values)
        .map(|(&t, v)| (t, v.clamp(0.0, 127.0) as u8))
        .collect();

    Ok(reduce(&points, &ReductionThresholds::beats(), config.importance_window))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, offset: f64, duration: f64) -> ScoreNote {
        ScoreNote {
            pitch,
            offset,
            duration,
            beat: offset.rem_euclid(4.0) + 1.0,
        }
    }

    fn score_of(notes: Vec<ScoreNote>) -> Score {
        let total_beats = notes.iter().map(ScoreNote::end).fold(0.0, f64::max);
        Score {
            parts: vec![ScorePart {
                voice: VoiceKey::new(0, 0),
                notes,
            }],
            time_signature: TimeSignature::FourFour,
            total_beats,
        }
    }

    #[test]
    fn test_one_midpoint_per_wide_gap() {
        let anchors = [Anchor::new(0.0, 40.0), Anchor::new(40.0, 100.0)];
        let out = insert_midpoints(&anchors, 8.0);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1], Anchor::new(20.0, 70.0));

        let near = [Anchor::new(0.0, 40.0), Anchor::new(8.0, 100.0)];
        assert_eq!(insert_midpoints(&near, 8.0).len(), 2);
    }

    #[test]
    fn test_phrase_boundaries() {
        let config = ScoreCurveConfig::default();
        // rest of 2 beats after the second note
        let rest = [note(60, 0.0, 1.0), note(62, 1.0, 1.0), note(64, 4.0, 1.0)];
        assert_eq!(detect_phrases(&rest, &config), vec![0..2, 2..3]);

        // rest of exactly 1.5 beats does not split
        let edge = [note(60, 0.0, 1.0), note(62, 2.5, 1.0)];
        assert_eq!(detect_phrases(&edge, &config), vec![0..2]);

        // long previous note
        let long = [note(60, 0.0, 3.0), note(62, 3.0, 1.0)];
        assert_eq!(detect_phrases(&long, &config), vec![0..1, 1..2]);

        // leap of a minor seventh
        let leap = [note(60, 0.0, 1.0), note(70, 1.0, 1.0)];
        assert_eq!(detect_phrases(&leap, &config), vec![0..1, 1..2]);

        // the downbeat at index 4 closes nothing, the one at index 8 does
        let run: Vec<ScoreNote> = (0..12).map(|i| note(60 + (i % 3) as u8, i as f64, 1.0)).collect();
        assert_eq!(detect_phrases(&run, &config), vec![0..8, 8..12]);
    }

    #[test]
    fn test_downbeat_with_eighth_notes() {
        let config = ScoreCurveConfig::default();
        let run: Vec<ScoreNote> = (0..10).map(|i| note(60 + (i % 2) as u8, i as f64 * 0.5, 0.5)).collect();
        assert_eq!(detect_phrases(&run, &config), vec![0..8, 8..10]);
    }

    #[test]
    fn test_apex_anchors() {
        let notes = vec![note(60, 0.0, 1.0), note(62, 1.0, 1.0), note(67, 2.0, 1.0), note(64, 3.0, 1.0)];
        let score = score_of(notes.clone());
        let config = ScoreCurveConfig::default();

        // apex 67 on beat 3: (60 + 45) x 0.9 = 94, +10 as the center phrase
        let anchors = phrase_anchors(&notes, &score, &config);
        assert!(anchors.contains(&Anchor::new(2.0, 104.0)));
        assert!(anchors.contains(&Anchor::new(0.0, 84.0)));
        assert!(anchors.contains(&Anchor::new(4.0, 79.0)));

        let pruned = prune_anchors(&anchors, &config);
        assert_eq!(
            pruned,
            vec![Anchor::new(0.0, 84.0), Anchor::new(2.0, 104.0), Anchor::new(4.0, 79.0)]
        );
    }

    #[test]
    fn test_beat_weights() {
        let four = score_of(Vec::new());
        assert_eq!(four.beat_weight(1.0), 1.2);
        assert_eq!(four.beat_weight(4.0), 0.7);
        assert_eq!(four.beat_weight(2.5), DEFAULT_BEAT_WEIGHT);

        let three = Score {
            time_signature: TimeSignature::ThreeFour,
            ..score_of(Vec::new())
        };
        assert_eq!(three.beat_weight(2.0), 0.7);
        assert_eq!(three.beat_weight(4.0), DEFAULT_BEAT_WEIGHT);
    }

    #[test]
    fn test_narrow_range_is_stretched() {
        let config = ScoreCurveConfig::default();
        let anchors = vec![Anchor::new(0.0, 84.0), Anchor::new(2.0, 104.0), Anchor::new(4.0, 79.0)];
        let prepared = prepare_anchors(anchors, 4.0, &config);
        assert_eq!(prepared.len(), 3);
        assert!((prepared[0].value - 47.0).abs() < 1e-9);
        assert!((prepared[1].value - 115.0).abs() < 1e-9);
        assert!((prepared[2].value - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_curve_spans_piece() {
        let notes: Vec<ScoreNote> = (0..16).map(|i| note([60, 64, 67, 72][i % 4], i as f64, 1.0)).collect();
        let score = score_of(notes);
        let points = score_curve(&score.parts[0], &score, &CurveConfig::default()).unwrap();

        assert_eq!(points.first().map(|p| p.0), Some(0.0));
        assert_eq!(points.last().map(|p| p.0), Some(16.0));
        assert!(points.len() < 161);
        assert!(points.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_invalid_inputs() {
        let score = score_of(vec![note(60, 0.0, 1.0)]);
        let config = CurveConfig {
            resolution_beats: 0.0,
            ..CurveConfig::default()
        };
        assert_eq!(
            score_curve(&score.parts[0], &score, &config),
            Err(CurveError::InvalidResolution(0.0))
        );

        let broken = score_of(vec![note(60, f64::NAN, 1.0)]);
        assert!(score_curve(&broken.parts[0], &broken, &CurveConfig::default()).is_err());
    }

    #[test]
    fn test_sample_count_is_bounded() {
        let mut score = score_of(vec![note(60, 0.0, 1.0)]);
        score.total_beats = 1.0e9;
        let config = CurveConfig {
            resolution_beats: 1.0e-3,
            ..CurveConfig::default()
        };
        assert!(matches!(
            score_curve(&score.parts[0], &score, &config),
            Err(CurveError::TooManySamples { max: MAX_CURVE_SAMPLES, .. })
        ));

        // an ordinary length at the same resolution still samples
        score.total_beats = 16.0;
        assert!(score_curve(&score.parts[0], &score, &config).is_ok());
    }
}
