// Organic curves - controller points shaped from interpreted notes
// Velocity sets the level; role, contour and length add secondary shaping

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::reduce::{reduce, ReductionThresholds};
use super::{CurveConfig, CurveError};
use crate::model::{Note, Voice, VoiceRole, MIDI_MAX};

/// Time fraction and value factor pairs of one shaping pattern
type Pattern = &'static [(f64, f64)];

const LOCAL_PEAK: Pattern = &[(0.15, 1.03), (0.3, 1.08), (0.45, 1.04)];
const PHRASE_START: Pattern = &[(0.2, 1.02), (0.3, 1.04), (0.4, 1.05)];
const PHRASE_END: Pattern = &[(0.3, 0.98), (0.5, 0.93), (0.7, 0.88)];
const BASS_PATTERN: Pattern = &[(0.25, 0.97), (0.5, 0.95), (0.75, 0.93)];
const DECAY_TAIL: Pattern = &[(0.85, 0.96), (0.93, 0.93), (1.0, 0.90)];

/// Crescendo-diminuendo, vibrato and diminuendo
const LONG_NOTE_PATTERNS: [Pattern; 3] = [
    &[(0.2, 0.98), (0.4, 1.03), (0.6, 1.03), (0.8, 0.96)],
    &[(0.2, 1.02), (0.35, 0.99), (0.5, 1.03), (0.65, 0.98), (0.8, 1.01)],
    &[(0.25, 0.99), (0.5, 0.97), (0.75, 0.95)],
];

/// Upper velocity of the very-low, low and mid bands
const VERY_LOW_BAND: u8 = 20;
const LOW_BAND: u8 = 40;
const MID_BAND: u8 = 80;
const LOW_SLOPE: f64 = 1.5;
const MID_RANGE: f64 = 40.0;
const HIGH_RANGE: f64 = 35.0;

/// Truncate toward zero, tolerating float error just below an integer
fn cut(value: f64) -> f64 {
    (value + 1e-9).trunc()
}

/// Level and shaping thresholds of the organic strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganicConfig {
    pub min_value: u8,
    pub max_value: u8,

    pub melody_factor: f64,
    pub bass_factor: f64,
    pub inner_factor: f64,
    pub unknown_factor: f64,

    /// Silence (ticks) between notes that gets transition points
    pub gap_min_ticks: i64,

    /// Level change that gets transition points
    pub gap_min_diff: u8,

    /// Notes above this length (ticks) get a random long-note pattern
    pub long_note_min_ticks: i64,

    /// Notes above this length (ticks) get a decay tail instead of one end point
    pub decay_min_ticks: i64,

    /// Level at the end of a short note, relative to its onset
    pub end_factor: f64,

    /// Phrase positions below and above which a melody note opens or closes its phrase
    pub phrase_start_below: f64,
    pub phrase_end_above: f64,
}

impl Default for OrganicConfig {
    fn default() -> Self {
        OrganicConfig {
            min_value: 30,
            max_value: 115,
            melody_factor: 1.15,
            bass_factor: 1.05,
            inner_factor: 1.0,
            unknown_factor: 1.0,
            gap_min_ticks: 15,
            gap_min_diff: 5,
            long_note_min_ticks: 20,
            decay_min_ticks: 15,
            end_factor: 0.90,
            phrase_start_below: 0.1,
            phrase_end_above: 0.9,
        }
    }
}

impl OrganicConfig {
    pub fn role_factor(&self, role: VoiceRole) -> f64 {
        match role {
            VoiceRole::Melody => self.melody_factor,
            VoiceRole::Bass => self.bass_factor,
            VoiceRole::Inner => self.inner_factor,
            VoiceRole::Unknown => self.unknown_factor,
        }
    }

    fn floor(&self, value: f64) -> u8 {
        cut(value).max(self.min_value as f64).min(MIDI_MAX as f64) as u8
    }

    fn ceil(&self, value: f64) -> u8 {
        cut(value).clamp(0.0, self.max_value as f64) as u8
    }

    fn bound(&self, value: f64) -> u8 {
        cut(value).clamp(self.min_value as f64, self.max_value as f64) as u8
    }
}

/// Map a velocity onto the controller range through four bands
pub fn velocity_to_cc(velocity: u8, role_factor: f64, config: &OrganicConfig) -> u8 {
    let min = config.min_value as f64;
    let v = velocity as f64;

    let value = if velocity <= VERY_LOW_BAND {
        min * role_factor
    } else if velocity <= LOW_BAND {
        (min + (v - VERY_LOW_BAND as f64) * LOW_SLOPE) * role_factor
    } else if velocity <= MID_BAND {
        let normalized = (v - LOW_BAND as f64) / (MID_BAND - LOW_BAND) as f64;
        (LOW_BAND as f64 + normalized * MID_RANGE) * role_factor
    } else {
        let normalized = (v - MID_BAND as f64) / (MIDI_MAX - MID_BAND) as f64;
        (MID_BAND as f64 + normalized * HIGH_RANGE) * role_factor
    };

    config.bound(value)
}

/// Points of `pattern` across a note, each value shaped by `shape`
fn pattern_points(points: &mut Vec<(f64, u8)>, onset: i64, duration: i64, pattern: Pattern, mut shape: impl FnMut(f64) -> u8) {
    for &(time, factor) in pattern {
        let tick = onset + cut(duration as f64 * time) as i64;
        points.push((tick as f64, shape(factor)));
    }
}

fn is_local_peak(voice: &Voice, index: usize, note: &Note) -> bool {
    match (voice.prev_of(index), voice.next_of(index)) {
        (Some(prev), Some(next)) => note.pitch > prev.pitch && note.pitch > next.pitch,
        _ => false,
    }
}

/// Raw, sorted (tick, value) points of one voice before reduction
pub fn shape_points(voice: &Voice, ticks_per_beat: u32, config: &OrganicConfig, rng: &mut impl Rng) -> Vec<(f64, u8)> {
    let role_factor = config.role_factor(voice.role);
    let half_beat = ticks_per_beat as f64 / 2.0;
    let mut points: Vec<(f64, u8)> = Vec::new();
    let mut previous: Option<(i64, u8)> = None;

    for (index, note) in voice.notes.iter().enumerate() {
        let onset = note.adjusted_start;
        let duration = note.adjusted_duration;
        let release = onset + duration;
        let cc = velocity_to_cc(note.adjusted_velocity, role_factor, config);
        let level = cc as f64;

        points.push((onset as f64, cc));

        if let Some((prev_release, prev_cc)) = previous {
            let gap = (onset - prev_release) as f64;
            if gap > config.gap_min_ticks as f64 && cc.abs_diff(prev_cc) > config.gap_min_diff {
                let from = prev_cc as f64;
                let change = level - from;
                let (early, late) = if change > 0.0 { (0.15, 0.75) } else { (0.25, 0.85) };
                let start = prev_release as f64;
                points.push(((start + gap * 0.3).round(), cut(from + change * early) as u8));
                points.push(((start + gap * 0.7).round(), cut(from + change * late) as u8));
            }
        }

        if note.is_melody {
            if is_local_peak(voice, index, note) {
                pattern_points(&mut points, onset, duration, LOCAL_PEAK, |f| config.ceil(level * f));
            }
            match note.phrase_position {
                Some(position) if position < config.phrase_start_below => {
                    pattern_points(&mut points, onset, duration, PHRASE_START, |f| config.ceil(level * f));
                }
                Some(position) if position > config.phrase_end_above => {
                    pattern_points(&mut points, onset, duration, PHRASE_END, |f| config.floor(level * f));
                }
                _ => {}
            }
        }

        if note.is_bass {
            pattern_points(&mut points, onset, duration, BASS_PATTERN, |f| config.floor(level * f));
        } else if duration as f64 > half_beat && duration > config.long_note_min_ticks {
            let pattern = LONG_NOTE_PATTERNS[rng.random_range(0..LONG_NOTE_PATTERNS.len())];
            pattern_points(&mut points, onset, duration, pattern, |f| config.bound(level * f));
        }

        if duration > config.decay_min_ticks {
            let shortest_lead = cut(duration as f64 * 0.15) as i64;
            for &(time, factor) in DECAY_TAIL {
                let lead = (cut(duration as f64 * (1.0 - time)) as i64).min(shortest_lead);
                points.push(((release - lead) as f64, config.floor(level * factor)));
            }
        } else {
            points.push((release as f64, config.floor(level * config.end_factor)));
        }

        previous = Some((release, config.floor(level * config.end_factor)));
    }

    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    points
}

/// Reduced (tick, value) curve of one interpreted voice
pub fn organic_curve(
    voice: &Voice,
    ticks_per_beat: u32,
    config: &CurveConfig,
    rng: &mut impl Rng,
) -> Result<Vec<(f64, u8)>, CurveError> {
    if voice.notes.is_empty() {
        return Err(CurveError::Empty);
    }
    let points = shape_points(voice, ticks_per_beat, &config.organic, rng);
    Ok(reduce(&points, &ReductionThresholds::ticks(), config.importance_window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::VoiceAnalyzer;
    use crate::model::VoiceKey;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn voice(pitches: &[u8], velocity: u8, duration: i64, track: usize) -> Voice {
        let notes = pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| Note::new(p, velocity, i as i64 * 480, duration, track, 0))
            .collect();
        let mut voice = Voice::with_notes(VoiceKey::new(track, 0), notes);
        VoiceAnalyzer::default().analyze(&mut voice, 480).unwrap();
        voice
    }

    #[test]
    fn test_velocity_bands() {
        let config = OrganicConfig::default();
        assert_eq!(velocity_to_cc(10, 1.0, &config), 30);
        assert_eq!(velocity_to_cc(30, 1.0, &config), 45);
        assert_eq!(velocity_to_cc(60, 1.0, &config), 60);
        assert_eq!(velocity_to_cc(80, 1.0, &config), 80);
        assert_eq!(velocity_to_cc(127, 1.0, &config), 115);
        // melody factor lifts the mid band
        assert_eq!(velocity_to_cc(60, 1.15, &config), 69);
        assert_eq!(velocity_to_cc(127, 1.15, &config), 115);
    }

    #[test]
    fn test_local_peak_points() {
        let melody = voice(&[72, 79, 74], 80, 40, 0);
        assert!(melody.notes[1].is_melody);
        let points = shape_points(&melody, 480, &OrganicConfig::default(), &mut StdRng::seed_from_u64(1));

        // rise, peak and fall at 15/30/45% of 40 ticks
        let cc = velocity_to_cc(80, 1.15, &OrganicConfig::default());
        assert_eq!(cc, 92);
        assert!(points.contains(&(486.0, 94)));
        assert!(points.contains(&(492.0, 99)));
        assert!(points.contains(&(498.0, 95)));
    }

    #[test]
    fn test_gap_transitions_follow_direction() {
        let mut bass = voice(&[40, 43], 40, 100, 1);
        bass.notes[1].adjusted_velocity = 100;
        let points = shape_points(&bass, 480, &OrganicConfig::default(), &mut StdRng::seed_from_u64(1));

        let config = OrganicConfig::default();
        // 60 x 1.05 = 63 releasing at 63 x 0.9 = 56; the next onset is 99, 380 ticks later
        assert_eq!(velocity_to_cc(40, 1.05, &config), 63);
        assert_eq!(velocity_to_cc(100, 1.05, &config), 99);
        assert!(points.contains(&(214.0, 62)));
        assert!(points.contains(&(366.0, 88)));
    }

    #[test]
    fn test_decay_tail_and_short_end() {
        let config = OrganicConfig::default();
        let inner = voice(&[60], 60, 200, 2);
        let points = shape_points(&inner, 480, &config, &mut StdRng::seed_from_u64(1));
        // lead is capped at 15% of 200 ticks
        assert!(points.contains(&(170.0, 57)));
        assert!(points.contains(&(186.0, 55)));
        assert!(points.contains(&(200.0, 54)));

        let short = voice(&[60], 60, 10, 2);
        let points = shape_points(&short, 480, &config, &mut StdRng::seed_from_u64(1));
        assert_eq!(points, vec![(0.0, 60), (10.0, 54)]);
    }

    #[test]
    fn test_long_note_pattern_is_seeded() {
        let inner = voice(&[60, 62, 64, 62, 60, 62, 64, 62], 64, 470, 2);
        let config = CurveConfig::default();
        let a = organic_curve(&inner, 480, &config, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = organic_curve(&inner, 480, &config, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(a.first().map(|p| p.0), Some(0.0));
    }

    #[test]
    fn test_empty_voice() {
        let empty = Voice::new(VoiceKey::new(0, 0));
        assert_eq!(
            organic_curve(&empty, 480, &CurveConfig::default(), &mut StdRng::seed_from_u64(1)),
            Err(CurveError::Empty)
        );
    }
}
