// Safety validation - duration floors after rule application
// Raises over-shortened notes back to a length-dependent minimum

use serde::{Deserialize, Serialize};

use crate::model::{Voice, VoiceKey};

/// Floor parameters of the validation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Share of the original kept for notes up to a 64th (1/16 beat)
    pub very_short_keep: f64,

    /// Share kept up to a 32nd (1/8 beat)
    pub short_keep: f64,

    /// Share kept up to a 16th (1/4 beat)
    pub sixteenth_keep: f64,

    /// Share kept for everything longer
    pub default_keep: f64,

    /// Absolute floor in ticks
    pub absolute_min: i64,

    /// Absolute floor as a share of the original
    pub absolute_fraction: f64,

    /// A correction is critical when the old value was below this share of the floor
    pub critical_ratio: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            very_short_keep: 0.9,
            short_keep: 0.8,
            sixteenth_keep: 0.7,
            default_keep: 0.6,
            absolute_min: 2,
            absolute_fraction: 0.5,
            critical_ratio: 0.5,
        }
    }
}

impl ValidationConfig {
    /// Minimum adjusted duration of a note with the given original length
    ///
    /// Never exceeds the original and is at least one tick.
    pub fn minimum_duration(&self, original: i64, ticks_per_beat: u32) -> i64 {
        let relative = original as f64 / ticks_per_beat.max(1) as f64;
        let keep = if relative <= 1.0 / 16.0 {
            self.very_short_keep
        } else if relative <= 1.0 / 8.0 {
            self.short_keep
        } else if relative <= 0.25 {
            self.sixteenth_keep
        } else {
            self.default_keep
        };

        let absolute = self.absolute_min.max((original as f64 * self.absolute_fraction) as i64);
        let floor = absolute.max((original as f64 * keep) as i64);
        floor.min(original).max(1)
    }
}

/// One raised duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationCorrection {
    pub voice: VoiceKey,
    pub note_index: usize,
    pub pitch: u8,
    pub old_duration: i64,
    pub new_duration: i64,
    pub critical: bool,
}

/// Outcome of a validation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub notes_checked: usize,
    pub corrections: Vec<DurationCorrection>,
    pub critical_corrections: usize,
    pub start_clamps: usize,

    /// Shortest adjusted duration before and after the pass
    pub min_duration_before: Option<i64>,
    pub min_duration_after: Option<i64>,
}

impl ValidationReport {
    pub fn corrected(&self) -> usize {
        self.corrections.len()
    }

    pub fn is_clean(&self) -> bool {
        self.corrections.is_empty() && self.start_clamps == 0
    }
}

/// Enforce duration floors and non-negative starts on every note
pub fn validate_voices(voices: &mut [Voice], ticks_per_beat: u32, config: &ValidationConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    for voice in voices.iter_mut() {
        let key = voice.key;
        for (index, note) in voice.notes.iter_mut().enumerate() {
            report.notes_checked += 1;
            report.min_duration_before = Some(
                report
                    .min_duration_before
                    .map_or(note.adjusted_duration, |m| m.min(note.adjusted_duration)),
            );

            if note.adjusted_start < 0 {
                note.adjusted_start = 0;
                report.start_clamps += 1;
            }

            let floor = config.minimum_duration(note.original_duration(), ticks_per_beat);
            if note.adjusted_duration < floor {
                let old = note.adjusted_duration;
                let critical = (old as f64) < floor as f64 * config.critical_ratio;
                note.adjusted_duration = floor;
                if critical {
                    report.critical_corrections += 1;
                }
                report.corrections.push(DurationCorrection {
                    voice: key,
                    note_index: index,
                    pitch: note.pitch,
                    old_duration: old,
                    new_duration: floor,
                    critical,
                });
            }

            report.min_duration_after = Some(
                report
                    .min_duration_after
                    .map_or(note.adjusted_duration, |m| m.min(note.adjusted_duration)),
            );
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Note;

    fn voice_of(notes: Vec<Note>) -> Voice {
        Voice::with_notes(VoiceKey::new(0, 0), notes)
    }

    #[test]
    fn test_minimum_duration_tiers() {
        let config = ValidationConfig::default();
        // 30 ticks = 1/16 beat: 90%
        assert_eq!(config.minimum_duration(30, 480), 27);
        // 60 ticks = 1/8 beat: 80%
        assert_eq!(config.minimum_duration(60, 480), 48);
        // 120 ticks = 1/4 beat: 70%
        assert_eq!(config.minimum_duration(120, 480), 84);
        // quarter note: 60%
        assert_eq!(config.minimum_duration(480, 480), 288);
    }

    #[test]
    fn test_minimum_duration_caps() {
        let config = ValidationConfig::default();
        // absolute floor of 2 is capped at the original
        assert_eq!(config.minimum_duration(1, 480), 1);
        assert_eq!(config.minimum_duration(3, 480), 2);
    }

    #[test]
    fn test_raises_short_notes() {
        let mut first = Note::new(60, 80, 0, 480, 0, 0);
        first.adjusted_duration = 100;
        let mut second = Note::new(62, 80, 480, 480, 0, 0);
        second.adjusted_duration = 200;
        let mut voices = vec![voice_of(vec![first, second])];

        let report = validate_voices(&mut voices, 480, &ValidationConfig::default());
        assert_eq!(report.corrected(), 2);
        // 100 < 144 is critical, 200 is not
        assert_eq!(report.critical_corrections, 1);
        assert!(voices[0].notes.iter().all(|n| n.adjusted_duration == 288));
        assert_eq!(report.min_duration_before, Some(100));
        assert_eq!(report.min_duration_after, Some(288));
    }

    #[test]
    fn test_clamps_negative_start() {
        let mut note = Note::new(60, 80, 0, 480, 0, 0);
        note.adjusted_start = -12;
        let mut voices = vec![voice_of(vec![note])];

        let report = validate_voices(&mut voices, 480, &ValidationConfig::default());
        assert_eq!(report.start_clamps, 1);
        assert_eq!(voices[0].notes[0].adjusted_start, 0);
    }

    #[test]
    fn test_idempotent() {
        let mut note = Note::new(60, 80, 0, 90, 0, 0);
        note.adjusted_duration = 10;
        note.adjusted_start = -3;
        let mut voices = vec![voice_of(vec![note])];
        let config = ValidationConfig::default();

        validate_voices(&mut voices, 480, &config);
        let once = voices.clone();
        let second = validate_voices(&mut voices, 480, &config);

        assert!(second.is_clean());
        assert_eq!(voices[0].notes, once[0].notes);
    }

    #[test]
    fn test_lengthened_notes_untouched() {
        let mut note = Note::new(60, 80, 0, 480, 0, 0);
        note.adjusted_duration = 600;
        let mut voices = vec![voice_of(vec![note])];
        let report = validate_voices(&mut voices, 480, &ValidationConfig::default());
        assert!(report.is_clean());
        assert_eq!(voices[0].notes[0].adjusted_duration, 600);
    }
}
