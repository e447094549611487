// Voice Analyzer - role classification and phrase segmentation
// Links neighbors, computes intervals, metric positions and phrase positions

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::meter::Meter;
use crate::model::{Phrase, PhraseKind, Voice, VoiceRole, MIDI_MAX};

/// Errors that can occur while analyzing a voice
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("Ticks per beat must be positive")]
    ZeroResolution,

    #[error("Note {index} has invalid pitch {pitch}")]
    InvalidPitch { index: usize, pitch: u8 },

    #[error("Note {index} has non-positive duration {duration}")]
    NonPositiveDuration { index: usize, duration: i64 },
}

/// Thresholds for role classification and phrase detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Average pitch above which a voice is a melody
    pub melody_above: f64,

    /// Average pitch below which a voice is a bass line
    pub bass_below: f64,

    /// Silence after the previous note (beats) that opens a new phrase
    pub phrase_gap_beats: f64,

    /// Previous note duration (beats) that closes a phrase
    pub phrase_long_note_beats: f64,

    /// Leap (semitones) that closes a phrase
    pub phrase_leap_semitones: i32,

    /// Notes a phrase needs before a downbeat may close it
    pub downbeat_split_notes: usize,

    /// Smallest phrase that gets registered
    pub min_phrase_notes: usize,

    /// Distance (beats) from a strong beat that still counts as a downbeat
    pub downbeat_tolerance: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            melody_above: 70.0,
            bass_below: 50.0,
            phrase_gap_beats: 1.0,
            phrase_long_note_beats: 2.0,
            phrase_leap_semitones: 7,
            downbeat_split_notes: 4,
            min_phrase_notes: 3,
            downbeat_tolerance: 0.1,
        }
    }
}

/// Analyzes voices in place
#[derive(Debug, Clone, Default)]
pub struct VoiceAnalyzer {
    config: AnalyzerConfig,
}

impl VoiceAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        VoiceAnalyzer { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze a voice
    ///
    /// Inputs are validated before anything is touched, so a failed
    /// analysis leaves the voice exactly as it was.
    pub fn analyze(&self, voice: &mut Voice, ticks_per_beat: u32) -> Result<(), AnalysisError> {
        if ticks_per_beat == 0 {
            return Err(AnalysisError::ZeroResolution);
        }
        for (index, note) in voice.notes.iter().enumerate() {
            if note.pitch > MIDI_MAX {
                return Err(AnalysisError::InvalidPitch { index, pitch: note.pitch });
            }
            if note.original_duration() <= 0 {
                return Err(AnalysisError::NonPositiveDuration {
                    index,
                    duration: note.original_duration(),
                });
            }
        }

        if voice.notes.is_empty() {
            voice.role = VoiceRole::Unknown;
            voice.phrases.clear();
            voice.analyzed = true;
            return Ok(());
        }

        voice
            .notes
            .sort_by_key(|n| (n.original_start(), n.pitch));

        self.link_neighbors(voice);
        self.classify_role(voice);
        self.compute_density(voice, ticks_per_beat);
        self.compute_metric_positions(voice, ticks_per_beat);
        voice.phrases = self.detect_phrases(voice, ticks_per_beat);
        self.assign_phrase_positions(voice);

        voice.analyzed = true;
        Ok(())
    }

    fn link_neighbors(&self, voice: &mut Voice) {
        let count = voice.notes.len();
        for i in 0..count {
            let prev = if i > 0 { Some(i - 1) } else { None };
            let next = if i + 1 < count { Some(i + 1) } else { None };

            let interval_to_prev = prev.map(|p| voice.notes[i].pitch as i32 - voice.notes[p].pitch as i32);
            let interval_to_next = next.map(|n| voice.notes[n].pitch as i32 - voice.notes[i].pitch as i32);

            let note = &mut voice.notes[i];
            note.prev = prev;
            note.next = next;
            note.interval_to_prev = interval_to_prev;
            note.interval_to_next = interval_to_next;
        }
    }

    fn classify_role(&self, voice: &mut Voice) {
        let sum: f64 = voice.notes.iter().map(|n| n.pitch as f64).sum();
        voice.avg_pitch = sum / voice.notes.len() as f64;

        let low = voice.notes.iter().map(|n| n.pitch).min().unwrap_or(0);
        let high = voice.notes.iter().map(|n| n.pitch).max().unwrap_or(0);
        voice.pitch_range = (low, high);

        voice.role = VoiceRole::from_average_pitch(
            voice.avg_pitch,
            self.config.melody_above,
            self.config.bass_below,
        );

        let role = voice.role;
        for note in &mut voice.notes {
            note.is_melody = role == VoiceRole::Melody;
            note.is_bass = role == VoiceRole::Bass;
            note.is_inner = role == VoiceRole::Inner;
        }
    }

    fn compute_density(&self, voice: &mut Voice, ticks_per_beat: u32) {
        let first = voice.notes.first().map(|n| n.original_start()).unwrap_or(0);
        let span_ticks = voice.end_tick() - first;
        let span_beats = span_ticks as f64 / ticks_per_beat as f64;

        voice.rhythmic_density = if span_beats > 0.0 {
            voice.notes.len() as f64 / span_beats
        } else {
            0.0
        };
    }

    fn compute_metric_positions(&self, voice: &mut Voice, ticks_per_beat: u32) {
        let meter = Meter::common(ticks_per_beat);
        for note in &mut voice.notes {
            let start = note.original_start();
            note.metric_position = meter.position(start).fraction;
            note.is_downbeat = meter.is_downbeat(start, self.config.downbeat_tolerance);
        }
    }

    /// Segment the voice into phrases
    ///
    /// Requires metric positions, since a downbeat may close a long phrase.
    fn detect_phrases(&self, voice: &Voice, ticks_per_beat: u32) -> Vec<Phrase> {
        let notes = &voice.notes;
        let tpb = ticks_per_beat as f64;
        let min_notes = self.config.min_phrase_notes.max(1);
        let mut phrases = Vec::new();
        let mut current_start = 0usize;

        for i in 1..notes.len() {
            let prev = &notes[i - 1];
            let note = &notes[i];

            let gap = (note.original_start() - prev.original_end()) as f64;
            let closes = gap > self.config.phrase_gap_beats * tpb
                || prev.original_duration() as f64 > self.config.phrase_long_note_beats * tpb
                || note
                    .interval_to_prev
                    .map(|iv| iv.abs() > self.config.phrase_leap_semitones)
                    .unwrap_or(false)
                || (i - current_start >= self.config.downbeat_split_notes && note.is_downbeat);

            if closes {
                if i - current_start >= min_notes {
                    phrases.push(Phrase::new(current_start, i - 1, PhraseKind::Standard));
                }
                current_start = i;
            }
        }

        if notes.len() - current_start >= min_notes {
            phrases.push(Phrase::new(current_start, notes.len() - 1, PhraseKind::Final));
        }

        phrases
    }

    fn assign_phrase_positions(&self, voice: &mut Voice) {
        for note in &mut voice.notes {
            note.phrase_position = None;
        }
        for phrase in &voice.phrases {
            let len = phrase.len() as f64;
            for i in phrase.start..=phrase.end {
                voice.notes[i].phrase_position = Some((i - phrase.start) as f64 / len);
            }
        }
    }
}
