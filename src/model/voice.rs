// Voice model - ordered note sequences with role and phrase structure
// One voice per (track, channel) pair of the input

use serde::{Deserialize, Serialize};

use super::note::{Note, VoiceKey};

/// Musical role of a voice, derived from its average pitch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceRole {
    Melody,
    Bass,
    Inner,
    Unknown,
}

impl VoiceRole {
    /// Classify by average pitch: above `melody_above` is melody, below
    /// `bass_below` is bass, anything between is an inner voice
    pub fn from_average_pitch(avg_pitch: f64, melody_above: f64, bass_below: f64) -> Self {
        if !avg_pitch.is_finite() {
            VoiceRole::Unknown
        } else if avg_pitch > melody_above {
            VoiceRole::Melody
        } else if avg_pitch < bass_below {
            VoiceRole::Bass
        } else {
            VoiceRole::Inner
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceRole::Melody => "melody",
            VoiceRole::Bass => "bass",
            VoiceRole::Inner => "inner",
            VoiceRole::Unknown => "unknown",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "melody" => Some(VoiceRole::Melody),
            "bass" => Some(VoiceRole::Bass),
            "inner" | "inner_voice" => Some(VoiceRole::Inner),
            "unknown" => Some(VoiceRole::Unknown),
            _ => None,
        }
    }
}

/// Kind of phrase detected in a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhraseKind {
    /// Closed by a boundary condition
    Standard,

    /// Left open at the end of the voice
    Final,
}

/// A contiguous group of notes within a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    /// Index of the first note
    pub start: usize,

    /// Index of the last note (inclusive)
    pub end: usize,

    pub kind: PhraseKind,
}

impl Phrase {
    pub fn new(start: usize, end: usize, kind: PhraseKind) -> Self {
        Phrase { start, end, kind }
    }

    /// Number of notes in the phrase
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index <= self.end
    }
}

/// An independent melodic line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    pub key: VoiceKey,

    /// Notes sorted by original start time after analysis
    pub notes: Vec<Note>,

    pub role: VoiceRole,

    /// Ordered, non-overlapping phrases
    pub phrases: Vec<Phrase>,

    pub avg_pitch: f64,

    /// Lowest and highest pitch
    pub pitch_range: (u8, u8),

    /// Notes per beat across the voice's span
    pub rhythmic_density: f64,

    /// Set once analysis has completed successfully
    pub analyzed: bool,
}

impl Voice {
    pub fn new(key: VoiceKey) -> Self {
        Voice {
            key,
            notes: Vec::new(),
            role: VoiceRole::Unknown,
            phrases: Vec::new(),
            avg_pitch: 0.0,
            pitch_range: (0, 0),
            rhythmic_density: 0.0,
            analyzed: false,
        }
    }

    pub fn with_notes(key: VoiceKey, notes: Vec<Note>) -> Self {
        let mut voice = Voice::new(key);
        voice.notes = notes;
        voice
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Previous note of the note at `index`
    pub fn prev_of(&self, index: usize) -> Option<&Note> {
        self.notes.get(index)?.prev.and_then(|i| self.notes.get(i))
    }

    /// Next note of the note at `index`
    pub fn next_of(&self, index: usize) -> Option<&Note> {
        self.notes.get(index)?.next.and_then(|i| self.notes.get(i))
    }

    /// Phrase containing the note at `index`
    pub fn phrase_of(&self, index: usize) -> Option<&Phrase> {
        self.phrases.iter().find(|p| p.contains(index))
    }

    /// Last original end tick of the voice
    pub fn end_tick(&self) -> i64 {
        self.notes.iter().map(Note::original_end).max().unwrap_or(0)
    }
}
