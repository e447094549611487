// Rule registry - stable rule identifiers and the rule value type
// Each rule is {kind, enabled, params} plus a pure transformation per kind

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

use super::context::InterpretationContext;
use super::params::RuleParams;
use super::{bass, inner, melody};
use crate::model::{Note, VoiceRole};

/// Errors raised by a single rule invocation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("Missing parameter `{0}`")]
    MissingParam(String),

    #[error("Parameter `{name}` must be a {expected}")]
    WrongParamType { name: String, expected: &'static str },

    #[error("Parameter `{0}` is not finite")]
    NonFiniteParam(String),

    #[error("Note index {index} out of range for voice of {len} notes")]
    NoteOutOfRange { index: usize, len: usize },
}

/// Stable identifier of every rule in the catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    PhraseStart,
    PhraseEnd,
    PreLeap,
    LocalPeak,
    Downbeat,
    ShortNote,
    LongNote,
    Accelerando,
    SequenceAccel,
    Directional,
    BassDownbeat,
    BassShort,
    BassRepeated,
    BassPhraseEnd,
    InnerBaseVelocity,
    InnerContour,
    InnerConsonant,
    InnerTimingFlow,
    InnerShortNote,
}

impl RuleKind {
    /// Melody rules in registration order
    pub const MELODY: [RuleKind; 10] = [
        RuleKind::PhraseStart,
        RuleKind::PhraseEnd,
        RuleKind::PreLeap,
        RuleKind::LocalPeak,
        RuleKind::Downbeat,
        RuleKind::ShortNote,
        RuleKind::LongNote,
        RuleKind::Accelerando,
        RuleKind::SequenceAccel,
        RuleKind::Directional,
    ];

    /// Bass rules in registration order
    pub const BASS: [RuleKind; 4] = [
        RuleKind::BassDownbeat,
        RuleKind::BassShort,
        RuleKind::BassRepeated,
        RuleKind::BassPhraseEnd,
    ];

    /// Inner-voice rules in registration order
    pub const INNER: [RuleKind; 5] = [
        RuleKind::InnerBaseVelocity,
        RuleKind::InnerContour,
        RuleKind::InnerConsonant,
        RuleKind::InnerTimingFlow,
        RuleKind::InnerShortNote,
    ];

    /// Registered rules for a role; unknown voices get none
    pub fn for_role(role: VoiceRole) -> &'static [RuleKind] {
        match role {
            VoiceRole::Melody => &Self::MELODY,
            VoiceRole::Bass => &Self::BASS,
            VoiceRole::Inner => &Self::INNER,
            VoiceRole::Unknown => &[],
        }
    }

    pub fn role(&self) -> VoiceRole {
        if Self::MELODY.contains(self) {
            VoiceRole::Melody
        } else if Self::BASS.contains(self) {
            VoiceRole::Bass
        } else {
            VoiceRole::Inner
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::PhraseStart => "phrase_start",
            RuleKind::PhraseEnd => "phrase_end",
            RuleKind::PreLeap => "pre_leap",
            RuleKind::LocalPeak => "local_peak",
            RuleKind::Downbeat => "downbeat",
            RuleKind::ShortNote => "short_note",
            RuleKind::LongNote => "long_note",
            RuleKind::Accelerando => "accelerando",
            RuleKind::SequenceAccel => "sequence_accel",
            RuleKind::Directional => "directional_timing",
            RuleKind::BassDownbeat => "bass_downbeat",
            RuleKind::BassShort => "bass_short",
            RuleKind::BassRepeated => "bass_repeated",
            RuleKind::BassPhraseEnd => "bass_phrase_end",
            RuleKind::InnerBaseVelocity => "inner_base_velocity",
            RuleKind::InnerContour => "inner_contour",
            RuleKind::InnerConsonant => "inner_consonant",
            RuleKind::InnerTimingFlow => "inner_timing_flow",
            RuleKind::InnerShortNote => "inner_short_note",
        }
    }

    /// Resolve a rule name within a role's rule set
    /// Look up a rule by name; "directional" is accepted for "directional_timing"
    pub fn from_name(role: VoiceRole, name: &str) -> Option<RuleKind> {
        let name = match name {
            "directional" => RuleKind::Directional.name(),
            other => other,
        };
        Self::for_role(role).iter().copied().find(|k| k.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            RuleKind::PhraseStart => "Delays and accents phrase openings, eases into the second note",
            RuleKind::PhraseEnd => "Broadens phrase endings and softens their close",
            RuleKind::PreLeap => "Anticipates ascending leaps, holds back before descending ones",
            RuleKind::LocalPeak => "Lingers on and accents melodic high points",
            RuleKind::Downbeat => "Leans on strong beats",
            RuleKind::ShortNote => "Crisps up very short notes",
            RuleKind::LongNote => "Gives long notes more weight",
            RuleKind::Accelerando => "Pushes forward through rising three-note runs",
            RuleKind::SequenceAccel => "Progressively accelerates repeated interval patterns",
            RuleKind::Directional => "Accelerates ascending motion, delays descending motion",
            RuleKind::BassDownbeat => "Anchors the bass on strong beats",
            RuleKind::BassShort => "Gently shortens short bass notes",
            RuleKind::BassRepeated => "Adds pulse and drive to repeated bass notes",
            RuleKind::BassPhraseEnd => "Sustains long bass notes at phrase ends",
            RuleKind::InnerBaseVelocity => "Keeps inner voices below the outer voices",
            RuleKind::InnerContour => "Accents contour peaks and valleys of inner voices",
            RuleKind::InnerConsonant => "Sustains consonant intervals in inner voices",
            RuleKind::InnerTimingFlow => "Adds small timing variation to inner voices",
            RuleKind::InnerShortNote => "Minimally shortens short inner-voice notes",
        }
    }

    /// Default parameter mapping
    pub fn default_params(&self) -> RuleParams {
        match self.role() {
            VoiceRole::Melody => melody::default_params(*self),
            VoiceRole::Bass => bass::default_params(*self),
            _ => inner::default_params(*self),
        }
    }
}

/// Short-lived pattern state kept by detector rules
///
/// Reset at the start of every voice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleState {
    /// Recent intervals to the previous note
    pub intervals: VecDeque<i32>,

    /// Pitch currently being repeated
    pub repeat_pitch: Option<u8>,

    /// Number of repetitions of `repeat_pitch`
    pub repeat_count: u32,
}

impl RuleState {
    pub fn reset(&mut self) {
        *self = RuleState::default();
    }
}

/// Mutable view of one note and its neighbors within a voice
pub struct NoteCursor<'a> {
    notes: &'a mut [Note],
    index: usize,
}

impl<'a> NoteCursor<'a> {
    pub fn new(notes: &'a mut [Note], index: usize) -> Result<Self, RuleError> {
        if index >= notes.len() {
            return Err(RuleError::NoteOutOfRange {
                index,
                len: notes.len(),
            });
        }
        Ok(NoteCursor { notes, index })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn note(&self) -> &Note {
        &self.notes[self.index]
    }

    pub fn note_mut(&mut self) -> &mut Note {
        &mut self.notes[self.index]
    }

    pub fn prev(&self) -> Option<&Note> {
        self.note().prev.and_then(|i| self.notes.get(i))
    }

    pub fn next(&self) -> Option<&Note> {
        self.note().next.and_then(|i| self.notes.get(i))
    }

    pub fn next_mut(&mut self) -> Option<&mut Note> {
        let next = self.note().next?;
        self.notes.get_mut(next)
    }

    /// Adjusted values of the note and its successor, for change detection
    fn snapshot(&self) -> (Performed, Option<Performed>) {
        (Performed::of(self.note()), self.next().map(Performed::of))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Performed {
    velocity: u8,
    start: i64,
    duration: i64,
}

impl Performed {
    fn of(note: &Note) -> Self {
        Performed {
            velocity: note.adjusted_velocity,
            start: note.adjusted_start,
            duration: note.adjusted_duration,
        }
    }
}

/// A configured rule instance
#[derive(Debug, Clone)]
pub struct Rule {
    kind: RuleKind,
    pub enabled: bool,
    pub params: RuleParams,
    state: RuleState,
}

impl Rule {
    /// Enabled rule with default parameters
    pub fn new(kind: RuleKind) -> Self {
        Rule {
            kind,
            enabled: true,
            params: kind.default_params(),
            state: RuleState::default(),
        }
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn description(&self) -> &'static str {
        self.kind.description()
    }

    /// Clear pattern state before a new voice
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Apply the rule to the note under the cursor
    ///
    /// Returns `Ok(true)` only if the note (or its successor) actually changed.
    pub fn apply(
        &mut self,
        cursor: &mut NoteCursor<'_>,
        ctx: &InterpretationContext,
        rng: &mut impl Rng,
    ) -> Result<bool, RuleError> {
        let before = cursor.snapshot();
        let params = &self.params;
        let state = &mut self.state;

        let fired = match self.kind {
            RuleKind::PhraseStart => melody::phrase_start(cursor, params, ctx)?,
            RuleKind::PhraseEnd => melody::phrase_end(cursor, params, ctx)?,
            RuleKind::PreLeap => melody::pre_leap(cursor, params, ctx)?,
            RuleKind::LocalPeak => melody::local_peak(cursor, params, ctx)?,
            RuleKind::Downbeat => melody::downbeat(cursor, params, ctx)?,
            RuleKind::ShortNote => melody::short_note(cursor, params, ctx)?,
            RuleKind::LongNote => melody::long_note(cursor, params, ctx)?,
            RuleKind::Accelerando => melody::accelerando(cursor, params, ctx)?,
            RuleKind::SequenceAccel => melody::sequence_accel(cursor, params, ctx, state)?,
            RuleKind::Directional => melody::directional(cursor, params, ctx)?,
            RuleKind::BassDownbeat => bass::downbeat_stability(cursor, params, ctx)?,
            RuleKind::BassShort => bass::short_note(cursor, params, ctx)?,
            RuleKind::BassRepeated => bass::repeated_notes(cursor, params, ctx, state, rng)?,
            RuleKind::BassPhraseEnd => bass::phrase_end(cursor, params, ctx)?,
            RuleKind::InnerBaseVelocity => inner::base_velocity(cursor, params, ctx)?,
            RuleKind::InnerContour => inner::contour(cursor, params, ctx)?,
            RuleKind::InnerConsonant => inner::consonant(cursor, params, ctx)?,
            RuleKind::InnerTimingFlow => inner::timing_flow(cursor, params, ctx, rng)?,
            RuleKind::InnerShortNote => inner::short_note(cursor, params, ctx)?,
        };

        Ok(fired && cursor.snapshot() != before)
    }
}

/// Shorten (or stretch) a duration by `factor` without dropping below `floor`
///
/// The floor never exceeds the current duration, so a shortening rule
/// cannot lengthen a note.
pub(crate) fn scale_duration(duration: i64, factor: f64, floor: i64) -> i64 {
    let target = (duration as f64 * factor).round() as i64;
    if factor < 1.0 {
        target.max(floor.min(duration)).max(1)
    } else {
        target.max(duration)
    }
}
