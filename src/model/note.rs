// Note model - raw note events and interpretable notes
// Keeps the captured original values next to the adjusted performance values

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest valid MIDI pitch / velocity value
pub const MIDI_MAX: u8 = 127;

/// Errors raised while capturing a raw event as a note
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NoteError {
    #[error("Note event is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Note field `{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
}

/// A raw note event as delivered by the event-stream codec
///
/// Every musical field is optional so partially decoded events can be
/// reported and skipped instead of aborting the load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawNoteEvent {
    /// MIDI pitch (0-127)
    pub pitch: Option<u8>,

    /// Note-on velocity (0-127)
    pub velocity: Option<u8>,

    /// Absolute start time in ticks
    pub start: Option<i64>,

    /// Duration in ticks
    pub duration: Option<i64>,

    /// Source track index
    pub track: usize,

    /// Source MIDI channel (0-15)
    pub channel: u8,
}

impl RawNoteEvent {
    /// Create a fully populated raw event
    pub fn new(pitch: u8, velocity: u8, start: i64, duration: i64, track: usize, channel: u8) -> Self {
        RawNoteEvent {
            pitch: Some(pitch),
            velocity: Some(velocity),
            start: Some(start),
            duration: Some(duration),
            track,
            channel,
        }
    }

    /// Voice this event belongs to
    pub fn voice_key(&self) -> VoiceKey {
        VoiceKey {
            track: self.track,
            channel: self.channel,
        }
    }
}

/// Identifies one independent voice: a (track, channel) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoiceKey {
    pub track: usize,
    pub channel: u8,
}

impl VoiceKey {
    pub fn new(track: usize, channel: u8) -> Self {
        VoiceKey { track, channel }
    }
}

/// A single note with its original and adjusted performance values
///
/// The original values are captured once and can only be read afterwards.
/// Neighbor links are indices into the owning voice's note list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// MIDI pitch (0-127)
    pub pitch: u8,

    original_velocity: u8,
    original_start: i64,
    original_duration: i64,

    /// Velocity after interpretation
    pub adjusted_velocity: u8,

    /// Start tick after interpretation
    pub adjusted_start: i64,

    /// Duration in ticks after interpretation
    pub adjusted_duration: i64,

    pub track: usize,
    pub channel: u8,

    /// Role flags copied from the voice during analysis
    pub is_melody: bool,
    pub is_bass: bool,
    pub is_inner: bool,

    /// Lands on beat 1 or beat 3 of the measure
    pub is_downbeat: bool,

    /// Position within the measure [0.0, 1.0)
    pub metric_position: f64,

    /// Position within the enclosing phrase [0.0, 1.0), if any
    pub phrase_position: Option<f64>,

    /// Signed semitones from the previous note (this - prev)
    pub interval_to_prev: Option<i32>,

    /// Signed semitones to the next note (next - this)
    pub interval_to_next: Option<i32>,

    pub(crate) prev: Option<usize>,
    pub(crate) next: Option<usize>,
}

impl Note {
    /// Capture a note; adjusted values start equal to the originals
    pub fn new(pitch: u8, velocity: u8, start: i64, duration: i64, track: usize, channel: u8) -> Self {
        Note {
            pitch,
            original_velocity: velocity,
            original_start: start,
            original_duration: duration,
            adjusted_velocity: velocity,
            adjusted_start: start,
            adjusted_duration: duration,
            track,
            channel,
            is_melody: false,
            is_bass: false,
            is_inner: false,
            is_downbeat: false,
            metric_position: 0.0,
            phrase_position: None,
            interval_to_prev: None,
            interval_to_next: None,
            prev: None,
            next: None,
        }
    }

    /// Capture a note from a raw event
    ///
    /// Returns the note and whether its duration had to be raised to 1 tick.
    pub fn from_raw(raw: &RawNoteEvent) -> Result<(Note, bool), NoteError> {
        let pitch = raw.pitch.ok_or(NoteError::MissingField("pitch"))?;
        let velocity = raw.velocity.ok_or(NoteError::MissingField("velocity"))?;
        let start = raw.start.ok_or(NoteError::MissingField("start"))?;
        let duration = raw.duration.ok_or(NoteError::MissingField("duration"))?;

        if pitch > MIDI_MAX {
            return Err(NoteError::OutOfRange { field: "pitch", value: pitch as i64 });
        }
        if velocity > MIDI_MAX {
            return Err(NoteError::OutOfRange { field: "velocity", value: velocity as i64 });
        }
        if start < 0 {
            return Err(NoteError::OutOfRange { field: "start", value: start });
        }

        let corrected = duration <= 0;
        let duration = if corrected { 1 } else { duration };

        Ok((Note::new(pitch, velocity, start, duration, raw.track, raw.channel), corrected))
    }

    pub fn original_velocity(&self) -> u8 {
        self.original_velocity
    }

    pub fn original_start(&self) -> i64 {
        self.original_start
    }

    pub fn original_duration(&self) -> i64 {
        self.original_duration
    }

    /// Original end tick
    pub fn original_end(&self) -> i64 {
        self.original_start + self.original_duration
    }

    /// Adjusted end tick
    pub fn adjusted_end(&self) -> i64 {
        self.adjusted_start + self.adjusted_duration
    }

    /// Original duration in beats
    pub fn relative_duration(&self, ticks_per_beat: u32) -> f64 {
        self.original_duration as f64 / ticks_per_beat.max(1) as f64
    }

    /// Index of the previous note in the owning voice
    pub fn prev_index(&self) -> Option<usize> {
        self.prev
    }

    /// Index of the next note in the owning voice
    pub fn next_index(&self) -> Option<usize> {
        self.next
    }

    /// True if any adjusted value differs from its original
    pub fn is_adjusted(&self) -> bool {
        self.adjusted_velocity != self.original_velocity
            || self.adjusted_start != self.original_start
            || self.adjusted_duration != self.original_duration
    }

    /// Adjusted start minus original start, in ticks
    pub fn timing_change(&self) -> i64 {
        self.adjusted_start - self.original_start
    }

    /// Adjusted velocity minus original velocity
    pub fn velocity_change(&self) -> i32 {
        self.adjusted_velocity as i32 - self.original_velocity as i32
    }

    /// Relative duration change in percent
    pub fn duration_change_pct(&self) -> f64 {
        if self.original_duration <= 0 {
            return 0.0;
        }
        (self.adjusted_duration as f64 / self.original_duration as f64 - 1.0) * 100.0
    }
}

/// Scale a velocity by a factor, rounding and clamping to 1..=127
pub fn scale_velocity(base: u8, factor: f64) -> u8 {
    clamp_velocity(base as f64 * factor)
}

/// Round and clamp a velocity value to 1..=127
pub fn clamp_velocity(value: f64) -> u8 {
    if !value.is_finite() {
        return 1;
    }
    value.round().clamp(1.0, MIDI_MAX as f64) as u8
}
