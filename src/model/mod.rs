// Note and voice model
// Passive data entities shared by every pipeline stage

pub mod note;
pub mod voice;

pub use note::{clamp_velocity, scale_velocity, Note, NoteError, RawNoteEvent, VoiceKey, MIDI_MAX};
pub use voice::{Phrase, PhraseKind, Voice, VoiceRole};
