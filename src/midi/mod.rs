// MIDI adapter - raw note events in, interpreted performance out, using midly
// Notes are matched by track, channel, pitch and original start

use midly::{Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use thiserror::Error;

use crate::curves::ExpressionCurve;
use crate::model::{Note, RawNoteEvent, Voice};

/// Errors from reading or writing standard MIDI files
#[derive(Debug, Error)]
pub enum MidiError {
    #[error("MIDI codec error: {0}")]
    Codec(#[from] midly::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Only metrical (ticks per beat) timing is supported")]
    UnsupportedTiming,

    #[error("Ticks per beat must be positive")]
    ZeroResolution,
}

/// Note events extracted from a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiReadResult {
    pub events: Vec<RawNoteEvent>,
    pub ticks_per_beat: u16,

    /// Note-offs without a sounding note
    pub unmatched_offs: usize,

    /// Notes still sounding at the end of their track, closed there
    pub unterminated_notes: usize,
}

fn ticks_per_beat(header: &Header) -> Result<u16, MidiError> {
    match header.timing {
        Timing::Metrical(ticks) if ticks.as_int() > 0 => Ok(ticks.as_int()),
        Timing::Metrical(_) => Err(MidiError::ZeroResolution),
        Timing::Timecode(..) => Err(MidiError::UnsupportedTiming),
    }
}

/// Note-on with a positive velocity
fn note_on(message: &MidiMessage) -> Option<(u8, u8)> {
    match message {
        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => Some((key.as_int(), vel.as_int())),
        _ => None,
    }
}

/// Note-off, including note-on with velocity 0
fn note_off(message: &MidiMessage) -> Option<u8> {
    match message {
        MidiMessage::NoteOff { key, .. } => Some(key.as_int()),
        MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => Some(key.as_int()),
        _ => None,
    }
}

/// Pair note-ons and note-offs into raw note events
pub fn read_note_events(bytes: &[u8]) -> Result<MidiReadResult, MidiError> {
    let smf = Smf::parse(bytes)?;
    let ticks_per_beat = ticks_per_beat(&smf.header)?;

    let mut events = Vec::new();
    let mut unmatched_offs = 0;
    let mut unterminated_notes = 0;

    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut now: i64 = 0;
        let mut sounding: BTreeMap<(u8, u8), VecDeque<(i64, u8)>> = BTreeMap::new();

        for event in track {
            now += event.delta.as_int() as i64;
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();

            if let Some((key, vel)) = note_on(&message) {
                sounding.entry((channel, key)).or_default().push_back((now, vel));
            } else if let Some(key) = note_off(&message) {
                match sounding.get_mut(&(channel, key)).and_then(VecDeque::pop_front) {
                    Some((start, vel)) => {
                        events.push(RawNoteEvent::new(key, vel, start, now - start, track_index, channel))
                    }
                    None => unmatched_offs += 1,
                }
            }
        }

        for ((channel, key), open) in sounding {
            for (start, vel) in open {
                unterminated_notes += 1;
                events.push(RawNoteEvent::new(key, vel, start, now - start, track_index, channel));
            }
        }
    }

    if unmatched_offs > 0 || unterminated_notes > 0 {
        log::warn!(
            "MIDI input had {} unmatched note-offs and {} unterminated notes",
            unmatched_offs,
            unterminated_notes
        );
    }

    Ok(MidiReadResult {
        events,
        ticks_per_beat,
        unmatched_offs,
        unterminated_notes,
    })
}

/// Read a file and extract its note events
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<MidiReadResult, MidiError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let result = read_note_events(&bytes)?;
    log::info!(
        "Read {} note events from {} ({} ticks per beat)",
        result.events.len(),
        path.display(),
        result.ticks_per_beat
    );
    Ok(result)
}

/// Sort rank of events sharing a tick: releases first, onsets last
fn rank(kind: &TrackEventKind) -> u8 {
    match kind {
        TrackEventKind::Midi { message, .. } if note_off(message).is_some() => 0,
        TrackEventKind::Midi { message, .. } if note_on(message).is_some() => 2,
        _ => 1,
    }
}

/// Rewrite a file with interpreted notes and expression curves
///
/// Every track ends at the same tick. Existing events of a curve's
/// controller are removed on the channels that receive a curve.
pub fn write_performance(bytes: &[u8], voices: &[Voice], curves: &[ExpressionCurve]) -> Result<Vec<u8>, MidiError> {
    let smf = Smf::parse(bytes)?;

    let mut lookup: BTreeMap<(usize, u8, u8, i64), VecDeque<&Note>> = BTreeMap::new();
    for note in voices.iter().flat_map(|v| v.notes.iter()) {
        lookup
            .entry((note.track, note.channel, note.pitch, note.original_start()))
            .or_default()
            .push_back(note);
    }

    let mut timed_tracks: Vec<Vec<(i64, TrackEventKind)>> = Vec::with_capacity(smf.tracks.len());
    for (track_index, track) in smf.tracks.iter().enumerate() {
        let stripped: BTreeSet<(u8, u8)> = curves
            .iter()
            .filter(|c| c.voice.track == track_index)
            .map(|c| (c.voice.channel, c.controller))
            .collect();

        let mut now: i64 = 0;
        let mut releases: BTreeMap<(u8, u8), VecDeque<Option<i64>>> = BTreeMap::new();
        let mut timed = Vec::with_capacity(track.len());

        for event in track {
            now += event.delta.as_int() as i64;
            match event.kind {
                TrackEventKind::Meta(MetaMessage::EndOfTrack) => {}
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    if let MidiMessage::Controller { controller, .. } = message {
                        if stripped.contains(&(ch, controller.as_int())) {
                            continue;
                        }
                    }

                    if let Some((key, _)) = note_on(&message) {
                        let interpreted = lookup
                            .get_mut(&(track_index, ch, key, now))
                            .and_then(VecDeque::pop_front);
                        match interpreted {
                            Some(note) => {
                                releases.entry((ch, key)).or_default().push_back(Some(note.adjusted_end()));
                                timed.push((
                                    note.adjusted_start,
                                    TrackEventKind::Midi {
                                        channel,
                                        message: MidiMessage::NoteOn {
                                            key: key.into(),
                                            vel: note.adjusted_velocity.into(),
                                        },
                                    },
                                ));
                            }
                            None => {
                                releases.entry((ch, key)).or_default().push_back(None);
                                timed.push((now, event.kind));
                            }
                        }
                    } else if let Some(key) = note_off(&message) {
                        let release = releases
                            .get_mut(&(ch, key))
                            .and_then(VecDeque::pop_front)
                            .flatten();
                        timed.push((release.unwrap_or(now), event.kind));
                    } else {
                        timed.push((now, event.kind));
                    }
                }
                kind => timed.push((now, kind)),
            }
        }

        for curve in curves.iter().filter(|c| c.voice.track == track_index) {
            for point in &curve.points {
                timed.push((
                    point.tick,
                    TrackEventKind::Midi {
                        channel: curve.voice.channel.into(),
                        message: MidiMessage::Controller {
                            controller: curve.controller.into(),
                            value: point.value.into(),
                        },
                    },
                ));
            }
        }

        timed.sort_by_key(|(tick, kind)| ((*tick).max(0), rank(kind)));
        timed_tracks.push(timed);
    }

    let end_tick = timed_tracks
        .iter()
        .filter_map(|t| t.last().map(|(tick, _)| (*tick).max(0)))
        .max()
        .unwrap_or(0);

    let tracks: Vec<Track> = timed_tracks
        .into_iter()
        .map(|timed| {
            let mut track = Track::new();
            let mut last_tick = 0i64;
            for (tick, kind) in timed {
                let tick = tick.max(0);
                let delta = (tick - last_tick).max(0) as u32;
                track.push(TrackEvent {
                    delta: delta.into(),
                    kind,
                });
                last_tick = tick;
            }
            track.push(TrackEvent {
                delta: ((end_tick - last_tick).max(0) as u32).into(),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            });
            track
        })
        .collect();

    let out = Smf {
        header: smf.header,
        tracks,
    };
    let mut bytes = Vec::new();
    out.write_std(&mut bytes)?;
    Ok(bytes)
}

/// Rewrite `input` into `output` with interpreted notes and curves
pub fn write_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    voices: &[Voice],
    curves: &[ExpressionCurve],
) -> Result<(), MidiError> {
    let bytes = std::fs::read(input.as_ref())?;
    let rendered = write_performance(&bytes, voices, curves)?;
    std::fs::write(output.as_ref(), rendered)?;
    log::info!(
        "Wrote interpreted performance with {} curves to {}",
        curves.len(),
        output.as_ref().display()
    );
    Ok(())
}
