// Musical structure - phrase boundaries agreed on across voices
// Groups per-voice phrases by measure, derives cadences and gravity centers

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::analysis::Meter;
use crate::model::Voice;

/// Measures in a synthesized structure when the piece is shorter
pub const DEFAULT_MEASURE_COUNT: u32 = 16;

/// Length of a synthesized phrase in measures
pub const SYNTHETIC_PHRASE_MEASURES: u32 = 8;

/// Gravity of a synthesized cadence
pub const SYNTHETIC_CADENCE_GRAVITY: f64 = 0.6;

/// Gravity of a synthesized phrase midpoint
pub const SYNTHETIC_MIDPOINT_GRAVITY: f64 = 0.3;

/// Errors while aggregating voice phrases
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructureError {
    #[error("Ticks per beat must be positive")]
    ZeroResolution,

    #[error("Phrase {start}..={end} of voice {voice} lies outside its {len} notes")]
    PhraseOutOfRange {
        voice: usize,
        start: usize,
        end: usize,
        len: usize,
    },
}

/// A phrase boundary in measures, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureSpan {
    pub start: u32,
    pub end: u32,
}

/// Piece-level structure shared by every voice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicalStructure {
    pub measure_count: u32,
    pub phrases: Vec<MeasureSpan>,
    pub cadences: Vec<u32>,

    /// Measure -> gravity strength [0.0, 1.0]
    pub gravity_centers: BTreeMap<u32, f64>,

    /// True when no voice agreement was available
    pub synthetic: bool,
}

impl MusicalStructure {
    /// Regular 8-measure phrasing over at least `measure_count` measures
    pub fn synthetic(measure_count: u32) -> Self {
        let measure_count = measure_count.max(DEFAULT_MEASURE_COUNT);
        let mut structure = MusicalStructure {
            measure_count,
            phrases: Vec::new(),
            cadences: Vec::new(),
            gravity_centers: BTreeMap::new(),
            synthetic: true,
        };

        for start in (0..measure_count).step_by(SYNTHETIC_PHRASE_MEASURES as usize) {
            let end = (start + SYNTHETIC_PHRASE_MEASURES - 1).min(measure_count - 1);
            structure.phrases.push(MeasureSpan { start, end });
            structure.cadences.push(end);
            structure.gravity_centers.insert(end, SYNTHETIC_CADENCE_GRAVITY);

            let mid = start + (end - start) / 2;
            if mid > start && mid < end {
                structure.gravity_centers.insert(mid, SYNTHETIC_MIDPOINT_GRAVITY);
            }
        }

        structure
    }

    pub fn phrase_count(&self) -> usize {
        self.phrases.len()
    }

    pub fn cadence_count(&self) -> usize {
        self.cadences.len()
    }

    pub fn is_cadence(&self, measure: u32) -> bool {
        self.cadences.contains(&measure)
    }

    pub fn is_phrase_end(&self, measure: u32) -> bool {
        self.phrases.iter().any(|p| p.end == measure)
    }
}

/// One voice phrase mapped to measures
#[derive(Debug, Clone, Copy)]
struct VoicePhrase {
    start: u32,
    end: u32,
    voice: usize,
}

/// Highest measure containing a note start, across all voices
pub fn last_note_measure(voices: &[Voice], ticks_per_beat: u32) -> u32 {
    let meter = Meter::common(ticks_per_beat);
    voices
        .iter()
        .flat_map(|v| v.notes.iter())
        .map(|n| meter.measure_of(n.original_start()))
        .max()
        .unwrap_or(0)
}

/// Aggregate voice phrases into a shared structure
///
/// Returns `Ok(None)` when no analyzed voice has any phrase; the caller
/// then falls back to [`MusicalStructure::synthetic`].
pub fn analyze_structure(voices: &[Voice], ticks_per_beat: u32) -> Result<Option<MusicalStructure>, StructureError> {
    if ticks_per_beat == 0 {
        return Err(StructureError::ZeroResolution);
    }
    let meter = Meter::common(ticks_per_beat);

    let mut collected = Vec::new();
    for (voice_index, voice) in voices.iter().enumerate().filter(|(_, v)| v.analyzed) {
        for phrase in &voice.phrases {
            let (Some(first), Some(last)) = (voice.notes.get(phrase.start), voice.notes.get(phrase.end)) else {
                return Err(StructureError::PhraseOutOfRange {
                    voice: voice_index,
                    start: phrase.start,
                    end: phrase.end,
                    len: voice.notes.len(),
                });
            };
            collected.push(VoicePhrase {
                start: meter.measure_of(first.original_start()),
                end: meter.measure_of(last.original_start()),
                voice: voice_index,
            });
        }
    }

    if collected.is_empty() {
        return Ok(None);
    }

    collected.sort_by_key(|p| p.start);

    let mut groups: Vec<Vec<VoicePhrase>> = Vec::new();
    for phrase in collected.iter().copied() {
        match groups.last_mut() {
            Some(group) if group.last().is_some_and(|prev| phrase.start.abs_diff(prev.start) <= 1) => {
                group.push(phrase)
            }
            _ => groups.push(vec![phrase]),
        }
    }

    let voice_count = voices.len().max(1);
    let required = voice_count.div_ceil(3);

    let mut structure = MusicalStructure {
        measure_count: 0,
        phrases: Vec::new(),
        cadences: Vec::new(),
        gravity_centers: BTreeMap::new(),
        synthetic: false,
    };

    for group in &groups {
        let distinct: BTreeSet<usize> = group.iter().map(|p| p.voice).collect();
        if distinct.len() < required {
            continue;
        }

        let n = group.len() as f64;
        let start = (group.iter().map(|p| p.start as f64).sum::<f64>() / n).round() as u32;
        let end = (group.iter().map(|p| p.end as f64).sum::<f64>() / n).round() as u32;
        structure.phrases.push(MeasureSpan { start, end });

        let agreement = distinct.len() as f64 / voice_count as f64;
        if agreement >= 0.5 {
            structure.cadences.push(end);
            structure.gravity_centers.insert(end, (0.7 + agreement * 0.3).min(1.0));
        }
    }

    let max_end = collected.iter().map(|p| p.end).max().unwrap_or(0);
    structure.measure_count = (max_end + 1).max(last_note_measure(voices, ticks_per_beat) + 1);

    Ok(Some(structure))
}
