// Orchestral conductor - one shared timing strategy for every voice
// Structure analysis feeds the agogic map that biases the rule engine per measure

pub mod agogic;
pub mod structure;

pub use agogic::{build_map, AgogicMapError, MapStats, MapTier, OrchestralMap, WaveShape, BASE_FREQUENCY};
pub use structure::{analyze_structure, MeasureSpan, MusicalStructure, StructureError};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::model::Voice;
use crate::pipeline::{Stage, TraceBuilder, TraceSink};

/// Share of rubato used as the wave strength when none is configured
pub const RUBATO_WAVE_SCALE: f64 = 0.9;

/// Conductor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Peak of the base wave; defaults to rubato x 0.9
    pub wave_strength: Option<f64>,

    /// Weight of the wave harmonics [0.0, 1.0]
    pub wave_complexity: f64,

    /// Fundamental cycles per measure
    pub base_frequency: f64,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        ConductorConfig {
            wave_strength: None,
            wave_complexity: 0.8,
            base_frequency: BASE_FREQUENCY,
        }
    }
}

/// Structure and map figures for reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConductorStats {
    pub phrase_count: usize,
    pub cadence_count: usize,
    pub measure_count: usize,
    pub avg_wave_amplitude: f64,
    pub max_acceleration: f64,
    pub max_delay: f64,
    pub synthetic_structure: bool,
    pub tier: MapTier,
}

/// Builds and holds the agogic map for one run
#[derive(Debug, Clone)]
pub struct OrchestralConductor {
    expressiveness: f64,
    wave_strength: f64,
    config: ConductorConfig,
    structure: MusicalStructure,
    map: OrchestralMap,
}

impl OrchestralConductor {
    pub fn new(expressiveness: f64, rubato: f64, config: ConductorConfig) -> Self {
        let wave_strength = config.wave_strength.unwrap_or(rubato * RUBATO_WAVE_SCALE);
        OrchestralConductor {
            expressiveness,
            wave_strength,
            config,
            structure: MusicalStructure::synthetic(0),
            map: OrchestralMap::default(),
        }
    }

    /// Aggregate voice phrases; synthesizes 8-measure phrasing when none agree
    pub fn analyze_structure(&mut self, voices: &[Voice], ticks_per_beat: u32, sink: &mut dyn TraceSink) {
        let last_measure = structure::last_note_measure(voices, ticks_per_beat);

        self.structure = match analyze_structure(voices, ticks_per_beat) {
            Ok(Some(structure)) => structure,
            Ok(None) => {
                sink.warn(Stage::Structure, "No phrase data in any voice, using synthetic structure");
                MusicalStructure::synthetic(last_measure + 1)
            }
            Err(e) => {
                sink.record(
                    TraceBuilder::stage(Stage::Structure)
                        .error(format!("Structure analysis failed: {}", e))
                        .with_data(json!({ "fallback_measures": (last_measure + 1).max(16) })),
                );
                MusicalStructure::synthetic(last_measure + 1)
            }
        };

        sink.record(
            TraceBuilder::stage(Stage::Structure)
                .info(format!(
                    "Structure: {} phrases, {} cadences over {} measures",
                    self.structure.phrase_count(),
                    self.structure.cadence_count(),
                    self.structure.measure_count
                ))
                .with_data(json!({ "synthetic": self.structure.synthetic })),
        );
    }

    /// Build the map from the current structure
    pub fn create_agogic_map(&mut self, rng: &mut impl Rng, sink: &mut dyn TraceSink) {
        let shape = WaveShape {
            amplitude: self.wave_strength,
            complexity: self.config.wave_complexity,
            frequency: self.config.base_frequency,
            expressiveness: self.expressiveness,
        };
        self.map = build_map(&self.structure, &shape, rng);

        let stats = self.map.stats();
        if self.map.tier() != MapTier::Full {
            sink.warn(Stage::AgogicMap, "Agogic map degraded to a fallback wave");
        }
        sink.record(
            TraceBuilder::stage(Stage::AgogicMap)
                .info(format!(
                    "Agogic map: {} measures, avg amplitude {:.2}",
                    stats.measure_count, stats.avg_wave_amplitude
                ))
                .with_data(json!({
                    "tier": self.map.tier(),
                    "max_acceleration": stats.max_acceleration,
                    "max_delay": stats.max_delay,
                })),
        );
    }

    /// Timing bias for a measure and position within it
    pub fn timing_direction(&self, measure: u32, beat: Option<f64>) -> f64 {
        self.map.timing_direction(measure, beat)
    }

    pub fn structure(&self) -> &MusicalStructure {
        &self.structure
    }

    pub fn map(&self) -> &OrchestralMap {
        &self.map
    }

    pub fn wave_strength(&self) -> f64 {
        self.wave_strength
    }

    pub fn stats(&self) -> ConductorStats {
        let map = self.map.stats();
        ConductorStats {
            phrase_count: self.structure.phrase_count(),
            cadence_count: self.structure.cadence_count(),
            measure_count: map.measure_count,
            avg_wave_amplitude: map.avg_wave_amplitude,
            max_acceleration: map.max_acceleration,
            max_delay: map.max_delay,
            synthetic_structure: self.structure.synthetic,
            tier: self.map.tier(),
        }
    }
}
