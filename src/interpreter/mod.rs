// Interpreter - drives one run from raw events to an interpreted performance
// Loaded -> StructureAnalyzed -> RulesApplied -> Validated -> Finalized

pub mod stats;

pub use stats::{InterpretationStats, LoadReport};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::analysis::{Meter, VoiceAnalyzer};
use crate::conductor::{ConductorStats, OrchestralConductor, OrchestralMap};
use crate::config::{ConfigError, InterpreterConfig};
use crate::model::{Note, RawNoteEvent, Voice, VoiceKey};
use crate::pipeline::{Stage, TraceBuilder, TraceSink};
use crate::rules::{validate_voices, InterpretationContext, RuleManager, RuleStats, ValidationReport};

/// Errors that stop a run
#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("No valid notes to interpret")]
    NoNotes,

    #[error("Ticks per beat must be positive")]
    ZeroResolution,

    #[error("Cannot {operation} while {state}")]
    InvalidTransition {
        state: InterpreterState,
        operation: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Lifecycle of an interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterState {
    Loaded,
    StructureAnalyzed,
    RulesApplied,
    Validated,
    Finalized,
}

impl InterpreterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpreterState::Loaded => "loaded",
            InterpreterState::StructureAnalyzed => "structure_analyzed",
            InterpreterState::RulesApplied => "rules_applied",
            InterpreterState::Validated => "validated",
            InterpreterState::Finalized => "finalized",
        }
    }
}

impl fmt::Display for InterpreterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct Interpretation {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub ticks_per_beat: u32,
    pub voices: Vec<Voice>,
    pub map: OrchestralMap,
    pub conductor: ConductorStats,
    pub rules: RuleStats,
    pub validation: ValidationReport,
    pub stats: InterpretationStats,
}

impl Interpretation {
    pub fn voice(&self, key: VoiceKey) -> Option<&Voice> {
        self.voices.iter().find(|v| v.key == key)
    }

    /// Every note of every voice
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.voices.iter().flat_map(|v| v.notes.iter())
    }
}

/// State machine for one interpretation run
pub struct Interpreter {
    config: InterpreterConfig,
    ticks_per_beat: u32,
    voices: Vec<Voice>,
    state: InterpreterState,
    manager: RuleManager,
    conductor: OrchestralConductor,
    rng: StdRng,

    /// Measure -> timing bias, filled on first use within this run
    bias_cache: BTreeMap<u32, f64>,
    load: LoadReport,
    validation: ValidationReport,
}

impl Interpreter {
    /// Build and analyze voices from raw events
    ///
    /// Invalid events are skipped and counted. The run fails only when the
    /// resolution is zero or no note could be built.
    pub fn load(
        events: &[RawNoteEvent],
        ticks_per_beat: u32,
        config: InterpreterConfig,
        sink: &mut dyn TraceSink,
    ) -> Result<Self, InterpretError> {
        if ticks_per_beat == 0 {
            return Err(InterpretError::ZeroResolution);
        }
        config.validate()?;
        let manager = RuleManager::from_config(&config.rules)?;

        let mut load = LoadReport::default();
        let mut grouped: BTreeMap<VoiceKey, Vec<Note>> = BTreeMap::new();

        for (index, raw) in events.iter().enumerate() {
            match Note::from_raw(raw) {
                Ok((note, corrected)) => {
                    if corrected {
                        load.zero_duration_corrections += 1;
                        sink.record(
                            TraceBuilder::stage(Stage::Load)
                                .warn("Non-positive duration raised to 1 tick")
                                .with_data(json!({ "event": index, "duration": raw.duration })),
                        );
                    }
                    grouped.entry(raw.voice_key()).or_default().push(note);
                }
                Err(e) => {
                    load.skipped_events += 1;
                    sink.record(
                        TraceBuilder::stage(Stage::Load)
                            .warn(format!("Skipping event: {}", e))
                            .with_data(json!({ "event": index })),
                    );
                }
            }
        }

        if grouped.is_empty() {
            return Err(InterpretError::NoNotes);
        }

        let analyzer = VoiceAnalyzer::new(config.analyzer.clone());
        let mut voices = Vec::with_capacity(grouped.len());
        for (key, notes) in grouped {
            let mut voice = Voice::with_notes(key, notes);
            if let Err(e) = analyzer.analyze(&mut voice, ticks_per_beat) {
                load.failed_analyses += 1;
                voice.analyzed = false;
                sink.record(
                    TraceBuilder::stage(Stage::Analysis)
                        .warn(format!("Voice analysis failed: {}", e))
                        .with_data(json!({ "track": key.track, "channel": key.channel })),
                );
            }
            voices.push(voice);
        }

        sink.record(
            TraceBuilder::stage(Stage::Load)
                .info(format!(
                    "Loaded {} voices from {} events",
                    voices.len(),
                    events.len()
                ))
                .with_data(json!({
                    "skipped_events": load.skipped_events,
                    "zero_duration_corrections": load.zero_duration_corrections,
                    "failed_analyses": load.failed_analyses,
                })),
        );

        let strengths = config.strengths;
        let conductor = OrchestralConductor::new(strengths.expressiveness, strengths.rubato, config.conductor.clone());
        let rng = StdRng::seed_from_u64(config.seed);

        Ok(Interpreter {
            config,
            ticks_per_beat,
            voices,
            state: InterpreterState::Loaded,
            manager,
            conductor,
            rng,
            bias_cache: BTreeMap::new(),
            load,
            validation: ValidationReport::default(),
        })
    }

    pub fn state(&self) -> InterpreterState {
        self.state
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load
    }

    pub fn conductor(&self) -> &OrchestralConductor {
        &self.conductor
    }

    /// Rule registry, adjustable until rules are applied
    pub fn rules_mut(&mut self) -> &mut RuleManager {
        &mut self.manager
    }

    fn expect_state(&self, expected: InterpreterState, operation: &'static str) -> Result<(), InterpretError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(InterpretError::InvalidTransition {
                state: self.state,
                operation,
            })
        }
    }

    /// Aggregate structure and build the agogic map
    pub fn analyze_structure(&mut self, sink: &mut dyn TraceSink) -> Result<(), InterpretError> {
        self.expect_state(InterpreterState::Loaded, "analyze structure")?;
        self.conductor.analyze_structure(&self.voices, self.ticks_per_beat, sink);
        self.conductor.create_agogic_map(&mut self.rng, sink);
        self.state = InterpreterState::StructureAnalyzed;
        Ok(())
    }

    /// Apply every role rule to every note of every analyzed voice
    pub fn apply_rules(&mut self, sink: &mut dyn TraceSink) -> Result<(), InterpretError> {
        self.expect_state(InterpreterState::StructureAnalyzed, "apply rules")?;

        let meter = Meter::common(self.ticks_per_beat);
        let strengths = self.config.strengths;
        let range = self.config.timing_range_beats;
        let conductor = &self.conductor;
        let mut applied = 0;

        for voice in self.voices.iter_mut().filter(|v| v.analyzed) {
            self.manager.begin_voice(voice.role);

            for index in 0..voice.notes.len() {
                let note = &voice.notes[index];
                let measure = meter.measure_of(note.original_start());
                let beat = note.metric_position;
                let bias = *self
                    .bias_cache
                    .entry(measure)
                    .or_insert_with(|| conductor.timing_direction(measure, Some(beat)));

                let ctx = InterpretationContext::with_timing_range(self.ticks_per_beat, strengths, bias, range);
                applied += self
                    .manager
                    .apply_to_note(voice.role, &mut voice.notes, index, &ctx, &mut self.rng, sink);
            }
        }

        let stats = self.manager.stats();
        sink.record(
            TraceBuilder::stage(Stage::Rules)
                .info(format!("Applied {} rule adjustments", applied))
                .with_data(json!({
                    "failures": stats.total_failures,
                    "cached_measures": self.bias_cache.len(),
                })),
        );

        self.state = InterpreterState::RulesApplied;
        Ok(())
    }

    /// Run the conductor and the rule engine
    pub fn interpret(&mut self, sink: &mut dyn TraceSink) -> Result<(), InterpretError> {
        self.analyze_structure(sink)?;
        self.apply_rules(sink)
    }

    /// Enforce duration floors after rule application
    pub fn validate(&mut self, sink: &mut dyn TraceSink) -> Result<&ValidationReport, InterpretError> {
        self.expect_state(InterpreterState::RulesApplied, "validate")?;
        self.validation = validate_voices(&mut self.voices, self.ticks_per_beat, &self.config.validation);

        let report = &self.validation;
        if report.critical_corrections > 0 {
            sink.warn(Stage::Validation, "Critical duration corrections were needed");
        }
        sink.record(
            TraceBuilder::stage(Stage::Validation)
                .info(format!(
                    "Checked {} notes, corrected {}",
                    report.notes_checked,
                    report.corrected()
                ))
                .with_data(json!({
                    "critical": report.critical_corrections,
                    "start_clamps": report.start_clamps,
                    "min_duration_before": report.min_duration_before,
                    "min_duration_after": report.min_duration_after,
                })),
        );

        self.state = InterpreterState::Validated;
        Ok(&self.validation)
    }

    /// Hand out the interpreted voices and the run reports
    pub fn finalize(&mut self) -> Result<Interpretation, InterpretError> {
        self.expect_state(InterpreterState::Validated, "finalize")?;

        let voices = std::mem::take(&mut self.voices);
        let validation = std::mem::take(&mut self.validation);
        let rules = self.manager.stats().clone();
        let stats = InterpretationStats::collect(&voices, &self.load, &rules, &validation);

        self.state = InterpreterState::Finalized;
        Ok(Interpretation {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            ticks_per_beat: self.ticks_per_beat,
            voices,
            map: self.conductor.map().clone(),
            conductor: self.conductor.stats(),
            rules,
            validation,
            stats,
        })
    }
}

/// Load, interpret, validate and finalize in one call
pub fn run(
    events: &[RawNoteEvent],
    ticks_per_beat: u32,
    config: InterpreterConfig,
    sink: &mut dyn TraceSink,
) -> Result<Interpretation, InterpretError> {
    let mut interpreter = Interpreter::load(events, ticks_per_beat, config, sink)?;
    interpreter.interpret(sink)?;
    interpreter.validate(sink)?;
    interpreter.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VoiceRole;
    use crate::pipeline::{MemorySink, NullSink, TraceLevel};

    const TPB: u32 = 480;

    /// Melody, bass and inner voice over eight measures of quarter notes
    fn ensemble() -> Vec<RawNoteEvent> {
        let melody = [72u8, 74, 76, 77, 79, 81, 79, 77];
        let bass = [36u8, 43, 41, 38];
        let inner = [60u8, 64, 62, 65];
        let mut events = Vec::new();
        for i in 0..32i64 {
            let start = i * TPB as i64;
            events.push(RawNoteEvent::new(melody[i as usize % 8], 80, start, 440, 0, 0));
            events.push(RawNoteEvent::new(bass[i as usize % 4], 70, start, 200, 1, 0));
            events.push(RawNoteEvent::new(inner[i as usize % 4], 60, start, 460, 2, 0));
        }
        events
    }

    fn full_run(config: InterpreterConfig) -> Interpretation {
        run(&ensemble(), TPB, config, &mut NullSink).unwrap()
    }

    #[test]
    fn test_load_groups_voices() {
        let interpreter = Interpreter::load(&ensemble(), TPB, InterpreterConfig::default(), &mut NullSink).unwrap();
        assert_eq!(interpreter.state(), InterpreterState::Loaded);

        let roles: Vec<VoiceRole> = interpreter.voices().iter().map(|v| v.role).collect();
        assert_eq!(roles, vec![VoiceRole::Melody, VoiceRole::Bass, VoiceRole::Inner]);
        assert!(interpreter.voices().iter().all(|v| v.analyzed && v.len() == 32));
    }

    #[test]
    fn test_load_skips_invalid_events() {
        let mut events = ensemble();
        events.push(RawNoteEvent {
            pitch: None,
            ..RawNoteEvent::new(60, 80, 0, 100, 0, 0)
        });
        events.push(RawNoteEvent::new(60, 80, -5, 100, 0, 0));
        events.push(RawNoteEvent::new(62, 80, 100, 0, 0, 0));

        let mut sink = MemorySink::new();
        let interpreter = Interpreter::load(&events, TPB, InterpreterConfig::default(), &mut sink).unwrap();

        let report = interpreter.load_report();
        assert_eq!(report.skipped_events, 2);
        assert_eq!(report.zero_duration_corrections, 1);
        assert_eq!(sink.stage(Stage::Load).filter(|e| e.level == TraceLevel::Warn).count(), 3);
        assert_eq!(interpreter.voices()[0].len(), 33);
    }

    #[test]
    fn test_no_notes_is_fatal() {
        assert!(matches!(
            Interpreter::load(&[], TPB, InterpreterConfig::default(), &mut NullSink),
            Err(InterpretError::NoNotes)
        ));

        let invalid = vec![RawNoteEvent {
            start: None,
            ..RawNoteEvent::new(60, 80, 0, 100, 0, 0)
        }];
        assert!(matches!(
            Interpreter::load(&invalid, TPB, InterpreterConfig::default(), &mut NullSink),
            Err(InterpretError::NoNotes)
        ));

        assert!(matches!(
            Interpreter::load(&ensemble(), 0, InterpreterConfig::default(), &mut NullSink),
            Err(InterpretError::ZeroResolution)
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = InterpreterConfig::default();
        config.strengths.dynamics = 2.0;
        assert!(matches!(
            Interpreter::load(&ensemble(), TPB, config, &mut NullSink),
            Err(InterpretError::Config(ConfigError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_out_of_order_operations() {
        let mut interpreter = Interpreter::load(&ensemble(), TPB, InterpreterConfig::default(), &mut NullSink).unwrap();

        assert!(matches!(
            interpreter.apply_rules(&mut NullSink),
            Err(InterpretError::InvalidTransition {
                state: InterpreterState::Loaded,
                ..
            })
        ));
        assert!(interpreter.validate(&mut NullSink).is_err());
        assert!(interpreter.finalize().is_err());

        interpreter.interpret(&mut NullSink).unwrap();
        assert!(interpreter.analyze_structure(&mut NullSink).is_err());
        interpreter.validate(&mut NullSink).unwrap();
        interpreter.finalize().unwrap();

        assert_eq!(interpreter.state(), InterpreterState::Finalized);
        assert!(matches!(
            interpreter.finalize(),
            Err(InterpretError::InvalidTransition {
                state: InterpreterState::Finalized,
                operation: "finalize",
            })
        ));
    }

    #[test]
    fn test_originals_untouched() {
        let events = ensemble();
        let result = full_run(InterpreterConfig::default());

        for voice in &result.voices {
            let mut expected: Vec<&RawNoteEvent> =
                events.iter().filter(|e| e.voice_key() == voice.key).collect();
            expected.sort_by_key(|e| (e.start, e.pitch));
            for (note, raw) in voice.notes.iter().zip(expected) {
                assert_eq!(Some(note.pitch), raw.pitch);
                assert_eq!(Some(note.original_velocity()), raw.velocity);
                assert_eq!(Some(note.original_start()), raw.start);
                assert_eq!(Some(note.original_duration()), raw.duration);
            }
        }
        assert!(result.stats.adjusted_notes > 0);
    }

    #[test]
    fn test_disabled_rules_leave_notes_unchanged() {
        let mut sink = NullSink;
        let mut interpreter = Interpreter::load(&ensemble(), TPB, InterpreterConfig::default(), &mut sink).unwrap();
        interpreter.rules_mut().disable_all();
        interpreter.interpret(&mut sink).unwrap();
        interpreter.validate(&mut sink).unwrap();
        let result = interpreter.finalize().unwrap();

        assert!(result.notes().all(|n| !n.is_adjusted()));
        assert_eq!(result.stats.adjusted_notes, 0);
        assert_eq!(result.rules.total_applications, 0);
        assert!(result.validation.is_clean());
    }

    #[test]
    fn test_duration_floor_holds() {
        let mut config = InterpreterConfig::default();
        config.strengths.articulation = 1.0;
        config.strengths.dynamics = 1.0;
        let floors = config.validation.clone();
        let result = full_run(config);

        for note in result.notes() {
            assert!(note.adjusted_duration >= floors.minimum_duration(note.original_duration(), TPB));
            assert!(note.adjusted_start >= 0);
            assert!((1..=127).contains(&note.adjusted_velocity));
        }
    }

    #[test]
    fn test_same_seed_same_performance() {
        let first = full_run(InterpreterConfig::default());
        let second = full_run(InterpreterConfig::default());
        let a: Vec<&Note> = first.notes().collect();
        let b: Vec<&Note> = second.notes().collect();
        assert_eq!(a, b);
        assert_eq!(first.map, second.map);
        assert_ne!(first.run_id, second.run_id);
    }

    #[test]
    fn test_stats_and_reports() {
        let result = full_run(InterpreterConfig::default());
        let stats = &result.stats;

        assert_eq!(stats.total_notes, 96);
        assert_eq!(stats.melody_voices, 1);
        assert_eq!(stats.bass_voices, 1);
        assert_eq!(stats.inner_voices, 1);
        assert_eq!(stats.rule_applications, result.rules.total_applications);
        assert_eq!(stats.corrected_durations, result.validation.corrected());
        let pct = stats.positive_timing_pct + stats.negative_timing_pct + stats.zero_timing_pct;
        assert!((pct - 100.0).abs() < 1e-6);
        assert!(result.map.measure_count() >= 8);
        assert_eq!(result.conductor.measure_count, result.map.measure_count());
        assert!(result.voice(VoiceKey::new(1, 0)).is_some());
    }
}
