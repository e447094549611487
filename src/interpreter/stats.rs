// Interpretation statistics - what the run changed and what it had to repair
// Gathered once at finalization from analyzed voices and the stage reports

use serde::{Deserialize, Serialize};

use crate::model::{Voice, VoiceRole};
use crate::rules::{RuleStats, ValidationReport};

/// Problems absorbed while building voices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Events dropped for a missing or out-of-range field
    pub skipped_events: usize,

    /// Durations raised to 1 tick
    pub zero_duration_corrections: usize,

    /// Voices excluded from interpretation
    pub failed_analyses: usize,
}

/// Summary figures of one interpretation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterpretationStats {
    pub total_notes: usize,
    pub adjusted_notes: usize,

    pub melody_voices: usize,
    pub bass_voices: usize,
    pub inner_voices: usize,
    pub unknown_voices: usize,

    pub skipped_events: usize,
    pub zero_duration_corrections: usize,
    pub failed_analyses: usize,

    pub rule_applications: usize,
    pub rule_failures: usize,

    pub corrected_durations: usize,
    pub critical_corrections: usize,
    pub start_clamps: usize,

    pub avg_velocity_change: f64,

    /// Mean signed timing change in ticks
    pub avg_timing_change: f64,
    pub avg_duration_change_pct: f64,

    pub max_velocity_increase: i32,

    /// Largest positive timing change in ticks
    pub max_delay: i64,

    /// Most negative timing change in ticks (zero or negative)
    pub max_acceleration: i64,

    /// Largest shortening in percent of the original (zero or positive)
    pub max_duration_reduction_pct: f64,

    pub positive_timing_pct: f64,
    pub negative_timing_pct: f64,
    pub zero_timing_pct: f64,
}

impl InterpretationStats {
    /// Collect figures over every analyzed voice
    pub fn collect(voices: &[Voice], load: &LoadReport, rules: &RuleStats, validation: &ValidationReport) -> Self {
        let mut stats = InterpretationStats {
            skipped_events: load.skipped_events,
            zero_duration_corrections: load.zero_duration_corrections,
            failed_analyses: load.failed_analyses,
            rule_applications: rules.total_applications,
            rule_failures: rules.total_failures,
            corrected_durations: validation.corrected(),
            critical_corrections: validation.critical_corrections,
            start_clamps: validation.start_clamps,
            ..Default::default()
        };

        let mut velocity_sum = 0i64;
        let mut timing_sum = 0i64;
        let mut duration_sum = 0.0;
        let (mut positive, mut negative, mut zero) = (0usize, 0usize, 0usize);

        for voice in voices.iter().filter(|v| v.analyzed) {
            match voice.role {
                VoiceRole::Melody => stats.melody_voices += 1,
                VoiceRole::Bass => stats.bass_voices += 1,
                VoiceRole::Inner => stats.inner_voices += 1,
                VoiceRole::Unknown => stats.unknown_voices += 1,
            }

            for note in &voice.notes {
                stats.total_notes += 1;
                if note.is_adjusted() {
                    stats.adjusted_notes += 1;
                }

                let velocity = note.velocity_change();
                let timing = note.timing_change();
                let duration = note.duration_change_pct();
                velocity_sum += velocity as i64;
                timing_sum += timing;
                duration_sum += duration;

                stats.max_velocity_increase = stats.max_velocity_increase.max(velocity);
                stats.max_delay = stats.max_delay.max(timing);
                stats.max_acceleration = stats.max_acceleration.min(timing);
                stats.max_duration_reduction_pct = stats.max_duration_reduction_pct.max(-duration);

                match timing.signum() {
                    1 => positive += 1,
                    -1 => negative += 1,
                    _ => zero += 1,
                }
            }
        }

        if stats.total_notes > 0 {
            let n = stats.total_notes as f64;
            stats.avg_velocity_change = velocity_sum as f64 / n;
            stats.avg_timing_change = timing_sum as f64 / n;
            stats.avg_duration_change_pct = duration_sum / n;
            stats.positive_timing_pct = positive as f64 / n * 100.0;
            stats.negative_timing_pct = negative as f64 / n * 100.0;
            stats.zero_timing_pct = zero as f64 / n * 100.0;
        }

        stats
    }

    /// Share of notes that ended up changed, in percent
    pub fn adjusted_pct(&self) -> f64 {
        if self.total_notes == 0 {
            0.0
        } else {
            self.adjusted_notes as f64 / self.total_notes as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Note, VoiceKey};

    fn analyzed(role: VoiceRole, notes: Vec<Note>) -> Voice {
        let mut voice = Voice::with_notes(VoiceKey::new(0, 0), notes);
        voice.role = role;
        voice.analyzed = true;
        voice
    }

    #[test]
    fn test_collect_changes() {
        let mut late = Note::new(72, 80, 0, 400, 0, 0);
        late.adjusted_start = 12;
        late.adjusted_velocity = 90;
        let mut early = Note::new(74, 80, 480, 400, 0, 0);
        early.adjusted_start = 470;
        early.adjusted_duration = 300;
        let still = Note::new(76, 80, 960, 400, 0, 0);
        let still_too = Note::new(48, 80, 0, 400, 1, 0);

        let voices = vec![
            analyzed(VoiceRole::Melody, vec![late, early, still]),
            analyzed(VoiceRole::Bass, vec![still_too]),
        ];
        let stats = InterpretationStats::collect(
            &voices,
            &LoadReport::default(),
            &RuleStats::default(),
            &ValidationReport::default(),
        );

        assert_eq!(stats.total_notes, 4);
        assert_eq!(stats.adjusted_notes, 2);
        assert_eq!(stats.melody_voices, 1);
        assert_eq!(stats.bass_voices, 1);
        assert_eq!(stats.max_velocity_increase, 10);
        assert_eq!(stats.max_delay, 12);
        assert_eq!(stats.max_acceleration, -10);
        assert!((stats.max_duration_reduction_pct - 25.0).abs() < 1e-9);
        assert!((stats.avg_timing_change - 0.5).abs() < 1e-9);
        assert!((stats.positive_timing_pct - 25.0).abs() < 1e-9);
        assert!((stats.negative_timing_pct - 25.0).abs() < 1e-9);
        assert!((stats.zero_timing_pct - 50.0).abs() < 1e-9);
        assert!((stats.adjusted_pct() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_voices_excluded() {
        let mut failed = Voice::with_notes(VoiceKey::new(1, 0), vec![Note::new(60, 80, 0, 480, 1, 0)]);
        failed.analyzed = false;
        let load = LoadReport {
            skipped_events: 2,
            zero_duration_corrections: 1,
            failed_analyses: 1,
        };
        let stats = InterpretationStats::collect(&[failed], &load, &RuleStats::default(), &ValidationReport::default());

        assert_eq!(stats.total_notes, 0);
        assert_eq!(stats.unknown_voices, 0);
        assert_eq!(stats.skipped_events, 2);
        assert_eq!(stats.failed_analyses, 1);
        assert_eq!(stats.avg_velocity_change, 0.0);
    }
}
