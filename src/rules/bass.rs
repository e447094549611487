// Bass rules - stability on strong beats and pulse on repeated notes
// Repetition tracking lives in the rule state and resets per voice

use rand::Rng;

use super::context::InterpretationContext;
use super::params::RuleParams;
use super::rule::{scale_duration, NoteCursor, RuleError, RuleKind, RuleState};
use crate::model::scale_velocity;

/// Default parameters of the bass rules
pub(crate) fn default_params(kind: RuleKind) -> RuleParams {
    match kind {
        RuleKind::BassDownbeat => RuleParams::new()
            .with("delay_factor", 0.3)
            .with("velocity_increase", 0.08),
        RuleKind::BassShort => RuleParams::new()
            .with("short_threshold", 0.5)
            .with("very_short_threshold", 0.25)
            .with("very_short_reduction", 0.06)
            .with("short_reduction", 0.08)
            .with("min_duration", 4.0)
            .with("min_duration_fraction", 0.12),
        RuleKind::BassRepeated => RuleParams::new()
            .with("velocity_variation", 0.05)
            .with("duration_variation", 0.03)
            .with("variation_min_beats", 0.25)
            .with("min_duration", 4.0)
            .with("min_duration_fraction", 0.15)
            .with("acceleration_factor", -0.04)
            .with("max_acceleration", -0.2)
            .with("repetition_threshold", 3.0)
            .with("boost_step", 0.03)
            .with("max_boost", 0.15),
        RuleKind::BassPhraseEnd => RuleParams::new()
            .with("position_threshold", 0.9)
            .with("length_threshold_beats", 1.0)
            .with("length_increase", 0.15),
        _ => RuleParams::new(),
    }
}

/// Anchor the bass on strong beats
pub fn downbeat_stability(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let delay_factor = params.number("delay_factor")?;
    let velocity_increase = params.number("velocity_increase")?;

    if !cursor.note().is_downbeat {
        return Ok(false);
    }

    let delay = ctx.timing_adjustment(delay_factor);
    let dynamics = ctx.dynamics();
    let note = cursor.note_mut();
    note.adjusted_start += delay;
    note.adjusted_velocity = scale_velocity(note.original_velocity(), 1.0 + velocity_increase * dynamics);
    Ok(true)
}

/// Shorten short bass notes gently, never below an absolute floor
pub fn short_note(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let short_threshold = params.number("short_threshold")?;
    let very_short_threshold = params.number("very_short_threshold")?;
    let very_short_reduction = params.number("very_short_reduction")?;
    let short_reduction = params.number("short_reduction")?;
    let min_duration = params.number("min_duration")? as i64;
    let min_fraction = params.number("min_duration_fraction")?;

    let original = cursor.note().original_duration();
    let tpb = ctx.tpb();
    if original as f64 >= tpb * short_threshold {
        return Ok(false);
    }

    let reduction = if (original as f64) < tpb * very_short_threshold {
        very_short_reduction
    } else {
        short_reduction
    };
    let floor = min_duration.max((original as f64 * min_fraction) as i64);
    let articulation = ctx.articulation();

    let note = cursor.note_mut();
    note.adjusted_duration = scale_duration(note.adjusted_duration, 1.0 - reduction * articulation, floor);
    Ok(true)
}

/// Add pulse to repeated bass notes, driving forward on long repetitions
pub fn repeated_notes(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
    state: &mut RuleState,
    rng: &mut impl Rng,
) -> Result<bool, RuleError> {
    let velocity_variation = params.number("velocity_variation")?.abs();
    let duration_variation = params.number("duration_variation")?.abs();
    let variation_min_beats = params.number("variation_min_beats")?;
    let min_duration = params.number("min_duration")? as i64;
    let min_fraction = params.number("min_duration_fraction")?;
    let acceleration_factor = params.number("acceleration_factor")?;
    let max_acceleration = params.number("max_acceleration")?;
    let threshold = params.number("repetition_threshold")?.max(1.0) as u32;
    let boost_step = params.number("boost_step")?;
    let max_boost = params.number("max_boost")?;

    let pitch = cursor.note().pitch;
    let repeated = cursor.prev().map(|p| p.pitch == pitch).unwrap_or(false);
    if !repeated {
        state.repeat_pitch = None;
        state.repeat_count = 0;
        return Ok(false);
    }

    if state.repeat_pitch == Some(pitch) {
        state.repeat_count += 1;
    } else {
        state.repeat_pitch = Some(pitch);
        state.repeat_count = 1;
    }
    let count = state.repeat_count;

    let jitter = rng.random_range(-velocity_variation..=velocity_variation) * ctx.dynamics();
    let original_duration = cursor.note().original_duration();
    let floor = min_duration.max((original_duration as f64 * min_fraction) as i64);

    let shift = if count >= threshold {
        let repetition = ((count - threshold + 1) as f64 * 0.2).min(1.0);
        let acceleration = (acceleration_factor * repetition * ctx.rubato()).max(max_acceleration);
        ctx.timing_adjustment(acceleration)
    } else {
        0
    };
    let boost = if count > threshold + 1 {
        (boost_step * (count - threshold) as f64).min(max_boost)
    } else {
        0.0
    };
    let duration_factor = if original_duration as f64 > ctx.tpb() * variation_min_beats {
        Some(1.0 + rng.random_range(-duration_variation..=duration_variation) * ctx.articulation())
    } else {
        None
    };

    let note = cursor.note_mut();
    note.adjusted_velocity = scale_velocity(note.original_velocity(), 1.0 + jitter);
    note.adjusted_start += shift;
    if boost > 0.0 {
        note.adjusted_velocity = scale_velocity(note.adjusted_velocity, 1.0 + boost);
    }
    if let Some(factor) = duration_factor {
        let jittered = (note.adjusted_duration as f64 * factor).round() as i64;
        note.adjusted_duration = jittered.max(floor.min(note.adjusted_duration)).max(1);
    }
    Ok(true)
}

/// Sustain long bass notes at the end of a phrase
pub fn phrase_end(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let threshold = params.number("position_threshold")?;
    let length_threshold = params.number("length_threshold_beats")?;
    let length_increase = params.number("length_increase")?;

    let note = cursor.note();
    let at_end = matches!(note.phrase_position, Some(p) if p > threshold);
    if !at_end || note.original_duration() as f64 <= ctx.tpb() * length_threshold {
        return Ok(false);
    }

    let articulation = ctx.articulation();
    let note = cursor.note_mut();
    note.adjusted_duration = scale_duration(note.adjusted_duration, 1.0 + length_increase * articulation, 0);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::VoiceAnalyzer;
    use crate::model::{Note, Voice, VoiceKey};
    use crate::rules::context::ExpressionStrengths;
    use crate::rules::rule::Rule;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ctx() -> InterpretationContext {
        InterpretationContext::new(
            480,
            ExpressionStrengths {
                expressiveness: 1.0,
                rubato: 1.0,
                articulation: 1.0,
                dynamics: 1.0,
            },
            0.0,
        )
    }

    fn bass_line(pitches: &[u8], step: i64, duration: i64) -> Voice {
        let notes = pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| Note::new(p, 90, i as i64 * step, duration, 0, 1))
            .collect();
        let mut voice = Voice::with_notes(VoiceKey::new(0, 1), notes);
        VoiceAnalyzer::default().analyze(&mut voice, 480).unwrap();
        voice
    }

    fn run(rule: &mut Rule, voice: &mut Voice, seed: u64) -> Vec<bool> {
        let mut rng = StdRng::seed_from_u64(seed);
        let ctx = ctx();
        (0..voice.notes.len())
            .map(|i| {
                let mut cursor = NoteCursor::new(&mut voice.notes, i).unwrap();
                rule.apply(&mut cursor, &ctx, &mut rng).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_downbeat_stability() {
        let mut voice = bass_line(&[36, 38, 40, 41], 480, 480);
        let fired = run(&mut Rule::new(RuleKind::BassDownbeat), &mut voice, 0);
        assert_eq!(fired, vec![true, false, true, false]);
        // 0.3 x 48 = 14.4
        assert_eq!(voice.notes[0].adjusted_start, 14);
        assert_eq!(voice.notes[0].adjusted_velocity, 97);
    }

    #[test]
    fn test_short_note_tiers_and_floor() {
        let mut voice = bass_line(&[36, 38, 40], 480, 200);
        run(&mut Rule::new(RuleKind::BassShort), &mut voice, 0);
        // 8% reduction: 184
        assert_eq!(voice.notes[0].adjusted_duration, 184);

        let mut voice = bass_line(&[36, 38, 40], 480, 100);
        run(&mut Rule::new(RuleKind::BassShort), &mut voice, 0);
        // 6% reduction: 94
        assert_eq!(voice.notes[0].adjusted_duration, 94);

        let mut voice = bass_line(&[36, 38, 40], 480, 4);
        run(&mut Rule::new(RuleKind::BassShort), &mut voice, 0);
        assert_eq!(voice.notes[0].adjusted_duration, 4);
    }

    #[test]
    fn test_repeated_notes_accelerate_after_threshold() {
        let mut voice = bass_line(&[36, 36, 36, 36, 36, 36, 36, 38], 240, 200);
        let mut rule = Rule::new(RuleKind::BassRepeated);
        let fired = run(&mut rule, &mut voice, 7);

        assert!(!fired[0]);
        assert!(!fired[7]);
        // the third repetition rounds to no shift, the fourth moves earlier
        for i in 1..=3 {
            assert_eq!(voice.notes[i].timing_change(), 0);
        }
        assert_eq!(voice.notes[4].timing_change(), -1);
        assert_eq!(voice.notes[6].timing_change(), -2);
        for note in &voice.notes {
            assert!(note.timing_change() >= -2);
            assert!(note.adjusted_duration >= 194);
        }
    }

    #[test]
    fn test_repeated_notes_reproducible_with_seed() {
        let mut a = bass_line(&[36, 36, 36, 36, 36], 240, 200);
        let mut b = a.clone();
        run(&mut Rule::new(RuleKind::BassRepeated), &mut a, 42);
        run(&mut Rule::new(RuleKind::BassRepeated), &mut b, 42);
        assert_eq!(a.notes, b.notes);
    }

    #[test]
    fn test_repetition_counter_resets() {
        let mut voice = bass_line(&[36, 36, 36, 38, 36], 240, 200);
        let params = default_params(RuleKind::BassRepeated);
        let ctx = ctx();
        let mut state = RuleState::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut counts = Vec::new();
        for i in 0..voice.notes.len() {
            let mut cursor = NoteCursor::new(&mut voice.notes, i).unwrap();
            repeated_notes(&mut cursor, &params, &ctx, &mut state, &mut rng).unwrap();
            counts.push(state.repeat_count);
        }
        assert_eq!(counts, vec![0, 1, 2, 0, 0]);
    }

    #[test]
    fn test_phrase_end_lengthens_long_notes() {
        let notes = vec![
            Note::new(36, 90, 0, 480, 0, 1),
            Note::new(38, 90, 480, 480, 0, 1),
            Note::new(40, 90, 960, 720, 0, 1),
        ];
        let mut voice = Voice::with_notes(VoiceKey::new(0, 1), notes);
        VoiceAnalyzer::default().analyze(&mut voice, 480).unwrap();
        voice.notes[0].phrase_position = Some(0.0);
        voice.notes[1].phrase_position = Some(0.95);
        voice.notes[2].phrase_position = Some(0.95);

        let fired = run(&mut Rule::new(RuleKind::BassPhraseEnd), &mut voice, 0);
        assert_eq!(fired, vec![false, false, true]);
        assert_eq!(voice.notes[2].adjusted_duration, 828);
    }
}
