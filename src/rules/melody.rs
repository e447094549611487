// Melody rules - phrasing, contour and metric shaping for the leading voice
// Timing factors are fractions of the context's acceleration/delay window

use super::context::InterpretationContext;
use super::params::RuleParams;
use super::rule::{scale_duration, NoteCursor, RuleError, RuleKind, RuleState};
use crate::model::{clamp_velocity, scale_velocity};

/// Default parameters of the melody rules
pub(crate) fn default_params(kind: RuleKind) -> RuleParams {
    match kind {
        RuleKind::PhraseStart => RuleParams::new()
            .with("position_threshold", 0.1)
            .with("delay_factor", 0.7)
            .with("second_note_factor", -0.3)
            .with("velocity_increase", 0.07)
            .with("second_velocity_increase", 0.03)
            .with("min_duration", 3.0),
        RuleKind::PhraseEnd => RuleParams::new()
            .with("position_threshold", 0.9)
            .with("delay_factor", 0.8)
            .with("length_threshold_beats", 2.0)
            .with("length_increase", 0.1)
            .with("velocity_decrease", 0.05),
        RuleKind::PreLeap => RuleParams::new()
            .with("leap_threshold", 4.0)
            .with("ascending_factor", -0.12)
            .with("descending_factor", 0.15)
            .with("duration_reduction", 0.12)
            .with("landing_accent", 0.12)
            .with("min_duration", 3.0),
        RuleKind::LocalPeak => RuleParams::new()
            .with("delay_factor", 0.9)
            .with("velocity_increase", 0.15),
        RuleKind::Downbeat => RuleParams::new()
            .with("delay_factor", 0.5)
            .with("velocity_increase", 0.1),
        RuleKind::ShortNote => RuleParams::new()
            .with("short_threshold", 0.25)
            .with("very_short_threshold", 0.0625)
            .with("sixteenth_threshold", 0.125)
            .with("very_short_reduction", 0.05)
            .with("short_reduction", 0.08)
            .with("eighth_scale", 0.75)
            .with("min_duration", 2.0)
            .with("min_duration_fraction", 0.5)
            .with("velocity_increase", 0.06),
        RuleKind::LongNote => RuleParams::new()
            .with("long_threshold", 1.0)
            .with("velocity_increase", 0.05),
        RuleKind::Accelerando => RuleParams::new()
            .with("min_interval_sum", 2.0)
            .with("acceleration_factor", -0.7)
            .with("velocity_increase", 0.05),
        RuleKind::SequenceAccel => RuleParams::new()
            .with("window", 5.0)
            .with("min_run", 3.0)
            .with("acceleration_factor", -0.6)
            .with("progression", 0.1)
            .with("max_acceleration", -0.9)
            .with("velocity_step", 0.05),
        RuleKind::Directional => RuleParams::new()
            .with("interval_threshold", 2.0)
            .with("ascending_factor", -0.5)
            .with("descending_factor", 0.4)
            .with("velocity_shift", 0.04)
            .with("scale_interval", 7.0)
            .with("max_multiplier", 1.5),
        _ => RuleParams::new(),
    }
}

/// Delay and accent the opening of a phrase; nudge its second note forward
pub fn phrase_start(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let threshold = params.number("position_threshold")?;
    let delay_factor = params.number("delay_factor")?;
    let second_factor = params.number("second_note_factor")?;
    let velocity_increase = params.number("velocity_increase")?;
    let second_velocity = params.number("second_velocity_increase")?;
    let min_duration = params.number("min_duration")? as i64;

    let Some(position) = cursor.note().phrase_position else {
        return Ok(false);
    };

    if position < threshold {
        let delay = ctx.timing_adjustment(delay_factor);
        let note = cursor.note_mut();
        note.adjusted_start += delay;
        if delay > 0 {
            let floor = min_duration.min(note.adjusted_duration);
            note.adjusted_duration = (note.adjusted_duration - delay).max(floor);
        }
        note.adjusted_velocity = scale_velocity(note.original_velocity(), 1.0 + velocity_increase);
        return Ok(true);
    }

    if position < threshold * 2.0 && cursor.prev().is_some() {
        let shift = ctx.timing_adjustment(second_factor);
        let note = cursor.note_mut();
        note.adjusted_start += shift;
        note.adjusted_velocity = scale_velocity(note.original_velocity(), 1.0 + second_velocity);
        return Ok(true);
    }

    Ok(false)
}

/// Broaden and soften the last notes of a phrase
pub fn phrase_end(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let threshold = params.number("position_threshold")?;
    let delay_factor = params.number("delay_factor")?;
    let length_threshold = params.number("length_threshold_beats")?;
    let length_increase = params.number("length_increase")?;
    let velocity_decrease = params.number("velocity_decrease")?;

    if !matches!(cursor.note().phrase_position, Some(p) if p > threshold) {
        return Ok(false);
    }

    let delay = ctx.timing_adjustment(delay_factor);
    let long = cursor.note().original_duration() as f64 > length_threshold * ctx.tpb();
    let note = cursor.note_mut();

    note.adjusted_start += delay;
    if long {
        note.adjusted_duration = scale_duration(
            note.adjusted_duration,
            1.0 + length_increase * ctx.articulation(),
            0,
        );
    }
    note.adjusted_velocity = scale_velocity(
        note.original_velocity(),
        1.0 - velocity_decrease * ctx.dynamics(),
    );
    Ok(true)
}

/// Prepare melodic leaps: anticipate upward, hold back downward
pub fn pre_leap(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let leap_threshold = params.number("leap_threshold")?;
    let ascending = params.number("ascending_factor")?;
    let descending = params.number("descending_factor")?;
    let reduction = params.number("duration_reduction")?;
    let landing_accent = params.number("landing_accent")?;
    let min_duration = params.number("min_duration")? as i64;

    let interval = match cursor.note().interval_to_next {
        Some(iv) if (iv.abs() as f64) > leap_threshold => iv,
        _ => return Ok(false),
    };
    if cursor.next().is_none() {
        return Ok(false);
    }

    let factor = if interval > 0 { ascending } else { descending };
    let shift = ctx.timing_adjustment(factor);
    let articulation = ctx.articulation();
    let dynamics = ctx.dynamics();

    let note = cursor.note_mut();
    note.adjusted_start += shift;
    note.adjusted_duration = scale_duration(
        note.adjusted_duration,
        1.0 - reduction * articulation,
        min_duration,
    );

    if let Some(next) = cursor.next_mut() {
        next.adjusted_velocity = scale_velocity(next.original_velocity(), 1.0 + landing_accent * dynamics);
    }
    Ok(true)
}

/// Linger on a note higher than both neighbors
pub fn local_peak(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let delay_factor = params.number("delay_factor")?;
    let velocity_increase = params.number("velocity_increase")?;

    let pitch = cursor.note().pitch;
    let is_peak = match (cursor.prev(), cursor.next()) {
        (Some(prev), Some(next)) => pitch > prev.pitch && pitch > next.pitch,
        _ => false,
    };
    if !is_peak {
        return Ok(false);
    }

    let delay = ctx.timing_adjustment(delay_factor);
    let dynamics = ctx.dynamics();
    let note = cursor.note_mut();
    note.adjusted_start += delay;
    note.adjusted_velocity = scale_velocity(note.original_velocity(), 1.0 + velocity_increase * dynamics);
    Ok(true)
}

/// Lean on strong beats
pub fn downbeat(
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

/// Shorten very short notes by tier for clarity
pub fn short_note(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let short_threshold = params.number("short_threshold")?;
    let very_short_threshold = params.number("very_short_threshold")?;
    let sixteenth_threshold = params.number("sixteenth_threshold")?;
    let very_short_reduction = params.number("very_short_reduction")?;
    let short_reduction = params.number("short_reduction")?;
    let eighth_scale = params.number("eighth_scale")?;
    let min_duration = params.number("min_duration")? as i64;
    let min_fraction = params.number("min_duration_fraction")?;
    let velocity_increase = params.number("velocity_increase")?;

    let relative = cursor.note().relative_duration(ctx.ticks_per_beat);
    if relative >= short_threshold {
        return Ok(false);
    }

    let reduction = if relative < very_short_threshold {
        very_short_reduction
    } else if relative < sixteenth_threshold {
        short_reduction
    } else {
        short_reduction * eighth_scale
    };

    let articulation = ctx.articulation();
    let dynamics = ctx.dynamics();
    let note = cursor.note_mut();
    let floor = min_duration.max((ctx.tpb() * relative * min_fraction) as i64);

    note.adjusted_duration = scale_duration(note.adjusted_duration, 1.0 - reduction * articulation, floor);
    note.adjusted_velocity = scale_velocity(note.original_velocity(), 1.0 + velocity_increase * dynamics);
    Ok(true)
}

/// Give weight to notes longer than a beat
pub fn long_note(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let long_threshold = params.number("long_threshold")?;
    let velocity_increase = params.number("velocity_increase")?;

    if cursor.note().relative_duration(ctx.ticks_per_beat) <= long_threshold {
        return Ok(false);
    }

    let dynamics = ctx.dynamics();
    let note = cursor.note_mut();
    note.adjusted_velocity = scale_velocity(note.original_velocity(), 1.0 + velocity_increase * dynamics);
    Ok(true)
}

/// Push forward through a strictly rising three-note run
pub fn accelerando(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let min_interval_sum = params.number("min_interval_sum")?;
    let factor = params.number("acceleration_factor")?;
    let velocity_increase = params.number("velocity_increase")?;

    let pitch = cursor.note().pitch as i32;
    let rising = match (cursor.prev(), cursor.next()) {
        (Some(prev), Some(next)) => {
            let (p, n) = (prev.pitch as i32, next.pitch as i32);
            p < pitch && pitch < n && ((pitch - p) + (n - pitch)) as f64 >= min_interval_sum
        }
        _ => false,
    };
    if !rising {
        return Ok(false);
    }

    let shift = ctx.timing_adjustment(factor);
    let dynamics = ctx.dynamics();
    let note = cursor.note_mut();
    note.adjusted_start += shift;
    note.adjusted_velocity = scale_velocity(note.adjusted_velocity, 1.0 + velocity_increase * dynamics);
    Ok(true)
}

/// Accelerate progressively through repeated interval patterns
pub fn sequence_accel(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
    state: &mut RuleState,
) -> Result<bool, RuleError> {
    let window = params.number("window")?.max(1.0) as usize;
    let min_run = params.number("min_run")?.max(1.0) as usize;
    let factor = params.number("acceleration_factor")?;
    let progression = params.number("progression")?;
    let max_acceleration = params.number("max_acceleration")?;
    let velocity_step = params.number("velocity_step")?;

    let Some(interval) = cursor.note().interval_to_prev else {
        state.intervals.clear();
        return Ok(false);
    };

    state.intervals.push_back(interval);
    while state.intervals.len() > window {
        state.intervals.pop_front();
    }

    let run = state
        .intervals
        .iter()
        .rev()
        .take_while(|&&iv| iv == interval)
        .count();
    if run < min_run {
        return Ok(false);
    }

    let position = (run - 1) as f64;
    let acceleration = (factor * (1.0 + position * progression)).max(max_acceleration);
    let shift = ctx.timing_adjustment(acceleration);

    let note = cursor.note_mut();
    note.adjusted_start += shift;
    note.adjusted_velocity = scale_velocity(note.adjusted_velocity, 1.0 + velocity_step * position);
    Ok(true)
}

/// Accelerate ascending motion, delay descending motion
pub fn directional(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let threshold = params.number("interval_threshold")?;
    let ascending = params.number("ascending_factor")?;
    let descending = params.number("descending_factor")?;
    let velocity_shift = params.number("velocity_shift")?;
    let scale_interval = params.number("scale_interval")?;
    let max_multiplier = params.number("max_multiplier")?;

    let interval = match cursor.note().interval_to_prev {
        Some(iv) if (iv.abs() as f64) >= threshold => iv,
        _ => return Ok(false),
    };

    let (timing_factor, velocity_adjust) = if interval > 0 {
        (ascending, velocity_shift)
    } else {
        (descending, -velocity_shift)
    };
    let multiplier = if scale_interval > 0.0 {
        (interval.abs() as f64 / scale_interval).min(max_multiplier)
    } else {
        max_multiplier
    };

    let shift = ctx.timing_adjustment(timing_factor * multiplier);
    let dynamics = ctx.dynamics();
    let note = cursor.note_mut();
    note.adjusted_start += shift;
    note.adjusted_velocity = clamp_velocity(
        note.adjusted_velocity as f64 * (1.0 + velocity_adjust * multiplier * dynamics),
    );
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

    fn full_strength() -> InterpretationContext {
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

    fn analyzed(notes: Vec<Note>) -> Voice {
        let mut voice = Voice::with_notes(VoiceKey::new(0, 0), notes);
        VoiceAnalyzer::default().analyze(&mut voice, 480).unwrap();
        voice
    }

    fn line(pitches: &[u8], step: i64, duration: i64) -> Voice {
        analyzed(
            pitches
                .iter()
                .enumerate()
                .map(|(i, &p)| Note::new(p, 100, i as i64 * step, duration, 0, 0))
                .collect(),
        )
    }

    fn apply(kind: RuleKind, voice: &mut Voice, index: usize) -> bool {
        let mut rule = Rule::new(kind);
        let mut rng = StdRng::seed_from_u64(1);
        let mut cursor = NoteCursor::new(&mut voice.notes, index).unwrap();
        rule.apply(&mut cursor, &full_strength(), &mut rng).unwrap()
    }

    #[test]
    fn test_short_note_eighth_tier() {
        // An eighth note at 480 tpb is 60 ticks, relative duration 0.125
        let mut voice = line(&[72, 74, 76], 120, 60);
        assert!(apply(RuleKind::ShortNote, &mut voice, 1));
        assert_eq!(voice.notes[1].adjusted_duration, 56);
        assert_eq!(voice.notes[1].adjusted_velocity, 106);
    }

    #[test]
    fn test_short_note_tiers() {
        let mut voice = line(&[72, 74, 76], 120, 20);
        assert!(apply(RuleKind::ShortNote, &mut voice, 1));
        // 20 ticks is below 1/16 beat: 5% reduction
        assert_eq!(voice.notes[1].adjusted_duration, 19);

        let mut voice = line(&[72, 74, 76], 120, 40);
        assert!(apply(RuleKind::ShortNote, &mut voice, 1));
        // 8% reduction: 36.8 -> 37
        assert_eq!(voice.notes[1].adjusted_duration, 37);

        let mut voice = line(&[72, 74, 76], 480, 240);
        assert!(!apply(RuleKind::ShortNote, &mut voice, 1));
    }

    #[test]
    fn test_local_peak_delays_and_accents() {
        let mut voice = line(&[72, 79, 74], 480, 480);
        assert!(apply(RuleKind::LocalPeak, &mut voice, 1));
        let peak = &voice.notes[1];
        // 0.9 x 48 ticks
        assert_eq!(peak.adjusted_start, 480 + 43);
        assert_eq!(peak.adjusted_velocity, 115);
        assert!(!apply(RuleKind::LocalPeak, &mut voice, 0));
    }

    #[test]
    fn test_pre_leap_accents_landing_note() {
        let mut voice = line(&[72, 79, 77], 480, 480);
        assert!(apply(RuleKind::PreLeap, &mut voice, 0));
        // ascending leap accelerates: -0.12 x 48 = -5.76 -> -6
        assert_eq!(voice.notes[0].adjusted_start, -6);
        assert_eq!(voice.notes[0].adjusted_duration, 422);
        assert_eq!(voice.notes[1].adjusted_velocity, 112);
    }

    #[test]
    fn test_downbeat_rule() {
        let mut voice = line(&[72, 74, 76], 480, 480);
        assert!(apply(RuleKind::Downbeat, &mut voice, 0));
        assert_eq!(voice.notes[0].adjusted_start, 24);
        assert_eq!(voice.notes[0].adjusted_velocity, 110);
        assert!(!apply(RuleKind::Downbeat, &mut voice, 1));
    }

    #[test]
    fn test_long_note_rule() {
        let mut voice = line(&[72, 74, 76], 960, 720);
        assert!(apply(RuleKind::LongNote, &mut voice, 0));
        assert_eq!(voice.notes[0].adjusted_velocity, 105);
    }

    #[test]
    fn test_accelerando_needs_rising_run() {
        let mut voice = line(&[72, 74, 76, 74], 480, 480);
        assert!(apply(RuleKind::Accelerando, &mut voice, 1));
        assert_eq!(voice.notes[1].adjusted_start, 480 - 34);
        assert!(!apply(RuleKind::Accelerando, &mut voice, 2));
    }

    #[test]
    fn test_sequence_accel_progression() {
        let mut voice = line(&[72, 74, 76, 78, 80, 82], 240, 240);
        let mut rule = Rule::new(RuleKind::SequenceAccel);
        let mut rng = StdRng::seed_from_u64(1);
        let ctx = full_strength();

        let mut fired = Vec::new();
        for i in 0..voice.notes.len() {
            let mut cursor = NoteCursor::new(&mut voice.notes, i).unwrap();
            fired.push(rule.apply(&mut cursor, &ctx, &mut rng).unwrap());
        }
        assert_eq!(fired, vec![false, false, false, true, true, true]);

        // run of 3: -0.6 x 1.2 = -0.72 of 48 ticks
        assert_eq!(voice.notes[3].timing_change(), -35);
        // run of 5: -0.6 x 1.4 = -0.84, still above the -0.9 cap
        assert_eq!(voice.notes[5].timing_change(), -40);
    }

    #[test]
    fn test_directional_timing() {
        let mut voice = line(&[72, 79, 72], 480, 480);
        assert!(apply(RuleKind::Directional, &mut voice, 1));
        // ascending fifth: multiplier 1.0, -0.5 x 48
        assert_eq!(voice.notes[1].timing_change(), -24);
        assert_eq!(voice.notes[1].adjusted_velocity, 104);

        assert!(apply(RuleKind::Directional, &mut voice, 2));
        assert_eq!(voice.notes[2].timing_change(), 19);
        assert_eq!(voice.notes[2].adjusted_velocity, 96);
    }

    #[test]
    fn test_phrase_start_and_second_note() {
        let pitches = [72, 74, 76, 77, 76, 74, 72, 74, 76, 77, 79];
        let mut voice = line(&pitches, 240, 240);
        assert_eq!(voice.phrases.len(), 3);

        // Phrase 0 is notes 0..=3: note 0 opens it
        assert!(apply(RuleKind::PhraseStart, &mut voice, 0));
        assert_eq!(voice.notes[0].adjusted_start, 34);
        assert_eq!(voice.notes[0].adjusted_duration, 240 - 34);
        assert_eq!(voice.notes[0].adjusted_velocity, 107);
    }

    #[test]
    fn test_phrase_end_softens() {
        let mut voice = line(&[72, 74, 76, 74, 72, 71, 72], 480, 1000);
        // Overlapping long notes never form a phrase; place the note by hand
        voice.notes[5].phrase_position = Some(0.95);
        assert!(apply(RuleKind::PhraseEnd, &mut voice, 5));
        let note = &voice.notes[5];
        assert_eq!(note.adjusted_start, 5 * 480 + 38);
        assert_eq!(note.adjusted_duration, 1100);
        assert_eq!(note.adjusted_velocity, 95);
    }

    #[test]
    fn test_missing_param_is_an_error() {
        let mut voice = line(&[72, 74, 76], 480, 480);
        let mut rule = Rule::new(RuleKind::Downbeat);
        rule.params = RuleParams::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut cursor = NoteCursor::new(&mut voice.notes, 0).unwrap();
        assert!(matches!(
            rule.apply(&mut cursor, &full_strength(), &mut rng),
            Err(RuleError::MissingParam(_))
        ));
    }
}
