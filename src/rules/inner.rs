// Inner voice rules - recede behind melody and bass, keep a gentle flow
// Velocities stay below the outer voices; timing jitter uses half the window

use rand::Rng;

use super::context::InterpretationContext;
use super::params::RuleParams;
use super::rule::{scale_duration, NoteCursor, RuleError, RuleKind};
use crate::model::scale_velocity;

/// Default parameters of the inner voice rules
pub(crate) fn default_params(kind: RuleKind) -> RuleParams {
    match kind {
        RuleKind::InnerBaseVelocity => RuleParams::new().with("velocity_decrease", 0.05),
        RuleKind::InnerContour => RuleParams::new().with("velocity_increase", 0.08),
        RuleKind::InnerConsonant => RuleParams::new()
            .with("length_increase", 0.05)
            .with_list("consonant_intervals", &[3.0, 4.0, 7.0, 8.0, 9.0]),
        RuleKind::InnerTimingFlow => RuleParams::new().with("variation_factor", 0.5),
        RuleKind::InnerShortNote => RuleParams::new()
            .with("short_threshold", 0.25)
            .with("very_short_threshold", 0.125)
            .with("very_short_reduction", 0.02)
            .with("short_reduction", 0.05)
            .with("min_duration", 5.0)
            .with("min_duration_fraction", 0.15),
        _ => RuleParams::new(),
    }
}

/// Lower every inner note slightly
pub fn base_velocity(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let decrease = params.number("velocity_decrease")?;
    let dynamics = ctx.dynamics();
    let note = cursor.note_mut();
    note.adjusted_velocity = scale_velocity(note.original_velocity(), 1.0 - decrease * dynamics);
    Ok(true)
}

/// Bring out local peaks and valleys of the inner line
pub fn contour(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let increase = params.number("velocity_increase")?;

    let pitch = cursor.note().pitch;
    let (Some(prev), Some(next)) = (cursor.prev().map(|n| n.pitch), cursor.next().map(|n| n.pitch)) else {
        return Ok(false);
    };
    let peak = pitch > prev && pitch > next;
    let valley = pitch < prev && pitch < next;
    if !peak && !valley {
        return Ok(false);
    }

    let dynamics = ctx.dynamics();
    let note = cursor.note_mut();
    note.adjusted_velocity = scale_velocity(note.adjusted_velocity, 1.0 + increase * dynamics);
    Ok(true)
}

/// Hold notes reached by a consonant interval a little longer
pub fn consonant(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
) -> Result<bool, RuleError> {
    let increase = params.number("length_increase")?;
    let intervals = params.list("consonant_intervals")?;

    let Some(prev) = cursor.prev().map(|n| n.pitch) else {
        return Ok(false);
    };
    let interval = (cursor.note().pitch as i32 - prev as i32).abs() % 12;
    if !intervals.iter().any(|&i| i.round() as i32 == interval) {
        return Ok(false);
    }

    let articulation = ctx.articulation();
    let note = cursor.note_mut();
    note.adjusted_duration = scale_duration(note.adjusted_duration, 1.0 + increase * articulation, 0);
    Ok(true)
}

/// Tiny random timing variation within half of the biased window
pub fn timing_flow(
    cursor: &mut NoteCursor<'_>,
    params: &RuleParams,
    ctx: &InterpretationContext,
    rng: &mut impl Rng,
) -> Result<bool, RuleError> {
    let factor = params.number("variation_factor")?.abs();

    let low = ctx.max_acceleration as f64 * factor;
    let high = ctx.max_delay as f64 * factor;
    if low >= high {
        return Ok(false);
    }

    let shift = rng.random_range(low..=high).round() as i64;
    if shift == 0 {
        return Ok(false);
    }
    cursor.note_mut().adjusted_start += shift;
    Ok(true)
}

/// Barely shorten short inner notes
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
