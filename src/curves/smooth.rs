// Curve smoothing - neighbor-weighted passes over sampled values
// Pure function: the input is never modified, marked indices are kept as is

use std::collections::BTreeSet;

/// Weight of the value itself in one pass
pub const CENTER_WEIGHT: f64 = 0.6;

/// Weight of each direct neighbor in one pass
pub const NEIGHBOR_WEIGHT: f64 = 0.2;

/// Smooth `values` over `passes` passes
///
/// Each pass replaces every interior value not in `preserved` with
/// 0.6 x itself + 0.2 x each neighbor, reading only the previous pass.
/// The first and last values never move.
pub fn smooth(values: &[f64], preserved: &BTreeSet<usize>, passes: usize) -> Vec<f64> {
    let mut current = values.to_vec();
    if current.len() < 3 {
        return current;
    }

    for _ in 0..passes {
        let previous = current.clone();
        for i in 1..previous.len() - 1 {
            if preserved.contains(&i) {
                continue;
            }
            current[i] =
                CENTER_WEIGHT * previous[i] + NEIGHBOR_WEIGHT * previous[i - 1] + NEIGHBOR_WEIGHT * previous[i + 1];
        }
    }

    current
}
