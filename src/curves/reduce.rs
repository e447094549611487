// Curve reduction - thins dense curve points with change-rate adaptive gaps
// Shared by the score and organic strategies; only the time base differs

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Curves with this many points or fewer have no important points
pub const MIN_POINTS_FOR_IMPORTANCE: usize = 5;

/// Minimum spacing of kept points for one change-rate tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateTier {
    /// Rate above which the tier applies
    pub rate: f64,
    pub time_gap: f64,
    pub value_diff: u8,
}

/// Adaptive thresholds for one time base
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReductionThresholds {
    pub fast: RateTier,
    pub moderate: RateTier,
    pub slow_time_gap: f64,
    pub slow_value_diff: u8,

    /// Smallest time step used when computing a rate
    pub min_interval: f64,
}

impl ReductionThresholds {
    /// Thresholds for curves timed in ticks
    pub fn ticks() -> Self {
        ReductionThresholds {
            fast: RateTier {
                rate: 0.4,
                time_gap: 4.0,
                value_diff: 2,
            },
            moderate: RateTier {
                rate: 0.2,
                time_gap: 6.0,
                value_diff: 3,
            },
            slow_time_gap: 10.0,
            slow_value_diff: 4,
            min_interval: 1.0,
        }
    }

    /// Thresholds for curves timed in beats
    pub fn beats() -> Self {
        ReductionThresholds {
            fast: RateTier {
                rate: 20.0,
                time_gap: 0.3,
                value_diff: 2,
            },
            moderate: RateTier {
                rate: 10.0,
                time_gap: 0.5,
                value_diff: 3,
            },
            slow_time_gap: 0.8,
            slow_value_diff: 4,
            min_interval: 0.1,
        }
    }

    /// (time gap, value difference) for a change rate
    pub fn select(&self, rate: f64) -> (f64, u8) {
        if rate > self.fast.rate {
            (self.fast.time_gap, self.fast.value_diff)
        } else if rate > self.moderate.rate {
            (self.moderate.time_gap, self.moderate.value_diff)
        } else {
            (self.slow_time_gap, self.slow_value_diff)
        }
    }
}

/// Indices of strict local extrema within +/- `window` neighbors
pub fn important_points(values: &[u8], window: usize) -> BTreeSet<usize> {
    let mut important = BTreeSet::new();
    if values.len() <= MIN_POINTS_FOR_IMPORTANCE || window == 0 || values.len() <= 2 * window {
        return important;
    }

    for i in window..values.len() - window {
        let current = values[i];
        let neighbors = values[i - window..=i + window]
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != window)
            .map(|(_, v)| *v);

        let (mut is_max, mut is_min) = (true, true);
        for v in neighbors {
            is_max &= v < current;
            is_min &= v > current;
        }
        if is_max || is_min {
            important.insert(i);
        }
    }

    important
}

fn is_reversal(values: &[u8], i: usize) -> bool {
    if i == 0 || i + 1 >= values.len() {
        return false;
    }
    let before = values[i] as i32 - values[i - 1] as i32;
    let after = values[i + 1] as i32 - values[i] as i32;
    before * after < 0
}

/// Thin a time-ordered curve
///
/// A point is kept when it is important, far enough in time or value from
/// the last kept point, a direction reversal, or the first or last point.
pub fn reduce(points: &[(f64, u8)], thresholds: &ReductionThresholds, window: usize) -> Vec<(f64, u8)> {
    let values: Vec<u8> = points.iter().map(|(_, v)| *v).collect();
    let important = important_points(&values, window);
    let last_index = points.len().saturating_sub(1);

    let mut kept: Vec<(f64, u8)> = Vec::new();
    for (i, &(time, value)) in points.iter().enumerate() {
        let keep = match kept.last() {
            None => true,
            Some(&(last_time, last_value)) => {
                let dt = time - last_time;
                let dv = value.abs_diff(last_value);
                let rate = dv as f64 / dt.max(thresholds.min_interval);
                let (min_gap, min_diff) = thresholds.select(rate);

                important.contains(&i)
                    || dt >= min_gap
                    || dv >= min_diff
                    || is_reversal(&values, i)
                    || i == last_index
            }
        };
        if keep {
            kept.push((time, value));
        }
    }

    kept
}
