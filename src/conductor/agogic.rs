// Agogic map - per-measure timing bias shared by all voices
// Layered sine wave plus structural overlays, with a two-step degradation chain

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use thiserror::Error;

use super::structure::{MeasureSpan, MusicalStructure, DEFAULT_MEASURE_COUNT};

/// Fundamental frequency: roughly one cycle every six to seven measures
pub const BASE_FREQUENCY: f64 = 0.15;

/// Period of the fallback sine wave in measures
pub const SIMPLE_WAVE_PERIOD: f64 = 8.0;

/// Strength of the fallback sine wave relative to the configured strength
pub const SIMPLE_WAVE_SCALE: f64 = 0.7;

/// Value of the last-resort alternating map
pub const ALTERNATING_VALUE: f64 = 0.5;

/// Errors while generating the map
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgogicMapError {
    #[error("Map needs at least one measure")]
    Empty,

    #[error("Non-finite timing bias at measure {measure}")]
    NonFinite { measure: usize },
}

/// Which generator produced the map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapTier {
    Neutral,
    Full,
    SimpleWave,
    Alternating,
}

/// Wave shape parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveShape {
    /// Peak |value| of the base wave
    pub amplitude: f64,

    /// Weight of the harmonics [0.0, 1.0]
    pub complexity: f64,

    /// Fundamental cycles per measure
    pub frequency: f64,

    /// Scales the structural overlays
    pub expressiveness: f64,
}

/// Dense per-measure timing-bias table over [0, measure_count)
///
/// Values lie in [-1.0, 1.0]; positive is delay, negative acceleration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestralMap {
    values: Vec<f64>,
    phrases: Vec<MeasureSpan>,
    cadences: Vec<u32>,
    gravity_centers: BTreeMap<u32, f64>,
    tier: MapTier,
}

/// Summary figures of a map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapStats {
    pub measure_count: usize,
    pub avg_wave_amplitude: f64,
    pub max_acceleration: f64,
    pub max_delay: f64,
}

impl OrchestralMap {
    /// All-zero map without structure
    pub fn neutral(measure_count: usize) -> Self {
        OrchestralMap {
            values: vec![0.0; measure_count.max(1)],
            phrases: Vec::new(),
            cadences: Vec::new(),
            gravity_centers: BTreeMap::new(),
            tier: MapTier::Neutral,
        }
    }

    fn with_values(values: Vec<f64>, structure: &MusicalStructure, tier: MapTier) -> Self {
        OrchestralMap {
            values: values.into_iter().map(|v| v.clamp(-1.0, 1.0)).collect(),
            phrases: structure.phrases.clone(),
            cadences: structure.cadences.clone(),
            gravity_centers: structure.gravity_centers.clone(),
            tier,
        }
    }

    pub fn measure_count(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn tier(&self) -> MapTier {
        self.tier
    }

    pub fn phrases(&self) -> &[MeasureSpan] {
        &self.phrases
    }

    pub fn cadences(&self) -> &[u32] {
        &self.cadences
    }

    pub fn gravity_centers(&self) -> &BTreeMap<u32, f64> {
        &self.gravity_centers
    }

    /// Map value of a measure, clamped into range
    pub fn value(&self, measure: u32) -> f64 {
        let index = (measure as usize).min(self.values.len().saturating_sub(1));
        self.values.get(index).copied().unwrap_or(0.0)
    }

    /// Timing bias for a measure, refined by the position within it
    ///
    /// `beat` is the fraction of the measure in [0.0, 1.0]; values outside
    /// that range are treated as the middle of the measure.
    pub fn timing_direction(&self, measure: u32, beat: Option<f64>) -> f64 {
        let measure = measure.min(self.values.len().saturating_sub(1) as u32);
        let base = self.value(measure);

        let Some(beat) = beat else {
            return base;
        };
        let beat = if beat.is_finite() && (0.0..=1.0).contains(&beat) {
            beat
        } else {
            0.5
        };

        let ending = self.cadences.contains(&measure) || self.phrases.iter().any(|p| p.end == measure);
        if ending && beat > 0.5 {
            return (base + (beat - 0.5) * 2.0 * 0.3).min(1.0);
        }

        if self.gravity_centers.contains_key(&measure) {
            let center = (0.5 - (beat - 0.5).abs()) * 2.0 * 0.2;
            if base > 0.0 {
                return (base + center).min(1.0);
            } else if base < 0.0 {
                return (base - center).max(-1.0);
            }
        }

        base
    }

    pub fn stats(&self) -> MapStats {
        let n = self.values.len().max(1) as f64;
        let min = self.values.iter().copied().fold(0.0_f64, f64::min);
        let max = self.values.iter().copied().fold(0.0_f64, f64::max);
        MapStats {
            measure_count: self.values.len(),
            avg_wave_amplitude: self.values.iter().map(|v| v.abs()).sum::<f64>() / n,
            max_acceleration: -min,
            max_delay: max,
        }
    }
}

impl Default for OrchestralMap {
    fn default() -> Self {
        OrchestralMap::neutral(DEFAULT_MEASURE_COUNT as usize)
    }
}

/// Build the map, degrading to simpler waves on failure
pub fn build_map(structure: &MusicalStructure, shape: &WaveShape, rng: &mut impl Rng) -> OrchestralMap {
    match full_map(structure, shape, rng) {
        Ok(values) => return OrchestralMap::with_values(values, structure, MapTier::Full),
        Err(e) => log::warn!("Full agogic map failed ({}), using simple wave", e),
    }

    let len = (structure.measure_count as usize).max(1);
    match checked(simple_wave(len, shape.amplitude * SIMPLE_WAVE_SCALE)) {
        Ok(values) => OrchestralMap::with_values(values, structure, MapTier::SimpleWave),
        Err(e) => {
            log::warn!("Simple wave failed ({}), using alternating map", e);
            OrchestralMap::with_values(alternating(len), structure, MapTier::Alternating)
        }
    }
}

/// Base wave with structural overlays, clamped
pub fn full_map(structure: &MusicalStructure, shape: &WaveShape, rng: &mut impl Rng) -> Result<Vec<f64>, AgogicMapError> {
    let len = structure.measure_count as usize;
    if len == 0 {
        return Err(AgogicMapError::Empty);
    }

    let mut wave = base_wave(len, shape, rng);
    apply_overlays(&mut wave, structure, shape.expressiveness);
    for v in wave.iter_mut() {
        *v = v.clamp(-1.0, 1.0);
    }
    checked(wave)
}

/// Fundamental sine plus three phase-shifted harmonics, normalized to the amplitude
pub fn base_wave(len: usize, shape: &WaveShape, rng: &mut impl Rng) -> Vec<f64> {
    let amplitude = shape.amplitude;
    let complexity = shape.complexity.clamp(0.0, 1.0);
    let span = 2.0 * PI * shape.frequency * len as f64;
    let phases: [f64; 3] = [
        rng.random::<f64>() * PI,
        rng.random::<f64>() * PI,
        rng.random::<f64>() * PI,
    ];

    let wave: Vec<f64> = (0..len)
        .map(|i| {
            let x = if len > 1 { span * i as f64 / (len - 1) as f64 } else { 0.0 };
            let mut v = amplitude * x.sin();
            if complexity > 0.0 {
                let harmonics = 0.3 * (x * 3.1 + phases[0]).sin()
                    + 0.2 * (x * 1.7 + phases[1]).sin()
                    + 0.1 * (x * 0.5 + phases[2]).sin();
                v += amplitude * complexity * harmonics;
            }
            v
        })
        .collect();

    let peak = wave.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if peak > 0.0 {
        wave.into_iter().map(|v| v / peak * amplitude).collect()
    } else {
        wave
    }
}

/// Phrase ends, phrase starts, cadences, then gravity centers
pub fn apply_overlays(wave: &mut [f64], structure: &MusicalStructure, expressiveness: f64) {
    let len = wave.len();
    let phrase_end_factor = (0.6 + expressiveness * 0.4).min(1.0);
    let cadence_factor = (0.8 + expressiveness * 0.2).min(1.0);

    for span in &structure.phrases {
        let end = span.end as usize;
        if end > 0 && end + 1 < len {
            wave[end - 1] = (wave[end - 1] + 0.3 * phrase_end_factor).min(1.0);
            wave[end] = (wave[end] + 0.6 * phrase_end_factor).min(1.0);
        }
        let after_start = span.start as usize + 1;
        if after_start < len {
            wave[after_start] = (wave[after_start] - 0.25 * expressiveness).max(-1.0);
        }
    }

    for &cadence in &structure.cadences {
        let c = cadence as usize;
        if c < len {
            wave[c] = (wave[c] + 0.8 * cadence_factor).min(1.0);
            if c > 0 {
                wave[c - 1] = (wave[c - 1] + 0.5 * cadence_factor).min(1.0);
            }
        }
    }

    for (&measure, &strength) in &structure.gravity_centers {
        let m = measure as usize;
        if m >= len {
            continue;
        }
        let effect = strength * expressiveness * 0.4;
        if wave[m] > 0.0 {
            wave[m] = (wave[m] + effect).min(1.0);
        } else if wave[m] < 0.0 {
            wave[m] = (wave[m] - effect).max(-1.0);
        }
    }
}

/// Single sine with an 8-measure period
pub fn simple_wave(len: usize, amplitude: f64) -> Vec<f64> {
    (0..len)
        .map(|i| amplitude * (2.0 * PI * i as f64 / SIMPLE_WAVE_PERIOD).sin())
        .collect()
}

/// +0.5 / -0.5 per measure
pub fn alternating(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| if i % 2 == 0 { ALTERNATING_VALUE } else { -ALTERNATING_VALUE })
        .collect()
}

fn checked(values: Vec<f64>) -> Result<Vec<f64>, AgogicMapError> {
    if values.is_empty() {
        return Err(AgogicMapError::Empty);
    }
    match values.iter().position(|v| !v.is_finite()) {
        Some(measure) => Err(AgogicMapError::NonFinite { measure }),
        None => Ok(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn shape(amplitude: f64) -> WaveShape {
        WaveShape {
            amplitude,
            complexity: 0.8,
            frequency: BASE_FREQUENCY,
            expressiveness: 0.5,
        }
    }

    #[test]
    fn test_neutral_map() {
        let map = OrchestralMap::default();
        assert_eq!(map.measure_count(), 16);
        assert_eq!(map.tier(), MapTier::Neutral);
        assert_eq!(map.timing_direction(5, Some(0.9)), 0.0);
    }

    #[test]
    fn test_base_wave_normalized() {
        let mut rng = StdRng::seed_from_u64(3);
        let wave = base_wave(32, &shape(0.54), &mut rng);
        let peak = wave.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!((peak - 0.54).abs() < 1e-9);
        assert_eq!(wave.len(), 32);
    }

    #[test]
    fn test_full_map_dense_and_bounded() {
        let structure = MusicalStructure::synthetic(40);
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let map = build_map(&structure, &shape(0.9), &mut rng);
            assert_eq!(map.tier(), MapTier::Full);
            assert_eq!(map.measure_count(), 40);
            assert!(map.values().iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_same_seed_same_map() {
        let structure = MusicalStructure::synthetic(16);
        let a = build_map(&structure, &shape(0.6), &mut StdRng::seed_from_u64(9));
        let b = build_map(&structure, &shape(0.6), &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_overlays_on_flat_wave() {
        let structure = MusicalStructure::synthetic(16);
        let mut wave = vec![0.0; 16];
        apply_overlays(&mut wave, &structure, 1.0);

        // phrase end 7: +0.3 / +0.6, cadence 7: +0.8 / +0.5, gravity pushes positive further
        assert!((wave[6] - 0.8).abs() < 1e-9);
        assert!((wave[7] - 1.0).abs() < 1e-9);
        // acceleration after each phrase start
        assert!((wave[1] + 0.25).abs() < 1e-9);
        assert!((wave[9] + 0.25).abs() < 1e-9);
        // gravity on a zero value leaves it untouched
        assert_eq!(wave[3], 0.0);
        // the last phrase end gets only the cadence boost
        assert!((wave[15] - 1.0).abs() < 1e-9);
        assert!((wave[14] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_degrades_to_simple_wave() {
        let structure = MusicalStructure::synthetic(16);
        let mut rng = StdRng::seed_from_u64(1);
        let map = build_map(&structure, &shape(f64::NAN), &mut rng);
        // NaN amplitude breaks both waves
        assert_eq!(map.tier(), MapTier::Alternating);
        assert_eq!(map.values()[0], 0.5);
        assert_eq!(map.values()[1], -0.5);
        assert_eq!(map.measure_count(), 16);
    }

    #[test]
    fn test_simple_wave_shape() {
        let wave = simple_wave(16, 0.7);
        assert!(wave[0].abs() < 1e-9);
        assert!((wave[2] - 0.7).abs() < 1e-9);
        assert!((wave[6] + 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_timing_direction_refinements() {
        let structure = MusicalStructure::synthetic(16);
        let map = OrchestralMap::with_values(vec![0.2; 16], &structure, MapTier::Full);

        assert!((map.timing_direction(2, None) - 0.2).abs() < 1e-9);
        // phrase end in the second half of the measure
        assert!((map.timing_direction(7, Some(1.0)) - 0.5).abs() < 1e-9);
        // first half of a cadence measure falls through to its gravity: 0.2 + 0.1
        assert!((map.timing_direction(7, Some(0.25)) - 0.3).abs() < 1e-9);
        // gravity center peaks mid-measure
        assert!((map.timing_direction(3, Some(0.5)) - 0.4).abs() < 1e-9);
        // out-of-range measure clamps to the last one
        assert!((map.timing_direction(99, None) - 0.2).abs() < 1e-9);
        // invalid beat treated as the middle
        assert!((map.timing_direction(3, Some(4.0)) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_stats() {
        let structure = MusicalStructure::synthetic(16);
        let mut values = vec![0.0; 16];
        values[0] = -0.4;
        values[1] = 0.8;
        let map = OrchestralMap::with_values(values, &structure, MapTier::Full);
        let stats = map.stats();
        assert!((stats.max_acceleration - 0.4).abs() < 1e-9);
        assert!((stats.max_delay - 0.8).abs() < 1e-9);
        assert!((stats.avg_wave_amplitude - 0.075).abs() < 1e-9);
    }
}
