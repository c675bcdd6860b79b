//! Frequency-band index over the active (non-dormant) patterns.
//!
//! Patterns are bucketed by `floor(frequency / FREQUENCY_BAND_WIDTH)`, and each
//! band remembers the amplitude range of what was put in it. Orientation,
//! phase and interference are unknown until a pattern is scored, so a band's
//! bound is
//!
//! ```text
//!   1 - WEIGHT_FREQUENCY * min(1, d / REF) - WEIGHT_ENERGY * (1 - e)
//! ```
//!
//! for the nearest band edge at frequency distance `d` and the best energy
//! ratio `e` the amplitude range allows. Bands whose bound is below the
//! cut-off are skipped; nothing that could pass is ever pruned. The two known
//! factors can take at most 0.25 off a score, so a cut-off at or below 0.75
//! prunes nothing.

use std::collections::BTreeMap;

use qw_core::{
    FREQUENCY_BAND_WIDTH, FREQUENCY_REFERENCE_SCALE, WEIGHT_ENERGY, WEIGHT_FREQUENCY, WavePattern,
};

/// Slack on the cut-off so rounding in the real score never loses a match.
const BOUND_SLACK: f64 = 1e-9;

#[derive(Debug, Clone)]
struct Band {
    slots: Vec<usize>,
    /// Only ever widens; after a removal it may be looser than the members.
    min_amplitude: f64,
    max_amplitude: f64,
}

impl Band {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            min_amplitude: f64::INFINITY,
            max_amplitude: 0.0,
        }
    }

    fn add(&mut self, slot: usize, amplitude: f64) {
        self.slots.push(slot);
        self.min_amplitude = self.min_amplitude.min(amplitude);
        self.max_amplitude = self.max_amplitude.max(amplitude);
    }

    /// Best energy ratio any member can reach against `amplitude`.
    fn best_energy(&self, amplitude: f64) -> f64 {
        if amplitude <= 0.0 {
            0.0
        } else if amplitude < self.min_amplitude {
            amplitude / self.min_amplitude
        } else if amplitude > self.max_amplitude {
            self.max_amplitude / amplitude
        } else {
            1.0
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct FrequencyBands {
    bands: BTreeMap<i64, Band>,
    active: usize,
}

impl FrequencyBands {
    /// Index `patterns` by slot; dormant patterns are left out.
    pub fn build(patterns: &[WavePattern]) -> Self {
        let mut index = Self::default();
        for (slot, pattern) in patterns.iter().enumerate() {
            index.insert(slot, pattern);
        }
        index
    }

    pub fn insert(&mut self, slot: usize, pattern: &WavePattern) {
        if pattern.is_dormant() {
            return;
        }
        self.bands
            .entry(band_of(pattern.frequency))
            .or_insert_with(Band::new)
            .add(slot, pattern.amplitude);
        self.active += 1;
    }

    /// Re-index `slot` after a fusion turned `old` into `new`.
    pub fn replace(&mut self, slot: usize, old: &WavePattern, new: &WavePattern) {
        let from = band_of(old.frequency);
        let to = band_of(new.frequency);
        if from != to {
            if let Some(band) = self.bands.get_mut(&from) {
                band.slots.retain(|&s| s != slot);
                if band.slots.is_empty() {
                    self.bands.remove(&from);
                }
            }
            self.bands
                .entry(to)
                .or_insert_with(Band::new)
                .add(slot, new.amplitude);
        } else if let Some(band) = self.bands.get_mut(&to) {
            band.min_amplitude = band.min_amplitude.min(new.amplitude);
            band.max_amplitude = band.max_amplitude.max(new.amplitude);
        }
    }

    /// Number of indexed (non-dormant) patterns.
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Slots whose band could still reach `cutoff` against a query with the
    /// given frequency and amplitude.
    pub fn candidates(
        &self,
        frequency: f64,
        amplitude: f64,
        cutoff: f64,
    ) -> impl Iterator<Item = usize> + '_ {
        self.bands
            .iter()
            .filter(move |(key, band)| {
                best_reachable(frequency, amplitude, **key, band) + BOUND_SLACK >= cutoff
            })
            .flat_map(|(_, band)| band.slots.iter().copied())
    }
}

fn band_of(frequency: f64) -> i64 {
    (frequency / FREQUENCY_BAND_WIDTH).floor() as i64
}

/// Upper bound on the score of any pattern in `band` against the query.
fn best_reachable(frequency: f64, amplitude: f64, key: i64, band: &Band) -> f64 {
    let lo = key as f64 * FREQUENCY_BAND_WIDTH;
    let hi = lo + FREQUENCY_BAND_WIDTH;
    let distance = if frequency < lo {
        lo - frequency
    } else if frequency >= hi {
        frequency - hi
    } else {
        0.0
    };
    1.0 - WEIGHT_FREQUENCY * (distance / FREQUENCY_REFERENCE_SCALE).min(1.0)
        - WEIGHT_ENERGY * (1.0 - band.best_energy(amplitude))
}
