//! Resonance scoring and fusion.
//!
//! `score(a, b)` is a fixed-weight blend of five factors, each in [0, 1]:
//!
//! | factor       | weight | value                                          |
//! |--------------|--------|------------------------------------------------|
//! | orientation  | 0.50   | (1 + a·b) / 2                                  |
//! | frequency    | 0.15   | 1 − min(1, |Δf| / FREQUENCY_REFERENCE_SCALE)    |
//! | phase        | 0.15   | (1 + cos Δφ) / 2                               |
//! | energy       | 0.10   | min(A) / max(A), 0 when either is dormant      |
//! | interference | 0.10   | (1 + Re(conj(a) ⊗ b ⊗ ρ)) / 2                  |
//!
//! ρ is the phase rotor `(cos d, sin d, 0, 0)` for the shortest phase
//! distance d. The relative rotation `conj(a) ⊗ b` reverses under a swap
//! while ρ does not, so the interference term (and the score) depends on
//! argument order. Callers pass the stored pattern first.

use crate::constants::{
    FREQUENCY_REFERENCE_SCALE, WEIGHT_ENERGY, WEIGHT_FREQUENCY, WEIGHT_INTERFERENCE,
    WEIGHT_ORIENTATION, WEIGHT_PHASE,
};
use crate::error::{Result, WaveError};
use crate::pattern::WavePattern;
use crate::quaternion::Quaternion;

/// Per-factor resonance values, each in [0, 1], and their weighted total.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResonanceBreakdown {
    pub orientation: f64,
    pub frequency: f64,
    pub phase: f64,
    pub energy: f64,
    pub interference: f64,
    pub total: f64,
}

pub fn score(a: &WavePattern, b: &WavePattern) -> f64 {
    score_breakdown(a, b).total
}

pub fn score_breakdown(a: &WavePattern, b: &WavePattern) -> ResonanceBreakdown {
    let orientation = orientation_alignment(a.orientation, b.orientation);
    let frequency = frequency_match(a.frequency, b.frequency);
    let phase = a.phase.coherence(b.phase);
    let energy = energy_compatibility(a.amplitude, b.amplitude);

    let rotor = {
        let d = a.phase.distance(b.phase);
        Quaternion::from_raw(d.cos(), d.sin(), 0.0, 0.0)
    };
    let relative = a.orientation.conjugate() * b.orientation;
    let interference = unit_interval((relative * rotor).w);

    let total = WEIGHT_ORIENTATION * orientation
        + WEIGHT_FREQUENCY * frequency
        + WEIGHT_PHASE * phase
        + WEIGHT_ENERGY * energy
        + WEIGHT_INTERFERENCE * interference;

    ResonanceBreakdown {
        orientation,
        frequency,
        phase,
        energy,
        interference,
        total: total.clamp(0.0, 1.0),
    }
}

/// Whether `score` is high enough for the incoming pattern to be absorbed.
pub fn should_absorb(score: f64, threshold: f64) -> bool {
    score >= threshold
}

/// Absorb `incoming` into `existing`, returning the updated pattern.
///
/// Orientation composes by Hamilton product, with the incoming rotation scaled
/// by its share `1 / (depth + 1)`; at depth 0 that is the plain product
/// `existing ⊗ incoming`. Frequency and amplitude use the same weights as a
/// running average, phase takes the circular mean. `id` and `created_at` are
/// kept.
pub fn fuse(existing: &WavePattern, incoming: &WavePattern, now: i64) -> Result<WavePattern> {
    if existing.is_dormant() || incoming.is_dormant() {
        return Err(WaveError::FusionOnDormant);
    }

    let depth = existing.depth as f64;
    let keep = depth / (depth + 1.0);
    let take = 1.0 - keep;

    let orientation = (existing.orientation * incoming.orientation.powf(take)).normalize();

    let mut sources = existing.sources.clone();
    sources.extend(incoming.sources.iter().cloned());

    Ok(WavePattern {
        id: existing.id,
        orientation,
        frequency: (keep * existing.frequency + take * incoming.frequency).max(0.0),
        amplitude: (keep * existing.amplitude + take * incoming.amplitude).max(0.0),
        phase: existing.phase.circular_mean(incoming.phase),
        depth: existing.depth.saturating_add(1),
        sources,
        created_at: existing.created_at,
        updated_at: now.max(existing.updated_at),
    })
}

fn orientation_alignment(a: Quaternion, b: Quaternion) -> f64 {
    unit_interval(a.dot(b))
}

fn frequency_match(a: f64, b: f64) -> f64 {
    1.0 - ((a - b).abs() / FREQUENCY_REFERENCE_SCALE).min(1.0)
}

fn energy_compatibility(a: f64, b: f64) -> f64 {
    if a <= 0.0 || b <= 0.0 {
        return 0.0;
    }
    a.min(b) / a.max(b)
}

/// Map [-1, 1] onto [0, 1].
fn unit_interval(v: f64) -> f64 {
    ((v.clamp(-1.0, 1.0) + 1.0) / 2.0).clamp(0.0, 1.0)
}
