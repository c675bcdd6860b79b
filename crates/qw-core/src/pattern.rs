use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::WaveComponents;
use crate::constants::NORM_TOLERANCE;
use crate::error::{Result, WaveError};
use crate::phase::Phase;
use crate::quaternion::Quaternion;

/// A stored unit of knowledge: one oriented wave.
///
/// Created at depth 0 from a single embedding, then mutated only by fusion,
/// which raises `depth` and appends to `sources`. A pattern with zero
/// amplitude is dormant: kept for provenance, never matched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WavePattern {
    pub id: Uuid,
    pub orientation: Quaternion,
    pub frequency: f64,
    pub amplitude: f64,
    pub phase: Phase,
    pub depth: u32,
    /// Provenance ids, oldest first.
    pub sources: Vec<String>,
    /// Unix milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

impl WavePattern {
    pub fn from_components(components: WaveComponents, source_id: &str, now: i64) -> Self {
        let amplitude = if components.degenerate {
            0.0
        } else {
            components.amplitude
        };
        Self {
            id: Uuid::new_v4(),
            orientation: components.orientation,
            frequency: components.frequency,
            amplitude,
            phase: components.phase,
            depth: 0,
            sources: vec![source_id.to_string()],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_dormant(&self) -> bool {
        self.amplitude == 0.0
    }

    /// Check every structural invariant. Nothing is repaired.
    pub fn validate(&self) -> Result<()> {
        let q = self.orientation;
        if ![q.w, q.x, q.y, q.z].iter().all(|v| v.is_finite()) {
            return Err(WaveError::InvariantViolation(format!(
                "pattern {}: orientation has non-finite components",
                self.id
            )));
        }
        if !q.is_unit(NORM_TOLERANCE) {
            return Err(WaveError::InvariantViolation(format!(
                "pattern {}: orientation norm {} is not 1",
                self.id,
                q.norm()
            )));
        }
        for (field, value) in [("frequency", self.frequency), ("amplitude", self.amplitude)] {
            if !value.is_finite() {
                return Err(WaveError::InvariantViolation(format!(
                    "pattern {}: {field} is not finite",
                    self.id
                )));
            }
            if value < 0.0 {
                return Err(WaveError::NegativeMagnitude { field, value });
            }
        }
        let theta = self.phase.theta;
        if !(theta.is_finite() && (0.0..TAU).contains(&theta)) {
            return Err(WaveError::InvariantViolation(format!(
                "pattern {}: phase {theta} outside [0, 2π)",
                self.id
            )));
        }
        if self.updated_at < self.created_at {
            return Err(WaveError::InvariantViolation(format!(
                "pattern {}: updated before it was created",
                self.id
            )));
        }
        Ok(())
    }
}
