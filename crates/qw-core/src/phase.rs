use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use crate::constants::EPSILON;

/// Phase angle on the unit circle, always kept in [0, 2π).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Phase {
    pub theta: f64,
}

impl Phase {
    /// Create a phase with the given angle, wrapped to [0, 2π).
    pub fn new(theta: f64) -> Self {
        let mut wrapped = theta.rem_euclid(TAU);
        // rem_euclid can round up to exactly TAU for tiny negative inputs
        if wrapped >= TAU {
            wrapped = 0.0;
        }
        Self { theta: wrapped }
    }

    pub fn zero() -> Self {
        Self { theta: 0.0 }
    }

    /// Shortest arc between the two phases. Range: [0, π].
    pub fn distance(self, other: Self) -> f64 {
        let diff = (self.theta - other.theta).abs();
        if diff > PI { TAU - diff } else { diff }
    }

    /// (1 + cos Δ) / 2. Range: [0, 1]. 1 = in phase, 0 = opposed.
    pub fn coherence(self, other: Self) -> f64 {
        ((1.0 + (self.theta - other.theta).cos()) / 2.0).clamp(0.0, 1.0)
    }

    /// Circular mean of two phases.
    /// Exactly opposed phases have no mean direction; `self` wins.
    pub fn circular_mean(self, other: Self) -> Self {
        let s = self.theta.sin() + other.theta.sin();
        let c = self.theta.cos() + other.theta.cos();
        if s.hypot(c) < EPSILON {
            return self;
        }
        Self::new(s.atan2(c))
    }
}

impl PartialEq for Phase {
    fn eq(&self, other: &Self) -> bool {
        self.distance(*other) < EPSILON
    }
}
