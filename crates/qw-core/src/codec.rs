//! Embedding → wave conversion.
//!
//! The codec treats an embedding as a discrete signal. Four statistics become
//! the orientation quaternion:
//!
//! ```text
//!   w  semantic intensity   tanh(‖e‖ / INTENSITY_SCALE)          [0, 1]
//!   x  valence              (Σpos − Σ|neg|) / (Σpos + Σ|neg|)    [-1, 1]
//!   y  spectral complexity  normalized one-sided spectral entropy [0, 1]
//!   z  asymmetry            tanh(population skewness)            [-1, 1]
//! ```
//!
//! and three more scalars come straight from the signal: spectral centroid
//! (frequency), L2 norm (amplitude) and the angle of the strongest spectral
//! bin (phase). Everything is a pure function of the input values.
//!
//! Amplitude is accumulated relative to the peak magnitude, so it stays finite
//! for any embedding that [`Embedding::new`] accepts. Signals with a very
//! large peak are rescaled to a unit peak before the other statistics square
//! or cube them; every feature but amplitude is invariant under that scaling.

use std::borrow::Cow;

use rustfft::{Fft, FftPlanner};
use rustfft::num_complex::Complex;

use crate::constants::{EPSILON, INTENSITY_SCALE, RESCALE_ABOVE};
use crate::embedding::Embedding;
use crate::error::Result;
use crate::phase::Phase;
use crate::quaternion::Quaternion;

/// The 7-scalar wave representation of one embedding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaveComponents {
    pub orientation: Quaternion,
    pub frequency: f64,
    pub amplitude: f64,
    pub phase: Phase,
    /// The feature tuple had zero magnitude; orientation fell back to identity.
    pub degenerate: bool,
}

impl WaveComponents {
    pub fn is_dormant(&self) -> bool {
        self.degenerate || self.amplitude == 0.0
    }
}

/// Stateless embedding encoder.
pub struct WaveCodec;

impl WaveCodec {
    pub fn encode(embedding: &Embedding) -> WaveComponents {
        let amplitude = l2_norm(embedding.as_slice());
        let scaled = rescaled(embedding.as_slice());
        let values = scaled.as_ref();
        let spectrum = Spectrum::of(values);

        let w = (amplitude / INTENSITY_SCALE).tanh();
        let x = valence(values);
        let y = spectrum.entropy();
        let z = skewness(values).tanh();

        let magnitude = (w * w + x * x + y * y + z * z).sqrt();
        let degenerate = magnitude < EPSILON;
        let orientation = if degenerate {
            Quaternion::identity()
        } else {
            Quaternion::new(w, x, y, z)
        };

        let frequency = spectrum.centroid();
        debug_assert!(amplitude.is_finite() && frequency.is_finite());

        WaveComponents {
            orientation,
            frequency,
            amplitude,
            phase: spectrum.dominant_phase(),
            degenerate,
        }
    }

    /// Validate raw values and encode them.
    pub fn encode_slice(values: &[f64]) -> Result<WaveComponents> {
        let embedding = Embedding::try_from(values)?;
        Ok(Self::encode(&embedding))
    }
}

fn peak_magnitude(values: &[f64]) -> f64 {
    values.iter().fold(0.0, |peak: f64, v| peak.max(v.abs()))
}

/// Euclidean norm, summed relative to the peak so squares cannot overflow
/// or underflow. Infinite only when the norm itself exceeds `f64::MAX`.
pub(crate) fn l2_norm(values: &[f64]) -> f64 {
    let peak = peak_magnitude(values);
    if peak == 0.0 {
        return 0.0;
    }
    let sum: f64 = values
        .iter()
        .map(|v| {
            let r = v / peak;
            r * r
        })
        .sum();
    peak * sum.sqrt()
}

fn rescaled(values: &[f64]) -> Cow<'_, [f64]> {
    let peak = peak_magnitude(values);
    if peak > RESCALE_ABOVE {
        Cow::Owned(values.iter().map(|v| v / peak).collect())
    } else {
        Cow::Borrowed(values)
    }
}

fn valence(values: &[f64]) -> f64 {
    let (pos, neg) = values.iter().fold((0.0, 0.0), |(pos, neg), &v| {
        if v > 0.0 { (pos + v, neg) } else { (pos, neg - v) }
    });
    let total = pos + neg;
    if total < EPSILON {
        return 0.0;
    }
    ((pos - neg) / total).clamp(-1.0, 1.0)
}

/// Population skewness m3 / m2^(3/2). Zero for constant input.
fn skewness(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let (m2, m3) = values.iter().fold((0.0, 0.0), |(m2, m3), &v| {
        let d = v - mean;
        (m2 + d * d, m3 + d * d * d)
    });
    let m2 = m2 / n;
    let m3 = m3 / n;
    if m2 < EPSILON {
        return 0.0;
    }
    m3 / m2.powf(1.5)
}

/// One-sided DFT of a real signal, bins 0..=n/2.
struct Spectrum {
    bins: Vec<Complex<f64>>,
    power: Vec<f64>,
    total_power: f64,
}

impl Spectrum {
    fn of(values: &[f64]) -> Self {
        let mut buffer: Vec<Complex<f64>> = values.iter().map(|&v| Complex::new(v, 0.0)).collect();
        let mut planner = FftPlanner::<f64>::new();
        planner.plan_fft_forward(buffer.len()).process(&mut buffer);

        buffer.truncate(values.len() / 2 + 1);
        let power: Vec<f64> = buffer.iter().map(|c| c.norm_sqr()).collect();
        let total_power = power.iter().sum();

        Self {
            bins: buffer,
            power,
            total_power,
        }
    }

    /// Shannon entropy of the normalized power distribution over ln(K).
    fn entropy(&self) -> f64 {
        let k = self.power.len();
        if k < 2 || self.total_power < EPSILON {
            return 0.0;
        }
        let h: f64 = self
            .power
            .iter()
            .map(|&p| p / self.total_power)
            .filter(|&p| p > 0.0)
            .map(|p| -p * p.ln())
            .sum();
        (h / (k as f64).ln()).clamp(0.0, 1.0)
    }

    /// Power-weighted mean bin index.
    fn centroid(&self) -> f64 {
        if self.total_power < EPSILON {
            return 0.0;
        }
        let weighted: f64 = self
            .power
            .iter()
            .enumerate()
            .map(|(k, &p)| k as f64 * p)
            .sum();
        (weighted / self.total_power).max(0.0)
    }

    /// Angle of the strongest bin; the lowest index wins ties.
    fn dominant_phase(&self) -> Phase {
        let mut best = 0;
        for (k, &p) in self.power.iter().enumerate() {
            if p > self.power[best] {
                best = k;
            }
        }
        let bin = self.bins[best];
        Phase::new(bin.im.atan2(bin.re))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{PI, TAU};

    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn encode(values: &[f64]) -> WaveComponents {
        WaveCodec::encode_slice(values).unwrap()
    }

    fn impulse(scale: f64, n: usize) -> Vec<f64> {
        let mut v = vec![0.0; n];
        v[0] = scale;
        v
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(WaveCodec::encode_slice(&[]).is_err());
        assert!(WaveCodec::encode_slice(&[1.0, f64::NAN]).is_err());
    }

    #[test]
    fn test_deterministic() {
        let mut rng = SmallRng::seed_from_u64(7);
        let values: Vec<f64> = (0..384).map(|_| rng.random_range(-1.0..1.0)).collect();
        let a = encode(&values);
        let b = encode(&values);
        assert_eq!(a.orientation.to_array(), b.orientation.to_array());
        assert_eq!(a.frequency.to_bits(), b.frequency.to_bits());
        assert_eq!(a.amplitude.to_bits(), b.amplitude.to_bits());
        assert_eq!(a.phase.theta.to_bits(), b.phase.theta.to_bits());
    }

    #[test]
    fn test_orientation_is_unit() {
        let mut rng = SmallRng::seed_from_u64(11);
        for dim in [1, 2, 3, 7, 64, 300, 1536] {
            let values: Vec<f64> = (0..dim).map(|_| rng.random_range(-3.0..3.0)).collect();
            let c = encode(&values);
            assert!(c.orientation.is_unit(1e-6), "dim {dim}: {:?}", c.orientation);
        }
    }

    #[test]
    fn test_zero_embedding_is_dormant_identity() {
        let c = encode(&[0.0; 16]);
        assert!(c.degenerate);
        assert!(c.is_dormant());
        assert_eq!(c.orientation, Quaternion::identity());
        assert_eq!(c.amplitude, 0.0);
    }

    #[test]
    fn test_amplitude_is_l2_norm() {
        let c = encode(&[3.0, 4.0]);
        assert!((c.amplitude - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_valence_sign() {
        assert!((valence(&[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-12);
        assert!((valence(&[-1.0, -2.0]) + 1.0).abs() < 1e-12);
        assert!(valence(&[1.0, -1.0]).abs() < 1e-12);
        assert_eq!(valence(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_skewness_mirrors_sign() {
        let right = skewness(&impulse(10.0, 8));
        let left = skewness(&impulse(-10.0, 8));
        assert!(right > 2.0, "right skew {right}");
        assert!((right + left).abs() < 1e-12);
        assert_eq!(skewness(&[2.0, 2.0, 2.0]), 0.0);
    }

    #[test]
    fn test_impulse_has_flat_spectrum() {
        // An impulse spreads power evenly: maximal entropy, centroid mid-band
        let spectrum = Spectrum::of(&impulse(10.0, 8));
        assert!((spectrum.entropy() - 1.0).abs() < 1e-12);
        assert!((spectrum.centroid() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_signal_concentrates_in_dc() {
        let spectrum = Spectrum::of(&[1.0; 8]);
        assert!(spectrum.entropy().abs() < 1e-12);
        assert!(spectrum.centroid().abs() < 1e-12);
    }

    #[test]
    fn test_pure_tone_centroid_and_phase() {
        // cos at bin 2 of 16 samples, shifted by π/2 → sin
        let n = 16;
        let values: Vec<f64> = (0..n)
            .map(|i| (TAU * 2.0 * i as f64 / n as f64 - PI / 2.0).cos())
            .collect();
        let c = encode(&values);
        assert!((c.frequency - 2.0).abs() < 1e-9, "centroid {}", c.frequency);
        assert!(
            c.phase.distance(Phase::new(-PI / 2.0)) < 1e-9,
            "phase {}",
            c.phase.theta
        );
    }

    #[test]
    fn test_negative_impulse_phase_is_pi() {
        let c = encode(&impulse(-10.0, 8));
        assert!(c.phase.distance(Phase::new(PI)) < 1e-12);
        let c = encode(&impulse(10.0, 8));
        assert!(c.phase.distance(Phase::zero()) < 1e-12);
    }

    #[test]
    fn test_huge_values_stay_finite() {
        let c = encode(&[1e200, 1.0]);
        assert!((c.amplitude - 1e200).abs() / 1e200 < 1e-12);
        assert!(c.frequency.is_finite());
        assert!(c.orientation.is_unit(1e-12));
        assert!(!c.is_dormant());

        let p = crate::pattern::WavePattern::from_components(c, "big", 1);
        p.validate().unwrap();
    }

    #[test]
    fn test_rescaling_keeps_shape_features() {
        // Large enough that w saturates to exactly 1 on both sides
        let small = [300.0, -100.0, 50.0, 200.0, -25.0];
        let big: Vec<f64> = small.iter().map(|v| v * 1e150).collect();
        let (a, b) = (encode(&small), encode(&big));
        assert!((a.orientation.x - b.orientation.x).abs() < 1e-12);
        assert!((a.orientation.y - b.orientation.y).abs() < 1e-12);
        assert!((a.orientation.z - b.orientation.z).abs() < 1e-12);
        assert!((a.frequency - b.frequency).abs() < 1e-9);
        assert!(a.phase.distance(b.phase) < 1e-9);
    }

    #[test]
    fn test_tiny_values_do_not_underflow_amplitude() {
        assert!((l2_norm(&[3e-200, 4e-200]) - 5e-200).abs() < 1e-210);
    }

    #[test]
    fn test_single_element() {
        let c = encode(&[2.0]);
        assert!(c.orientation.is_unit(1e-12));
        assert_eq!(c.frequency, 0.0);
        assert!((c.amplitude - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_mixed_dimensions_do_not_panic() {
        for dim in 1..=33 {
            let values: Vec<f64> = (0..dim).map(|i| (i as f64 * 0.37).sin()).collect();
            let c = encode(&values);
            assert!(c.frequency >= 0.0);
            assert!(c.phase.theta >= 0.0 && c.phase.theta < TAU);
        }
    }
}
