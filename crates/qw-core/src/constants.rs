/// Numerical epsilon for near-zero comparisons
pub const EPSILON: f64 = 1e-10;

/// Tolerance on ‖orientation‖ = 1 for stored and imported patterns
pub const NORM_TOLERANCE: f64 = 1e-6;

/// Default resonance score at or above which an incoming pattern is absorbed
pub const DEFAULT_ABSORPTION_THRESHOLD: f64 = 0.75;

/// Saturation scale for the semantic-intensity component: w = tanh(‖e‖ / scale)
pub const INTENSITY_SCALE: f64 = 1.0;

/// Peak magnitude above which the codec rescales a signal to a unit peak
/// before computing its shape statistics
pub const RESCALE_ABOVE: f64 = 1e64;

/// Frequency difference (in spectral bins) at which frequency match reaches zero
pub const FREQUENCY_REFERENCE_SCALE: f64 = 32.0;

/// Width of one frequency band in the store's candidate index
pub const FREQUENCY_BAND_WIDTH: f64 = FREQUENCY_REFERENCE_SCALE / 4.0;

// Resonance factor weights. They sum to 1.0.

pub const WEIGHT_ORIENTATION: f64 = 0.50;
pub const WEIGHT_FREQUENCY: f64 = 0.15;
pub const WEIGHT_PHASE: f64 = 0.15;
pub const WEIGHT_ENERGY: f64 = 0.10;
pub const WEIGHT_INTERFERENCE: f64 = 0.10;
