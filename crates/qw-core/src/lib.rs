//! Quaternion wave-pattern engine.
//!
//! Turns numeric embeddings into 7-scalar wave patterns (unit quaternion
//! orientation, frequency, amplitude, phase), scores pairs of patterns with a
//! fixed-weight resonance metric, and fuses resonant patterns by Hamilton
//! product instead of averaging.
//!
//! Zero I/O — pure math engine with no opinions about transport or persistence.

pub mod codec;
pub mod constants;
pub mod embedding;
pub mod error;
pub mod pattern;
pub mod phase;
pub mod quaternion;
pub mod resonance;
pub mod serde_compat;
pub mod time;

pub use codec::{WaveCodec, WaveComponents};
pub use constants::{
    DEFAULT_ABSORPTION_THRESHOLD, EPSILON, FREQUENCY_BAND_WIDTH, FREQUENCY_REFERENCE_SCALE,
    NORM_TOLERANCE, WEIGHT_ENERGY, WEIGHT_FREQUENCY,
};
pub use embedding::Embedding;
pub use error::WaveError;
pub use pattern::WavePattern;
pub use phase::Phase;
pub use quaternion::Quaternion;
pub use resonance::{ResonanceBreakdown, fuse, score, score_breakdown, should_absorb};
pub use serde_compat::{CURRENT_VERSION, PatternRecord, SnapshotFile, export_json, parse_snapshot};
pub use time::{MonotonicClock, millis_to_iso8601, now_unix_millis};
