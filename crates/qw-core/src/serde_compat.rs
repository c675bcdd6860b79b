//! JSON wire format for pattern snapshots.
//!
//! One flat record per pattern with camelCase keys and the orientation
//! spelled out as `w`, `x`, `y`, `z`. A snapshot file wraps the records with a
//! version tag; a bare array of records is accepted on import as well.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WaveError};
use crate::pattern::WavePattern;
use crate::phase::Phase;
use crate::quaternion::Quaternion;

pub const CURRENT_VERSION: &str = "1";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PatternRecord {
    pub id: String,
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub frequency: f64,
    pub amplitude: f64,
    pub phase: f64,
    pub depth: u32,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SnapshotFile {
    pub version: String,
    #[serde(rename = "exportedAt", default)]
    pub exported_at: i64,
    pub patterns: Vec<PatternRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotInput {
    Wrapped(SnapshotFile),
    Bare(Vec<PatternRecord>),
}

impl PatternRecord {
    pub fn from_pattern(pattern: &WavePattern) -> Self {
        let [w, x, y, z] = pattern.orientation.to_array();
        Self {
            id: pattern.id.to_string(),
            w,
            x,
            y,
            z,
            frequency: pattern.frequency,
            amplitude: pattern.amplitude,
            phase: pattern.phase.theta,
            depth: pattern.depth,
            sources: pattern.sources.clone(),
            created_at: pattern.created_at,
            updated_at: pattern.updated_at,
        }
    }

    /// Convert back into a pattern, rejecting any record that breaks an
    /// invariant. The orientation is taken as stored, never renormalized.
    pub fn into_pattern(self) -> Result<WavePattern> {
        let id = Uuid::parse_str(&self.id).map_err(|e| {
            WaveError::InvariantViolation(format!("invalid pattern id '{}': {e}", self.id))
        })?;
        if !self.phase.is_finite() {
            return Err(WaveError::InvariantViolation(format!(
                "pattern {id}: phase is not finite"
            )));
        }

        let pattern = WavePattern {
            id,
            orientation: Quaternion::from_raw(self.w, self.x, self.y, self.z),
            frequency: self.frequency,
            amplitude: self.amplitude,
            phase: Phase::new(self.phase),
            depth: self.depth,
            sources: self.sources,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        pattern.validate()?;
        Ok(pattern)
    }
}

impl SnapshotFile {
    pub fn new(patterns: Vec<PatternRecord>, exported_at: i64) -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            exported_at,
            patterns,
        }
    }
}

/// Serialize records into a pretty-printed snapshot file.
pub fn export_json(records: Vec<PatternRecord>, exported_at: i64) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&SnapshotFile::new(records, exported_at))
}

/// Parse either a wrapped snapshot file or a bare array of records.
pub fn parse_snapshot(json: &str) -> serde_json::Result<Vec<PatternRecord>> {
    Ok(match serde_json::from_str::<SnapshotInput>(json)? {
        SnapshotInput::Wrapped(file) => file.patterns,
        SnapshotInput::Bare(records) => records,
    })
}
