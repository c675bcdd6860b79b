use serde::{Deserialize, Deserializer, Serialize};

use crate::codec::l2_norm;
use crate::error::{Result, WaveError};

/// A validated numeric embedding: non-empty, every element finite, and an
/// L2 norm that fits in an `f64`.
///
/// This is the only way numeric content enters the engine. Dimensionality is
/// not fixed; embeddings from different models can coexist in one store.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f64>);

impl Embedding {
    pub fn new(values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(WaveError::InvalidEmbedding("embedding is empty".to_string()));
        }
        if let Some((idx, v)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(WaveError::InvalidEmbedding(format!(
                "element {idx} is not finite ({v})"
            )));
        }
        if !l2_norm(&values).is_finite() {
            return Err(WaveError::InvalidEmbedding(
                "L2 norm exceeds the f64 range".to_string(),
            ));
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a constructed embedding.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

}

impl TryFrom<Vec<f64>> for Embedding {
    type Error = WaveError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        Self::new(values)
    }
}

impl TryFrom<&[f64]> for Embedding {
    type Error = WaveError;

    fn try_from(values: &[f64]) -> Result<Self> {
        Self::new(values.to_vec())
    }
}

impl<'de> Deserialize<'de> for Embedding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let values = Vec::<f64>::deserialize(deserializer)?;
        Embedding::new(values).map_err(serde::de::Error::custom)
    }
}
