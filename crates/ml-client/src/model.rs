use forecast_core::{Actuals, Forecast, TensorOutput};
use nalgebra::{DMatrix, DVector};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{EnrichmentError, EnrichmentResult};

/// A model that turns a small numeric feature vector into a scalar or
/// vector output. `load` must succeed before `predict` is called.
pub trait InferenceModel: Send + Sync {
    fn load(&mut self) -> EnrichmentResult<()>;

    fn is_loaded(&self) -> bool;

    fn predict(&self, features: &[f64]) -> EnrichmentResult<TensorOutput>;
}

/// Features fed to the model: `[resistance, close]`, close defaulting to 0.
pub fn feature_vector(forecast: &Forecast, actuals: &Actuals) -> Vec<f64> {
    vec![forecast.resistance, actuals.close.unwrap_or(0.0)]
}

/// On-disk artifact: one weight row per output.
#[derive(Debug, Deserialize)]
struct LinearArtifact {
    weights: Vec<Vec<f64>>,
    #[serde(default)]
    bias: Option<Vec<f64>>,
}

/// Affine model `y = W x + b` loaded from a JSON artifact.
pub struct LinearModel {
    path: PathBuf,
    weights: Option<DMatrix<f64>>,
    bias: Option<DVector<f64>>,
}

impl LinearModel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            weights: None,
            bias: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(raw: &str) -> EnrichmentResult<(DMatrix<f64>, DVector<f64>)> {
        let artifact: LinearArtifact = serde_json::from_str(raw)
            .map_err(|e| EnrichmentError::InvalidArtifact(e.to_string()))?;

        let rows = artifact.weights.len();
        let cols = artifact.weights.first().map(Vec::len).unwrap_or(0);
        if rows == 0 || cols == 0 {
            return Err(EnrichmentError::InvalidArtifact("empty weight matrix".into()));
        }
        if artifact.weights.iter().any(|row| row.len() != cols) {
            return Err(EnrichmentError::InvalidArtifact("ragged weight matrix".into()));
        }

        let flat: Vec<f64> = artifact.weights.into_iter().flatten().collect();
        let weights = DMatrix::from_row_slice(rows, cols, &flat);

        let bias = match artifact.bias {
            Some(b) if b.len() == rows => DVector::from_vec(b),
            Some(b) => {
                return Err(EnrichmentError::InvalidArtifact(format!(
                    "bias has {} entries, expected {}",
                    b.len(),
                    rows
                )))
            }
            None => DVector::zeros(rows),
        };

        Ok((weights, bias))
    }
}

impl InferenceModel for LinearModel {
    fn load(&mut self) -> EnrichmentResult<()> {
        if !self.path.exists() {
            tracing::error!("Tensor model file not found: {}", self.path.display());
            return Err(EnrichmentError::ArtifactMissing(self.path.clone()));
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| EnrichmentError::InvalidArtifact(e.to_string()))?;
        let (weights, bias) = Self::parse(&raw)?;

        tracing::info!(
            "Loaded tensor model from {} ({}x{})",
            self.path.display(),
            weights.nrows(),
            weights.ncols()
        );
        self.weights = Some(weights);
        self.bias = Some(bias);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.weights.is_some()
    }

    fn predict(&self, features: &[f64]) -> EnrichmentResult<TensorOutput> {
        let (weights, bias) = match (&self.weights, &self.bias) {
            (Some(w), Some(b)) => (w, b),
            _ => return Err(EnrichmentError::ModelNotLoaded),
        };
        if features.len() != weights.ncols() {
            return Err(EnrichmentError::Inference(format!(
                "expected {} features, got {}",
                weights.ncols(),
                features.len()
            )));
        }

        let x = DVector::from_column_slice(features);
        let y = weights * x + bias;

        Ok(if y.len() == 1 {
            TensorOutput::Scalar(y[0])
        } else {
            TensorOutput::Vector(y.iter().copied().collect())
        })
    }
}
