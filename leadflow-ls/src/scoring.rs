//! Scoring
//!
//! The scorer is an opaque capability: a feature vector goes in, a
//! probability in [0,1] comes out. The service holds the currently loaded
//! model behind an explicit handle with an explicit reload method; nothing
//! mutates module-level state.

use crate::features::{FeatureVector, CATEGORICAL_FEATURES, NUMERIC_FEATURES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Scoring errors
#[derive(Debug, Error)]
pub enum ScoringError {
    /// No scoring function is loaded; all scoring requests are rejected
    /// until one is
    #[error("No model loaded")]
    Unavailable,

    /// The model and the feature vector disagree about the input shape
    #[error("Invalid model input: {0}")]
    Invalid(String),

    /// Artifact could not be read or parsed
    #[error("Model artifact error: {0}")]
    Artifact(String),
}

/// Conversion-likelihood scoring capability
pub trait Scorer: Send + Sync {
    /// Score a feature vector; the result is a probability in [0,1]
    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError>;
}

/// Standardization parameters for one numeric column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnScaler {
    pub mean: f64,
    pub std: f64,
}

impl ColumnScaler {
    pub fn apply(&self, x: f64) -> f64 {
        if self.std > 0.0 {
            (x - self.mean) / self.std
        } else {
            0.0
        }
    }
}

/// Logistic regression model artifact
///
/// Numeric inputs are standardized with the training-set scalers; each
/// categorical column contributes a per-category weight, with unseen
/// categories contributing nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    /// Numeric column names, in input order
    pub numeric_columns: Vec<String>,
    /// Categorical column names, in input order
    pub categorical_columns: Vec<String>,
    /// One scaler per numeric column
    pub scalers: Vec<ColumnScaler>,
    /// One weight per numeric column
    pub numeric_weights: Vec<f64>,
    /// Per-category weights, one map per categorical column
    pub categorical_weights: Vec<HashMap<String, f64>>,
    pub bias: f64,
    pub trained_at: DateTime<Utc>,
    /// Number of training rows the model was fit on
    pub trained_on: usize,
}

impl LogisticModel {
    /// Load a model artifact from disk
    pub fn load(path: &Path) -> Result<LogisticModel, ScoringError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ScoringError::Artifact(format!("{}: {}", path.display(), e)))?;
        let model: LogisticModel = serde_json::from_str(&content)
            .map_err(|e| ScoringError::Artifact(format!("{}: {}", path.display(), e)))?;
        model.check_shape()?;
        Ok(model)
    }

    /// Save the model artifact to disk
    pub fn save(&self, path: &Path) -> Result<(), ScoringError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ScoringError::Artifact(e.to_string()))?;
            }
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ScoringError::Artifact(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ScoringError::Artifact(e.to_string()))?;
        Ok(())
    }

    /// Validate internal consistency and agreement with the configured
    /// feature columns
    pub fn check_shape(&self) -> Result<(), ScoringError> {
        fn columns_match(cols: &[String], expected: &[&str]) -> bool {
            cols.len() == expected.len() && cols.iter().zip(expected).all(|(a, b)| a == b)
        }
        if !columns_match(&self.numeric_columns, NUMERIC_FEATURES)
            || !columns_match(&self.categorical_columns, CATEGORICAL_FEATURES)
        {
            return Err(ScoringError::Invalid(format!(
                "Model feature columns {:?}/{:?} do not match the pipeline's {:?}/{:?}",
                self.numeric_columns, self.categorical_columns, NUMERIC_FEATURES,
                CATEGORICAL_FEATURES
            )));
        }
        if self.scalers.len() != self.numeric_columns.len()
            || self.numeric_weights.len() != self.numeric_columns.len()
            || self.categorical_weights.len() != self.categorical_columns.len()
        {
            return Err(ScoringError::Invalid(
                "Model weight shapes do not match its column lists".to_string(),
            ));
        }
        Ok(())
    }

    /// Linear term for a feature vector, before the sigmoid
    pub fn logit(&self, features: &FeatureVector) -> f64 {
        let mut z = self.bias;
        for ((x, scaler), w) in features
            .numeric()
            .iter()
            .zip(&self.scalers)
            .zip(&self.numeric_weights)
        {
            z += scaler.apply(*x) * w;
        }
        for (value, weights) in features.categorical().iter().zip(&self.categorical_weights) {
            // Unseen category contributes 0
            z += weights.get(*value).copied().unwrap_or(0.0);
        }
        z
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Scorer for LogisticModel {
    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        self.check_shape()?;
        let p = sigmoid(self.logit(features));
        if !p.is_finite() {
            return Err(ScoringError::Invalid(
                "Model produced a non-finite probability".to_string(),
            ));
        }
        Ok(p.clamp(0.0, 1.0))
    }
}

/// Handle to the currently loaded model
///
/// Held by the composition root; reloaded explicitly, never via global
/// mutation.
#[derive(Clone)]
pub struct ScorerHandle {
    model: Arc<RwLock<Option<LogisticModel>>>,
}

impl ScorerHandle {
    /// Empty handle: scoring requests fail with Unavailable until a reload
    pub fn empty() -> Self {
        Self {
            model: Arc::new(RwLock::new(None)),
        }
    }

    /// Handle over an already loaded model
    pub fn with_model(model: LogisticModel) -> Self {
        Self {
            model: Arc::new(RwLock::new(Some(model))),
        }
    }

    /// Load (or reload) the model artifact from disk
    pub async fn reload(&self, path: &Path) -> Result<(), ScoringError> {
        let model = LogisticModel::load(path)?;
        info!(
            path = %path.display(),
            trained_at = %model.trained_at,
            trained_on = model.trained_on,
            "Model loaded"
        );
        *self.model.write().await = Some(model);
        Ok(())
    }

    /// Whether a model is currently loaded
    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }

    /// Score a feature vector with the current model
    pub async fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        let guard = self.model.read().await;
        let model = guard.as_ref().ok_or(ScoringError::Unavailable)?;
        model.score(features)
    }
}
