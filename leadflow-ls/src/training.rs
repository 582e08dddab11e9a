//! Training
//!
//! Extracts the historical dataset (closed leads only) through the same
//! feature pipeline the scoring path uses, with `as_of` fixed to the
//! snapshot instant, fits a logistic regression by SGD and writes the model
//! artifact. Synthetic data has no place here; tests bring their own
//! fixtures.

use crate::db::leads;
use crate::features::{features, FeatureError, FeatureVector, CATEGORICAL_FEATURES, NUMERIC_FEATURES};
use crate::scoring::{sigmoid, ColumnScaler, LogisticModel};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Training errors
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Not enough training data: {0} usable rows (need at least {1})")]
    NotEnoughData(usize, usize),

    #[error("Both classes are required for training; got only label {0}")]
    SingleClass(i64),

    #[error(transparent)]
    Store(#[from] leadflow_common::Error),

    #[error("Model artifact error: {0}")]
    Artifact(String),
}

/// One labeled training example
#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub features: FeatureVector,
    /// 1.0 for WON, 0.0 for LOST/STALE
    pub label: f64,
}

/// Training options
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
    pub test_fraction: f64,
    pub seed: u64,
    pub min_rows: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.05,
            l2: 1e-4,
            test_fraction: 0.2,
            seed: 42,
            min_rows: 20,
        }
    }
}

/// Held-out evaluation metrics
#[derive(Debug, Clone)]
pub struct Metrics {
    pub train_rows: usize,
    pub test_rows: usize,
    pub accuracy: f64,
    pub log_loss: f64,
    /// None when the test split contains a single class
    pub roc_auc: Option<f64>,
}

/// Extract the labeled dataset from the store
///
/// Only terminal leads carry a label. Rows that fail feature derivation are
/// skipped and counted; a historical row with missing vehicle data cannot be
/// trained on.
pub async fn extract_training_data(
    pool: &SqlitePool,
    snapshot_at: DateTime<Utc>,
) -> Result<Vec<TrainingExample>, TrainingError> {
    let views = leads::load_terminal_views(pool).await?;

    let mut examples = Vec::with_capacity(views.len());
    let mut skipped = 0usize;
    for view in &views {
        let label = match view.converted {
            Some(c) => c as f64,
            None => {
                // Terminal without a label would be a reconciler defect
                warn!(source_lead_id = %view.source_lead_id, "Terminal lead without converted label, skipping");
                skipped += 1;
                continue;
            }
        };
        match features(view, snapshot_at) {
            Ok(fv) => examples.push(TrainingExample {
                features: fv,
                label,
            }),
            Err(FeatureError::MissingColumn(col)) => {
                warn!(
                    source_lead_id = %view.source_lead_id,
                    column = col,
                    "Skipping row with missing feature column"
                );
                skipped += 1;
            }
        }
    }

    info!(
        rows = examples.len(),
        skipped,
        snapshot_at = %snapshot_at,
        "Training data extracted"
    );
    Ok(examples)
}

/// Fit scalers over the training split
fn fit_scalers(rows: &[&TrainingExample]) -> Vec<ColumnScaler> {
    let n = rows.len().max(1) as f64;
    let width = NUMERIC_FEATURES.len();
    let mut means = vec![0.0; width];
    for row in rows {
        for (i, x) in row.features.numeric().iter().enumerate() {
            means[i] += x / n;
        }
    }
    let mut vars = vec![0.0; width];
    for row in rows {
        for (i, x) in row.features.numeric().iter().enumerate() {
            vars[i] += (x - means[i]).powi(2) / n;
        }
    }
    means
        .into_iter()
        .zip(vars)
        .map(|(mean, var)| ColumnScaler {
            mean,
            std: var.sqrt(),
        })
        .collect()
}

/// Train a logistic regression on the dataset
///
/// Deterministic for a fixed seed: shuffle, split, standardize on the train
/// split, SGD.
pub fn train(
    examples: &[TrainingExample],
    opts: &TrainOptions,
) -> Result<(LogisticModel, Metrics), TrainingError> {
    if examples.len() < opts.min_rows {
        return Err(TrainingError::NotEnoughData(examples.len(), opts.min_rows));
    }
    let positives = examples.iter().filter(|e| e.label > 0.5).count();
    if positives == 0 {
        return Err(TrainingError::SingleClass(0));
    }
    if positives == examples.len() {
        return Err(TrainingError::SingleClass(1));
    }

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut shuffled: Vec<&TrainingExample> = examples.iter().collect();
    shuffled.shuffle(&mut rng);

    let test_len = ((shuffled.len() as f64) * opts.test_fraction).round() as usize;
    let split = shuffled.len() - test_len.min(shuffled.len().saturating_sub(1));
    let (train_rows, test_rows) = shuffled.split_at(split);

    let scalers = fit_scalers(train_rows);

    // Category vocabulary from the train split; anything else scores as 0
    let mut categorical_weights: Vec<HashMap<String, f64>> =
        vec![HashMap::new(); CATEGORICAL_FEATURES.len()];
    for row in train_rows {
        for (i, value) in row.features.categorical().iter().enumerate() {
            categorical_weights[i].entry(value.to_string()).or_insert(0.0);
        }
    }

    let mut numeric_weights = vec![0.0; NUMERIC_FEATURES.len()];
    let mut bias = 0.0;

    // Precompute standardized numeric inputs
    let scaled: Vec<[f64; 5]> = train_rows
        .iter()
        .map(|row| {
            let mut xs = row.features.numeric();
            for (x, scaler) in xs.iter_mut().zip(&scalers) {
                *x = scaler.apply(*x);
            }
            xs
        })
        .collect();

    for _epoch in 0..opts.epochs {
        for (row, xs) in train_rows.iter().zip(&scaled) {
            let mut z = bias;
            for (x, w) in xs.iter().zip(&numeric_weights) {
                z += x * w;
            }
            for (value, weights) in row.features.categorical().iter().zip(&categorical_weights) {
                z += weights.get(*value).copied().unwrap_or(0.0);
            }

            let grad = sigmoid(z) - row.label;
            bias -= opts.learning_rate * grad;
            for (x, w) in xs.iter().zip(numeric_weights.iter_mut()) {
                *w -= opts.learning_rate * (grad * x + opts.l2 * *w);
            }
            for (value, weights) in row
                .features
                .categorical()
                .iter()
                .zip(categorical_weights.iter_mut())
            {
                if let Some(w) = weights.get_mut(*value) {
                    *w -= opts.learning_rate * (grad + opts.l2 * *w);
                }
            }
        }
    }

    let model = LogisticModel {
        numeric_columns: NUMERIC_FEATURES.iter().map(|s| s.to_string()).collect(),
        categorical_columns: CATEGORICAL_FEATURES.iter().map(|s| s.to_string()).collect(),
        scalers,
        numeric_weights,
        categorical_weights,
        bias,
        trained_at: Utc::now(),
        trained_on: train_rows.len(),
    };

    let metrics = evaluate(&model, test_rows, train_rows.len());
    Ok((model, metrics))
}

/// Evaluate a model on a held-out split
fn evaluate(model: &LogisticModel, test_rows: &[&TrainingExample], train_len: usize) -> Metrics {
    let mut correct = 0usize;
    let mut loss = 0.0;
    let mut scored: Vec<(f64, f64)> = Vec::with_capacity(test_rows.len());

    for row in test_rows {
        let p = sigmoid(model.logit(&row.features));
        let p_clamped = p.clamp(1e-12, 1.0 - 1e-12);
        loss -= row.label * p_clamped.ln() + (1.0 - row.label) * (1.0 - p_clamped).ln();
        if (p >= 0.5) == (row.label > 0.5) {
            correct += 1;
        }
        scored.push((p, row.label));
    }

    let n = test_rows.len().max(1) as f64;
    Metrics {
        train_rows: train_len,
        test_rows: test_rows.len(),
        accuracy: correct as f64 / n,
        log_loss: loss / n,
        roc_auc: roc_auc(&scored),
    }
}

/// Rank-based AUC (Mann-Whitney), None for a single-class split
fn roc_auc(scored: &[(f64, f64)]) -> Option<f64> {
    let positives: Vec<f64> = scored.iter().filter(|(_, y)| *y > 0.5).map(|(p, _)| *p).collect();
    let negatives: Vec<f64> = scored.iter().filter(|(_, y)| *y <= 0.5).map(|(p, _)| *p).collect();
    if positives.is_empty() || negatives.is_empty() {
        return None;
    }
    let mut wins = 0.0;
    for p in &positives {
        for q in &negatives {
            if p > q {
                wins += 1.0;
            } else if (p - q).abs() < f64::EPSILON {
                wins += 0.5;
            }
        }
    }
    Some(wins / (positives.len() * negatives.len()) as f64)
}

/// Full training run: extract, fit, evaluate, persist the artifact
pub async fn run_training(
    pool: &SqlitePool,
    model_path: &Path,
    opts: &TrainOptions,
) -> Result<Metrics, TrainingError> {
    let snapshot_at = Utc::now();
    let examples = extract_training_data(pool, snapshot_at).await?;
    let (model, metrics) = train(&examples, opts)?;

    model
        .save(model_path)
        .map_err(|e| TrainingError::Artifact(e.to_string()))?;

    info!(
        path = %model_path.display(),
        train_rows = metrics.train_rows,
        test_rows = metrics.test_rows,
        accuracy = metrics.accuracy,
        log_loss = metrics.log_loss,
        roc_auc = ?metrics.roc_auc,
        "Model trained and saved"
    );
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthetic fixture: conversion driven by price and platform
    fn synthetic_examples(n: usize) -> Vec<TrainingExample> {
        let mut rng = StdRng::seed_from_u64(7);
        use rand::Rng;
        (0..n)
            .map(|i| {
                let cheap = rng.gen_bool(0.5);
                let price = if cheap { 12000.0 } else { 48000.0 };
                let label = if cheap { 1.0 } else { 0.0 };
                TrainingExample {
                    features: FeatureVector {
                        vehicle_price: price + rng.gen_range(-500.0..500.0),
                        vehicle_mileage: rng.gen_range(5000.0..150000.0),
                        days_on_lot: rng.gen_range(5.0..180.0),
                        lead_age_hours: rng.gen_range(1.0..720.0),
                        initial_message_len: rng.gen_range(10.0..300.0),
                        vehicle_make: if i % 2 == 0 { "Toyota" } else { "Ford" }.to_string(),
                        lead_source_platform: "Facebook Marketplace".to_string(),
                        crm_source: "VinSolutions".to_string(),
                    },
                    label,
                }
            })
            .collect()
    }

    #[test]
    fn learns_a_separable_signal() {
        let examples = synthetic_examples(400);
        let (model, metrics) = train(&examples, &TrainOptions::default()).unwrap();
        assert!(metrics.accuracy > 0.9, "accuracy {}", metrics.accuracy);
        assert!(metrics.roc_auc.unwrap() > 0.9);
        model.check_shape().unwrap();
    }

    #[test]
    fn training_is_deterministic_for_a_seed() {
        let examples = synthetic_examples(100);
        let opts = TrainOptions::default();
        let (a, _) = train(&examples, &opts).unwrap();
        let (b, _) = train(&examples, &opts).unwrap();
        assert_eq!(a.bias, b.bias);
        assert_eq!(a.numeric_weights, b.numeric_weights);
    }

    #[test]
    fn refuses_tiny_datasets() {
        let examples = synthetic_examples(5);
        assert!(matches!(
            train(&examples, &TrainOptions::default()),
            Err(TrainingError::NotEnoughData(5, _))
        ));
    }

    #[test]
    fn refuses_single_class_data() {
        let mut examples = synthetic_examples(50);
        for e in &mut examples {
            e.label = 1.0;
        }
        assert!(matches!(
            train(&examples, &TrainOptions::default()),
            Err(TrainingError::SingleClass(1))
        ));
    }

    #[test]
    fn auc_is_one_for_perfect_ranking() {
        let scored = vec![(0.9, 1.0), (0.8, 1.0), (0.2, 0.0), (0.1, 0.0)];
        assert_eq!(roc_auc(&scored), Some(1.0));
    }

    #[test]
    fn auc_is_none_for_single_class() {
        let scored = vec![(0.9, 1.0), (0.8, 1.0)];
        assert_eq!(roc_auc(&scored), None);
    }
}
