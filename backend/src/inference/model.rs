use ndarray::{Array1, Array2, s};
use serde::{Deserialize, Serialize};
use shared::SeverityLevel;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::preprocess::{INPUT_CHANNELS, INPUT_HEIGHT, INPUT_WIDTH, ImageTensor};

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("model produced {actual} scores, expected {expected}")]
    OutputSize { expected: usize, actual: usize },
    #[error("model produced a non-finite score at index {0}")]
    NonFinite(usize),
    #[error("model produced score {score} at index {index}, outside [0, 1]")]
    OutOfRange { index: usize, score: f32 },
    #[error("model backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("no model artifact found in {0}")]
    Missing(PathBuf),
    #[error("failed to read model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid model artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid model artifact: {0}")]
    Invalid(String),
    /// Only produced by the `torch` backend.
    #[cfg(feature = "torch")]
    #[error("failed to load TorchScript module: {0}")]
    Torch(String),
}

/// A black-box image classifier. Implementations are shared across request
/// workers and must not mutate observable state in `predict`.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// Probabilities over the ordered severity labels. Scores outside
    /// `[0, 1]` are rejected by the runner.
    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>, ClassifierError>;
}

/// Read-only handle to the process's classifier. Built once at startup and
/// cloned cheaply into every request.
#[derive(Clone)]
pub struct ModelHandle {
    classifier: Option<Arc<dyn Classifier>>,
}

impl ModelHandle {
    pub fn not_loaded() -> Self {
        Self { classifier: None }
    }

    pub fn from_classifier<C: Classifier + 'static>(classifier: C) -> Self {
        Self {
            classifier: Some(Arc::new(classifier)),
        }
    }

    /// Loads the artifact in `model_dir`. A TorchScript `model.pt` is
    /// preferred when built with the `torch` feature; otherwise `model.json`.
    pub fn load(model_dir: &Path) -> Result<Self, ModelLoadError> {
        #[cfg(feature = "torch")]
        {
            let torchscript = model_dir.join(super::torch::TorchClassifier::ARTIFACT);
            if torchscript.is_file() {
                let classifier = super::torch::TorchClassifier::load(&torchscript)?;
                return Ok(Self::from_classifier(classifier));
            }
        }

        let artifact = model_dir.join(DenseHead::ARTIFACT);
        if !artifact.is_file() {
            return Err(ModelLoadError::Missing(model_dir.to_path_buf()));
        }
        Ok(Self::from_classifier(DenseHead::from_file(&artifact)?))
    }

    pub fn is_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn classifier(&self) -> Option<Arc<dyn Classifier>> {
        self.classifier.clone()
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.classifier {
            Some(classifier) => write!(f, "ModelHandle::Loaded({})", classifier.name()),
            None => write!(f, "ModelHandle::NotLoaded"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Softmax,
    /// Dense outputs as-is. Only valid for heads that already emit
    /// probabilities.
    Linear,
}

fn default_pool() -> usize {
    4
}

/// On-disk form of a [`DenseHead`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseHeadSpec {
    #[serde(default = "default_pool")]
    pub pool: usize,
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
}

/// Pure-Rust classifier: per-channel average pooling over a `pool x pool`
/// grid followed by a single dense layer.
#[derive(Debug, Clone)]
pub struct DenseHead {
    pool: usize,
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

impl DenseHead {
    pub const ARTIFACT: &'static str = "model.json";

    pub fn from_file(path: &Path) -> Result<Self, ModelLoadError> {
        let contents = std::fs::read(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let spec: DenseHeadSpec = serde_json::from_slice(&contents)?;
        let head = Self::from_spec(spec)?;
        log::info!(
            "Loaded dense-head model from {} (pool {}, {} features)",
            path.display(),
            head.pool,
            head.feature_len()
        );
        Ok(head)
    }

    pub fn from_spec(spec: DenseHeadSpec) -> Result<Self, ModelLoadError> {
        let classes = SeverityLevel::count();
        if spec.pool == 0 || spec.pool > INPUT_HEIGHT.min(INPUT_WIDTH) {
            return Err(ModelLoadError::Invalid(format!(
                "pool must be between 1 and {}, got {}",
                INPUT_HEIGHT.min(INPUT_WIDTH),
                spec.pool
            )));
        }
        if let Some(labels) = &spec.labels {
            if *labels != SeverityLevel::labels() {
                return Err(ModelLoadError::Invalid(format!(
                    "labels {:?} do not match {:?}",
                    labels,
                    SeverityLevel::labels()
                )));
            }
        }
        if spec.weights.len() != classes || spec.bias.len() != classes {
            return Err(ModelLoadError::Invalid(format!(
                "expected {} weight rows and bias terms, got {} and {}",
                classes,
                spec.weights.len(),
                spec.bias.len()
            )));
        }

        let features = spec.pool * spec.pool * INPUT_CHANNELS;
        if let Some(row) = spec.weights.iter().position(|row| row.len() != features) {
            return Err(ModelLoadError::Invalid(format!(
                "weight row {} has {} entries, expected {}",
                row,
                spec.weights[row].len(),
                features
            )));
        }
        let flat: Vec<f32> = spec.weights.into_iter().flatten().collect();
        if flat.iter().chain(spec.bias.iter()).any(|v| !v.is_finite()) {
            return Err(ModelLoadError::Invalid(
                "weights contain non-finite values".to_string(),
            ));
        }

        let weights = Array2::from_shape_vec((classes, features), flat)
            .map_err(|e| ModelLoadError::Invalid(e.to_string()))?;

        Ok(Self {
            pool: spec.pool,
            weights,
            bias: Array1::from(spec.bias),
            activation: spec.activation,
        })
    }

    fn feature_len(&self) -> usize {
        self.weights.ncols()
    }

    /// Mean of each channel within each grid cell, ordered (row, column, channel).
    fn features(&self, input: &ImageTensor) -> Array1<f32> {
        let view = input.view();
        let mut features = Vec::with_capacity(self.feature_len());
        for gy in 0..self.pool {
            let (y0, y1) = cell_bounds(gy, self.pool, INPUT_HEIGHT);
            for gx in 0..self.pool {
                let (x0, x1) = cell_bounds(gx, self.pool, INPUT_WIDTH);
                for c in 0..INPUT_CHANNELS {
                    let cell = view.slice(s![0, y0..y1, x0..x1, c]);
                    features.push(cell.mean().unwrap_or(0.0));
                }
            }
        }
        Array1::from(features)
    }
}

fn cell_bounds(index: usize, cells: usize, extent: usize) -> (usize, usize) {
    (index * extent / cells, (index + 1) * extent / cells)
}

fn softmax(logits: &Array1<f32>) -> Vec<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

impl Classifier for DenseHead {
    fn name(&self) -> &str {
        "dense-head"
    }

    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>, ClassifierError> {
        let logits = self.weights.dot(&self.features(input)) + &self.bias;
        let scores = match self.activation {
            Activation::Softmax => softmax(&logits),
            Activation::Linear => logits.to_vec(),
        };
        Ok(scores)
    }
}

/// Locks a backend that needs exclusive access. A panic during an earlier
/// prediction poisons the lock but leaves the model weights untouched, so the
/// guard is recovered instead of failing every later request.
pub fn lock_backend<T>(backend: &Mutex<T>) -> MutexGuard<'_, T> {
    backend.lock().unwrap_or_else(PoisonError::into_inner)
}
