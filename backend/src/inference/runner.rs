use actix_web::web;
use shared::{AnalysisResponse, SeverityLevel};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::model::{ClassifierError, ModelHandle};
use super::preprocess::ImageTensor;
use crate::error::AnalyzeError;

pub const ANALYSIS_COMPLETE: &str = "Analysis complete!";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionResult {
    level: SeverityLevel,
    confidence: f32,
}

impl PredictionResult {
    /// Picks the highest score; on an exact tie the lowest index wins.
    /// Confidence is the winning score, so every score must already be a
    /// probability in `[0, 1]`.
    pub fn from_scores(scores: &[f32]) -> Result<Self, ClassifierError> {
        let expected = SeverityLevel::count();
        if scores.len() != expected {
            return Err(ClassifierError::OutputSize {
                expected,
                actual: scores.len(),
            });
        }
        if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
            return Err(ClassifierError::NonFinite(index));
        }
        if let Some((index, &score)) = scores
            .iter()
            .enumerate()
            .find(|(_, s)| !(0.0..=1.0).contains(*s))
        {
            return Err(ClassifierError::OutOfRange { index, score });
        }

        let mut best = 0;
        for (index, &score) in scores.iter().enumerate().skip(1) {
            if score > scores[best] {
                best = index;
            }
        }

        let level = SeverityLevel::from_index(best).ok_or(ClassifierError::OutputSize {
            expected,
            actual: scores.len(),
        })?;
        Ok(Self {
            level,
            confidence: scores[best],
        })
    }

    pub fn severity_level(&self) -> usize {
        self.level.index()
    }

    pub fn label(&self) -> SeverityLevel {
        self.level
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn to_response(&self) -> AnalysisResponse {
        AnalysisResponse {
            severity_level: self.severity_level() as u8,
            label: self.level.to_string(),
            confidence: self.confidence,
            message: ANALYSIS_COMPLETE.to_string(),
        }
    }
}

/// Runs predictions on actix's blocking pool, at most `workers` at a time,
/// each bounded by `timeout`.
#[derive(Clone)]
pub struct InferenceRunner {
    model: ModelHandle,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl InferenceRunner {
    pub fn new(model: ModelHandle, workers: usize, timeout: Duration) -> Self {
        Self {
            model,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    /// Consumes `tensor`. It is dropped on the worker as soon as the
    /// classifier returns, whatever the outcome. A timed-out worker keeps its
    /// permit until it actually finishes.
    pub async fn run(&self, tensor: ImageTensor) -> Result<PredictionResult, AnalyzeError> {
        let classifier = self.model.classifier().ok_or(AnalyzeError::ModelNotReady)?;
        let permits = self.permits.clone();

        let work = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| AnalyzeError::Inference(e.to_string()))?;
            web::block(move || {
                let _permit = permit;
                let scores = classifier.predict(&tensor);
                drop(tensor);
                scores
            })
            .await
            .map_err(|e| AnalyzeError::Inference(e.to_string()))?
            .map_err(AnalyzeError::from)
        };

        let scores = tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| {
                AnalyzeError::Inference(format!("prediction timed out after {:?}", self.timeout))
            })??;

        Ok(PredictionResult::from_scores(&scores)?)
    }
}
