use actix_multipart::Multipart;
use actix_web::web;
use shared::AnalysisResponse;
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::AnalyzeError;
use crate::inference::model::ModelHandle;
use crate::inference::preprocess::preprocess;
use crate::inference::runner::InferenceRunner;
use crate::upload::intake::receive_upload;

/// Progress of one analysis request. A failure is terminal at whichever
/// stage was last reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Preprocessed,
    Inferred,
    Responded,
}

/// Upload -> preprocess -> inference -> response, with staged files and
/// tensors released on every path.
pub struct Pipeline {
    upload_dir: PathBuf,
    max_upload_bytes: usize,
    runner: InferenceRunner,
}

impl Pipeline {
    pub fn new(config: &ServerConfig, model: ModelHandle) -> Self {
        let runner = InferenceRunner::new(
            model,
            config.inference_workers,
            config.inference_timeout(),
        );
        Self::with_runner(config.upload_dir.clone(), config.max_upload_bytes, runner)
    }

    pub fn with_runner(
        upload_dir: PathBuf,
        max_upload_bytes: usize,
        runner: InferenceRunner,
    ) -> Self {
        Self {
            upload_dir,
            max_upload_bytes,
            runner,
        }
    }

    pub fn model(&self) -> &ModelHandle {
        self.runner.model()
    }

    pub async fn analyze(&self, payload: &mut Multipart) -> Result<AnalysisResponse, AnalyzeError> {
        let request_id = Uuid::new_v4().simple().to_string();
        let mut stage = Stage::Received;
        log::debug!("[{}] {:?}", request_id, stage);

        match self.run(&request_id, &mut stage, payload).await {
            Ok(response) => {
                log::debug!("[{}] {:?}", request_id, Stage::Responded);
                Ok(response)
            }
            Err(e) if e.is_client_error() => {
                log::warn!("[{}] Failed after {:?}: {}", request_id, stage, e);
                Err(e)
            }
            Err(e) => {
                log::error!("[{}] Failed after {:?}: {}", request_id, stage, e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request_id: &str,
        stage: &mut Stage,
        payload: &mut Multipart,
    ) -> Result<AnalysisResponse, AnalyzeError> {
        let upload = receive_upload(payload, &self.upload_dir, self.max_upload_bytes).await?;
        *stage = Stage::Validated;
        log::debug!(
            "[{}] {:?}: {} ({}, {} bytes)",
            request_id,
            stage,
            upload.file_name,
            upload.mime_type,
            upload.size()
        );

        let bytes = upload.file.read().await.map_err(|e| {
            AnalyzeError::Inference(format!("failed to read staged upload: {}", e))
        })?;
        if let Err(e) = upload.file.remove().await {
            log::error!("[{}] Failed to remove staged upload: {}", request_id, e);
        }

        let tensor = web::block(move || preprocess(&bytes))
            .await
            .map_err(|e| AnalyzeError::Inference(e.to_string()))??;
        *stage = Stage::Preprocessed;
        log::debug!("[{}] {:?}", request_id, stage);

        let prediction = self.runner.run(tensor).await?;
        *stage = Stage::Inferred;
        log::debug!(
            "[{}] {:?}: {} ({:.4})",
            request_id,
            stage,
            prediction.label(),
            prediction.confidence()
        );

        Ok(prediction.to_response())
    }
}
