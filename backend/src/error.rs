use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::inference::model::ClassifierError;
use crate::inference::preprocess::PreprocessError;
use crate::upload::staging::StagingError;

/// Failure of a single analysis request. Every variant is terminal for the
/// request and maps to exactly one HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("{0}")]
    Validation(String),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Model is not loaded yet. Please retry later.")]
    ModelNotReady,
    #[error("Inference failed: {0}")]
    Inference(String),
}

impl AnalyzeError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, AnalyzeError::Validation(_) | AnalyzeError::Decode(_))
    }

    /// Message safe to hand back to the caller. Server-side failures are
    /// reduced to a generic message so internals never reach the client.
    fn client_message(&self) -> String {
        match self {
            AnalyzeError::Validation(message) => message.clone(),
            AnalyzeError::Decode(_) => "Uploaded file is not a readable image.".to_string(),
            AnalyzeError::ModelNotReady => self.to_string(),
            AnalyzeError::Inference(_) => "Failed to analyze image.".to_string(),
        }
    }
}

impl ResponseError for AnalyzeError {
    fn status_code(&self) -> StatusCode {
        match self {
            AnalyzeError::Validation(_) | AnalyzeError::Decode(_) => StatusCode::BAD_REQUEST,
            AnalyzeError::ModelNotReady => StatusCode::SERVICE_UNAVAILABLE,
            AnalyzeError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.client_message(),
        })
    }
}

impl From<PreprocessError> for AnalyzeError {
    fn from(err: PreprocessError) -> Self {
        AnalyzeError::Decode(err.to_string())
    }
}

impl From<ClassifierError> for AnalyzeError {
    fn from(err: ClassifierError) -> Self {
        AnalyzeError::Inference(err.to_string())
    }
}

impl From<StagingError> for AnalyzeError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::TooLarge { limit } => AnalyzeError::Validation(format!(
                "File too large. Maximum size is {} bytes.",
                limit
            )),
            StagingError::Io(e) => AnalyzeError::Inference(format!("staging failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            AnalyzeError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AnalyzeError::Decode("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AnalyzeError::ModelNotReady.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AnalyzeError::Inference("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_web::test]
    async fn server_errors_hide_details() {
        let response =
            AnalyzeError::Inference("tensor shape [1, 3] mismatch".into()).error_response();
        let body = to_bytes(response.into_body()).await.unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, "Failed to analyze image.");
    }

    #[actix_web::test]
    async fn validation_errors_keep_message() {
        let response = AnalyzeError::Validation("No image file uploaded.".into()).error_response();
        let body = to_bytes(response.into_body()).await.unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, "No image file uploaded.");
    }
}
