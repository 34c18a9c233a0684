use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use shared::ErrorDetail;

use crate::analyzer::AnalyzerError;

/// Every way a request to the analyze endpoint can fail.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("OpenAI API key not configured")]
    NotConfigured,
    #[error("No images provided")]
    NoImages,
    #[error("Invalid file: {file_name}. Must be {requirements}")]
    InvalidFile {
        file_name: String,
        requirements: String,
    },
    #[error("Maximum {0} images allowed")]
    TooManyImages(usize),
    #[error("Malformed multipart payload: {0}")]
    Multipart(String),
    #[error("Analysis failed: {0}")]
    Analysis(#[from] AnalyzerError),
    #[error("Analysis failed: {0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NoImages
            | ApiError::InvalidFile { .. }
            | ApiError::TooManyImages(_)
            | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::NotConfigured | ApiError::Analysis(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorDetail {
            detail: self.to_string(),
        })
    }
}
