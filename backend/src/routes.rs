use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::{HttpRequest, HttpResponse, error::BlockingError, web};
use futures::TryStreamExt;
use log::{error, info};
use shared::ErrorDetail;
use uuid::Uuid;

use crate::analyzer::ImageAnalyzer;
use crate::analyzer::validation::{ImageValidator, UploadedImage};
use crate::config::UploadConfig;
use crate::error::ApiError;
use crate::llm::EncodedImage;
use crate::throttle::Throttle;

/// Shared, read-only state for the analyze endpoint.
pub struct AppState {
    /// `None` when no API key was configured at startup.
    pub analyzer: Option<ImageAnalyzer>,
    pub validator: ImageValidator,
    pub max_images: usize,
}

impl AppState {
    pub fn new(analyzer: Option<ImageAnalyzer>, upload: &UploadConfig) -> Self {
        Self {
            analyzer,
            validator: ImageValidator::from_config(upload),
            max_images: upload.max_images,
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, state: web::Data<AppState>, throttle: Throttle) {
    cfg.app_data(state).service(
        web::resource("/api/analyze")
            .wrap(throttle)
            .route(web::post().to(analyze_images))
            .default_service(web::to(method_not_allowed)),
    );
}

async fn method_not_allowed(req: HttpRequest) -> HttpResponse {
    HttpResponse::MethodNotAllowed().json(ErrorDetail {
        detail: format!("Method \"{}\" not allowed.", req.method()),
    })
}

async fn analyze_images(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();

    let analyzer = state.analyzer.as_ref().ok_or_else(|| {
        error!("[{}] Rejecting request: OpenAI API key not configured", request_id);
        ApiError::NotConfigured
    })?;

    let uploads = receive_images(payload, &state.validator, state.max_images, request_id).await?;
    info!("[{}] Accepted {} image(s)", request_id, uploads.len());

    let images = web::block(move || {
        uploads
            .iter()
            .map(UploadedImage::encode_base64)
            .collect::<Vec<EncodedImage>>()
    })
    .await
    .map_err(|e| blocking_failure(request_id, e))?;

    let response = analyzer.analyze(images).await.map_err(|e| {
        error!("[{}] Error in analyze_images: {}", request_id, e);
        ApiError::from(e)
    })?;

    info!(
        "[{}] Returning {} ingredient(s) and {} recipe(s)",
        request_id,
        response.ingredients.len(),
        response.recipes.len()
    );
    Ok(HttpResponse::Ok().json(response))
}

fn blocking_failure(request_id: Uuid, e: BlockingError) -> ApiError {
    error!("[{}] Image processing task failed: {}", request_id, e);
    ApiError::Internal(e.to_string())
}

/// File parts seen so far. Bytes are kept for at most `max_images` files;
/// later files are validated and counted, then dropped.
struct Intake {
    max_images: usize,
    received: usize,
    kept: Vec<UploadedImage>,
}

impl Intake {
    fn new(max_images: usize) -> Self {
        Self {
            max_images,
            received: 0,
            kept: Vec::new(),
        }
    }

    fn admit(&mut self, upload: UploadedImage) {
        self.received += 1;
        if self.kept.len() < self.max_images {
            self.kept.push(upload);
        }
    }

    fn finish(self) -> Result<Vec<UploadedImage>, ApiError> {
        if self.received == 0 {
            return Err(ApiError::NoImages);
        }
        if self.received > self.max_images {
            return Err(ApiError::TooManyImages(self.max_images));
        }
        Ok(self.kept)
    }
}

/// Errors the multipart stream raises before its first part when the body
/// simply holds no form data.
fn is_empty_form(e: &MultipartError) -> bool {
    matches!(
        e,
        MultipartError::Incomplete
            | MultipartError::ContentTypeMissing
            | MultipartError::ContentTypeParse
            | MultipartError::ContentTypeIncompatible
            | MultipartError::BoundaryMissing
    )
}

/// Reads the form, validating every part with a file name in upload order.
/// The first invalid file aborts the request; the image count is checked
/// once the whole form has been read.
async fn receive_images(
    mut payload: Multipart,
    validator: &ImageValidator,
    max_images: usize,
    request_id: Uuid,
) -> Result<Vec<UploadedImage>, ApiError> {
    let mut intake = Intake::new(max_images);
    let mut parts_seen = 0;

    loop {
        let mut field = match payload.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if parts_seen == 0 && is_empty_form(&e) => {
                info!("[{}] Request carries no form parts: {}", request_id, e);
                break;
            }
            Err(e) => return Err(ApiError::Multipart(e.to_string())),
        };
        parts_seen += 1;

        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let content_type = field.content_type().map(ToString::to_string);
        let (size, bytes) = read_field(&mut field, validator.max_upload_size()).await?;

        let Some(file_name) = file_name else {
            continue;
        };
        let upload = UploadedImage {
            size,
            ..UploadedImage::new(file_name, content_type, bytes)
        };

        let checker = validator.clone();
        let (upload, verdict) = web::block(move || {
            let verdict = checker.validate(&upload);
            (upload, verdict)
        })
        .await
        .map_err(|e| blocking_failure(request_id, e))?;

        if let Err(rejection) = verdict {
            info!(
                "[{}] Rejected upload {}: {}",
                request_id, upload.file_name, rejection
            );
            return Err(ApiError::InvalidFile {
                file_name: upload.file_name,
                requirements: validator.requirements(),
            });
        }
        intake.admit(upload);
    }

    intake.finish()
}

/// Drains one part. Bytes past `max_size` are counted but not kept.
async fn read_field(field: &mut Field, max_size: usize) -> Result<(usize, Vec<u8>), ApiError> {
    let mut size = 0;
    let mut bytes = Vec::new();
    while let Some(chunk) = field
        .try_next()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))?
    {
        size += chunk.len();
        if size <= max_size {
            bytes.extend_from_slice(&chunk);
        }
    }
    Ok((size, bytes))
}
