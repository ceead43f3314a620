use actix_multipart::{Field, Multipart, MultipartError};
use futures::TryStreamExt;
use std::path::Path;

use super::staging::StagedFile;
use crate::error::AnalyzeError;

/// Multipart field names accepted for the uploaded image.
pub const FILE_FIELDS: [&str; 2] = ["image", "file"];

/// A validated upload, staged on disk for the lifetime of one request.
#[derive(Debug)]
pub struct StagedUpload {
    pub file: StagedFile,
    pub mime_type: String,
    pub file_name: String,
}

impl StagedUpload {
    pub fn size(&self) -> usize {
        self.file.len()
    }
}

pub fn validate_content_type(content_type: Option<&str>) -> Result<String, AnalyzeError> {
    match content_type {
        Some(mime) if mime.starts_with("image/") => Ok(mime.to_string()),
        _ => Err(AnalyzeError::Validation(
            "Invalid file type. Only images are allowed.".to_string(),
        )),
    }
}

fn malformed(err: MultipartError) -> AnalyzeError {
    AnalyzeError::Validation(format!("Malformed multipart body: {}", err))
}

/// Reads the multipart body, staging the single `image`/`file` field under
/// `upload_dir`. Any other fields are drained and ignored. On error, whatever
/// was staged so far is removed before returning.
pub async fn receive_upload(
    payload: &mut Multipart,
    upload_dir: &Path,
    max_bytes: usize,
) -> Result<StagedUpload, AnalyzeError> {
    let mut upload: Option<StagedUpload> = None;

    while let Some(mut field) = payload.try_next().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        if !FILE_FIELDS.contains(&name.as_str()) {
            drain_field(&mut field, max_bytes).await?;
            continue;
        }
        if upload.is_some() {
            return Err(AnalyzeError::Validation(format!(
                "Unexpected field: only one image may be uploaded, got a second '{}'",
                name
            )));
        }

        let mime_type = validate_content_type(field.content_type().map(|m| m.essence_str()))?;
        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or("upload")
            .to_string();

        let mut writer = StagedFile::create(upload_dir, &file_name, max_bytes).await?;
        while let Some(chunk) = field.try_next().await.map_err(malformed)? {
            writer.write_chunk(&chunk).await?;
        }
        let file = writer.finish().await?;

        if file.is_empty() {
            log::debug!("Ignoring empty upload field '{}'", name);
            continue;
        }
        upload = Some(StagedUpload {
            file,
            mime_type,
            file_name,
        });
    }

    upload.ok_or_else(|| AnalyzeError::Validation("No image file uploaded.".to_string()))
}

async fn drain_field(field: &mut Field, max_bytes: usize) -> Result<(), AnalyzeError> {
    let mut seen = 0usize;
    while let Some(chunk) = field.try_next().await.map_err(malformed)? {
        seen += chunk.len();
        if seen > max_bytes {
            return Err(AnalyzeError::Validation(
                "Form field exceeds the upload size limit.".to_string(),
            ));
        }
    }
    Ok(())
}
