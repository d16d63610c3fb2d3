use crate::{
    api_client::{ApiClientError, BatchResult, ClassifyMode, UploadedFile},
    server::SharedState,
};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No files selected")]
    NoFiles,
    #[error("Unknown classification mode: {0}")]
    BadMode(String),
    #[error("Failed to read upload: {0}")]
    Multipart(String),
    #[error("Classification request failed: {0}")]
    Api(#[from] ApiClientError),
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NoFiles | Self::BadMode(_) | Self::Multipart(_) => StatusCode::BAD_REQUEST,
            // the API already answered with a status; pass it through
            Self::Api(ApiClientError::Rejected { status, .. }) => *status,
            Self::Api(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Re-read the browser's form and forward it to the API. The API key never
/// reaches the browser; it lives in this process's configuration.
#[instrument(skip(state, multipart))]
pub async fn upload(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<BatchResult>, UploadError> {
    let mut mode = ClassifyMode::Memory;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Multipart(e.to_string()))?
    {
        match field.name() {
            Some("mode") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| UploadError::Multipart(e.to_string()))?;
                mode = value.parse().map_err(UploadError::BadMode)?;
            }
            _ => {
                let filename = match field.file_name() {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| UploadError::Multipart(e.to_string()))?;
                files.push(UploadedFile {
                    filename,
                    content_type,
                    data,
                });
            }
        }
    }

    if files.is_empty() {
        return Err(UploadError::NoFiles);
    }

    tracing::info!("Forwarding {} files in {:?} mode", files.len(), mode);
    let batch = state.api_client.classify(mode, files).await?;

    Ok(Json(batch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_rejections_keep_their_status() {
        let error = UploadError::Api(ApiClientError::Rejected {
            status: StatusCode::FORBIDDEN,
            detail: "nope".to_string(),
        });
        assert_eq!(error.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn local_validation_errors_are_bad_requests() {
        assert_eq!(
            UploadError::NoFiles.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            UploadError::BadMode("disk".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn unreachable_api_maps_to_bad_gateway() {
        let error = UploadError::Api(ApiClientError::MaxRetriesExceeded);
        assert_eq!(error.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
