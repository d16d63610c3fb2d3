use crate::{classifier::Classification, server::SharedState};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ClassifyRequestError {
    #[error("No files provided")]
    EmptyBatch,
    #[error("File {0} is not an image")]
    NotAnImage(String),
    #[error("Failed to read multipart upload: {0}")]
    Multipart(String),
    #[error("Failed to store upload {0}: {1}")]
    Storage(String, String),
    #[error("No file in the batch could be classified")]
    NothingClassified,
}

impl IntoResponse for ClassifyRequestError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::EmptyBatch | Self::NotAnImage(_) | Self::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Storage(_, _) | Self::NothingClassified => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct Prediction {
    pub filename: String,
    pub class_index: usize,
    pub predicted_class: String,
    pub confidence: f32,
    pub probabilities: BTreeMap<String, f32>,
}

#[derive(Debug, Serialize)]
pub struct BatchResult {
    pub predictions: Vec<Prediction>,
    pub processing_time: f64,
    pub total_images: usize,
}

struct Upload {
    filename: String,
    data: Bytes,
}

/// Drain the multipart body. Every part must carry an `image/*` content
/// type; anything else rejects the whole request before inference starts.
async fn collect_uploads(mut multipart: Multipart) -> Result<Vec<Upload>, ClassifyRequestError> {
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ClassifyRequestError::Multipart(e.to_string()))?
    {
        let filename = field
            .file_name()
            .unwrap_or("upload")
            .to_string();

        match field.content_type() {
            Some(content_type) if content_type.starts_with("image/") => {}
            _ => return Err(ClassifyRequestError::NotAnImage(filename)),
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| ClassifyRequestError::Multipart(e.to_string()))?;
        uploads.push(Upload { filename, data });
    }

    if uploads.is_empty() {
        return Err(ClassifyRequestError::EmptyBatch);
    }

    Ok(uploads)
}

/// Assemble the response in upload order. Files that failed to classify
/// were skipped; `total_images` counts only what made it through. A batch
/// where nothing survived is an inference-side failure.
fn build_batch(
    outcomes: Vec<(String, Option<Classification>)>,
    processing_time: f64,
) -> Result<BatchResult, ClassifyRequestError> {
    let predictions: Vec<Prediction> = outcomes
        .into_iter()
        .filter_map(|(filename, classification)| {
            classification.map(|c| Prediction {
                filename,
                class_index: c.class_index,
                predicted_class: c.label,
                confidence: c.confidence,
                probabilities: c.probabilities,
            })
        })
        .collect();

    if predictions.is_empty() {
        return Err(ClassifyRequestError::NothingClassified);
    }

    Ok(BatchResult {
        total_images: predictions.len(),
        processing_time,
        predictions,
    })
}

#[instrument(skip(state, multipart))]
pub async fn classify_batch_memory(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<BatchResult>, ClassifyRequestError> {
    state.metrics.record_request("classify-batch-memory");
    let uploads = collect_uploads(multipart).await?;
    tracing::info!("In-memory classification: {} files", uploads.len());

    let started = Instant::now();
    let mut outcomes = Vec::with_capacity(uploads.len());
    for upload in &uploads {
        let outcome = state.classifier.classify_bytes(&upload.data);
        if let Err(ref e) = outcome {
            tracing::warn!("Skipping {}: {}", upload.filename, e);
        }
        outcomes.push((upload.filename.clone(), outcome.ok()));
    }

    let batch = build_batch(outcomes, started.elapsed().as_secs_f64())?;
    state
        .metrics
        .record_classification_duration(batch.processing_time, "classify-batch-memory");
    Ok(Json(batch))
}

#[instrument(skip(state, multipart))]
pub async fn classify_batch_paths(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<BatchResult>, ClassifyRequestError> {
    state.metrics.record_request("classify-batch-paths");
    let uploads = collect_uploads(multipart).await?;
    tracing::info!("File-backed classification: {} files", uploads.len());

    let started = Instant::now();

    // The guards own the scratch files; dropping them at the end of the
    // handler removes the files on every exit path, early errors included.
    let mut saved = Vec::with_capacity(uploads.len());
    for upload in &uploads {
        let file = state
            .scratch
            .save(&upload.filename, &upload.data)
            .map_err(|e| ClassifyRequestError::Storage(upload.filename.clone(), e.to_string()))?;
        saved.push(file);
    }

    let mut outcomes = Vec::with_capacity(uploads.len());
    for (upload, file) in uploads.iter().zip(&saved) {
        let outcome = state.classifier.classify_path(file.path());
        if let Err(ref e) = outcome {
            tracing::warn!("Skipping {}: {}", upload.filename, e);
        }
        outcomes.push((upload.filename.clone(), outcome.ok()));
    }

    let batch = build_batch(outcomes, started.elapsed().as_secs_f64())?;
    state
        .metrics
        .record_classification_duration(batch.processing_time, "classify-batch-paths");
    Ok(Json(batch))
}
