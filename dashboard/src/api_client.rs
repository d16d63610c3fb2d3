use crate::config::ApiConfig;
use bytes::Bytes;
use reqwest::{multipart, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::instrument;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Error, Debug)]
pub enum ApiClientError {
    #[error("Failed to reach the classification API: {0}")]
    ConnectionFailed(#[from] reqwest::Error),
    #[error("Maximum connection retries exceeded.")]
    MaxRetriesExceeded,
    #[error("The classification API rejected the request: {status} {detail}")]
    Rejected { status: StatusCode, detail: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub filename: String,
    pub class_index: usize,
    pub predicted_class: String,
    pub confidence: f32,
    pub probabilities: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub predictions: Vec<Prediction>,
    pub processing_time: f64,
    pub total_images: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyMode {
    Memory,
    Paths,
}

impl ClassifyMode {
    pub fn endpoint(&self) -> &'static str {
        match self {
            ClassifyMode::Memory => "/classify-batch-memory",
            ClassifyMode::Paths => "/classify-batch-paths",
        }
    }
}

impl FromStr for ClassifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(ClassifyMode::Memory),
            "paths" => Ok(ClassifyMode::Paths),
            other => Err(format!(
                "{} is not a classification mode. Use either `memory` or `paths`.",
                other
            )),
        }
    }
}

pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

pub struct ApiClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    /// Probe the API until it answers, with capped exponential backoff.
    /// The API loads its model before it binds, so the first attempts are
    /// expected to fail on a cold start.
    pub async fn connect(api_config: &ApiConfig) -> Result<Self, ApiClientError> {
        let http = Client::new();
        let base_url = api_config.get_address();

        let mut retry_delay = Duration::from_millis(50);
        let max_retry_delay = Duration::from_secs(1);
        let max_retries = 10;
        let mut retry_count = 0;

        while retry_count < max_retries {
            let probe = http
                .get(&base_url)
                .header(API_KEY_HEADER, &api_config.api_key)
                .send();

            match timeout(Duration::from_secs(1), probe).await {
                Ok(Ok(response)) if response.status().is_success() => {
                    return Ok(Self {
                        http,
                        base_url,
                        api_key: api_config.api_key.clone(),
                    });
                }
                Ok(Ok(response)) => {
                    tracing::error!("API probe rejected with status {}", response.status());
                }
                Ok(Err(e)) => {
                    tracing::error!("Failed to reach the classification API: {:?}", e);
                }
                Err(_) => {
                    tracing::error!("Connection timeout");
                }
            }

            retry_count += 1;
            let jitter = rand::random::<f32>() * 0.2 + 0.9;
            sleep(retry_delay.mul_f32(jitter)).await;
            retry_delay = (retry_delay * 2).min(max_retry_delay);
        }

        Err(ApiClientError::MaxRetriesExceeded)
    }

    #[instrument(skip(self, files))]
    pub async fn classify(
        &self,
        mode: ClassifyMode,
        files: Vec<UploadedFile>,
    ) -> Result<BatchResult, ApiClientError> {
        let mut form = multipart::Form::new();
        for file in files {
            let part = multipart::Part::bytes(file.data.to_vec())
                .file_name(file.filename)
                .mime_str(&file.content_type)?;
            form = form.part("files", part);
        }

        let response = self
            .http
            .post(format!("{}{}", self.base_url, mode.endpoint()))
            .header(API_KEY_HEADER, &self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ApiClientError::Rejected { status, detail });
        }

        Ok(response.json::<BatchResult>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_maps_to_the_api_endpoints() {
        assert_eq!(
            "memory".parse::<ClassifyMode>().unwrap().endpoint(),
            "/classify-batch-memory"
        );
        assert_eq!(
            "paths".parse::<ClassifyMode>().unwrap().endpoint(),
            "/classify-batch-paths"
        );
        assert!("disk".parse::<ClassifyMode>().is_err());
    }

    #[test]
    fn batch_result_deserializes_from_the_api_shape() {
        let body = serde_json::json!({
            "predictions": [{
                "filename": "cat.jpg",
                "class_index": 0,
                "predicted_class": "cats",
                "confidence": 0.93,
                "probabilities": { "cats": 0.93, "dogs": 0.07 }
            }],
            "processing_time": 0.42,
            "total_images": 1
        });

        let batch: BatchResult = serde_json::from_value(body).unwrap();
        assert_eq!(batch.total_images, 1);
        assert_eq!(batch.predictions[0].predicted_class, "cats");
        assert!((batch.predictions[0].probabilities["dogs"] - 0.07).abs() < 1e-6);
    }
}
