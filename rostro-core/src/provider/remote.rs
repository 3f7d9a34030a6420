//! HTTP inference service client.
//!
//! Both providers POST `{ "image": <base64 PNG> }` to the service:
//!
//! - `POST {base_url}/faces`   -> `{ "faces": [{ "box": [t, r, b, l], "embedding": [...] }] }`
//! - `POST {base_url}/objects` -> `{ "objects": [{ "label": "person", "box": [x1, y1, x2, y2] }] }`
//!
//! Transient failures (timeouts, connection errors, 429/502/503/504) are
//! retried with exponential backoff.

use std::io::Cursor;
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use base64::Engine;
use image::{ImageFormat, RgbImage};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{
    EmbeddingProvider, FaceBox, FaceDetection, ObjectBox, ObjectDetection, ObjectProvider,
};
use crate::error::{Result, RostroError};

/// Configuration for the remote inference service.
#[derive(Clone)]
pub struct RemoteProviderConfig {
    /// Service base URL, e.g. `http://127.0.0.1:8500`
    pub base_url: String,
    /// Optional bearer token
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Maximum retry attempts for transient errors
    pub max_retries: u32,
}

impl std::fmt::Debug for RemoteProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl RemoteProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }

    /// Read `ROSTRO_PROVIDER_API_KEY` if set.
    pub fn with_env_api_key(mut self) -> Self {
        self.api_key = std::env::var("ROSTRO_PROVIDER_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        self
    }
}

#[derive(Debug, Serialize)]
struct InferenceRequest {
    image: String,
}

#[derive(Debug, Deserialize)]
struct FacesResponse {
    #[serde(default)]
    faces: Vec<RemoteFace>,
}

#[derive(Debug, Deserialize)]
struct RemoteFace {
    #[serde(rename = "box")]
    bbox: [i32; 4],
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ObjectsResponse {
    #[serde(default)]
    objects: Vec<RemoteObject>,
}

#[derive(Debug, Deserialize)]
struct RemoteObject {
    label: String,
    #[serde(rename = "box")]
    bbox: [i32; 4],
}

/// Blocking JSON client with retry and backoff.
struct InferenceClient {
    client: Client,
    config: RemoteProviderConfig,
}

impl InferenceClient {
    fn new(config: RemoteProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RostroError::Provider(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn post_image<R: DeserializeOwned>(&self, route: &str, image: &RgbImage) -> Result<R> {
        let request = InferenceRequest {
            image: encode_png_base64(image)?,
        };
        let url = format!("{}/{route}", self.config.base_url);

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(self.config.timeout * self.config.max_retries.max(1)),
            ..Default::default()
        };

        backoff::retry_notify(
            backoff,
            || self.post_once(&url, &request),
            |err: RostroError, duration: Duration| {
                warn!(
                    error = %err,
                    retry_after_ms = duration.as_millis() as u64,
                    "Retry scheduled"
                );
            },
        )
        .map_err(|e| match e {
            backoff::Error::Permanent(err) => err,
            backoff::Error::Transient { err, .. } => err,
        })
    }

    fn post_once<R: DeserializeOwned>(
        &self,
        url: &str,
        request: &InferenceRequest,
    ) -> std::result::Result<R, backoff::Error<RostroError>> {
        let start = Instant::now();

        let mut builder = self.client.post(url).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().map_err(|e| {
            let latency_ms = start.elapsed().as_millis() as u64;
            if is_transient_error(&e) {
                warn!(error = %e, latency_ms, "Transient error, will retry");
                backoff::Error::transient(RostroError::Provider(format!(
                    "Transient error (will retry): {e}"
                )))
            } else {
                backoff::Error::permanent(RostroError::Provider(format!(
                    "Inference request failed: {e}"
                )))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let err = RostroError::Provider(format!("Inference service returned status: {status}"));
            return if is_transient_status(status) {
                Err(backoff::Error::transient(err))
            } else {
                Err(backoff::Error::permanent(err))
            };
        }

        let parsed = response.json::<R>().map_err(|e| {
            backoff::Error::permanent(RostroError::Provider(format!(
                "Failed to parse inference response: {e}"
            )))
        })?;

        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            "Inference request completed"
        );
        Ok(parsed)
    }
}

fn encode_png_base64(image: &RgbImage) -> Result<String> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| RostroError::Provider(format!("Failed to encode image: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buffer.into_inner()))
}

/// Check if a reqwest error is transient and should be retried.
fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

/// Check if an HTTP status code indicates a transient error.
fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::BAD_GATEWAY
    )
}

/// Embedding provider backed by the remote `/faces` route.
pub struct RemoteEmbeddingProvider {
    client: InferenceClient,
}

impl RemoteEmbeddingProvider {
    #[instrument(level = "debug", skip_all, fields(base_url = %config.base_url))]
    pub fn new(config: RemoteProviderConfig) -> Result<Self> {
        Ok(Self {
            client: InferenceClient::new(config)?,
        })
    }
}

impl EmbeddingProvider for RemoteEmbeddingProvider {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceDetection>> {
        let response: FacesResponse = self.client.post_image("faces", image)?;
        Ok(response
            .faces
            .into_iter()
            .map(|face| FaceDetection::new(FaceBox::from(face.bbox), face.embedding))
            .collect())
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

/// Object provider backed by the remote `/objects` route.
pub struct RemoteObjectProvider {
    client: InferenceClient,
}

impl RemoteObjectProvider {
    pub fn new(config: RemoteProviderConfig) -> Result<Self> {
        Ok(Self {
            client: InferenceClient::new(config)?,
        })
    }
}

impl ObjectProvider for RemoteObjectProvider {
    fn detect(&self, image: &RgbImage) -> Result<Vec<ObjectDetection>> {
        let response: ObjectsResponse = self.client.post_image("objects", image)?;
        Ok(response
            .objects
            .into_iter()
            .map(|object| ObjectDetection::new(object.label, ObjectBox::from(object.bbox)))
            .collect())
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
