//! Panel illustration: image model → download → cover-fit → speech bubble.
//!
//! ## Response shapes
//!
//! Hosted image models disagree on what "the output" is. Depending on model
//! and version we see a bare URL string, an array of URLs, an object with a
//! `url`, or a prediction object with an `output` array. [`ImageOutput`]
//! names each shape explicitly; anything else is
//! [`ComicError::UnrecognizedImageResponse`].
//!
//! ## Retry unit
//!
//! One attempt = generate + normalise + download. A dead CDN link is as
//! transient as a 503 from the model, so both are retried together under
//! [`crate::config::ComicConfig::image_retry`].

use crate::config::ComicConfig;
use crate::error::ComicError;
use crate::output::{panel_image_path, panel_raw_path};
use crate::pipeline::bubble::composite_bubble;
use crate::pipeline::retry::with_retry;
use crate::prompts::PANEL_ASPECT_RATIO;
use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use serde_json::Value;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Finished panel canvas width in pixels.
pub const PANEL_WIDTH: u32 = 1280;
/// Finished panel canvas height in pixels.
pub const PANEL_HEIGHT: u32 = 720;

/// Input sent to the image model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub aspect_ratio: String,
    pub output_format: String,
    pub output_quality: u8,
    pub num_outputs: u8,
}

impl ImageRequest {
    /// The fixed request used for every panel: one wide PNG.
    pub fn panel(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: PANEL_ASPECT_RATIO.to_string(),
            output_format: "png".to_string(),
            output_quality: 90,
            num_outputs: 1,
        }
    }
}

/// Text-to-image model. Returns the model's raw output value.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, model: &str, request: &ImageRequest) -> Result<Value, ComicError>;
}

/// Downloads bytes from a URL.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fails with [`ComicError::ImageFetchFailed`] on a non-success status.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ComicError>;
}

// ── Response normalisation ───────────────────────────────────────────────

/// The response shapes image models are known to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutput {
    /// `"https://…"`
    Url(String),
    /// `["https://…", …]`
    Urls(Vec<String>),
    /// `{"url": "https://…"}`
    Object { url: String },
    /// `{"output": ["https://…", …]}`
    Prediction { output: Vec<String> },
}

impl ImageOutput {
    /// Classify a raw response value.
    pub fn from_value(value: Value) -> Result<Self, ComicError> {
        match value {
            Value::String(url) => Ok(ImageOutput::Url(url)),
            Value::Array(items) => string_list(items).map(ImageOutput::Urls),
            Value::Object(mut map) => {
                if let Some(url) = map.get("url").and_then(Value::as_str) {
                    return Ok(ImageOutput::Object {
                        url: url.to_string(),
                    });
                }
                match map.remove("output") {
                    Some(Value::Array(items)) => {
                        string_list(items).map(|output| ImageOutput::Prediction { output })
                    }
                    Some(Value::String(url)) => Ok(ImageOutput::Prediction { output: vec![url] }),
                    _ => Err(ComicError::UnrecognizedImageResponse(format!(
                        "object without \"url\" or \"output\" (keys: {})",
                        map.keys().cloned().collect::<Vec<_>>().join(", ")
                    ))),
                }
            }
            other => Err(ComicError::UnrecognizedImageResponse(format!(
                "unexpected JSON value: {other}"
            ))),
        }
    }

    /// The first non-empty URL, if any.
    pub fn first_url(&self) -> Option<&str> {
        let url = match self {
            ImageOutput::Url(url) | ImageOutput::Object { url } => Some(url.as_str()),
            ImageOutput::Urls(urls) | ImageOutput::Prediction { output: urls } => {
                urls.first().map(String::as_str)
            }
        };
        url.map(str::trim).filter(|u| !u.is_empty())
    }
}

fn string_list(items: Vec<Value>) -> Result<Vec<String>, ComicError> {
    items
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            other => Err(ComicError::UnrecognizedImageResponse(format!(
                "non-string list item: {other}"
            ))),
        })
        .collect()
}

/// Normalise any supported response to a single URL.
pub fn normalize_image_url(value: Value) -> Result<String, ComicError> {
    ImageOutput::from_value(value)?
        .first_url()
        .map(str::to_string)
        .ok_or(ComicError::MissingImageUrl)
}

// ── Post-processing ──────────────────────────────────────────────────────

/// Scale to fully cover the panel canvas and crop the overflow (never letterbox).
pub fn cover_fit(img: &DynamicImage) -> DynamicImage {
    img.resize_to_fill(PANEL_WIDTH, PANEL_HEIGHT, FilterType::Lanczos3)
}

/// Decode, cover-fit and re-encode as PNG.
pub fn normalize_panel_image(bytes: &[u8]) -> Result<Vec<u8>, ComicError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ComicError::ImageDecode(format!("cannot decode generated image: {e}")))?;
    let fitted = cover_fit(&img);
    let mut out = Vec::new();
    fitted
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| ComicError::ImageDecode(format!("cannot encode panel: {e}")))?;
    debug!(
        "Cover-fit {}x{} → {}x{}",
        img.width(),
        img.height(),
        PANEL_WIDTH,
        PANEL_HEIGHT
    );
    Ok(out)
}

// ── Panel generation ─────────────────────────────────────────────────────

/// A finished panel on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPanel {
    /// Composited image (`panel-NNN.png`).
    pub path: PathBuf,
    /// Pre-bubble image (`panel-NNN.raw.png`).
    pub raw_path: PathBuf,
    /// URL the image model returned.
    pub source_url: String,
}

/// Generate, download, fit and letter one panel.
pub async fn generate_panel_image(
    generator: &dyn ImageGenerator,
    fetcher: &dyn ImageFetcher,
    index: usize,
    panels_dir: &Path,
    prompt: &str,
    dialogue: &str,
    config: &ComicConfig,
) -> Result<GeneratedPanel, ComicError> {
    let request = ImageRequest::panel(prompt);
    let label = format!("panel {} image", index + 1);

    let (source_url, bytes) = with_retry(&label, config.image_retry, |_| {
        let request = &request;
        async move {
            let value = generator.generate(&config.image_model, request).await?;
            let url = normalize_image_url(value)?;
            let bytes = fetcher.fetch(&url).await?;
            Ok::<_, ComicError>((url, bytes))
        }
    })
    .await?;
    debug!("Panel {}: fetched {} bytes from {}", index + 1, bytes.len(), source_url);

    let dialogue = dialogue.to_string();
    let (raw_png, final_png) = tokio::task::spawn_blocking(move || {
        let raw = normalize_panel_image(&bytes)?;
        let lettered = composite_bubble(&raw, &dialogue)?;
        Ok::<_, ComicError>((raw, lettered))
    })
    .await
    .map_err(|e| ComicError::Internal(format!("Panel processing task panicked: {e}")))??;

    let raw_path = panel_raw_path(panels_dir, index);
    tokio::fs::write(&raw_path, &raw_png)
        .await
        .map_err(|e| ComicError::io(&raw_path, e))?;

    let path = panel_image_path(panels_dir, index);
    tokio::fs::write(&path, &final_png)
        .await
        .map_err(|e| ComicError::io(&path, e))?;

    info!("Panel {} written to {}", index + 1, path.display());
    Ok(GeneratedPanel {
        path,
        raw_path,
        source_url,
    })
}

// ── HTTP implementations ─────────────────────────────────────────────────

/// [`ImageFetcher`] over reqwest.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, ComicError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ComicError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ComicError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ComicError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ComicError::ImageFetchFailed {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ComicError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }
}

const REPLICATE_API: &str = "https://api.replicate.com/v1";

/// [`ImageGenerator`] for Replicate-hosted models.
///
/// Uses `Prefer: wait` so most predictions finish inside the create call;
/// slower ones are polled until they reach a terminal status.
#[derive(Debug, Clone)]
pub struct ReplicateImageGenerator {
    api_token: String,
    client: reqwest::Client,
    poll_interval: Duration,
    max_polls: u32,
}

impl ReplicateImageGenerator {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            client: reqwest::Client::new(),
            poll_interval: Duration::from_secs(2),
            max_polls: 90,
        }
    }

    /// Read the token from `REPLICATE_API_TOKEN`.
    pub fn from_env() -> Result<Self, ComicError> {
        match std::env::var("REPLICATE_API_TOKEN") {
            Ok(token) if !token.trim().is_empty() => Ok(Self::new(token)),
            _ => Err(ComicError::ProviderNotConfigured {
                provider: "replicate".to_string(),
                hint: "Set REPLICATE_API_TOKEN to generate panel images.".to_string(),
            }),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ComicError> {
        let response = request
            .header("Authorization", format!("Token {}", self.api_token))
            .send()
            .await
            .map_err(|e| ComicError::ImageApiError {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ComicError::ImageApiError {
                message: format!("HTTP {status}: {body}"),
            });
        }
        response.json().await.map_err(|e| ComicError::ImageApiError {
            message: format!("invalid prediction JSON: {e}"),
        })
    }
}

#[async_trait]
impl ImageGenerator for ReplicateImageGenerator {
    async fn generate(&self, model: &str, request: &ImageRequest) -> Result<Value, ComicError> {
        let create = self
            .client
            .post(format!("{REPLICATE_API}/models/{model}/predictions"))
            .header("Prefer", "wait")
            .json(&serde_json::json!({ "input": request }));
        let mut prediction = self.send(create).await?;

        for _ in 0..self.max_polls {
            match prediction.get("status").and_then(Value::as_str) {
                Some("succeeded") => {
                    return Ok(prediction.get("output").cloned().unwrap_or(Value::Null));
                }
                Some(status @ ("failed" | "canceled")) => {
                    let detail = prediction
                        .get("error")
                        .map(Value::to_string)
                        .unwrap_or_default();
                    return Err(ComicError::ImageApiError {
                        message: format!("prediction {status}: {detail}"),
                    });
                }
                _ => {}
            }

            let poll_url = prediction
                .pointer("/urls/get")
                .and_then(Value::as_str)
                .ok_or_else(|| ComicError::ImageApiError {
                    message: "prediction has no polling URL".into(),
                })?
                .to_string();
            tokio::time::sleep(self.poll_interval).await;
            prediction = self.send(self.client.get(&poll_url)).await?;
        }

        Err(ComicError::ImageApiError {
            message: format!("prediction did not finish after {} polls", self.max_polls),
        })
    }
}
