//! Error type for the story2comic library.
//!
//! Every failure the pipeline can hit maps to one [`ComicError`] variant,
//! grouped the same way the job record reports them:
//!
//! * **Input** — the request itself is unusable (no text, too many words,
//!   panel count out of range). [`ComicError::is_input_error`] returns `true`.
//! * **Upstream model** — the LLM or image model answered with something we
//!   cannot use (empty completion, bad script JSON, wrong scene count, no
//!   image URL, failed download).
//! * **Timeout** — the whole-job wall clock ran out.
//! * **Internal** — filesystem, rasterisation or PDF assembly failures.
//!
//! There is no page-level "soft" error: a comic with a missing panel is not a
//! comic, so any panel failure after retries fails the whole job.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the story2comic library.
#[derive(Debug, Error)]
pub enum ComicError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Neither story text nor a source file was supplied.
    #[error("No story provided: supply non-empty text or a source file")]
    MissingInput,

    /// A job field failed validation (panel count, layout, job kind …).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Cleaned story text exceeds the configured word limit.
    #[error("Story is too long: {words} words (maximum is {max})")]
    StoryTooLong { words: usize, max: usize },

    /// Uploaded source file does not exist or cannot be read.
    #[error("Source file not found: '{path}'")]
    SourceNotFound { path: PathBuf },

    /// The job store has no record for this id.
    #[error("Job '{id}' not found")]
    JobNotFound { id: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Extraction ────────────────────────────────────────────────────────
    /// Text could not be extracted from the uploaded document.
    #[error("Text extraction failed: {0}")]
    ExtractionFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured chat provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The chat-completion API returned an error.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The model answered with nothing (after trimming).
    #[error("Empty response from the model during {stage}")]
    EmptyCompletion { stage: &'static str },

    /// The script response was not the JSON shape we asked for.
    #[error("Failed to parse comic script: {0}")]
    ScriptParse(String),

    /// The script contained the wrong number of usable scenes.
    #[error("Script returned {actual} usable scenes but {expected} panels were requested")]
    SceneCountMismatch { expected: usize, actual: usize },

    // ── Image errors ──────────────────────────────────────────────────────
    /// The image-generation API returned an error.
    #[error("Image generation API error: {message}")]
    ImageApiError { message: String },

    /// The image model's response had a known shape but carried no URL.
    #[error("Image generation returned no image URL")]
    MissingImageUrl,

    /// The image model's response matched none of the supported shapes.
    #[error("Unrecognized image generation response: {0}")]
    UnrecognizedImageResponse(String),

    /// Downloading the generated image failed.
    #[error("Failed to fetch image '{url}': HTTP {status}")]
    ImageFetchFailed { url: String, status: u16 },

    /// Transport-level download failure (DNS, TLS, timeout).
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Image bytes could not be decoded or re-encoded.
    #[error("Image processing failed: {0}")]
    ImageDecode(String),

    // ── Timeout ───────────────────────────────────────────────────────────
    /// The whole job exceeded its wall-clock budget.
    #[error("Comic generation timed out after {secs}s")]
    Timeout { secs: u64 },

    // ── Internal errors ───────────────────────────────────────────────────
    /// The speech-bubble overlay could not be rendered.
    #[error("Speech bubble rendering failed: {0}")]
    BubbleRender(String),

    /// PDF assembly failed.
    #[error("PDF assembly failed: {0}")]
    PdfBuild(String),

    /// Filesystem failure on a specific path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialisation of a sidecar or job payload failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ComicError {
    /// Wrap an `std::io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ComicError::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for errors caused by the request rather than by a collaborator.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ComicError::MissingInput
                | ComicError::InvalidInput(_)
                | ComicError::StoryTooLong { .. }
                | ComicError::SourceNotFound { .. }
                | ComicError::JobNotFound { .. }
        )
    }
}
