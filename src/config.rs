//! Configuration types for comic generation.
//!
//! Pipeline-wide knobs live in [`ComicConfig`], built via its
//! [`ComicConfigBuilder`]. Per-job choices (panel count, layout, style) are
//! part of [`crate::job::ComicJobData`] and use the enums defined here.

use crate::error::ComicError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Smallest number of panels a comic may have.
pub const MIN_PANELS: usize = 4;
/// Largest number of panels a comic may have.
pub const MAX_PANELS: usize = 8;

/// Configuration shared by every job a [`crate::comic::ComicPipeline`] runs.
///
/// # Example
/// ```rust
/// use story2comic::ComicConfig;
/// use std::time::Duration;
///
/// let config = ComicConfig::builder()
///     .max_words(3000)
///     .job_timeout(Duration::from_secs(300))
///     .build()
///     .unwrap();
/// assert_eq!(config.max_words, 3000);
/// ```
#[derive(Clone)]
pub struct ComicConfig {
    /// Chat model used for story analysis and scripting. Default: `gpt-4.1-mini`.
    ///
    /// Only consulted when the provider is created from the environment;
    /// a pre-built `provider` already carries its model.
    pub chat_model: String,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for both chat calls. Default: 0.7.
    ///
    /// Scripting is a creative task; unlike transcription it benefits from
    /// some randomness. The script's JSON shape is enforced by validation,
    /// not by a low temperature.
    pub temperature: f32,

    /// Output token budget for the story summary. Default: 1200.
    pub analysis_max_tokens: usize,

    /// Output token budget for the scene script. Default: 3000.
    pub script_max_tokens: usize,

    /// Image model identifier passed to the image generator.
    /// Default: `black-forest-labs/flux-schnell`.
    pub image_model: String,

    /// Retry policy for the story analysis call. Default: 2 retries, 800 ms.
    pub analysis_retry: RetryPolicy,

    /// Retry policy for the script call. Default: 2 retries, 1000 ms.
    pub script_retry: RetryPolicy,

    /// Retry policy for each panel image (generate + download). Default: 2 retries, 1200 ms.
    pub image_retry: RetryPolicy,

    /// Maximum words accepted after whitespace cleanup. Default: 5000.
    pub max_words: usize,

    /// Wall-clock budget for one whole job. Default: 10 minutes.
    pub job_timeout: Duration,

    /// Delay before a completed job's artifacts are deleted. Default: 24 hours.
    ///
    /// `None` keeps artifacts forever (the CLI uses this).
    pub cleanup_delay: Option<Duration>,

    /// Root under which each job gets `<job_id>/panels/`.
    pub work_root: PathBuf,

    /// Directory receiving `<job_id>-comic.pdf`.
    pub output_root: PathBuf,

    /// Prefix for preview/download pointers written to the job result. Default: `/api/comic`.
    pub public_base_path: String,

    /// Timeout for a single image download in seconds. Default: 60.
    pub fetch_timeout_secs: u64,

    /// Optional stage/panel progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ComicConfig {
    fn default() -> Self {
        let tmp = std::env::temp_dir().join("story2comic");
        Self {
            chat_model: "gpt-4.1-mini".to_string(),
            provider_name: None,
            provider: None,
            temperature: 0.7,
            analysis_max_tokens: 1200,
            script_max_tokens: 3000,
            image_model: "black-forest-labs/flux-schnell".to_string(),
            analysis_retry: RetryPolicy::new(2, 800),
            script_retry: RetryPolicy::new(2, 1000),
            image_retry: RetryPolicy::new(2, 1200),
            max_words: 5000,
            job_timeout: Duration::from_secs(10 * 60),
            cleanup_delay: Some(Duration::from_secs(24 * 60 * 60)),
            work_root: tmp.join("work"),
            output_root: tmp.join("output"),
            public_base_path: "/api/comic".to_string(),
            fetch_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ComicConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComicConfig")
            .field("chat_model", &self.chat_model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("image_model", &self.image_model)
            .field("analysis_retry", &self.analysis_retry)
            .field("script_retry", &self.script_retry)
            .field("image_retry", &self.image_retry)
            .field("max_words", &self.max_words)
            .field("job_timeout", &self.job_timeout)
            .field("cleanup_delay", &self.cleanup_delay)
            .field("work_root", &self.work_root)
            .field("output_root", &self.output_root)
            .finish()
    }
}

impl ComicConfig {
    /// Create a new builder for `ComicConfig`.
    pub fn builder() -> ComicConfigBuilder {
        ComicConfigBuilder {
            config: Self::default(),
        }
    }

    /// Working directory owned by one job.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.work_root.join(job_id)
    }

    /// Directory holding a job's panel images and sidecars.
    pub fn panels_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("panels")
    }

    /// Final PDF location for a job.
    pub fn pdf_path(&self, job_id: &str) -> PathBuf {
        self.output_root.join(format!("{job_id}-comic.pdf"))
    }
}

/// Builder for [`ComicConfig`].
#[derive(Debug)]
pub struct ComicConfigBuilder {
    config: ComicConfig,
}

impl ComicConfigBuilder {
    pub fn chat_model(mut self, model: impl Into<String>) -> Self {
        self.config.chat_model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn analysis_max_tokens(mut self, n: usize) -> Self {
        self.config.analysis_max_tokens = n;
        self
    }

    pub fn script_max_tokens(mut self, n: usize) -> Self {
        self.config.script_max_tokens = n;
        self
    }

    pub fn image_model(mut self, model: impl Into<String>) -> Self {
        self.config.image_model = model.into();
        self
    }

    pub fn analysis_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.analysis_retry = policy;
        self
    }

    pub fn script_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.script_retry = policy;
        self
    }

    pub fn image_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.image_retry = policy;
        self
    }

    pub fn max_words(mut self, n: usize) -> Self {
        self.config.max_words = n;
        self
    }

    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.config.job_timeout = timeout;
        self
    }

    pub fn cleanup_delay(mut self, delay: Option<Duration>) -> Self {
        self.config.cleanup_delay = delay;
        self
    }

    pub fn work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_root = dir.into();
        self
    }

    pub fn output_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_root = dir.into();
        self
    }

    pub fn public_base_path(mut self, base: impl Into<String>) -> Self {
        self.config.public_base_path = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    /// Attach a progress callback that receives stage and panel events.
    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ComicConfig, ComicError> {
        let c = &self.config;
        if c.max_words == 0 {
            return Err(ComicError::InvalidConfig(
                "max_words must be ≥ 1".into(),
            ));
        }
        if c.job_timeout.is_zero() {
            return Err(ComicError::InvalidConfig(
                "job_timeout must be non-zero".into(),
            ));
        }
        for (name, policy) in [
            ("analysis_retry", c.analysis_retry),
            ("script_retry", c.script_retry),
            ("image_retry", c.image_retry),
        ] {
            if policy.base_delay_ms == 0 {
                return Err(ComicError::InvalidConfig(format!(
                    "{name}: base delay must be > 0 ms"
                )));
            }
        }
        if c.image_model.trim().is_empty() {
            return Err(ComicError::InvalidConfig("image_model is empty".into()));
        }
        Ok(self.config)
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────

/// Bounded exponential backoff: `retries` extra attempts, waiting
/// `base_delay_ms * 2^attempt` after each failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(retries: u32, base_delay_ms: u64) -> Self {
        Self {
            retries,
            base_delay_ms,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Visual style of the generated artwork.
///
/// The set is closed: every variant has exactly one prompt phrase in
/// [`crate::prompts::style_phrase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VisualStyle {
    #[default]
    Manga,
    IndianComic,
    Cinematic,
    Watercolor,
    Noir,
}

impl VisualStyle {
    pub const ALL: [VisualStyle; 5] = [
        VisualStyle::Manga,
        VisualStyle::IndianComic,
        VisualStyle::Cinematic,
        VisualStyle::Watercolor,
        VisualStyle::Noir,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VisualStyle::Manga => "manga",
            VisualStyle::IndianComic => "indian-comic",
            VisualStyle::Cinematic => "cinematic",
            VisualStyle::Watercolor => "watercolor",
            VisualStyle::Noir => "noir",
        }
    }
}

impl fmt::Display for VisualStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisualStyle {
    type Err = ComicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        VisualStyle::ALL
            .into_iter()
            .find(|style| style.as_str() == wanted)
            .ok_or_else(|| ComicError::InvalidInput(format!("unknown visual style '{s}'")))
    }
}

/// How many panels share one PDF page. The grid is always two columns wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PanelsPerPage {
    Two,
    #[default]
    Four,
    Six,
}

impl PanelsPerPage {
    pub const COLUMNS: usize = 2;

    pub fn count(self) -> usize {
        match self {
            PanelsPerPage::Two => 2,
            PanelsPerPage::Four => 4,
            PanelsPerPage::Six => 6,
        }
    }

    pub fn rows(self) -> usize {
        self.count() / Self::COLUMNS
    }
}

impl TryFrom<u8> for PanelsPerPage {
    type Error = ComicError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            2 => Ok(PanelsPerPage::Two),
            4 => Ok(PanelsPerPage::Four),
            6 => Ok(PanelsPerPage::Six),
            other => Err(ComicError::InvalidInput(format!(
                "panels per page must be 2, 4 or 6 (got {other})"
            ))),
        }
    }
}

impl From<PanelsPerPage> for u8 {
    fn from(p: PanelsPerPage) -> Self {
        p.count() as u8
    }
}
