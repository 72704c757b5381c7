//! # story2comic
//!
//! Turn a short story (plain text or a PDF) into a print-ready comic-book PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! story
//!  │
//!  ├─ 1. Input    inline text or source file; whitespace cleanup, word limit
//!  ├─ 2. Analyze  LLM summary: characters, setting, conflict, N beats
//!  ├─ 3. Script   LLM JSON script → exactly N scenes with Telugu dialogue
//!  ├─ 4. Panels   one image-model call per scene (sequential), cover-fit
//!  │              to 1280×720, speech bubble composited on top
//!  └─ 5. PDF      two-column A4 grid, 2/4/6 panels per page, page numbers
//! ```
//!
//! Progress is reported through a [`JobStore`]: every stage writes its label
//! and a monotonically increasing percentage, and the panel list in the job
//! result grows after each finished panel.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use story2comic::{ComicConfig, ComicJobData, ComicPipeline, InMemoryJobStore, VisualStyle};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Chat provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …,
//!     // images from REPLICATE_API_TOKEN.
//!     let store = Arc::new(InMemoryJobStore::new());
//!     let pipeline = ComicPipeline::from_env(ComicConfig::default(), store)?;
//!
//!     let data = ComicJobData::from_text("Once upon a time…", 6).with_style(VisualStyle::Noir);
//!     let job = pipeline.generate(data).await?;
//!     println!("{:?}", job.result.and_then(|r| r.pdf_path));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `story2comic` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod comic;
pub mod config;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use comic::{schedule_cleanup, ComicPipeline, Stage};
pub use config::{
    ComicConfig, ComicConfigBuilder, PanelsPerPage, RetryPolicy, VisualStyle, MAX_PANELS,
    MIN_PANELS,
};
pub use error::ComicError;
pub use job::{
    ComicJobData, InMemoryJobStore, InputKind, Job, JobKind, JobStatus, JobStore, JobUpdate,
};
pub use output::{read_panel_sidecars, ComicJobResult, PanelResult, PanelSidecar, Scene};
pub use pipeline::extract::{LopdfTextExtractor, TextExtractor};
pub use pipeline::image::{
    HttpImageFetcher, ImageFetcher, ImageGenerator, ImageRequest, ReplicateImageGenerator,
};
pub use pipeline::llm::{ChatClient, ChatRequest, LlmChatClient};
pub use progress::{ComicProgressCallback, NoopProgressCallback, ProgressCallback};
