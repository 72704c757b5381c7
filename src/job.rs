//! Job records and the store the pipeline reports through.
//!
//! The pipeline never owns job state: it reads the job once, then pushes
//! [`JobUpdate`]s at every stage boundary. Anything implementing [`JobStore`]
//! works — a database, a cache, or the bundled [`InMemoryJobStore`].

use crate::config::{PanelsPerPage, VisualStyle, MAX_PANELS, MIN_PANELS};
use crate::error::ComicError;
use crate::output::ComicJobResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Lifecycle of a job: `pending → processing → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Job kind discriminator. This crate only produces comic jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Comic,
}

/// Where the story comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    #[default]
    Text,
    Pdf,
}

/// Input payload of a comic job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComicJobData {
    pub input_kind: InputKind,
    /// Raw story text. Replaced by the cleaned text once extraction runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Uploaded source file (PDF, or plain text when `input_kind` is `text`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    pub panel_count: usize,
    pub panels_per_page: PanelsPerPage,
    pub style: VisualStyle,
}

impl ComicJobData {
    /// A text job with default layout and style.
    pub fn from_text(text: impl Into<String>, panel_count: usize) -> Self {
        Self {
            input_kind: InputKind::Text,
            text: Some(text.into()),
            source_path: None,
            panel_count,
            panels_per_page: PanelsPerPage::default(),
            style: VisualStyle::default(),
        }
    }

    /// A PDF job with default layout and style.
    pub fn from_pdf(path: impl Into<PathBuf>, panel_count: usize) -> Self {
        Self {
            input_kind: InputKind::Pdf,
            text: None,
            source_path: Some(path.into()),
            panel_count,
            panels_per_page: PanelsPerPage::default(),
            style: VisualStyle::default(),
        }
    }

    pub fn with_layout(mut self, per_page: PanelsPerPage) -> Self {
        self.panels_per_page = per_page;
        self
    }

    pub fn with_style(mut self, style: VisualStyle) -> Self {
        self.style = style;
        self
    }

    /// `true` when usable text was supplied inline.
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// Structural validation performed before a job is created.
    pub fn validate(&self) -> Result<(), ComicError> {
        if !(MIN_PANELS..=MAX_PANELS).contains(&self.panel_count) {
            return Err(ComicError::InvalidInput(format!(
                "panel count must be between {MIN_PANELS} and {MAX_PANELS} (got {})",
                self.panel_count
            )));
        }
        if !self.has_text() && self.source_path.is_none() {
            return Err(ComicError::MissingInput);
        }
        if self.input_kind == InputKind::Pdf && self.source_path.is_none() {
            return Err(ComicError::InvalidInput(
                "pdf input requires a source file".into(),
            ));
        }
        Ok(())
    }
}

/// A job as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// 0–100.
    pub progress: u8,
    pub stage: String,
    pub data: ComicJobData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ComicJobResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update with shallow-merge semantics: only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub stage: Option<String>,
    pub data: Option<ComicJobData>,
    pub result: Option<ComicJobResult>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn data(mut self, data: ComicJobData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn result(mut self, result: ComicJobResult) -> Self {
        self.result = Some(result);
        self
    }

    /// Merge into `job`, touching only the provided fields.
    pub fn apply_to(self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(progress) = self.progress {
            job.progress = progress;
        }
        if let Some(stage) = self.stage {
            job.stage = stage;
        }
        if let Some(data) = self.data {
            job.data = data;
        }
        if let Some(result) = self.result {
            job.result = Some(result);
        }
        job.updated_at = Utc::now();
    }
}

/// Create/get/update-by-id job storage.
///
/// Implementations must make `update_job` safe under concurrent callers;
/// several jobs can be reporting at once.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, kind: JobKind, data: ComicJobData) -> Result<Job, ComicError>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>, ComicError>;

    /// Returns the updated job, or `None` if `id` is unknown.
    async fn update_job(&self, id: &str, update: JobUpdate) -> Result<Option<Job>, ComicError>;
}

/// Process-local job store. Jobs vanish with the process.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> ComicError {
    ComicError::Internal("job store lock poisoned".into())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, kind: JobKind, data: ComicJobData) -> Result<Job, ComicError> {
        let now = Utc::now();
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            status: JobStatus::Pending,
            progress: 0,
            stage: "queued".to_string(),
            data,
            result: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs
            .write()
            .map_err(poisoned)?
            .insert(job.id.clone(), job.clone());
        tracing::debug!("Created job {}", job.id);
        Ok(job)
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, ComicError> {
        Ok(self.jobs.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn update_job(&self, id: &str, update: JobUpdate) -> Result<Option<Job>, ComicError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        Ok(jobs.get_mut(id).map(|job| {
            update.apply_to(job);
            job.clone()
        }))
    }
}
