//! Job orchestration: one [`ComicPipeline`] drives a job from `pending` to
//! `completed` or `failed`.
//!
//! ## Stages
//!
//! ```text
//! initializing      5
//! extracting-text  10   clean text written back into the job data
//! analyzing-story  20
//! generating-script 30  summary written with an empty panel list
//! drawing-panels   40 → 80, one record update per finished panel
//! building-pdf     85
//! completed       100   preview/download pointers, cleanup scheduled
//! ```
//!
//! Any error ends the run with a single `failed` update carrying the error
//! message. Panels finished before the failure stay in the record and on
//! disk; nothing is resumed or salvaged. The whole run races
//! [`ComicConfig::job_timeout`]: when the clock wins, the in-flight stage is
//! dropped and the job fails with [`ComicError::Timeout`].

use crate::config::ComicConfig;
use crate::error::ComicError;
use crate::job::{ComicJobData, Job, JobKind, JobStatus, JobStore, JobUpdate};
use crate::output::{write_panel_sidecar, ComicJobResult, PanelResult, PanelSidecar};
use crate::pipeline::extract::{LopdfTextExtractor, TextExtractor};
use crate::pipeline::image::{
    generate_panel_image, HttpImageFetcher, ImageFetcher, ImageGenerator, ReplicateImageGenerator,
};
use crate::pipeline::input::prepare_story;
use crate::pipeline::llm::{analyze_story, generate_script, ChatClient, LlmChatClient};
use crate::pipeline::pdf::assemble_pdf;
use crate::prompts::build_image_prompt;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a job is, as written to its `stage`/`progress` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initializing,
    ExtractingText,
    AnalyzingStory,
    GeneratingScript,
    /// About to draw panel `current` (1-based) of `total`.
    DrawingPanels { current: usize, total: usize },
    BuildingPdf,
    Completed,
    Failed,
}

impl Stage {
    pub fn progress(self) -> u8 {
        match self {
            Stage::Initializing => 5,
            Stage::ExtractingText => 10,
            Stage::AnalyzingStory => 20,
            Stage::GeneratingScript => 30,
            Stage::DrawingPanels { current, total } => {
                drawing_progress(current.saturating_sub(1), total)
            }
            Stage::BuildingPdf => 85,
            Stage::Completed | Stage::Failed => 100,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Initializing => f.write_str("initializing"),
            Stage::ExtractingText => f.write_str("extracting-text"),
            Stage::AnalyzingStory => f.write_str("analyzing-story"),
            Stage::GeneratingScript => f.write_str("generating-script"),
            Stage::DrawingPanels { current, total } => {
                write!(f, "drawing-panels ({current}/{total})")
            }
            Stage::BuildingPdf => f.write_str("building-pdf"),
            Stage::Completed => f.write_str("completed"),
            Stage::Failed => f.write_str("failed"),
        }
    }
}

/// Progress after `done` of `total` panels: linear from 40 to 80.
pub fn drawing_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 80;
    }
    (40 + 40 * done.min(total) / total) as u8
}

/// Delete `paths` after `delay`. Failures are logged, never retried.
///
/// The returned handle can be awaited or dropped; dropping does not cancel.
pub fn schedule_cleanup(paths: Vec<PathBuf>, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        for path in paths {
            let removed = match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) => Err(e),
            };
            match removed {
                Ok(()) => debug!("Cleaned up {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Cleanup of {} failed: {}", path.display(), e),
            }
        }
    })
}

/// Runs comic jobs against a [`JobStore`] and the model collaborators.
///
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct ComicPipeline {
    config: Arc<ComicConfig>,
    store: Arc<dyn JobStore>,
    chat: Arc<dyn ChatClient>,
    images: Arc<dyn ImageGenerator>,
    fetcher: Arc<dyn ImageFetcher>,
    extractor: Arc<dyn TextExtractor>,
}

impl ComicPipeline {
    /// Pipeline with the default HTTP fetcher and lopdf extractor.
    pub fn new(
        config: ComicConfig,
        store: Arc<dyn JobStore>,
        chat: Arc<dyn ChatClient>,
        images: Arc<dyn ImageGenerator>,
    ) -> Result<Self, ComicError> {
        let fetcher = Arc::new(HttpImageFetcher::new(config.fetch_timeout_secs)?);
        Ok(Self {
            config: Arc::new(config),
            store,
            chat,
            images,
            fetcher,
            extractor: Arc::new(LopdfTextExtractor),
        })
    }

    /// Pipeline whose chat and image clients are configured from the
    /// environment (`edgequake_llm` provider resolution, `REPLICATE_API_TOKEN`).
    pub fn from_env(config: ComicConfig, store: Arc<dyn JobStore>) -> Result<Self, ComicError> {
        let chat = Arc::new(LlmChatClient::from_config(&config)?);
        let images = Arc::new(ReplicateImageGenerator::from_env()?);
        Self::new(config, store, chat, images)
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &ComicConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validate `data` and create a `pending` job. Nothing runs yet.
    pub async fn submit(&self, data: ComicJobData) -> Result<Job, ComicError> {
        data.validate()?;
        let job = self.store.create_job(JobKind::Comic, data).await?;
        info!(
            "Job {} submitted: {} panels, {} per page, {}",
            job.id,
            job.data.panel_count,
            job.data.panels_per_page.count(),
            job.data.style
        );
        Ok(job)
    }

    /// Submit and run in the background.
    pub async fn start(
        &self,
        data: ComicJobData,
    ) -> Result<(Job, JoinHandle<Result<ComicJobResult, ComicError>>), ComicError> {
        let job = self.submit(data).await?;
        let pipeline = self.clone();
        let id = job.id.clone();
        let handle = tokio::spawn(async move { pipeline.run(&id).await });
        Ok((job, handle))
    }

    /// Submit and run to completion, returning the final job record.
    pub async fn generate(&self, data: ComicJobData) -> Result<Job, ComicError> {
        let job = self.submit(data).await?;
        self.run(&job.id).await?;
        self.store
            .get_job(&job.id)
            .await?
            .ok_or(ComicError::JobNotFound { id: job.id })
    }

    /// Run an existing job to a terminal state.
    ///
    /// Only a `pending` comic job can run; anything else is rejected with
    /// [`ComicError::InvalidInput`] and its record is left untouched. On
    /// failure the job record is marked `failed` before the error is
    /// returned.
    pub async fn run(&self, job_id: &str) -> Result<ComicJobResult, ComicError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ComicError::JobNotFound {
                id: job_id.to_string(),
            })?;
        if job.kind != JobKind::Comic {
            return Err(ComicError::InvalidInput(format!(
                "job {} is a {:?} job, not a comic job",
                job.id, job.kind
            )));
        }
        if job.status != JobStatus::Pending {
            return Err(ComicError::InvalidInput(format!(
                "job {} is {:?}; only pending jobs can run",
                job.id, job.status
            )));
        }

        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.config.job_timeout, self.run_stages(&job))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ComicError::Timeout {
                secs: self.config.job_timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(result) => {
                info!("Job {} completed in {:?}", job.id, start.elapsed());
                if let Some(delay) = self.config.cleanup_delay {
                    schedule_cleanup(self.artifact_paths(&job), delay);
                }
                Ok(result)
            }
            Err(e) => {
                warn!("Job {} failed after {:?}: {}", job.id, start.elapsed(), e);
                self.mark_failed(&job.id, &e).await;
                Err(e)
            }
        }
    }

    async fn run_stages(&self, job: &Job) -> Result<ComicJobResult, ComicError> {
        let id = job.id.as_str();
        let config = self.config.as_ref();
        let mut data = job.data.clone();
        let total = data.panel_count;

        // ── Initializing ─────────────────────────────────────────────────
        self.transition(id, Stage::Initializing, JobUpdate::new().status(JobStatus::Processing))
            .await?;
        let panels_dir = config.panels_dir(id);
        tokio::fs::create_dir_all(&panels_dir)
            .await
            .map_err(|e| ComicError::io(&panels_dir, e))?;

        // ── Extracting text ──────────────────────────────────────────────
        self.transition(id, Stage::ExtractingText, JobUpdate::new())
            .await?;
        let story = prepare_story(&data, self.extractor.as_ref(), config.max_words).await?;
        data.text = Some(story.clone());
        self.update(id, JobUpdate::new().data(data.clone())).await?;

        // ── Analyzing story ──────────────────────────────────────────────
        self.transition(id, Stage::AnalyzingStory, JobUpdate::new())
            .await?;
        let summary = analyze_story(self.chat.as_ref(), &story, total, config).await?;

        // ── Generating script ────────────────────────────────────────────
        self.transition(id, Stage::GeneratingScript, JobUpdate::new())
            .await?;
        let scenes = generate_script(
            self.chat.as_ref(),
            &story,
            &summary,
            data.style,
            total,
            config,
        )
        .await?;
        let mut result = ComicJobResult {
            summary: Some(summary),
            ..Default::default()
        };
        self.update(id, JobUpdate::new().result(result.clone()))
            .await?;

        // ── Drawing panels (strictly sequential) ─────────────────────────
        for (index, scene) in scenes.iter().enumerate() {
            let stage = Stage::DrawingPanels {
                current: index + 1,
                total,
            };
            self.transition(id, stage, JobUpdate::new()).await?;

            let image_prompt = build_image_prompt(&scene.visual, data.style);
            let generated = generate_panel_image(
                self.images.as_ref(),
                self.fetcher.as_ref(),
                index,
                &panels_dir,
                &image_prompt,
                &scene.dialogue,
                config,
            )
            .await?;

            let panel = PanelResult {
                index,
                title: scene.title.clone(),
                description: scene.visual.clone(),
                dialogue: scene.dialogue.clone(),
                image_prompt,
                image_url: generated.source_url,
                preview_url: self.pointer(id, &format!("panels/{index}")),
            };
            result.panels.push(panel.clone());
            self.update(
                id,
                JobUpdate::new()
                    .progress(drawing_progress(index + 1, total))
                    .result(result.clone()),
            )
            .await?;
            write_panel_sidecar(
                &panels_dir,
                &PanelSidecar {
                    panel,
                    local_path: generated.path,
                },
            )
            .await?;

            if let Some(cb) = &config.progress_callback {
                cb.on_panel_complete(id, index, total);
            }
        }

        // ── Building PDF ─────────────────────────────────────────────────
        self.transition(id, Stage::BuildingPdf, JobUpdate::new())
            .await?;
        let pdf_path = assemble_pdf(
            &panels_dir,
            total,
            data.panels_per_page,
            &config.pdf_path(id),
        )
        .await?;

        // ── Completed ────────────────────────────────────────────────────
        result.preview_url = Some(self.pointer(id, "preview"));
        result.download_url = Some(self.pointer(id, "download"));
        result.pdf_path = Some(pdf_path.clone());
        self.transition(
            id,
            Stage::Completed,
            JobUpdate::new()
                .status(JobStatus::Completed)
                .result(result.clone()),
        )
        .await?;
        if let Some(cb) = &config.progress_callback {
            cb.on_job_complete(id, &pdf_path);
        }
        Ok(result)
    }

    /// Write `stage` (label + progress) together with `update`, then notify.
    async fn transition(&self, id: &str, stage: Stage, update: JobUpdate) -> Result<(), ComicError> {
        let label = stage.to_string();
        let progress = stage.progress();
        self.update(id, update.stage(label.as_str()).progress(progress))
            .await?;
        info!("Job {}: {} ({}%)", id, label, progress);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage(id, &label, progress);
        }
        Ok(())
    }

    async fn update(&self, id: &str, update: JobUpdate) -> Result<Job, ComicError> {
        self.store
            .update_job(id, update)
            .await?
            .ok_or_else(|| ComicError::JobNotFound { id: id.to_string() })
    }

    /// Terminal failure write. Keeps whatever panels the record already has.
    async fn mark_failed(&self, id: &str, error: &ComicError) {
        let message = error.to_string();
        let mut result = match self.store.get_job(id).await {
            Ok(Some(job)) => job.result.unwrap_or_default(),
            _ => ComicJobResult::default(),
        };
        result.error = Some(message.clone());

        let update = JobUpdate::new()
            .status(JobStatus::Failed)
            .stage(Stage::Failed.to_string())
            .progress(Stage::Failed.progress())
            .result(result);
        if let Err(e) = self.store.update_job(id, update).await {
            warn!("Job {}: could not record failure: {}", id, e);
        }
        if let Some(cb) = &self.config.progress_callback {
            cb.on_job_failed(id, &message);
        }
    }

    fn pointer(&self, id: &str, suffix: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.public_base_path.trim_end_matches('/'),
            id,
            suffix
        )
    }

    /// Everything a finished job leaves behind: upload, PDF, working tree.
    fn artifact_paths(&self, job: &Job) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = job.data.source_path.iter().cloned().collect();
        paths.push(self.config.pdf_path(&job.id));
        paths.push(self.config.job_dir(&job.id));
        paths
    }
}

impl fmt::Debug for ComicPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComicPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_labels_and_progress() {
        let expected = [
            (Stage::Initializing, "initializing", 5),
            (Stage::ExtractingText, "extracting-text", 10),
            (Stage::AnalyzingStory, "analyzing-story", 20),
            (Stage::GeneratingScript, "generating-script", 30),
            (Stage::BuildingPdf, "building-pdf", 85),
            (Stage::Completed, "completed", 100),
            (Stage::Failed, "failed", 100),
        ];
        for (stage, label, progress) in expected {
            assert_eq!(stage.to_string(), label);
            assert_eq!(stage.progress(), progress);
        }
    }

    #[test]
    fn drawing_stage_is_linear_between_40_and_80() {
        let first = Stage::DrawingPanels {
            current: 1,
            total: 4,
        };
        assert_eq!(first.to_string(), "drawing-panels (1/4)");
        assert_eq!(first.progress(), 40);
        assert_eq!(drawing_progress(2, 4), 60);
        assert_eq!(drawing_progress(4, 4), 80);

        let unstarted = Stage::DrawingPanels {
            current: 0,
            total: 4,
        };
        assert_eq!(unstarted.progress(), 40);

        let mut last = 0;
        for done in 0..=8 {
            let p = drawing_progress(done, 8);
            assert!(p >= last && (40..=80).contains(&p));
            last = p;
        }
    }

    #[tokio::test]
    async fn cleanup_removes_files_and_directories() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("job");
        tokio::fs::create_dir_all(dir.join("panels")).await.unwrap();
        tokio::fs::write(dir.join("panels/panel-000.png"), b"x")
            .await
            .unwrap();
        let pdf = root.path().join("job-comic.pdf");
        tokio::fs::write(&pdf, b"%PDF").await.unwrap();
        let missing = root.path().join("never-existed");

        schedule_cleanup(vec![pdf.clone(), dir.clone(), missing], Duration::from_millis(10))
            .await
            .unwrap();

        assert!(!pdf.exists());
        assert!(!dir.exists());
        assert!(root.path().exists());
    }
}
