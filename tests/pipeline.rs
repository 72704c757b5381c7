//! End-to-end pipeline scenarios with in-process fakes.
//!
//! No network: the chat model, image model, image download and PDF text
//! extraction are all replaced. Everything else (job store, panel files,
//! bubble compositing, PDF assembly) runs for real inside a temp dir.

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use story2comic::pipeline::bubble::wrap_text;
use story2comic::{
    read_panel_sidecars, ChatClient, ChatRequest, ComicConfig, ComicError, ComicJobData,
    ComicPipeline, ComicProgressCallback, ImageFetcher, ImageGenerator, ImageRequest,
    InMemoryJobStore, Job, JobKind, JobStatus, JobStore, JobUpdate, PanelsPerPage, RetryPolicy,
    TextExtractor, VisualStyle,
};
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Answers the analysis prompt with a summary and the script prompt with
/// `scenes` scenes.
struct FakeChat {
    scenes: usize,
}

#[async_trait]
impl ChatClient for FakeChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ComicError> {
        if !request.user.contains("dialogue_telugu") {
            return Ok("Characters: Ravi. Setting: a village by the river.".into());
        }
        let scenes: Vec<Value> = (0..self.scenes)
            .map(|i| {
                json!({
                    "title": format!("Beat {i}"),
                    "visual": format!("Ravi at the river, moment {i}"),
                    "dialogue_telugu": format!("ఇది క్షణం {i} & అంతే"),
                })
            })
            .collect();
        Ok(format!("```json\n{}\n```", json!({ "scenes": scenes })))
    }
}

struct FakeImages {
    response: Value,
    calls: AtomicUsize,
}

impl FakeImages {
    fn returning(response: Value) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ImageGenerator for FakeImages {
    async fn generate(&self, _model: &str, request: &ImageRequest) -> Result<Value, ComicError> {
        assert_eq!(request.aspect_ratio, "16:9");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

enum FetchMode {
    Ok,
    Status(u16),
    /// Succeed for the first `n` calls, then return HTTP 503.
    FailAfter(usize),
    Slow(Duration),
}

struct FakeFetcher {
    mode: FetchMode,
    calls: AtomicUsize,
}

impl FakeFetcher {
    fn new(mode: FetchMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: AtomicUsize::new(0),
        })
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 120, 90])));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ComicError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = |status| ComicError::ImageFetchFailed {
            url: url.to_string(),
            status,
        };
        match self.mode {
            FetchMode::Ok => Ok(png_bytes(512, 512)),
            FetchMode::Status(status) => Err(fail(status)),
            FetchMode::FailAfter(ok) if n >= ok => Err(fail(503)),
            FetchMode::FailAfter(_) => Ok(png_bytes(512, 512)),
            FetchMode::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(png_bytes(512, 512))
            }
        }
    }
}

struct FakeExtractor;

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, _bytes: Vec<u8>) -> Result<String, ComicError> {
        Ok("Ravi   walked\n\nto the river.\nIt was raining.".into())
    }
}

#[derive(Default)]
struct StageRecorder {
    stages: Mutex<Vec<(String, u8)>>,
    panels: AtomicUsize,
    failures: Mutex<Vec<String>>,
}

impl ComicProgressCallback for StageRecorder {
    fn on_stage(&self, _job_id: &str, stage: &str, progress: u8) {
        self.stages.lock().unwrap().push((stage.to_string(), progress));
    }

    fn on_panel_complete(&self, _job_id: &str, _index: usize, _total: usize) {
        self.panels.fetch_add(1, Ordering::SeqCst);
    }

    fn on_job_failed(&self, _job_id: &str, error: &str) {
        self.failures.lock().unwrap().push(error.to_string());
    }
}

/// In-memory store that checks on-disk state at the moment of every write.
///
/// Panel files must exist before the record lists them, and a panel's
/// sidecar must not exist yet when the record first lists it. A stage write
/// must land before that stage's output appears on disk.
struct CheckingStore {
    inner: InMemoryJobStore,
    work_root: PathBuf,
    output_root: PathBuf,
    /// `(stage, progress)` as stored after each write.
    writes: Mutex<Vec<(String, u8)>>,
    violations: Mutex<Vec<String>>,
}

impl CheckingStore {
    fn new(root: &Path) -> Self {
        Self {
            inner: InMemoryJobStore::new(),
            work_root: root.join("work"),
            output_root: root.join("output"),
            writes: Mutex::new(Vec::new()),
            violations: Mutex::new(Vec::new()),
        }
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn violation(&self, msg: String) {
        self.violations.lock().unwrap().push(msg);
    }

    fn check(&self, id: &str, update: &JobUpdate) {
        let panels_dir = self.work_root.join(id).join("panels");

        if let Some(stage) = update.stage.as_deref() {
            let current = stage
                .strip_prefix("drawing-panels (")
                .and_then(|rest| rest.split('/').next())
                .and_then(|n| n.parse::<usize>().ok());
            if let Some(current) = current {
                let png = panels_dir.join(format!("panel-{:03}.png", current - 1));
                if png.exists() {
                    self.violation(format!("{stage} written after {} exists", png.display()));
                }
            }
            let pdf = self.output_root.join(format!("{id}-comic.pdf"));
            if stage == "building-pdf" && pdf.exists() {
                self.violation("building-pdf written after the PDF exists".into());
            }
        }

        let Some(result) = update.result.as_ref() else {
            return;
        };
        for panel in &result.panels {
            let png = panels_dir.join(format!("panel-{:03}.png", panel.index));
            if !png.exists() {
                self.violation(format!("panel {} listed before its image", panel.index));
            }
        }
        // Per-panel writes carry neither a stage nor a status.
        if update.stage.is_none() && update.status.is_none() {
            if let Some(newest) = result.panels.last() {
                let meta = panels_dir.join(format!("panel-{:03}.meta.json", newest.index));
                if meta.exists() {
                    self.violation(format!("panel {} sidecar written first", newest.index));
                }
            }
        }
    }
}

#[async_trait]
impl JobStore for CheckingStore {
    async fn create_job(&self, kind: JobKind, data: ComicJobData) -> Result<Job, ComicError> {
        self.inner.create_job(kind, data).await
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, ComicError> {
        self.inner.get_job(id).await
    }

    async fn update_job(&self, id: &str, update: JobUpdate) -> Result<Option<Job>, ComicError> {
        self.check(id, &update);
        let job = self.inner.update_job(id, update).await?;
        if let Some(job) = &job {
            self.writes
                .lock()
                .unwrap()
                .push((job.stage.clone(), job.progress));
        }
        Ok(job)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

struct Harness {
    dir: TempDir,
    store: Arc<CheckingStore>,
    pipeline: ComicPipeline,
    recorder: Arc<StageRecorder>,
}

fn harness(
    scenes: usize,
    images: Arc<FakeImages>,
    fetcher: Arc<FakeFetcher>,
    timeout: Duration,
    max_words: usize,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(StageRecorder::default());
    let config = ComicConfig::builder()
        .work_root(dir.path().join("work"))
        .output_root(dir.path().join("output"))
        .analysis_retry(RetryPolicy::new(2, 1))
        .script_retry(RetryPolicy::new(2, 1))
        .image_retry(RetryPolicy::new(2, 1))
        .job_timeout(timeout)
        .max_words(max_words)
        .cleanup_delay(None)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    let store = Arc::new(CheckingStore::new(dir.path()));
    let pipeline = ComicPipeline::new(
        config,
        store.clone(),
        Arc::new(FakeChat { scenes }),
        images,
    )
    .unwrap()
    .with_fetcher(fetcher)
    .with_extractor(Arc::new(FakeExtractor));

    Harness {
        dir,
        store,
        pipeline,
        recorder,
    }
}

fn default_harness(scenes: usize) -> Harness {
    harness(
        scenes,
        FakeImages::returning(json!("https://img.example/p.png")),
        FakeFetcher::new(FetchMode::Ok),
        Duration::from_secs(30),
        5000,
    )
}

fn words(n: usize) -> String {
    (0..n).map(|i| format!("word{i}")).collect::<Vec<_>>().join("  \n")
}

fn images_per_page(pdf: &Path) -> Vec<usize> {
    let doc = lopdf::Document::load(pdf).unwrap();
    doc.get_pages()
        .values()
        .map(|&id| {
            doc.get_and_decode_page_content(id)
                .unwrap()
                .operations
                .iter()
                .filter(|op| op.operator == "Do")
                .count()
        })
        .collect()
}

/// Submit, run to failure, and return the error plus the stored job.
async fn run_failing(h: &Harness, data: ComicJobData) -> (ComicError, Job) {
    let job = h.pipeline.submit(data).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    let err = h.pipeline.run(&job.id).await.unwrap_err();
    let stored = h.store.get_job(&job.id).await.unwrap().unwrap();
    (err, stored)
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fifty_words_four_panels_two_per_page() {
    let h = default_harness(4);
    let data = ComicJobData::from_text(words(50), 4)
        .with_layout(PanelsPerPage::Two)
        .with_style(VisualStyle::Watercolor);

    let job = h.pipeline.generate(data).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.stage, "completed");

    let result = job.result.clone().unwrap();
    assert_eq!(result.panels.len(), 4);
    assert!(result.error.is_none());
    for (i, panel) in result.panels.iter().enumerate() {
        assert_eq!(panel.index, i);
        assert!(panel.image_prompt.contains("watercolor"));
        assert_eq!(panel.image_url, "https://img.example/p.png");
        assert_eq!(panel.preview_url, format!("/api/comic/{}/panels/{i}", job.id));
    }
    assert_eq!(
        result.download_url.as_deref(),
        Some(format!("/api/comic/{}/download", job.id).as_str())
    );

    let pdf = result.pdf_path.unwrap();
    assert!(pdf.ends_with(format!("{}-comic.pdf", job.id)));
    assert_eq!(images_per_page(&pdf), vec![2, 2]);

    // The cleaned text was written back into the job data.
    let text = job.data.text.unwrap();
    assert!(!text.contains('\n') && !text.contains("  "));
    assert_eq!(text.split(' ').count(), 50);

    assert_eq!(h.recorder.panels.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn progress_is_monotonic_and_ordered() {
    let h = default_harness(4);
    h.pipeline
        .generate(ComicJobData::from_text(words(20), 4))
        .await
        .unwrap();

    let stages = h.recorder.stages.lock().unwrap().clone();
    let labels: Vec<&str> = stages.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(
        labels,
        vec![
            "initializing",
            "extracting-text",
            "analyzing-story",
            "generating-script",
            "drawing-panels (1/4)",
            "drawing-panels (2/4)",
            "drawing-panels (3/4)",
            "drawing-panels (4/4)",
            "building-pdf",
            "completed",
        ]
    );
    let progress: Vec<u8> = stages.iter().map(|(_, p)| *p).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress.first(), Some(&5));
    assert_eq!(progress.last(), Some(&100));
}

#[tokio::test]
async fn too_few_scenes_fails_naming_both_counts() {
    let h = default_harness(3);
    let (err, job) = run_failing(&h, ComicJobData::from_text(words(30), 5)).await;
    let msg = err.to_string();
    assert!(msg.contains('3') && msg.contains('5'), "got: {msg}");

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.stage, "failed");
    let result = job.result.unwrap();
    assert!(result.error.is_some_and(|e| !e.is_empty()));
    assert!(result.panels.is_empty());
    assert!(result.summary.is_none());
    assert_eq!(h.recorder.failures.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn prediction_output_array_is_normalised() {
    let h = harness(
        4,
        FakeImages::returning(json!({ "output": ["https://cdn.example/x.png"] })),
        FakeFetcher::new(FetchMode::Ok),
        Duration::from_secs(30),
        5000,
    );
    let job = h
        .pipeline
        .generate(ComicJobData::from_text(words(10), 4))
        .await
        .unwrap();
    let panels = job.result.unwrap().panels;
    assert!(panels
        .iter()
        .all(|p| p.image_url == "https://cdn.example/x.png"));
}

#[tokio::test]
async fn fetch_500_fails_after_retries() {
    let images = FakeImages::returning(json!("https://img.example/p.png"));
    let fetcher = FakeFetcher::new(FetchMode::Status(500));
    let h = harness(
        4,
        images.clone(),
        fetcher.clone(),
        Duration::from_secs(30),
        5000,
    );

    let (err, job) = run_failing(&h, ComicJobData::from_text(words(10), 4)).await;
    assert!(matches!(err, ComicError::ImageFetchFailed { status: 500, .. }));
    // One initial attempt + two retries, all on the first panel.
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    assert_eq!(images.calls.load(Ordering::SeqCst), 3);

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result.unwrap().error.unwrap().contains("500"));
}

#[tokio::test]
async fn failure_keeps_already_finished_panels() {
    let h = harness(
        4,
        FakeImages::returning(json!("https://img.example/p.png")),
        FakeFetcher::new(FetchMode::FailAfter(2)),
        Duration::from_secs(30),
        5000,
    );
    let (_, job) = run_failing(&h, ComicJobData::from_text(words(10), 4)).await;

    assert_eq!(job.status, JobStatus::Failed);
    let result = job.result.unwrap();
    assert_eq!(result.panels.len(), 2);
    assert!(result.summary.is_some());
    assert!(result.download_url.is_none());
}

#[tokio::test]
async fn whole_job_timeout_marks_failed() {
    let h = harness(
        4,
        FakeImages::returning(json!("https://img.example/p.png")),
        FakeFetcher::new(FetchMode::Slow(Duration::from_secs(5))),
        Duration::from_millis(200),
        5000,
    );
    let (err, job) = run_failing(&h, ComicJobData::from_text(words(10), 4)).await;
    assert!(matches!(err, ComicError::Timeout { .. }));

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result.unwrap().error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn story_over_word_limit_fails_in_extraction() {
    let h = harness(
        4,
        FakeImages::returning(json!("https://img.example/p.png")),
        FakeFetcher::new(FetchMode::Ok),
        Duration::from_secs(30),
        40,
    );
    let (err, job) = run_failing(&h, ComicJobData::from_text(words(41), 4)).await;
    assert!(matches!(err, ComicError::StoryTooLong { words: 41, max: 40 }));
    assert_eq!(job.status, JobStatus::Failed);

    let stages = h.recorder.stages.lock().unwrap().clone();
    assert_eq!(stages.last().unwrap().0, "extracting-text");
}

#[tokio::test]
async fn invalid_submissions_never_create_a_job() {
    let h = default_harness(4);
    let err = h
        .pipeline
        .submit(ComicJobData::from_text(words(10), 3))
        .await
        .unwrap_err();
    assert!(err.is_input_error());

    let err = h
        .pipeline
        .submit(ComicJobData::from_text("   ", 4))
        .await
        .unwrap_err();
    assert!(matches!(err, ComicError::MissingInput));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn pdf_input_goes_through_the_extractor() {
    let h = default_harness(4);
    let src = h.dir.path().join("story.pdf");
    tokio::fs::write(&src, b"%PDF-1.4 not really").await.unwrap();

    let job = h
        .pipeline
        .generate(ComicJobData::from_pdf(&src, 4))
        .await
        .unwrap();
    assert_eq!(
        job.data.text.as_deref(),
        Some("Ravi walked to the river. It was raining.")
    );
}

#[tokio::test]
async fn start_runs_in_background() {
    let h = default_harness(4);
    let (job, handle) = h
        .pipeline
        .start(ComicJobData::from_text(words(10), 4))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.panels.len(), 4);
    let stored = h.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
}

#[tokio::test]
async fn sidecars_match_the_job_record() {
    let h = default_harness(4);
    let job = h
        .pipeline
        .generate(ComicJobData::from_text(words(10), 4))
        .await
        .unwrap();

    let panels_dir = h.pipeline.config().panels_dir(&job.id);
    let sidecars = read_panel_sidecars(&panels_dir).await.unwrap();
    let panels = job.result.unwrap().panels;
    assert_eq!(sidecars.len(), panels.len());
    for (sidecar, panel) in sidecars.iter().zip(&panels) {
        assert_eq!(&sidecar.panel, panel);
        assert!(sidecar.local_path.exists());
        assert!(panels_dir
            .join(format!("panel-{:03}.raw.png", panel.index))
            .exists());
    }
}

#[test]
fn unbreakable_dialogue_token_stays_on_one_line() {
    let token = "అ".repeat(60);
    assert_eq!(wrap_text(&token), vec![token]);
}

#[tokio::test]
async fn store_sees_files_and_stages_in_order() {
    let h = default_harness(4);
    let job = h
        .pipeline
        .generate(ComicJobData::from_text(words(20), 4).with_layout(PanelsPerPage::Two))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let violations = h.store.violations.lock().unwrap().clone();
    assert!(violations.is_empty(), "{violations:?}");

    let writes = h.store.writes.lock().unwrap().clone();
    let progress: Vec<u8> = writes.iter().map(|(_, p)| *p).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");

    let mut labels: Vec<&str> = writes.iter().map(|(s, _)| s.as_str()).collect();
    labels.dedup();
    assert_eq!(
        labels,
        vec![
            "initializing",
            "extracting-text",
            "analyzing-story",
            "generating-script",
            "drawing-panels (1/4)",
            "drawing-panels (2/4)",
            "drawing-panels (3/4)",
            "drawing-panels (4/4)",
            "building-pdf",
            "completed",
        ]
    );
    // Each panel finishing bumps progress inside its own drawing stage.
    assert!(writes.contains(&("drawing-panels (1/4)".to_string(), 50)));
    assert!(writes.contains(&("drawing-panels (4/4)".to_string(), 80)));
}

#[tokio::test]
async fn completed_job_cannot_run_again() {
    let images = FakeImages::returning(json!("https://img.example/p.png"));
    let h = harness(
        4,
        images.clone(),
        FakeFetcher::new(FetchMode::Ok),
        Duration::from_secs(30),
        5000,
    );
    let job = h
        .pipeline
        .generate(ComicJobData::from_text(words(10), 4))
        .await
        .unwrap();
    let calls = images.calls.load(Ordering::SeqCst);
    let writes = h.store.writes.lock().unwrap().len();

    let err = h.pipeline.run(&job.id).await.unwrap_err();
    assert!(matches!(err, ComicError::InvalidInput(_)), "{err}");

    let stored = h.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored, job);
    assert_eq!(images.calls.load(Ordering::SeqCst), calls);
    assert_eq!(h.store.writes.lock().unwrap().len(), writes);
}

#[tokio::test]
async fn failed_job_cannot_run_again() {
    let h = default_harness(3);
    let (_, failed) = run_failing(&h, ComicJobData::from_text(words(30), 5)).await;

    let err = h.pipeline.run(&failed.id).await.unwrap_err();
    assert!(err.is_input_error());

    let stored = h.store.get_job(&failed.id).await.unwrap().unwrap();
    assert_eq!(stored, failed);
    assert_eq!(h.recorder.failures.lock().unwrap().len(), 1);
}
