//! Progress-callback trait for stage and panel events.
//!
//! Inject an [`Arc<dyn ComicProgressCallback>`] via
//! [`crate::config::ComicConfigBuilder::progress_callback`] to receive the
//! same transitions the job store sees, without polling it.
//!
//! Callbacks fire *after* the corresponding job-store write, so anything a
//! callback observes is already visible to job-record readers.
//!
//! # Example
//!
//! ```rust
//! use story2comic::{ComicProgressCallback, ComicConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PanelCounter {
//!     done: AtomicUsize,
//! }
//!
//! impl ComicProgressCallback for PanelCounter {
//!     fn on_panel_complete(&self, _job_id: &str, index: usize, total: usize) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("panel {}/{}", index + 1, total);
//!     }
//! }
//!
//! let config = ComicConfig::builder()
//!     .progress_callback(Arc::new(PanelCounter { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the pipeline as a job moves through its stages.
///
/// Several jobs may run at once on different tasks, so implementations must
/// be `Send + Sync`. Within one job, calls arrive strictly in order.
pub trait ComicProgressCallback: Send + Sync {
    /// A stage is about to run.
    ///
    /// # Arguments
    /// * `stage`    — the stage label written to the job record
    /// * `progress` — the progress value written alongside it (0–100)
    fn on_stage(&self, job_id: &str, stage: &str, progress: u8) {
        let _ = (job_id, stage, progress);
    }

    /// Panel `index` (0-based) has its image, record entry and sidecar.
    fn on_panel_complete(&self, job_id: &str, index: usize, total: usize) {
        let _ = (job_id, index, total);
    }

    /// The PDF is written and the job is `completed`.
    fn on_job_complete(&self, job_id: &str, pdf_path: &Path) {
        let _ = (job_id, pdf_path);
    }

    /// The job reached `failed`.
    fn on_job_failed(&self, job_id: &str, error: &str) {
        let _ = (job_id, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ComicProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ComicConfig`].
pub type ProgressCallback = Arc<dyn ComicProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ComicProgressCallback for Recorder {
        fn on_stage(&self, _job_id: &str, stage: &str, progress: u8) {
            self.events.lock().unwrap().push(format!("{stage}@{progress}"));
        }

        fn on_panel_complete(&self, _job_id: &str, index: usize, total: usize) {
            self.events.lock().unwrap().push(format!("panel {index}/{total}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage("j", "initializing", 5);
        cb.on_panel_complete("j", 0, 4);
        cb.on_job_complete("j", Path::new("/tmp/x.pdf"));
        cb.on_job_failed("j", "boom");
    }

    #[test]
    fn recorder_keeps_call_order() {
        let rec = Recorder::default();
        rec.on_stage("j", "initializing", 5);
        rec.on_panel_complete("j", 0, 4);
        rec.on_job_failed("j", "ignored by default impl");
        let events = rec.events.lock().unwrap();
        assert_eq!(events.as_slice(), ["initializing@5", "panel 0/4"]);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage("j", "building-pdf", 85);
    }
}
