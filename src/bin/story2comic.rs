//! CLI binary for story2comic.
//!
//! A thin shim over the library crate that maps CLI flags to `ComicConfig`
//! and `ComicJobData`, runs one job against an in-memory store, and prints
//! where the PDF landed.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use story2comic::{
    ComicConfig, ComicJobData, ComicPipeline, ComicProgressCallback, InMemoryJobStore, InputKind,
    PanelsPerPage, ProgressCallback, VisualStyle, MAX_PANELS, MIN_PANELS,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders job progress (0–100) as a bar, with one log line per panel.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(100);
        bar.set_style(style);
        bar.set_prefix("Comic");
        bar.set_message("queued");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ComicProgressCallback for CliProgressCallback {
    fn on_stage(&self, _job_id: &str, stage: &str, progress: u8) {
        self.bar.set_position(progress as u64);
        self.bar.set_message(stage.to_string());
    }

    fn on_panel_complete(&self, _job_id: &str, index: usize, total: usize) {
        self.bar.println(format!(
            "  {} Panel {:>2}/{:<2}",
            green("✓"),
            index + 1,
            total
        ));
    }

    fn on_job_complete(&self, _job_id: &str, _pdf_path: &Path) {
        self.bar.finish_and_clear();
    }

    fn on_job_failed(&self, _job_id: &str, error: &str) {
        self.bar.abandon_with_message(red(error));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Six-panel manga comic from a text file
  story2comic story.txt

  # Eight panels, two per page, noir style, copied to a chosen path
  story2comic -n 8 --per-page 2 --style noir story.pdf -o comic.pdf

  # Use a specific chat model
  story2comic --provider anthropic --model claude-sonnet-4-20250514 story.txt

  # Machine-readable job record
  story2comic --json story.txt > job.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override chat model ID
  REPLICATE_API_TOKEN     Replicate token for panel images (required)
"#;

/// Turn a short story into a comic-book PDF.
#[derive(Parser, Debug)]
#[command(
    name = "story2comic",
    version,
    about = "Turn a short story into a comic-book PDF",
    long_about = "Summarise a story with an LLM, script it into panels with Telugu dialogue, \
illustrate each panel with an image model, letter a speech bubble onto it, and lay the \
panels out on A4 pages.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Story file: plain text or PDF.
    input: PathBuf,

    /// Copy the finished PDF to this path.
    #[arg(short, long, env = "STORY2COMIC_OUTPUT")]
    output: Option<PathBuf>,

    /// Number of panels (4–8).
    #[arg(short = 'n', long, env = "STORY2COMIC_PANELS", default_value_t = 6,
          value_parser = clap::value_parser!(u8).range(MIN_PANELS as i64..=MAX_PANELS as i64))]
    panels: u8,

    /// Panels per PDF page: 2, 4 or 6.
    #[arg(long, env = "STORY2COMIC_PER_PAGE", default_value = "4", value_parser = parse_per_page)]
    per_page: PanelsPerPage,

    /// Visual style of the artwork.
    #[arg(long, env = "STORY2COMIC_STYLE", value_enum, default_value = "manga")]
    style: StyleArg,

    /// Chat model ID used for analysis and scripting.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Replicate image model (owner/name).
    #[arg(long, env = "STORY2COMIC_IMAGE_MODEL")]
    image_model: Option<String>,

    /// Chat temperature (0.0–2.0).
    #[arg(long, env = "STORY2COMIC_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Maximum story length in words.
    #[arg(long, env = "STORY2COMIC_MAX_WORDS", default_value_t = 5000)]
    max_words: usize,

    /// Whole-job timeout in seconds.
    #[arg(long, env = "STORY2COMIC_TIMEOUT", default_value_t = 600)]
    timeout: u64,

    /// Working directory for panel images.
    #[arg(long, env = "STORY2COMIC_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Directory receiving `<job>-comic.pdf`.
    #[arg(long, env = "STORY2COMIC_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Print the final job record as JSON.
    #[arg(long, env = "STORY2COMIC_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "STORY2COMIC_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "STORY2COMIC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "STORY2COMIC_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StyleArg {
    Manga,
    IndianComic,
    Cinematic,
    Watercolor,
    Noir,
}

impl From<StyleArg> for VisualStyle {
    fn from(v: StyleArg) -> Self {
        match v {
            StyleArg::Manga => VisualStyle::Manga,
            StyleArg::IndianComic => VisualStyle::IndianComic,
            StyleArg::Cinematic => VisualStyle::Cinematic,
            StyleArg::Watercolor => VisualStyle::Watercolor,
            StyleArg::Noir => VisualStyle::Noir,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config and job ─────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ComicProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let data = build_job_data(&cli)?;

    let store = Arc::new(InMemoryJobStore::new());
    let pipeline =
        ComicPipeline::from_env(config, store).context("Failed to configure model clients")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let job = pipeline
        .generate(data)
        .await
        .context("Comic generation failed")?;
    let result = job.result.clone().unwrap_or_default();
    let pdf_path = result
        .pdf_path
        .clone()
        .context("Job completed without a PDF path")?;

    let final_path = match cli.output {
        Some(ref out) => {
            if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            tokio::fs::copy(&pdf_path, out)
                .await
                .with_context(|| format!("Failed to copy PDF to {}", out.display()))?;
            out.clone()
        }
        None => pdf_path,
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&job).context("Failed to serialise job")?;
        println!("{json}");
        return Ok(());
    }

    if !cli.quiet {
        eprintln!(
            "{} {} panels  →  {}",
            green("✔"),
            bold(&result.panels.len().to_string()),
            bold(&final_path.display().to_string()),
        );
        if let Some(ref summary) = result.summary {
            let first_line = summary.lines().next().unwrap_or_default();
            eprintln!("   {}", dim(first_line));
        }
    }
    println!("{}", final_path.display());
    Ok(())
}

/// Map CLI args to `ComicConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ComicConfig> {
    let mut builder = ComicConfig::builder()
        .temperature(cli.temperature)
        .max_words(cli.max_words)
        .job_timeout(Duration::from_secs(cli.timeout))
        // The user owns the artifacts; never delete them behind their back.
        .cleanup_delay(None);

    if let Some(ref model) = cli.model {
        builder = builder.chat_model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.image_model {
        builder = builder.image_model(model.clone());
    }
    if let Some(ref dir) = cli.work_dir {
        builder = builder.work_root(dir.clone());
    }
    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_root(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Map the input file and layout flags to `ComicJobData`.
fn build_job_data(cli: &Cli) -> Result<ComicJobData> {
    let is_pdf = cli
        .input
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    let mut data = ComicJobData::from_pdf(cli.input.clone(), cli.panels as usize)
        .with_layout(cli.per_page)
        .with_style(cli.style.into());
    if !is_pdf {
        data.input_kind = InputKind::Text;
    }
    data.validate().context("Invalid job input")?;
    Ok(data)
}

/// Parse `--per-page` into `PanelsPerPage`.
fn parse_per_page(s: &str) -> Result<PanelsPerPage, String> {
    let n: u8 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a number"))?;
    PanelsPerPage::try_from(n).map_err(|e| e.to_string())
}
