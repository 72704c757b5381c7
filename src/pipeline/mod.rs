//! Pipeline stages for story-to-comic generation.
//!
//! Each submodule implements one step and talks to the outside world only
//! through a small trait, so every stage can be tested with an in-process
//! fake.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ llm ──────────▶ llm + script ──▶ image + bubble ──▶ pdf
//! (text)    (analysis)      (N scenes)       (N panels)         (A4 grid)
//! ```
//!
//! 1. [`input`]   resolve inline text or a source file, collapse whitespace,
//!    enforce the word limit; PDFs go through [`extract`]
//! 2. [`llm`]     story analysis, then the script call; [`script`] turns the
//!    reply into exactly N scenes or fails
//! 3. [`image`]   one image-model call per panel, download, cover-fit to
//!    1280×720, then [`bubble`] letters the dialogue
//! 4. [`pdf`]     lay the finished panels out two columns wide on A4 pages
//!
//! Every model call goes through [`retry::with_retry`].

pub mod bubble;
pub mod extract;
pub mod image;
pub mod input;
pub mod llm;
pub mod pdf;
pub mod retry;
pub mod script;
