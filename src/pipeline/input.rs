//! Input resolution: turn a job's payload into one clean line of story text.
//!
//! Inline text wins when it is non-blank; otherwise the uploaded source file
//! is read (plain text) or handed to the [`TextExtractor`] (PDF). The result
//! has every whitespace run collapsed to a single space, so the word count
//! and the prompts see the same text the job record ends up holding.

use crate::error::ComicError;
use crate::job::{ComicJobData, InputKind};
use crate::pipeline::extract::TextExtractor;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::{debug, info};

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse all whitespace runs to single spaces and trim.
pub fn clean_text(raw: &str) -> String {
    RE_WHITESPACE.replace_all(raw, " ").trim().to_string()
}

/// Number of whitespace-separated words.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Fail with [`ComicError::StoryTooLong`] when `text` has more than `max` words.
pub fn enforce_word_limit(text: &str, max: usize) -> Result<usize, ComicError> {
    let words = count_words(text);
    if words > max {
        return Err(ComicError::StoryTooLong { words, max });
    }
    Ok(words)
}

/// Resolve, clean and bound the story text for a job.
pub async fn prepare_story(
    data: &ComicJobData,
    extractor: &dyn TextExtractor,
    max_words: usize,
) -> Result<String, ComicError> {
    let raw = resolve_story_text(data, extractor).await?;
    let cleaned = clean_text(&raw);
    if cleaned.is_empty() {
        return Err(ComicError::MissingInput);
    }
    let words = enforce_word_limit(&cleaned, max_words)?;
    info!("Story ready: {} words", words);
    Ok(cleaned)
}

/// Pick the effective raw story text: inline text, else the source file.
pub async fn resolve_story_text(
    data: &ComicJobData,
    extractor: &dyn TextExtractor,
) -> Result<String, ComicError> {
    if let Some(text) = data.text.as_deref().filter(|t| !t.trim().is_empty()) {
        debug!("Using inline story text ({} bytes)", text.len());
        return Ok(text.to_string());
    }

    let path = data.source_path.as_deref().ok_or(ComicError::MissingInput)?;
    let bytes = read_source(path).await?;

    if data.input_kind == InputKind::Pdf || bytes.starts_with(b"%PDF") {
        info!("Extracting text from {}", path.display());
        extractor.extract(bytes).await
    } else {
        String::from_utf8(bytes).map_err(|_| {
            ComicError::InvalidInput(format!("'{}' is not UTF-8 text", path.display()))
        })
    }
}

async fn read_source(path: &Path) -> Result<Vec<u8>, ComicError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ComicError::SourceNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(ComicError::io(path, e)),
    }
}
