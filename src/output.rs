//! Result types produced by the pipeline.
//!
//! [`Scene`] is the script-stage view of a panel; [`PanelResult`] is what a
//! finished panel looks like in the job record; [`PanelSidecar`] is the same
//! data plus the local image path, persisted as `panel-NNN.meta.json`.

use crate::error::ComicError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One scripted panel, before any image exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// English description for the illustrator.
    pub visual: String,
    /// Short dialogue line in the target language.
    pub dialogue: String,
}

/// A finished panel as reported in [`ComicJobResult::panels`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelResult {
    /// 0-based position in the comic.
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    pub dialogue: String,
    /// Exact prompt sent to the image model.
    pub image_prompt: String,
    /// URL the image model returned.
    pub image_url: String,
    /// Locally served address of the composited panel.
    pub preview_url: String,
}

/// On-disk metadata for one panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelSidecar {
    #[serde(flatten)]
    pub panel: PanelResult,
    /// Filesystem path of the composited image.
    pub local_path: PathBuf,
}

/// The externally visible result payload of a comic job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComicJobResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Grows one panel at a time; never shrinks.
    #[serde(default)]
    pub panels: Vec<PanelResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Local path of the finished PDF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Zero-padded stem shared by all files of panel `index`.
///
/// Fixed width keeps lexicographic order equal to panel order.
pub fn panel_stem(index: usize) -> String {
    format!("panel-{index:03}")
}

/// Path of the final composited image for panel `index`.
pub fn panel_image_path(panels_dir: &Path, index: usize) -> PathBuf {
    panels_dir.join(format!("{}.png", panel_stem(index)))
}

/// Path of the pre-bubble image for panel `index`.
pub fn panel_raw_path(panels_dir: &Path, index: usize) -> PathBuf {
    panels_dir.join(format!("{}.raw.png", panel_stem(index)))
}

/// Path of the JSON sidecar for panel `index`.
pub fn panel_meta_path(panels_dir: &Path, index: usize) -> PathBuf {
    panels_dir.join(format!("{}.meta.json", panel_stem(index)))
}

/// Persist a sidecar next to its panel image.
pub async fn write_panel_sidecar(
    panels_dir: &Path,
    sidecar: &PanelSidecar,
) -> Result<PathBuf, ComicError> {
    let path = panel_meta_path(panels_dir, sidecar.panel.index);
    let json = serde_json::to_vec_pretty(sidecar)?;
    tokio::fs::write(&path, json)
        .await
        .map_err(|e| ComicError::io(&path, e))?;
    Ok(path)
}

/// Read every `*.meta.json` sidecar in `panels_dir`, ordered by panel index.
pub async fn read_panel_sidecars(panels_dir: &Path) -> Result<Vec<PanelSidecar>, ComicError> {
    let mut entries = tokio::fs::read_dir(panels_dir)
        .await
        .map_err(|e| ComicError::io(panels_dir, e))?;

    let mut sidecars = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ComicError::io(panels_dir, e))?
    {
        let path = entry.path();
        let is_meta = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("panel-") && n.ends_with(".meta.json"));
        if !is_meta {
            continue;
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ComicError::io(&path, e))?;
        sidecars.push(serde_json::from_slice::<PanelSidecar>(&bytes)?);
    }

    sidecars.sort_by_key(|s| s.panel.index);
    Ok(sidecars)
}
