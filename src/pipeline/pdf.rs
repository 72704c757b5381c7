//! Comic assembly: finished panel images → paginated A4 PDF.
//!
//! ## Layout
//!
//! Every page is a two-column grid inside a fixed margin, with a footer band
//! reserved for the page number:
//!
//! ```text
//! ┌──────────────────────────┐
//! │  ┌────────┐  ┌────────┐  │   rows = panels_per_page / 2
//! │  │   0    │  │   1    │  │   cells share the printable area evenly
//! │  └────────┘  └────────┘  │   images are scaled uniformly to fit and
//! │  ┌────────┐  ┌────────┐  │   centred inside their cell
//! │  │   2    │  │   3    │  │
//! │  └────────┘  └────────┘  │
//! │                       1  │   ← footer band
//! └──────────────────────────┘
//! ```
//!
//! [`plan_pages`] computes this without touching any image data; the
//! assembler only adds encoding and PDF object bookkeeping.
//!
//! ## Ordering
//!
//! Panel order comes from the directory listing: files named
//! `panel-NNN.png` sorted by name. The zero padding makes that order equal
//! to panel index order regardless of how panels were produced.

use crate::config::PanelsPerPage;
use crate::error::ComicError;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// ISO A4 in points.
pub const PAGE_WIDTH: f32 = 595.28;
pub const PAGE_HEIGHT: f32 = 841.89;
pub const PAGE_MARGIN: f32 = 36.0;
pub const GUTTER: f32 = 14.0;
/// Reserved below the grid for the page number.
pub const FOOTER_BAND: f32 = 24.0;
pub const PAGE_NUMBER_SIZE: f32 = 10.0;

const JPEG_QUALITY: u8 = 90;
/// Helvetica digit advance, in text-space units per point of font size.
const HELVETICA_DIGIT_WIDTH: f32 = 0.556;

static RE_PANEL_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^panel-\d{3}\.png$").unwrap());

/// Rectangle in top-left-origin page coordinates (points).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Where one panel goes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellPlacement {
    /// Position in the overall panel sequence.
    pub panel_index: usize,
    /// Grid position on the page, read left-to-right, top-to-bottom.
    pub slot: usize,
    pub cell: Rect,
    /// Scaled, centred image inside `cell`.
    pub image: Rect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    /// 1-based.
    pub number: usize,
    pub cells: Vec<CellPlacement>,
}

/// Cell size for a grid with `rows` rows.
pub fn cell_size(rows: usize) -> (f32, f32) {
    let cols = PanelsPerPage::COLUMNS as f32;
    let rows = rows as f32;
    let printable_w = PAGE_WIDTH - 2.0 * PAGE_MARGIN;
    let printable_h = PAGE_HEIGHT - 2.0 * PAGE_MARGIN - FOOTER_BAND;
    (
        (printable_w - GUTTER * (cols - 1.0)) / cols,
        (printable_h - GUTTER * (rows - 1.0)) / rows,
    )
}

/// Uniformly scale `(w, h)` to fit inside `cell`, centred.
pub fn fit_in_cell(cell: Rect, width: u32, height: u32) -> Rect {
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    let scale = (cell.width / w).min(cell.height / h);
    let (sw, sh) = (w * scale, h * scale);
    Rect {
        x: cell.x + (cell.width - sw) / 2.0,
        y: cell.y + (cell.height - sh) / 2.0,
        width: sw,
        height: sh,
    }
}

/// Assign every image (given by pixel size, in panel order) to a page and cell.
pub fn plan_pages(image_sizes: &[(u32, u32)], per_page: PanelsPerPage) -> Vec<PageLayout> {
    let cols = PanelsPerPage::COLUMNS;
    let (cell_w, cell_h) = cell_size(per_page.rows());

    image_sizes
        .chunks(per_page.count())
        .enumerate()
        .map(|(page_idx, chunk)| PageLayout {
            number: page_idx + 1,
            cells: chunk
                .iter()
                .enumerate()
                .map(|(slot, &(w, h))| {
                    let (row, col) = (slot / cols, slot % cols);
                    let cell = Rect {
                        x: PAGE_MARGIN + col as f32 * (cell_w + GUTTER),
                        y: PAGE_MARGIN + row as f32 * (cell_h + GUTTER),
                        width: cell_w,
                        height: cell_h,
                    };
                    CellPlacement {
                        panel_index: page_idx * per_page.count() + slot,
                        slot,
                        cell,
                        image: fit_in_cell(cell, w, h),
                    }
                })
                .collect(),
        })
        .collect()
}

/// The first `panel_count` finished panel images in `panels_dir`, in order.
pub fn list_panel_images(panels_dir: &Path, panel_count: usize) -> Result<Vec<PathBuf>, ComicError> {
    let entries = std::fs::read_dir(panels_dir).map_err(|e| ComicError::io(panels_dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ComicError::io(panels_dir, e))?;
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| RE_PANEL_FILE.is_match(n)) {
            files.push(entry.path());
        }
    }
    files.sort();

    if files.len() < panel_count {
        return Err(ComicError::PdfBuild(format!(
            "expected {} panel images in {}, found {}",
            panel_count,
            panels_dir.display(),
            files.len()
        )));
    }
    files.truncate(panel_count);
    Ok(files)
}

/// Build the comic PDF at `output`.
pub async fn assemble_pdf(
    panels_dir: &Path,
    panel_count: usize,
    per_page: PanelsPerPage,
    output: &Path,
) -> Result<PathBuf, ComicError> {
    let panels_dir = panels_dir.to_path_buf();
    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || build_pdf(&panels_dir, panel_count, per_page, &output))
        .await
        .map_err(|e| ComicError::Internal(format!("PDF task panicked: {e}")))?
}

struct EncodedPanel {
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
}

fn encode_panel(path: &Path) -> Result<EncodedPanel, ComicError> {
    let img = image::open(path)
        .map_err(|e| ComicError::PdfBuild(format!("cannot read {}: {e}", path.display())))?;
    let (width, height) = img.dimensions();
    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY))
        .map_err(|e| ComicError::PdfBuild(format!("cannot encode {}: {e}", path.display())))?;
    Ok(EncodedPanel {
        jpeg,
        width,
        height,
    })
}

fn build_pdf(
    panels_dir: &Path,
    panel_count: usize,
    per_page: PanelsPerPage,
    output: &Path,
) -> Result<PathBuf, ComicError> {
    let files = list_panel_images(panels_dir, panel_count)?;
    let panels = files
        .iter()
        .map(|p| encode_panel(p))
        .collect::<Result<Vec<_>, _>>()?;
    let sizes: Vec<(u32, u32)> = panels.iter().map(|p| (p.width, p.height)).collect();
    let pages = plan_pages(&sizes, per_page);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let guide_gs_id = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "CA" => 0,
        "ca" => 0,
    });

    let image_ids: Vec<ObjectId> = panels
        .into_iter()
        .map(|panel| {
            let stream = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => panel.width as i64,
                    "Height" => panel.height as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                panel.jpeg,
            )
            .with_compression(false);
            doc.add_object(stream)
        })
        .collect();

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page in &pages {
        let mut xobjects = lopdf::Dictionary::new();
        for placement in &page.cells {
            xobjects.set(
                image_name(placement.panel_index),
                image_ids[placement.panel_index],
            );
        }

        let content = page_content(page);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
                "ExtGState" => dictionary! { "GS0" => guide_gs_id },
                "XObject" => xobjects,
            },
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ComicError::io(parent, e))?;
    }
    doc.save(output)
        .map_err(|e| ComicError::PdfBuild(format!("cannot write {}: {e}", output.display())))?;

    info!(
        "PDF written: {} panels on {} pages → {}",
        panel_count,
        pages.len(),
        output.display()
    );
    Ok(output.to_path_buf())
}

fn image_name(panel_index: usize) -> String {
    format!("Im{panel_index}")
}

/// PDF y axis points up; layout rectangles are top-left based.
fn flip_y(rect: &Rect) -> f32 {
    PAGE_HEIGHT - rect.y - rect.height
}

fn page_content(page: &PageLayout) -> String {
    let mut ops = String::new();
    for placement in &page.cells {
        let c = placement.cell;
        ops.push_str(&format!(
            "q /GS0 gs {:.2} {:.2} {:.2} {:.2} re S Q\n",
            c.x,
            flip_y(&c),
            c.width,
            c.height
        ));
        let i = placement.image;
        ops.push_str(&format!(
            "q {:.2} 0 0 {:.2} {:.2} {:.2} cm /{} Do Q\n",
            i.width,
            i.height,
            i.x,
            flip_y(&i),
            image_name(placement.panel_index)
        ));
    }

    let label = page.number.to_string();
    let text_width = label.len() as f32 * HELVETICA_DIGIT_WIDTH * PAGE_NUMBER_SIZE;
    let x = PAGE_WIDTH - PAGE_MARGIN - text_width;
    let y = PAGE_MARGIN + (FOOTER_BAND - PAGE_NUMBER_SIZE) / 2.0;
    ops.push_str(&format!(
        "BT /F1 {PAGE_NUMBER_SIZE:.0} Tf {x:.2} {y:.2} Td ({label}) Tj ET\n"
    ));
    debug!("Page {}: {} cells", page.number, page.cells.len());
    ops
}
