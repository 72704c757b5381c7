//! Speech-bubble lettering.
//!
//! The bubble is drawn as SVG (rounded rectangle, small tail, centred
//! `<tspan>` lines), rasterised with resvg at the panel's exact size and
//! alpha-composited over the illustration.
//!
//! Wrapping counts characters, not pixels: at most [`MAX_LINE_CHARS`] per
//! line and [`MAX_LINES`] lines. Words that do not fit in four lines are
//! dropped. A single word longer than a line gets a line of its own and is
//! never split.

use crate::error::ComicError;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use once_cell::sync::Lazy;
use resvg::{tiny_skia, usvg};
use std::fmt::Write as _;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

pub const MAX_LINE_CHARS: usize = 22;
pub const MAX_LINES: usize = 4;
pub const MIN_FONT_PX: f32 = 28.0;
pub const MAX_FONT_PX: f32 = 44.0;
pub const LINE_HEIGHT: f32 = 1.15;

const MARGIN_RATIO: f32 = 0.04;
const HEIGHT_RATIO: f32 = 0.26;
const TAIL_HEIGHT_RATIO: f32 = 0.05;
const FONT_STEP_PX: f32 = 4.0;
const FONT_FAMILY: &str = "Noto Sans Telugu, Noto Sans, DejaVu Sans, sans-serif";

static FONTS: Lazy<Arc<usvg::fontdb::Database>> = Lazy::new(|| {
    let mut db = usvg::fontdb::Database::new();
    db.load_system_fonts();
    debug!("Loaded {} system font faces", db.len());
    Arc::new(db)
});

/// Axis-aligned rectangle in pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }
}

/// Everything needed to draw one bubble.
#[derive(Debug, Clone, PartialEq)]
pub struct BubbleLayout {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub bubble: Rect,
    pub corner_radius: f32,
    /// Triangle above the bubble's top edge: base-left, tip, base-right.
    pub tail: [(f32, f32); 3],
    pub lines: Vec<String>,
    pub font_size: f32,
    /// Vertical centre of each line.
    pub line_centers: Vec<f32>,
}

/// Greedy character-budget wrap.
pub fn wrap_text(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        if current.chars().count() + 1 + word.chars().count() <= MAX_LINE_CHARS {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            if lines.len() == MAX_LINES {
                return lines;
            }
            current.push_str(word);
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Larger type for fewer lines, shrunk further if the block would not fit.
fn font_size_for(line_count: usize, inner_height: f32) -> f32 {
    let n = line_count.max(1) as f32;
    let stepped = MAX_FONT_PX - FONT_STEP_PX * (n - 1.0);
    let fitting = inner_height / (n * LINE_HEIGHT);
    stepped.min(fitting).clamp(MIN_FONT_PX, MAX_FONT_PX)
}

/// Compute bubble geometry and text placement for a `width`×`height` canvas.
pub fn layout_bubble(width: u32, height: u32, text: &str) -> BubbleLayout {
    let (w, h) = (width as f32, height as f32);
    let margin = w * MARGIN_RATIO;
    let bubble_height = h * HEIGHT_RATIO;
    let bubble = Rect {
        x: margin,
        y: h - margin - bubble_height,
        width: w - 2.0 * margin,
        height: bubble_height,
    };

    let tail_height = h * TAIL_HEIGHT_RATIO;
    let tail_base = bubble.x + bubble.width * 0.22;
    let tail_width = bubble.width * 0.06;
    let tail = [
        (tail_base, bubble.y + 1.0),
        (tail_base + tail_width * 0.3, bubble.y - tail_height),
        (tail_base + tail_width, bubble.y + 1.0),
    ];

    let lines = wrap_text(text);
    let padding = bubble_height * 0.08;
    let font_size = font_size_for(lines.len(), bubble_height - 2.0 * padding);
    let line_height = font_size * LINE_HEIGHT;
    let block_top = bubble.y + (bubble_height - line_height * lines.len() as f32) / 2.0;
    let line_centers = (0..lines.len())
        .map(|i| block_top + line_height * (i as f32 + 0.5))
        .collect();

    BubbleLayout {
        canvas_width: width,
        canvas_height: height,
        bubble,
        corner_radius: bubble_height * 0.18,
        tail,
        lines,
        font_size,
        line_centers,
    }
}

/// Escape text for an XML text node or attribute.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render a layout to an SVG document the size of the canvas.
pub fn bubble_svg(layout: &BubbleLayout) -> String {
    let BubbleLayout { bubble: b, tail, .. } = layout;
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = layout.canvas_width,
        h = layout.canvas_height,
    );

    // Tail first so the rectangle hides the seam.
    let _ = write!(
        svg,
        r##"<path d="M {:.1} {:.1} L {:.1} {:.1} L {:.1} {:.1} Z" fill="#ffffff" stroke="#111111" stroke-width="4" stroke-linejoin="round"/>"##,
        tail[0].0, tail[0].1, tail[1].0, tail[1].1, tail[2].0, tail[2].1
    );
    let _ = write!(
        svg,
        r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" rx="{r:.1}" ry="{r:.1}" fill="#ffffff" stroke="#111111" stroke-width="4"/>"##,
        b.x,
        b.y,
        b.width,
        b.height,
        r = layout.corner_radius,
    );

    if !layout.lines.is_empty() {
        let _ = write!(
            svg,
            r##"<text font-family="{FONT_FAMILY}" font-size="{:.1}" fill="#111111" text-anchor="middle" dominant-baseline="middle">"##,
            layout.font_size
        );
        for (line, y) in layout.lines.iter().zip(&layout.line_centers) {
            let _ = write!(
                svg,
                r#"<tspan x="{:.1}" y="{:.1}">{}</tspan>"#,
                b.center_x(),
                y,
                escape_xml(line)
            );
        }
        svg.push_str("</text>");
    }

    svg.push_str("</svg>");
    svg
}

/// Rasterise an SVG document to straight-alpha RGBA.
fn rasterize(svg: &str, width: u32, height: u32) -> Result<RgbaImage, ComicError> {
    let mut opt = usvg::Options::default();
    opt.fontdb = Arc::clone(&FONTS);

    let tree = usvg::Tree::from_str(svg, &opt)
        .map_err(|e| ComicError::BubbleRender(format!("invalid bubble SVG: {e}")))?;
    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| ComicError::BubbleRender(format!("bad canvas size {width}x{height}")))?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    let mut out = RgbaImage::new(width, height);
    for (dst, src) in out.pixels_mut().zip(pixmap.pixels()) {
        let c = src.demultiply();
        *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
    }
    Ok(out)
}

/// Draw the dialogue bubble onto `image`.
pub fn draw_bubble(image: &DynamicImage, dialogue: &str) -> Result<DynamicImage, ComicError> {
    let mut base = image.to_rgba8();
    let (width, height) = base.dimensions();
    let layout = layout_bubble(width, height, dialogue);
    let overlay = rasterize(&bubble_svg(&layout), width, height)?;
    image::imageops::overlay(&mut base, &overlay, 0, 0);
    debug!(
        "Bubble: {} lines at {:.0}px on {}x{}",
        layout.lines.len(),
        layout.font_size,
        width,
        height
    );
    Ok(DynamicImage::ImageRgba8(base))
}

/// Composite a bubble onto encoded image bytes, re-encoding in the input format.
///
/// Blank dialogue leaves the image untouched.
pub fn composite_bubble(bytes: &[u8], dialogue: &str) -> Result<Vec<u8>, ComicError> {
    if dialogue.trim().is_empty() {
        return Ok(bytes.to_vec());
    }

    let format = image::guess_format(bytes)
        .map_err(|e| ComicError::ImageDecode(format!("unknown image format: {e}")))?;
    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ComicError::ImageDecode(e.to_string()))?;
    let lettered = draw_bubble(&img, dialogue)?;

    // JPEG has no alpha channel.
    let encodable = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(lettered.to_rgb8()),
        _ => lettered,
    };
    let mut out = Vec::new();
    encodable
        .write_to(&mut Cursor::new(&mut out), format)
        .map_err(|e| ComicError::BubbleRender(format!("cannot re-encode panel: {e}")))?;
    Ok(out)
}
