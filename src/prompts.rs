//! Prompts for story analysis, scripting and panel illustration.
//!
//! Every prompt the pipeline sends lives here, so wording changes touch one
//! file and tests can inspect prompts without a live model.

use crate::config::VisualStyle;

/// System message shared by both chat calls.
pub const STORYTELLER_SYSTEM_PROMPT: &str = "You are a veteran comic-book writer and storyboard artist. \
You adapt prose into tight visual stories. Content may be mature but never explicit: \
no sexual content, no gratuitous gore.";

/// Target language of panel dialogue.
pub const DIALOGUE_LANGUAGE: &str = "Telugu";

/// Aspect ratio requested from the image model.
pub const PANEL_ASPECT_RATIO: &str = "16:9";

/// Tail appended to every image prompt. Dialogue is composited afterwards,
/// so the model must not paint any lettering of its own.
pub const NEGATIVE_SUFFIX: &str = "No text, no letters, no captions, no speech bubbles, \
no watermarks, no signatures, no logos.";

/// Build the story-analysis prompt.
pub fn analysis_prompt(story: &str, panel_count: usize) -> String {
    format!(
        r#"Read the story below and write a concise English summary for a comic adaptation.

Include:
- Main characters, each with a one-line visual description
- Setting (place, era, mood)
- The central conflict
- A beat outline of exactly {panel_count} numbered beats, one per comic panel, in story order

Keep the tone mature but non-explicit. Output plain text only.

STORY:
"""
{story}
""""#
    )
}

/// Build the script prompt that asks for strict JSON scenes.
pub fn script_prompt(story: &str, summary: &str, style: VisualStyle, panel_count: usize) -> String {
    format!(
        r#"Turn this story into a comic script of exactly {panel_count} panels drawn in a {style} style.

Return STRICT JSON only, with this exact shape:
{{"scenes": [{{"title": "short title", "visual": "English description of what the panel shows", "dialogue_telugu": "one short line of dialogue in {DIALOGUE_LANGUAGE}"}}]}}

Rules:
- The "scenes" array must contain exactly {panel_count} objects, in story order.
- "visual" is for an illustrator: characters, action, setting, camera framing. English only.
- "dialogue_telugu" is at most 12 words, written in {DIALOGUE_LANGUAGE} script.
- No explicit sexual content.
- Do NOT wrap the JSON in markdown fences. Do NOT add commentary before or after it.

SUMMARY:
{summary}

STORY:
"""
{story}
""""#,
        style = style.as_str(),
    )
}

/// Fixed phrase that opens the image prompt for each style.
pub fn style_phrase(style: VisualStyle) -> &'static str {
    match style {
        VisualStyle::Manga => {
            "Japanese manga illustration, crisp black ink linework, screentone shading, dynamic angles"
        }
        VisualStyle::IndianComic => {
            "Classic Indian comic book art in the Amar Chitra Katha tradition, bold outlines, flat vibrant colors"
        }
        VisualStyle::Cinematic => {
            "Cinematic digital painting, dramatic lighting, shallow depth of field, film still composition"
        }
        VisualStyle::Watercolor => {
            "Soft watercolor illustration, gentle washes, visible paper texture, muted palette"
        }
        VisualStyle::Noir => {
            "Film noir comic art, high-contrast black and white, deep shadows, rain-slick streets"
        }
    }
}

/// Build the image prompt for one scene.
///
/// Pure and deterministic: identical inputs always produce identical bytes.
pub fn build_image_prompt(visual: &str, style: VisualStyle) -> String {
    format!(
        "{}. Single comic panel, wide {} frame, clear focal point. Scene: {}. {}",
        style_phrase(style),
        PANEL_ASPECT_RATIO,
        visual.trim(),
        NEGATIVE_SUFFIX
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_prompt_is_deterministic() {
        let a = build_image_prompt("A boat in a storm", VisualStyle::Noir);
        let b = build_image_prompt("A boat in a storm", VisualStyle::Noir);
        assert_eq!(a, b);
    }

    #[test]
    fn image_prompt_layout() {
        let p = build_image_prompt("  A boat in a storm ", VisualStyle::Watercolor);
        assert!(p.starts_with(style_phrase(VisualStyle::Watercolor)));
        assert!(p.contains("Single comic panel"));
        assert!(p.contains("16:9"));
        assert!(p.contains("Scene: A boat in a storm."));
        assert!(p.ends_with(NEGATIVE_SUFFIX));
    }

    #[test]
    fn every_style_has_a_distinct_phrase() {
        let phrases: std::collections::HashSet<_> =
            VisualStyle::ALL.iter().map(|s| style_phrase(*s)).collect();
        assert_eq!(phrases.len(), VisualStyle::ALL.len());
    }

    #[test]
    fn script_prompt_demands_exact_count_and_json() {
        let p = script_prompt("story", "summary", VisualStyle::Manga, 6);
        assert!(p.contains("exactly 6 panels"));
        assert!(p.contains("\"dialogue_telugu\""));
        assert!(p.contains("Do NOT wrap the JSON in markdown fences"));
        assert!(p.contains("No explicit sexual content"));
    }

    #[test]
    fn analysis_prompt_sizes_beats_to_panels() {
        let p = analysis_prompt("Once upon a time", 5);
        assert!(p.contains("exactly 5 numbered beats"));
        assert!(p.contains("mature but non-explicit"));
        assert!(p.contains("Once upon a time"));
    }
}
