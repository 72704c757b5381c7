//! Script extraction: model text → exactly `panel_count` [`Scene`]s.
//!
//! Models often ignore "no fences" or add a sentence before the JSON. We
//! tolerate that much: strip fences, then parse the span from the first `{`
//! to the last `}`. Anything beyond that is a hard failure; there is no
//! partial recovery and no padding. A script with the wrong number of usable
//! scenes fails with both counts in the message.

use crate::error::ComicError;
use crate::output::Scene;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static RE_LEADING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_-]*\s*").unwrap());
static RE_TRAILING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```\s*$").unwrap());

/// Parse, filter and validate the script response.
pub fn parse_script(raw: &str, panel_count: usize) -> Result<Vec<Scene>, ComicError> {
    let value = extract_json_object(raw)?;

    let scenes = value
        .get("scenes")
        .and_then(Value::as_array)
        .ok_or_else(|| ComicError::ScriptParse("top-level \"scenes\" is not a list".into()))?;

    let total = scenes.len();
    let parsed: Vec<Scene> = scenes
        .iter()
        .filter_map(scene_from_value)
        .take(panel_count)
        .collect();
    debug!(
        "Script: {} scenes returned, {} usable (wanted {})",
        total,
        parsed.len(),
        panel_count
    );

    if parsed.len() != panel_count {
        return Err(ComicError::SceneCountMismatch {
            expected: panel_count,
            actual: parsed.len(),
        });
    }
    Ok(parsed)
}

/// Strip code fences and parse the outermost `{…}` span.
fn extract_json_object(raw: &str) -> Result<Value, ComicError> {
    let trimmed = raw.trim();
    let without_lead = RE_LEADING_FENCE.replace(trimmed, "");
    let body = RE_TRAILING_FENCE.replace(&without_lead, "");

    let (start, end) = match (body.find('{'), body.rfind('}')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => {
            return Err(ComicError::ScriptParse(
                "response contains no JSON object".into(),
            ))
        }
    };

    serde_json::from_str(&body[start..=end])
        .map_err(|e| ComicError::ScriptParse(format!("invalid JSON: {e}")))
}

/// A scene needs string `visual` and `dialogue_telugu`; `title` is optional.
fn scene_from_value(value: &Value) -> Option<Scene> {
    let visual = value.get("visual")?.as_str()?.trim().to_string();
    let dialogue = value.get("dialogue_telugu")?.as_str()?.trim().to_string();
    let title = value
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    Some(Scene {
        title,
        visual,
        dialogue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenes_json(n: usize) -> String {
        let items: Vec<String> = (0..n)
            .map(|i| {
                format!(
                    r#"{{"title": " T{i} ", "visual": " visual {i} ", "dialogue_telugu": " మాట {i} "}}"#
                )
            })
            .collect();
        format!(r#"{{"scenes": [{}]}}"#, items.join(","))
    }

    #[test]
    fn parses_plain_json_and_trims_fields() {
        let scenes = parse_script(&scenes_json(4), 4).unwrap();
        assert_eq!(scenes.len(), 4);
        assert_eq!(scenes[0].title.as_deref(), Some("T0"));
        assert_eq!(scenes[0].visual, "visual 0");
        assert_eq!(scenes[3].dialogue, "మాట 3");
    }

    #[test]
    fn strips_fences_and_chatter() {
        let raw = format!("```json\nHere you go:\n{}\n```", scenes_json(4));
        assert_eq!(parse_script(&raw, 4).unwrap().len(), 4);
    }

    #[test]
    fn truncates_extra_scenes() {
        let scenes = parse_script(&scenes_json(7), 5).unwrap();
        assert_eq!(scenes.len(), 5);
        assert_eq!(scenes[4].visual, "visual 4");
    }

    #[test]
    fn too_few_scenes_names_both_counts() {
        let err = parse_script(&scenes_json(3), 5).unwrap_err();
        assert!(matches!(
            err,
            ComicError::SceneCountMismatch {
                expected: 5,
                actual: 3
            }
        ));
        let msg = err.to_string();
        assert!(msg.contains('3') && msg.contains('5'), "got: {msg}");
    }

    #[test]
    fn invalid_scenes_are_dropped_before_counting() {
        let raw = r#"{"scenes": [
            {"visual": "a", "dialogue_telugu": "x"},
            {"visual": 7, "dialogue_telugu": "x"},
            {"visual": "b"},
            {"visual": "c", "dialogue_telugu": "y"}
        ]}"#;
        let err = parse_script(raw, 4).unwrap_err();
        assert!(matches!(err, ComicError::SceneCountMismatch { actual: 2, .. }));
    }

    #[test]
    fn missing_title_is_none() {
        let raw = r#"{"scenes": [{"visual": "a", "dialogue_telugu": "x"}]}"#;
        let scenes = parse_script(raw, 1).unwrap();
        assert_eq!(scenes[0].title, None);
    }

    #[test]
    fn non_list_scenes_is_a_parse_error() {
        let err = parse_script(r#"{"scenes": {"visual": "a"}}"#, 4).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            parse_script("I cannot help with that.", 4),
            Err(ComicError::ScriptParse(_))
        ));
        assert!(matches!(
            parse_script("{ not json }", 4),
            Err(ComicError::ScriptParse(_))
        ));
    }
}
