use log::{debug, warn};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::diff::MIN_DIFF_LEN;

/// Structured root-cause analysis recovered from model output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub summary: String,
    pub root_cause: String,
    /// Raw category label; mapped onto the closed set by the caller
    pub category: String,
    pub failing_file: Option<String>,
    /// Always within `[0, 1]`
    pub confidence: f64,
}

impl Diagnosis {
    /// Generic low-confidence result used when no JSON object can be recovered.
    pub fn unparsed() -> Self {
        Self {
            summary: "Unable to parse RCA".to_string(),
            root_cause: "unknown".to_string(),
            category: "other".to_string(),
            failing_file: None,
            confidence: 0.2,
        }
    }

    /// Result used when every provider failed.
    pub fn unavailable() -> Self {
        Self {
            summary: "AI unavailable".to_string(),
            root_cause: "unavailable".to_string(),
            category: "other".to_string(),
            failing_file: None,
            confidence: 0.0,
        }
    }

    fn from_object(object: &Map<String, Value>) -> Self {
        let text = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let confidence = match object.get("confidence") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|c: &f64| c.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

        Self {
            summary: text("summary").unwrap_or_default(),
            root_cause: text("rootCause")
                .or_else(|| text("root_cause"))
                .unwrap_or_default(),
            category: text("category").unwrap_or_else(|| "other".to_string()),
            failing_file: text("failingFile").or_else(|| text("failing_file")),
            confidence,
        }
    }
}

/// Extracts a diagnosis from raw model text. Never fails.
///
/// Tries the whole text as JSON, then the span from the first `{` to the
/// last `}`, then every balanced object in the text; falls back to
/// [`Diagnosis::unparsed`].
pub fn recover_diagnosis(raw: &str) -> Diagnosis {
    let trimmed = raw.trim();

    if let Some(object) = parse_object(trimmed) {
        return Diagnosis::from_object(&object);
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Some(object) = parse_object(&trimmed[start..=end]) {
                debug!("Recovered diagnosis from outer braces");
                return Diagnosis::from_object(&object);
            }
        }
    }

    for candidate in balanced_objects(trimmed) {
        if let Some(object) = parse_object(candidate) {
            debug!("Recovered diagnosis from embedded object");
            return Diagnosis::from_object(&object);
        }
    }

    warn!("Could not recover a JSON diagnosis from model output");
    Diagnosis::unparsed()
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Every `{ ... }` span whose braces balance, ignoring braces inside strings.
fn balanced_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();

    for (start, _) in text.match_indices('{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &byte) in bytes[start..].iter().enumerate() {
            if in_string {
                match byte {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }

            match byte {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        found.push(&text[start..=start + offset]);
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    found
}

/// Cleans model output into diff text.
///
/// When the reply is fenced, only the text between the opening fence and
/// the last closing fence is kept. Fence markers inside the diff itself
/// never start in column 0, so they survive. Returns `None` when fewer than
/// [`MIN_DIFF_LEN`] characters remain.
pub fn recover_diff(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw.lines().collect();
    let is_fence = |line: &&str| line.trim_end().starts_with("```");

    let body = match lines.iter().position(is_fence) {
        Some(open) => {
            let rest = &lines[open + 1..];
            let close = rest.iter().rposition(is_fence).unwrap_or(rest.len());
            &rest[..close]
        }
        None => &lines[..],
    };
    let without_fences = body.join("\n");

    let cleaned = without_fences.trim();

    if cleaned.chars().count() < MIN_DIFF_LEN {
        warn!("Model returned an empty patch");
        return None;
    }

    Some(format!("{cleaned}\n"))
}
