//! Recovers a JSON payload from captured capability output.
//!
//! Capability bodies talk back through stdout, which may carry terminal color
//! codes or log chatter around the payload. Extraction strips ANSI escapes,
//! tries a direct parse, then retries on the span between the first opening
//! and last closing delimiter.
//!
//! The span heuristic assumes one payload dominates the output; text holding
//! several JSON fragments can be mis-sliced.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

/// Output was present but no JSON payload could be recovered from it.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ParseFault {
    #[from]
    source: serde_json::Error,
}

impl ParseFault {
    /// Line and column of the failure within the text that was parsed last.
    pub fn position(&self) -> (usize, usize) {
        (self.source.line(), self.source.column())
    }
}

fn ansi_escape() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("ANSI pattern is valid"))
}

/// Remove ANSI CSI escape sequences.
pub fn strip_ansi(raw: &str) -> String {
    ansi_escape().replace_all(raw, "").into_owned()
}

/// Extract the structured payload from `raw` capability output.
///
/// Empty (or escape-only) output yields an empty object rather than a fault.
pub fn extract(raw: &str) -> Result<Value, ParseFault> {
    let cleaned = strip_ansi(raw);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    let direct_err = match serde_json::from_str(cleaned) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    let Some(span) = payload_span(cleaned) else {
        return Err(direct_err.into());
    };
    serde_json::from_str(span).map_err(ParseFault::from)
}

/// Slice from the earliest `{`/`[` to the latest `}`/`]`, inclusive.
fn payload_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
