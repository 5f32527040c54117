//! Decoding of untrusted provider output into the optimization envelope.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::errors::{OptimizerError, Result};
use crate::wire::OptimizationEnvelope;

fn fenced() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?\s*(\{[\s\S]*\})\s*```").ok())
        .as_ref()
}

/// A fenced JSON block if there is one, otherwise the span from the first
/// `{` to the last `}`.
pub fn extract_json(raw: &str) -> Option<&str> {
    if let Some(m) = fenced().and_then(|re| re.captures(raw)).and_then(|c| c.get(1)) {
        return Some(m.as_str());
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Strict decode: the payload must be a JSON object and every field that is
/// present must have the expected type. Change entries without reasoning
/// are dropped.
pub fn parse_envelope(raw: &str) -> Result<OptimizationEnvelope> {
    let json = extract_json(raw)
        .ok_or_else(|| OptimizerError::MalformedResponse("no JSON object in response".into()))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| OptimizerError::MalformedResponse(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(OptimizerError::MalformedResponse("response is not a JSON object".into()));
    }
    let mut envelope: OptimizationEnvelope = serde_json::from_value(value)
        .map_err(|e| OptimizerError::MalformedResponse(format!("unexpected field types: {e}")))?;
    if let Some(changes) = envelope.changes.as_mut() {
        changes.retain(|c| !c.reasoning.trim().is_empty());
    }
    Ok(envelope)
}
