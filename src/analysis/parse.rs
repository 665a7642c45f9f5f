//! Parsing analyzer output into a `SignalPayload`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::is_not_configured;
use crate::config::BuyingSignalConfig;
use crate::error::SignalError;

/// One categorized buying signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyingSignal {
    pub category: String,
    #[serde(default)]
    pub summary: String,
    /// 0.0 to 1.0
    #[serde(default)]
    pub strength: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub call_ids: Vec<String>,
}

/// Stored payload of a signal row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    #[serde(default)]
    pub signals: Vec<BuyingSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_summary: Option<String>,
    #[serde(default)]
    pub weighted_score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analyzed_call_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

impl SignalPayload {
    /// Clamp strengths, normalize categories and compute `weighted_score`.
    pub fn apply_weights(&mut self, config: &BuyingSignalConfig) {
        let mut score = 0.0;
        for signal in &mut self.signals {
            signal.category = signal.category.trim().to_lowercase();
            signal.strength = if signal.strength.is_finite() {
                signal.strength.clamp(0.0, 1.0)
            } else {
                0.0
            };
            score += signal.strength * config.weight_for(&signal.category);
        }
        self.weighted_score = score;
    }

    #[cfg(test)]
    pub fn top_signal(&self) -> Option<&BuyingSignal> {
        self.signals
            .iter()
            .max_by(|a, b| a.strength.total_cmp(&b.strength))
    }
}

/// Locate a JSON object in model output: a ```json fence, a generic fence,
/// the whole response, or the first balanced `{...}` in surrounding text.
pub fn extract_json_from_response(response: &str) -> Option<&str> {
    if let Some(start) = response.find("```json") {
        let json_start = start + 7;
        if let Some(end) = response[json_start..].find("```") {
            return Some(response[json_start..json_start + end].trim());
        }
    }

    if let Some(start) = response.find("```") {
        let after_fence = start + 3;
        if let Some(nl) = response[after_fence..].find('\n') {
            let json_start = after_fence + nl + 1;
            if let Some(end) = response[json_start..].find("```") {
                let candidate = response[json_start..json_start + end].trim();
                if candidate.starts_with('{') {
                    return Some(candidate);
                }
            }
        }
    }

    let trimmed = response.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    let start = response.find('{')?;
    let candidate = &response[start..];
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, ch) in candidate.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&candidate[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse analyzer output. The sentinel becomes `Configuration`; anything
/// without a usable JSON object becomes `Parse` ("no signal").
pub fn parse_signal_payload(response: &str) -> Result<SignalPayload, SignalError> {
    if is_not_configured(response) {
        return Err(SignalError::Configuration(
            "Analyzer is not configured".to_string(),
        ));
    }
    let json = extract_json_from_response(response)
        .ok_or_else(|| SignalError::Parse("no JSON object in analysis output".to_string()))?;
    serde_json::from_str(json).map_err(|e| SignalError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::NOT_CONFIGURED_SENTINEL;

    #[test]
    fn test_extract_from_json_fence() {
        let resp = "Sure.\n```json\n{\"signals\": []}\n```\nDone.";
        assert_eq!(extract_json_from_response(resp), Some("{\"signals\": []}"));
    }

    #[test]
    fn test_extract_from_generic_fence() {
        let resp = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json_from_response(resp), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_embedded_object_with_braces_in_strings() {
        let resp = r#"Result: {"summary": "uses {curly} braces \" here", "n": {"x": 1}} trailing"#;
        assert_eq!(
            extract_json_from_response(resp),
            Some(r#"{"summary": "uses {curly} braces \" here", "n": {"x": 1}}"#)
        );
    }

    #[test]
    fn test_extract_none_without_object() {
        assert_eq!(extract_json_from_response("no json here"), None);
        assert_eq!(extract_json_from_response("{ unterminated"), None);
    }

    #[test]
    fn test_parse_payload_and_weights() {
        let resp = r#"{"signals": [
            {"category": "Budget", "summary": "Approved", "strength": 0.8, "callIds": ["c1"]},
            {"category": "risk", "summary": "Legal", "strength": 1.7},
            {"category": "weather", "summary": "?", "strength": -2}
        ], "overallSummary": "Moving"}"#;

        let mut payload = parse_signal_payload(resp).unwrap();
        payload.apply_weights(&BuyingSignalConfig::default());

        assert_eq!(payload.signals[0].category, "budget");
        assert_eq!(payload.signals[0].call_ids, vec!["c1"]);
        assert_eq!(payload.signals[1].strength, 1.0);
        assert_eq!(payload.signals[2].strength, 0.0);
        // 0.8 * 1.0 + 1.0 * 0.5 + 0
        assert!((payload.weighted_score - 1.3).abs() < 1e-9);
        assert_eq!(payload.overall_summary.as_deref(), Some("Moving"));
        assert_eq!(payload.top_signal().map(|s| s.category.as_str()), Some("risk"));
    }

    #[test]
    fn test_parse_failure_is_no_signal() {
        let err = parse_signal_payload("I could not find anything.").unwrap_err();
        assert!(err.is_no_signal());

        let err = parse_signal_payload(r#"{"signals": "not a list"}"#).unwrap_err();
        assert!(err.is_no_signal());
    }

    #[test]
    fn test_sentinel_is_configuration_error() {
        let err = parse_signal_payload(NOT_CONFIGURED_SENTINEL).unwrap_err();
        assert!(matches!(err, SignalError::Configuration(_)));
    }
}
