//! Generative-text collaborator used to turn call evidence and web search
//! results into structured buying signals.
//!
//! An analyzer without credentials doesn't fail; it answers with
//! `NOT_CONFIGURED_SENTINEL`. Callers check for it before parsing and turn it
//! into a `Configuration` error.

pub mod http;
pub mod parse;
pub mod prompts;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SignalError;

pub use http::HttpAnalyzer;
pub use parse::{extract_json_from_response, parse_signal_payload, BuyingSignal, SignalPayload};

/// Returned in place of analysis text when the analyzer has no credentials.
pub const NOT_CONFIGURED_SENTINEL: &str = "__ANALYZER_NOT_CONFIGURED__";

/// Answer from a web-search-capable model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchAnswer {
    pub text: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

impl SearchAnswer {
    pub fn not_configured() -> Self {
        Self {
            text: NOT_CONFIGURED_SENTINEL.to_string(),
            citations: Vec::new(),
        }
    }
}

#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn analyze(&self, prompt: &str, max_tokens: u32) -> Result<String, SignalError>;

    async fn search(&self, prompt: &str, max_tokens: u32) -> Result<SearchAnswer, SignalError>;
}

pub fn is_not_configured(text: &str) -> bool {
    text.trim() == NOT_CONFIGURED_SENTINEL
}

/// `Configuration` error if `text` is the sentinel.
pub fn ensure_configured(text: &str, what: &str) -> Result<(), SignalError> {
    if is_not_configured(text) {
        return Err(SignalError::Configuration(format!(
            "{} is not configured",
            what
        )));
    }
    Ok(())
}
