//! OpenAI-compatible chat completions over reqwest.
//!
//! Two endpoints: the analysis model, and a web-search-capable model for news
//! (e.g. Perplexity), which also returns source citations. Either side answers
//! with the not-configured sentinel when its key is missing.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{SearchAnswer, TextAnalyzer, NOT_CONFIGURED_SENTINEL};
use crate::config::AnalyzerConfig;
use crate::error::SignalError;

const SYSTEM_PROMPT: &str =
    "You are a B2B sales analyst. Respond only with the JSON object requested.";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

struct Endpoint {
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl Endpoint {
    /// Resolve the chat completions URL from the base URL.
    fn url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

pub struct HttpAnalyzer {
    client: reqwest::Client,
    analysis: Endpoint,
    search: Endpoint,
}

impl HttpAnalyzer {
    /// `search_api_key` is the news provider credential.
    pub fn new(
        config: &AnalyzerConfig,
        search_api_key: Option<String>,
    ) -> Result<Self, SignalError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| {
                SignalError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            analysis: Endpoint {
                base_url: config.base_url.clone(),
                model: config.model.clone(),
                api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            },
            search: Endpoint {
                base_url: config.search_base_url.clone(),
                model: config.search_model.clone(),
                api_key: search_api_key.filter(|k| !k.trim().is_empty()),
            },
        })
    }

    async fn complete(
        &self,
        endpoint: &Endpoint,
        api_key: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<ChatResponse, SignalError> {
        let body = json!({
            "model": endpoint.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": 0.2,
            "max_tokens": max_tokens,
        });

        let resp = self
            .client
            .post(endpoint.url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SignalError::transport(Some(status.as_u16()), text));
        }
        Ok(resp.json().await?)
    }

    fn content(resp: &ChatResponse) -> String {
        resp.choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextAnalyzer for HttpAnalyzer {
    async fn analyze(&self, prompt: &str, max_tokens: u32) -> Result<String, SignalError> {
        let Some(key) = self.analysis.api_key.as_deref() else {
            return Ok(NOT_CONFIGURED_SENTINEL.to_string());
        };
        let resp = self.complete(&self.analysis, key, prompt, max_tokens).await?;
        Ok(Self::content(&resp))
    }

    async fn search(&self, prompt: &str, max_tokens: u32) -> Result<SearchAnswer, SignalError> {
        let Some(key) = self.search.api_key.as_deref() else {
            return Ok(SearchAnswer::not_configured());
        };
        let resp = self.complete(&self.search, key, prompt, max_tokens).await?;
        Ok(SearchAnswer {
            text: Self::content(&resp),
            citations: resp.citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_keys_return_sentinel() {
        let analyzer = HttpAnalyzer::new(&AnalyzerConfig::default(), Some("  ".into())).unwrap();
        assert_eq!(
            analyzer.analyze("prompt", 100).await.unwrap(),
            NOT_CONFIGURED_SENTINEL
        );
        assert_eq!(
            analyzer.search("prompt", 100).await.unwrap(),
            SearchAnswer::not_configured()
        );
    }

    #[test]
    fn test_endpoint_url() {
        let endpoint = |base: &str| Endpoint {
            base_url: base.to_string(),
            model: "m".to_string(),
            api_key: None,
        };
        assert_eq!(
            endpoint("https://api.openai.com/v1/").url(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint("https://api.perplexity.ai").url(),
            "https://api.perplexity.ai/chat/completions"
        );
        assert_eq!(
            endpoint("http://localhost:1234/v1/chat/completions").url(),
            "http://localhost:1234/v1/chat/completions"
        );
    }

    #[test]
    fn test_chat_response_parsing() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": "{\"signals\": []}"}}],
            "citations": ["https://a.example", "https://b.example"]
        }"#;
        let resp: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(HttpAnalyzer::content(&resp), "{\"signals\": []}");
        assert_eq!(resp.citations.len(), 2);

        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert_eq!(HttpAnalyzer::content(&empty), "");
    }
}
