//! News-derived signals: a web search about one account, analyzed into the
//! same payload shape as call-derived signals with source citations attached.

use chrono::Utc;

use crate::analysis::prompts::build_news_signal_prompt;
use crate::analysis::{ensure_configured, parse_signal_payload, TextAnalyzer};
use crate::config::BuyingSignalConfig;
use crate::db::{AccountNameCacheEntry, NewSignal, SignalSource};
use crate::error::SignalError;

pub async fn derive_news_signal(
    analyzer: &dyn TextAnalyzer,
    config: &BuyingSignalConfig,
    max_tokens: u32,
    account: &AccountNameCacheEntry,
) -> Result<NewSignal, SignalError> {
    let categories: Vec<String> = config.category_weights.keys().cloned().collect();
    let prompt = build_news_signal_prompt(&account.account_name, &categories);

    let answer = analyzer.search(&prompt, max_tokens).await?;
    ensure_configured(&answer.text, "News search provider")?;

    let mut payload = parse_signal_payload(&answer.text)?;
    payload.apply_weights(config);
    for citation in answer.citations {
        if !payload.citations.contains(&citation) {
            payload.citations.push(citation);
        }
    }
    payload.generated_at = Some(Utc::now());

    Ok(NewSignal {
        account_id: account.account_id.clone(),
        opportunity_id: None,
        source: SignalSource::NewsDerived,
        payload: serde_json::to_value(&payload)?,
        expires_at: None,
    })
}
