//! Call-derived signal derivation and the on-demand single-entity pipeline.
//!
//! `derive_call_signal` turns a set of calls (plus transcripts and email
//! engagement) into one call-derived `NewSignal`. `CallPipeline` wraps the
//! full fetch → resolve → rank → transcript → analyze → store path for one
//! scope, used when a lookup finds nothing fresh in the store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::analysis::prompts::build_call_signal_prompt;
use crate::analysis::{parse_signal_payload, TextAnalyzer};
use crate::config::{BuyingSignalConfig, ConfigStore};
use crate::db::{NewSignal, SharedDb, SignalSource, StoredSignal};
use crate::error::SignalError;
use crate::gong::{CallFilter, GongClient};
use crate::ranking;
use crate::scope::{self, Scope};
use crate::types::{CallRecord, EmailEngagement, Transcript};

/// Email activity considered for engagement summaries.
pub const EMAIL_WINDOW_DAYS: i64 = 30;

/// Email records fetched per engagement summary.
pub const EMAIL_FETCH_CAP: usize = 500;

/// Everything known about one entity's calls.
pub struct CallEvidence<'a> {
    pub account_id: &'a str,
    pub opportunity_id: Option<&'a str>,
    /// Human-readable name used in the prompt.
    pub label: &'a str,
    pub calls: &'a [CallRecord],
    pub transcripts: &'a HashMap<String, Transcript>,
    pub engagement: Option<EmailEngagement>,
}

pub async fn derive_call_signal(
    analyzer: &dyn TextAnalyzer,
    config: &BuyingSignalConfig,
    max_tokens: u32,
    evidence: &CallEvidence<'_>,
) -> Result<NewSignal, SignalError> {
    if evidence.calls.is_empty() {
        return Err(SignalError::Parse("no calls to analyze".to_string()));
    }

    let categories: Vec<String> = config.category_weights.keys().cloned().collect();
    let prompt = build_call_signal_prompt(
        evidence.label,
        evidence.calls,
        evidence.transcripts,
        evidence.engagement.as_ref(),
        &categories,
    );

    let response = analyzer.analyze(&prompt, max_tokens).await?;
    let mut payload = parse_signal_payload(&response)?;
    payload.apply_weights(config);
    payload.analyzed_call_ids = evidence.calls.iter().map(|c| c.id.clone()).collect();
    payload.generated_at = Some(Utc::now());

    Ok(NewSignal {
        account_id: evidence.account_id.to_string(),
        opportunity_id: evidence.opportunity_id.map(String::from),
        source: SignalSource::CallDerived,
        payload: serde_json::to_value(&payload)?,
        expires_at: None,
    })
}

/// Most frequent account cross-reference across `calls`; ties go to the
/// first seen.
pub fn dominant_account(calls: &[CallRecord]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for id in calls.iter().flat_map(|c| c.cross_references.account_ids.iter()) {
        match counts.iter_mut().find(|(seen, _)| *seen == id.as_str()) {
            Some((_, n)) => *n += 1,
            None => counts.push((id.as_str(), 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (id, n) in counts {
        if best.is_none_or(|(_, top)| n > top) {
            best = Some((id, n));
        }
    }
    best.map(|(id, _)| id.to_string())
}

pub struct CallPipeline {
    client: Arc<GongClient>,
    analyzer: Arc<dyn TextAnalyzer>,
    db: SharedDb,
    config: Arc<ConfigStore>,
    max_tokens: u32,
}

impl CallPipeline {
    pub fn new(
        client: Arc<GongClient>,
        analyzer: Arc<dyn TextAnalyzer>,
        db: SharedDb,
        config: Arc<ConfigStore>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            analyzer,
            db,
            config,
            max_tokens,
        }
    }

    /// Email engagement for one account, or `None` when it can't be fetched.
    pub async fn email_engagement(
        client: &GongClient,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Option<EmailEngagement> {
        let filter = CallFilter::trailing_days(EMAIL_WINDOW_DAYS, now);
        match client.list_emails(&filter, Some(EMAIL_FETCH_CAP)).await {
            Ok(emails) => Some(EmailEngagement::for_account(&emails, account_id)),
            Err(e) => {
                log::warn!("Pipeline: email activity unavailable: {}", e);
                None
            }
        }
    }

    /// Derive and store a fresh call-derived signal for `scope`, returning the
    /// scope's fresh signals. An empty result means nothing could be derived.
    pub async fn run_for_scope(
        &self,
        scope: &Scope,
        query: Option<&str>,
    ) -> Result<Vec<StoredSignal>, SignalError> {
        let cfg = self.config.get_buying_signal_config();
        let now = Utc::now();

        let filter = CallFilter::trailing_days(cfg.lookup_window_days, now);
        let candidates = self
            .client
            .list_calls_detailed(&filter, Some(cfg.lookup_max_calls))
            .await?;

        let resolution = scope::resolve_with_method(&candidates, scope);
        let Some(method) = resolution.method else {
            log::info!(
                "Pipeline: no calls matched scope {:?} among {} candidates",
                scope,
                candidates.len()
            );
            return Ok(Vec::new());
        };

        let query = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(String::from)
            .unwrap_or_else(|| cfg.default_query());
        let selected = ranking::select_top_at(&resolution.calls, &query, cfg.lookup_top_k, now);
        log::info!(
            "Pipeline: {} calls matched via {}, {} selected",
            resolution.calls.len(),
            method.as_str(),
            selected.len()
        );

        let Some(account_id) = scope
            .account_id
            .clone()
            .or_else(|| dominant_account(&selected))
        else {
            log::warn!("Pipeline: no account id known for scope {:?}, skipping", scope);
            return Ok(Vec::new());
        };

        let ids: Vec<String> = selected.iter().map(|c| c.id.clone()).collect();
        let transcripts = self.client.fetch_transcripts(&ids).await;
        let engagement = Self::email_engagement(&self.client, &account_id, now).await;

        let label = scope
            .display_name()
            .or(scope.opportunity_id.as_deref())
            .unwrap_or(&account_id)
            .to_string();
        let evidence = CallEvidence {
            account_id: &account_id,
            opportunity_id: scope.opportunity_id.as_deref(),
            label: &label,
            calls: &selected,
            transcripts: &transcripts,
            engagement,
        };

        let derived =
            derive_call_signal(self.analyzer.as_ref(), &cfg, self.max_tokens, &evidence).await;
        let signal = match derived {
            Ok(signal) => signal,
            Err(e) if e.is_no_signal() => {
                log::info!("Pipeline: no signal for {}: {}", label, e);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let db = self.db.lock();
        db.upsert_signals(&[signal])?;
        let stored = match &scope.opportunity_id {
            Some(opp) => db.get_signals_by_opportunity_ids(std::slice::from_ref(opp))?,
            None => db.get_signals_by_account_ids(std::slice::from_ref(&account_id))?,
        };
        Ok(stored)
    }
}
