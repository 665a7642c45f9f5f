//! Nightly batch: sweep expired signals, derive call signals for recently
//! active opportunities, then news signals for known accounts.
//!
//! Failures are isolated at two levels. A phase that cannot start records one
//! `"<phase> phase: <error>"` entry and the next phase still runs; an item
//! that fails inside a phase records its own entry and the loop moves on.
//! Analysis output that doesn't parse means "no signal" and is not an error.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::analysis::TextAnalyzer;
use crate::config::{BuyingSignalConfig, ConfigStore};
use crate::db::SharedDb;
use crate::error::SignalError;
use crate::gong::{CallFilter, GongClient};
use crate::news::derive_news_signal;
use crate::pipeline::{derive_call_signal, dominant_account, CallEvidence, EMAIL_WINDOW_DAYS};
use crate::types::{CallRecord, EmailActivityRecord, EmailEngagement};

/// Call activity window for the nightly run.
pub const CALL_WINDOW_DAYS: i64 = 30;

/// Calls (and email records) fetched per run.
pub const CALL_FETCH_CAP: usize = 2_000;

/// Most recent calls analyzed per opportunity.
pub const CALLS_PER_OPPORTUNITY: usize = 5;

/// Pause between news searches.
pub const NEWS_ACCOUNT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRunResult {
    pub run_id: String,
    pub ran_at: DateTime<Utc>,
    pub swept: usize,
    pub call_signals: usize,
    pub news_signals: usize,
    pub errors: Vec<String>,
    pub skipped: bool,
    pub cancelled: bool,
}

impl BatchRunResult {
    fn new(ran_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            ran_at,
            swept: 0,
            call_signals: 0,
            news_signals: 0,
            errors: Vec::new(),
            skipped: false,
            cancelled: false,
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.skipped {
            RunStatus::Skipped
        } else if self.errors.is_empty() && !self.cancelled {
            RunStatus::Success
        } else {
            RunStatus::Partial
        }
    }
}

/// One opportunity's most recent calls.
#[derive(Debug, Clone)]
pub struct OpportunityCalls {
    pub opportunity_id: String,
    pub calls: Vec<CallRecord>,
}

/// Group calls by opportunity cross-reference (a call linked to several
/// opportunities lands in each), keep the `max_opportunities` most recently
/// active and each one's `per_opportunity` most recent calls.
pub fn group_by_opportunity(
    calls: &[CallRecord],
    max_opportunities: usize,
    per_opportunity: usize,
) -> Vec<OpportunityCalls> {
    let mut groups: BTreeMap<&str, Vec<&CallRecord>> = BTreeMap::new();
    for call in calls {
        for opp in &call.cross_references.opportunity_ids {
            groups.entry(opp.as_str()).or_default().push(call);
        }
    }

    let mut grouped: Vec<OpportunityCalls> = groups
        .into_iter()
        .map(|(opp, mut calls)| {
            calls.sort_by(|a, b| b.occurred_at().cmp(&a.occurred_at()));
            OpportunityCalls {
                opportunity_id: opp.to_string(),
                calls: calls.into_iter().take(per_opportunity).cloned().collect(),
            }
        })
        .collect();

    // BTreeMap order breaks ties by id
    grouped.sort_by(|a, b| last_active(b).cmp(&last_active(a)));
    grouped.truncate(max_opportunities);
    grouped
}

fn last_active(group: &OpportunityCalls) -> Option<DateTime<Utc>> {
    group.calls.iter().filter_map(CallRecord::occurred_at).max()
}

pub struct SignalOrchestrator {
    client: Arc<GongClient>,
    analyzer: Arc<dyn TextAnalyzer>,
    db: SharedDb,
    config: Arc<ConfigStore>,
    max_tokens: u32,
    news_delay: Duration,
    cancelled: AtomicBool,
}

impl SignalOrchestrator {
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
            news_delay: NEWS_ACCOUNT_DELAY,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn with_news_delay(mut self, delay: Duration) -> Self {
        self.news_delay = delay;
        self
    }

    /// Ask the run in progress to stop at the next phase or item boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self, result: &mut BatchRunResult) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            result.cancelled = true;
        }
        result.cancelled
    }

    pub async fn run_nightly(&self) -> BatchRunResult {
        self.cancelled.store(false, Ordering::SeqCst);
        let cfg = self.config.get_buying_signal_config();
        let mut result = BatchRunResult::new(Utc::now());

        if !cfg.enabled {
            log::info!("Signals: batch run skipped, buying signals disabled");
            result.skipped = true;
            return result;
        }

        log::info!("Signals: batch run {} starting", result.run_id);

        match self.db.lock().sweep_expired() {
            Ok(n) => result.swept = n,
            Err(e) => result.errors.push(format!("sweep phase: {}", e)),
        }

        if !self.check_cancelled(&mut result) {
            if let Err(e) = self.run_call_phase(&cfg, &mut result).await {
                log::warn!("Signals: call phase failed: {}", e);
                result.errors.push(format!("call phase: {}", e));
            }
        }

        if !self.check_cancelled(&mut result) {
            if let Err(e) = self.run_news_phase(&cfg, &mut result).await {
                log::warn!("Signals: news phase failed: {}", e);
                result.errors.push(format!("news phase: {}", e));
            }
        }

        let status = result.status();
        log::info!(
            "Signals: batch run {} {} ({} call, {} news, {} swept, {} errors{})",
            result.run_id,
            status.as_str(),
            result.call_signals,
            result.news_signals,
            result.swept,
            result.errors.len(),
            if result.cancelled { ", cancelled" } else { "" }
        );

        if let Err(e) = self.config.record_run_status(result.ran_at, status.as_str()) {
            log::warn!("Signals: failed to record run status: {}", e);
        }
        result
    }

    async fn run_call_phase(
        &self,
        cfg: &BuyingSignalConfig,
        result: &mut BatchRunResult,
    ) -> Result<(), SignalError> {
        let filter = CallFilter::trailing_days(CALL_WINDOW_DAYS, result.ran_at);
        let calls = self
            .client
            .list_calls_detailed(&filter, Some(CALL_FETCH_CAP))
            .await?;

        let opportunities =
            group_by_opportunity(&calls, cfg.max_entities_per_run, CALLS_PER_OPPORTUNITY);
        log::info!(
            "Signals: {} calls, {} opportunities to analyze",
            calls.len(),
            opportunities.len()
        );
        if opportunities.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = opportunities
            .iter()
            .flat_map(|o| o.calls.iter().map(|c| c.id.clone()))
            .collect();
        let transcripts = self.client.fetch_transcripts(&ids).await;
        let emails = self.fetch_emails(result.ran_at).await;

        for opp in &opportunities {
            if self.check_cancelled(result) {
                break;
            }

            let Some(account_id) = dominant_account(&opp.calls) else {
                result.errors.push(format!(
                    "opportunity {}: no account cross-reference",
                    opp.opportunity_id
                ));
                continue;
            };

            let label = match self.db.lock().get_account_name(&account_id) {
                Ok(Some(name)) => format!("{} ({})", name, opp.opportunity_id),
                _ => opp.opportunity_id.clone(),
            };
            let evidence = CallEvidence {
                account_id: &account_id,
                opportunity_id: Some(&opp.opportunity_id),
                label: &label,
                calls: &opp.calls,
                transcripts: &transcripts,
                engagement: emails
                    .as_deref()
                    .map(|e| EmailEngagement::for_account(e, &account_id)),
            };

            let derived =
                derive_call_signal(self.analyzer.as_ref(), cfg, self.max_tokens, &evidence).await;
            match derived {
                Ok(signal) => match self.db.lock().upsert_signals(&[signal]) {
                    Ok(_) => result.call_signals += 1,
                    Err(e) => result
                        .errors
                        .push(format!("opportunity {}: {}", opp.opportunity_id, e)),
                },
                Err(e) if e.is_no_signal() => {
                    log::info!("Signals: no signal for opportunity {}: {}", opp.opportunity_id, e)
                }
                // Every remaining item would fail the same way
                Err(e @ SignalError::Configuration(_)) => return Err(e),
                Err(e) => {
                    log::warn!("Signals: opportunity {} failed: {}", opp.opportunity_id, e);
                    result
                        .errors
                        .push(format!("opportunity {}: {}", opp.opportunity_id, e));
                }
            }
        }
        Ok(())
    }

    async fn fetch_emails(&self, now: DateTime<Utc>) -> Option<Vec<EmailActivityRecord>> {
        let filter = CallFilter::trailing_days(EMAIL_WINDOW_DAYS, now);
        match self.client.list_emails(&filter, Some(CALL_FETCH_CAP)).await {
            Ok(emails) => Some(emails),
            Err(e) => {
                log::warn!("Signals: email activity unavailable: {}", e);
                None
            }
        }
    }

    async fn run_news_phase(
        &self,
        cfg: &BuyingSignalConfig,
        result: &mut BatchRunResult,
    ) -> Result<(), SignalError> {
        if cfg.provider_key().is_none() {
            return Err(SignalError::Configuration(
                "news provider API key is not configured".to_string(),
            ));
        }

        let accounts = self.db.lock().list_known_accounts(cfg.max_entities_per_run)?;
        log::info!("Signals: {} accounts for news", accounts.len());

        for (i, account) in accounts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.news_delay).await;
            }
            if self.check_cancelled(result) {
                break;
            }

            match derive_news_signal(self.analyzer.as_ref(), cfg, self.max_tokens, account).await {
                Ok(signal) => match self.db.lock().upsert_signals(&[signal]) {
                    Ok(_) => result.news_signals += 1,
                    Err(e) => result
                        .errors
                        .push(format!("account {}: {}", account.account_id, e)),
                },
                Err(e) if e.is_no_signal() => {
                    log::info!("Signals: no news signal for {}: {}", account.account_name, e)
                }
                Err(e @ SignalError::Configuration(_)) => return Err(e),
                Err(e) => {
                    log::warn!("Signals: news for {} failed: {}", account.account_name, e);
                    result
                        .errors
                        .push(format!("account {}: {}", account.account_id, e));
                }
            }
        }
        Ok(())
    }
}
