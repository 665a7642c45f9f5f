//! Rate-limited client for the call-recording provider.
//!
//! Every request goes through the instance's `Pacer`. Listing endpoints use
//! cursor pagination; batch endpoints take at most `MAX_IDS_PER_REQUEST` ids per
//! request, dispatched sequentially. A failed batch chunk is logged and its ids
//! are simply absent from the result; the remaining chunks still run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;

use super::pacing::Pacer;
use super::transport::{GongTransport, HttpTransport, UnconfiguredTransport};
use super::wire;
use crate::config::GongConfig;
use crate::error::SignalError;
use crate::types::{CallRecord, EmailActivityRecord, Transcript};

/// Provider page size; a shorter page means the listing is exhausted.
pub const PAGE_SIZE: usize = 100;

/// Provider ceiling on ids per batch request.
pub const MAX_IDS_PER_REQUEST: usize = 100;

const CALLS_PATH: &str = "/calls";
const EXTENSIVE_PATH: &str = "/calls/extensive";
const TRANSCRIPT_PATH: &str = "/calls/transcript";
const EMAILS_PATH: &str = "/engage/emails";

/// Time window for listing endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFilter {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl CallFilter {
    pub fn trailing_days(days: i64, now: DateTime<Utc>) -> Self {
        Self {
            from: now - Duration::days(days),
            to: now,
        }
    }

    fn query(&self, cursor: Option<&str>) -> Vec<(String, String)> {
        let mut query = vec![
            (
                "fromDateTime".to_string(),
                self.from.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "toDateTime".to_string(),
                self.to.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor".to_string(), cursor.to_string()));
        }
        query
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallPage {
    pub records: Vec<CallRecord>,
    pub next_cursor: Option<String>,
}

type PageParser<T> = fn(Value) -> Result<(Vec<T>, Option<String>), SignalError>;
type BatchParser<T> = fn(Value) -> Result<Vec<(String, T)>, SignalError>;

pub struct GongClient {
    transport: Arc<dyn GongTransport>,
    pacer: Pacer,
}

impl GongClient {
    /// Build a client over HTTP. Without a usable key pair every request
    /// fails with `Configuration` instead.
    pub fn new(config: &GongConfig) -> Self {
        match HttpTransport::new(config) {
            Ok(transport) => Self::with_transport(Arc::new(transport)),
            Err(e) => {
                log::warn!("Gong: {}; call data unavailable", e);
                let reason = match e {
                    SignalError::Configuration(reason) => reason,
                    other => other.to_string(),
                };
                Self::with_transport(Arc::new(UnconfiguredTransport::new(reason)))
            }
        }
    }

    pub fn with_transport(transport: Arc<dyn GongTransport>) -> Self {
        Self {
            transport,
            pacer: Pacer::default(),
        }
    }

    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, SignalError> {
        self.pacer.acquire().await;
        self.transport.get(path, query).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, SignalError> {
        self.pacer.acquire().await;
        self.transport.post(path, body).await
    }

    /// One page of calls.
    pub async fn fetch_page(
        &self,
        filter: &CallFilter,
        cursor: Option<&str>,
    ) -> Result<CallPage, SignalError> {
        let body = self.get(CALLS_PATH, &filter.query(cursor)).await?;
        let (records, next_cursor) = wire::parse_calls_page(body)?;
        Ok(CallPage {
            records,
            next_cursor,
        })
    }

    /// All calls in the window, up to `max_items`.
    pub async fn list_calls(
        &self,
        filter: &CallFilter,
        max_items: Option<usize>,
    ) -> Result<Vec<CallRecord>, SignalError> {
        self.paginate(CALLS_PATH, filter, max_items, wire::parse_calls_page)
            .await
    }

    /// All email activity in the window, up to `max_items`.
    pub async fn list_emails(
        &self,
        filter: &CallFilter,
        max_items: Option<usize>,
    ) -> Result<Vec<EmailActivityRecord>, SignalError> {
        self.paginate(EMAILS_PATH, filter, max_items, wire::parse_emails_page)
            .await
    }

    /// List calls, then enrich them with participants, CRM cross-references
    /// and topics. A call whose detail chunk failed keeps its list record.
    pub async fn list_calls_detailed(
        &self,
        filter: &CallFilter,
        max_items: Option<usize>,
    ) -> Result<Vec<CallRecord>, SignalError> {
        let listed = self.list_calls(filter, max_items).await?;
        let ids: Vec<String> = listed.iter().map(|c| c.id.clone()).collect();
        let mut details = self.fetch_batch(&ids).await;

        let enriched = listed
            .into_iter()
            .map(|call| details.remove(&call.id).unwrap_or(call))
            .collect();
        Ok(enriched)
    }

    /// Detailed records for `ids`.
    pub async fn fetch_batch(&self, ids: &[String]) -> HashMap<String, CallRecord> {
        self.fetch_chunked(EXTENSIVE_PATH, ids, wire::extensive_request, wire::parse_extensive)
            .await
    }

    /// Transcripts for `ids`. Calls without a transcript are absent.
    pub async fn fetch_transcripts(&self, ids: &[String]) -> HashMap<String, Transcript> {
        self.fetch_chunked(
            TRANSCRIPT_PATH,
            ids,
            wire::transcript_request,
            wire::parse_transcripts,
        )
        .await
    }

    async fn paginate<T>(
        &self,
        path: &str,
        filter: &CallFilter,
        max_items: Option<usize>,
        parse: PageParser<T>,
    ) -> Result<Vec<T>, SignalError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let body = self.get(path, &filter.query(cursor.as_deref())).await?;
            let (page, next) = parse(body)?;
            pages += 1;

            let page_len = page.len();
            if page_len == 0 {
                break;
            }
            items.extend(page);

            if let Some(cap) = max_items {
                if items.len() >= cap {
                    items.truncate(cap);
                    break;
                }
            }
            if page_len < PAGE_SIZE {
                break;
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        log::info!(
            "Gong: {} returned {} items over {} page(s)",
            path,
            items.len(),
            pages
        );
        Ok(items)
    }

    async fn fetch_chunked<T>(
        &self,
        path: &str,
        ids: &[String],
        request: fn(&[String]) -> Value,
        parse: BatchParser<T>,
    ) -> HashMap<String, T> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let mut results = HashMap::new();
        for (index, chunk) in unique.chunks(MAX_IDS_PER_REQUEST).enumerate() {
            let outcome = match self.post(path, &request(chunk)).await {
                Ok(body) => parse(body),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(entries) => results.extend(entries),
                Err(e) => log::warn!(
                    "Gong: {} chunk {} ({} ids) failed: {}",
                    path,
                    index + 1,
                    chunk.len(),
                    e
                ),
            }
        }
        results
    }
}
