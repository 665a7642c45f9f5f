//! Provider response shapes and their conversion into domain types.
//!
//! Fields the pipeline doesn't use are ignored; everything optional on the
//! provider side is optional here so a sparse record still converts.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::SignalError;
use crate::types::{
    Affiliation, CallRecord, CrossReferences, EmailActivityRecord, Participant, SentenceSpan,
    Transcript, TranscriptSegment,
};

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageRecords {
    cursor: Option<String>,
}

/// Cursor may arrive top-level or nested under `records`.
fn next_cursor(top: Option<String>, records: Option<PageRecords>) -> Option<String> {
    top.or_else(|| records.and_then(|r| r.cursor))
        .filter(|c| !c.is_empty())
}

// =============================================================================
// Calls
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireParty {
    name: Option<String>,
    email_address: Option<String>,
    affiliation: Option<String>,
}

impl From<WireParty> for Participant {
    fn from(party: WireParty) -> Self {
        Participant {
            name: party.name,
            email: party.email_address,
            affiliation: Affiliation::from_label(party.affiliation.as_deref()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCallMeta {
    id: String,
    title: Option<String>,
    scheduled: Option<String>,
    started: Option<String>,
    duration: Option<f64>,
    direction: Option<String>,
    sentiment: Option<String>,
    #[serde(default)]
    parties: Vec<WireParty>,
}

impl WireCallMeta {
    fn into_record(self) -> CallRecord {
        CallRecord {
            id: self.id,
            title: self.title.unwrap_or_default(),
            scheduled: parse_timestamp(self.scheduled.as_deref()),
            started: parse_timestamp(self.started.as_deref()),
            duration_secs: self.duration.map(|d| d.max(0.0) as u64).unwrap_or(0),
            direction: self.direction,
            participants: self.parties.into_iter().map(Participant::from).collect(),
            cross_references: CrossReferences::default(),
            topics: Vec::new(),
            sentiment: self.sentiment,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallsResponse {
    #[serde(default)]
    calls: Vec<WireCallMeta>,
    cursor: Option<String>,
    records: Option<PageRecords>,
}

pub(crate) fn parse_calls_page(
    body: Value,
) -> Result<(Vec<CallRecord>, Option<String>), SignalError> {
    let resp: CallsResponse = serde_json::from_value(body)?;
    let cursor = next_cursor(resp.cursor, resp.records);
    let calls = resp.calls.into_iter().map(WireCallMeta::into_record).collect();
    Ok((calls, cursor))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireContextObject {
    object_type: Option<String>,
    object_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireContext {
    #[serde(default)]
    objects: Vec<WireContextObject>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTopic {
    name: Option<String>,
    duration: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireContent {
    #[serde(default)]
    topics: Vec<WireTopic>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireExtensiveCall {
    meta_data: WireCallMeta,
    #[serde(default)]
    parties: Vec<WireParty>,
    #[serde(default)]
    context: Vec<WireContext>,
    content: Option<WireContent>,
}

impl WireExtensiveCall {
    fn into_record(self) -> CallRecord {
        let mut record = self.meta_data.into_record();
        if !self.parties.is_empty() {
            record.participants = self.parties.into_iter().map(Participant::from).collect();
        }

        let mut refs = CrossReferences::default();
        for object in self.context.into_iter().flat_map(|c| c.objects) {
            let Some(id) = object.object_id.filter(|id| !id.is_empty()) else {
                continue;
            };
            let kind = object.object_type.as_deref().map(str::to_ascii_lowercase);
            let target = match kind.as_deref() {
                Some("opportunity") => &mut refs.opportunity_ids,
                Some("account") => &mut refs.account_ids,
                Some("contact") | Some("lead") => &mut refs.contact_ids,
                _ => continue,
            };
            if !target.contains(&id) {
                target.push(id);
            }
        }
        record.cross_references = refs;

        // Topics the call actually spent time on.
        record.topics = self
            .content
            .map(|c| c.topics)
            .unwrap_or_default()
            .into_iter()
            .filter(|t| t.duration.map_or(true, |d| d > 0.0))
            .filter_map(|t| t.name)
            .collect();
        record
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtensiveResponse {
    #[serde(default)]
    calls: Vec<WireExtensiveCall>,
}

pub(crate) fn extensive_request(ids: &[String]) -> Value {
    json!({
        "filter": { "callIds": ids },
        "contentSelector": {
            "context": "Extended",
            "exposedFields": {
                "parties": true,
                "content": { "topics": true }
            }
        }
    })
}

pub(crate) fn parse_extensive(body: Value) -> Result<Vec<(String, CallRecord)>, SignalError> {
    let resp: ExtensiveResponse = serde_json::from_value(body)?;
    Ok(resp
        .calls
        .into_iter()
        .map(|c| {
            let record = c.into_record();
            (record.id.clone(), record)
        })
        .collect())
}

// =============================================================================
// Transcripts
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSentence {
    start: Option<u64>,
    end: Option<u64>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSegment {
    speaker_id: Option<String>,
    topic: Option<String>,
    #[serde(default)]
    sentences: Vec<WireSentence>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCallTranscript {
    call_id: String,
    #[serde(default)]
    transcript: Vec<WireSegment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptResponse {
    #[serde(default)]
    call_transcripts: Vec<WireCallTranscript>,
}

pub(crate) fn transcript_request(ids: &[String]) -> Value {
    json!({ "filter": { "callIds": ids } })
}

pub(crate) fn parse_transcripts(body: Value) -> Result<Vec<(String, Transcript)>, SignalError> {
    let resp: TranscriptResponse = serde_json::from_value(body)?;
    Ok(resp
        .call_transcripts
        .into_iter()
        .map(|t| {
            let segments = t
                .transcript
                .into_iter()
                .map(|seg| TranscriptSegment {
                    speaker_id: seg.speaker_id,
                    topic: seg.topic,
                    sentences: seg
                        .sentences
                        .into_iter()
                        .map(|s| SentenceSpan {
                            start: s.start.unwrap_or(0),
                            end: s.end.unwrap_or(0),
                            text: s.text,
                        })
                        .collect(),
                })
                .collect();
            (
                t.call_id.clone(),
                Transcript {
                    call_id: t.call_id,
                    segments,
                },
            )
        })
        .collect())
}

// =============================================================================
// Email activity
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEmail {
    id: String,
    subject: Option<String>,
    from: Option<String>,
    #[serde(default)]
    to: Vec<String>,
    sent_at: Option<String>,
    #[serde(default)]
    opened: bool,
    #[serde(default)]
    clicked: bool,
    #[serde(default)]
    replied: bool,
    account_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailsResponse {
    #[serde(default)]
    emails: Vec<WireEmail>,
    cursor: Option<String>,
    records: Option<PageRecords>,
}

pub(crate) fn parse_emails_page(
    body: Value,
) -> Result<(Vec<EmailActivityRecord>, Option<String>), SignalError> {
    let resp: EmailsResponse = serde_json::from_value(body)?;
    let cursor = next_cursor(resp.cursor, resp.records);
    let emails = resp
        .emails
        .into_iter()
        .map(|e| EmailActivityRecord {
            id: e.id,
            subject: e.subject.unwrap_or_default(),
            sender: e.from,
            recipients: e.to,
            sent_at: parse_timestamp(e.sent_at.as_deref()),
            opened: e.opened,
            clicked: e.clicked,
            replied: e.replied,
            account_id: e.account_id,
        })
        .collect();
    Ok((emails, cursor))
}
