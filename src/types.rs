//! Call-recording domain types shared by the client, resolver, ranker and
//! signal derivation. Everything here is immutable once fetched and lives for
//! one pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the deal a call participant is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affiliation {
    Internal,
    External,
    #[default]
    Unknown,
}

impl Affiliation {
    /// Map the provider's free-form affiliation label.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(|l| l.to_ascii_lowercase()).as_deref() {
            Some("internal") => Affiliation::Internal,
            Some("external") => Affiliation::External,
            _ => Affiliation::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub name: Option<String>,
    pub email: Option<String>,
    pub affiliation: Affiliation,
}

/// Upstream links from a call to CRM records. Frequently incomplete: a call
/// about an opportunity may only carry its parent account, or nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossReferences {
    #[serde(default)]
    pub opportunity_ids: Vec<String>,
    #[serde(default)]
    pub account_ids: Vec<String>,
    #[serde(default)]
    pub contact_ids: Vec<String>,
}

impl CrossReferences {
    pub fn is_empty(&self) -> bool {
        self.opportunity_ids.is_empty()
            && self.account_ids.is_empty()
            && self.contact_ids.is_empty()
    }

    pub fn has_opportunity(&self, opportunity_id: &str) -> bool {
        self.opportunity_ids.iter().any(|id| id == opportunity_id)
    }

    pub fn has_account(&self, account_id: &str) -> bool {
        self.account_ids.iter().any(|id| id == account_id)
    }
}

/// A recorded call as returned by the call-recording provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: String,
    pub title: String,
    pub scheduled: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub duration_secs: u64,
    pub direction: Option<String>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub cross_references: CrossReferences,
    #[serde(default)]
    pub topics: Vec<String>,
    pub sentiment: Option<String>,
}

impl CallRecord {
    /// Best known time the call happened: actual start, else scheduled start.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.started.or(self.scheduled)
    }

    /// Lowercased participant names and emails joined with spaces.
    pub fn participant_text(&self) -> String {
        self.participants
            .iter()
            .flat_map(|p| [p.name.as_deref(), p.email.as_deref()])
            .flatten()
            .map(|s| s.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One sentence of a transcript, offsets in milliseconds from call start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentenceSpan {
    pub start: u64,
    pub end: u64,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub speaker_id: Option<String>,
    pub topic: Option<String>,
    #[serde(default)]
    pub sentences: Vec<SentenceSpan>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub call_id: String,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    /// Flatten to `speaker: text` lines, truncated at `max_chars` on a line
    /// boundary.
    pub fn plain_text(&self, max_chars: usize) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            let speaker = segment.speaker_id.as_deref().unwrap_or("speaker");
            let text = segment
                .sentences
                .iter()
                .map(|s| s.text.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                continue;
            }
            let line = format!("{}: {}\n", speaker, text);
            if out.len() + line.len() > max_chars {
                // A single turn longer than the budget is cut mid-line.
                if out.is_empty() {
                    let mut end = max_chars;
                    while !line.is_char_boundary(end) {
                        end -= 1;
                    }
                    out.push_str(&line[..end]);
                }
                break;
            }
            out.push_str(&line);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.sentences.is_empty())
    }
}

/// An outbound sales email and its engagement flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailActivityRecord {
    pub id: String,
    pub subject: String,
    pub sender: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened: bool,
    pub clicked: bool,
    pub replied: bool,
    pub account_id: Option<String>,
}

/// Aggregate engagement over a set of email activity records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailEngagement {
    pub sent: u32,
    pub opened: u32,
    pub clicked: u32,
    pub replied: u32,
}

impl EmailEngagement {
    /// Summarize the emails that belong to `account_id`.
    pub fn for_account(emails: &[EmailActivityRecord], account_id: &str) -> Self {
        emails
            .iter()
            .filter(|e| e.account_id.as_deref() == Some(account_id))
            .fold(Self::default(), |mut acc, e| {
                acc.sent += 1;
                acc.opened += u32::from(e.opened);
                acc.clicked += u32::from(e.clicked);
                acc.replied += u32::from(e.replied);
                acc
            })
    }
}
