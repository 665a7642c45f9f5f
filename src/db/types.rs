use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Errors from the signal store.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Invalid signal payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Where a signal was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalSource {
    #[serde(rename = "call-derived")]
    CallDerived,
    #[serde(rename = "news-derived")]
    NewsDerived,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::CallDerived => "call-derived",
            SignalSource::NewsDerived => "news-derived",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call-derived" => Ok(SignalSource::CallDerived),
            "news-derived" => Ok(SignalSource::NewsDerived),
            other => Err(format!("unknown signal source '{}'", other)),
        }
    }
}

/// A signal about to be written. `expires_at: None` gets the default TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSignal {
    pub account_id: String,
    pub opportunity_id: Option<String>,
    pub source: SignalSource,
    pub payload: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewSignal {
    /// Logical identity used for the store's uniqueness constraint.
    ///
    /// Call-derived signals are unique per opportunity (per account when the
    /// signal has no opportunity); news-derived signals per account.
    pub fn entity_key(&self) -> String {
        match (self.source, self.opportunity_id.as_deref()) {
            (SignalSource::CallDerived, Some(opp)) => format!("opp:{}", opp),
            _ => format!("acc:{}", self.account_id),
        }
    }
}

/// A row from the `buying_signals` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSignal {
    pub id: i64,
    pub account_id: String,
    pub opportunity_id: Option<String>,
    pub source: SignalSource,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
impl StoredSignal {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// A row from the `account_name_cache` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountNameCacheEntry {
    pub account_id: String,
    pub account_name: String,
    pub owner_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Fixed-width RFC 3339 (millisecond precision, `Z` suffix) so stored
/// timestamps order correctly as text.
pub(crate) fn to_db_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn timestamp_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

pub(crate) fn optional_timestamp_column(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_timestamp(idx, &r)).transpose()
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
