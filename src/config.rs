//! Configuration stored in `~/.dealsignal/config.json`.
//!
//! Every field has a serde default so a partial (or absent) file still loads.
//! `ConfigStore` is the only writer; it rewrites the whole file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::SignalError;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "DEALSIGNAL_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    #[serde(default)]
    pub gong: GongConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub buying_signals: BuyingSignalConfig,
}

/// Call-recording provider credentials. The access key pair is sent as
/// HTTP basic auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GongConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_secret: Option<String>,
    #[serde(default = "default_gong_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gong_base_url() -> String {
    "https://api.gong.io/v2".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for GongConfig {
    fn default() -> Self {
        Self {
            access_key: None,
            access_key_secret: None,
            base_url: default_gong_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl GongConfig {
    /// Both halves of the credential pair, if present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let key = self.access_key.as_deref().filter(|k| !k.trim().is_empty())?;
        let secret = self
            .access_key_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())?;
        Some((key, secret))
    }
}

/// Generative-text endpoint settings. `search*` fields point at the
/// web-search-capable model used for news.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerConfig {
    #[serde(default = "default_analyzer_base_url")]
    pub base_url: String,
    #[serde(default = "default_analyzer_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_search_base_url")]
    pub search_base_url: String,
    #[serde(default = "default_search_model")]
    pub search_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_analyzer_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_analyzer_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_analyzer_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_search_base_url() -> String {
    "https://api.perplexity.ai".to_string()
}

fn default_search_model() -> String {
    "sonar".to_string()
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_analyzer_timeout_secs() -> u64 {
    120
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            base_url: default_analyzer_base_url(),
            model: default_analyzer_model(),
            api_key: None,
            search_base_url: default_search_base_url(),
            search_model: default_search_model(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_analyzer_timeout_secs(),
        }
    }
}

/// Buying-signal pipeline settings plus the last run's status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyingSignalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_schedule_expression")]
    pub schedule_expression: String,
    #[serde(default = "default_schedule_timezone")]
    pub schedule_timezone: String,
    #[serde(default = "default_max_entities_per_run")]
    pub max_entities_per_run: usize,
    #[serde(default = "default_category_weights")]
    pub category_weights: BTreeMap<String, f64>,
    /// Credential for the news/search provider. The news phase is skipped
    /// (with a recorded error) when this is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<String>,
    #[serde(default = "default_lookup_window_days")]
    pub lookup_window_days: i64,
    #[serde(default = "default_lookup_max_calls")]
    pub lookup_max_calls: usize,
    #[serde(default = "default_lookup_top_k")]
    pub lookup_top_k: usize,
}

fn default_schedule_expression() -> String {
    crate::scheduler::DEFAULT_SCHEDULE.to_string()
}

fn default_schedule_timezone() -> String {
    "UTC".to_string()
}

fn default_max_entities_per_run() -> usize {
    50
}

fn default_category_weights() -> BTreeMap<String, f64> {
    [
        ("budget", 1.0),
        ("timeline", 0.9),
        ("pricing", 0.9),
        ("renewal", 0.8),
        ("expansion", 0.8),
        ("champion", 0.7),
        ("competition", 0.6),
        ("risk", 0.5),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn default_lookup_window_days() -> i64 {
    730
}

fn default_lookup_max_calls() -> usize {
    2000
}

fn default_lookup_top_k() -> usize {
    15
}

impl Default for BuyingSignalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule_expression: default_schedule_expression(),
            schedule_timezone: default_schedule_timezone(),
            max_entities_per_run: default_max_entities_per_run(),
            category_weights: default_category_weights(),
            provider_api_key: None,
            last_run_at: None,
            last_run_status: None,
            lookup_window_days: default_lookup_window_days(),
            lookup_max_calls: default_lookup_max_calls(),
            lookup_top_k: default_lookup_top_k(),
        }
    }
}

impl BuyingSignalConfig {
    /// Weight for a signal category; unknown categories count at 0.5.
    pub fn weight_for(&self, category: &str) -> f64 {
        self.category_weights
            .get(&category.to_lowercase())
            .copied()
            .unwrap_or(0.5)
    }

    /// Default ranking query: every configured category name.
    pub fn default_query(&self) -> String {
        self.category_weights
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn provider_key(&self) -> Option<&str> {
        self.provider_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
    }
}

/// File-backed configuration collaborator.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Config>,
}

impl ConfigStore {
    /// Load from `path`. A missing file yields defaults; a malformed one is an
    /// error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SignalError> {
        let path = path.into();
        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            log::info!(
                "Config: {} not found, using defaults",
                path.display()
            );
            Config::default()
        };
        Ok(Self {
            path,
            current: RwLock::new(config),
        })
    }

    /// `$DEALSIGNAL_CONFIG`, else `~/.dealsignal/config.json`.
    pub fn default_path() -> Result<PathBuf, SignalError> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            if !explicit.trim().is_empty() {
                return Ok(PathBuf::from(explicit));
            }
        }
        let home = dirs::home_dir()
            .ok_or_else(|| SignalError::Configuration("Could not find home directory".into()))?;
        Ok(home.join(".dealsignal").join("config.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> Config {
        self.current.read().clone()
    }

    pub fn get_buying_signal_config(&self) -> BuyingSignalConfig {
        self.current.read().buying_signals.clone()
    }

    pub fn set_buying_signal_config(&self, update: BuyingSignalConfig) -> Result<(), SignalError> {
        let mut next = self.config();
        next.buying_signals = update;
        self.save(next)
    }

    /// Write back the outcome of a batch run.
    pub fn record_run_status(
        &self,
        ran_at: DateTime<Utc>,
        status: &str,
    ) -> Result<(), SignalError> {
        let mut next = self.config();
        next.buying_signals.last_run_at = Some(ran_at);
        next.buying_signals.last_run_status = Some(status.to_string());
        self.save(next)
    }

    /// Persist first, then swap the in-memory copy, so a failed write leaves
    /// both unchanged.
    fn save(&self, next: Config) -> Result<(), SignalError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&next)?;
        std::fs::write(&self.path, content)?;
        *self.current.write() = next;
        Ok(())
    }
}

#[cfg(test)]
pub mod test_utils {
    use std::sync::Arc;

    use super::{BuyingSignalConfig, ConfigStore};

    /// Config store in a leaked temp dir, with buying-signal settings
    /// adjusted by `adjust`.
    pub fn test_config_store(adjust: impl FnOnce(&mut BuyingSignalConfig)) -> Arc<ConfigStore> {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");
        std::mem::forget(dir);
        let store = ConfigStore::open(path).expect("Failed to open config store");
        let mut cfg = store.get_buying_signal_config();
        adjust(&mut cfg);
        store
            .set_buying_signal_config(cfg)
            .expect("Failed to write test config");
        Arc::new(store)
    }
}
