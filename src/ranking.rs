//! Relevance ranking and quarter-coverage selection.
//!
//! Calls are scored against a free-text query (topic tags, title), recency
//! and duration, then the top `k` are taken. A pure top-k tends to cluster in
//! the most recent quarter, so the selection is repaired to include at least
//! one call from every calendar quarter present in the candidates, as far as
//! `k` allows.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Datelike, Utc};

use crate::types::CallRecord;

/// Calls kept per entity for analysis.
pub const TOP_K: usize = 15;

const TOPIC_TERM_POINTS: f64 = 10.0;
const TITLE_TERM_POINTS: f64 = 5.0;
const RECENCY_MAX_POINTS: f64 = 20.0;
const RECENCY_WINDOW_DAYS: f64 = 730.0;
const DURATION_MAX_POINTS: f64 = 10.0;
const DURATION_CAP_SECS: f64 = 3600.0;

/// Distinct lowercase query terms longer than two characters.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() > 2)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Relevance of one call. Higher is better.
pub fn score_call(call: &CallRecord, terms: &[String], now: DateTime<Utc>) -> f64 {
    let title = call.title.to_lowercase();
    let topics: Vec<String> = call.topics.iter().map(|t| t.to_lowercase()).collect();

    let mut score = 0.0;
    for term in terms {
        if topics.iter().any(|t| t.contains(term.as_str())) {
            score += TOPIC_TERM_POINTS;
        }
        if title.contains(term.as_str()) {
            score += TITLE_TERM_POINTS;
        }
    }

    if let Some(at) = call.occurred_at() {
        let age_days = ((now - at).num_seconds() as f64 / 86_400.0).max(0.0);
        score += RECENCY_MAX_POINTS * (1.0 - age_days / RECENCY_WINDOW_DAYS).max(0.0);
    }

    score += DURATION_MAX_POINTS * (call.duration_secs as f64 / DURATION_CAP_SECS).min(1.0);
    score
}

/// Calendar quarter of the call, e.g. `2026-Q2`.
pub fn quarter_key(call: &CallRecord) -> Option<String> {
    call.occurred_at()
        .map(|at| format!("{:04}-Q{}", at.year(), (at.month() - 1) / 3 + 1))
}

pub fn select_top(candidates: &[CallRecord], query: &str, k: usize) -> Vec<CallRecord> {
    select_top_at(candidates, query, k, Utc::now())
}

/// Top `k` calls by score with quarter coverage repaired. When there are no
/// more than `k` candidates they are returned unchanged.
pub fn select_top_at(
    candidates: &[CallRecord],
    query: &str,
    k: usize,
    now: DateTime<Utc>,
) -> Vec<CallRecord> {
    if candidates.len() <= k {
        return candidates.to_vec();
    }

    let terms = query_terms(query);
    let mut ranked: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .map(|(i, call)| (i, score_call(call, &terms, now)))
        .collect();
    // stable: ties keep input order
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let order: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();

    let quarters: Vec<Option<String>> = candidates.iter().map(quarter_key).collect();
    let mut selected: Vec<usize> = order.iter().take(k).copied().collect();
    let mut swapped_in: HashSet<usize> = HashSet::new();

    let all_quarters: BTreeSet<&str> = quarters.iter().flatten().map(String::as_str).collect();
    for quarter in all_quarters {
        let covered = selected
            .iter()
            .any(|&i| quarters[i].as_deref() == Some(quarter));
        if covered {
            continue;
        }

        let Some(&replacement) = order
            .iter()
            .find(|&&i| quarters[i].as_deref() == Some(quarter) && !selected.contains(&i))
        else {
            continue;
        };

        let mut per_quarter: HashMap<Option<&str>, usize> = HashMap::new();
        for &i in &selected {
            *per_quarter.entry(quarters[i].as_deref()).or_default() += 1;
        }

        // Evict the lowest-ranked original pick that isn't its quarter's
        // only representative.
        let evict = selected.iter().rposition(|&i| {
            !swapped_in.contains(&i)
                && match quarters[i].as_deref() {
                    None => true,
                    q => per_quarter.get(&q).copied().unwrap_or(0) > 1,
                }
        });
        let Some(slot) = evict else {
            log::info!(
                "Ranking: cannot cover quarter {} within top {}",
                quarter,
                k
            );
            break;
        };

        selected[slot] = replacement;
        swapped_in.insert(replacement);
    }

    let rank: HashMap<usize, usize> = order.iter().enumerate().map(|(r, &i)| (i, r)).collect();
    selected.sort_by_key(|i| rank.get(i).copied().unwrap_or(usize::MAX));
    selected.into_iter().map(|i| candidates[i].clone()).collect()
}
