//! Query/Filter Layer - slices the attach-rate table for one key
//!
//! Also owns key selection: the key domain, its type-ahead filter, and the
//! closest-key suggestion shown when a requested key does not exist.

use crate::attach_rate::{AttachRateEntry, AttachRateTable};
use crate::config::{validate_threshold, validate_top_n};
use crate::error::Result;
use serde::Serialize;
use std::cmp::Ordering;
use strsim::jaro_winkler;
use tracing::{debug, warn};

/// Minimum Jaro-Winkler similarity for a key suggestion
const SUGGESTION_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub struct AttachQuery {
    pub key: String,
    /// Inclusive lower bound on attach rate
    pub min_attach_rate: f64,
    pub top_n: i64,
}

/// Entries for `query.key` with `attach_rate >= min_attach_rate`, highest
/// rate first (ties by attribute value), at most `top_n` rows.
///
/// A key outside the domain gives an empty result.
pub fn top_options(table: &AttachRateTable, query: &AttachQuery) -> Result<Vec<AttachRateEntry>> {
    validate_threshold(query.min_attach_rate)?;
    validate_top_n(query.top_n)?;

    let mut rows: Vec<AttachRateEntry> = table
        .entries_for(&query.key)
        .filter(|e| e.attach_rate >= query.min_attach_rate)
        .cloned()
        .collect();

    rows.sort_by(|a, b| {
        b.attach_rate
            .partial_cmp(&a.attach_rate)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.attribute_value.cmp(&b.attribute_value))
    });
    rows.truncate(query.top_n as usize);

    debug!(
        "{} option(s) for '{}' at attach rate >= {}",
        rows.len(),
        query.key,
        query.min_attach_rate
    );
    Ok(rows)
}

/// Sorted, distinct grouping keys
pub fn key_domain(table: &AttachRateTable) -> Vec<String> {
    table.keys().map(|k| k.to_string()).collect()
}

/// Keys containing `needle`, case-insensitively. A blank needle keeps all.
pub fn filter_keys<'a>(domain: &'a [String], needle: &str) -> Vec<&'a str> {
    let needle = needle.trim().to_lowercase();
    domain
        .iter()
        .filter(|k| k.to_lowercase().contains(&needle))
        .map(|k| k.as_str())
        .collect()
}

/// Closest existing key to `key`, if any is similar enough
pub fn suggest_key(domain: &[String], key: &str) -> Option<String> {
    let target = key.trim().to_lowercase();
    let mut best: Option<(&String, f64)> = None;

    for candidate in domain {
        let score = jaro_winkler(&candidate.to_lowercase(), &target);
        if score >= SUGGESTION_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }

    best.map(|(k, _)| k.clone())
}

/// Outcome of resolving which key to analyse
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySelection {
    Selected(String),
    /// Nothing matched; results for this run are empty tables
    Empty { reason: String },
}

impl KeySelection {
    pub fn key(&self) -> Option<&str> {
        match self {
            KeySelection::Selected(k) => Some(k),
            KeySelection::Empty { .. } => None,
        }
    }
}

/// Pick the key to analyse: the explicit key when it exists, otherwise the
/// first key passing `filter`.
pub fn select_key(
    table: &AttachRateTable,
    explicit: Option<&str>,
    filter: Option<&str>,
) -> KeySelection {
    let domain = key_domain(table);

    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        if table.total_orders(key).is_some() {
            return KeySelection::Selected(key.to_string());
        }
        let reason = match suggest_key(&domain, key) {
            Some(suggestion) => format!(
                "key '{}' not found among {} keys (did you mean '{}'?)",
                key,
                domain.len(),
                suggestion
            ),
            None => format!("key '{}' not found among {} keys", key, domain.len()),
        };
        warn!("{}", reason);
        return KeySelection::Empty { reason };
    }

    let needle = filter.unwrap_or("");
    match filter_keys(&domain, needle).first() {
        Some(first) => KeySelection::Selected(first.to_string()),
        None => {
            let reason = format!("no key matches filter '{}'", needle.trim());
            warn!("{}", reason);
            KeySelection::Empty { reason }
        }
    }
}
