//! Co-occurrence Counter - frequent attribute pairs for one grouping key
//!
//! Counts are order-level: a pair is counted once per order in which both
//! values appear, no matter how many lines carry them.

use crate::config::{validate_top_n, Dimension};
use crate::error::Result;
use crate::splitter::{string_values, SplitRecords, ORDER_COLUMN};
use itertools::Itertools;
use polars::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

pub const PAIR: &str = "Pair";
pub const COUNT: &str = "Count";
pub const SUPPORT: &str = "Support";

/// Unordered pair, stored with `first < second`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairCount {
    pub first: String,
    pub second: String,
    pub count: u64,
    pub support: f64,
}

impl PairCount {
    /// "value_a, value_b"
    pub fn label(&self) -> String {
        format!("{}, {}", self.first, self.second)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairTable {
    pub key: String,
    /// Orders under `key`, including those with fewer than two attributes
    pub total_orders: u64,
    /// Count descending, then pair ascending
    pub pairs: Vec<PairCount>,
}

impl PairTable {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Tabular form with fixed headers: `Pair, Count, Support`
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let labels: Vec<String> = self.pairs.iter().map(|p| p.label()).collect();
        let counts: Vec<u64> = self.pairs.iter().map(|p| p.count).collect();
        let support: Vec<f64> = self.pairs.iter().map(|p| p.support).collect();

        let df = DataFrame::new(vec![
            Series::new(PAIR, labels),
            Series::new(COUNT, counts),
            Series::new(SUPPORT, support),
        ])?;
        Ok(df)
    }
}

/// Distinct non-null attribute values per order for one key.
/// Orders without attributes map to an empty set.
fn attribute_sets(
    split: &SplitRecords,
    grouping: Dimension,
    key: &str,
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let key_col = grouping.base_column();
    let attr_col = split.attribute_column();

    let restricted = split
        .joined
        .clone()
        .lazy()
        .filter(col(key_col).eq(lit(key)))
        .select([col(ORDER_COLUMN), col(attr_col)])
        .collect()?;

    let orders = string_values(&restricted, ORDER_COLUMN)?;
    let values = string_values(&restricted, attr_col)?;

    let mut sets: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (order, value) in orders.into_iter().zip(values) {
        let Some(order) = order else { continue };
        let set = sets.entry(order).or_default();
        if let Some(value) = value {
            set.insert(value);
        }
    }
    Ok(sets)
}

/// Count co-occurring attribute pairs for `key`, keeping the top `top_n`.
///
/// An unknown key yields an empty table.
pub fn count_pairs(
    split: &SplitRecords,
    grouping: Dimension,
    key: &str,
    top_n: i64,
) -> Result<PairTable> {
    validate_top_n(top_n)?;

    let sets = attribute_sets(split, grouping, key)?;
    let total_orders = sets.len() as u64;

    let mut counter: HashMap<(String, String), u64> = HashMap::new();
    for values in sets.values().filter(|s| s.len() >= 2) {
        // BTreeSet iterates ascending, so every tuple is already canonical
        for (a, b) in values.iter().tuple_combinations() {
            *counter.entry((a.clone(), b.clone())).or_insert(0) += 1;
        }
    }
    debug!("{} distinct pairs for key '{}'", counter.len(), key);

    let mut pairs: Vec<PairCount> = counter
        .into_iter()
        .map(|((first, second), count)| PairCount {
            support: count as f64 / total_orders as f64,
            first,
            second,
            count,
        })
        .collect();

    pairs.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.first.cmp(&b.first))
            .then_with(|| a.second.cmp(&b.second))
    });
    pairs.truncate(top_n as usize);

    info!(
        "Pair table for '{}': {} pair(s) over {} order(s)",
        key,
        pairs.len(),
        total_orders
    );

    Ok(PairTable {
        key: key.to_string(),
        total_orders,
        pairs,
    })
}
