//! Attach-Rate Calculator
//!
//! For every grouping key and attribute value:
//! `attach_rate = distinct orders with the attribute / distinct orders under the key`.
//! The result is sparse: only combinations that occur at least once get a row.

use crate::config::Dimension;
use crate::error::Result;
use crate::splitter::{string_values, SplitRecords, ORDER_COLUMN};
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

pub const ORDER_COUNT: &str = "Order_Count";
pub const TOTAL_ORDERS: &str = "Total_Orders";
pub const ATTACH_RATE: &str = "Attach_Rate";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachRateEntry {
    pub key: String,
    pub attribute_value: String,
    pub order_count: u64,
    pub total_orders: u64,
    pub attach_rate: f64,
}

/// Attach rates for every key, plus the order total of every key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachRateTable {
    pub grouping: Dimension,
    pub attribute: Dimension,
    /// Sorted by key, then attribute value
    pub entries: Vec<AttachRateEntry>,
    /// Distinct base orders per key, including keys without any attribute
    pub totals: BTreeMap<String, u64>,
}

impl AttachRateTable {
    pub fn total_orders(&self, key: &str) -> Option<u64> {
        self.totals.get(key).copied()
    }

    /// Sorted key domain
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.totals.keys().map(|k| k.as_str())
    }

    pub fn entries_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a AttachRateEntry> {
        self.entries.iter().filter(move |e| e.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_dataframe(&self) -> Result<DataFrame> {
        entries_to_dataframe(&self.entries, self.grouping, self.attribute)
    }
}

/// Tabular form with fixed headers:
/// `<grouping column>, <attribute column>, Order_Count, Total_Orders, Attach_Rate`
pub fn entries_to_dataframe(
    entries: &[AttachRateEntry],
    grouping: Dimension,
    attribute: Dimension,
) -> Result<DataFrame> {
    let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
    let values: Vec<&str> = entries.iter().map(|e| e.attribute_value.as_str()).collect();
    let counts: Vec<u64> = entries.iter().map(|e| e.order_count).collect();
    let totals: Vec<u64> = entries.iter().map(|e| e.total_orders).collect();
    let rates: Vec<f64> = entries.iter().map(|e| e.attach_rate).collect();

    let df = DataFrame::new(vec![
        Series::new(grouping.base_column(), keys),
        Series::new(attribute.attribute_column(), values),
        Series::new(ORDER_COUNT, counts),
        Series::new(TOTAL_ORDERS, totals),
        Series::new(ATTACH_RATE, rates),
    ])?;
    Ok(df)
}

fn u64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<u64>>> {
    let series = df.column(name)?.cast(&DataType::UInt64)?;
    let values = series.u64()?.into_iter().collect();
    Ok(values)
}

/// Distinct base orders per grouping key. Null keys are skipped.
pub fn order_totals(split: &SplitRecords, grouping: Dimension) -> Result<BTreeMap<String, u64>> {
    let key_col = grouping.base_column();

    let totals_df = split
        .base
        .clone()
        .lazy()
        .filter(col(key_col).is_not_null())
        .group_by([col(key_col)])
        .agg([col(ORDER_COLUMN).n_unique().alias(TOTAL_ORDERS)])
        .collect()?;

    let keys = string_values(&totals_df, key_col)?;
    let totals = u64_values(&totals_df, TOTAL_ORDERS)?;

    Ok(keys
        .into_iter()
        .zip(totals)
        .filter_map(|(k, t)| Some((k?, t?)))
        .collect())
}

pub fn compute_attach_rates(split: &SplitRecords, grouping: Dimension) -> Result<AttachRateTable> {
    let key_col = grouping.base_column();
    let attr_col = split.attribute_column();

    let totals = order_totals(split, grouping)?;

    let totals_df = DataFrame::new(vec![
        Series::new(key_col, totals.keys().map(|k| k.as_str()).collect::<Vec<_>>()),
        Series::new(TOTAL_ORDERS, totals.values().copied().collect::<Vec<u64>>()),
    ])?;

    let attach_df = split
        .joined
        .clone()
        .lazy()
        .filter(col(key_col).is_not_null().and(col(attr_col).is_not_null()))
        .group_by([col(key_col), col(attr_col)])
        .agg([col(ORDER_COLUMN).n_unique().alias(ORDER_COUNT)])
        .join(
            totals_df.lazy(),
            [col(key_col)],
            [col(key_col)],
            JoinArgs::new(JoinType::Inner),
        )
        .with_columns([(col(ORDER_COUNT).cast(DataType::Float64)
            / col(TOTAL_ORDERS).cast(DataType::Float64))
        .alias(ATTACH_RATE)])
        .collect()?;

    let keys = string_values(&attach_df, key_col)?;
    let values = string_values(&attach_df, attr_col)?;
    let counts = u64_values(&attach_df, ORDER_COUNT)?;
    let order_totals = u64_values(&attach_df, TOTAL_ORDERS)?;
    let rates: Vec<Option<f64>> = attach_df.column(ATTACH_RATE)?.f64()?.into_iter().collect();

    let mut entries = Vec::with_capacity(attach_df.height());
    for row_idx in 0..attach_df.height() {
        let (Some(key), Some(value), Some(count), Some(total), Some(rate)) = (
            keys[row_idx].clone(),
            values[row_idx].clone(),
            counts[row_idx],
            order_totals[row_idx],
            rates[row_idx],
        ) else {
            continue;
        };
        entries.push(AttachRateEntry {
            key,
            attribute_value: value,
            order_count: count,
            total_orders: total,
            attach_rate: rate,
        });
    }

    // group_by output order is not stable across runs
    entries.sort_by(|a, b| {
        a.key
            .cmp(&b.key)
            .then_with(|| a.attribute_value.cmp(&b.attribute_value))
    });

    info!(
        "Computed {} attach-rate entries across {} {} keys",
        entries.len(),
        totals.len(),
        grouping
    );

    Ok(AttachRateTable {
        grouping,
        attribute: split.attribute,
        entries,
        totals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splitter::split_records;

    fn canonical() -> DataFrame {
        df![
            "CO_NUM" => ["O1", "O1", "O1", "O2", "O2", "O3", "O3", "O4"],
            "CO_LINE" => ["1", "2", "3", "1", "2", "1", "2", "1"],
            "ITEM" => ["M1", "A", "B", "M1", "A", "M2", "A", "M2"],
            "FINAL_FC" => [Some("F1"), Some("FA"), Some("FB"), Some("F1"), Some("FA"), None, Some("FA"), Some("F2")],
        ]
        .unwrap()
    }

    fn entry<'a>(table: &'a AttachRateTable, key: &str, value: &str) -> &'a AttachRateEntry {
        table
            .entries
            .iter()
            .find(|e| e.key == key && e.attribute_value == value)
            .unwrap()
    }

    #[test]
    fn test_attach_rates_by_machine() {
        let split = split_records(&canonical(), Dimension::Item).unwrap();
        let table = compute_attach_rates(&split, Dimension::Item).unwrap();

        assert_eq!(table.entries.len(), 3);
        assert_eq!(entry(&table, "M1", "A").attach_rate, 1.0);
        assert_eq!(entry(&table, "M1", "B").order_count, 1);
        assert_eq!(entry(&table, "M1", "B").attach_rate, 0.5);
        // O4 has no attributes but still counts toward M2's total
        assert_eq!(entry(&table, "M2", "A").total_orders, 2);
        assert_eq!(entry(&table, "M2", "A").attach_rate, 0.5);
    }

    #[test]
    fn test_totals_include_orders_without_attributes() {
        let split = split_records(&canonical(), Dimension::Item).unwrap();
        let table = compute_attach_rates(&split, Dimension::Item).unwrap();

        assert_eq!(table.total_orders("M1"), Some(2));
        assert_eq!(table.total_orders("M2"), Some(2));
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["M1", "M2"]);
    }

    #[test]
    fn test_null_grouping_keys_are_skipped() {
        let split = split_records(&canonical(), Dimension::Item).unwrap();
        let table = compute_attach_rates(&split, Dimension::FamilyCode).unwrap();

        // O3's base line has no family code
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["F1", "F2"]);
        assert!(table.entries_for("F2").next().is_none());
        assert_eq!(entry(&table, "F1", "A").attach_rate, 1.0);
    }

    #[test]
    fn test_family_code_as_attribute() {
        let split = split_records(&canonical(), Dimension::FamilyCode).unwrap();
        let table = compute_attach_rates(&split, Dimension::Item).unwrap();

        assert_eq!(entry(&table, "M1", "FA").order_count, 2);
        assert_eq!(entry(&table, "M1", "FB").attach_rate, 0.5);
        assert_eq!(table.attribute, Dimension::FamilyCode);
    }

    #[test]
    fn test_bounds_and_idempotence() {
        let split = split_records(&canonical(), Dimension::Item).unwrap();
        let first = compute_attach_rates(&split, Dimension::Item).unwrap();
        let second = compute_attach_rates(&split, Dimension::Item).unwrap();

        assert_eq!(first, second);
        for e in &first.entries {
            assert!(e.order_count <= e.total_orders);
            assert!((0.0..=1.0).contains(&e.attach_rate));
        }
    }

    #[test]
    fn test_dataframe_headers() {
        let split = split_records(&canonical(), Dimension::Item).unwrap();
        let table = compute_attach_rates(&split, Dimension::Item).unwrap();
        let df = table.to_dataframe().unwrap();

        assert_eq!(
            df.get_column_names(),
            &["BASE_MACHINE", "ITEM", "Order_Count", "Total_Orders", "Attach_Rate"]
        );
        assert_eq!(df.height(), 3);
    }
}
