//! Column Resolver - maps free-form order-line headers to canonical fields
//!
//! ERP exports rarely agree on header spelling ("CO Num", "co_num", "CO_NUM ").
//! Every header is trimmed, whitespace runs are collapsed to `_`, and the
//! result is searched case-insensitively with a fixed pattern per field.
//! The first header (in file order) that matches wins.

use crate::config::Dimension;
use crate::error::{AttachError, Result};
use crate::ingestion::RawTable;
use lazy_static::lazy_static;
use polars::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref ORDER_ID_PATTERN: Regex = Regex::new(r"(?i)co_?num").unwrap();
    static ref LINE_INDEX_PATTERN: Regex = Regex::new(r"(?i)co_?line").unwrap();
    static ref ITEM_PATTERN: Regex = Regex::new(r"(?i)item").unwrap();
    static ref DESCRIPTION_PATTERN: Regex = Regex::new(r"(?i)desc").unwrap();
    static ref FAMILY_CODE_PATTERN: Regex = Regex::new(r"(?i)final_?fc").unwrap();
    static ref PRODUCT_CODE_PATTERN: Regex = Regex::new(r"(?i)final_?pc").unwrap();
}

/// Semantic fields of an order-line table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CanonicalField {
    OrderId,
    LineIndex,
    Item,
    Description,
    FamilyCode,
    ProductCode,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 6] = [
        CanonicalField::OrderId,
        CanonicalField::LineIndex,
        CanonicalField::Item,
        CanonicalField::Description,
        CanonicalField::FamilyCode,
        CanonicalField::ProductCode,
    ];

    /// Column name used for this field in the canonical table
    pub fn column_name(&self) -> &'static str {
        match self {
            CanonicalField::OrderId => "CO_NUM",
            CanonicalField::LineIndex => "CO_LINE",
            CanonicalField::Item => "ITEM",
            CanonicalField::Description => "DESCRIPTION",
            CanonicalField::FamilyCode => "FINAL_FC",
            CanonicalField::ProductCode => "FINAL_PC",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CanonicalField::OrderId => "order-id",
            CanonicalField::LineIndex => "line-index",
            CanonicalField::Item => "item",
            CanonicalField::Description => "description",
            CanonicalField::FamilyCode => "family-code",
            CanonicalField::ProductCode => "product-code",
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(
            self,
            CanonicalField::OrderId | CanonicalField::LineIndex | CanonicalField::Item
        )
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            CanonicalField::OrderId => &*ORDER_ID_PATTERN,
            CanonicalField::LineIndex => &*LINE_INDEX_PATTERN,
            CanonicalField::Item => &*ITEM_PATTERN,
            CanonicalField::Description => &*DESCRIPTION_PATTERN,
            CanonicalField::FamilyCode => &*FAMILY_CODE_PATTERN,
            CanonicalField::ProductCode => &*PRODUCT_CODE_PATTERN,
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Result of header resolution: canonical field -> original header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    resolved: BTreeMap<CanonicalField, String>,
}

impl ColumnMapping {
    /// Original header resolved for `field`, if any
    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.resolved.get(&field).map(|s| s.as_str())
    }

    pub fn has(&self, field: CanonicalField) -> bool {
        self.resolved.contains_key(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalField, &str)> {
        self.resolved.iter().map(|(f, h)| (*f, h.as_str()))
    }

    pub fn missing_required(&self) -> Vec<CanonicalField> {
        CanonicalField::ALL
            .iter()
            .filter(|f| f.is_required() && !self.has(**f))
            .copied()
            .collect()
    }

    /// Fails with a schema error naming every unresolved required field.
    pub fn require(&self) -> Result<()> {
        let missing = self.missing_required();
        if missing.is_empty() {
            return Ok(());
        }
        Err(AttachError::Schema {
            missing: missing.iter().map(|f| f.label().to_string()).collect(),
        })
    }

    /// Dimensions that can be used for grouping or as attribute values
    pub fn available_dimensions(&self) -> Vec<Dimension> {
        Dimension::ALL
            .iter()
            .filter(|d| self.has(d.field()))
            .copied()
            .collect()
    }

    pub fn ensure_dimension(&self, dimension: Dimension) -> Result<()> {
        if self.has(dimension.field()) {
            Ok(())
        } else {
            Err(AttachError::InvalidParameter(format!(
                "dimension '{}' is unavailable: no {} column was found",
                dimension,
                dimension.field().label()
            )))
        }
    }
}

/// Collapse whitespace runs to `_` after trimming.
pub fn normalize_header(header: &str) -> String {
    WHITESPACE.replace_all(header.trim(), "_").into_owned()
}

/// Map raw headers to canonical fields. Pure: no I/O, no table access.
pub fn resolve_columns<S: AsRef<str>>(headers: &[S]) -> ColumnMapping {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();
    let mut resolved = BTreeMap::new();

    for field in CanonicalField::ALL {
        let pattern = field.pattern();
        if let Some(idx) = normalized.iter().position(|h| pattern.is_match(h)) {
            let header = headers[idx].as_ref().trim().to_string();
            debug!("Resolved {} -> '{}'", field, header);
            resolved.insert(field, header);
        }
    }

    ColumnMapping { resolved }
}

/// Render a line index so that `1`, `01` and `1.0` all compare equal.
pub fn normalize_line_index(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
            format!("{}", v as i64)
        }
        _ => trimmed.to_string(),
    }
}

/// Build the canonical table: one column per resolved field, named by
/// `CanonicalField::column_name`. Rows without an order id are dropped.
///
/// Validates `mapping` itself, so it fails with a schema error before
/// touching any row when a required field is unresolved.
pub fn canonicalize(raw: &RawTable, mapping: &ColumnMapping) -> Result<DataFrame> {
    mapping.require()?;

    let header_index = |field: CanonicalField| -> Option<usize> {
        let header = mapping.get(field)?;
        raw.headers.iter().position(|h| h.trim() == header)
    };

    // A mapping built from other headers may name a column this table lacks
    let order_idx = header_index(CanonicalField::OrderId).ok_or_else(|| AttachError::Schema {
        missing: vec![CanonicalField::OrderId.label().to_string()],
    })?;

    let kept_rows: Vec<&Vec<Option<String>>> = raw
        .rows
        .iter()
        .filter(|row| row.get(order_idx).map_or(false, |v| v.is_some()))
        .collect();

    let dropped = raw.rows.len() - kept_rows.len();
    if dropped > 0 {
        warn!("Dropped {} row(s) without an order number", dropped);
    }

    let mut columns = Vec::new();
    for field in CanonicalField::ALL {
        let Some(idx) = header_index(field) else {
            continue;
        };
        let values: Vec<Option<String>> = kept_rows
            .iter()
            .map(|row| {
                row.get(idx).cloned().flatten().map(|v| {
                    if field == CanonicalField::LineIndex {
                        normalize_line_index(&v)
                    } else {
                        v
                    }
                })
            })
            .collect();
        columns.push(Series::new(field.column_name(), values));
    }

    let df = DataFrame::new(columns)?;
    info!(
        "Canonical table: {} rows, columns {:?}",
        df.height(),
        df.get_column_names()
    );
    Ok(df)
}
