//! Record Splitter - base lines vs attribute lines
//!
//! Line index `1` of an order is its base line (the machine); every other line
//! is an attribute of that order. Orders without a base line are dropped here
//! and never reach aggregation.

use crate::column_resolver::CanonicalField;
use crate::config::Dimension;
use crate::error::{AttachError, Result};
use polars::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const ORDER_COLUMN: &str = "CO_NUM";

/// Output of the split: base records, attribute records and their left join
#[derive(Debug, Clone)]
pub struct SplitRecords {
    /// One row per order: `CO_NUM`, `BASE_MACHINE` and, when resolved, `BASE_FC` / `BASE_PC`
    pub base: DataFrame,
    /// One row per non-base line: `CO_NUM` plus the attribute column
    pub attributes: DataFrame,
    /// `base` left-joined with `attributes` on `CO_NUM`
    pub joined: DataFrame,
    pub attribute: Dimension,
}

impl SplitRecords {
    pub fn has_grouping(&self, grouping: Dimension) -> bool {
        self.base.column(grouping.base_column()).is_ok()
    }

    pub fn attribute_column(&self) -> &'static str {
        self.attribute.attribute_column()
    }
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| *c == name)
}

/// Split the canonical table into base and attribute records.
///
/// With more than one base line in an order, the first in row order wins.
pub fn split_records(canonical: &DataFrame, attribute: Dimension) -> Result<SplitRecords> {
    let line_col = CanonicalField::LineIndex.column_name();
    let attr_col = attribute.attribute_column();

    if !has_column(canonical, attr_col) {
        return Err(AttachError::InvalidParameter(format!(
            "attribute dimension '{}' is unavailable: no {} column was found",
            attribute,
            attribute.field().label()
        )));
    }

    let is_base = col(line_col).eq(lit("1")).fill_null(lit(false));

    let mut base_exprs = vec![col(ORDER_COLUMN)];
    for dimension in Dimension::ALL {
        let source = dimension.field().column_name();
        if has_column(canonical, source) {
            base_exprs.push(col(source).alias(dimension.base_column()));
        }
    }

    let base_lines = canonical
        .clone()
        .lazy()
        .filter(is_base.clone())
        .select(base_exprs)
        .collect()?;

    let base = base_lines
        .clone()
        .lazy()
        .unique_stable(Some(vec![ORDER_COLUMN.to_string()]), UniqueKeepStrategy::First)
        .collect()?;

    let duplicate_base_lines = base_lines.height() - base.height();
    if duplicate_base_lines > 0 {
        warn!(
            "{} extra base line(s) found; keeping the first base line of each order",
            duplicate_base_lines
        );
    }

    let total_orders = canonical.column(ORDER_COLUMN)?.n_unique()?;
    let orders_without_base = total_orders.saturating_sub(base.height());
    if orders_without_base > 0 {
        warn!(
            "{} order(s) have no base line and are excluded",
            orders_without_base
        );
    }

    let attributes = canonical
        .clone()
        .lazy()
        .filter(is_base.not())
        .select([col(ORDER_COLUMN), col(attr_col)])
        .collect()?;

    let joined = base
        .clone()
        .lazy()
        .join(
            attributes.clone().lazy(),
            [col(ORDER_COLUMN)],
            [col(ORDER_COLUMN)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    info!(
        "Split {} orders into {} base records and {} attribute lines ({} joined rows)",
        total_orders,
        base.height(),
        attributes.height(),
        joined.height()
    );

    Ok(SplitRecords {
        base,
        attributes,
        joined,
        attribute,
    })
}

/// Read a string column into owned values, keeping nulls.
pub(crate) fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let values = df
        .column(name)?
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect();
    Ok(values)
}

/// Item code -> first non-empty description, in row order.
/// Empty when the description column was not resolved.
pub fn item_descriptions(canonical: &DataFrame) -> Result<BTreeMap<String, String>> {
    let item_col = CanonicalField::Item.column_name();
    let desc_col = CanonicalField::Description.column_name();

    let mut catalog = BTreeMap::new();
    if !has_column(canonical, desc_col) {
        return Ok(catalog);
    }

    let items = string_values(canonical, item_col)?;
    let descriptions = string_values(canonical, desc_col)?;
    for (item, description) in items.into_iter().zip(descriptions) {
        if let (Some(item), Some(description)) = (item, description) {
            catalog.entry(item).or_insert(description);
        }
    }

    debug!("Item catalog holds {} descriptions", catalog.len());
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical() -> DataFrame {
        df![
            "CO_NUM" => ["O1", "O1", "O1", "O2", "O2", "O3", "O4"],
            "CO_LINE" => ["1", "2", "3", "1", "2", "1", "2"],
            "ITEM" => ["M1", "A", "B", "M1", "A", "M2", "Z"],
        ]
        .unwrap()
    }

    #[test]
    fn test_base_and_attribute_partition() {
        let split = split_records(&canonical(), Dimension::Item).unwrap();

        assert_eq!(split.base.height(), 3);
        assert_eq!(split.attributes.height(), 4);
        assert_eq!(split.base.get_column_names(), &["CO_NUM", "BASE_MACHINE"]);
        assert!(split.has_grouping(Dimension::Item));
        assert!(!split.has_grouping(Dimension::FamilyCode));
    }

    #[test]
    fn test_orders_without_base_line_are_unreachable() {
        let split = split_records(&canonical(), Dimension::Item).unwrap();

        let joined_items = string_values(&split.joined, "ITEM").unwrap();
        assert!(!joined_items.contains(&Some("Z".to_string())));
        let joined_orders = string_values(&split.joined, ORDER_COLUMN).unwrap();
        assert!(!joined_orders.contains(&Some("O4".to_string())));
    }

    #[test]
    fn test_left_join_keeps_orders_without_attributes() {
        let split = split_records(&canonical(), Dimension::Item).unwrap();
        let orders = string_values(&split.joined, ORDER_COLUMN).unwrap();
        let items = string_values(&split.joined, "ITEM").unwrap();

        let o3: Vec<_> = orders
            .iter()
            .zip(items.iter())
            .filter(|(o, _)| o.as_deref() == Some("O3"))
            .collect();
        assert_eq!(o3.len(), 1);
        assert_eq!(o3[0].1, &None);
    }

    #[test]
    fn test_duplicate_base_line_keeps_first() {
        let df = df![
            "CO_NUM" => ["O1", "O1", "O1"],
            "CO_LINE" => ["1", "1", "2"],
            "ITEM" => ["M1", "M9", "A"],
        ]
        .unwrap();

        let split = split_records(&df, Dimension::Item).unwrap();
        assert_eq!(split.base.height(), 1);
        assert_eq!(
            string_values(&split.base, "BASE_MACHINE").unwrap(),
            vec![Some("M1".to_string())]
        );
    }

    #[test]
    fn test_unresolved_attribute_dimension_is_rejected() {
        let err = split_records(&canonical(), Dimension::ProductCode).unwrap_err();
        assert!(matches!(err, AttachError::InvalidParameter(_)));
    }

    #[test]
    fn test_item_descriptions_first_wins() {
        let df = df![
            "CO_NUM" => ["O1", "O1", "O2"],
            "CO_LINE" => ["1", "2", "2"],
            "ITEM" => ["M1", "A", "A"],
            "DESCRIPTION" => [Some("Machine"), None, Some("Option A")],
        ]
        .unwrap();

        let catalog = item_descriptions(&df).unwrap();
        assert_eq!(catalog.get("M1").map(|s| s.as_str()), Some("Machine"));
        assert_eq!(catalog.get("A").map(|s| s.as_str()), Some("Option A"));
        assert!(item_descriptions(&canonical()).unwrap().is_empty());
    }
}
