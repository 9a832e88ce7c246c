//! Analysis session over one uploaded order-lines table
//!
//! The canonical table is built once and never mutated. Every call to
//! `run` recomputes the split, the attach rates and the pair table from it.

use crate::attach_rate::{compute_attach_rates, AttachRateEntry, AttachRateTable};
use crate::column_resolver::{canonicalize, resolve_columns, ColumnMapping};
use crate::config::{AnalysisConfig, Dimension};
use crate::cooccurrence::{count_pairs, PairTable};
use crate::error::Result;
use crate::ingestion::{load_table, RawTable};
use crate::query::{select_key, top_options, AttachQuery, KeySelection};
use crate::splitter::{item_descriptions, split_records};
use polars::prelude::DataFrame;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// One loaded order-lines table, ready for repeated analysis runs
pub struct AnalysisSession {
    mapping: ColumnMapping,
    canonical: DataFrame,
    descriptions: BTreeMap<String, String>,
}

/// Everything produced by one run
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub selection: KeySelection,
    /// Full table, every key
    pub attach: AttachRateTable,
    /// Filtered, ranked rows for the selected key
    pub top_options: Vec<AttachRateEntry>,
    /// `None` when no key was selected
    pub pairs: Option<PairTable>,
    /// Descriptions of the attribute values in `top_options`, item attributes only
    pub descriptions: BTreeMap<String, String>,
}

impl AnalysisReport {
    pub fn selected_key(&self) -> Option<&str> {
        self.selection.key()
    }
}

impl AnalysisSession {
    /// Load and canonicalize a CSV or spreadsheet file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let raw = load_table(path)?;
        Self::from_raw(&raw)
    }

    /// Fails with a schema error before any aggregation when a required
    /// column cannot be resolved.
    pub fn from_raw(raw: &RawTable) -> Result<Self> {
        let mapping = resolve_columns(&raw.headers);
        let canonical = canonicalize(raw, &mapping)?;
        for (field, header) in mapping.iter() {
            info!("Column {} <- '{}'", field, header);
        }

        let descriptions = item_descriptions(&canonical)?;

        Ok(Self {
            mapping,
            canonical,
            descriptions,
        })
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    pub fn canonical(&self) -> &DataFrame {
        &self.canonical
    }

    pub fn available_dimensions(&self) -> Vec<Dimension> {
        self.mapping.available_dimensions()
    }

    pub fn description(&self, item: &str) -> Option<&str> {
        self.descriptions.get(item).map(|s| s.as_str())
    }

    /// Full attach-rate table for the given dimensions
    pub fn attach_rates(&self, grouping: Dimension, attribute: Dimension) -> Result<AttachRateTable> {
        self.mapping.ensure_dimension(grouping)?;
        self.mapping.ensure_dimension(attribute)?;

        let split = split_records(&self.canonical, attribute)?;
        compute_attach_rates(&split, grouping)
    }

    pub fn run(&self, config: &AnalysisConfig) -> Result<AnalysisReport> {
        config.validate()?;
        self.mapping.ensure_dimension(config.grouping)?;
        self.mapping.ensure_dimension(config.attribute)?;

        let split = split_records(&self.canonical, config.attribute)?;
        let attach = compute_attach_rates(&split, config.grouping)?;
        let selection = select_key(&attach, config.key.as_deref(), config.key_filter.as_deref());

        let (top, pairs) = match selection.key() {
            Some(key) => {
                let query = AttachQuery {
                    key: key.to_string(),
                    min_attach_rate: config.min_attach_rate,
                    top_n: config.top_n,
                };
                let top = top_options(&attach, &query)?;
                let pairs = count_pairs(&split, config.grouping, key, config.top_n)?;
                (top, Some(pairs))
            }
            None => (Vec::new(), None),
        };

        let descriptions = if config.attribute == Dimension::Item {
            top.iter()
                .filter_map(|e| {
                    self.description(&e.attribute_value)
                        .map(|d| (e.attribute_value.clone(), d.to_string()))
                })
                .collect()
        } else {
            BTreeMap::new()
        };

        Ok(AnalysisReport {
            selection,
            attach,
            top_options: top,
            pairs,
            descriptions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttachError;
    use crate::ingestion::parse_csv;

    const ORDERS: &str = "\
Co Num,Co Line,Item,Description,Final FC
O1,1,M1,Machine one,F1
O1,2,A,Option A,FA
O1,3,B,Option B,FB
O2,1,M1,Machine one,F1
O2,2,A,Option A,FA
O3,1,M2,Machine two,F2
O3,2,A,Option A,FA
";

    fn session() -> AnalysisSession {
        AnalysisSession::from_raw(&parse_csv(ORDERS).unwrap()).unwrap()
    }

    #[test]
    fn test_run_selects_first_key_by_default() {
        let report = session().run(&AnalysisConfig::default()).unwrap();

        assert_eq!(report.selected_key(), Some("M1"));
        assert_eq!(report.top_options.len(), 2);
        assert_eq!(report.top_options[0].attribute_value, "A");
        assert_eq!(report.descriptions.get("B").map(|s| s.as_str()), Some("Option B"));
        let pairs = report.pairs.unwrap();
        assert_eq!(pairs.pairs.len(), 1);
        assert_eq!(pairs.pairs[0].label(), "A, B");
    }

    #[test]
    fn test_unavailable_dimension_is_invalid_parameter() {
        let config = AnalysisConfig {
            grouping: Dimension::ProductCode,
            ..AnalysisConfig::default()
        };
        let err = session().run(&config).unwrap_err();
        assert!(matches!(err, AttachError::InvalidParameter(_)));
        assert_eq!(
            session().available_dimensions(),
            vec![Dimension::Item, Dimension::FamilyCode]
        );
    }

    #[test]
    fn test_missing_key_yields_empty_tables() {
        let config = AnalysisConfig {
            key: Some("M7".to_string()),
            ..AnalysisConfig::default()
        };
        let report = session().run(&config).unwrap();

        assert!(report.selected_key().is_none());
        assert!(report.top_options.is_empty());
        assert!(report.pairs.is_none());
        assert!(!report.attach.is_empty());
    }

    #[test]
    fn test_schema_error_before_aggregation() {
        let raw = parse_csv("Co Num,Co Line,Qty\nO1,1,3\n").unwrap();
        match AnalysisSession::from_raw(&raw) {
            Err(AttachError::Schema { missing }) => assert_eq!(missing, vec!["item"]),
            Err(other) => panic!("expected schema error, got {:?}", other),
            Ok(_) => panic!("expected schema error"),
        }
    }
}
