//! Analysis parameters
//!
//! Parameters come from three places, highest precedence first: command-line
//! flags, an optional JSON config file, and the defaults below.

use crate::column_resolver::CanonicalField;
use crate::error::{AttachError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_MIN_ATTACH_RATE: f64 = 0.1;
pub const DEFAULT_TOP_N: i64 = 20;

/// A code column usable either to group base records or as attribute value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Dimension {
    /// Item / part code
    #[default]
    Item,
    /// Final family code (FC)
    FamilyCode,
    /// Final product code (PC)
    ProductCode,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Item, Dimension::FamilyCode, Dimension::ProductCode];

    pub fn field(&self) -> CanonicalField {
        match self {
            Dimension::Item => CanonicalField::Item,
            Dimension::FamilyCode => CanonicalField::FamilyCode,
            Dimension::ProductCode => CanonicalField::ProductCode,
        }
    }

    /// Column holding this dimension in the base-record table
    pub fn base_column(&self) -> &'static str {
        match self {
            Dimension::Item => "BASE_MACHINE",
            Dimension::FamilyCode => "BASE_FC",
            Dimension::ProductCode => "BASE_PC",
        }
    }

    /// Column holding this dimension in the attribute-record table
    pub fn attribute_column(&self) -> &'static str {
        self.field().column_name()
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Item => "item",
            Dimension::FamilyCode => "family-code",
            Dimension::ProductCode => "product-code",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Dimension used to bucket base records
    pub grouping: Dimension,
    /// Dimension read from attribute lines
    pub attribute: Dimension,
    /// Explicit key value; when absent the first key matching `key_filter` is used
    pub key: Option<String>,
    /// Case-insensitive substring narrowing the key domain
    pub key_filter: Option<String>,
    pub min_attach_rate: f64,
    pub top_n: i64,
    /// Directory receiving CSV exports; nothing is written when absent
    pub output_dir: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            grouping: Dimension::Item,
            attribute: Dimension::Item,
            key: None,
            key_filter: None,
            min_attach_rate: DEFAULT_MIN_ATTACH_RATE,
            top_n: DEFAULT_TOP_N,
            output_dir: None,
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub grouping: Option<Dimension>,
    pub attribute: Option<Dimension>,
    pub key: Option<String>,
    pub key_filter: Option<String>,
    pub min_attach_rate: Option<f64>,
    pub top_n: Option<i64>,
    pub output_dir: Option<PathBuf>,
}

impl AnalysisConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: AnalysisConfig = serde_json::from_str(&content)?;
        info!("Loaded analysis config from {}", path.display());
        Ok(config)
    }

    /// Apply command-line values on top of this config. Unset values keep
    /// what the config file (or the defaults) provided.
    pub fn merge_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(grouping) = overrides.grouping {
            self.grouping = grouping;
        }
        if let Some(attribute) = overrides.attribute {
            self.attribute = attribute;
        }
        if overrides.key.is_some() {
            self.key = overrides.key;
        }
        if overrides.key_filter.is_some() {
            self.key_filter = overrides.key_filter;
        }
        if let Some(min_attach_rate) = overrides.min_attach_rate {
            self.min_attach_rate = min_attach_rate;
        }
        if let Some(top_n) = overrides.top_n {
            self.top_n = top_n;
        }
        if overrides.output_dir.is_some() {
            self.output_dir = overrides.output_dir;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.min_attach_rate)?;
        validate_top_n(self.top_n)?;
        Ok(())
    }
}

pub fn validate_threshold(min_attach_rate: f64) -> Result<()> {
    if !min_attach_rate.is_finite() || !(0.0..=1.0).contains(&min_attach_rate) {
        return Err(AttachError::InvalidParameter(format!(
            "minimum attach rate must be between 0.0 and 1.0, got {}",
            min_attach_rate
        )));
    }
    Ok(())
}

pub fn validate_top_n(top_n: i64) -> Result<()> {
    if top_n <= 0 {
        return Err(AttachError::InvalidParameter(format!(
            "top N must be a positive integer, got {}",
            top_n
        )));
    }
    Ok(())
}
