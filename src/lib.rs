pub mod attach_rate;
pub mod column_resolver;
pub mod config;
pub mod cooccurrence;
pub mod error;
pub mod export;
pub mod ingestion;
pub mod query;
pub mod session;
pub mod splitter;

pub use config::{AnalysisConfig, ConfigOverrides, Dimension};
pub use error::{AttachError, Result};
pub use session::{AnalysisReport, AnalysisSession};
