use attach_rate::attach_rate::entries_to_dataframe;
use attach_rate::column_resolver::{resolve_columns, CanonicalField};
use attach_rate::export::export_report;
use attach_rate::ingestion::load_table;
use attach_rate::query::{filter_keys, key_domain, KeySelection};
use attach_rate::{AnalysisConfig, AnalysisReport, AnalysisSession, ConfigOverrides, Dimension};

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use polars::prelude::{NamedFrom, Series};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "attach-rate-explorer")]
#[command(about = "Option attach-rate and frequent-pair analysis over ERP order lines")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how the file's headers map to order-line fields
    Columns {
        /// Order-lines file (.csv or .xlsx)
        file: PathBuf,
    },
    /// List grouping keys with their order totals
    Keys {
        /// Order-lines file (.csv or .xlsx)
        file: PathBuf,

        /// Dimension used to group base lines
        #[arg(short, long, value_enum, default_value_t = Dimension::Item)]
        grouping: Dimension,

        /// Case-insensitive substring filter
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Compute attach rates and option pairs for one key
    Analyze {
        /// Order-lines file (.csv or .xlsx)
        file: PathBuf,

        #[command(flatten)]
        options: AnalyzeOptions,
    },
}

#[derive(ClapArgs)]
struct AnalyzeOptions {
    /// JSON file with analysis parameters (flags below override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dimension used to group base lines
    #[arg(short, long, value_enum)]
    grouping: Option<Dimension>,

    /// Dimension read from option lines
    #[arg(short, long, value_enum)]
    attribute: Option<Dimension>,

    /// Key value to analyse
    #[arg(short, long)]
    key: Option<String>,

    /// Pick the first key containing this text when --key is not given
    #[arg(short, long)]
    filter: Option<String>,

    /// Minimum attach rate, 0.0 - 1.0
    #[arg(long)]
    min_rate: Option<f64>,

    /// Number of options and pairs to show
    #[arg(short = 'n', long, allow_negative_numbers = true)]
    top_n: Option<i64>,

    /// Directory for CSV exports
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Print the report as JSON instead of tables
    #[arg(long)]
    json: bool,
}

impl AnalyzeOptions {
    fn into_config(self) -> Result<(AnalysisConfig, bool)> {
        let base = match &self.config {
            Some(path) => AnalysisConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => AnalysisConfig::default(),
        };

        let config = base.merge_overrides(ConfigOverrides {
            grouping: self.grouping,
            attribute: self.attribute,
            key: self.key,
            key_filter: self.filter,
            min_attach_rate: self.min_rate,
            top_n: self.top_n,
            output_dir: self.output_dir,
        });

        Ok((config, self.json))
    }
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Columns { file } => show_columns(file),
        Commands::Keys {
            file,
            grouping,
            filter,
        } => show_keys(file, grouping, filter),
        Commands::Analyze { file, options } => {
            let (config, json) = options.into_config()?;
            analyze(file, config, json)
        }
    }
}

fn show_columns(file: PathBuf) -> Result<()> {
    let raw = load_table(&file).with_context(|| format!("Failed to read {}", file.display()))?;
    let mapping = resolve_columns(&raw.headers);

    println!("\n{}", "=".repeat(60));
    println!(" COLUMN RESOLUTION: {}", file.display());
    println!("{}", "=".repeat(60));
    for field in CanonicalField::ALL {
        let required = if field.is_required() { "required" } else { "optional" };
        match mapping.get(field) {
            Some(header) => println!("  {:<13} ({}) <- '{}'", field.label(), required, header),
            None => println!("  {:<13} ({}) <- (absent)", field.label(), required),
        }
    }

    let dimensions: Vec<String> = mapping
        .available_dimensions()
        .iter()
        .map(|d| d.to_string())
        .collect();
    println!("\n  Available dimensions: {}", dimensions.join(", "));

    mapping.require()?;
    Ok(())
}

fn show_keys(file: PathBuf, grouping: Dimension, filter: Option<String>) -> Result<()> {
    let session = AnalysisSession::open(&file)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    let table = session.attach_rates(grouping, Dimension::Item)?;

    let domain = key_domain(&table);
    let keys = filter_keys(&domain, filter.as_deref().unwrap_or(""));

    println!("\n{} {} key(s) ({} total)", keys.len(), grouping, domain.len());
    for key in keys {
        println!("  {:<24} {:>8} orders", key, table.total_orders(key).unwrap_or(0));
    }
    Ok(())
}

fn analyze(file: PathBuf, config: AnalysisConfig, json: bool) -> Result<()> {
    info!("Analysing {} grouped by {}", file.display(), config.grouping);

    let session = AnalysisSession::open(&file)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    let report = session.run(&config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &config)?;
    }

    if let Some(dir) = &config.output_dir {
        let paths = export_report(&report, dir)
            .with_context(|| format!("Failed to export to {}", dir.display()))?;
        println!("\n Downloads:");
        for path in [paths.full, paths.per_key, paths.pairs].into_iter().flatten() {
            println!("  - {}", path.display());
        }
    }

    Ok(())
}

fn print_report(report: &AnalysisReport, config: &AnalysisConfig) -> Result<()> {
    println!("\n{}", "=".repeat(80));
    println!(
        " ATTACH RATES: {} keys, {} entries (grouping: {}, attribute: {})",
        report.attach.totals.len(),
        report.attach.entries.len(),
        config.grouping,
        config.attribute
    );
    println!("{}", "=".repeat(80));

    let Some(key) = report.selected_key() else {
        if let KeySelection::Empty { reason } = &report.selection {
            println!("\n No key selected: {}", reason);
        }
        return Ok(());
    };

    println!(
        "\n Top options for {} ({} orders, attach rate >= {:.2})",
        key,
        report.attach.total_orders(key).unwrap_or(0),
        config.min_attach_rate
    );
    let mut top = entries_to_dataframe(&report.top_options, config.grouping, config.attribute)?;
    if !report.descriptions.is_empty() {
        let descriptions: Vec<Option<&str>> = report
            .top_options
            .iter()
            .map(|e| report.descriptions.get(&e.attribute_value).map(|s| s.as_str()))
            .collect();
        top.with_column(Series::new("DESCRIPTION", descriptions))?;
    }
    println!("{}", top);

    match &report.pairs {
        Some(pairs) if !pairs.is_empty() => {
            println!("\n Frequent option pairs");
            println!("{}", pairs.to_dataframe()?);
        }
        _ => println!("\n No option pairs for {}", key),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn analyze_config(argv: &[&str]) -> (PathBuf, AnalysisConfig, bool) {
        let args = Args::try_parse_from(argv).unwrap();
        match args.command {
            Commands::Analyze { file, options } => {
                let (config, json) = options.into_config().unwrap();
                (file, config, json)
            }
            _ => panic!("expected analyze subcommand"),
        }
    }

    #[test]
    fn test_analyze_defaults() {
        let (file, config, json) =
            analyze_config(&["attach-rate-explorer", "analyze", "orders.csv"]);
        assert_eq!(file, PathBuf::from("orders.csv"));
        assert_eq!(config, AnalysisConfig::default());
        assert!(!json);
    }

    #[test]
    fn test_analyze_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"grouping": "product-code", "top_n": 7, "min_attach_rate": 0.3}}"#
        )
        .unwrap();
        let config_path = file.path().to_str().unwrap().to_string();

        let (_, config, json) = analyze_config(&[
            "attach-rate-explorer",
            "analyze",
            "orders.xlsx",
            "-c",
            &config_path,
            "-a",
            "family-code",
            "-k",
            "PC1",
            "-n",
            "3",
            "--json",
        ]);

        assert_eq!(config.grouping, Dimension::ProductCode);
        assert_eq!(config.attribute, Dimension::FamilyCode);
        assert_eq!(config.key.as_deref(), Some("PC1"));
        assert_eq!(config.top_n, 3);
        assert_eq!(config.min_attach_rate, 0.3);
        assert!(json);
    }

    #[test]
    fn test_negative_top_n_parses_and_fails_validation() {
        let (_, config, _) =
            analyze_config(&["attach-rate-explorer", "analyze", "orders.csv", "-n", "-2"]);
        assert_eq!(config.top_n, -2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keys_and_columns_subcommands_parse() {
        let args = Args::try_parse_from([
            "attach-rate-explorer",
            "keys",
            "orders.csv",
            "-g",
            "family-code",
            "-f",
            "fc",
        ])
        .unwrap();
        match args.command {
            Commands::Keys { grouping, filter, .. } => {
                assert_eq!(grouping, Dimension::FamilyCode);
                assert_eq!(filter.as_deref(), Some("fc"));
            }
            _ => panic!("expected keys subcommand"),
        }

        let args = Args::try_parse_from(["attach-rate-explorer", "columns", "orders.csv"]).unwrap();
        assert!(matches!(args.command, Commands::Columns { .. }));
        let bad = ["attach-rate-explorer", "analyze", "orders.csv", "-g", "colour"];
        assert!(Args::try_parse_from(bad).is_err());
    }
}
