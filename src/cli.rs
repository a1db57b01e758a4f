//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::Provider;
use crate::models::{AnalysisInput, CategoryEmission, EmissionsBreakdown};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// EcoTally - sustainability metrics from everyday documents
///
/// Upload utility bills, reports and spreadsheets; a language model pulls
/// out monthly CO₂, plastic, water and energy figures, and EcoTally stores
/// them with a written analysis you can read or export as CSV.
///
/// Examples:
///   ecotally upload bills/ --user acme
///   ecotally status 4f1c... --user acme
///   ecotally export 4f1c... monthly --user acme
///   ecotally analysis set --user acme --period FY2024 --coverage 72.5
///   ecotally init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .ecotally.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the database and stored uploads
    #[arg(long, value_name = "DIR", env = "ECOTALLY_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Number of uploads processed at the same time
    #[arg(long, value_name = "NUM", global = true)]
    pub concurrency: Option<usize>,

    /// Model provider (anthropic, ollama)
    #[arg(long, value_name = "PROVIDER", global = true)]
    pub provider: Option<Provider>,

    /// Model used for extraction
    #[arg(short, long, env = "ECOTALLY_MODEL", global = true)]
    pub model: Option<String>,

    /// Base URL of the model API
    #[arg(long, value_name = "URL", env = "ECOTALLY_MODEL_URL", global = true)]
    pub model_url: Option<String>,

    /// Model call timeout in seconds
    ///
    /// An upload whose model call exceeds this ends in `error`.
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Output format for listings (text, json)
    #[arg(long, default_value = "text", value_name = "FORMAT", global = true)]
    pub format: OutputFormat,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    #[default]
    Text,
    /// JSON format
    Json,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate a default .ecotally.toml configuration file
    InitConfig,

    /// Upload documents (files or directories) for extraction
    Upload {
        /// Files or directories to upload
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        #[arg(short, long, env = "ECOTALLY_USER")]
        user: String,

        /// Print the analysis report of each processed upload
        #[arg(long)]
        show_report: bool,
    },

    /// Show the processing status of an upload
    Status {
        upload_id: String,
        #[arg(short, long, env = "ECOTALLY_USER")]
        user: String,
    },

    /// List recent uploads
    Uploads {
        #[arg(short, long, env = "ECOTALLY_USER")]
        user: String,
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Delete an upload, its stored file and its extraction
    Delete {
        upload_id: String,
        #[arg(short, long, env = "ECOTALLY_USER")]
        user: String,
    },

    /// List recent extractions
    Extractions {
        #[arg(short, long, env = "ECOTALLY_USER")]
        user: String,
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Print the analysis report of a processed upload
    Report {
        upload_id: String,
        #[arg(short, long, env = "ECOTALLY_USER")]
        user: String,
    },

    /// Export extracted records as CSV
    Export {
        upload_id: String,
        /// Which records to export (monthly, annual)
        #[arg(value_name = "TYPE")]
        kind: String,
        #[arg(short, long, env = "ECOTALLY_USER")]
        user: String,
        /// Output file; defaults to sustainability-<type>-<upload-id>.csv
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Manage per-period analysis roll-ups
    Analysis {
        #[command(subcommand)]
        action: AnalysisCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum AnalysisCommand {
    /// Create or update the analysis for a period
    Set(AnalysisSetArgs),

    /// Show the analysis for a period, or the latest one
    Get {
        #[arg(short, long, env = "ECOTALLY_USER")]
        user: String,
        #[arg(short, long)]
        period: Option<String>,
    },

    /// List periods that have an analysis
    Periods {
        #[arg(short, long, env = "ECOTALLY_USER")]
        user: String,
    },

    /// Show coverage and recent analysis history
    Dashboard {
        #[arg(short, long, env = "ECOTALLY_USER")]
        user: String,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct AnalysisSetArgs {
    #[arg(short, long, env = "ECOTALLY_USER")]
    pub user: String,

    /// Start from a JSON document; flags override its fields
    #[arg(long, value_name = "FILE")]
    pub from_json: Option<PathBuf>,

    /// Reporting period label, e.g. FY2024
    #[arg(short, long)]
    pub period: Option<String>,

    /// Data coverage percentage (0-100)
    #[arg(long, value_name = "PERCENT")]
    pub coverage: Option<f64>,

    #[arg(long)]
    pub total_emissions: Option<f64>,

    #[arg(long, value_name = "UNIT")]
    pub unit: Option<String>,

    #[arg(long)]
    pub framework: Option<String>,

    #[arg(long)]
    pub summary: Option<String>,

    #[arg(long)]
    pub scope1: Option<f64>,

    #[arg(long)]
    pub scope2: Option<f64>,

    #[arg(long)]
    pub scope3: Option<f64>,

    /// Category emission as NAME:VALUE:PERCENT (repeatable)
    #[arg(long = "category", value_name = "NAME:VALUE:PERCENT", value_parser = parse_category)]
    pub categories: Vec<CategoryEmission>,

    /// Fields missing from the source data (comma-separated)
    #[arg(long = "missing", value_delimiter = ',')]
    pub missing_fields: Vec<String>,

    /// Insight text (repeatable)
    #[arg(long = "insight")]
    pub insights: Vec<String>,
}

fn parse_category(s: &str) -> Result<CategoryEmission, String> {
    let mut parts = s.rsplitn(3, ':');
    let (Some(percentage), Some(value), Some(category)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected NAME:VALUE:PERCENT, got '{s}'"));
    };

    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid value '{value}'"))?;
    let percentage = percentage
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid percentage '{percentage}'"))?;

    Ok(CategoryEmission {
        category: category.trim().to_string(),
        value,
        percentage,
    })
}

impl AnalysisSetArgs {
    /// Build the upsert input: the JSON file first, then any flags given.
    pub fn to_input(&self) -> Result<AnalysisInput> {
        let mut input = match self.from_json {
            Some(ref path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
            None => AnalysisInput::default(),
        };

        if self.period.is_some() {
            input.period = self.period.clone();
        }
        if self.coverage.is_some() {
            input.data_coverage = self.coverage;
        }
        if self.total_emissions.is_some() {
            input.total_emissions = self.total_emissions;
        }
        if self.unit.is_some() {
            input.emissions_unit = self.unit.clone();
        }
        if self.framework.is_some() {
            input.framework = self.framework.clone();
        }
        if self.summary.is_some() {
            input.summary = self.summary.clone();
        }

        if self.scope1.is_some() || self.scope2.is_some() || self.scope3.is_some() {
            let mut breakdown: EmissionsBreakdown =
                input.emissions_breakdown.take().unwrap_or_default();
            breakdown.scope1 = self.scope1.or(breakdown.scope1);
            breakdown.scope2 = self.scope2.or(breakdown.scope2);
            breakdown.scope3 = self.scope3.or(breakdown.scope3);
            input.emissions_breakdown = Some(breakdown);
        }
        if !self.categories.is_empty() {
            input.emissions_by_category = Some(self.categories.clone());
        }
        if !self.missing_fields.is_empty() {
            input.missing_fields = Some(self.missing_fields.clone());
        }
        if !self.insights.is_empty() {
            input.insights = Some(self.insights.clone());
        }

        Ok(input)
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(concurrency) = self.concurrency {
            if concurrency == 0 {
                return Err("Concurrency must be at least 1".to_string());
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(ref url) = self.model_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Model URL must start with 'http://' or 'https://'".to_string());
            }
        }

        match &self.command {
            Command::Uploads { limit, .. } | Command::Extractions { limit, .. } if *limit == 0 => {
                Err("Limit must be at least 1".to_string())
            }
            Command::Upload { paths, .. } => {
                for path in paths {
                    if !path.exists() {
                        return Err(format!("Path does not exist: {}", path.display()));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_upload() {
        let args = parse(&["ecotally", "upload", "Cargo.toml", "--user", "acme", "--show-report"]);
        match args.command {
            Command::Upload {
                ref paths,
                ref user,
                show_report,
            } => {
                assert_eq!(paths, &vec![PathBuf::from("Cargo.toml")]);
                assert_eq!(user, "acme");
                assert!(show_report);
            }
            ref other => panic!("unexpected command {other:?}"),
        }
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&[
            "ecotally", "uploads", "--user", "acme", "--provider", "ollama", "--timeout", "30",
        ]);
        assert_eq!(args.provider, Some(Provider::Ollama));
        assert_eq!(args.timeout, Some(30));
        assert!(matches!(args.command, Command::Uploads { limit: 10, .. }));
    }

    #[test]
    fn test_validation_missing_path() {
        let args = parse(&["ecotally", "upload", "/definitely/not/here.pdf", "--user", "a"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let args = parse(&["ecotally", "-v", "-q", "init-config"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_limit() {
        let args = parse(&["ecotally", "extractions", "--user", "a", "--limit", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = parse(&["ecotally", "init-config"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_parse_category() {
        let c = parse_category("Business travel:12.5:40").unwrap();
        assert_eq!(c.category, "Business travel");
        assert_eq!(c.value, 12.5);
        assert_eq!(c.percentage, 40.0);
        assert!(parse_category("Travel:abc:1").is_err());
        assert!(parse_category("Travel").is_err());
    }

    #[test]
    fn test_analysis_set_input() {
        let args = parse(&[
            "ecotally", "analysis", "set", "--user", "acme", "--period", "FY2024", "--coverage",
            "72.5", "--scope2", "3.1", "--category", "Electricity:3.1:60", "--missing",
            "water,waste", "--insight", "Heating dominates",
        ]);
        let Command::Analysis {
            action: AnalysisCommand::Set(set),
        } = args.command
        else {
            panic!("expected analysis set");
        };

        let input = set.to_input().unwrap();
        assert_eq!(input.period.as_deref(), Some("FY2024"));
        assert_eq!(input.data_coverage, Some(72.5));
        assert_eq!(input.emissions_breakdown.unwrap().scope2, Some(3.1));
        assert_eq!(input.emissions_by_category.unwrap().len(), 1);
        assert_eq!(
            input.missing_fields,
            Some(vec!["water".to_string(), "waste".to_string()])
        );
        assert!(input.summary.is_none());
        assert!(input.insights.is_some());
    }

    #[test]
    fn test_analysis_set_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"period": "FY2023", "data_coverage": 50, "summary": "from file"}"#,
        )
        .unwrap();

        let set = AnalysisSetArgs {
            user: "acme".to_string(),
            from_json: Some(file.path().to_path_buf()),
            coverage: Some(65.0),
            ..Default::default()
        };
        let input = set.to_input().unwrap();
        assert_eq!(input.period.as_deref(), Some("FY2023"));
        assert_eq!(input.data_coverage, Some(65.0));
        assert_eq!(input.summary.as_deref(), Some("from file"));
    }
}
