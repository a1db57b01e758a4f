//! CSV export of stored metric records.
//!
//! Values are written raw (no grouping, no rounding), comma-joined and
//! newline-terminated, header row first.

use crate::error::ValidationError;
use crate::models::{AnnualRecord, Metric, MonthlyRecord};
use anyhow::{anyhow, Context, Result};
use csv::{QuoteStyle, Terminator, Writer, WriterBuilder};
use std::fmt;

/// Header row of the monthly export.
pub const MONTHLY_HEADER: &str = "year,month,month_label,co2_kg,plastic_lbs,water_gal,energy_kwh";

/// Header row of the annual export.
pub const ANNUAL_HEADER: &str = "year,co2_kg,plastic_lbs,water_gal,energy_kwh";

/// Which record sequence to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Monthly,
    Annual,
}

impl ExportKind {
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "monthly" => Ok(ExportKind::Monthly),
            "annual" => Ok(ExportKind::Annual),
            other => Err(ValidationError::InvalidExportType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportKind::Monthly => "monthly",
            ExportKind::Annual => "annual",
        }
    }

    /// Download file name for an upload's export.
    pub fn file_name(&self, upload_id: &str) -> String {
        format!("sustainability-{}-{}.csv", self.as_str(), upload_id)
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn raw_writer() -> Writer<Vec<u8>> {
    WriterBuilder::new()
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new())
}

fn finish(wtr: Writer<Vec<u8>>) -> Result<String> {
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush CSV output: {}", e.error()))?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

/// Serialize monthly records to CSV text.
pub fn monthly_to_csv(records: &[MonthlyRecord]) -> Result<String> {
    let mut wtr = raw_writer();
    wtr.write_record(MONTHLY_HEADER.split(','))?;

    for r in records {
        let mut row = vec![r.year.to_string(), r.month.to_string(), r.month_label.clone()];
        row.extend(Metric::ALL.iter().map(|m| r.value(*m).to_string()));
        wtr.write_record(&row)?;
    }

    finish(wtr)
}

/// Serialize annual records to CSV text.
pub fn annual_to_csv(records: &[AnnualRecord]) -> Result<String> {
    let mut wtr = raw_writer();
    wtr.write_record(ANNUAL_HEADER.split(','))?;

    for r in records {
        let mut row = vec![r.year.to_string()];
        row.extend(Metric::ALL.iter().map(|m| r.value(*m).to_string()));
        wtr.write_record(&row)?;
    }

    finish(wtr)
}
