//! Conversion of parsed CSV rows into typed metric records.

use crate::extraction::csv::{Cell, CsvRow};
use crate::models::{AnnualRecord, Metric, MonthlyRecord};
use chrono::Month;
use tracing::warn;

fn integer_cell(row: &CsvRow, column: &str) -> Option<i64> {
    let n = row.get(column)?.as_number()?;
    (n.fract() == 0.0).then_some(n as i64)
}

/// Metric value from a row; absent, blank, non-numeric and negative cells count as zero.
fn metric_cell(row: &CsvRow, metric: Metric) -> f64 {
    match row.get(metric.column()).and_then(Cell::as_number) {
        Some(n) if n >= 0.0 => n,
        Some(n) => {
            warn!("Ignoring negative {} value {}", metric.column(), n);
            0.0
        }
        None => 0.0,
    }
}

/// English month name for a 1-based month number.
pub fn month_name(month: u32) -> Option<&'static str> {
    u8::try_from(month)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .map(|m| m.name())
}

/// Build monthly records, skipping rows without a usable year and month.
pub fn monthly_records(rows: &[CsvRow]) -> Vec<MonthlyRecord> {
    rows.iter()
        .filter_map(|row| {
            let year = integer_cell(row, "year").and_then(|y| i32::try_from(y).ok());
            let month = integer_cell(row, "month")
                .and_then(|m| u32::try_from(m).ok())
                .filter(|m| (1..=12).contains(m));

            let (Some(year), Some(month)) = (year, month) else {
                warn!("Skipping monthly row without a valid year/month: {:?}", row);
                return None;
            };

            let month_label = match row.get("month_label").map(Cell::to_text) {
                Some(label) if !label.is_empty() => label,
                _ => month_name(month).unwrap_or_default().to_string(),
            };

            Some(MonthlyRecord {
                year,
                month,
                month_label,
                co2_kg: metric_cell(row, Metric::Co2),
                plastic_lbs: metric_cell(row, Metric::Plastic),
                water_gal: metric_cell(row, Metric::Water),
                energy_kwh: metric_cell(row, Metric::Energy),
            })
        })
        .collect()
}

/// Build annual records, skipping rows without a usable year.
pub fn annual_records(rows: &[CsvRow]) -> Vec<AnnualRecord> {
    rows.iter()
        .filter_map(|row| {
            let Some(year) = integer_cell(row, "year").and_then(|y| i32::try_from(y).ok()) else {
                warn!("Skipping annual row without a valid year: {:?}", row);
                return None;
            };

            Some(AnnualRecord {
                year,
                co2_kg: metric_cell(row, Metric::Co2),
                plastic_lbs: metric_cell(row, Metric::Plastic),
                water_gal: metric_cell(row, Metric::Water),
                energy_kwh: metric_cell(row, Metric::Energy),
            })
        })
        .collect()
}
