//! Markdown analysis report generation.
//!
//! This module turns monthly and annual metric records into the narrative
//! sustainability report stored alongside each extraction. Output depends
//! only on the two record sequences.

use crate::analysis::{
    comparison_pair, distinct_years, dominant_metric, records_per_year, year_over_year,
    MetricChange,
};
use crate::models::{AnnualRecord, MonthlyRecord};
use anyhow::Result;
use format_num::format_num;
use serde::Serialize;

/// Returned verbatim when there is nothing to report on.
pub const NO_DATA_MESSAGE: &str = "No sustainability data could be extracted from the provided document. Please ensure the document contains monthly environmental metrics (CO₂ emissions, plastic waste, water usage, or energy usage) with clear dates and values.";

/// Format a number with grouped thousands and at most three decimals.
///
/// `1200.5` renders as `1,200.5` and `5000` as `5,000`.
pub fn format_grouped(value: f64) -> String {
    let formatted = format_num!(",.3f", value);
    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}

fn join_years(years: &[i32]) -> String {
    years
        .iter()
        .map(|y| y.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Generate the complete analysis report.
pub fn generate_analysis_report(monthly: &[MonthlyRecord], annual: &[AnnualRecord]) -> String {
    if monthly.is_empty() && annual.is_empty() {
        return NO_DATA_MESSAGE.to_string();
    }

    let years = distinct_years(annual);
    let mut output = String::new();

    output.push_str("# Sustainability Analysis Report\n\n");
    output.push_str(&generate_headline_section(monthly, annual, &years));
    output.push_str(&generate_totals_section(annual));
    output.push_str(&generate_coverage_section(monthly, &years));

    if let Some((previous, latest)) = comparison_pair(annual) {
        output.push_str("## Key Insights\n\n");
        output.push_str(&generate_comparison(previous, latest));
    }

    output.push_str(&generate_notes());

    output
}

/// Generate the headline paragraph.
fn generate_headline_section(
    monthly: &[MonthlyRecord],
    annual: &[AnnualRecord],
    years: &[i32],
) -> String {
    let mut section = String::new();

    section.push_str("## Headline Summary\n\n");
    if years.is_empty() {
        section.push_str("No annual totals were extracted. ");
    } else {
        section.push_str(&format!(
            "This analysis covers data from {}. ",
            join_years(years)
        ));
    }
    section.push_str(&format!(
        "We successfully extracted {} monthly records across {} year(s).",
        monthly.len(),
        years.len()
    ));

    let latest = years
        .last()
        .and_then(|year| annual.iter().find(|a| a.year == *year));
    if let Some(latest) = latest {
        let (metric, value) = dominant_metric(latest);
        section.push_str(&format!(
            " For {}, total {} was {} {}.",
            latest.year,
            metric.phrase(),
            format_grouped(value),
            metric.unit()
        ));
    }
    section.push_str("\n\n");

    section
}

/// Generate the annual totals table, in input order.
fn generate_totals_section(annual: &[AnnualRecord]) -> String {
    if annual.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Annual Totals\n\n");
    section.push_str("| Year | CO₂ (kg) | Plastic (lbs) | Water (gal) | Energy (kWh) |\n");
    section.push_str("|------|----------|---------------|-------------|--------------|\n");

    for record in annual {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            record.year,
            format_grouped(record.co2_kg),
            format_grouped(record.plastic_lbs),
            format_grouped(record.water_gal),
            format_grouped(record.energy_kwh)
        ));
    }
    section.push('\n');

    section
}

/// Generate the data coverage statistics.
fn generate_coverage_section(monthly: &[MonthlyRecord], years: &[i32]) -> String {
    let mut section = String::new();

    let average = match records_per_year(monthly.len(), years.len()) {
        Some(avg) => format!("{:.1}", avg),
        None => "N/A".to_string(),
    };
    let covered = if years.is_empty() {
        "none".to_string()
    } else {
        join_years(years)
    };

    section.push_str("## Data Coverage\n\n");
    section.push_str(&format!("- Total monthly records: {}\n", monthly.len()));
    section.push_str(&format!("- Years covered: {}\n", covered));
    section.push_str(&format!("- Average records per year: {}\n\n", average));

    section
}

/// Generate the year-over-year comparison block.
fn generate_comparison(previous: &AnnualRecord, latest: &AnnualRecord) -> String {
    let mut block = String::new();

    block.push_str(&format!("Compared to {}:\n\n", previous.year));
    for change in year_over_year(previous, latest) {
        block.push_str(&generate_change_line(&change, previous.year));
    }
    block.push('\n');

    block
}

/// Render one metric's change.
fn generate_change_line(change: &MetricChange, previous_year: i32) -> String {
    let direction = change.direction.as_str();
    let percent = match change.percent {
        Some(pct) => format!("{:.1}% {}", pct.abs(), direction),
        None => format!("percent change N/A, {} value was 0", previous_year),
    };

    format!(
        "- **{}**: {} by {} {} ({})\n",
        change.metric.label(),
        direction,
        format_grouped(change.change.abs()),
        change.metric.unit(),
        percent
    )
}

/// Generate the closing disclaimer.
fn generate_notes() -> String {
    let mut notes = String::new();

    notes.push_str("## Notes\n\n");
    notes.push_str("This analysis is based on the data extracted from your sustainability documents. ");
    notes.push_str("All values have been normalized to standard units (CO₂ in kg, plastic in lbs, water in gallons, energy in kWh). ");
    notes.push_str("For regulatory compliance or formal reporting, please consult with a qualified sustainability professional.\n");

    notes
}

/// Generate a JSON document for any stored result.
pub fn generate_json_report<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(Into::into)
}
