//! CSV reader for the model's fenced blocks.
//!
//! The first line is the header row; every following line is a value row.
//! Quoting is disabled: a comma always separates cells.

use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use tracing::warn;

/// A single parsed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
}

impl Cell {
    /// Converts a raw cell, trimming it first.
    ///
    /// Non-empty cells that parse as a finite number become `Number`;
    /// everything else is kept as (possibly empty) text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            if let Some(n) = parse_number(trimmed) {
                return Cell::Number(n);
            }
        }
        Cell::Text(trimmed.to_string())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(_) => None,
        }
    }

    /// Text form of the cell; numbers are rendered without formatting.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Number(n) => n.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }
}

/// One value row, keyed by header name.
pub type CsvRow = HashMap<String, Cell>;

fn parse_number(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse a header-first CSV block into rows, preserving row order.
///
/// A block with only a header line (or nothing at all) yields no rows.
/// Rows shorter than the header simply lack the trailing keys; cells past
/// the last header are ignored. Blank lines are skipped.
pub fn parse_csv(text: &str) -> Vec<CsvRow> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .quoting(false)
        .trim(Trim::All)
        .from_reader(text.trim().as_bytes());

    let headers = match rdr.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            warn!("Unreadable CSV header row: {}", e);
            return Vec::new();
        }
    };

    rdr.records()
        .filter_map(|record| match record {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping unreadable CSV row: {}", e);
                None
            }
        })
        .filter(|record| !is_blank(record))
        .map(|record| {
            headers
                .iter()
                .zip(record.iter())
                .map(|(header, value)| (header.to_string(), Cell::parse(value)))
                .collect()
        })
        .collect()
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(str::is_empty)
}
