//! Locating the labeled CSV blocks inside the model's reply.
//!
//! A section is the marker token, optional whitespace, an opening fence
//! tagged `csv`, and everything up to the next closing fence. Anything
//! outside the two sections is ignored.

use crate::extraction::csv::{parse_csv, CsvRow};
use crate::extraction::records::{annual_records, monthly_records};
use crate::models::ExtractionResult;
use tracing::debug;

/// Marker preceding the monthly block.
pub const MONTHLY_MARKER: &str = "MONTHLY_DATA_CSV";

/// Marker preceding the annual block.
pub const ANNUAL_MARKER: &str = "ANNUAL_DATA_CSV";

const OPEN_FENCE: &str = "```csv";
const FENCE: &str = "```";

/// Return the body of the first `marker` + fenced-csv section, if any.
///
/// Occurrences of the marker that are not followed (after whitespace) by
/// an opening fence are skipped. An unterminated block does not count.
pub fn find_section<'a>(response: &'a str, marker: &str) -> Option<&'a str> {
    let mut search_from = 0;

    while let Some(offset) = response[search_from..].find(marker) {
        let after_marker = search_from + offset + marker.len();
        let rest = &response[after_marker..];
        let fenced = rest.trim_start();

        if let Some(body_start) = fenced.strip_prefix(OPEN_FENCE) {
            let body = body_start.trim_start();
            if let Some(end) = body.find(FENCE) {
                return Some(&body[..end]);
            }
            return None;
        }

        search_from = after_marker;
    }

    None
}

/// Parse the rows of one named section, or nothing if it is absent.
pub fn section_rows(response: &str, marker: &str) -> Vec<CsvRow> {
    match find_section(response, marker) {
        Some(block) => parse_csv(block),
        None => {
            debug!("No {} section in model response", marker);
            Vec::new()
        }
    }
}

/// Unpack a model reply into typed monthly and annual records.
///
/// Missing sections produce empty sequences; this never fails.
pub fn unpack_response(response: &str) -> ExtractionResult {
    let monthly_rows = section_rows(response, MONTHLY_MARKER);
    let annual_rows = section_rows(response, ANNUAL_MARKER);

    ExtractionResult {
        monthly_data: monthly_records(&monthly_rows),
        annual_data: annual_records(&annual_rows),
        raw_response: response.to_string(),
    }
}
