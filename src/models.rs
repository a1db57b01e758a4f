//! Data models for sustainability tracking.
//!
//! This module contains the core data structures used throughout the
//! application: extracted metric records, uploads and their processing
//! status, stored extractions and per-period analysis roll-ups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four tracked environmental metrics.
///
/// Declaration order is the tie-break order used when picking a dominant
/// metric: CO₂ first, then plastic, water and energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Co2,
    Plastic,
    Water,
    Energy,
}

impl Metric {
    /// All metrics in their fixed reporting order.
    pub const ALL: [Metric; 4] = [Metric::Co2, Metric::Plastic, Metric::Water, Metric::Energy];

    /// Lowercase phrase used inside sentences ("total CO₂ emissions was ...").
    pub fn phrase(&self) -> &'static str {
        match self {
            Metric::Co2 => "CO₂ emissions",
            Metric::Plastic => "plastic waste",
            Metric::Water => "water usage",
            Metric::Energy => "energy consumption",
        }
    }

    /// Capitalized label used in list items.
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Co2 => "CO₂ emissions",
            Metric::Plastic => "Plastic waste",
            Metric::Water => "Water usage",
            Metric::Energy => "Energy consumption",
        }
    }

    /// Standard unit every value of this metric is normalized to.
    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Co2 => "kg",
            Metric::Plastic => "lbs",
            Metric::Water => "gallons",
            Metric::Energy => "kWh",
        }
    }

    /// CSV column name for this metric.
    pub fn column(&self) -> &'static str {
        match self {
            Metric::Co2 => "co2_kg",
            Metric::Plastic => "plastic_lbs",
            Metric::Water => "water_gal",
            Metric::Energy => "energy_kwh",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Metric values for a single month, normalized to standard units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRecord {
    pub year: i32,
    /// Month number, 1-12.
    pub month: u32,
    pub month_label: String,
    pub co2_kg: f64,
    pub plastic_lbs: f64,
    pub water_gal: f64,
    pub energy_kwh: f64,
}

impl MonthlyRecord {
    /// Value of the given metric for this month.
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Co2 => self.co2_kg,
            Metric::Plastic => self.plastic_lbs,
            Metric::Water => self.water_gal,
            Metric::Energy => self.energy_kwh,
        }
    }
}

/// Metric totals for a single year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualRecord {
    pub year: i32,
    pub co2_kg: f64,
    pub plastic_lbs: f64,
    pub water_gal: f64,
    pub energy_kwh: f64,
}

impl AnnualRecord {
    /// Creates an all-zero record for `year`.
    pub fn empty(year: i32) -> Self {
        Self {
            year,
            co2_kg: 0.0,
            plastic_lbs: 0.0,
            water_gal: 0.0,
            energy_kwh: 0.0,
        }
    }

    /// Value of the given metric for this year.
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Co2 => self.co2_kg,
            Metric::Plastic => self.plastic_lbs,
            Metric::Water => self.water_gal,
            Metric::Energy => self.energy_kwh,
        }
    }

    /// Adds a month's values onto this year's totals.
    pub fn accumulate(&mut self, month: &MonthlyRecord) {
        for metric in Metric::ALL {
            *self.value_mut(metric) += month.value(metric);
        }
    }

    fn value_mut(&mut self, metric: Metric) -> &mut f64 {
        match metric {
            Metric::Co2 => &mut self.co2_kg,
            Metric::Plastic => &mut self.plastic_lbs,
            Metric::Water => &mut self.water_gal,
            Metric::Energy => &mut self.energy_kwh,
        }
    }
}

/// Output of one extraction pass, before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub monthly_data: Vec<MonthlyRecord>,
    pub annual_data: Vec<AnnualRecord>,
    /// The model's reply, verbatim.
    pub raw_response: String,
}

/// Processing status of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploading,
    Processing,
    Processed,
    Error,
}

impl UploadStatus {
    /// The exact string persisted and shown to clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Uploading => "uploading",
            UploadStatus::Processing => "processing",
            UploadStatus::Processed => "processed",
            UploadStatus::Error => "error",
        }
    }

    /// Parses a persisted status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(UploadStatus::Uploading),
            "processing" => Some(UploadStatus::Processing),
            "processed" => Some(UploadStatus::Processed),
            "error" => Some(UploadStatus::Error),
            _ => None,
        }
    }

    /// Whether this status ends a processing attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Processed | UploadStatus::Error)
    }

    /// Returns an emoji representation of the status.
    pub fn emoji(&self) -> &'static str {
        match self {
            UploadStatus::Uploading => "📤",
            UploadStatus::Processing => "⏳",
            UploadStatus::Processed => "✅",
            UploadStatus::Error => "❌",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user-submitted document and its processing status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: String,
    pub user_id: String,
    /// Original file name as submitted.
    pub file_name: String,
    /// MIME type inferred at intake.
    pub file_type: String,
    /// Size in bytes.
    pub file_size: u64,
    /// Where the stored copy lives.
    pub file_path: String,
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    /// Set only when the upload reaches `processed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

/// A persisted extraction together with its generated report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredExtraction {
    pub id: String,
    pub upload_id: String,
    pub user_id: String,
    pub monthly_data: Vec<MonthlyRecord>,
    pub annual_data: Vec<AnnualRecord>,
    pub analysis_report: String,
    pub raw_response: String,
    pub extracted_at: DateTime<Utc>,
}

/// Listing view of a stored extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub id: String,
    pub upload_id: String,
    pub file_name: Option<String>,
    pub monthly_record_count: usize,
    pub annual_record_count: usize,
    /// Distinct years in the annual data, in first-seen order.
    pub years: Vec<i32>,
    pub extracted_at: DateTime<Utc>,
}

/// Scope 1/2/3 emissions split.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmissionsBreakdown {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope3: Option<f64>,
}

/// Emissions attributed to one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEmission {
    pub category: String,
    pub value: f64,
    pub percentage: f64,
}

/// A per-period analysis roll-up, unique per (user, period).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: String,
    pub user_id: String,
    pub period: String,
    /// Percentage of expected metric fields that are populated, 0-100.
    pub data_coverage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_emissions: Option<f64>,
    pub emissions_unit: String,
    pub framework: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub emissions_breakdown: EmissionsBreakdown,
    #[serde(default)]
    pub emissions_by_category: Vec<CategoryEmission>,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub insights: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating or updating an analysis.
///
/// `period` and `data_coverage` are required; see [`AnalysisInput::validate`].
/// On update, fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub period: Option<String>,
    pub data_coverage: Option<f64>,
    pub total_emissions: Option<f64>,
    pub emissions_unit: Option<String>,
    pub framework: Option<String>,
    pub summary: Option<String>,
    pub emissions_breakdown: Option<EmissionsBreakdown>,
    pub emissions_by_category: Option<Vec<CategoryEmission>>,
    pub missing_fields: Option<Vec<String>>,
    pub insights: Option<Vec<String>>,
}

impl AnalysisInput {
    /// Checks required fields, returning the period and coverage on success.
    pub fn validate(&self) -> Result<(&str, f64), crate::error::ValidationError> {
        use crate::error::ValidationError;

        let period = match self.period.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => p,
            _ => return Err(ValidationError::MissingPeriodOrCoverage),
        };
        let coverage = self
            .data_coverage
            .ok_or(ValidationError::MissingPeriodOrCoverage)?;
        if !(0.0..=100.0).contains(&coverage) {
            return Err(ValidationError::CoverageOutOfRange(coverage));
        }

        Ok((period, coverage))
    }
}

/// Whether an upsert created a new analysis or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// One entry in the dashboard history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisHistoryEntry {
    pub id: String,
    pub period: String,
    pub date: DateTime<Utc>,
    pub coverage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Dashboard roll-up for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub data_coverage: f64,
    pub last_analysis_date: Option<DateTime<Utc>>,
    pub framework: String,
    pub total_analyses: i64,
    pub analysis_history: Vec<AnalysisHistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn test_status_strings() {
        for status in [
            UploadStatus::Uploading,
            UploadStatus::Processing,
            UploadStatus::Processed,
            UploadStatus::Error,
        ] {
            assert_eq!(UploadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(UploadStatus::Processed.to_string(), "processed");
        assert_eq!(UploadStatus::parse("done"), None);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!UploadStatus::Uploading.is_terminal());
        assert!(!UploadStatus::Processing.is_terminal());
        assert!(UploadStatus::Processed.is_terminal());
        assert!(UploadStatus::Error.is_terminal());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&UploadStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn test_annual_accumulate() {
        let mut annual = AnnualRecord::empty(2020);
        let month = MonthlyRecord {
            year: 2020,
            month: 1,
            month_label: "January".to_string(),
            co2_kg: 10.0,
            plastic_lbs: 1.5,
            water_gal: 100.0,
            energy_kwh: 50.0,
        };
        annual.accumulate(&month);
        annual.accumulate(&month);
        assert_eq!(annual.co2_kg, 20.0);
        assert_eq!(annual.value(Metric::Plastic), 3.0);
        assert_eq!(annual.value(Metric::Energy), 100.0);
        assert_eq!(annual.water_gal, month.value(Metric::Water) * 2.0);
    }

    #[test]
    fn test_analysis_input_validation() {
        let mut input = AnalysisInput {
            period: Some("FY2024".to_string()),
            data_coverage: Some(72.5),
            ..Default::default()
        };
        assert_eq!(input.validate().unwrap(), ("FY2024", 72.5));

        input.data_coverage = None;
        assert_eq!(
            input.validate().unwrap_err(),
            ValidationError::MissingPeriodOrCoverage
        );

        input.data_coverage = Some(120.0);
        assert_eq!(
            input.validate().unwrap_err(),
            ValidationError::CoverageOutOfRange(120.0)
        );

        input.period = Some("   ".to_string());
        assert_eq!(
            input.validate().unwrap_err(),
            ValidationError::MissingPeriodOrCoverage
        );
    }
}
