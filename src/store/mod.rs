//! SQLite-backed persistence for uploads, extractions and analyses.
//!
//! Each upload's status row has exactly one writer: the pipeline job that
//! owns the upload id. Status updates are guarded so only the transitions
//! `uploading -> processing -> {processed | error}` can happen.

pub mod migrations;

use crate::config::AnalysisConfig;
use crate::models::{
    Analysis, AnalysisHistoryEntry, AnalysisInput, Dashboard, ExtractionResult, ExtractionSummary,
    StoredExtraction, Upload, UploadStatus, UpsertOutcome,
};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Fields supplied when registering a new upload.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub user_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub file_path: String,
}

/// Handle to the application database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Fixed-width RFC 3339 so that text order equals time order.
fn to_db_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp in database: {s}"))?
        .with_timezone(&Utc))
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn upload_from_row(row: &SqliteRow) -> Result<Upload> {
    let status: String = row.try_get("status")?;
    let processed_at: Option<String> = row.try_get("processed_at")?;
    let file_size: i64 = row.try_get("file_size")?;

    Ok(Upload {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        file_name: row.try_get("file_name")?,
        file_type: row.try_get("file_type")?,
        file_size: u64::try_from(file_size).unwrap_or_default(),
        file_path: row.try_get("file_path")?,
        status: UploadStatus::parse(&status)
            .ok_or_else(|| anyhow!("Unknown upload status in database: {status}"))?,
        error_message: row.try_get("error_message")?,
        uploaded_at: from_db_time(&row.try_get::<String, _>("uploaded_at")?)?,
        processed_at: processed_at.as_deref().map(from_db_time).transpose()?,
    })
}

fn extraction_from_row(row: &SqliteRow) -> Result<StoredExtraction> {
    let monthly: String = row.try_get("monthly_data")?;
    let annual: String = row.try_get("annual_data")?;

    Ok(StoredExtraction {
        id: row.try_get("id")?,
        upload_id: row.try_get("upload_id")?,
        user_id: row.try_get("user_id")?,
        monthly_data: serde_json::from_str(&monthly).context("Corrupt monthly_data column")?,
        annual_data: serde_json::from_str(&annual).context("Corrupt annual_data column")?,
        analysis_report: row.try_get("analysis_report")?,
        raw_response: row.try_get("raw_response")?,
        extracted_at: from_db_time(&row.try_get::<String, _>("extracted_at")?)?,
    })
}

fn analysis_from_row(row: &SqliteRow) -> Result<Analysis> {
    let breakdown: String = row.try_get("emissions_breakdown")?;
    let by_category: String = row.try_get("emissions_by_category")?;
    let missing: String = row.try_get("missing_fields")?;
    let insights: String = row.try_get("insights")?;

    Ok(Analysis {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        period: row.try_get("period")?,
        data_coverage: row.try_get("data_coverage")?,
        total_emissions: row.try_get("total_emissions")?,
        emissions_unit: row.try_get("emissions_unit")?,
        framework: row.try_get("framework")?,
        summary: row.try_get("summary")?,
        emissions_breakdown: serde_json::from_str(&breakdown)?,
        emissions_by_category: serde_json::from_str(&by_category)?,
        missing_fields: serde_json::from_str(&missing)?,
        insights: serde_json::from_str(&insights)?,
        created_at: from_db_time(&row.try_get::<String, _>("created_at")?)?,
        updated_at: from_db_time(&row.try_get::<String, _>("updated_at")?)?,
    })
}

impl Store {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        info!("Opened database {}", path.display());
        Self::from_pool(pool).await
    }

    /// A private in-memory database, used by tests and dry runs.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let version = migrations::current_version(&pool).await?;
        if version > migrations::CURRENT_VERSION {
            bail!(
                "Database schema version {version} is newer than this build supports ({})",
                migrations::CURRENT_VERSION
            );
        }
        migrations::run(&pool, version, migrations::CURRENT_VERSION).await?;
        Ok(Self { pool })
    }

    // ----- uploads -----

    /// Record a new upload in the `uploading` state.
    pub async fn create_upload(&self, new: NewUpload) -> Result<Upload> {
        let upload = Upload {
            id: new_id(),
            user_id: new.user_id,
            file_name: new.file_name,
            file_type: new.file_type,
            file_size: new.file_size,
            file_path: new.file_path,
            status: UploadStatus::Uploading,
            error_message: None,
            uploaded_at: Utc::now(),
            processed_at: None,
        };

        sqlx::query(
            "INSERT INTO uploads (id, user_id, file_name, file_type, file_size, file_path, status, uploaded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&upload.id)
        .bind(&upload.user_id)
        .bind(&upload.file_name)
        .bind(&upload.file_type)
        .bind(i64::try_from(upload.file_size).unwrap_or(i64::MAX))
        .bind(&upload.file_path)
        .bind(upload.status.as_str())
        .bind(to_db_time(&upload.uploaded_at))
        .execute(&self.pool)
        .await
        .context("Failed to insert upload")?;

        info!("Upload {} ({}) is uploading", upload.id, upload.file_name);
        Ok(upload)
    }

    /// `uploading -> processing`.
    pub async fn mark_processing(&self, upload_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE uploads SET status = 'processing' WHERE id = ? AND status = 'uploading'",
        )
        .bind(upload_id)
        .execute(&self.pool)
        .await
        .context("Failed to update upload status")?;

        if result.rows_affected() == 0 {
            bail!("Upload {upload_id} is not waiting to be processed");
        }
        info!("Upload {} is processing", upload_id);
        Ok(())
    }

    /// `{uploading | processing} -> error`, keeping the message.
    pub async fn mark_error(&self, upload_id: &str, message: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE uploads SET status = 'error', error_message = ?
             WHERE id = ? AND status IN ('uploading', 'processing')",
        )
        .bind(message)
        .bind(upload_id)
        .execute(&self.pool)
        .await
        .context("Failed to update upload status")?;

        if result.rows_affected() == 0 {
            bail!("Upload {upload_id} has already finished processing");
        }
        info!("Upload {} failed: {}", upload_id, message);
        Ok(())
    }

    /// Store the extraction and its report, then move the upload to
    /// `processed`, in one transaction.
    pub async fn complete_upload(
        &self,
        upload_id: &str,
        user_id: &str,
        result: &ExtractionResult,
        analysis_report: &str,
    ) -> Result<StoredExtraction> {
        let stored = StoredExtraction {
            id: new_id(),
            upload_id: upload_id.to_string(),
            user_id: user_id.to_string(),
            monthly_data: result.monthly_data.clone(),
            annual_data: result.annual_data.clone(),
            analysis_report: analysis_report.to_string(),
            raw_response: result.raw_response.clone(),
            extracted_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO extractions (id, upload_id, user_id, monthly_data, annual_data, analysis_report, raw_response, extracted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&stored.id)
        .bind(&stored.upload_id)
        .bind(&stored.user_id)
        .bind(serde_json::to_string(&stored.monthly_data)?)
        .bind(serde_json::to_string(&stored.annual_data)?)
        .bind(&stored.analysis_report)
        .bind(&stored.raw_response)
        .bind(to_db_time(&stored.extracted_at))
        .execute(&mut *tx)
        .await
        .context("Failed to insert extraction")?;

        let updated = sqlx::query(
            "UPDATE uploads SET status = 'processed', processed_at = ?, error_message = NULL
             WHERE id = ? AND status = 'processing'",
        )
        .bind(to_db_time(&Utc::now()))
        .bind(upload_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update upload status")?;

        if updated.rows_affected() == 0 {
            bail!("Upload {upload_id} is not processing");
        }

        tx.commit().await.context("Failed to commit extraction")?;
        info!("Upload {} processed", upload_id);
        Ok(stored)
    }

    /// Fetch an upload owned by `user_id`.
    pub async fn get_upload(&self, user_id: &str, upload_id: &str) -> Result<Option<Upload>> {
        let row = sqlx::query("SELECT * FROM uploads WHERE id = ? AND user_id = ?")
            .bind(upload_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch upload")?;

        row.as_ref().map(upload_from_row).transpose()
    }

    /// A user's uploads, newest first.
    pub async fn list_uploads(&self, user_id: &str, limit: u32) -> Result<Vec<Upload>> {
        let rows = sqlx::query(
            "SELECT * FROM uploads WHERE user_id = ? ORDER BY uploaded_at DESC, rowid DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list uploads")?;

        rows.iter().map(upload_from_row).collect()
    }

    /// Remove an upload and its extractions. Returns the removed upload.
    pub async fn delete_upload(&self, user_id: &str, upload_id: &str) -> Result<Option<Upload>> {
        let Some(upload) = self.get_upload(user_id, upload_id).await? else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        sqlx::query("DELETE FROM extractions WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete extractions")?;
        sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(upload_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete upload")?;
        tx.commit().await.context("Failed to commit delete")?;

        info!("Deleted upload {}", upload_id);
        Ok(Some(upload))
    }

    // ----- extractions -----

    /// Most recent extraction for an upload.
    pub async fn get_extraction(&self, upload_id: &str) -> Result<Option<StoredExtraction>> {
        let row = sqlx::query(
            "SELECT * FROM extractions WHERE upload_id = ? ORDER BY extracted_at DESC, rowid DESC LIMIT 1",
        )
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch extraction")?;

        row.as_ref().map(extraction_from_row).transpose()
    }

    /// A user's extractions, newest first.
    pub async fn list_extractions(&self, user_id: &str, limit: u32) -> Result<Vec<ExtractionSummary>> {
        let rows = sqlx::query(
            "SELECT e.*, u.file_name FROM extractions e
             LEFT JOIN uploads u ON u.id = e.upload_id
             WHERE e.user_id = ?
             ORDER BY e.extracted_at DESC, e.rowid DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list extractions")?;

        rows.iter()
            .map(|row| {
                let extraction = extraction_from_row(row)?;
                Ok(ExtractionSummary {
                    id: extraction.id,
                    upload_id: extraction.upload_id,
                    file_name: row.try_get("file_name")?,
                    monthly_record_count: extraction.monthly_data.len(),
                    annual_record_count: extraction.annual_data.len(),
                    years: crate::analysis::years_in_order(&extraction.annual_data),
                    extracted_at: extraction.extracted_at,
                })
            })
            .collect()
    }

    // ----- analyses -----

    /// Create or update the analysis for (user, period).
    pub async fn upsert_analysis(
        &self,
        user_id: &str,
        input: &AnalysisInput,
        defaults: &AnalysisConfig,
    ) -> Result<(Analysis, UpsertOutcome)> {
        let (period, coverage) = input.validate()?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let existing = sqlx::query("SELECT * FROM analyses WHERE user_id = ? AND period = ?")
            .bind(user_id)
            .bind(period)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to look up analysis")?
            .as_ref()
            .map(analysis_from_row)
            .transpose()?;

        let (analysis, outcome) = match existing {
            Some(current) => {
                let updated = Analysis {
                    data_coverage: coverage,
                    total_emissions: input.total_emissions.or(current.total_emissions),
                    emissions_unit: input
                        .emissions_unit
                        .clone()
                        .unwrap_or(current.emissions_unit),
                    framework: input.framework.clone().unwrap_or(current.framework),
                    summary: input.summary.clone().or(current.summary),
                    emissions_breakdown: input
                        .emissions_breakdown
                        .clone()
                        .unwrap_or(current.emissions_breakdown),
                    emissions_by_category: input
                        .emissions_by_category
                        .clone()
                        .unwrap_or(current.emissions_by_category),
                    missing_fields: input
                        .missing_fields
                        .clone()
                        .unwrap_or(current.missing_fields),
                    insights: input.insights.clone().unwrap_or(current.insights),
                    updated_at: now,
                    ..current
                };
                (updated, UpsertOutcome::Updated)
            }
            None => {
                let created = Analysis {
                    id: new_id(),
                    user_id: user_id.to_string(),
                    period: period.to_string(),
                    data_coverage: coverage,
                    total_emissions: input.total_emissions,
                    emissions_unit: input
                        .emissions_unit
                        .clone()
                        .unwrap_or_else(|| defaults.emissions_unit.clone()),
                    framework: input
                        .framework
                        .clone()
                        .unwrap_or_else(|| defaults.framework.clone()),
                    summary: input.summary.clone(),
                    emissions_breakdown: input.emissions_breakdown.clone().unwrap_or_default(),
                    emissions_by_category: input.emissions_by_category.clone().unwrap_or_default(),
                    missing_fields: input.missing_fields.clone().unwrap_or_default(),
                    insights: input.insights.clone().unwrap_or_default(),
                    created_at: now,
                    updated_at: now,
                };
                (created, UpsertOutcome::Created)
            }
        };

        sqlx::query(
            "INSERT INTO analyses (id, user_id, period, data_coverage, total_emissions, emissions_unit, framework,
                 summary, emissions_breakdown, emissions_by_category, missing_fields, insights, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (user_id, period) DO UPDATE SET
                 data_coverage = excluded.data_coverage,
                 total_emissions = excluded.total_emissions,
                 emissions_unit = excluded.emissions_unit,
                 framework = excluded.framework,
                 summary = excluded.summary,
                 emissions_breakdown = excluded.emissions_breakdown,
                 emissions_by_category = excluded.emissions_by_category,
                 missing_fields = excluded.missing_fields,
                 insights = excluded.insights,
                 updated_at = excluded.updated_at",
        )
        .bind(&analysis.id)
        .bind(&analysis.user_id)
        .bind(&analysis.period)
        .bind(analysis.data_coverage)
        .bind(analysis.total_emissions)
        .bind(&analysis.emissions_unit)
        .bind(&analysis.framework)
        .bind(&analysis.summary)
        .bind(serde_json::to_string(&analysis.emissions_breakdown)?)
        .bind(serde_json::to_string(&analysis.emissions_by_category)?)
        .bind(serde_json::to_string(&analysis.missing_fields)?)
        .bind(serde_json::to_string(&analysis.insights)?)
        .bind(to_db_time(&analysis.created_at))
        .bind(to_db_time(&analysis.updated_at))
        .execute(&mut *tx)
        .await
        .context("Failed to save analysis")?;

        tx.commit().await.context("Failed to commit analysis")?;
        info!("Analysis for period {} {:?}", analysis.period, outcome);
        Ok((analysis, outcome))
    }

    /// The analysis for `period`, or the most recently created one.
    pub async fn get_analysis(&self, user_id: &str, period: Option<&str>) -> Result<Option<Analysis>> {
        let row = match period {
            Some(period) => {
                sqlx::query("SELECT * FROM analyses WHERE user_id = ? AND period = ?")
                    .bind(user_id)
                    .bind(period)
                    .fetch_optional(&self.pool)
                    .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM analyses WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
                )
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .context("Failed to fetch analysis")?;

        row.as_ref().map(analysis_from_row).transpose()
    }

    /// All of a user's analyses, newest first.
    pub async fn list_analyses(&self, user_id: &str, limit: Option<u32>) -> Result<Vec<Analysis>> {
        let limit = limit.map(i64::from).unwrap_or(-1);
        let rows = sqlx::query(
            "SELECT * FROM analyses WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list analyses")?;

        rows.iter().map(analysis_from_row).collect()
    }

    /// Periods with an analysis, newest first.
    pub async fn list_periods(&self, user_id: &str) -> Result<Vec<(String, DateTime<Utc>)>> {
        Ok(self
            .list_analyses(user_id, None)
            .await?
            .into_iter()
            .map(|a| (a.period, a.created_at))
            .collect())
    }

    /// Dashboard roll-up: latest coverage plus the five newest analyses.
    pub async fn dashboard(&self, user_id: &str, default_framework: &str) -> Result<Dashboard> {
        let history = self.list_analyses(user_id, Some(5)).await?;
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM analyses WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count analyses")?;

        let latest = history.first();
        Ok(Dashboard {
            data_coverage: latest.map(|a| a.data_coverage).unwrap_or(0.0),
            last_analysis_date: latest.map(|a| a.created_at),
            framework: latest
                .map(|a| a.framework.clone())
                .unwrap_or_else(|| default_framework.to_string()),
            total_analyses: total,
            analysis_history: history
                .iter()
                .map(|a| AnalysisHistoryEntry {
                    id: a.id.clone(),
                    period: a.period.clone(),
                    date: a.created_at,
                    coverage: a.data_coverage,
                    summary: a.summary.clone(),
                })
                .collect(),
        })
    }
}
