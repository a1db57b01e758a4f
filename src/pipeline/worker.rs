//! Background processing of accepted uploads.
//!
//! Jobs are pushed onto an mpsc queue and drained by one worker task with
//! bounded concurrency. The job for an upload is the only writer of that
//! upload's status once it has been queued.

use crate::analysis::{aggregate_annual, annual_mismatches};
use crate::document;
use crate::error::PipelineError;
use crate::extraction::{build_prompt, unpack_response};
use crate::llm::ExtractionModel;
use crate::models::{StoredExtraction, UploadStatus};
use crate::report::generate_analysis_report;
use crate::store::Store;
use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Relative drift tolerated between reported and summed annual totals.
const ANNUAL_TOLERANCE: f64 = 0.005;

/// One upload waiting to be processed.
#[derive(Debug, Clone)]
pub struct Job {
    pub upload_id: String,
    pub user_id: String,
    pub file_path: PathBuf,
    pub file_type: String,
}

/// Handle to the running worker.
pub struct WorkerQueue {
    tx: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

impl WorkerQueue {
    /// Spawn the worker task.
    pub fn start(
        store: Store,
        model: Arc<dyn ExtractionModel>,
        concurrency: usize,
        model_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let concurrency = concurrency.max(1);

        let handle = tokio::spawn(async move {
            futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|job| (job, rx))
            })
            .for_each_concurrent(concurrency, |job| {
                let store = store.clone();
                let model = Arc::clone(&model);
                async move {
                    process_upload(&store, model.as_ref(), &job, model_timeout).await;
                }
            })
            .await;
            debug!("Worker queue drained");
        });

        Self { tx, handle }
    }

    /// Queue a job for processing.
    pub fn enqueue(&self, job: Job) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|e| anyhow!("Worker queue is closed, upload {} was not queued", e.0.upload_id))
    }

    /// Close the queue and wait for every queued job to finish.
    pub async fn finish(self) -> Result<()> {
        drop(self.tx);
        self.handle.await.context("Worker task panicked")
    }
}

/// Run one upload through the pipeline and record its terminal status.
pub async fn process_upload(
    store: &Store,
    model: &dyn ExtractionModel,
    job: &Job,
    model_timeout: Duration,
) -> UploadStatus {
    info!("Processing upload {}", job.upload_id);

    match run_job(store, model, job, model_timeout).await {
        Ok(stored) => {
            info!(
                "Upload {} extracted {} monthly and {} annual records",
                job.upload_id,
                stored.monthly_data.len(),
                stored.annual_data.len()
            );
            UploadStatus::Processed
        }
        Err(e) => {
            let message = e.to_string();
            warn!("Processing error for upload {}: {}", job.upload_id, message);
            if let Err(store_err) = store.mark_error(&job.upload_id, &message).await {
                error!(
                    "Failed to record error status for upload {}: {:#}",
                    job.upload_id, store_err
                );
            }
            UploadStatus::Error
        }
    }
}

async fn run_job(
    store: &Store,
    model: &dyn ExtractionModel,
    job: &Job,
    model_timeout: Duration,
) -> Result<StoredExtraction, PipelineError> {
    let text = document::extract_text(&job.file_path, &job.file_type).await?;
    debug!("Read {} chars from {}", text.len(), job.file_path.display());

    let prompt = build_prompt(&text);
    debug!("Sending {} chars to {}", prompt.len(), model.model_name());

    let reply = tokio::time::timeout(model_timeout, model.complete(&prompt))
        .await
        .map_err(|_| PipelineError::ModelTimeout(model_timeout.as_secs()))?
        .map_err(|e| PipelineError::ModelCall(format!("{e:#}")))?;

    let mut result = unpack_response(&reply);

    if result.annual_data.is_empty() && !result.monthly_data.is_empty() {
        debug!("No annual section in reply, summing monthly records");
        result.annual_data = aggregate_annual(&result.monthly_data);
    } else {
        for (year, metric) in
            annual_mismatches(&result.monthly_data, &result.annual_data, ANNUAL_TOLERANCE)
        {
            warn!(
                "Upload {}: reported {} total for {} does not match the monthly sum",
                job.upload_id, metric, year
            );
        }
    }

    let report = generate_analysis_report(&result.monthly_data, &result.annual_data);

    store
        .complete_upload(&job.upload_id, &job.user_id, &result, &report)
        .await
        .map_err(|e| PipelineError::Storage(format!("{e:#}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::NewUpload;
    use async_trait::async_trait;
    use std::io::Write;

    pub(crate) const REPLY: &str = "Here is the data.\n\n\
MONTHLY_DATA_CSV\n```csv\n\
year,month,month_label,co2_kg,plastic_lbs,water_gal,energy_kwh\n\
2020,1,January,1200.5,45.2,5000,2500\n\
2020,2,February,1150.0,42.0,4800,2400\n\
```\n";

    /// Scripted model: replies with `reply`, fails, or hangs.
    /// `Expect` replies with `REPLY` only when the prompt carries the text.
    pub(crate) enum MockModel {
        Reply(String),
        Fail(&'static str),
        Hang,
        Expect(&'static str),
    }

    #[async_trait]
    impl ExtractionModel for MockModel {
        async fn complete(&self, prompt: &str) -> Result<String> {
            match self {
                MockModel::Reply(text) => Ok(text.clone()),
                MockModel::Expect(needle) if prompt.contains(needle) => Ok(REPLY.to_string()),
                MockModel::Expect(needle) => Err(anyhow!("prompt is missing '{needle}'")),
                MockModel::Fail(msg) => Err(anyhow!("{msg}")),
                MockModel::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
            }
        }

        fn model_name(&self) -> &str {
            "mock"
        }
    }

    async fn queued_upload(
        store: &Store,
        file_type: &str,
        body: impl AsRef<[u8]>,
    ) -> (Job, tempfile::NamedTempFile) {
        let body = body.as_ref();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body).unwrap();

        let upload = store
            .create_upload(NewUpload {
                user_id: "u1".to_string(),
                file_name: "usage.csv".to_string(),
                file_type: file_type.to_string(),
                file_size: body.len() as u64,
                file_path: file.path().display().to_string(),
            })
            .await
            .unwrap();
        store.mark_processing(&upload.id).await.unwrap();

        let job = Job {
            upload_id: upload.id,
            user_id: "u1".to_string(),
            file_path: file.path().to_path_buf(),
            file_type: file_type.to_string(),
        };
        (job, file)
    }

    #[tokio::test]
    async fn test_process_success() {
        let store = Store::open_in_memory().await.unwrap();
        let (job, _file) = queued_upload(&store, "text/plain", "Jan 2020 CO2 1.2t").await;
        let model = MockModel::Reply(REPLY.to_string());

        let status = process_upload(&store, &model, &job, Duration::from_secs(5)).await;
        assert_eq!(status, UploadStatus::Processed);

        let upload = store.get_upload("u1", &job.upload_id).await.unwrap().unwrap();
        assert_eq!(upload.status, UploadStatus::Processed);
        assert!(upload.processed_at.is_some());

        let stored = store.get_extraction(&job.upload_id).await.unwrap().unwrap();
        assert_eq!(stored.monthly_data.len(), 2);
        // Annual totals are summed when the reply has no annual section.
        assert_eq!(stored.annual_data.len(), 1);
        assert!((stored.annual_data[0].co2_kg - 2350.5).abs() < 1e-9);
        assert!(stored.analysis_report.contains("# Sustainability Analysis Report"));
        assert_eq!(stored.raw_response, REPLY);
    }

    #[tokio::test]
    async fn test_process_pdf() {
        let store = Store::open_in_memory().await.unwrap();
        let pdf =
            crate::document::tests::sample_pdf(&["Utility statement", "January 2020 2500 kWh"]);
        let (job, _file) = queued_upload(&store, "application/pdf", pdf).await;
        let model = MockModel::Expect("January 2020 2500 kWh");

        let status = process_upload(&store, &model, &job, Duration::from_secs(5)).await;
        assert_eq!(status, UploadStatus::Processed);

        let stored = store.get_extraction(&job.upload_id).await.unwrap().unwrap();
        assert_eq!(stored.monthly_data.len(), 2);
    }

    #[tokio::test]
    async fn test_process_corrupt_pdf() {
        let store = Store::open_in_memory().await.unwrap();
        let (job, _file) = queued_upload(&store, "application/pdf", "%PDF-1.5 truncated").await;
        let model = MockModel::Reply(REPLY.to_string());

        let status = process_upload(&store, &model, &job, Duration::from_secs(5)).await;
        assert_eq!(status, UploadStatus::Error);

        let upload = store.get_upload("u1", &job.upload_id).await.unwrap().unwrap();
        assert!(upload
            .error_message
            .unwrap_or_default()
            .starts_with("Failed to parse PDF file"));
    }

    #[tokio::test]
    async fn test_process_no_sections() {
        let store = Store::open_in_memory().await.unwrap();
        let (job, _file) = queued_upload(&store, "text/plain", "nothing useful").await;
        let model = MockModel::Reply("No environmental data found.".to_string());

        let status = process_upload(&store, &model, &job, Duration::from_secs(5)).await;
        assert_eq!(status, UploadStatus::Processed);

        let stored = store.get_extraction(&job.upload_id).await.unwrap().unwrap();
        assert!(stored.monthly_data.is_empty());
        assert!(stored.annual_data.is_empty());
        assert_eq!(stored.analysis_report, crate::report::NO_DATA_MESSAGE);
    }

    #[tokio::test]
    async fn test_process_unsupported_type() {
        let store = Store::open_in_memory().await.unwrap();
        let (job, _file) = queued_upload(&store, "image/png", "binary").await;
        let model = MockModel::Reply(REPLY.to_string());

        let status = process_upload(&store, &model, &job, Duration::from_secs(5)).await;
        assert_eq!(status, UploadStatus::Error);

        let upload = store.get_upload("u1", &job.upload_id).await.unwrap().unwrap();
        assert_eq!(upload.status, UploadStatus::Error);
        assert_eq!(
            upload.error_message.as_deref(),
            Some("Unsupported file type for text extraction: image/png")
        );
        assert!(store.get_extraction(&job.upload_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_process_model_failure() {
        let store = Store::open_in_memory().await.unwrap();
        let (job, _file) = queued_upload(&store, "text/csv", "a,b\n1,2").await;
        let model = MockModel::Fail("quota exceeded");

        let status = process_upload(&store, &model, &job, Duration::from_secs(5)).await;
        assert_eq!(status, UploadStatus::Error);

        let upload = store.get_upload("u1", &job.upload_id).await.unwrap().unwrap();
        assert_eq!(
            upload.error_message.as_deref(),
            Some("Failed to extract data: quota exceeded")
        );
    }

    #[tokio::test]
    async fn test_process_model_timeout() {
        let store = Store::open_in_memory().await.unwrap();
        let (job, _file) = queued_upload(&store, "text/plain", "slow").await;

        let status = process_upload(&store, &MockModel::Hang, &job, Duration::from_millis(20)).await;
        assert_eq!(status, UploadStatus::Error);

        let upload = store.get_upload("u1", &job.upload_id).await.unwrap().unwrap();
        assert!(upload
            .error_message
            .unwrap_or_default()
            .contains("did not respond"));
    }

    #[tokio::test]
    async fn test_queue_drains_before_finish() {
        let store = Store::open_in_memory().await.unwrap();
        let model: Arc<dyn ExtractionModel> = Arc::new(MockModel::Reply(REPLY.to_string()));
        let queue = WorkerQueue::start(store.clone(), model, 2, Duration::from_secs(5));

        let mut files = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (job, file) = queued_upload(&store, "text/plain", "data").await;
            ids.push(job.upload_id.clone());
            files.push(file);
            queue.enqueue(job).unwrap();
        }
        queue.finish().await.unwrap();

        for id in ids {
            let upload = store.get_upload("u1", &id).await.unwrap().unwrap();
            assert!(upload.status.is_terminal());
            assert_eq!(upload.status, UploadStatus::Processed);
        }
    }
}
