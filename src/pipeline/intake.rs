//! Upload intake: validation, storage and queueing.
//!
//! Every file in a request is validated, then copied, then recorded before
//! any of them is queued, so a rejected request leaves nothing behind.

use super::worker::{Job, WorkerQueue};
use crate::config::{Config, UploadsConfig};
use crate::document::detect_mime_type;
use crate::error::ValidationError;
use crate::models::{Upload, UploadStatus};
use crate::store::{NewUpload, Store};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// A file that passed validation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
}

/// Expand directories into the regular files beneath them.
///
/// Hidden entries are skipped. Files are returned in path order.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            let walker = WalkDir::new(path)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));

            for entry in walker {
                let entry = entry
                    .with_context(|| format!("Failed to read directory {}", path.display()))?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.clone());
        }
    }

    Ok(files)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Check one file against the allow-list and the size limit.
pub fn validate_file(path: &Path, config: &UploadsConfig) -> Result<Candidate> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    let file_type = detect_mime_type(path);
    if !config.allowed_types.iter().any(|t| t == file_type) {
        return Err(ValidationError::DisallowedFileType(file_type.to_string()).into());
    }

    let file_size = std::fs::metadata(path)
        .with_context(|| format!("Failed to read {}", path.display()))?
        .len();
    if file_size > config.max_file_size {
        return Err(ValidationError::FileTooLarge {
            name: file_name,
            size: file_size,
            limit: config.max_file_size,
        }
        .into());
    }

    Ok(Candidate {
        path: path.to_path_buf(),
        file_name,
        file_type: file_type.to_string(),
        file_size,
    })
}

/// Name under which an accepted file is stored.
fn stored_file_name(original: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        Utc::now().timestamp_millis(),
        &suffix[..9],
        original
    )
}

/// Accept files for `user_id`, record them and queue them for processing.
///
/// Returns the upload records in `processing` state.
pub async fn submit(
    store: &Store,
    queue: &WorkerQueue,
    config: &Config,
    user_id: &str,
    paths: &[PathBuf],
) -> Result<Vec<Upload>> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(ValidationError::MissingUser.into());
    }

    let files = collect_files(paths)?;
    if files.is_empty() {
        return Err(ValidationError::NoFiles.into());
    }

    let candidates = files
        .iter()
        .map(|f| validate_file(f, &config.uploads))
        .collect::<Result<Vec<_>>>()?;

    let uploads_dir = config.uploads_dir();
    tokio::fs::create_dir_all(&uploads_dir)
        .await
        .with_context(|| format!("Failed to create {}", uploads_dir.display()))?;

    let staged = stage_files(&candidates, &uploads_dir).await?;

    let mut created: Vec<Upload> = Vec::with_capacity(candidates.len());
    for (candidate, destination) in candidates.iter().zip(&staged) {
        let result = store
            .create_upload(NewUpload {
                user_id: user_id.to_string(),
                file_name: candidate.file_name.clone(),
                file_type: candidate.file_type.clone(),
                file_size: candidate.file_size,
                file_path: destination.display().to_string(),
            })
            .await;

        match result {
            Ok(upload) => created.push(upload),
            Err(e) => {
                for upload in &created {
                    if let Err(del_err) = store.delete_upload(user_id, &upload.id).await {
                        warn!("Failed to roll back upload {}: {:#}", upload.id, del_err);
                    }
                }
                discard(&staged).await;
                return Err(e);
            }
        }
    }

    let mut accepted = Vec::with_capacity(created.len());
    let mut pending = created.into_iter().zip(staged).zip(candidates);

    while let Some(((mut upload, destination), candidate)) = pending.next() {
        store.mark_processing(&upload.id).await?;
        upload.status = UploadStatus::Processing;

        let job = Job {
            upload_id: upload.id.clone(),
            user_id: user_id.to_string(),
            file_path: destination,
            file_type: candidate.file_type,
        };
        if let Err(e) = queue.enqueue(job) {
            let message = e.to_string();
            store.mark_error(&upload.id, &message).await?;
            for ((rest, _), _) in pending.by_ref() {
                store.mark_error(&rest.id, &message).await?;
            }
            return Err(e);
        }

        info!("Queued upload {} ({})", upload.id, upload.file_name);
        accepted.push(upload);
    }

    Ok(accepted)
}

/// Copy every candidate into `dir`. On failure the copies made so far are
/// removed and nothing is left behind.
async fn stage_files(candidates: &[Candidate], dir: &Path) -> Result<Vec<PathBuf>> {
    let mut staged = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let destination = dir.join(stored_file_name(&candidate.file_name));
        if let Err(e) = tokio::fs::copy(&candidate.path, &destination).await {
            discard(&staged).await;
            return Err(e).with_context(|| format!("Failed to store {}", candidate.path.display()));
        }
        debug!("Stored {} at {}", candidate.file_name, destination.display());
        staged.push(destination);
    }

    Ok(staged)
}

async fn discard(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Delete an upload, its extraction and its stored file.
pub async fn remove(store: &Store, user_id: &str, upload_id: &str) -> Result<Upload> {
    let upload = store
        .delete_upload(user_id, upload_id)
        .await?
        .ok_or(ValidationError::NotFound("Upload"))?;

    match tokio::fs::remove_file(&upload.file_path).await {
        Ok(()) => debug!("Removed stored file {}", upload.file_path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Stored file {} already gone", upload.file_path)
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to remove {}", upload.file_path));
        }
    }

    Ok(upload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ExtractionModel;
    use crate::pipeline::worker::tests::{MockModel, REPLY};
    use std::sync::Arc;
    use std::time::Duration;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.general.data_dir = dir.join("data");
        config
    }

    fn start_queue(store: &Store) -> WorkerQueue {
        let model: Arc<dyn ExtractionModel> = Arc::new(MockModel::Reply(REPLY.to_string()));
        WorkerQueue::start(store.clone(), model, 1, Duration::from_secs(5))
    }

    #[test]
    fn test_collect_files_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join("b.csv"), "x").unwrap();
        std::fs::write(dir.path().join("sub").join("a.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden").join("c.txt"), "x").unwrap();

        let files = collect_files(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| !f.to_string_lossy().contains(".hidden")));
    }

    #[test]
    fn test_validate_file() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("usage.csv");
        std::fs::write(&csv, "year,co2_kg\n2020,1").unwrap();
        let exe = dir.path().join("tool.exe");
        std::fs::write(&exe, "MZ").unwrap();

        let config = UploadsConfig::default();
        let accepted = validate_file(&csv, &config).unwrap();
        assert_eq!(accepted.file_type, "text/csv");
        assert_eq!(accepted.file_name, "usage.csv");

        let err = validate_file(&exe, &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::DisallowedFileType(_))
        ));

        let small = UploadsConfig {
            max_file_size: 4,
            ..UploadsConfig::default()
        };
        let err = validate_file(&csv, &small).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_stored_file_name() {
        let name = stored_file_name("report.pdf");
        assert!(name.ends_with("-report.pdf"));
        assert_eq!(name.split('-').count(), 3);
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = Store::open_in_memory().await.unwrap();
        let queue = start_queue(&store);

        let file = dir.path().join("usage.txt");
        std::fs::write(&file, "data").unwrap();
        let bad = dir.path().join("photo.gif");
        std::fs::write(&bad, "GIF89a").unwrap();

        let err = submit(&store, &queue, &config, " ", &[file.clone()]).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::MissingUser)
        );

        let err = submit(&store, &queue, &config, "u1", &[]).await.unwrap_err();
        assert_eq!(err.downcast_ref::<ValidationError>(), Some(&ValidationError::NoFiles));

        // One bad file rejects the whole request.
        assert!(submit(&store, &queue, &config, "u1", &[file, bad]).await.is_err());
        assert!(store.list_uploads("u1", 10).await.unwrap().is_empty());

        queue.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_nothing_staged() {
        let dir = tempfile::tempdir().unwrap();
        let uploads_dir = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads_dir).unwrap();

        let present = dir.path().join("january.txt");
        std::fs::write(&present, "January 2020").unwrap();
        let config = UploadsConfig::default();
        let first = validate_file(&present, &config).unwrap();
        let second = Candidate {
            path: dir.path().join("vanished.txt"),
            file_name: "vanished.txt".to_string(),
            file_type: "text/plain".to_string(),
            file_size: 1,
        };

        let err = stage_files(&[first.clone(), second], &uploads_dir)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("vanished.txt"));
        assert_eq!(std::fs::read_dir(&uploads_dir).unwrap().count(), 0);

        let staged = stage_files(&[first], &uploads_dir).await.unwrap();
        assert_eq!(staged.len(), 1);
        assert!(staged[0].exists());
    }

    #[tokio::test]
    async fn test_submit_stores_every_file_before_queueing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = Store::open_in_memory().await.unwrap();
        let queue = start_queue(&store);

        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.csv");
        std::fs::write(&a, "January 2020").unwrap();
        std::fs::write(&b, "year,co2_kg\n2020,1").unwrap();

        let uploads = submit(&store, &queue, &config, "u1", &[a, b]).await.unwrap();
        assert_eq!(uploads.len(), 2);
        assert!(uploads.iter().all(|u| u.status == UploadStatus::Processing));
        assert_eq!(std::fs::read_dir(config.uploads_dir()).unwrap().count(), 2);

        queue.finish().await.unwrap();
        assert_eq!(store.list_uploads("u1", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_submit_and_process() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = Store::open_in_memory().await.unwrap();
        let queue = start_queue(&store);

        let file = dir.path().join("usage.txt");
        std::fs::write(&file, "January 2020 emissions 1.2t").unwrap();

        let uploads = submit(&store, &queue, &config, "u1", &[file]).await.unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].status, UploadStatus::Processing);
        assert_eq!(uploads[0].file_type, "text/plain");
        assert!(Path::new(&uploads[0].file_path).exists());
        assert!(uploads[0].file_path.ends_with("-usage.txt"));

        queue.finish().await.unwrap();

        let done = store.get_upload("u1", &uploads[0].id).await.unwrap().unwrap();
        assert_eq!(done.status, UploadStatus::Processed);

        let removed = remove(&store, "u1", &uploads[0].id).await.unwrap();
        assert!(!Path::new(&removed.file_path).exists());
        assert!(store.get_upload("u1", &uploads[0].id).await.unwrap().is_none());

        let err = remove(&store, "u1", &uploads[0].id).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::NotFound("Upload"))
        );
    }
}
