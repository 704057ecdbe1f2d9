//! Line-delimited JSON access to the engine.
//!
//! Each request is one JSON object naming the operation in `op`, with its
//! arguments as snake_case fields:
//!
//! ```text
//! {"op":"uploadAll","job_id":"j1","collection_id":"photos","notification":"n1"}
//! ```
//!
//! Each reply is one serialized [`Reply`] on its own line.

use jobsync_core::{CollectionConfig, NewFile, Reply, ServerDoc, Value, deserialize};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::sync::SyncEngine;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    Startup,
    Configure {
        config: Value,
    },
    ReadConfig {
        key: String,
    },
    ConfigureCollection(CollectionConfig),
    ReadCollection {
        collection_id: String,
    },
    SwitchToAutoUploadOn {
        collection_id: String,
    },
    SwitchToAutoUploadOff {
        collection_id: String,
    },
    ReadAutoUpload {
        collection_id: String,
    },
    AddOriginal(NewFile),
    AddUpload(NewFile),
    ConvertToDownload {
        file_id: String,
    },
    MergeServerDoc(ServerDoc),
    SetNotOnServer {
        file_id: String,
    },
    UnmergeServerDoc {
        file_id: String,
    },
    UploadAll {
        job_id: String,
        collection_id: String,
        #[serde(default)]
        notification: Option<String>,
    },
    UploadPartition {
        job_id: String,
        collection_id: String,
        partition: String,
        #[serde(default)]
        notification: Option<String>,
    },
    Download {
        file_id: String,
    },
    DownloadAll {
        collection_id: String,
        #[serde(default)]
        excluding: Vec<String>,
    },
    SetUpload {
        file_id: String,
        task_id: String,
    },
    SetDownload {
        file_id: String,
        task_id: String,
    },
    UploadComplete {
        file_id: String,
    },
    DownloadComplete {
        file_id: String,
    },
    FileTasksComplete {
        file_id: String,
    },
    CompleteTask {
        task_id: String,
    },
    TaskFailed {
        task_id: String,
        message: String,
    },
    JobsDone,
    ReadJob {
        job_id: String,
    },
    RemoveJob {
        job_id: String,
    },
    RemoveAllJobs {
        collection_id: String,
    },
    /// Without `collection_id`: assigned downloads across collections.
    ReadDownloads {
        #[serde(default)]
        collection_id: Option<String>,
        #[serde(default)]
        excluding: Vec<String>,
    },
    ReadUploads {
        collection_id: String,
        #[serde(default)]
        excluding: Vec<String>,
    },
    ReadAllFilesNeedingUpload {
        collection_id: String,
        #[serde(default)]
        excluding: Vec<String>,
    },
    ReadJobsOfFile {
        file_id: String,
    },
    ReadFile {
        file_id: String,
    },
    ReadFileByTask {
        task_id: String,
    },
    ReadFilesForPartition {
        collection_id: String,
        partition: String,
    },
    ReadFileWithCollectionPath {
        file_id: String,
    },
    ReadDeletedFiles {
        collection_id: String,
    },
    ReadPendingTasks,
    BeginMark {
        collection_id: String,
    },
    DeleteUnmarked {
        collection_id: String,
    },
    MarkFileAsDeleted {
        file_id: String,
    },
    RemoveDeletedFile {
        file_id: String,
    },
}

fn encode<T: Serialize>(reply: Reply<T>) -> Value {
    serde_json::to_value(&reply).unwrap_or_else(|err| {
        json!({
            "ok": false,
            "error": { "kind": "internal", "message": err.to_string() }
        })
    })
}

pub async fn dispatch(engine: &SyncEngine, request: Request) -> Value {
    debug!(request = ?request, "bridge request");
    match request {
        Request::Startup => encode(engine.startup().await),
        Request::Configure { config } => encode(engine.configure(config).await),
        Request::ReadConfig { key } => encode(engine.read_config(&key).await),
        Request::ConfigureCollection(collection) => {
            encode(engine.configure_collection(collection).await)
        }
        Request::ReadCollection { collection_id } => {
            encode(engine.read_collection(&collection_id).await)
        }
        Request::SwitchToAutoUploadOn { collection_id } => {
            encode(engine.switch_to_auto_upload_on(&collection_id).await)
        }
        Request::SwitchToAutoUploadOff { collection_id } => {
            encode(engine.switch_to_auto_upload_off(&collection_id).await)
        }
        Request::ReadAutoUpload { collection_id } => {
            encode(engine.read_auto_upload(&collection_id).await)
        }
        Request::AddOriginal(file) => encode(engine.add_original(file).await),
        Request::AddUpload(file) => encode(engine.add_upload(file).await),
        Request::ConvertToDownload { file_id } => {
            encode(engine.convert_to_download(&file_id).await)
        }
        Request::MergeServerDoc(doc) => encode(engine.merge_server_doc(doc).await),
        Request::SetNotOnServer { file_id } => encode(engine.set_not_on_server(&file_id).await),
        Request::UnmergeServerDoc { file_id } => {
            encode(engine.unmerge_server_doc(&file_id).await)
        }
        Request::UploadAll {
            job_id,
            collection_id,
            notification,
        } => encode(
            engine
                .upload_all(&job_id, &collection_id, notification.as_deref())
                .await,
        ),
        Request::UploadPartition {
            job_id,
            collection_id,
            partition,
            notification,
        } => encode(
            engine
                .upload_partition(&job_id, &collection_id, &partition, notification.as_deref())
                .await,
        ),
        Request::Download { file_id } => encode(engine.download(&file_id).await),
        Request::DownloadAll {
            collection_id,
            excluding,
        } => encode(engine.download_all(&collection_id, excluding).await),
        Request::SetUpload { file_id, task_id } => {
            encode(engine.set_upload(&file_id, &task_id).await)
        }
        Request::SetDownload { file_id, task_id } => {
            encode(engine.set_download(&file_id, &task_id).await)
        }
        Request::UploadComplete { file_id } => encode(engine.upload_complete(&file_id).await),
        Request::DownloadComplete { file_id } => {
            encode(engine.download_complete(&file_id).await)
        }
        Request::FileTasksComplete { file_id } => {
            encode(engine.file_tasks_complete(&file_id).await)
        }
        Request::CompleteTask { task_id } => encode(engine.complete_task(&task_id).await),
        Request::TaskFailed { task_id, message } => {
            encode(engine.task_failed(&task_id, &message).await)
        }
        Request::JobsDone => encode(engine.jobs_done().await),
        Request::ReadJob { job_id } => encode(engine.read_job(&job_id).await),
        Request::RemoveJob { job_id } => encode(engine.remove_job(&job_id).await),
        Request::RemoveAllJobs { collection_id } => {
            encode(engine.remove_all_jobs(&collection_id).await)
        }
        Request::ReadDownloads {
            collection_id: None,
            ..
        } => encode(engine.read_downloads().await),
        Request::ReadDownloads {
            collection_id: Some(collection_id),
            excluding,
        } => encode(
            engine
                .read_collection_downloads(&collection_id, &excluding)
                .await,
        ),
        Request::ReadUploads {
            collection_id,
            excluding,
        } => encode(engine.read_uploads(&collection_id, &excluding).await),
        Request::ReadAllFilesNeedingUpload {
            collection_id,
            excluding,
        } => encode(
            engine
                .read_all_files_needing_upload(&collection_id, &excluding)
                .await,
        ),
        Request::ReadJobsOfFile { file_id } => encode(engine.read_jobs_of_file(&file_id).await),
        Request::ReadFile { file_id } => encode(engine.read_file(&file_id).await),
        Request::ReadFileByTask { task_id } => encode(engine.read_file_by_task(&task_id).await),
        Request::ReadFilesForPartition {
            collection_id,
            partition,
        } => encode(
            engine
                .read_files_for_partition(&collection_id, &partition)
                .await,
        ),
        Request::ReadFileWithCollectionPath { file_id } => {
            encode(engine.read_file_with_collection_path(&file_id).await)
        }
        Request::ReadDeletedFiles { collection_id } => {
            encode(engine.read_deleted_files(&collection_id).await)
        }
        Request::ReadPendingTasks => encode(engine.read_pending_tasks().await),
        Request::BeginMark { collection_id } => encode(engine.begin_mark(&collection_id).await),
        Request::DeleteUnmarked { collection_id } => {
            encode(engine.delete_unmarked(&collection_id).await)
        }
        Request::MarkFileAsDeleted { file_id } => {
            encode(engine.mark_file_as_deleted(&file_id).await)
        }
        Request::RemoveDeletedFile { file_id } => {
            encode(engine.remove_deleted_file(&file_id).await)
        }
    }
}

/// Handles one request line and returns the reply line (without newline).
pub async fn handle_line(engine: &SyncEngine, line: &str) -> String {
    let reply = match deserialize::<Request>(line) {
        Ok(request) => dispatch(engine, request).await,
        Err(err) => {
            warn!(error = %err, "malformed bridge request");
            encode(Reply::<()>::from(Err::<(), _>(err)))
        }
    };
    reply.to_string()
}
