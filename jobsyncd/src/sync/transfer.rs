use std::sync::Arc;

use async_trait::async_trait;
use jobsync_core::{
    CollectionRecord, Completion, Direction, ErrorPayload, FileRecord, JobRecord, PendingTask,
    Reply,
};
use thiserror::Error;
use tracing::{info, warn};

use super::engine::SyncEngine;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer rejected: {0}")]
    Rejected(String),
    #[error("transfer subsystem unavailable: {0}")]
    Unavailable(String),
}

/// What the transfer subsystem needs to move one file.
///
/// Uploads go from `local_path` to the collection endpoint; downloads go from
/// `server_doc` to `local_path` (or the collection path when the file has no
/// local path yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub file_id: String,
    pub job_id: String,
    pub direction: Direction,
    pub local_path: Option<String>,
    pub server_doc: Option<String>,
    pub destination: Option<String>,
}

impl TransferRequest {
    fn for_file(job: &JobRecord, file: &FileRecord, collection: &CollectionRecord) -> Self {
        let destination = match job.direction {
            Direction::Upload => collection.endpoint.clone(),
            Direction::Download => file.local_path.clone().or_else(|| collection.path.clone()),
        };
        Self {
            file_id: file.id.clone(),
            job_id: job.id.clone(),
            direction: job.direction,
            local_path: file.local_path.clone(),
            server_doc: file.server_doc.clone(),
            destination,
        }
    }
}

/// The background transfer subsystem. Accepting a request returns the task
/// identifier its completion or failure will later be reported under.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    async fn start_upload(&self, request: &TransferRequest) -> Result<String, TransferError>;
    async fn start_download(&self, request: &TransferRequest) -> Result<String, TransferError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSignal {
    Completed { task_id: String },
    Failed { task_id: String, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub assigned: Vec<String>,
    pub already_assigned: Vec<String>,
    pub rejected: Vec<String>,
}

/// Connects jobs to a [`TransferBackend`] and routes its signals back into the
/// engine.
pub struct TransferDriver {
    engine: Arc<SyncEngine>,
    backend: Arc<dyn TransferBackend>,
}

impl TransferDriver {
    pub fn new(engine: Arc<SyncEngine>, backend: Arc<dyn TransferBackend>) -> Self {
        Self { engine, backend }
    }

    /// Starts a transfer for every unassigned, unfinished member of the job.
    /// Members the backend rejects stay unassigned for a later dispatch.
    pub async fn dispatch(&self, job_id: &str) -> Reply<DispatchSummary> {
        self.dispatch_job(job_id).await.into()
    }

    async fn dispatch_job(&self, job_id: &str) -> Result<DispatchSummary, ErrorPayload> {
        let job = self.engine.read_job(job_id).await.into_result()?;
        let collection = self
            .engine
            .read_collection(&job.collection_id)
            .await
            .into_result()?;
        let mut summary = DispatchSummary::default();
        for member in job.pending() {
            if member.task_id.is_some() {
                summary.already_assigned.push(member.file_id.clone());
                continue;
            }
            let file = self.engine.read_file(&member.file_id).await.into_result()?;
            let request = TransferRequest::for_file(&job, &file, &collection);
            let started = match job.direction {
                Direction::Upload => self.backend.start_upload(&request).await,
                Direction::Download => self.backend.start_download(&request).await,
            };
            let task_id = match started {
                Ok(task_id) => task_id,
                Err(err) => {
                    warn!(job = %job.id, file = %file.id, error = %err, "transfer not started");
                    summary.rejected.push(file.id);
                    continue;
                }
            };
            let recorded = match job.direction {
                Direction::Upload => self.engine.set_upload(&file.id, &task_id).await,
                Direction::Download => self.engine.set_download(&file.id, &task_id).await,
            };
            recorded.into_result()?;
            summary.assigned.push(file.id);
        }
        info!(
            job = %job.id,
            assigned = summary.assigned.len(),
            rejected = summary.rejected.len(),
            "job dispatched"
        );
        Ok(summary)
    }

    /// Routes a backend signal. Failures yield `None` once the task is cleared.
    pub async fn handle(&self, signal: TaskSignal) -> Reply<Option<Completion>> {
        match signal {
            TaskSignal::Completed { task_id } => {
                self.engine.complete_task(&task_id).await.map(Some)
            }
            TaskSignal::Failed { task_id, message } => self
                .engine
                .task_failed(&task_id, &message)
                .await
                .map(|_| None),
        }
    }

    /// Tasks still outstanding from before a restart, for re-matching
    /// backend callbacks.
    pub async fn resume(&self) -> Reply<Vec<PendingTask>> {
        let pending = self.engine.read_pending_tasks().await;
        if let Reply::Ok(tasks) = &pending {
            info!(pending = tasks.len(), "transfer tasks resumed");
        }
        pending
    }
}
