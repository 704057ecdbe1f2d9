use jobsync_core::{
    CollectionRecord, Completion, Direction, FileOrigin, FileRecord, JobRecord, NewFile, Reply,
    ServerDoc,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::engine::{EngineError, SyncEngine, require};
use super::index::{IndexStore, NewJob};

impl SyncEngine {
    /// Registers a local file that waits for the collection's auto-upload flag.
    pub async fn add_original(&self, file: NewFile) -> Reply<FileRecord> {
        self.register_file(file, FileOrigin::Original).await
    }

    /// Registers a local file explicitly requested for upload.
    pub async fn add_upload(&self, file: NewFile) -> Reply<FileRecord> {
        self.register_file(file, FileOrigin::Upload).await
    }

    async fn register_file(&self, file: NewFile, origin: FileOrigin) -> Reply<FileRecord> {
        async {
            require("file id", &file.id)?;
            require("collection id", &file.collection_id)?;
            require("local path", &file.local_path)?;
            let key = file.collection_id.clone();
            self.serialized(&key, "addFile", move |index| async move {
                fetch_collection(&index, &file.collection_id).await?;
                match index.get_file(&file.id).await? {
                    None => index.insert_local_file(&file, origin).await?,
                    Some(existing) if existing.collection_id != file.collection_id => {
                        return Err(EngineError::InvalidInput(format!(
                            "file {} belongs to collection {}",
                            existing.id, existing.collection_id
                        )));
                    }
                    Some(existing) if existing.direction == Direction::Download => {
                        return Err(EngineError::InvalidState(format!(
                            "file {} is download-bound",
                            existing.id
                        )));
                    }
                    Some(_) => index.reopen_local_file(&file, origin).await?,
                }
                debug!(
                    collection = %file.collection_id,
                    file = %file.id,
                    origin = origin.as_str(),
                    "file registered"
                );
                fetch_file(&index, &file.id).await
            })
            .await
        }
        .await
        .into()
    }

    pub async fn convert_to_download(&self, file_id: &str) -> Reply<FileRecord> {
        let id = file_id.to_string();
        let result = self
            .serialized_for_file(file_id, "convertToDownload", move |index| async move {
                let file = fetch_file(&index, &id).await?;
                if file.direction == Direction::Download {
                    return Ok((file, None));
                }
                if !file.on_server() {
                    return Err(EngineError::InvalidState(format!(
                        "file {id} has no server document"
                    )));
                }
                let finished = release_member(&index, &id, "upload abandoned for download").await?;
                index.set_direction(&id, Direction::Download).await?;
                Ok((fetch_file(&index, &id).await?, finished))
            })
            .await;
        self.settle(result).await.into()
    }

    /// Links a server document to its file, creating a download-bound file when
    /// there is no local counterpart.
    pub async fn merge_server_doc(&self, doc: ServerDoc) -> Reply<FileRecord> {
        async {
            require("file id", &doc.file_id)?;
            require("collection id", &doc.collection_id)?;
            require("document id", &doc.doc_id)?;
            let key = doc.collection_id.clone();
            self.serialized(&key, "mergeServerDoc", move |index| async move {
                fetch_collection(&index, &doc.collection_id).await?;
                match index.get_file(&doc.file_id).await? {
                    None => {
                        index.insert_server_file(&doc).await?;
                        debug!(
                            collection = %doc.collection_id,
                            file = %doc.file_id,
                            "server document added for download"
                        );
                    }
                    Some(existing) if existing.collection_id != doc.collection_id => {
                        return Err(EngineError::InvalidInput(format!(
                            "file {} belongs to collection {}",
                            existing.id, existing.collection_id
                        )));
                    }
                    Some(existing) => {
                        let revision_changed =
                            doc.revision.is_some() && doc.revision != existing.server_revision;
                        let reopen = existing.direction == Direction::Download
                            && existing.complete
                            && revision_changed;
                        index.link_server_doc(&doc, reopen).await?;
                        if reopen {
                            debug!(file = %doc.file_id, "newer server revision queued for download");
                        }
                    }
                }
                fetch_file(&index, &doc.file_id).await
            })
            .await
        }
        .await
        .into()
    }

    pub async fn set_not_on_server(&self, file_id: &str) -> Reply<FileRecord> {
        let id = file_id.to_string();
        self.serialized_for_file(file_id, "setNotOnServer", move |index| async move {
            let file = fetch_file(&index, &id).await?;
            if file.local_path.is_none() {
                return Err(EngineError::InvalidState(format!(
                    "file {id} has no local copy"
                )));
            }
            let reopen = file.direction == Direction::Upload && file.complete;
            index.clear_server_doc(&id, reopen).await?;
            fetch_file(&index, &id).await
        })
        .await
        .into()
    }

    /// Reverses a merge. Returns `None` when the file only existed because of
    /// the merge and has been removed.
    pub async fn unmerge_server_doc(&self, file_id: &str) -> Reply<Option<FileRecord>> {
        let id = file_id.to_string();
        let result = self
            .serialized_for_file(file_id, "unmergeServerDoc", move |index| async move {
                let file = fetch_file(&index, &id).await?;
                if file.origin == FileOrigin::Server {
                    let finished = release_member(&index, &id, "merged file left its job").await?;
                    index.delete_file(&id).await?;
                    info!(collection = %file.collection_id, file = %id, "merged file removed");
                    return Ok((None, finished));
                }
                if file.on_server() {
                    index.clear_server_doc(&id, false).await?;
                }
                Ok((Some(fetch_file(&index, &id).await?), None))
            })
            .await;
        self.settle(result).await.into()
    }

    /// Creates (or returns the existing) upload job over every eligible
    /// pending file. `None` when nothing needs uploading.
    pub async fn upload_all(
        &self,
        job_id: &str,
        collection_id: &str,
        notification: Option<&str>,
    ) -> Reply<Option<JobRecord>> {
        let job = NewJob {
            id: job_id.to_string(),
            collection_id: collection_id.to_string(),
            partition: None,
            direction: Direction::Upload,
            notification: notification.map(str::to_string),
        };
        self.create_upload_job(job, "uploadAll").await
    }

    pub async fn upload_partition(
        &self,
        job_id: &str,
        collection_id: &str,
        partition: &str,
        notification: Option<&str>,
    ) -> Reply<Option<JobRecord>> {
        let job = NewJob {
            id: job_id.to_string(),
            collection_id: collection_id.to_string(),
            partition: Some(partition.to_string()),
            direction: Direction::Upload,
            notification: notification.map(str::to_string),
        };
        self.create_upload_job(job, "uploadPartition").await
    }

    async fn create_upload_job(&self, job: NewJob, name: &'static str) -> Reply<Option<JobRecord>> {
        async {
            require("job id", &job.id)?;
            require("collection id", &job.collection_id)?;
            if let Some(partition) = &job.partition {
                require("partition", partition)?;
            }
            let key = job.collection_id.clone();
            self.serialized(&key, name, move |index| async move {
                let collection = fetch_collection(&index, &job.collection_id).await?;
                if let Some(existing) = existing_job(&index, &job).await? {
                    return Ok(Some(existing));
                }
                // Partition uploads are explicit requests; whole-collection
                // uploads only pick up originals while auto upload is on.
                let explicit = job.partition.is_some();
                let members: Vec<String> = index
                    .list_unclaimed(&job.collection_id, Direction::Upload, job.partition.as_deref())
                    .await?
                    .into_iter()
                    .filter(|file| {
                        explicit || collection.auto_upload || file.origin != FileOrigin::Original
                    })
                    .map(|file| file.id)
                    .collect();
                insert_members(&index, &job, members).await
            })
            .await
        }
        .await
        .into()
    }

    /// Queues one file for download, joining the collection's open download
    /// job when there is one.
    pub async fn download(&self, file_id: &str) -> Reply<JobRecord> {
        let id = file_id.to_string();
        self.serialized_for_file(file_id, "download", move |index| async move {
            let file = fetch_file(&index, &id).await?;
            if file.direction != Direction::Download {
                return Err(EngineError::InvalidState(format!("file {id} is upload-bound")));
            }
            if file.deleted {
                return Err(EngineError::InvalidState(format!("file {id} is marked deleted")));
            }
            if !file.on_server() {
                return Err(EngineError::InvalidState(format!(
                    "file {id} has no server document"
                )));
            }
            if let Some(membership) = index.active_membership(&id).await? {
                return fetch_job(&index, &membership.job_id).await;
            }
            if file.complete {
                index.reopen_file(&id).await?;
            }
            let job_id = match index.open_job(&file.collection_id, Direction::Download).await? {
                Some(job) => {
                    index.add_member(&job.id, &id).await?;
                    info!(collection = %file.collection_id, job = %job.id, file = %id, "download added to job");
                    job.id
                }
                None => {
                    let job = NewJob {
                        id: Uuid::new_v4().to_string(),
                        collection_id: file.collection_id.clone(),
                        partition: None,
                        direction: Direction::Download,
                        notification: None,
                    };
                    index.insert_job(&job, std::slice::from_ref(&id)).await?;
                    info!(collection = %file.collection_id, job = %job.id, file = %id, "download job created");
                    job.id
                }
            };
            fetch_job(&index, &job_id).await
        })
        .await
        .into()
    }

    pub async fn download_all(
        &self,
        collection_id: &str,
        excluding: Vec<String>,
    ) -> Reply<Option<JobRecord>> {
        async {
            require("collection id", collection_id)?;
            let collection_id = collection_id.to_string();
            let key = collection_id.clone();
            self.serialized(&key, "downloadAll", move |index| async move {
                fetch_collection(&index, &collection_id).await?;
                let members: Vec<String> = index
                    .list_unclaimed(&collection_id, Direction::Download, None)
                    .await?
                    .into_iter()
                    .filter(|file| file.on_server() && !excluding.contains(&file.id))
                    .map(|file| file.id)
                    .collect();
                let job = NewJob {
                    id: Uuid::new_v4().to_string(),
                    collection_id,
                    partition: None,
                    direction: Direction::Download,
                    notification: None,
                };
                insert_members(&index, &job, members).await
            })
            .await
        }
        .await
        .into()
    }

    pub async fn set_upload(&self, file_id: &str, task_id: &str) -> Reply<FileRecord> {
        self.assign_task(file_id, task_id, Direction::Upload, "setUpload")
            .await
    }

    pub async fn set_download(&self, file_id: &str, task_id: &str) -> Reply<FileRecord> {
        self.assign_task(file_id, task_id, Direction::Download, "setDownload")
            .await
    }

    async fn assign_task(
        &self,
        file_id: &str,
        task_id: &str,
        direction: Direction,
        name: &'static str,
    ) -> Reply<FileRecord> {
        async {
            require("task id", task_id)?;
            let id = file_id.to_string();
            let task = task_id.to_string();
            self.serialized_for_file(file_id, name, move |index| async move {
                let file = fetch_file(&index, &id).await?;
                if file.direction != direction {
                    return Err(EngineError::InvalidState(format!(
                        "file {id} is {}-bound",
                        file.direction.as_str()
                    )));
                }
                let membership = index.active_membership(&id).await?.ok_or_else(|| {
                    EngineError::InvalidState(format!("file {id} is not part of an unfinished job"))
                })?;
                match membership.task_id.as_deref() {
                    Some(current) if current == task => {}
                    Some(current) => {
                        return Err(EngineError::InvalidState(format!(
                            "file {id} already has outstanding task {current}"
                        )));
                    }
                    None => {
                        if let Some(other) = index.membership_by_task(&task).await? {
                            return Err(EngineError::InvalidInput(format!(
                                "task {task} is already assigned to file {}",
                                other.file_id
                            )));
                        }
                        index.set_task(&membership, Some(&task)).await?;
                        debug!(file = %id, job = %membership.job_id, task = %task, "task assigned");
                    }
                }
                fetch_file(&index, &id).await
            })
            .await
        }
        .await
        .into()
    }

    pub async fn upload_complete(&self, file_id: &str) -> Reply<Completion> {
        self.complete(file_id, Some(Direction::Upload), "uploadComplete")
            .await
    }

    pub async fn download_complete(&self, file_id: &str) -> Reply<Completion> {
        self.complete(file_id, Some(Direction::Download), "downloadComplete")
            .await
    }

    /// Completion hook for callers that do not know the file's direction.
    pub async fn file_tasks_complete(&self, file_id: &str) -> Reply<Completion> {
        self.complete(file_id, None, "fileTasksComplete").await
    }

    async fn complete(
        &self,
        file_id: &str,
        expected: Option<Direction>,
        name: &'static str,
    ) -> Reply<Completion> {
        let id = file_id.to_string();
        let result = self
            .serialized_for_file(file_id, name, move |index| async move {
                complete_file(&index, &id, expected, None).await
            })
            .await;
        self.finish_completion(result).await
    }

    /// Completion signal keyed by the transfer task identifier.
    pub async fn complete_task(&self, task_id: &str) -> Reply<Completion> {
        let result = async {
            let file = self.file_for_task(task_id).await?;
            let (file_id, task) = (file.id, task_id.to_string());
            self.serialized(&file.collection_id, "completeTask", move |index| async move {
                complete_file(&index, &file_id, None, Some(task)).await
            })
            .await
        }
        .await;
        self.finish_completion(result).await
    }

    /// Failure signal: frees the file for a new task and records the message.
    pub async fn task_failed(&self, task_id: &str, message: &str) -> Reply<FileRecord> {
        async {
            let file = self.file_for_task(task_id).await?;
            let task = task_id.to_string();
            let message = message.to_string();
            self.serialized(&file.collection_id, "taskFailed", move |index| async move {
                let membership = index.membership_by_task(&task).await?.ok_or_else(|| {
                    EngineError::InvalidState(format!("task {task} is not outstanding"))
                })?;
                index.set_task(&membership, None).await?;
                index
                    .set_last_error(&membership.file_id, Some(&message))
                    .await?;
                warn!(
                    file = %membership.file_id,
                    job = %membership.job_id,
                    task = %task,
                    error = %message,
                    "transfer task failed"
                );
                fetch_file(&index, &membership.file_id).await
            })
            .await
        }
        .await
        .into()
    }

    async fn file_for_task(&self, task_id: &str) -> Result<FileRecord, EngineError> {
        require("task id", task_id)?;
        self.index
            .get_file_by_task(task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task", task_id))
    }

    async fn finish_completion(&self, result: Result<Completion, EngineError>) -> Reply<Completion> {
        if let Ok(completion) = &result {
            if completion.job_done && !completion.already_complete {
                if let (Some(job_id), Some(token)) = (&completion.job_id, &completion.notification)
                {
                    self.notifier.job_finished(job_id, token).await;
                }
            }
        }
        result.into()
    }

    /// Sends the notification of every job an operation finished, then hands
    /// back the operation's own value.
    async fn settle<T, J>(&self, result: Result<(T, J), EngineError>) -> Result<T, EngineError>
    where
        J: IntoIterator<Item = JobRecord>,
    {
        let (value, finished) = result?;
        for job in finished {
            if let Some(token) = &job.notification {
                self.notifier.job_finished(&job.id, token).await;
            }
        }
        Ok(value)
    }

    /// Deletes a job; its files stay and may join a later job.
    pub async fn remove_job(&self, job_id: &str) -> Reply<()> {
        async {
            require("job id", job_id)?;
            let job = fetch_job(&self.index, job_id).await?;
            let key = job.collection_id.clone();
            let (id, collection_id) = (job.id, job.collection_id);
            self.serialized(&key, "removeJob", move |index| async move {
                if !index.delete_job(&id).await? {
                    return Err(EngineError::not_found("job", id));
                }
                info!(collection = %collection_id, job = %id, "job removed");
                Ok(())
            })
            .await
        }
        .await
        .into()
    }

    pub async fn remove_all_jobs(&self, collection_id: &str) -> Reply<u64> {
        async {
            require("collection id", collection_id)?;
            let id = collection_id.to_string();
            self.serialized(collection_id, "removeAllJobs", move |index| async move {
                fetch_collection(&index, &id).await?;
                let removed = index.delete_jobs_of_collection(&id).await?;
                info!(collection = %id, removed, "jobs removed");
                Ok(removed)
            })
            .await
        }
        .await
        .into()
    }

    /// Starts a new mark generation and returns its number.
    pub async fn begin_mark(&self, collection_id: &str) -> Reply<i64> {
        async {
            require("collection id", collection_id)?;
            let id = collection_id.to_string();
            self.serialized(collection_id, "beginMark", move |index| async move {
                let generation = index
                    .begin_mark(&id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("collection", id.as_str()))?;
                debug!(collection = %id, generation, "mark generation started");
                Ok(generation)
            })
            .await
        }
        .await
        .into()
    }

    /// Removes every file not touched since the last `begin_mark`, returning
    /// their ids.
    pub async fn delete_unmarked(&self, collection_id: &str) -> Reply<Vec<String>> {
        async {
            require("collection id", collection_id)?;
            let id = collection_id.to_string();
            let result = self
                .serialized(collection_id, "deleteUnmarked", move |index| async move {
                    fetch_collection(&index, &id).await?;
                    let open = index.unfinished_job_ids(&id).await?;
                    let removed = index.delete_unmarked(&id).await?;
                    info!(collection = %id, removed = removed.len(), "unmarked files swept");
                    let mut finished = Vec::new();
                    for job_id in open {
                        if let Some(job) = index.get_job(&job_id).await? {
                            if job.is_done() {
                                info!(collection = %id, job = %job.id, "job complete");
                                finished.push(job);
                            }
                        }
                    }
                    Ok((removed, finished))
                })
                .await;
            self.settle(result).await
        }
        .await
        .into()
    }

    pub async fn mark_file_as_deleted(&self, file_id: &str) -> Reply<FileRecord> {
        let id = file_id.to_string();
        let result = self
            .serialized_for_file(file_id, "markFileAsDeleted", move |index| async move {
                let finished = release_member(&index, &id, "deleted file left its job").await?;
                index.set_deleted(&id, true).await?;
                Ok((fetch_file(&index, &id).await?, finished))
            })
            .await;
        self.settle(result).await.into()
    }

    pub async fn remove_deleted_file(&self, file_id: &str) -> Reply<()> {
        let id = file_id.to_string();
        self.serialized_for_file(file_id, "removeDeletedFile", move |index| async move {
            let file = fetch_file(&index, &id).await?;
            if !file.deleted {
                return Err(EngineError::InvalidState(format!(
                    "file {id} is not marked deleted"
                )));
            }
            index.delete_file(&id).await?;
            info!(collection = %file.collection_id, file = %id, "deleted file purged");
            Ok(())
        })
        .await
        .into()
    }
}

pub(super) async fn fetch_file(index: &IndexStore, file_id: &str) -> Result<FileRecord, EngineError> {
    index
        .get_file(file_id)
        .await?
        .ok_or_else(|| EngineError::not_found("file", file_id))
}

pub(super) async fn fetch_job(index: &IndexStore, job_id: &str) -> Result<JobRecord, EngineError> {
    index
        .get_job(job_id)
        .await?
        .ok_or_else(|| EngineError::not_found("job", job_id))
}

pub(super) async fn fetch_collection(
    index: &IndexStore,
    collection_id: &str,
) -> Result<CollectionRecord, EngineError> {
    index
        .get_collection(collection_id)
        .await?
        .ok_or_else(|| EngineError::not_found("collection", collection_id))
}

/// A retried creation call returns the job it made the first time.
async fn existing_job(index: &IndexStore, job: &NewJob) -> Result<Option<JobRecord>, EngineError> {
    let Some(existing) = index.get_job(&job.id).await? else {
        return Ok(None);
    };
    if existing.collection_id != job.collection_id
        || existing.direction != job.direction
        || existing.partition != job.partition
    {
        return Err(EngineError::InvalidInput(format!(
            "job {} already exists with a different scope",
            job.id
        )));
    }
    debug!(collection = %job.collection_id, job = %job.id, "job already exists");
    Ok(Some(existing))
}

async fn insert_members(
    index: &IndexStore,
    job: &NewJob,
    members: Vec<String>,
) -> Result<Option<JobRecord>, EngineError> {
    if members.is_empty() {
        debug!(collection = %job.collection_id, job = %job.id, "nothing to transfer");
        return Ok(None);
    }
    index.insert_job(job, &members).await?;
    info!(
        collection = %job.collection_id,
        job = %job.id,
        direction = job.direction.as_str(),
        files = members.len(),
        "job created"
    );
    Ok(index.get_job(&job.id).await?)
}

/// Drops the file's active membership, if any. Returns the job when the file
/// was its last unfinished member.
async fn release_member(
    index: &IndexStore,
    file_id: &str,
    reason: &'static str,
) -> Result<Option<JobRecord>, EngineError> {
    let Some(membership) = index.active_membership(file_id).await? else {
        return Ok(None);
    };
    index.remove_member(&membership).await?;
    info!(file = %file_id, job = %membership.job_id, "{reason}");
    let job = fetch_job(index, &membership.job_id).await?;
    if !job.is_done() {
        return Ok(None);
    }
    info!(collection = %job.collection_id, job = %job.id, "job complete");
    Ok(Some(job))
}

async fn complete_file(
    index: &IndexStore,
    file_id: &str,
    expected: Option<Direction>,
    task_id: Option<String>,
) -> Result<Completion, EngineError> {
    let file = fetch_file(index, file_id).await?;
    if let Some(expected) = expected {
        if file.direction != expected {
            return Err(EngineError::InvalidState(format!(
                "file {file_id} is {}-bound",
                file.direction.as_str()
            )));
        }
    }
    let membership = match &task_id {
        Some(task) => index.membership_by_task(task).await?,
        None => index.active_membership(file_id).await?,
    };
    match membership {
        Some(membership) if membership.task_id.is_some() => {
            index.complete_member(&membership).await?;
            let job = fetch_job(index, &membership.job_id).await?;
            let job_done = job.is_done();
            debug!(file = %file_id, job = %job.id, "file transfer complete");
            if job_done {
                info!(collection = %job.collection_id, job = %job.id, "job complete");
            }
            Ok(Completion {
                file_id: file_id.to_string(),
                job_id: Some(job.id),
                job_done,
                notification: job.notification,
                already_complete: false,
            })
        }
        None if file.complete || task_id.is_some() => {
            debug!(file = %file_id, "duplicate completion ignored");
            let job = match &file.job_id {
                Some(job_id) => index.get_job(job_id).await?,
                None => None,
            };
            Ok(Completion {
                file_id: file_id.to_string(),
                job_id: file.job_id.clone(),
                job_done: job.as_ref().is_some_and(JobRecord::is_done),
                notification: job.and_then(|job| job.notification),
                already_complete: true,
            })
        }
        _ => Err(EngineError::InvalidState(format!(
            "file {file_id} has no assigned task"
        ))),
    }
}
