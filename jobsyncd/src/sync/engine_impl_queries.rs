use jobsync_core::{
    CollectionRecord, Direction, FileOrigin, FileRecord, FileWithCollection, JobRecord,
    PendingTask, Reply,
};

use super::engine::{EngineError, SyncEngine, require};
use super::engine_impl_ops::{fetch_collection, fetch_file, fetch_job};

fn without(files: Vec<FileRecord>, excluding: &[String]) -> Vec<FileRecord> {
    files
        .into_iter()
        .filter(|file| !excluding.contains(&file.id))
        .collect()
}

impl SyncEngine {
    pub async fn read_collection(&self, collection_id: &str) -> Reply<CollectionRecord> {
        self.read(async {
            require("collection id", collection_id)?;
            fetch_collection(&self.index, collection_id).await
        })
        .await
    }

    pub async fn read_auto_upload(&self, collection_id: &str) -> Reply<bool> {
        self.read(async {
            require("collection id", collection_id)?;
            Ok(fetch_collection(&self.index, collection_id)
                .await?
                .auto_upload)
        })
        .await
    }

    pub async fn read_file(&self, file_id: &str) -> Reply<FileRecord> {
        self.read(async {
            require("file id", file_id)?;
            fetch_file(&self.index, file_id).await
        })
        .await
    }

    pub async fn read_file_by_task(&self, task_id: &str) -> Reply<FileRecord> {
        self.read(async {
            require("task id", task_id)?;
            self.index
                .get_file_by_task(task_id)
                .await?
                .ok_or_else(|| EngineError::not_found("task", task_id))
        })
        .await
    }

    pub async fn read_file_with_collection_path(&self, file_id: &str) -> Reply<FileWithCollection> {
        self.read(async {
            require("file id", file_id)?;
            let file = fetch_file(&self.index, file_id).await?;
            let collection = fetch_collection(&self.index, &file.collection_id).await?;
            Ok(FileWithCollection {
                file,
                collection_path: collection.path,
                collection_endpoint: collection.endpoint,
            })
        })
        .await
    }

    pub async fn read_files_for_partition(
        &self,
        collection_id: &str,
        partition: &str,
    ) -> Reply<Vec<FileRecord>> {
        self.read(async {
            require("collection id", collection_id)?;
            require("partition", partition)?;
            Ok(self.index.list_partition(collection_id, partition).await?)
        })
        .await
    }

    /// Files with an assigned, unfinished download task in any collection.
    pub async fn read_downloads(&self) -> Reply<Vec<FileRecord>> {
        self.read(async { Ok(self.index.list_assigned(Direction::Download).await?) })
            .await
    }

    /// Pending download-bound files of one collection.
    pub async fn read_collection_downloads(
        &self,
        collection_id: &str,
        excluding: &[String],
    ) -> Reply<Vec<FileRecord>> {
        self.read(async {
            require("collection id", collection_id)?;
            let files = self
                .index
                .list_pending(collection_id, Direction::Download)
                .await?;
            Ok(without(files, excluding))
        })
        .await
    }

    /// Pending uploads the next `upload_all` would pick up.
    pub async fn read_uploads(
        &self,
        collection_id: &str,
        excluding: &[String],
    ) -> Reply<Vec<FileRecord>> {
        self.read(async {
            require("collection id", collection_id)?;
            let collection = fetch_collection(&self.index, collection_id).await?;
            let files = self
                .index
                .list_pending(collection_id, Direction::Upload)
                .await?
                .into_iter()
                .filter(|file| {
                    collection.auto_upload || file.origin != FileOrigin::Original
                })
                .collect();
            Ok(without(files, excluding))
        })
        .await
    }

    /// Every pending upload-bound file, regardless of auto upload.
    pub async fn read_all_files_needing_upload(
        &self,
        collection_id: &str,
        excluding: &[String],
    ) -> Reply<Vec<FileRecord>> {
        self.read(async {
            require("collection id", collection_id)?;
            let files = self
                .index
                .list_pending(collection_id, Direction::Upload)
                .await?;
            Ok(without(files, excluding))
        })
        .await
    }

    pub async fn read_deleted_files(&self, collection_id: &str) -> Reply<Vec<FileRecord>> {
        self.read(async {
            require("collection id", collection_id)?;
            Ok(self.index.list_deleted(collection_id).await?)
        })
        .await
    }

    pub async fn read_jobs_of_file(&self, file_id: &str) -> Reply<Vec<JobRecord>> {
        self.read(async {
            require("file id", file_id)?;
            Ok(self.index.jobs_of_file(file_id).await?)
        })
        .await
    }

    pub async fn read_job(&self, job_id: &str) -> Reply<JobRecord> {
        self.read(async {
            require("job id", job_id)?;
            fetch_job(&self.index, job_id).await
        })
        .await
    }

    /// Jobs whose every member file has finished.
    pub async fn jobs_done(&self) -> Reply<Vec<JobRecord>> {
        self.read(async { Ok(self.index.jobs_done().await?) }).await
    }

    pub async fn read_pending_tasks(&self) -> Reply<Vec<PendingTask>> {
        self.read(async { Ok(self.index.list_pending_tasks().await?) })
            .await
    }
}
