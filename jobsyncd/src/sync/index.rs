use jobsync_core::{
    CollectionConfig, CollectionRecord, Direction, FileOrigin, FileRecord, JobFile, JobRecord,
    NewFile, PendingTask, ServerDoc, Value,
};
use thiserror::Error;
use time::OffsetDateTime;

use super::sql::{SqlError, SqlExecutor, SqlRow, Statement};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("storage error: {0}")]
    Sql(#[from] SqlError),
    #[error("invalid JSON column: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid direction: {0}")]
    InvalidDirection(String),
    #[error("invalid file origin: {0}")]
    InvalidOrigin(String),
}

const FILE_COLUMNS: &str = "f.id AS id, f.collection_id AS collection_id, f.partition AS partition, \
     f.local_path AS local_path, f.server_doc AS server_doc, f.server_revision AS server_revision, \
     f.direction AS direction, f.origin AS origin, f.complete AS complete, f.deleted AS deleted, \
     f.job_id AS job_id, \
     (SELECT jf.task_id FROM job_files jf WHERE jf.file_id = f.id AND jf.job_id = f.job_id) AS task_id, \
     f.last_error AS last_error, f.seen_generation AS seen_generation, \
     f.created_at AS created_at, f.updated_at AS updated_at";

// Every file write stamps the row with the collection's current mark generation.
const STAMP: &str =
    "seen_generation = (SELECT c.mark_generation FROM collections c WHERE c.id = files.collection_id)";

fn parse_direction(value: &str) -> Result<Direction, IndexError> {
    match value {
        "upload" => Ok(Direction::Upload),
        "download" => Ok(Direction::Download),
        other => Err(IndexError::InvalidDirection(other.to_string())),
    }
}

fn parse_origin(value: &str) -> Result<FileOrigin, IndexError> {
    match value {
        "original" => Ok(FileOrigin::Original),
        "upload" => Ok(FileOrigin::Upload),
        "server" => Ok(FileOrigin::Server),
        other => Err(IndexError::InvalidOrigin(other.to_string())),
    }
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// The unfinished job entry currently claiming a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub job_id: String,
    pub file_id: String,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub id: String,
    pub collection_id: String,
    pub partition: Option<String>,
    pub direction: Direction,
    pub notification: Option<String>,
}

/// Typed access to the files, jobs, collections and config tables.
///
/// Reads go through read-only storage access; multi-row writes run in one
/// transaction. Callers are responsible for serializing mutations per
/// collection.
pub struct IndexStore {
    sql: SqlExecutor,
}

impl IndexStore {
    pub fn new(sql: SqlExecutor) -> Self {
        Self { sql }
    }

    pub fn sql(&self) -> &SqlExecutor {
        &self.sql
    }

    pub async fn init(&self) -> Result<String, IndexError> {
        let database = self.sql.open().await?;
        self.sql.migrate().await?;
        Ok(database)
    }

    pub async fn put_config(&self, entries: &[(String, Value)]) -> Result<(), IndexError> {
        let mut statements = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            statements.push(
                Statement::new(
                    "INSERT INTO config (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                )
                .arg(key)
                .arg(serde_json::to_string(value)?),
            );
        }
        self.sql.transaction(&statements).await?;
        Ok(())
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<Value>, IndexError> {
        let row = self
            .sql
            .read_one(&Statement::new("SELECT value FROM config WHERE key = ?1").arg(key))
            .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.text("value")?)?)),
            None => Ok(None),
        }
    }

    pub async fn upsert_collection(
        &self,
        collection: &CollectionConfig,
    ) -> Result<(), IndexError> {
        let settings = collection
            .settings
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.sql
            .write(
                &Statement::new(
                    "INSERT INTO collections (id, path, partition_strategy, endpoint, settings, auto_upload, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, 0), ?7)
                     ON CONFLICT(id) DO UPDATE SET
                        path = excluded.path,
                        partition_strategy = excluded.partition_strategy,
                        endpoint = excluded.endpoint,
                        settings = excluded.settings,
                        auto_upload = COALESCE(?6, collections.auto_upload),
                        updated_at = excluded.updated_at",
                )
                .arg(&collection.id)
                .arg(collection.path.as_deref())
                .arg(collection.partition_strategy.as_deref())
                .arg(collection.endpoint.as_deref())
                .arg(settings)
                .arg(collection.auto_upload)
                .arg(now()),
            )
            .await?;
        Ok(())
    }

    pub async fn get_collection(&self, id: &str) -> Result<Option<CollectionRecord>, IndexError> {
        let row = self
            .sql
            .read_one(
                &Statement::new(
                    "SELECT id, path, partition_strategy, endpoint, settings, auto_upload, mark_generation, updated_at
                     FROM collections WHERE id = ?1",
                )
                .arg(id),
            )
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let settings = row
            .opt_text("settings")?
            .map(|text| serde_json::from_str(&text))
            .transpose()?;
        Ok(Some(CollectionRecord {
            id: row.text("id")?,
            path: row.opt_text("path")?,
            partition_strategy: row.opt_text("partition_strategy")?,
            endpoint: row.opt_text("endpoint")?,
            settings,
            auto_upload: row.flag("auto_upload")?,
            mark_generation: row.integer("mark_generation")?,
            updated_at: row.integer("updated_at")?,
        }))
    }

    /// Returns `false` when the collection does not exist.
    pub async fn set_auto_upload(&self, id: &str, enabled: bool) -> Result<bool, IndexError> {
        let rows = self
            .sql
            .write(
                &Statement::new(
                    "UPDATE collections SET auto_upload = ?2, updated_at = ?3 WHERE id = ?1 RETURNING id",
                )
                .arg(id)
                .arg(enabled)
                .arg(now()),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    pub async fn begin_mark(&self, id: &str) -> Result<Option<i64>, IndexError> {
        let rows = self
            .sql
            .write(
                &Statement::new(
                    "UPDATE collections SET mark_generation = mark_generation + 1, updated_at = ?2
                     WHERE id = ?1 RETURNING mark_generation",
                )
                .arg(id)
                .arg(now()),
            )
            .await?;
        rows.first()
            .map(|row| row.integer("mark_generation"))
            .transpose()
            .map_err(IndexError::from)
    }

    pub async fn insert_local_file(
        &self,
        file: &NewFile,
        origin: FileOrigin,
    ) -> Result<(), IndexError> {
        let ts = now();
        self.sql
            .write(
                &Statement::new(
                    "INSERT INTO files (id, collection_id, partition, local_path, direction, origin, seen_generation, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'upload', ?5,
                        (SELECT mark_generation FROM collections WHERE id = ?2), ?6, ?6)",
                )
                .arg(&file.id)
                .arg(&file.collection_id)
                .arg(file.partition.as_deref())
                .arg(&file.local_path)
                .arg(origin.as_str())
                .arg(ts),
            )
            .await?;
        Ok(())
    }

    /// Re-registers an existing upload-bound file after a local change.
    pub async fn reopen_local_file(
        &self,
        file: &NewFile,
        origin: FileOrigin,
    ) -> Result<(), IndexError> {
        self.sql
            .write(
                &Statement::new(format!(
                    "UPDATE files SET
                        local_path = ?2,
                        partition = COALESCE(?3, partition),
                        origin = CASE WHEN ?4 = 'upload' THEN 'upload' ELSE origin END,
                        complete = 0,
                        deleted = 0,
                        updated_at = ?5,
                        {STAMP}
                     WHERE id = ?1"
                ))
                .arg(&file.id)
                .arg(&file.local_path)
                .arg(file.partition.as_deref())
                .arg(origin.as_str())
                .arg(now()),
            )
            .await?;
        Ok(())
    }

    pub async fn insert_server_file(&self, doc: &ServerDoc) -> Result<(), IndexError> {
        let ts = now();
        self.sql
            .write(
                &Statement::new(
                    "INSERT INTO files (id, collection_id, partition, local_path, server_doc, server_revision, direction, origin, seen_generation, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'download', 'server',
                        (SELECT mark_generation FROM collections WHERE id = ?2), ?7, ?7)",
                )
                .arg(&doc.file_id)
                .arg(&doc.collection_id)
                .arg(doc.partition.as_deref())
                .arg(doc.local_path.as_deref())
                .arg(&doc.doc_id)
                .arg(doc.revision.as_deref())
                .arg(ts),
            )
            .await?;
        Ok(())
    }

    pub async fn link_server_doc(
        &self,
        doc: &ServerDoc,
        reopen: bool,
    ) -> Result<(), IndexError> {
        self.sql
            .write(
                &Statement::new(format!(
                    "UPDATE files SET
                        server_doc = ?2,
                        server_revision = COALESCE(?3, server_revision),
                        local_path = COALESCE(local_path, ?4),
                        partition = COALESCE(partition, ?5),
                        complete = CASE WHEN ?6 = 1 THEN 0 ELSE complete END,
                        updated_at = ?7,
                        {STAMP}
                     WHERE id = ?1"
                ))
                .arg(&doc.file_id)
                .arg(&doc.doc_id)
                .arg(doc.revision.as_deref())
                .arg(doc.local_path.as_deref())
                .arg(doc.partition.as_deref())
                .arg(reopen)
                .arg(now()),
            )
            .await?;
        Ok(())
    }

    pub async fn clear_server_doc(&self, file_id: &str, reopen: bool) -> Result<(), IndexError> {
        self.sql
            .write(
                &Statement::new(format!(
                    "UPDATE files SET
                        server_doc = NULL,
                        server_revision = NULL,
                        complete = CASE WHEN ?2 = 1 THEN 0 ELSE complete END,
                        updated_at = ?3,
                        {STAMP}
                     WHERE id = ?1"
                ))
                .arg(file_id)
                .arg(reopen)
                .arg(now()),
            )
            .await?;
        Ok(())
    }

    pub async fn set_direction(&self, file_id: &str, direction: Direction) -> Result<(), IndexError> {
        self.sql
            .write(
                &Statement::new(format!(
                    "UPDATE files SET direction = ?2, complete = 0, updated_at = ?3, {STAMP} WHERE id = ?1"
                ))
                .arg(file_id)
                .arg(direction.as_str())
                .arg(now()),
            )
            .await?;
        Ok(())
    }

    pub async fn reopen_file(&self, file_id: &str) -> Result<(), IndexError> {
        self.sql
            .write(
                &Statement::new(format!(
                    "UPDATE files SET complete = 0, updated_at = ?2, {STAMP} WHERE id = ?1"
                ))
                .arg(file_id)
                .arg(now()),
            )
            .await?;
        Ok(())
    }

    pub async fn set_deleted(&self, file_id: &str, deleted: bool) -> Result<(), IndexError> {
        self.sql
            .write(
                &Statement::new(format!(
                    "UPDATE files SET deleted = ?2, updated_at = ?3, {STAMP} WHERE id = ?1"
                ))
                .arg(file_id)
                .arg(deleted)
                .arg(now()),
            )
            .await?;
        Ok(())
    }

    pub async fn set_last_error(
        &self,
        file_id: &str,
        message: Option<&str>,
    ) -> Result<(), IndexError> {
        self.sql
            .write(
                &Statement::new(format!(
                    "UPDATE files SET last_error = ?2, updated_at = ?3, {STAMP} WHERE id = ?1"
                ))
                .arg(file_id)
                .arg(message)
                .arg(now()),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<bool, IndexError> {
        let rows = self
            .sql
            .write(&Statement::new("DELETE FROM files WHERE id = ?1 RETURNING id").arg(file_id))
            .await?;
        Ok(!rows.is_empty())
    }

    /// Deletes files not stamped in the collection's current mark generation.
    /// Local files still waiting for their first upload are never swept.
    pub async fn delete_unmarked(&self, collection_id: &str) -> Result<Vec<String>, IndexError> {
        let rows = self
            .sql
            .write(
                &Statement::new(
                    "DELETE FROM files
                     WHERE collection_id = ?1
                        AND seen_generation < (SELECT mark_generation FROM collections WHERE id = ?1)
                        AND NOT (server_doc IS NULL AND direction = 'upload' AND complete = 0)
                     RETURNING id",
                )
                .arg(collection_id),
            )
            .await?;
        let mut ids = rows
            .iter()
            .map(|row| row.text("id"))
            .collect::<Result<Vec<_>, _>>()?;
        ids.sort();
        Ok(ids)
    }

    pub async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>, IndexError> {
        let row = self
            .sql
            .read_one(
                &Statement::new(format!("SELECT {FILE_COLUMNS} FROM files f WHERE f.id = ?1"))
                    .arg(file_id),
            )
            .await?;
        row.as_ref().map(file_from_row).transpose()
    }

    /// Looks a file up by transfer task, preferring an unfinished assignment.
    pub async fn get_file_by_task(&self, task_id: &str) -> Result<Option<FileRecord>, IndexError> {
        let row = self
            .sql
            .read_one(
                &Statement::new(format!(
                    "SELECT {FILE_COLUMNS} FROM files f
                     JOIN job_files t ON t.file_id = f.id
                     WHERE t.task_id = ?1
                     ORDER BY t.complete ASC
                     LIMIT 1"
                ))
                .arg(task_id),
            )
            .await?;
        row.as_ref().map(file_from_row).transpose()
    }

    /// Incomplete, non-deleted files bound in `direction`.
    pub async fn list_pending(
        &self,
        collection_id: &str,
        direction: Direction,
    ) -> Result<Vec<FileRecord>, IndexError> {
        self.list_files(
            Statement::new(format!(
                "SELECT {FILE_COLUMNS} FROM files f
                 WHERE f.collection_id = ?1 AND f.direction = ?2 AND f.complete = 0 AND f.deleted = 0
                 ORDER BY f.created_at ASC, f.id ASC"
            ))
            .arg(collection_id)
            .arg(direction.as_str()),
        )
        .await
    }

    /// Pending files that no unfinished job has claimed yet.
    pub async fn list_unclaimed(
        &self,
        collection_id: &str,
        direction: Direction,
        partition: Option<&str>,
    ) -> Result<Vec<FileRecord>, IndexError> {
        self.list_files(
            Statement::new(format!(
                "SELECT {FILE_COLUMNS} FROM files f
                 WHERE f.collection_id = ?1 AND f.direction = ?2 AND f.complete = 0 AND f.deleted = 0
                    AND (?3 IS NULL OR f.partition = ?3)
                    AND NOT EXISTS (
                        SELECT 1 FROM job_files jf WHERE jf.file_id = f.id AND jf.complete = 0
                    )
                 ORDER BY f.created_at ASC, f.id ASC"
            ))
            .arg(collection_id)
            .arg(direction.as_str())
            .arg(partition),
        )
        .await
    }

    pub async fn list_partition(
        &self,
        collection_id: &str,
        partition: &str,
    ) -> Result<Vec<FileRecord>, IndexError> {
        self.list_files(
            Statement::new(format!(
                "SELECT {FILE_COLUMNS} FROM files f
                 WHERE f.collection_id = ?1 AND f.partition = ?2 AND f.deleted = 0
                 ORDER BY f.created_at ASC, f.id ASC"
            ))
            .arg(collection_id)
            .arg(partition),
        )
        .await
    }

    pub async fn list_deleted(&self, collection_id: &str) -> Result<Vec<FileRecord>, IndexError> {
        self.list_files(
            Statement::new(format!(
                "SELECT {FILE_COLUMNS} FROM files f
                 WHERE f.collection_id = ?1 AND f.deleted = 1
                 ORDER BY f.id ASC"
            ))
            .arg(collection_id),
        )
        .await
    }

    /// Files with an assigned, unfinished transfer task, across collections.
    pub async fn list_assigned(&self, direction: Direction) -> Result<Vec<FileRecord>, IndexError> {
        self.list_files(
            Statement::new(format!(
                "SELECT {FILE_COLUMNS} FROM files f
                 JOIN job_files t ON t.file_id = f.id AND t.complete = 0
                 WHERE t.task_id IS NOT NULL AND f.direction = ?1 AND f.deleted = 0
                 ORDER BY f.collection_id ASC, f.id ASC"
            ))
            .arg(direction.as_str()),
        )
        .await
    }

    async fn list_files(&self, statement: Statement) -> Result<Vec<FileRecord>, IndexError> {
        let rows = self.sql.read(&statement).await?;
        rows.iter().map(file_from_row).collect()
    }

    pub async fn insert_job(&self, job: &NewJob, file_ids: &[String]) -> Result<(), IndexError> {
        let ts = now();
        let mut statements = vec![
            Statement::new(
                "INSERT INTO jobs (id, collection_id, partition, direction, notification, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .arg(&job.id)
            .arg(&job.collection_id)
            .arg(job.partition.as_deref())
            .arg(job.direction.as_str())
            .arg(job.notification.as_deref())
            .arg(ts),
        ];
        for (position, file_id) in file_ids.iter().enumerate() {
            statements.push(
                Statement::new(
                    "INSERT INTO job_files (job_id, file_id, position) VALUES (?1, ?2, ?3)",
                )
                .arg(&job.id)
                .arg(file_id)
                .arg(position as i64),
            );
            statements.push(claim_statement(&job.id, file_id, ts));
        }
        self.sql.transaction(&statements).await?;
        Ok(())
    }

    /// Appends a file to a job. A file rejoining a job it already finished in
    /// gets its old row reopened.
    pub async fn add_member(&self, job_id: &str, file_id: &str) -> Result<(), IndexError> {
        self.sql
            .transaction(&[
                Statement::new(
                    "INSERT INTO job_files (job_id, file_id, position)
                     VALUES (?1, ?2, (SELECT COALESCE(MAX(position), -1) + 1 FROM job_files WHERE job_id = ?1))
                     ON CONFLICT (job_id, file_id) DO UPDATE SET complete = 0, task_id = NULL",
                )
                .arg(job_id)
                .arg(file_id),
                claim_statement(job_id, file_id, now()),
            ])
            .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, IndexError> {
        let row = self
            .sql
            .read_one(
                &Statement::new(
                    "SELECT id, collection_id, partition, direction, notification, created_at
                     FROM jobs WHERE id = ?1",
                )
                .arg(job_id),
            )
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let members = self
            .sql
            .read(
                &Statement::new(
                    "SELECT file_id, task_id, complete FROM job_files
                     WHERE job_id = ?1 ORDER BY position ASC",
                )
                .arg(job_id),
            )
            .await?;
        let mut files = Vec::with_capacity(members.len());
        for member in &members {
            files.push(JobFile {
                file_id: member.text("file_id")?,
                task_id: member.opt_text("task_id")?,
                complete: member.flag("complete")?,
            });
        }
        Ok(Some(JobRecord {
            id: row.text("id")?,
            collection_id: row.text("collection_id")?,
            partition: row.opt_text("partition")?,
            direction: parse_direction(&row.text("direction")?)?,
            notification: row.opt_text("notification")?,
            created_at: row.integer("created_at")?,
            files,
        }))
    }

    /// Most recent job of the collection that still has unfinished members.
    pub async fn open_job(
        &self,
        collection_id: &str,
        direction: Direction,
    ) -> Result<Option<JobRecord>, IndexError> {
        let row = self
            .sql
            .read_one(
                &Statement::new(
                    "SELECT j.id AS id FROM jobs j
                     WHERE j.collection_id = ?1 AND j.direction = ?2 AND j.partition IS NULL
                        AND EXISTS (SELECT 1 FROM job_files jf WHERE jf.job_id = j.id AND jf.complete = 0)
                     ORDER BY j.created_at DESC, j.id DESC
                     LIMIT 1",
                )
                .arg(collection_id)
                .arg(direction.as_str()),
            )
            .await?;
        match row {
            Some(row) => self.get_job(&row.text("id")?).await,
            None => Ok(None),
        }
    }

    /// Ids of the collection's jobs that still have unfinished members.
    pub async fn unfinished_job_ids(&self, collection_id: &str) -> Result<Vec<String>, IndexError> {
        let rows = self
            .sql
            .read(
                &Statement::new(
                    "SELECT DISTINCT j.id AS id FROM jobs j
                     JOIN job_files jf ON jf.job_id = j.id
                     WHERE j.collection_id = ?1 AND jf.complete = 0
                     ORDER BY j.id ASC",
                )
                .arg(collection_id),
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| row.text("id"))
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn jobs_done(&self) -> Result<Vec<JobRecord>, IndexError> {
        self.jobs_by(Statement::new(
            "SELECT j.id AS id FROM jobs j
             WHERE EXISTS (SELECT 1 FROM job_files jf WHERE jf.job_id = j.id)
                AND NOT EXISTS (SELECT 1 FROM job_files jf WHERE jf.job_id = j.id AND jf.complete = 0)
             ORDER BY j.created_at ASC, j.id ASC",
        ))
        .await
    }

    pub async fn jobs_of_file(&self, file_id: &str) -> Result<Vec<JobRecord>, IndexError> {
        self.jobs_by(
            Statement::new(
                "SELECT j.id AS id FROM jobs j
                 JOIN job_files jf ON jf.job_id = j.id
                 WHERE jf.file_id = ?1
                 ORDER BY j.created_at ASC, j.id ASC",
            )
            .arg(file_id),
        )
        .await
    }

    async fn jobs_by(&self, statement: Statement) -> Result<Vec<JobRecord>, IndexError> {
        let rows = self.sql.read(&statement).await?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(job) = self.get_job(&row.text("id")?).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    pub async fn delete_job(&self, job_id: &str) -> Result<bool, IndexError> {
        let rows = self
            .sql
            .write(&Statement::new("DELETE FROM jobs WHERE id = ?1 RETURNING id").arg(job_id))
            .await?;
        Ok(!rows.is_empty())
    }

    pub async fn delete_jobs_of_collection(&self, collection_id: &str) -> Result<u64, IndexError> {
        let rows = self
            .sql
            .write(
                &Statement::new("DELETE FROM jobs WHERE collection_id = ?1 RETURNING id")
                    .arg(collection_id),
            )
            .await?;
        Ok(rows.len() as u64)
    }

    pub async fn active_membership(&self, file_id: &str) -> Result<Option<Membership>, IndexError> {
        let row = self
            .sql
            .read_one(
                &Statement::new(
                    "SELECT job_id, file_id, task_id FROM job_files WHERE file_id = ?1 AND complete = 0",
                )
                .arg(file_id),
            )
            .await?;
        row.as_ref().map(membership_from_row).transpose()
    }

    pub async fn membership_by_task(&self, task_id: &str) -> Result<Option<Membership>, IndexError> {
        let row = self
            .sql
            .read_one(
                &Statement::new(
                    "SELECT job_id, file_id, task_id FROM job_files WHERE task_id = ?1 AND complete = 0",
                )
                .arg(task_id),
            )
            .await?;
        row.as_ref().map(membership_from_row).transpose()
    }

    pub async fn set_task(
        &self,
        membership: &Membership,
        task_id: Option<&str>,
    ) -> Result<(), IndexError> {
        self.sql
            .transaction(&[
                Statement::new(
                    "UPDATE job_files SET task_id = ?3 WHERE job_id = ?1 AND file_id = ?2",
                )
                .arg(&membership.job_id)
                .arg(&membership.file_id)
                .arg(task_id),
                Statement::new(format!(
                    "UPDATE files SET updated_at = ?2, {STAMP} WHERE id = ?1"
                ))
                .arg(&membership.file_id)
                .arg(now()),
            ])
            .await?;
        Ok(())
    }

    /// Marks the membership and the file itself complete in one transaction.
    pub async fn complete_member(&self, membership: &Membership) -> Result<(), IndexError> {
        self.sql
            .transaction(&[
                Statement::new("UPDATE job_files SET complete = 1 WHERE job_id = ?1 AND file_id = ?2")
                    .arg(&membership.job_id)
                    .arg(&membership.file_id),
                Statement::new(format!(
                    "UPDATE files SET complete = 1, last_error = NULL, updated_at = ?2, {STAMP} WHERE id = ?1"
                ))
                .arg(&membership.file_id)
                .arg(now()),
            ])
            .await?;
        Ok(())
    }

    /// Drops the membership and unlinks the file from the job it left.
    pub async fn remove_member(&self, membership: &Membership) -> Result<(), IndexError> {
        self.sql
            .transaction(&[
                Statement::new("DELETE FROM job_files WHERE job_id = ?1 AND file_id = ?2")
                    .arg(&membership.job_id)
                    .arg(&membership.file_id),
                Statement::new(format!(
                    "UPDATE files SET job_id = NULL, updated_at = ?3, {STAMP}
                     WHERE id = ?2 AND job_id = ?1"
                ))
                .arg(&membership.job_id)
                .arg(&membership.file_id)
                .arg(now()),
            ])
            .await?;
        Ok(())
    }

    pub async fn list_pending_tasks(&self) -> Result<Vec<PendingTask>, IndexError> {
        let rows = self
            .sql
            .read(&Statement::new(
                "SELECT jf.task_id AS task_id, jf.file_id AS file_id, jf.job_id AS job_id, j.direction AS direction
                 FROM job_files jf
                 JOIN jobs j ON j.id = jf.job_id
                 WHERE jf.complete = 0 AND jf.task_id IS NOT NULL
                 ORDER BY j.created_at ASC, j.id ASC, jf.position ASC",
            ))
            .await?;
        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            tasks.push(PendingTask {
                task_id: row.text("task_id")?,
                file_id: row.text("file_id")?,
                job_id: row.text("job_id")?,
                direction: parse_direction(&row.text("direction")?)?,
            });
        }
        Ok(tasks)
    }
}

fn claim_statement(job_id: &str, file_id: &str, ts: i64) -> Statement {
    Statement::new(format!(
        "UPDATE files SET job_id = ?1, updated_at = ?3, {STAMP} WHERE id = ?2"
    ))
    .arg(job_id)
    .arg(file_id)
    .arg(ts)
}

fn membership_from_row(row: &SqlRow) -> Result<Membership, IndexError> {
    Ok(Membership {
        job_id: row.text("job_id")?,
        file_id: row.text("file_id")?,
        task_id: row.opt_text("task_id")?,
    })
}

fn file_from_row(row: &SqlRow) -> Result<FileRecord, IndexError> {
    Ok(FileRecord {
        id: row.text("id")?,
        collection_id: row.text("collection_id")?,
        partition: row.opt_text("partition")?,
        local_path: row.opt_text("local_path")?,
        server_doc: row.opt_text("server_doc")?,
        server_revision: row.opt_text("server_revision")?,
        direction: parse_direction(&row.text("direction")?)?,
        origin: parse_origin(&row.text("origin")?)?,
        complete: row.flag("complete")?,
        deleted: row.flag("deleted")?,
        job_id: row.opt_text("job_id")?,
        task_id: row.opt_text("task_id")?,
        last_error: row.opt_text("last_error")?,
        seen_generation: row.integer("seen_generation")?,
        created_at: row.integer("created_at")?,
        updated_at: row.integer("updated_at")?,
    })
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod tests;
