use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use jobsync_core::{
    CollectionConfig, CollectionRecord, ErrorKind, ErrorPayload, Reply, StartupReport, Value,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::index::{IndexError, IndexStore};
use super::notify::{NoopNotifier, Notifier, TracingNotifier};
use super::queue::{QueueError, SerializedQueue, panic_message};
use super::sql::{SqlError, SqlExecutor};
use crate::config::EngineConfig;

/// Queue key for engine-wide mutations (schema, global config).
pub const GLOBAL_QUEUE: &str = "jobsync:global";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("operation panicked: {0}")]
    Panicked(String),
}

impl EngineError {
    pub(super) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Index(IndexError::Sql(err)) => match err {
                SqlError::Constraint(_) => ErrorKind::Constraint,
                SqlError::Io(_) | SqlError::Open { .. } => ErrorKind::Io,
                _ => ErrorKind::Storage,
            },
            EngineError::Index(_) => ErrorKind::Storage,
            EngineError::Queue(_) | EngineError::Panicked(_) => ErrorKind::Internal,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidState(_) => ErrorKind::InvalidState,
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }
}

impl From<EngineError> for ErrorPayload {
    fn from(err: EngineError) -> Self {
        ErrorPayload::new(err.kind(), err.to_string())
    }
}

pub(super) fn require(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

/// The job/state engine.
///
/// Every mutation runs on the [`SerializedQueue`] lane of the collection it
/// touches (or [`GLOBAL_QUEUE`]); queries go straight to read-only storage.
/// Public operations return [`Reply`] and never panic past this boundary.
pub struct SyncEngine {
    pub(super) index: Arc<IndexStore>,
    pub(super) queue: SerializedQueue,
    pub(super) notifier: Arc<dyn Notifier>,
}

impl SyncEngine {
    pub fn new(index: IndexStore) -> Self {
        Self {
            index: Arc::new(index),
            queue: SerializedQueue::new(),
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let notifier: Arc<dyn Notifier> = if config.notifications {
            Arc::new(TracingNotifier)
        } else {
            Arc::new(NoopNotifier)
        };
        Self::new(IndexStore::new(SqlExecutor::new(config.database.clone())))
            .with_queue(SerializedQueue::with_idle_timeout(config.queue_idle))
            .with_notifier(notifier)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_queue(mut self, queue: SerializedQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn queue(&self) -> &SerializedQueue {
        &self.queue
    }

    /// Runs `operation` on the `key` lane with panics converted to errors.
    pub(super) async fn serialized<T, F, Fut>(
        &self,
        key: &str,
        name: &'static str,
        operation: F,
    ) -> Result<T, EngineError>
    where
        F: FnOnce(Arc<IndexStore>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        let index = Arc::clone(&self.index);
        debug!(queue = key, op = name, "operation queued");
        let result = match self
            .queue
            .run(key, move || guarded(operation(index)))
            .await
        {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        };
        match &result {
            Ok(_) => debug!(queue = key, op = name, "operation finished"),
            Err(err) => warn!(queue = key, op = name, error = %err, "operation failed"),
        }
        result
    }

    /// Like [`Self::serialized`], keyed by the collection owning `file_id`.
    pub(super) async fn serialized_for_file<T, F, Fut>(
        &self,
        file_id: &str,
        name: &'static str,
        operation: F,
    ) -> Result<T, EngineError>
    where
        F: FnOnce(Arc<IndexStore>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        require("file id", file_id)?;
        let file = self
            .index
            .get_file(file_id)
            .await?
            .ok_or_else(|| EngineError::not_found("file", file_id))?;
        self.serialized(&file.collection_id, name, operation).await
    }

    pub(super) async fn read<T, Fut>(&self, query: Fut) -> Reply<T>
    where
        Fut: Future<Output = Result<T, EngineError>>,
    {
        guarded(query).await.into()
    }

    pub async fn startup(&self) -> Reply<StartupReport> {
        self.serialized(GLOBAL_QUEUE, "startup", |index| async move {
            let database = index.init().await?;
            let pending_tasks = index.list_pending_tasks().await?;
            info!(
                database = %database,
                pending = pending_tasks.len(),
                "sync engine started"
            );
            Ok(StartupReport {
                database,
                pending_tasks,
            })
        })
        .await
        .into()
    }

    /// Stores every entry of a JSON object in the engine-wide namespace.
    pub async fn configure(&self, config: Value) -> Reply<()> {
        let Value::Object(map) = config else {
            return Reply::error(ErrorKind::InvalidInput, "configuration must be a JSON object");
        };
        let entries: Vec<(String, Value)> = map.into_iter().collect();
        self.serialized(GLOBAL_QUEUE, "configure", move |index| async move {
            index.put_config(&entries).await?;
            Ok(())
        })
        .await
        .into()
    }

    pub async fn read_config(&self, key: &str) -> Reply<Option<Value>> {
        self.read(async {
            require("config key", key)?;
            Ok(self.index.get_config(key).await?)
        })
        .await
    }

    pub async fn configure_collection(
        &self,
        collection: CollectionConfig,
    ) -> Reply<CollectionRecord> {
        if let Err(err) = require("collection id", &collection.id) {
            return Err::<CollectionRecord, _>(err).into();
        }
        let key = collection.id.clone();
        self.serialized(&key, "configureCollection", move |index| async move {
            index.upsert_collection(&collection).await?;
            index
                .get_collection(&collection.id)
                .await?
                .ok_or_else(|| EngineError::not_found("collection", collection.id.as_str()))
        })
        .await
        .into()
    }

    pub async fn switch_to_auto_upload_on(&self, collection_id: &str) -> Reply<()> {
        self.set_auto_upload(collection_id, true).await
    }

    pub async fn switch_to_auto_upload_off(&self, collection_id: &str) -> Reply<()> {
        self.set_auto_upload(collection_id, false).await
    }

    async fn set_auto_upload(&self, collection_id: &str, enabled: bool) -> Reply<()> {
        if let Err(err) = require("collection id", collection_id) {
            return Err::<(), _>(err).into();
        }
        let id = collection_id.to_string();
        self.serialized(collection_id, "setAutoUpload", move |index| async move {
            if !index.set_auto_upload(&id, enabled).await? {
                return Err(EngineError::not_found("collection", id));
            }
            info!(collection = %id, enabled, "auto upload switched");
            Ok(())
        })
        .await
        .into()
    }
}

async fn guarded<T, Fut>(future: Fut) -> Result<T, EngineError>
where
    Fut: Future<Output = Result<T, EngineError>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(EngineError::Panicked(panic_message(panic.as_ref()))),
    }
}
