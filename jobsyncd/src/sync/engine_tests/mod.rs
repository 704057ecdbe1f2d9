use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jobsync_core::{
    CollectionConfig, Direction, ErrorKind, FileOrigin, FileRecord, NewFile, Reply, ServerDoc,
};

use super::engine::SyncEngine;
use super::index::IndexStore;
use super::notify::Notifier;
use super::sql::SqlExecutor;

mod jobs;
mod lifecycle;
mod reconcile;

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn job_finished(&self, job_id: &str, token: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((job_id.to_string(), token.to_string()));
    }
}

fn ok<T>(reply: Reply<T>) -> T {
    match reply {
        Reply::Ok(value) => value,
        Reply::Error(payload) => panic!("expected ok reply, got {payload}"),
    }
}

fn err_kind<T: std::fmt::Debug>(reply: Reply<T>) -> ErrorKind {
    assert!(reply.is_error(), "expected error reply, got {reply:?}");
    reply.kind().unwrap()
}

async fn make_engine() -> SyncEngine {
    let engine = SyncEngine::new(IndexStore::new(SqlExecutor::in_memory()));
    ok(engine.startup().await);
    engine
}

async fn make_engine_with(notifier: Arc<RecordingNotifier>) -> SyncEngine {
    make_engine().await.with_notifier(notifier)
}

async fn add_collection(engine: &SyncEngine, id: &str, auto_upload: bool) {
    ok(engine
        .configure_collection(CollectionConfig {
            id: id.into(),
            path: Some(format!("/data/{id}")),
            partition_strategy: Some("month".into()),
            endpoint: Some(format!("https://sync.example/{id}")),
            settings: None,
            auto_upload: Some(auto_upload),
        })
        .await);
}

fn local(id: &str, collection: &str, partition: Option<&str>) -> NewFile {
    NewFile {
        id: id.into(),
        collection_id: collection.into(),
        partition: partition.map(Into::into),
        local_path: format!("/data/{collection}/{id}.jpg"),
    }
}

fn server_doc(id: &str, collection: &str, revision: &str) -> ServerDoc {
    ServerDoc {
        file_id: id.into(),
        collection_id: collection.into(),
        doc_id: format!("doc-{id}"),
        partition: None,
        revision: Some(revision.into()),
        local_path: None,
    }
}

fn ids(files: &[FileRecord]) -> Vec<&str> {
    files.iter().map(|file| file.id.as_str()).collect()
}

/// Creates `job_id` over the collection's uploads and assigns `task-<file>`
/// to every member.
async fn upload_with_tasks(engine: &SyncEngine, job_id: &str, collection: &str) -> Vec<String> {
    let job = ok(engine.upload_all(job_id, collection, Some("done-note")).await)
        .expect("job should have members");
    let mut members = Vec::new();
    for member in &job.files {
        ok(engine
            .set_upload(&member.file_id, &format!("task-{}", member.file_id))
            .await);
        members.push(member.file_id.clone());
    }
    members
}
