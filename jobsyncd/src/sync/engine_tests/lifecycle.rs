use super::*;
use serde_json::json;
use tempfile::tempdir;

use crate::sync::sql::DatabaseLocation;

#[tokio::test]
async fn startup_is_repeatable_and_reports_database() {
    let engine = SyncEngine::new(IndexStore::new(SqlExecutor::in_memory()));
    let first = ok(engine.startup().await);
    let second = ok(engine.startup().await);

    assert_eq!(first.database, ":memory:");
    assert_eq!(second.database, ":memory:");
    assert!(second.pending_tasks.is_empty());
}

#[tokio::test]
async fn configure_stores_each_key() {
    let engine = make_engine().await;
    ok(engine
        .configure(json!({ "device": "tablet", "limits": { "parallel": 2 } }))
        .await);

    assert_eq!(ok(engine.read_config("device").await), Some(json!("tablet")));
    assert_eq!(
        ok(engine.read_config("limits").await),
        Some(json!({ "parallel": 2 }))
    );
    assert_eq!(ok(engine.read_config("unknown").await), None);
    assert_eq!(err_kind(engine.configure(json!(["not", "a", "map"])).await), ErrorKind::InvalidInput);
    assert_eq!(err_kind(engine.read_config("").await), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn auto_upload_switches_are_readable() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", false).await;

    ok(engine.switch_to_auto_upload_on("photos").await);
    assert!(ok(engine.read_auto_upload("photos").await));

    ok(engine.switch_to_auto_upload_off("photos").await);
    assert!(!ok(engine.read_auto_upload("photos").await));

    assert_eq!(
        err_kind(engine.switch_to_auto_upload_on("missing").await),
        ErrorKind::NotFound
    );
    assert_eq!(err_kind(engine.read_auto_upload("missing").await), ErrorKind::NotFound);
}

#[tokio::test]
async fn reconfiguring_a_collection_keeps_its_flag_unless_given() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", true).await;

    let record = ok(engine
        .configure_collection(CollectionConfig {
            id: "photos".into(),
            path: Some("/moved/photos".into()),
            partition_strategy: None,
            endpoint: None,
            settings: Some(json!({ "quality": "original" })),
            auto_upload: None,
        })
        .await);

    assert!(record.auto_upload);
    assert_eq!(record.path.as_deref(), Some("/moved/photos"));
    assert_eq!(ok(engine.read_collection("photos").await), record);
    assert_eq!(err_kind(engine.read_collection("missing").await), ErrorKind::NotFound);
}

#[tokio::test]
async fn startup_recovers_pending_tasks_after_restart() {
    let dir = tempdir().unwrap();
    let location = DatabaseLocation::File(dir.path().join("jobsync.db"));

    {
        let engine = SyncEngine::new(IndexStore::new(SqlExecutor::new(location.clone())));
        ok(engine.startup().await);
        add_collection(&engine, "photos", true).await;
        ok(engine.add_original(local("a", "photos", None)).await);
        ok(engine.add_original(local("b", "photos", None)).await);
        upload_with_tasks(&engine, "job-1", "photos").await;
        ok(engine.upload_complete("a").await);
    }

    let engine = SyncEngine::new(IndexStore::new(SqlExecutor::new(location)));
    let report = ok(engine.startup().await);

    assert_eq!(report.pending_tasks.len(), 1);
    let task = &report.pending_tasks[0];
    assert_eq!(task.task_id, "task-b");
    assert_eq!(task.file_id, "b");
    assert_eq!(task.job_id, "job-1");
    assert_eq!(task.direction, Direction::Upload);

    let completion = ok(engine.complete_task("task-b").await);
    assert!(completion.job_done);
    assert_eq!(ok(engine.jobs_done().await).len(), 1);
}

#[tokio::test]
async fn mutations_on_one_collection_are_serialized() {
    let engine = Arc::new(make_engine().await);
    add_collection(&engine, "photos", true).await;
    for id in ["a", "b", "c"] {
        ok(engine.add_upload(local(id, "photos", None)).await);
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine.upload_all("job-1", "photos", None).await
        }));
    }
    for handle in handles {
        let job = ok(handle.await.unwrap()).unwrap();
        assert_eq!(job.id, "job-1");
        assert_eq!(job.files.len(), 3);
    }
    assert_eq!(ok(engine.read_jobs_of_file("a").await).len(), 1);
}

#[tokio::test]
async fn abandoned_reads_leave_in_memory_state_intact() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", false).await;
    ok(engine.add_upload(local("a", "photos", None)).await);

    for _ in 0..32 {
        let _ = tokio::time::timeout(
            std::time::Duration::from_micros(100),
            engine.read_file("a"),
        )
        .await;
    }

    ok(engine.add_upload(local("b", "photos", None)).await);
    let pending = ok(engine.read_all_files_needing_upload("photos", &[]).await);
    assert_eq!(ids(&pending), vec!["a", "b"]);
}
