use super::*;

#[tokio::test]
async fn sweep_removes_files_not_seen_in_the_generation() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", false).await;
    for id in ["A", "B", "D"] {
        ok(engine.merge_server_doc(server_doc(id, "photos", "1")).await);
    }

    assert_eq!(ok(engine.begin_mark("photos").await), 1);
    ok(engine.merge_server_doc(server_doc("A", "photos", "1")).await);
    ok(engine.merge_server_doc(server_doc("B", "photos", "1")).await);

    assert_eq!(ok(engine.delete_unmarked("photos").await), vec!["D".to_string()]);
    ok(engine.read_file("A").await);
    ok(engine.read_file("B").await);
    assert_eq!(err_kind(engine.read_file("D").await), ErrorKind::NotFound);
}

#[tokio::test]
async fn sweep_keeps_local_files_awaiting_first_upload() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", true).await;
    ok(engine.add_original(local("fresh", "photos", None)).await);
    ok(engine.add_original(local("uploaded", "photos", None)).await);
    ok(engine.merge_server_doc(server_doc("uploaded", "photos", "1")).await);

    ok(engine.begin_mark("photos").await);
    let removed = ok(engine.delete_unmarked("photos").await);

    assert_eq!(removed, vec!["uploaded".to_string()]);
    ok(engine.read_file("fresh").await);
    assert_eq!(err_kind(engine.begin_mark("missing").await), ErrorKind::NotFound);
    assert_eq!(err_kind(engine.delete_unmarked("missing").await), ErrorKind::NotFound);
}

#[tokio::test]
async fn tombstones_leave_jobs_and_enumerations() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", true).await;
    ok(engine.add_original(local("a", "photos", None)).await);
    ok(engine.add_original(local("b", "photos", None)).await);
    let job = ok(engine.upload_all("job-1", "photos", None).await).unwrap();
    assert_eq!(job.files.len(), 2);

    let file = ok(engine.mark_file_as_deleted("a").await);
    assert!(file.deleted);

    assert_eq!(
        ids(&ok(engine.read_all_files_needing_upload("photos", &[]).await)),
        vec!["b"]
    );
    assert_eq!(ids(&ok(engine.read_deleted_files("photos").await)), vec!["a"]);
    let job = ok(engine.read_job("job-1").await);
    assert!(!job.contains("a"));
    assert_eq!(err_kind(engine.set_upload("a", "t-1").await), ErrorKind::InvalidState);

    ok(engine.remove_deleted_file("a").await);
    assert!(ok(engine.read_deleted_files("photos").await).is_empty());
    assert_eq!(err_kind(engine.read_file("a").await), ErrorKind::NotFound);
}

#[tokio::test]
async fn only_tombstoned_files_can_be_purged() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", true).await;
    ok(engine.add_original(local("a", "photos", None)).await);

    assert_eq!(
        err_kind(engine.remove_deleted_file("a").await),
        ErrorKind::InvalidState
    );
    assert_eq!(
        err_kind(engine.mark_file_as_deleted("missing").await),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn readding_a_tombstoned_file_restores_it() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", true).await;
    ok(engine.add_original(local("a", "photos", None)).await);
    ok(engine.mark_file_as_deleted("a").await);

    let file = ok(engine.add_original(local("a", "photos", None)).await);
    assert!(!file.deleted);
    assert_eq!(
        ids(&ok(engine.read_all_files_needing_upload("photos", &[]).await)),
        vec!["a"]
    );
}

#[tokio::test]
async fn task_assignment_counts_as_seen() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", false).await;
    for id in ["r1", "r2"] {
        ok(engine.merge_server_doc(server_doc(id, "photos", "1")).await);
        ok(engine.download(id).await);
    }

    ok(engine.begin_mark("photos").await);
    ok(engine.set_download("r1", "dl-r1").await);

    assert_eq!(ok(engine.delete_unmarked("photos").await), vec!["r2".to_string()]);
    assert_eq!(ok(engine.read_file("r1").await).task_id.as_deref(), Some("dl-r1"));
}

#[tokio::test]
async fn sweep_that_finishes_a_job_notifies() {
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = make_engine_with(Arc::clone(&notifier)).await;
    add_collection(&engine, "photos", true).await;
    for id in ["a", "b"] {
        ok(engine.add_original(local(id, "photos", None)).await);
        ok(engine.merge_server_doc(server_doc(id, "photos", "1")).await);
    }
    upload_with_tasks(&engine, "job-1", "photos").await;
    ok(engine.upload_complete("a").await);

    ok(engine.begin_mark("photos").await);
    ok(engine.merge_server_doc(server_doc("a", "photos", "1")).await);
    assert_eq!(ok(engine.delete_unmarked("photos").await), vec!["b".to_string()]);

    assert_eq!(ok(engine.jobs_done().await)[0].id, "job-1");
    assert_eq!(
        notifier.calls(),
        vec![("job-1".to_string(), "done-note".to_string())]
    );
}
