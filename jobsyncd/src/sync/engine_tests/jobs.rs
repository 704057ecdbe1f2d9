use super::*;

#[tokio::test]
async fn upload_all_is_idempotent_on_job_id() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", true).await;
    ok(engine.add_original(local("a", "photos", None)).await);

    let first = ok(engine.upload_all("job-1", "photos", Some("n")).await).unwrap();
    ok(engine.add_original(local("b", "photos", None)).await);
    let second = ok(engine.upload_all("job-1", "photos", Some("n")).await).unwrap();

    assert_eq!(first, second);
    assert_eq!(ok(engine.read_jobs_of_file("a").await), vec![first]);
    assert!(ok(engine.read_jobs_of_file("b").await).is_empty());
}

#[tokio::test]
async fn reused_job_id_with_other_scope_is_rejected() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", true).await;
    ok(engine.add_original(local("a", "photos", Some("2024-01"))).await);
    ok(engine.upload_all("job-1", "photos", None).await);

    assert_eq!(
        err_kind(
            engine
                .upload_partition("job-1", "photos", "2024-01", None)
                .await
        ),
        ErrorKind::InvalidInput
    );
}

#[tokio::test]
async fn partition_job_only_takes_its_partition() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", false).await;
    ok(engine.add_original(local("a", "photos", Some("2024-01"))).await);
    ok(engine.add_original(local("b", "photos", Some("2024-02"))).await);
    ok(engine.add_upload(local("c", "photos", Some("2024-01"))).await);

    let job = ok(engine
        .upload_partition("job-jan", "photos", "2024-01", Some("jan"))
        .await)
    .unwrap();

    let members: Vec<&str> = job.files.iter().map(|f| f.file_id.as_str()).collect();
    assert_eq!(members, vec!["a", "c"]);
    assert_eq!(job.partition.as_deref(), Some("2024-01"));
    assert_eq!(job.notification.as_deref(), Some("jan"));
}

#[tokio::test]
async fn overlapping_jobs_skip_claimed_files() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", true).await;
    ok(engine.add_original(local("a", "photos", Some("2024-01"))).await);

    ok(engine.upload_partition("job-jan", "photos", "2024-01", None).await);
    ok(engine.add_original(local("b", "photos", Some("2024-02"))).await);
    let all = ok(engine.upload_all("job-all", "photos", None).await).unwrap();

    let members: Vec<&str> = all.files.iter().map(|f| f.file_id.as_str()).collect();
    assert_eq!(members, vec!["b"]);
    assert_eq!(ok(engine.upload_all("job-empty", "photos", None).await), None);
    assert_eq!(err_kind(engine.read_job("job-empty").await), ErrorKind::NotFound);
}

#[tokio::test]
async fn job_is_done_once_every_member_completes() {
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = make_engine_with(Arc::clone(&notifier)).await;
    add_collection(&engine, "photos", true).await;
    ok(engine.add_original(local("f1", "photos", None)).await);
    ok(engine.add_original(local("f2", "photos", None)).await);
    upload_with_tasks(&engine, "job-1", "photos").await;

    let first = ok(engine.upload_complete("f1").await);
    assert!(!first.job_done);
    assert!(ok(engine.jobs_done().await).is_empty());
    assert!(notifier.calls().is_empty());

    let second = ok(engine.upload_complete("f2").await);
    assert!(second.job_done);
    assert_eq!(second.job_id.as_deref(), Some("job-1"));
    let done = ok(engine.jobs_done().await);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].id, "job-1");
    assert_eq!(
        notifier.calls(),
        vec![("job-1".to_string(), "done-note".to_string())]
    );

    let duplicate = ok(engine.file_tasks_complete("f2").await);
    assert!(duplicate.already_complete);
    assert!(duplicate.job_done);
    assert_eq!(notifier.calls().len(), 1);
}

#[tokio::test]
async fn completion_requires_an_assigned_task() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", true).await;
    ok(engine.add_original(local("a", "photos", None)).await);

    assert_eq!(err_kind(engine.upload_complete("a").await), ErrorKind::InvalidState);
    ok(engine.upload_all("job-1", "photos", None).await);
    assert_eq!(err_kind(engine.upload_complete("a").await), ErrorKind::InvalidState);
    assert_eq!(err_kind(engine.download_complete("a").await), ErrorKind::InvalidState);

    ok(engine.set_upload("a", "t-1").await);
    assert!(!ok(engine.upload_complete("a").await).already_complete);
}

#[tokio::test]
async fn task_assignment_rules() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", true).await;
    ok(engine.add_original(local("a", "photos", None)).await);
    ok(engine.add_original(local("b", "photos", None)).await);

    assert_eq!(err_kind(engine.set_upload("a", "t-1").await), ErrorKind::InvalidState);
    ok(engine.upload_all("job-1", "photos", None).await);

    let file = ok(engine.set_upload("a", "t-1").await);
    assert_eq!(file.task_id.as_deref(), Some("t-1"));
    ok(engine.set_upload("a", "t-1").await);
    assert_eq!(err_kind(engine.set_upload("a", "t-2").await), ErrorKind::InvalidState);
    assert_eq!(err_kind(engine.set_upload("b", "t-1").await), ErrorKind::InvalidInput);
    assert_eq!(err_kind(engine.set_download("b", "t-3").await), ErrorKind::InvalidState);
    assert_eq!(err_kind(engine.set_upload("b", "").await), ErrorKind::InvalidInput);

    assert_eq!(ok(engine.read_file_by_task("t-1").await).id, "a");
    assert_eq!(err_kind(engine.read_file_by_task("t-9").await), ErrorKind::NotFound);
}

#[tokio::test]
async fn download_of_unknown_file_is_an_error_reply() {
    let engine = make_engine().await;
    let reply = engine.download("missing").await;

    assert!(reply.is_error());
    assert_eq!(reply.kind(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn download_joins_the_open_download_job() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", false).await;
    for id in ["r1", "r2"] {
        ok(engine.merge_server_doc(server_doc(id, "photos", "1")).await);
    }

    let first = ok(engine.download("r1").await);
    let again = ok(engine.download("r1").await);
    let second = ok(engine.download("r2").await);

    assert_eq!(first.id, again.id);
    assert_eq!(second.id, first.id);
    let members: Vec<&str> = second.files.iter().map(|f| f.file_id.as_str()).collect();
    assert_eq!(members, vec!["r1", "r2"]);

    ok(engine.add_original(local("a", "photos", None)).await);
    assert_eq!(err_kind(engine.download("a").await), ErrorKind::InvalidState);
}

#[tokio::test]
async fn redownload_rejoins_the_open_job_it_finished_in() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", false).await;
    for id in ["r1", "r2"] {
        ok(engine.merge_server_doc(server_doc(id, "photos", "1")).await);
    }
    let job = ok(engine.download("r1").await);
    ok(engine.download("r2").await);
    ok(engine.set_download("r1", "dl-r1").await);
    assert!(!ok(engine.download_complete("r1").await).job_done);

    ok(engine.merge_server_doc(server_doc("r1", "photos", "2")).await);
    let rejoined = ok(engine.download("r1").await);

    assert_eq!(rejoined.id, job.id);
    assert_eq!(rejoined.files.len(), 2);
    let member = rejoined.files.iter().find(|f| f.file_id == "r1").unwrap();
    assert!(!member.complete);
    assert_eq!(member.task_id, None);

    ok(engine.set_download("r1", "dl-r1-v2").await);
    ok(engine.set_download("r2", "dl-r2").await);
    ok(engine.download_complete("r2").await);
    assert!(ok(engine.download_complete("r1").await).job_done);
}

#[tokio::test]
async fn leaving_a_job_can_finish_it_and_notifies() {
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = make_engine_with(Arc::clone(&notifier)).await;
    add_collection(&engine, "photos", true).await;
    for id in ["a", "b", "c"] {
        ok(engine.add_original(local(id, "photos", None)).await);
    }
    upload_with_tasks(&engine, "job-1", "photos").await;
    ok(engine.upload_complete("a").await);

    let deleted = ok(engine.mark_file_as_deleted("b").await);
    assert_eq!(deleted.job_id, None);
    assert!(ok(engine.jobs_done().await).is_empty());
    assert!(notifier.calls().is_empty());

    ok(engine.merge_server_doc(server_doc("c", "photos", "1")).await);
    let converted = ok(engine.convert_to_download("c").await);
    assert_eq!(converted.job_id, None);
    assert_eq!(converted.task_id, None);

    let done = ok(engine.jobs_done().await);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].id, "job-1");
    assert_eq!(
        notifier.calls(),
        vec![("job-1".to_string(), "done-note".to_string())]
    );
    assert_eq!(ok(engine.read_jobs_of_file("a").await)[0].files.len(), 1);
}

#[tokio::test]
async fn download_all_honours_exclusions() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", false).await;
    for id in ["r1", "r2", "r3"] {
        ok(engine.merge_server_doc(server_doc(id, "photos", "1")).await);
    }

    let job = ok(engine.download_all("photos", vec!["r2".to_string()]).await).unwrap();
    let members: Vec<&str> = job.files.iter().map(|f| f.file_id.as_str()).collect();
    assert_eq!(members, vec!["r1", "r3"]);
    assert_eq!(job.direction, Direction::Download);

    let rest = ok(engine.download_all("photos", Vec::new()).await).unwrap();
    assert_eq!(rest.files.len(), 1);
    assert_eq!(rest.files[0].file_id, "r2");
    assert_eq!(ok(engine.download_all("photos", Vec::new()).await), None);
}

#[tokio::test]
async fn read_downloads_lists_assigned_tasks_everywhere() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", false).await;
    add_collection(&engine, "videos", false).await;
    ok(engine.merge_server_doc(server_doc("p1", "photos", "1")).await);
    ok(engine.merge_server_doc(server_doc("v1", "videos", "1")).await);
    ok(engine.merge_server_doc(server_doc("v2", "videos", "1")).await);
    ok(engine.download_all("photos", Vec::new()).await);
    ok(engine.download_all("videos", Vec::new()).await);

    ok(engine.set_download("p1", "dl-p1").await);
    ok(engine.set_download("v2", "dl-v2").await);

    assert_eq!(ids(&ok(engine.read_downloads().await)), vec!["p1", "v2"]);
    ok(engine.complete_task("dl-v2").await);
    assert_eq!(ids(&ok(engine.read_downloads().await)), vec!["p1"]);
}

#[tokio::test]
async fn task_signals_complete_and_fail_by_task_id() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", true).await;
    ok(engine.add_original(local("a", "photos", None)).await);
    upload_with_tasks(&engine, "job-1", "photos").await;

    let failed = ok(engine.task_failed("task-a", "disk full").await);
    assert_eq!(failed.task_id, None);
    assert_eq!(failed.last_error.as_deref(), Some("disk full"));
    assert_eq!(err_kind(engine.complete_task("task-a").await), ErrorKind::NotFound);
    assert_eq!(err_kind(engine.task_failed("task-a", "again").await), ErrorKind::NotFound);

    ok(engine.set_upload("a", "task-a2").await);
    let completion = ok(engine.complete_task("task-a2").await);
    assert!(completion.job_done);
    let replay = ok(engine.complete_task("task-a2").await);
    assert!(replay.already_complete);
    assert_eq!(ok(engine.read_file("a").await).last_error, None);
}

#[tokio::test]
async fn removing_jobs_leaves_files() {
    let engine = make_engine().await;
    add_collection(&engine, "photos", true).await;
    ok(engine.add_original(local("a", "photos", None)).await);
    ok(engine.upload_all("job-1", "photos", None).await);

    ok(engine.remove_job("job-1").await);
    assert_eq!(err_kind(engine.remove_job("job-1").await), ErrorKind::NotFound);
    let file = ok(engine.read_file("a").await);
    assert_eq!(file.job_id, None);

    let job = ok(engine.upload_all("job-2", "photos", None).await).unwrap();
    assert_eq!(job.files[0].file_id, "a");
    ok(engine.merge_server_doc(server_doc("r1", "photos", "1")).await);
    ok(engine.download("r1").await);

    assert_eq!(ok(engine.remove_all_jobs("photos").await), 2);
    assert_eq!(ok(engine.remove_all_jobs("photos").await), 0);
    assert_eq!(err_kind(engine.remove_all_jobs("missing").await), ErrorKind::NotFound);
    assert_eq!(ok(engine.read_all_files_needing_upload("photos", &[]).await).len(), 1);
}
