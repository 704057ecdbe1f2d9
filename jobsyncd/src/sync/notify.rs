use async_trait::async_trait;
use tracing::info;

/// Receives a job's notification token once every member has finished.
///
/// Presentation is up to the implementor; the engine calls this at most once
/// per job, outside the collection's queue lane.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn job_finished(&self, job_id: &str, token: &str);
}

pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn job_finished(&self, job_id: &str, token: &str) {
        info!(job = job_id, notification = token, "job finished");
    }
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn job_finished(&self, _job_id: &str, _token: &str) {}
}
