use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("operation queued on {0} was dropped before it completed")]
    Dropped(String),
}

struct Lane {
    id: u64,
    sender: mpsc::UnboundedSender<Task>,
}

struct QueueInner {
    lanes: Mutex<HashMap<String, Lane>>,
    next_lane: AtomicU64,
    idle_timeout: Duration,
}

impl QueueInner {
    fn lock_lanes(&self) -> MutexGuard<'_, HashMap<String, Lane>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Named FIFO lanes: operations sharing a name run one at a time in
/// submission order, operations on different names run concurrently.
///
/// Each active name owns a worker task fed by an unbounded channel. A worker
/// retires after `idle_timeout` without work and is recreated on the next
/// submission.
#[derive(Clone)]
pub struct SerializedQueue {
    inner: Arc<QueueInner>,
}

impl Default for SerializedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SerializedQueue {
    pub fn new() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                lanes: Mutex::new(HashMap::new()),
                next_lane: AtomicU64::new(0),
                idle_timeout,
            }),
        }
    }

    /// Queues `operation` on `name`; `callback` receives its result exactly
    /// once, after the operation has finished. If the operation panics the
    /// callback is never invoked.
    pub fn submit<T, F, Fut, C>(&self, name: &str, operation: F, callback: C)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        let task: Task = Box::pin(async move {
            let result = operation().await;
            callback(result);
        });
        self.enqueue(name, task);
    }

    pub async fn run<T, F, Fut>(&self, name: &str, operation: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(name, operation, move |result| {
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| QueueError::Dropped(name.to_string()))
    }

    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock_lanes().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn enqueue(&self, name: &str, task: Task) {
        // Sends happen under the lane lock so a retiring worker can never miss
        // a task that was routed to it.
        let mut lanes = self.inner.lock_lanes();
        let task = match lanes.get(name) {
            Some(lane) => match lane.sender.send(task) {
                Ok(()) => return,
                Err(mpsc::error::SendError(task)) => task,
            },
            None => task,
        };

        let id = self.inner.next_lane.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        if sender.send(task).is_err() {
            error!(queue = name, "new queue lane closed before first task");
            return;
        }
        lanes.insert(name.to_string(), Lane { id, sender });
        tokio::spawn(drive_lane(
            Arc::downgrade(&self.inner),
            name.to_string(),
            id,
            receiver,
            self.inner.idle_timeout,
        ));
    }
}

async fn drive_lane(
    inner: Weak<QueueInner>,
    name: String,
    lane_id: u64,
    mut receiver: mpsc::UnboundedReceiver<Task>,
    idle_timeout: Duration,
) {
    debug!(queue = %name, "queue worker started");
    loop {
        let task = match tokio::time::timeout(idle_timeout, receiver.recv()).await {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(_) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let mut lanes = inner.lock_lanes();
                match receiver.try_recv() {
                    Ok(task) => task,
                    Err(_) => {
                        if lanes.get(&name).is_some_and(|lane| lane.id == lane_id) {
                            lanes.remove(&name);
                        }
                        break;
                    }
                }
            }
        };
        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            error!(
                queue = %name,
                reason = %panic_message(panic.as_ref()),
                "queued operation panicked"
            );
        }
    }
    debug!(queue = %name, "queue worker retired");
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
