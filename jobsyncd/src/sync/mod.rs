pub mod engine;
mod engine_impl_ops;
mod engine_impl_queries;
pub mod index;
pub mod notify;
pub mod queue;
pub mod sql;
pub mod transfer;

#[cfg(test)]
mod engine_tests;

pub use engine::{EngineError, GLOBAL_QUEUE, SyncEngine};
pub use notify::{NoopNotifier, Notifier, TracingNotifier};
pub use transfer::{DispatchSummary, TaskSignal, TransferBackend, TransferDriver, TransferError};
