mod codec;
mod model;
mod reply;

pub use codec::{CodecError, deserialize, serialize};
pub use model::{
    CollectionConfig, CollectionRecord, Completion, Direction, FileOrigin, FileRecord,
    FileWithCollection, JobFile, JobRecord, NewFile, PendingTask, ServerDoc, StartupReport,
};
pub use reply::{ErrorKind, ErrorPayload, Reply};
pub use serde_json::Value;
