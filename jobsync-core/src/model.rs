use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }
}

/// How a file entered the index.
///
/// `Original` files wait for the collection's auto-upload flag, `Upload`
/// files were explicitly requested, `Server` files were created by merging a
/// server document with no local counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOrigin {
    Original,
    Upload,
    Server,
}

impl FileOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOrigin::Original => "original",
            FileOrigin::Upload => "upload",
            FileOrigin::Server => "server",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub id: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub partition_strategy: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub settings: Option<Value>,
    /// `None` keeps the stored flag when reconfiguring.
    #[serde(default)]
    pub auto_upload: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: String,
    pub path: Option<String>,
    pub partition_strategy: Option<String>,
    pub endpoint: Option<String>,
    pub settings: Option<Value>,
    pub auto_upload: bool,
    pub mark_generation: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFile {
    pub id: String,
    pub collection_id: String,
    #[serde(default)]
    pub partition: Option<String>,
    pub local_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDoc {
    pub file_id: String,
    pub collection_id: String,
    pub doc_id: String,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub collection_id: String,
    pub partition: Option<String>,
    pub local_path: Option<String>,
    pub server_doc: Option<String>,
    pub server_revision: Option<String>,
    pub direction: Direction,
    pub origin: FileOrigin,
    /// The transfer in `direction` has finished.
    pub complete: bool,
    pub deleted: bool,
    pub job_id: Option<String>,
    pub task_id: Option<String>,
    pub last_error: Option<String>,
    pub seen_generation: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FileRecord {
    pub fn on_server(&self) -> bool {
        self.server_doc.is_some()
    }

    pub fn needs_transfer(&self) -> bool {
        !self.complete && !self.deleted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWithCollection {
    #[serde(flatten)]
    pub file: FileRecord,
    pub collection_path: Option<String>,
    pub collection_endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFile {
    pub file_id: String,
    pub task_id: Option<String>,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub collection_id: String,
    pub partition: Option<String>,
    pub direction: Direction,
    pub notification: Option<String>,
    pub created_at: i64,
    pub files: Vec<JobFile>,
}

impl JobRecord {
    pub fn is_done(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|file| file.complete)
    }

    pub fn pending(&self) -> impl Iterator<Item = &JobFile> {
        self.files.iter().filter(|file| !file.complete)
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.files.iter().any(|file| file.file_id == file_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub file_id: String,
    pub job_id: Option<String>,
    pub job_done: bool,
    pub notification: Option<String>,
    /// The file had already been completed by an earlier signal.
    pub already_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTask {
    pub task_id: String,
    pub file_id: String,
    pub job_id: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupReport {
    pub database: String,
    pub pending_tasks: Vec<PendingTask>,
}
