use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::reply::{ErrorKind, ErrorPayload};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode value: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encodes a value as JSON text for transport to an embedding process.
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(CodecError::Encode)
}

/// Decodes JSON text produced by [`serialize`] (or by the embedding process).
pub fn deserialize<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    serde_json::from_str(text).map_err(CodecError::Decode)
}

impl From<CodecError> for ErrorPayload {
    fn from(err: CodecError) -> Self {
        let kind = match err {
            CodecError::Encode(_) => ErrorKind::Internal,
            CodecError::Decode(_) => ErrorKind::InvalidInput,
        };
        ErrorPayload::new(kind, err.to_string())
    }
}
