use std::fmt;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Failure classes surfaced to callers.
///
/// `Storage`, `Constraint` and `Io` come from the database layer,
/// `NotFound` and `InvalidState` from the state machine, `InvalidInput` from
/// malformed arguments, and `Internal` from contained panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Storage,
    Constraint,
    Io,
    NotFound,
    InvalidState,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Storage => "storage",
            ErrorKind::Constraint => "constraint",
            ErrorKind::Io => "io",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Uniform result of every engine operation.
///
/// On the wire a reply is `{"ok": true, "data": ...}` or
/// `{"ok": false, "error": {"kind": ..., "message": ...}}`; `ok` is the only
/// discriminator callers should look at.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Ok(T),
    Error(ErrorPayload),
}

impl Reply<()> {
    pub fn ok_result() -> Self {
        Reply::Ok(())
    }
}

impl<T> Reply<T> {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Reply::Error(ErrorPayload::new(kind, message))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Reply::Ok(value) => Some(value),
            Reply::Error(_) => None,
        }
    }

    pub fn error_payload(&self) -> Option<&ErrorPayload> {
        match self {
            Reply::Ok(_) => None,
            Reply::Error(payload) => Some(payload),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.error_payload().map(|payload| payload.kind)
    }

    pub fn into_result(self) -> Result<T, ErrorPayload> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Error(payload) => Err(payload),
        }
    }

    pub fn as_ref(&self) -> Reply<&T> {
        match self {
            Reply::Ok(value) => Reply::Ok(value),
            Reply::Error(payload) => Reply::Error(payload.clone()),
        }
    }

    pub fn map<U, F>(self, f: F) -> Reply<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Reply::Ok(value) => Reply::Ok(f(value)),
            Reply::Error(payload) => Reply::Error(payload),
        }
    }
}

impl<T, E> From<Result<T, E>> for Reply<T>
where
    E: Into<ErrorPayload>,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Reply::Ok(value),
            Err(err) => Reply::Error(err.into()),
        }
    }
}

#[derive(Serialize)]
struct WireRef<'a, T> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorPayload>,
}

#[derive(Deserialize)]
struct WireOwned {
    ok: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

impl<T: Serialize> Serialize for Reply<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Reply::Ok(value) => WireRef {
                ok: true,
                data: Some(value),
                error: None,
            },
            Reply::Error(payload) => WireRef {
                ok: false,
                data: None,
                error: Some(payload),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Reply<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireOwned::deserialize(deserializer)?;
        if wire.ok {
            // `null` and a missing `data` field are the same thing for unit
            // and optional payloads.
            let data = wire.data.unwrap_or(Value::Null);
            T::deserialize(data).map(Reply::Ok).map_err(D::Error::custom)
        } else {
            wire.error
                .map(Reply::Error)
                .ok_or_else(|| D::Error::missing_field("error"))
        }
    }
}
