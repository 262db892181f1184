use std::io;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// One decoded request: its `type` plus every other top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    kind: String,
    fields: Map<String, Value>,
}

impl Frame {
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(line).map_err(|_| FrameError::InvalidJson)?;
        let Value::Object(mut fields) = value else {
            return Err(FrameError::InvalidJson);
        };
        match fields.remove("type") {
            Some(Value::String(kind)) => Ok(Self { kind, fields }),
            _ => Err(FrameError::MissingType),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns a string field, `None` when absent or not a string.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Returns an optional non-negative integer field.
    pub fn u64_field(&self, name: &str) -> Result<Option<u64>, FrameError> {
        match self.fields.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| FrameError::Field(format!("'{name}' must be a non-negative integer"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Typed client requests. The hub parses inbound traffic as [`Frame`]s so
/// that unknown or malformed requests can be answered; this enum is what
/// well-behaved clients send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    GetHistory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u64>,
    },
    SendMessage {
        sender: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub sender: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RegisterResponse {
        status: Status,
        message: String,
    },
    LoginResponse {
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    HistoryResponse {
        messages: Vec<HistoryEntry>,
    },
    NewMessage {
        sender: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn login_success(user_id: u64, username: impl Into<String>) -> Self {
        Self::LoginResponse {
            status: Status::Success,
            user_id: Some(user_id),
            username: Some(username.into()),
            message: None,
        }
    }

    pub fn login_error(message: impl Into<String>) -> Self {
        Self::LoginResponse {
            status: Status::Error,
            user_id: None,
            username: None,
            message: Some(message.into()),
        }
    }
}

/// Encodes a message as one newline-terminated JSON line.
pub fn encode<T: Serialize>(message: &T) -> io::Result<Bytes> {
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    Ok(Bytes::from(encoded))
}

pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = encode(message)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
