use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::{info, warn};

use super::{ChatMessage, MessageStore};
use crate::error::StoreError;

/// Chronological chat log, optionally mirrored to a JSON-lines file.
pub struct MessageLog {
    state: Mutex<LogState>,
}

struct LogState {
    messages: Vec<ChatMessage>,
    file: Option<File>,
}

impl MessageLog {
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LogState {
                messages: Vec::new(),
                file: None,
            }),
        }
    }

    /// Opens (or creates) an append-only log and replays what it holds.
    ///
    /// A torn final entry left by a crash is skipped and terminated, so the
    /// next append starts on a fresh line.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let contents = match fs::read(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let mut messages = Vec::new();
        for (index, line) in contents.split(|byte| *byte == b'\n').enumerate() {
            if line.trim_ascii().is_empty() {
                continue;
            }
            match serde_json::from_slice::<ChatMessage>(line) {
                Ok(message) => messages.push(message),
                Err(error) => warn!(line = index + 1, ?error, "skipping corrupt log entry"),
            }
        }
        info!(path = %path.display(), messages = messages.len(), "message log loaded");

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if !contents.is_empty() && !contents.ends_with(b"\n") {
            file.write_all(b"\n")?;
        }
        Ok(Self {
            state: Mutex::new(LogState {
                messages,
                file: Some(file),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageStore for MessageLog {
    fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(file) = state.file.as_mut() {
            let mut line = serde_json::to_vec(message)?;
            line.push(b'\n');
            let committed = file.metadata()?.len();
            if let Err(err) = file.write_all(&line).and_then(|()| file.sync_data()) {
                // Drop whatever part of the entry reached the file.
                if let Err(rollback) = file.set_len(committed) {
                    warn!(error = ?rollback, "failed to roll back partial log entry");
                }
                return Err(err.into());
            }
        }
        state.messages.push(message.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let state = self.lock();
        let start = state.messages.len().saturating_sub(limit);
        Ok(state.messages[start..].to_vec())
    }
}
