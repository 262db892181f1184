//! Collaborators the hub calls into: who may log in, and what was said.
//!
//! Both stores are synchronous. The hub calls them inline from the
//! requesting connection's task, so a slow store only delays that peer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::StoreError, protocol::HistoryEntry};

mod credentials;
mod messages;

pub use credentials::UserDirectory;
pub use messages::MessageLog;

pub const USERS_FILE: &str = "users.json";
pub const MESSAGES_FILE: &str = "messages.jsonl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { user_id: u64 },
    Rejected { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified { user_id: u64, username: String },
    Rejected { message: String },
}

pub trait CredentialStore: Send + Sync {
    fn create(&self, username: &str, password: &str) -> Result<CreateOutcome, StoreError>;

    fn verify(&self, username: &str, password: &str) -> Result<VerifyOutcome, StoreError>;
}

/// A persisted chat line. `sender_id` is 0 for anonymous senders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender_id: u64,
    pub sender_username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            sender: self.sender_username.clone(),
            message: self.text.clone(),
            timestamp: self.timestamp,
        }
    }
}

pub trait MessageStore: Send + Sync {
    fn append(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// The newest `limit` messages, oldest first.
    fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;
}
