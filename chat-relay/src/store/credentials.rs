use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use super::{CreateOutcome, CredentialStore, VerifyOutcome};
use crate::error::StoreError;

const MISSING_CREDENTIALS: &str = "Username and password required";
const DUPLICATE_USERNAME: &str = "Username already exists";
const BAD_CREDENTIALS: &str = "Invalid username or password";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    id: u64,
    username: String,
    salt: String,
    password_hash: String,
}

/// Username/password directory with salted SHA-256 hashes.
///
/// When opened on a file, the whole directory is rewritten after every
/// successful registration (temp file, then rename).
pub struct UserDirectory {
    users: Mutex<HashMap<String, UserRecord>>,
    path: Option<PathBuf>,
}

impl UserDirectory {
    pub fn in_memory() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let users = if path.exists() {
            let records: Vec<UserRecord> = serde_json::from_slice(&fs::read(&path)?)?;
            records
                .into_iter()
                .map(|record| (record.username.clone(), record))
                .collect()
        } else {
            HashMap::new()
        };
        info!(path = %path.display(), users = users.len(), "user directory loaded");

        Ok(Self {
            users: Mutex::new(users),
            path: Some(path),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UserRecord>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for UserDirectory {
    fn create(&self, username: &str, password: &str) -> Result<CreateOutcome, StoreError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Ok(rejected_create(MISSING_CREDENTIALS));
        }

        let mut users = self.lock();
        if users.contains_key(username) {
            return Ok(rejected_create(DUPLICATE_USERNAME));
        }

        let id = users.values().map(|user| user.id).max().unwrap_or(0) + 1;
        let salt = hex(&rand::thread_rng().r#gen::<[u8; 16]>());
        let record = UserRecord {
            id,
            username: username.to_string(),
            password_hash: hash_password(&salt, password),
            salt,
        };
        users.insert(record.username.clone(), record);

        if let Some(path) = &self.path {
            if let Err(err) = persist(path, &users) {
                users.remove(username);
                return Err(err);
            }
        }

        Ok(CreateOutcome::Created { user_id: id })
    }

    fn verify(&self, username: &str, password: &str) -> Result<VerifyOutcome, StoreError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Ok(rejected_verify(MISSING_CREDENTIALS));
        }

        let users = self.lock();
        match users.get(username) {
            Some(user) if hash_password(&user.salt, password) == user.password_hash => {
                Ok(VerifyOutcome::Verified {
                    user_id: user.id,
                    username: user.username.clone(),
                })
            }
            _ => Ok(rejected_verify(BAD_CREDENTIALS)),
        }
    }
}

fn rejected_create(message: &str) -> CreateOutcome {
    CreateOutcome::Rejected {
        message: message.to_string(),
    }
}

fn rejected_verify(message: &str) -> VerifyOutcome {
    VerifyOutcome::Rejected {
        message: message.to_string(),
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn persist(path: &Path, users: &HashMap<String, UserRecord>) -> Result<(), StoreError> {
    let mut records: Vec<&UserRecord> = users.values().collect();
    records.sort_by_key(|record| record.id);

    let staging = path.with_extension("json.tmp");
    fs::write(&staging, serde_json::to_vec_pretty(&records)?)?;
    fs::rename(&staging, path)?;
    Ok(())
}
