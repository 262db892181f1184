use std::{fs, path::Path, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::{
    broadcast::Broadcaster,
    config::HubConfig,
    dispatch::Dispatcher,
    error::StoreError,
    registry::ConnectionRegistry,
    store::{CredentialStore, MESSAGES_FILE, MessageLog, MessageStore, USERS_FILE, UserDirectory},
};

/// State shared by every connection task.
pub struct Hub {
    config: HubConfig,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(
        config: HubConfig,
        credentials: Arc<dyn CredentialStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let dispatcher = Dispatcher::new(credentials, messages, broadcaster.clone(), config.clone());
        Self {
            config,
            registry,
            broadcaster,
            dispatcher,
            shutdown: CancellationToken::new(),
        }
    }

    /// A hub whose users and messages live only as long as the process.
    pub fn in_memory(config: HubConfig) -> Self {
        Self::new(
            config,
            Arc::new(UserDirectory::in_memory()),
            Arc::new(MessageLog::in_memory()),
        )
    }

    /// A hub persisting users and messages under `data_dir`.
    pub fn open(config: HubConfig, data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        let credentials = UserDirectory::open(data_dir.join(USERS_FILE))?;
        let messages = MessageLog::open(data_dir.join(MESSAGES_FILE))?;
        Ok(Self::new(config, Arc::new(credentials), Arc::new(messages)))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Token cancelled once the hub starts shutting down.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}
