use std::time::Duration;

use crate::{cli::ServeArgs, codec::DEFAULT_MAX_FRAME_BYTES};

/// Runtime knobs for the hub, independent of where they were read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub history_limit: usize,
    pub max_history: usize,
    pub max_frame_bytes: usize,
    pub require_login_to_send: bool,
    pub replay_history_on_login: bool,
    pub write_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            max_history: 1000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            require_login_to_send: true,
            replay_history_on_login: true,
            write_timeout: None,
        }
    }
}

impl From<&ServeArgs> for HubConfig {
    fn from(args: &ServeArgs) -> Self {
        Self {
            history_limit: args.history_limit,
            max_history: args.max_history.max(args.history_limit),
            max_frame_bytes: args.max_frame_bytes,
            require_login_to_send: !args.allow_anonymous_send,
            replay_history_on_login: !args.no_login_replay,
            write_timeout: args.write_timeout_ms.map(Duration::from_millis),
        }
    }
}
